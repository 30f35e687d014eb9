//! HTTP route definitions.

mod health;
mod status;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new().merge(health::routes()).merge(status::routes())
}
