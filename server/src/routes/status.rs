//! Loop status endpoint.

use axum::{extract::State, routing::get, Json, Router};

use crate::runner::LoopState;
use crate::AppState;

/// Create status routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/status", get(status))
}

/// GET /status - Latest state published by the reconciliation loop.
async fn status(State(state): State<AppState>) -> Json<LoopState> {
    Json(state.status.borrow().clone())
}
