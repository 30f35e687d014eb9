//! Driftwatch - keeps a replicated cloud store honest.
//!
//! Walks the authoritative local store forward in fixed time windows,
//! compares every window against the cloud copy once replication has had
//! time to catch up, and reports (optionally repairs) records that diverge.
//! Progress is checkpointed so a restart resumes where it left off.

mod checkpoint;
mod clock;
mod config;
mod db;
mod error;
mod loader;
mod reconciler;
mod routes;
mod runner;
mod sink;
mod store;
#[cfg(test)]
mod testing;

use crate::checkpoint::FileCheckpoint;
use crate::clock::{shutdown_channel, SystemClock};
use crate::config::Config;
use crate::db::{PgCloudStore, PgLocalStore};
use crate::runner::{Exit, LoopState, ReconcileLoop};
use crate::sink::DiffLog;
use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub status: watch::Receiver<LoopState>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    // Initialize tracing
    let default_filter = if config.reconcile.debug {
        "driftwatch_server=debug,tower_http=debug"
    } else {
        "driftwatch_server=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Checkpoint must be writable before anything else starts
    let (checkpoint, resumed) = FileCheckpoint::open(&config.reconcile.checkpoint_path).await?;
    let start = resumed.unwrap_or(config.reconcile.start_time);

    // Create database pools
    tracing::info!("Connecting to local and cloud stores...");
    let local_pool = db::create_pool(&config.local_database_url, config.db_max_connections).await?;
    let cloud_pool = db::create_pool(&config.cloud_database_url, config.db_max_connections).await?;
    let cloud_read_pool = match &config.cloud_read_database_url {
        Some(url) => Some(db::create_pool(url, config.db_max_connections).await?),
        None => None,
    };

    let local = PgLocalStore::new(local_pool, &config.local_table);
    let cloud = PgCloudStore::new(cloud_pool, cloud_read_pool, &config.cloud_table);
    let sink = match &config.diff_log_path {
        Some(path) => DiffLog::with_file(path).await?,
        None => DiffLog::tracing_only(),
    };

    let (reconcile_loop, status) = ReconcileLoop::new(
        local,
        cloud,
        sink,
        checkpoint,
        SystemClock,
        config.reconcile.clone(),
        start,
    )?;

    // Status endpoint
    let app = Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { status });
    let listener = tokio::net::TcpListener::bind(&config.status_addr).await?;
    tracing::info!("Status endpoint listening on {}", config.status_addr);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Status endpoint failed: {}", e);
        }
    });

    // Stop at the next sleep boundary on Ctrl-C
    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
        }
        trigger.trigger();
    });

    match reconcile_loop.run(shutdown).await {
        Exit::Finished => tracing::info!("All windows up to the end time compared"),
        Exit::Shutdown => tracing::info!("Stopped before reaching the end time"),
    }

    Ok(())
}
