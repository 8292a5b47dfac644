use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use super::api::{self, AppState};
use crate::collector::{CollectorTask, spawn_collector};
use crate::config::ServerConfig;
use crate::feature::StatusBuckets;
use crate::store::DbHandle;

/// Build the full application router.
pub fn build_router(state: Arc<AppState>, dev_mode: bool) -> Router {
    let app = api::api_router().with_state(state);
    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Serve the dashboard API and run `collectors` in the background until
/// Ctrl+C. Collector loops are stopped after the server drains.
pub async fn start_server(
    config: &ServerConfig,
    db: DbHandle,
    buckets: StatusBuckets,
    collectors: Vec<Arc<dyn CollectorTask>>,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles: Vec<_> = collectors
        .into_iter()
        .map(|task| {
            info!(collector = task.name(), "starting collector");
            spawn_collector(task, db.clone(), shutdown_rx.clone())
        })
        .collect();

    let state = Arc::new(AppState { db, buckets });
    let app = build_router(state, config.dev);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    info!(address = %local_addr, "teamboard listening");
    println!("teamboard running at http://{}", local_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    let _ = shutdown_tx.send(true);
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "collector task ended abnormally");
        }
    }
    served?;
    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
