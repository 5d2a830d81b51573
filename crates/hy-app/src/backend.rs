pub mod config;
pub mod form;
pub mod routes;
pub mod schemas;
pub mod state;

use std::sync::Arc;
use anyhow::Context;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use hy_core::{OrchestratorContext, remote::RemoteModelService};
use tokio::net::TcpListener;
use crate::backend::config::BackendConfig;
use crate::backend::routes::api_routes;
use crate::backend::state::AppState;

pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .merge(api_routes())
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

pub async fn serve(config: BackendConfig) -> anyhow::Result<()> {
    let service = RemoteModelService::new(config.worker_url.clone(), config.worker_timeout)
        .context("failed to build model worker client")?;
    let ctx = OrchestratorContext::new(Arc::new(service), config.orchestrator());
    let app = router(Arc::new(AppState::new(Arc::new(ctx))), config.max_upload_bytes);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        %addr,
        worker = %config.worker_url,
        low_vram = config.low_vram,
        output_dir = %config.output_dir.display(),
        "Starting generation server"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
