//! HTTP boundary. Thin by design: handlers translate between HTTP and the
//! engine, nothing else.

pub mod router;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::core::engine::Engine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub async fn serve(state: AppState, host: &str, port: u16) -> Result<()> {
    let app = router::build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("API listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("server error")?;
    Ok(())
}
