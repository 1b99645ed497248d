mod config;
mod core;
mod interfaces;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::core::engine::{Engine, EngineOptions};
use crate::core::provider::{
    DisabledSummarizer, HttpRecorderProvider, HttpSummarizer, TranscriptSummarizer,
};
use crate::core::store::SqliteStore;
use crate::interfaces::web::{self, AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("Fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path).await?;

    if let Some(parent) = config.storage.db_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = Arc::new(SqliteStore::open(&config.storage.db_path)?);

    let request_timeout = Duration::from_secs(config.provider.request_timeout_secs);
    let provider = Arc::new(HttpRecorderProvider::new(
        &config.provider.base_url,
        &config.provider.api_key,
        request_timeout,
    )?);

    let summarizer: Arc<dyn TranscriptSummarizer> = if config.summarizer.enabled {
        Arc::new(HttpSummarizer::new(
            &config.summarizer.base_url,
            &config.summarizer.api_key,
            &config.summarizer.model,
            request_timeout,
        )?)
    } else {
        info!("Summarization disabled, meetings will complete without summaries");
        Arc::new(DisabledSummarizer)
    };

    let options = EngineOptions {
        webhook_secret: config.webhook_secret(),
        retry: config.retry_policy(),
        idempotency_ttl: Duration::from_secs(config.webhook.idempotency_ttl_secs),
        idempotency_max_entries: config.webhook.idempotency_max_entries,
        sweeps: config.sweep_settings(),
    };
    let engine = Arc::new(Engine::new(store, provider, summarizer, options));

    engine.start_sweeps().await?;

    let state = AppState {
        engine: engine.clone(),
    };
    web::serve(state, &config.server.host, config.server.port).await?;

    engine.shutdown().await?;
    info!("meetsyncd stopped");
    Ok(())
}
