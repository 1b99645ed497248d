//! The engine facade handed to the web boundary. Owns the dispatcher, the
//! idempotency ledger, and the sweep scheduler; constructed once at bootstrap
//! with its dependencies injected.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::core::dispatcher::{Dispatcher, RetryPolicy};
use crate::core::error::EngineError;
use crate::core::idempotency::{DEFAULT_MAX_ENTRIES, DEFAULT_TTL, IdempotencyLedger};
use crate::core::provider::{RecorderProvider, TranscriptSummarizer};
use crate::core::store::MeetingStore;
use crate::core::sweeps::{
    self, SchedulerStatus, SweepContext, SweepReport, SweepScheduler, SweepSettings,
};
use crate::core::types::ProcessedResult;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub webhook_secret: Option<String>,
    pub retry: RetryPolicy,
    pub idempotency_ttl: Duration,
    pub idempotency_max_entries: usize,
    pub sweeps: SweepSettings,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            webhook_secret: None,
            retry: RetryPolicy::default(),
            idempotency_ttl: DEFAULT_TTL,
            idempotency_max_entries: DEFAULT_MAX_ENTRIES,
            sweeps: SweepSettings::default(),
        }
    }
}

pub struct Engine {
    dispatcher: Dispatcher,
    ctx: Arc<SweepContext>,
    scheduler: SweepScheduler,
}

impl Engine {
    pub fn new(
        store: Arc<dyn MeetingStore>,
        provider: Arc<dyn RecorderProvider>,
        summarizer: Arc<dyn TranscriptSummarizer>,
        options: EngineOptions,
    ) -> Self {
        let ledger = Arc::new(IdempotencyLedger::new(
            options.idempotency_ttl,
            options.idempotency_max_entries,
        ));
        let dispatcher = Dispatcher::new(
            store.clone(),
            provider.clone(),
            summarizer,
            ledger.clone(),
            options.webhook_secret,
            options.retry,
        );
        let ctx = Arc::new(SweepContext {
            store,
            provider,
            ledger,
            settings: options.sweeps,
        });
        let scheduler = SweepScheduler::new(ctx.clone());
        Self {
            dispatcher,
            ctx,
            scheduler,
        }
    }

    /// Webhook entry point for the HTTP boundary. Client errors map to 4xx,
    /// exhausted transient errors to 5xx; the router does that translation.
    pub async fn process_webhook(
        &self,
        raw: &str,
        signature: Option<&str>,
    ) -> Result<ProcessedResult, EngineError> {
        self.dispatcher.process_with_retry(raw, signature).await
    }

    /// Flattened variant: every outcome, including rejection, becomes a
    /// `ProcessedResult` instead of an error.
    pub async fn handle_webhook(&self, raw: &str, signature: Option<&str>) -> ProcessedResult {
        match self.process_webhook(raw, signature).await {
            Ok(result) => result,
            Err(e) => ProcessedResult::failed(e.to_string()),
        }
    }

    pub async fn trigger_status_sync(&self) -> Result<SweepReport> {
        sweeps::run_status_poll(&self.ctx).await
    }

    pub async fn trigger_calendar_sync(&self, user_id: Option<&str>) -> Result<SweepReport> {
        sweeps::run_calendar_sync(&self.ctx, user_id).await
    }

    pub async fn trigger_auto_schedule(&self, user_id: Option<&str>) -> Result<SweepReport> {
        sweeps::run_auto_schedule(&self.ctx, user_id).await
    }

    pub async fn start_sweeps(&self) -> Result<()> {
        self.scheduler.start().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.shutdown().await
    }

    pub fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::SqliteStore;
    use crate::core::testutil::{CountingSummarizer, FakeProvider};

    fn engine() -> Engine {
        Engine::new(
            Arc::new(SqliteStore::in_memory().unwrap()),
            Arc::new(FakeProvider::default()),
            Arc::new(CountingSummarizer::succeeding()),
            EngineOptions::default(),
        )
    }

    #[tokio::test]
    async fn handle_webhook_flattens_client_errors() {
        let result = engine()
            .handle_webhook(r#"{"event": "complete", "data": {}}"#, None)
            .await;
        assert!(!result.success);
        assert!(!result.processed);
    }

    #[tokio::test]
    async fn handle_webhook_accepts_unknown_kinds() {
        let result = engine()
            .handle_webhook(r#"{"event": "made_up", "data": {}}"#, None)
            .await;
        assert!(result.success);
        assert!(!result.processed);
    }

    #[tokio::test]
    async fn manual_triggers_run_against_an_empty_store() {
        let engine = engine();
        assert_eq!(engine.trigger_status_sync().await.unwrap().processed, 0);
        assert_eq!(
            engine.trigger_calendar_sync(None).await.unwrap().processed,
            0
        );
        assert_eq!(
            engine
                .trigger_auto_schedule(Some("user-1"))
                .await
                .unwrap()
                .processed,
            0
        );
        assert!(!engine.scheduler_status().running);
    }
}
