//! Contracts for the external meeting-recording provider and the transcript
//! summarizer. The engine is handed these at startup (constructed by the
//! process bootstrap, never a module-level singleton) so tests can substitute
//! in-process fakes.

mod http;
pub mod summarizer;

pub use http::HttpRecorderProvider;
pub use summarizer::{DisabledSummarizer, HttpSummarizer, ParseOutcome, TranscriptSummarizer};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::RemoteCalendarEvent;

/// Bounded window of calendar time handed to `list_events`.
#[derive(Debug, Clone, Copy)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }
}

/// Latest lifecycle report for one bot session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotStatusReport {
    pub code: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub meeting_url: String,
    pub title: String,
    pub scheduled_start: DateTime<Utc>,
    pub duration_minutes: i64,
}

#[async_trait]
pub trait RecorderProvider: Send + Sync {
    async fn list_events(
        &self,
        calendar_id: &str,
        window: &TimeWindow,
    ) -> Result<Vec<RemoteCalendarEvent>>;

    async fn get_event(&self, event_id: &str) -> Result<RemoteCalendarEvent>;

    async fn get_bot_status(&self, bot_id: &str) -> Result<BotStatusReport>;

    /// Returns the provider-assigned external bot id for the new session.
    async fn schedule_recording(&self, request: &ScheduleRequest) -> Result<String>;

    async fn unschedule_recording(&self, bot_id: &str) -> Result<()>;
}
