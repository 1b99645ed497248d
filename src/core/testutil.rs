//! In-process fakes shared by the unit tests. Only compiled for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::provider::{
    BotStatusReport, RecorderProvider, ScheduleRequest, TimeWindow, TranscriptSummarizer,
};
use crate::core::store::{MeetingStore, SqliteStore};
use crate::core::types::{
    CalendarIntegration, ChangeAuditEntry, MeetingPatch, MeetingRecord, MeetingSummary,
    RemoteCalendarEvent,
};

/// Deterministic provider backed by hash maps.
#[derive(Default)]
pub struct FakeProvider {
    pub events: Mutex<HashMap<String, RemoteCalendarEvent>>,
    pub calendars: Mutex<HashMap<String, Vec<RemoteCalendarEvent>>>,
    pub bot_statuses: Mutex<HashMap<String, String>>,
    pub scheduled: Mutex<Vec<ScheduleRequest>>,
    pub status_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn with_event(self, event: RemoteCalendarEvent) -> Self {
        self.events
            .lock()
            .unwrap()
            .insert(event.id.clone(), event);
        self
    }

    pub fn with_calendar(self, calendar_id: &str, events: Vec<RemoteCalendarEvent>) -> Self {
        self.calendars
            .lock()
            .unwrap()
            .insert(calendar_id.to_string(), events);
        self
    }

    pub fn with_bot_status(self, bot_id: &str, code: &str) -> Self {
        self.bot_statuses
            .lock()
            .unwrap()
            .insert(bot_id.to_string(), code.to_string());
        self
    }
}

#[async_trait]
impl RecorderProvider for FakeProvider {
    async fn list_events(
        &self,
        calendar_id: &str,
        _window: &TimeWindow,
    ) -> Result<Vec<RemoteCalendarEvent>> {
        Ok(self
            .calendars
            .lock()
            .unwrap()
            .get(calendar_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_event(&self, event_id: &str) -> Result<RemoteCalendarEvent> {
        self.events
            .lock()
            .unwrap()
            .get(event_id)
            .cloned()
            .ok_or_else(|| anyhow!("no such event {event_id}"))
    }

    async fn get_bot_status(&self, bot_id: &str) -> Result<BotStatusReport> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let code = self
            .bot_statuses
            .lock()
            .unwrap()
            .get(bot_id)
            .cloned()
            .ok_or_else(|| anyhow!("no such bot {bot_id}"))?;
        Ok(BotStatusReport {
            code,
            created_at: Some(Utc::now()),
        })
    }

    async fn schedule_recording(&self, request: &ScheduleRequest) -> Result<String> {
        self.scheduled.lock().unwrap().push(request.clone());
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn unschedule_recording(&self, _bot_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Summarizer that counts invocations and can be told to fail.
pub struct CountingSummarizer {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl CountingSummarizer {
    pub fn succeeding() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptSummarizer for CountingSummarizer {
    async fn summarize(&self, _transcript_text: &str) -> Result<MeetingSummary> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("summarizer unavailable"));
        }
        Ok(MeetingSummary {
            summary: "ok".to_string(),
            wins: vec![],
            support_areas: vec![],
        })
    }
}

/// Store wrapper that fails bot-id lookups a configurable number of times
/// before delegating — exercises the transient-retry path.
pub struct FlakyStore {
    pub inner: SqliteStore,
    pub failures_left: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: SqliteStore, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl MeetingStore for FlakyStore {
    async fn insert_meeting(&self, meeting: &MeetingRecord) -> Result<()> {
        self.inner.insert_meeting(meeting).await
    }

    async fn find_by_external_bot_id(&self, bot_id: &str) -> Result<Option<MeetingRecord>> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(anyhow!("store unavailable"));
        }
        self.inner.find_by_external_bot_id(bot_id).await
    }

    async fn find_by_calendar_event_and_owner(
        &self,
        event_id: &str,
        user_id: &str,
    ) -> Result<Option<MeetingRecord>> {
        self.inner
            .find_by_calendar_event_and_owner(event_id, user_id)
            .await
    }

    async fn update_meeting(&self, meeting_id: &str, patch: &MeetingPatch) -> Result<bool> {
        self.inner.update_meeting(meeting_id, patch).await
    }

    async fn list_active_bot_meetings(&self) -> Result<Vec<MeetingRecord>> {
        self.inner.list_active_bot_meetings().await
    }

    async fn touch_meeting_synced(&self, meeting_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.inner.touch_meeting_synced(meeting_id, at).await
    }

    async fn create_audit_entry(&self, entry: &ChangeAuditEntry) -> Result<()> {
        self.inner.create_audit_entry(entry).await
    }

    async fn list_audit_for_meeting(&self, meeting_id: &str) -> Result<Vec<ChangeAuditEntry>> {
        self.inner.list_audit_for_meeting(meeting_id).await
    }

    async fn prune_audit_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.inner.prune_audit_older_than(cutoff).await
    }

    async fn upsert_integration(&self, integration: &CalendarIntegration) -> Result<()> {
        self.inner.upsert_integration(integration).await
    }

    async fn list_calendar_integrations(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<CalendarIntegration>> {
        self.inner.list_calendar_integrations(user_id).await
    }

    async fn list_active_calendar_integrations(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<CalendarIntegration>> {
        self.inner.list_active_calendar_integrations(user_id).await
    }

    async fn touch_integration_synced(
        &self,
        integration_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.touch_integration_synced(integration_id, at).await
    }

    async fn clear_stale_integration_sync(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.inner.clear_stale_integration_sync(cutoff).await
    }
}
