//! Repository contract for the persistent store.
//!
//! The engine never touches SQL directly; everything goes through
//! `MeetingStore` so the boundary layer owns the concrete database. The
//! bundled implementation is sqlite (`SqliteStore`), which doubles as the
//! in-memory store for tests.

mod sqlite;

pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::types::{
    CalendarIntegration, ChangeAuditEntry, MeetingPatch, MeetingRecord,
};

#[async_trait]
pub trait MeetingStore: Send + Sync {
    async fn insert_meeting(&self, meeting: &MeetingRecord) -> Result<()>;

    async fn find_by_external_bot_id(&self, bot_id: &str) -> Result<Option<MeetingRecord>>;

    /// Lookup by calendar linkage scoped to the owning user. The ownership
    /// check prevents cross-tenant leakage if two tenants see the same
    /// external event id.
    async fn find_by_calendar_event_and_owner(
        &self,
        event_id: &str,
        user_id: &str,
    ) -> Result<Option<MeetingRecord>>;

    /// Apply a partial update. Returns false when no row matched.
    async fn update_meeting(&self, meeting_id: &str, patch: &MeetingPatch) -> Result<bool>;

    /// Records that still have an external bot id and a non-terminal
    /// processing status — the set the status-poll sweep refreshes.
    async fn list_active_bot_meetings(&self) -> Result<Vec<MeetingRecord>>;

    /// Housekeeping timestamp bump when a sweep found no drift.
    async fn touch_meeting_synced(&self, meeting_id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn create_audit_entry(&self, entry: &ChangeAuditEntry) -> Result<()>;

    async fn list_audit_for_meeting(&self, meeting_id: &str) -> Result<Vec<ChangeAuditEntry>>;

    async fn prune_audit_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    async fn upsert_integration(&self, integration: &CalendarIntegration) -> Result<()>;

    async fn list_calendar_integrations(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<CalendarIntegration>>;

    async fn list_active_calendar_integrations(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<CalendarIntegration>>;

    async fn touch_integration_synced(
        &self,
        integration_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Clear last-synced markers that predate the retention window so the
    /// next sync sweep treats the integration as never synced.
    async fn clear_stale_integration_sync(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}
