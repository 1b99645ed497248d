use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tokio::sync::Mutex;
use tracing::info;

use super::MeetingStore;
use crate::core::types::{
    CalendarIntegration, CalendarProvider, ChangeAuditEntry, ChangeSource, MeetingPatch,
    MeetingRecord, MeetingStatus, ProcessingStatus,
};

const MEETING_COLS: &str = "id, user_id, title, external_bot_id, status, processing_status, \
     scheduled_start, duration_minutes, meeting_url, recording_url, transcript, summary, \
     calendar_event_id, failure_reason, last_synced_at, created_at, updated_at";

pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Connection::open(path.as_ref())?;
        Self::create_schema(&db)?;
        info!("Opened meeting store at {}", path.as_ref().display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// In-memory store, used by tests and available as a throwaway backend.
    pub fn in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::create_schema(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    fn create_schema(db: &Connection) -> Result<()> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS meetings (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                external_bot_id TEXT UNIQUE,
                status TEXT,
                processing_status TEXT NOT NULL DEFAULT 'pending',
                scheduled_start TEXT NOT NULL,
                duration_minutes INTEGER NOT NULL DEFAULT 30,
                meeting_url TEXT,
                recording_url TEXT,
                transcript TEXT,
                summary TEXT,
                calendar_event_id TEXT,
                failure_reason TEXT,
                last_synced_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS calendar_integrations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                external_calendar_id TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                last_synced_at TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (user_id, provider)
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS change_audit_log (
                id TEXT PRIMARY KEY,
                meeting_id TEXT NOT NULL,
                source TEXT NOT NULL,
                external_event_id TEXT NOT NULL,
                changes TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_meetings_calendar_event
             ON meetings (calendar_event_id, user_id)",
            [],
        )?;

        Ok(())
    }
}

fn parse_dt(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_opt_dt(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_dt(idx, s)).transpose()
}

fn parse_json<T: serde::de::DeserializeOwned>(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<T>> {
    raw.map(|s| {
        serde_json::from_str(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

fn meeting_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MeetingRecord> {
    Ok(MeetingRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        external_bot_id: row.get(3)?,
        status: row
            .get::<_, Option<String>>(4)?
            .as_deref()
            .and_then(MeetingStatus::from_status),
        processing_status: ProcessingStatus::from_status(&row.get::<_, String>(5)?)
            .unwrap_or(ProcessingStatus::Pending),
        scheduled_start: parse_dt(6, row.get(6)?)?,
        duration_minutes: row.get(7)?,
        meeting_url: row.get(8)?,
        recording_url: row.get(9)?,
        transcript: parse_json(10, row.get(10)?)?,
        summary: parse_json(11, row.get(11)?)?,
        calendar_event_id: row.get(12)?,
        failure_reason: row.get(13)?,
        last_synced_at: parse_opt_dt(14, row.get(14)?)?,
        created_at: parse_dt(15, row.get(15)?)?,
        updated_at: parse_dt(16, row.get(16)?)?,
    })
}

fn integration_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CalendarIntegration> {
    let provider: String = row.get(2)?;
    Ok(CalendarIntegration {
        id: row.get(0)?,
        user_id: row.get(1)?,
        provider: CalendarProvider::from_name(&provider).unwrap_or(CalendarProvider::Google),
        external_calendar_id: row.get(3)?,
        active: row.get::<_, i64>(4)? != 0,
        last_synced_at: parse_opt_dt(5, row.get(5)?)?,
        created_at: parse_dt(6, row.get(6)?)?,
    })
}

fn audit_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChangeAuditEntry> {
    let source: String = row.get(2)?;
    Ok(ChangeAuditEntry {
        id: row.get(0)?,
        meeting_id: row.get(1)?,
        source: ChangeSource::from_name(&source).unwrap_or(ChangeSource::Sweep),
        external_event_id: row.get(3)?,
        changes: parse_json(4, row.get(4)?)?.unwrap_or_default(),
        created_at: parse_dt(5, row.get(5)?)?,
    })
}

fn json_text<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>> {
    Ok(match value {
        Some(v) => Some(serde_json::to_string(v)?),
        None => None,
    })
}

#[async_trait]
impl MeetingStore for SqliteStore {
    async fn insert_meeting(&self, meeting: &MeetingRecord) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            &format!("INSERT INTO meetings ({MEETING_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"),
            params![
                meeting.id,
                meeting.user_id,
                meeting.title,
                meeting.external_bot_id,
                meeting.status.map(MeetingStatus::as_str),
                meeting.processing_status.as_str(),
                meeting.scheduled_start.to_rfc3339(),
                meeting.duration_minutes,
                meeting.meeting_url,
                meeting.recording_url,
                json_text(&meeting.transcript)?,
                json_text(&meeting.summary)?,
                meeting.calendar_event_id,
                meeting.failure_reason,
                meeting.last_synced_at.map(|t| t.to_rfc3339()),
                meeting.created_at.to_rfc3339(),
                meeting.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn find_by_external_bot_id(&self, bot_id: &str) -> Result<Option<MeetingRecord>> {
        let db = self.db.lock().await;
        let meeting = db
            .query_row(
                &format!("SELECT {MEETING_COLS} FROM meetings WHERE external_bot_id = ?1"),
                params![bot_id],
                meeting_from_row,
            )
            .optional()?;
        Ok(meeting)
    }

    async fn find_by_calendar_event_and_owner(
        &self,
        event_id: &str,
        user_id: &str,
    ) -> Result<Option<MeetingRecord>> {
        let db = self.db.lock().await;
        let meeting = db
            .query_row(
                &format!(
                    "SELECT {MEETING_COLS} FROM meetings
                     WHERE calendar_event_id = ?1 AND user_id = ?2"
                ),
                params![event_id, user_id],
                meeting_from_row,
            )
            .optional()?;
        Ok(meeting)
    }

    async fn update_meeting(&self, meeting_id: &str, patch: &MeetingPatch) -> Result<bool> {
        if patch.is_empty() {
            return Ok(false);
        }

        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        let mut push = |col: &'static str, value: Value, sets: &mut Vec<&str>| {
            values.push(value);
            sets.push(col);
        };

        if let Some(title) = &patch.title {
            push("title", Value::Text(title.clone()), &mut sets);
        }
        if let Some(status) = patch.status {
            push("status", Value::Text(status.as_str().to_string()), &mut sets);
        }
        if let Some(ps) = patch.processing_status {
            push(
                "processing_status",
                Value::Text(ps.as_str().to_string()),
                &mut sets,
            );
        }
        if let Some(start) = patch.scheduled_start {
            push(
                "scheduled_start",
                Value::Text(start.to_rfc3339()),
                &mut sets,
            );
        }
        if let Some(minutes) = patch.duration_minutes {
            push("duration_minutes", Value::Integer(minutes), &mut sets);
        }
        if patch.clear_external_bot_id {
            push("external_bot_id", Value::Null, &mut sets);
        } else if let Some(bot_id) = &patch.external_bot_id {
            push("external_bot_id", Value::Text(bot_id.clone()), &mut sets);
        }
        if let Some(url) = &patch.recording_url {
            push("recording_url", Value::Text(url.clone()), &mut sets);
        }
        if let Some(transcript) = &patch.transcript {
            push(
                "transcript",
                Value::Text(serde_json::to_string(transcript)?),
                &mut sets,
            );
        }
        if let Some(summary) = &patch.summary {
            push(
                "summary",
                Value::Text(serde_json::to_string(summary)?),
                &mut sets,
            );
        }
        if let Some(reason) = &patch.failure_reason {
            push("failure_reason", Value::Text(reason.clone()), &mut sets);
        }
        if let Some(at) = patch.last_synced_at {
            push("last_synced_at", Value::Text(at.to_rfc3339()), &mut sets);
        }

        push(
            "updated_at",
            Value::Text(Utc::now().to_rfc3339()),
            &mut sets,
        );
        values.push(Value::Text(meeting_id.to_string()));

        let assignments: Vec<String> = sets
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{} = ?{}", col, i + 1))
            .collect();
        let sql = format!(
            "UPDATE meetings SET {} WHERE id = ?{}",
            assignments.join(", "),
            sets.len() + 1
        );

        let db = self.db.lock().await;
        let updated = db.execute(&sql, params_from_iter(values))?;
        Ok(updated > 0)
    }

    async fn list_active_bot_meetings(&self) -> Result<Vec<MeetingRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {MEETING_COLS} FROM meetings
             WHERE external_bot_id IS NOT NULL
               AND processing_status IN ('pending', 'processing')
             ORDER BY scheduled_start ASC"
        ))?;
        let rows = stmt.query_map([], meeting_from_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    async fn touch_meeting_synced(&self, meeting_id: &str, at: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE meetings SET last_synced_at = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), meeting_id],
        )?;
        Ok(())
    }

    async fn create_audit_entry(&self, entry: &ChangeAuditEntry) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO change_audit_log (id, meeting_id, source, external_event_id, changes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id,
                entry.meeting_id,
                entry.source.as_str(),
                entry.external_event_id,
                serde_json::to_string(&entry.changes)?,
                entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn list_audit_for_meeting(&self, meeting_id: &str) -> Result<Vec<ChangeAuditEntry>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, meeting_id, source, external_event_id, changes, created_at
             FROM change_audit_log WHERE meeting_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![meeting_id], audit_from_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    async fn prune_audit_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let db = self.db.lock().await;
        let removed = db.execute(
            "DELETE FROM change_audit_log WHERE created_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(removed)
    }

    async fn upsert_integration(&self, integration: &CalendarIntegration) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT OR REPLACE INTO calendar_integrations
             (id, user_id, provider, external_calendar_id, active, last_synced_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                integration.id,
                integration.user_id,
                integration.provider.as_str(),
                integration.external_calendar_id,
                integration.active as i64,
                integration.last_synced_at.map(|t| t.to_rfc3339()),
                integration.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn list_calendar_integrations(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<CalendarIntegration>> {
        let db = self.db.lock().await;
        let sql = "SELECT id, user_id, provider, external_calendar_id, active, last_synced_at, created_at
                   FROM calendar_integrations";
        let mut results = Vec::new();
        match user_id {
            Some(user) => {
                let mut stmt = db.prepare(&format!("{sql} WHERE user_id = ?1"))?;
                let rows = stmt.query_map(params![user], integration_from_row)?;
                for row in rows {
                    results.push(row?);
                }
            }
            None => {
                let mut stmt = db.prepare(sql)?;
                let rows = stmt.query_map([], integration_from_row)?;
                for row in rows {
                    results.push(row?);
                }
            }
        }
        Ok(results)
    }

    async fn list_active_calendar_integrations(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<CalendarIntegration>> {
        let all = self.list_calendar_integrations(user_id).await?;
        Ok(all.into_iter().filter(|i| i.active).collect())
    }

    async fn touch_integration_synced(
        &self,
        integration_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE calendar_integrations SET last_synced_at = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), integration_id],
        )?;
        Ok(())
    }

    async fn clear_stale_integration_sync(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let db = self.db.lock().await;
        let cleared = db.execute(
            "UPDATE calendar_integrations SET last_synced_at = NULL
             WHERE last_synced_at IS NOT NULL AND last_synced_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FieldChange, TranscriptSegment, TranscriptWord};
    use chrono::Duration;

    fn sample_meeting(bot_id: &str) -> MeetingRecord {
        let mut m = MeetingRecord::new("user-1", "Weekly sync", Utc::now());
        m.external_bot_id = Some(bot_id.to_string());
        m.calendar_event_id = Some(format!("cal-{bot_id}"));
        m
    }

    #[tokio::test]
    async fn meeting_round_trips() {
        let store = SqliteStore::in_memory().unwrap();
        let mut meeting = sample_meeting("bot-1");
        meeting.transcript = Some(vec![TranscriptSegment {
            speaker: "A".to_string(),
            words: vec![TranscriptWord {
                word: "Hi".to_string(),
            }],
        }]);
        store.insert_meeting(&meeting).await.unwrap();

        let found = store
            .find_by_external_bot_id("bot-1")
            .await
            .unwrap()
            .expect("meeting by bot id");
        assert_eq!(found.id, meeting.id);
        assert_eq!(found.title, "Weekly sync");
        assert_eq!(found.processing_status, ProcessingStatus::Pending);
        assert_eq!(found.transcript.unwrap().len(), 1);

        let by_event = store
            .find_by_calendar_event_and_owner("cal-bot-1", "user-1")
            .await
            .unwrap();
        assert!(by_event.is_some());

        // Wrong owner must not see the record even with a matching event id.
        let cross_tenant = store
            .find_by_calendar_event_and_owner("cal-bot-1", "user-2")
            .await
            .unwrap();
        assert!(cross_tenant.is_none());
    }

    #[tokio::test]
    async fn bot_id_is_unique_across_meetings() {
        let store = SqliteStore::in_memory().unwrap();
        store.insert_meeting(&sample_meeting("bot-1")).await.unwrap();
        let mut dup = sample_meeting("bot-1");
        dup.calendar_event_id = None;
        assert!(store.insert_meeting(&dup).await.is_err());
    }

    #[tokio::test]
    async fn patch_updates_and_clears_bot_linkage() {
        let store = SqliteStore::in_memory().unwrap();
        let meeting = sample_meeting("bot-1");
        store.insert_meeting(&meeting).await.unwrap();

        let patch = MeetingPatch {
            status: Some(MeetingStatus::Failed),
            processing_status: Some(ProcessingStatus::Failed),
            failure_reason: Some("malformed bot id".to_string()),
            clear_external_bot_id: true,
            ..Default::default()
        };
        assert!(store.update_meeting(&meeting.id, &patch).await.unwrap());

        assert!(store.find_by_external_bot_id("bot-1").await.unwrap().is_none());
        let updated = store
            .find_by_calendar_event_and_owner("cal-bot-1", "user-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, Some(MeetingStatus::Failed));
        assert_eq!(updated.processing_status, ProcessingStatus::Failed);
        assert_eq!(updated.failure_reason.as_deref(), Some("malformed bot id"));
    }

    #[tokio::test]
    async fn active_listing_excludes_terminal_processing() {
        let store = SqliteStore::in_memory().unwrap();
        store.insert_meeting(&sample_meeting("bot-1")).await.unwrap();
        let mut done = sample_meeting("bot-2");
        done.processing_status = ProcessingStatus::Completed;
        store.insert_meeting(&done).await.unwrap();
        let mut unlinked = MeetingRecord::new("user-1", "No bot", Utc::now());
        unlinked.calendar_event_id = Some("cal-x".to_string());
        store.insert_meeting(&unlinked).await.unwrap();

        let active = store.list_active_bot_meetings().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].external_bot_id.as_deref(), Some("bot-1"));
    }

    #[tokio::test]
    async fn audit_prune_honors_cutoff() {
        let store = SqliteStore::in_memory().unwrap();
        let meeting = sample_meeting("bot-1");
        store.insert_meeting(&meeting).await.unwrap();

        let mut old = ChangeAuditEntry::new(
            &meeting.id,
            ChangeSource::Sweep,
            "cal-bot-1",
            vec![FieldChange {
                field: "title".to_string(),
                before: Some("a".to_string()),
                after: Some("b".to_string()),
            }],
        );
        old.created_at = Utc::now() - Duration::days(40);
        store.create_audit_entry(&old).await.unwrap();

        let recent = ChangeAuditEntry::new(&meeting.id, ChangeSource::Webhook, "cal-bot-1", vec![]);
        store.create_audit_entry(&recent).await.unwrap();

        let removed = store
            .prune_audit_older_than(Utc::now() - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        let remaining = store.list_audit_for_meeting(&meeting.id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, recent.id);
    }

    #[tokio::test]
    async fn integration_upsert_keeps_one_row_per_user_provider() {
        let store = SqliteStore::in_memory().unwrap();
        let first = CalendarIntegration {
            id: "int-1".to_string(),
            user_id: "user-1".to_string(),
            provider: CalendarProvider::Google,
            external_calendar_id: "cal-a".to_string(),
            active: true,
            last_synced_at: None,
            created_at: Utc::now(),
        };
        store.upsert_integration(&first).await.unwrap();

        // Reconnecting the same provider replaces the row, keeping the
        // (user, provider) pair unique.
        let reconnected = CalendarIntegration {
            id: "int-2".to_string(),
            external_calendar_id: "cal-b".to_string(),
            ..first.clone()
        };
        store.upsert_integration(&reconnected).await.unwrap();

        let all = store.list_calendar_integrations(Some("user-1")).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].external_calendar_id, "cal-b");

        let mut inactive = all[0].clone();
        inactive.active = false;
        store.upsert_integration(&inactive).await.unwrap();
        let active = store
            .list_active_calendar_integrations(Some("user-1"))
            .await
            .unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn stale_sync_markers_are_cleared() {
        let store = SqliteStore::in_memory().unwrap();
        let stale = CalendarIntegration {
            id: "int-1".to_string(),
            user_id: "user-1".to_string(),
            provider: CalendarProvider::Google,
            external_calendar_id: "cal-a".to_string(),
            active: true,
            last_synced_at: Some(Utc::now() - Duration::days(45)),
            created_at: Utc::now() - Duration::days(90),
        };
        store.upsert_integration(&stale).await.unwrap();

        let cleared = store
            .clear_stale_integration_sync(Utc::now() - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(cleared, 1);
        let rows = store.list_calendar_integrations(None).await.unwrap();
        assert!(rows[0].last_synced_at.is_none());
    }
}
