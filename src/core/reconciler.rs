//! Calendar reconciliation: diff a remote calendar event against the local
//! meeting record, apply drift transactionally, and leave an audit trail.

use anyhow::{Result, anyhow};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::core::store::MeetingStore;
use crate::core::types::{
    ChangeAuditEntry, ChangeSource, FieldChange, MeetingPatch, RemoteCalendarEvent,
};

/// Sub-minute start-time jitter from the upstream is ignored.
pub const START_TOLERANCE_SECS: i64 = 60;

/// Durations above one day's worth of minutes are assumed to be seconds.
const MAX_PLAUSIBLE_MINUTES: i64 = 1440;

/// Normalize a remote duration to minutes. Some provider payloads report
/// seconds; 5400 means 90 minutes, not 5400 minutes.
pub fn normalize_duration(raw: i64) -> i64 {
    if raw > MAX_PLAUSIBLE_MINUTES {
        raw / 60
    } else {
        raw
    }
}

/// Compare a remote event with the locally stored meeting and apply any
/// drift. Returns whether anything changed.
///
/// No matching record is a successful no-op: remote events routinely cover
/// meetings nobody asked to record. A record owned by a different user is
/// treated the same way.
pub async fn reconcile(
    store: &dyn MeetingStore,
    remote: &RemoteCalendarEvent,
    owner_user_id: &str,
    source: ChangeSource,
) -> Result<bool> {
    if remote.id.is_empty() {
        return Err(anyhow!("remote calendar event is missing its id"));
    }

    let Some(meeting) = store
        .find_by_calendar_event_and_owner(&remote.id, owner_user_id)
        .await?
    else {
        debug!("No meeting linked to calendar event {}", remote.id);
        return Ok(false);
    };

    let mut changes: Vec<FieldChange> = Vec::new();
    let mut patch = MeetingPatch::default();

    if remote.title != meeting.title {
        changes.push(FieldChange {
            field: "title".to_string(),
            before: Some(meeting.title.clone()),
            after: Some(remote.title.clone()),
        });
        patch.title = Some(remote.title.clone());
    }

    let drift_secs = (remote.start_time - meeting.scheduled_start).num_seconds().abs();
    if drift_secs > START_TOLERANCE_SECS {
        changes.push(FieldChange {
            field: "scheduled_start".to_string(),
            before: Some(meeting.scheduled_start.to_rfc3339()),
            after: Some(remote.start_time.to_rfc3339()),
        });
        patch.scheduled_start = Some(remote.start_time);
    }

    let remote_minutes = normalize_duration(remote.duration);
    if remote_minutes != meeting.duration_minutes {
        changes.push(FieldChange {
            field: "duration_minutes".to_string(),
            before: Some(meeting.duration_minutes.to_string()),
            after: Some(remote_minutes.to_string()),
        });
        patch.duration_minutes = Some(remote_minutes);
    }

    let now = Utc::now();
    if changes.is_empty() {
        // Idempotent housekeeping: no drift, but the sweep still proves it
        // looked.
        store.touch_meeting_synced(&meeting.id, now).await?;
        return Ok(false);
    }

    patch.last_synced_at = Some(now);
    store.update_meeting(&meeting.id, &patch).await?;
    store
        .create_audit_entry(&ChangeAuditEntry::new(
            &meeting.id,
            source,
            &remote.id,
            changes.clone(),
        ))
        .await?;

    info!(
        "Reconciled meeting {} from event {}: {} field(s) drifted",
        meeting.id,
        remote.id,
        changes.len()
    );
    Ok(true)
}

/// Batch reconciliation used by sweeps. One malformed remote event must not
/// abort the rest; failures are logged and skipped. Returns the number of
/// records actually changed.
pub async fn reconcile_all(
    store: &dyn MeetingStore,
    events: &[RemoteCalendarEvent],
    owner_user_id: &str,
    source: ChangeSource,
) -> usize {
    let mut changed = 0usize;
    for event in events {
        match reconcile(store, event, owner_user_id, source).await {
            Ok(true) => changed += 1,
            Ok(false) => {}
            Err(e) => warn!("Skipping calendar event '{}': {e:#}", event.id),
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::SqliteStore;
    use crate::core::types::MeetingRecord;
    use chrono::{Duration, Utc};

    async fn store_with_meeting(event_id: &str, owner: &str) -> (SqliteStore, MeetingRecord) {
        let store = SqliteStore::in_memory().unwrap();
        let mut meeting = MeetingRecord::new(owner, "Planning", Utc::now());
        meeting.duration_minutes = 90;
        meeting.calendar_event_id = Some(event_id.to_string());
        store.insert_meeting(&meeting).await.unwrap();
        (store, meeting)
    }

    fn remote(event_id: &str, title: &str, start: chrono::DateTime<Utc>, duration: i64) -> RemoteCalendarEvent {
        RemoteCalendarEvent {
            id: event_id.to_string(),
            title: title.to_string(),
            start_time: start,
            duration,
            meeting_url: None,
        }
    }

    #[test]
    fn seconds_durations_normalize_to_minutes() {
        assert_eq!(normalize_duration(5400), 90);
        assert_eq!(normalize_duration(90), 90);
        assert_eq!(normalize_duration(1440), 1440);
        assert_eq!(normalize_duration(1441), 24);
    }

    #[tokio::test]
    async fn no_drift_is_a_noop_with_touch() {
        let (store, meeting) = store_with_meeting("ev-1", "user-1").await;
        // 59 seconds of start jitter and a seconds-denominated duration that
        // normalizes to the stored 90 minutes: no change.
        let event = remote(
            "ev-1",
            "Planning",
            meeting.scheduled_start + Duration::seconds(59),
            5400,
        );
        let changed = reconcile(&store, &event, "user-1", ChangeSource::Sweep)
            .await
            .unwrap();
        assert!(!changed);
        assert!(store.list_audit_for_meeting(&meeting.id).await.unwrap().is_empty());

        let fresh = store
            .find_by_calendar_event_and_owner("ev-1", "user-1")
            .await
            .unwrap()
            .unwrap();
        assert!(fresh.last_synced_at.is_some(), "housekeeping timestamp advances");
    }

    #[tokio::test]
    async fn drift_applies_all_fields_and_audits_once() {
        let (store, meeting) = store_with_meeting("ev-1", "user-1").await;
        let new_start = meeting.scheduled_start + Duration::seconds(300);
        let event = remote("ev-1", "Planning v2", new_start, 3600);

        let changed = reconcile(&store, &event, "user-1", ChangeSource::Webhook)
            .await
            .unwrap();
        assert!(changed);

        let fresh = store
            .find_by_calendar_event_and_owner("ev-1", "user-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fresh.title, "Planning v2");
        assert_eq!(fresh.scheduled_start, new_start);
        assert_eq!(fresh.duration_minutes, 60);

        let audit = store.list_audit_for_meeting(&meeting.id).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].source, ChangeSource::Webhook);
        let fields: Vec<&str> = audit[0].changes.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["title", "scheduled_start", "duration_minutes"]);
    }

    #[tokio::test]
    async fn back_to_back_sweeps_audit_only_once() {
        let (store, meeting) = store_with_meeting("ev-1", "user-1").await;
        let event = remote(
            "ev-1",
            "Renamed",
            meeting.scheduled_start,
            meeting.duration_minutes,
        );

        assert!(reconcile(&store, &event, "user-1", ChangeSource::Sweep).await.unwrap());
        // Second sweep with unchanged remote truth: zero new audit rows, but
        // the last-synced marker still moves.
        assert!(!reconcile(&store, &event, "user-1", ChangeSource::Sweep).await.unwrap());

        let audit = store.list_audit_for_meeting(&meeting.id).await.unwrap();
        assert_eq!(audit.len(), 1);
    }

    #[tokio::test]
    async fn unmatched_or_cross_tenant_events_are_noops() {
        let (store, _meeting) = store_with_meeting("ev-1", "user-1").await;
        let event = remote("ev-1", "Other tenant", Utc::now(), 30);
        let changed = reconcile(&store, &event, "user-2", ChangeSource::Sweep)
            .await
            .unwrap();
        assert!(!changed);

        let missing = remote("ev-unknown", "Nobody", Utc::now(), 30);
        assert!(!reconcile(&store, &missing, "user-1", ChangeSource::Sweep).await.unwrap());
    }

    #[tokio::test]
    async fn batch_continues_past_malformed_events() {
        let store = SqliteStore::in_memory().unwrap();
        let mut events = Vec::new();
        for i in 0..4 {
            let mut meeting = MeetingRecord::new("user-1", &format!("Meeting {i}"), Utc::now());
            meeting.calendar_event_id = Some(format!("ev-{i}"));
            store.insert_meeting(&meeting).await.unwrap();
            events.push(remote(
                &format!("ev-{i}"),
                &format!("Meeting {i} renamed"),
                meeting.scheduled_start,
                meeting.duration_minutes,
            ));
        }
        // Malformed event in the middle of the batch.
        events.insert(2, remote("", "Broken", Utc::now(), 30));

        let changed = reconcile_all(&store, &events, "user-1", ChangeSource::Sweep).await;
        assert_eq!(changed, 4);
    }
}
