//! Event dispatcher: decodes inbound webhook payloads, enforces idempotency,
//! routes by event kind, and wraps everything in the bounded retry loop.
//!
//! Two webhook vocabularies exist in the wild for this provider
//! (`bot.status_change`/`complete`/`failed` and
//! `bot_join_call`/`recording_ready`/`transcript_ready`); both are accepted
//! under one discriminator here so either generation of the upstream can
//! deliver to the same endpoint.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::core::error::EngineError;
use crate::core::idempotency::IdempotencyLedger;
use crate::core::lifecycle;
use crate::core::provider::{RecorderProvider, TranscriptSummarizer};
use crate::core::reconciler;
use crate::core::store::MeetingStore;
use crate::core::types::{
    ChangeSource, MeetingPatch, MeetingStatus, ProcessedResult, ProcessingStatus,
    TranscriptSegment, transcript_text,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    StatusChange,
    Complete,
    Failed,
    CalendarSync,
    Unknown,
}

impl EventKind {
    /// One discriminator for both observed vocabularies.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "bot.status_change" | "bot_join_call" => EventKind::StatusChange,
            "complete" | "recording_ready" | "transcript_ready" => EventKind::Complete,
            "failed" => EventKind::Failed,
            "calendar.sync_events" | "calendar_sync" => EventKind::CalendarSync,
            _ => EventKind::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::StatusChange => "status_change",
            EventKind::Complete => "complete",
            EventKind::Failed => "failed",
            EventKind::CalendarSync => "calendar_sync",
            EventKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(alias = "type")]
    pub event: String,
    #[serde(default)]
    pub data: EventData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub status: Option<StatusPayload>,
    #[serde(default, alias = "recording")]
    pub recording_url: Option<String>,
    #[serde(default)]
    pub transcript: Option<Vec<TranscriptSegment>>,
    #[serde(default)]
    pub speakers: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub calendar_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub event_ids: Vec<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusPayload {
    pub code: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn MeetingStore>,
    provider: Arc<dyn RecorderProvider>,
    summarizer: Arc<dyn TranscriptSummarizer>,
    ledger: Arc<IdempotencyLedger>,
    webhook_secret: Option<String>,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn MeetingStore>,
        provider: Arc<dyn RecorderProvider>,
        summarizer: Arc<dyn TranscriptSummarizer>,
        ledger: Arc<IdempotencyLedger>,
        webhook_secret: Option<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            provider,
            summarizer,
            ledger,
            webhook_secret,
            retry,
        }
    }

    /// Process one raw webhook delivery exactly-once-effectively.
    ///
    /// `Err(Client)` means the payload itself is bad and must not be retried;
    /// `Err(Transient)` means the attempt may be repeated.
    pub async fn handle(
        &self,
        raw: &str,
        signature: Option<&str>,
    ) -> Result<ProcessedResult, EngineError> {
        if let Some(secret) = &self.webhook_secret {
            let sig = signature
                .ok_or_else(|| EngineError::client("missing webhook signature header"))?;
            if !verify_signature(raw, sig, secret) {
                return Err(EngineError::client("webhook signature verification failed"));
            }
        }

        let envelope: WebhookEnvelope = serde_json::from_str(raw)
            .map_err(|e| EngineError::client(format!("invalid event payload: {e}")))?;
        let kind = EventKind::parse(&envelope.event);

        if kind == EventKind::Unknown {
            info!("Ignoring unrecognized event kind '{}'", envelope.event);
            return Ok(ProcessedResult::noop(format!(
                "unrecognized event kind '{}'",
                envelope.event
            )));
        }

        let correlation = match kind {
            EventKind::CalendarSync => envelope.data.calendar_id.clone(),
            _ => envelope.data.bot_id.clone(),
        }
        .ok_or_else(|| EngineError::client("event is missing its bot/calendar identifier"))?;

        // Without a timestamp two distinct events would collapse to the same
        // fingerprint, so only timestamped deliveries go through the ledger.
        // Untimestamped ones are still safe to replay: every write is a set.
        let fingerprint = envelope
            .data
            .timestamp
            .or_else(|| envelope.data.status.as_ref().and_then(|s| s.created_at))
            .map(|t| {
                IdempotencyLedger::fingerprint(kind.as_str(), &correlation, &t.to_rfc3339())
            });
        if let Some(fp) = &fingerprint {
            if let Some(cached) = self.ledger.lookup(fp) {
                debug!("Duplicate delivery of {fp}, returning cached outcome");
                return Ok(cached);
            }
        }

        let outcome = match kind {
            EventKind::StatusChange => {
                self.handle_status_change(&correlation, &envelope.data).await?
            }
            EventKind::Complete => self.handle_completion(&correlation, &envelope.data).await?,
            EventKind::Failed => self.handle_failure(&correlation, &envelope.data).await?,
            EventKind::CalendarSync => {
                self.handle_calendar_sync(&correlation, &envelope.data).await?
            }
            EventKind::Unknown => unreachable!("unknown kinds return early"),
        };

        if let Some(fp) = fingerprint {
            self.ledger.record(fp, outcome.clone());
        }
        Ok(outcome)
    }

    /// Bounded retry on transient failures only; exponential backoff
    /// `base_delay * 2^(attempt-1)`.
    pub async fn process_with_retry(
        &self,
        raw: &str,
        signature: Option<&str>,
    ) -> Result<ProcessedResult, EngineError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt: u32 = 1;
        loop {
            match self.handle(raw, signature).await {
                Ok(result) => return Ok(result),
                Err(err @ EngineError::Client(_)) => return Err(err),
                Err(EngineError::Transient(msg)) => {
                    if attempt >= max_attempts {
                        return Err(EngineError::transient(format!(
                            "giving up after {attempt} attempts: {msg}"
                        )));
                    }
                    let delay = self.retry.base_delay * 2u32.pow(attempt - 1);
                    warn!(
                        "Transient failure on attempt {attempt}/{max_attempts}, retrying in {delay:?}: {msg}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn handle_status_change(
        &self,
        bot_id: &str,
        data: &EventData,
    ) -> Result<ProcessedResult, EngineError> {
        let code = data
            .status
            .as_ref()
            .map(|s| s.code.as_str())
            .ok_or_else(|| EngineError::client("status_change event is missing a status code"))?;

        let Some(meeting) = self.store.find_by_external_bot_id(bot_id).await? else {
            return Ok(ProcessedResult::noop(format!(
                "no meeting record for bot {bot_id}"
            )));
        };

        let transition = lifecycle::transition(meeting.status, code);
        if transition.next == MeetingStatus::Recording && !transition.was_terminal {
            info!("Recording started for meeting {}", meeting.id);
        }

        let mut patch = MeetingPatch {
            status: Some(transition.next),
            ..Default::default()
        };
        // Terminal records only get their display status refreshed; the
        // processing pipeline is never resurrected by a late event.
        if !transition.was_terminal && transition.next == MeetingStatus::Failed {
            patch.processing_status = Some(ProcessingStatus::Failed);
            patch.failure_reason = transition.failure_reason.map(str::to_string);
        }
        self.store.update_meeting(&meeting.id, &patch).await?;

        Ok(ProcessedResult::ok(format!(
            "bot {bot_id} status -> {}",
            transition.next.as_str()
        )))
    }

    async fn handle_completion(
        &self,
        bot_id: &str,
        data: &EventData,
    ) -> Result<ProcessedResult, EngineError> {
        let Some(meeting) = self.store.find_by_external_bot_id(bot_id).await? else {
            return Ok(ProcessedResult::noop(format!(
                "no meeting record for bot {bot_id}"
            )));
        };

        // Gate on the processing pipeline, not the lifecycle status: the
        // provider routinely delivers call_ended before the completion event
        // that carries the artifacts, so a terminal display status is the
        // NORMAL precondition here. Only a pipeline that already ran (or is
        // running) makes this a redelivery.
        let already_finalized = meeting.processing_status.is_terminal()
            || meeting.processing_status == ProcessingStatus::Processing;

        let mut patch = MeetingPatch {
            status: Some(MeetingStatus::Completed),
            ..Default::default()
        };
        if let Some(url) = &data.recording_url {
            patch.recording_url = Some(url.clone());
        }
        let transcript = data.transcript.clone().unwrap_or_default();
        if !transcript.is_empty() {
            patch.transcript = Some(transcript.clone());
        }

        if already_finalized {
            // Redelivery or out-of-order completion: refresh display fields,
            // do not re-run the transcript pipeline.
            self.store.update_meeting(&meeting.id, &patch).await?;
            return Ok(ProcessedResult::ok(format!(
                "meeting {} already finalized",
                meeting.id
            )));
        }

        if transcript.is_empty() {
            patch.processing_status = Some(ProcessingStatus::Completed);
            self.store.update_meeting(&meeting.id, &patch).await?;
            return Ok(ProcessedResult::ok(format!(
                "meeting {} completed without transcript",
                meeting.id
            )));
        }

        patch.processing_status = Some(ProcessingStatus::Processing);
        self.store.update_meeting(&meeting.id, &patch).await?;

        // Fire and forget: the webhook response never waits on the
        // summarizer, and a summarizer failure never fails the event.
        let store = self.store.clone();
        let summarizer = self.summarizer.clone();
        let meeting_id = meeting.id.clone();
        let text = transcript_text(&transcript);
        tokio::spawn(async move {
            finalize_summary(store, summarizer, &meeting_id, &text).await;
        });

        Ok(ProcessedResult::ok(format!(
            "meeting {} completed ({} speakers), summarization enqueued",
            meeting.id,
            data.speakers.len().max(transcript.len())
        )))
    }

    async fn handle_failure(
        &self,
        bot_id: &str,
        data: &EventData,
    ) -> Result<ProcessedResult, EngineError> {
        let Some(meeting) = self.store.find_by_external_bot_id(bot_id).await? else {
            return Ok(ProcessedResult::noop(format!(
                "no meeting record for bot {bot_id}"
            )));
        };

        let reason = data
            .error
            .clone()
            .or_else(|| {
                data.status
                    .as_ref()
                    .and_then(|s| lifecycle::failure_reason(&s.code))
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "provider reported failure".to_string());

        let was_terminal = meeting.status.map(MeetingStatus::is_terminal).unwrap_or(false);
        let mut patch = MeetingPatch {
            status: Some(MeetingStatus::Failed),
            ..Default::default()
        };
        if !was_terminal {
            patch.processing_status = Some(ProcessingStatus::Failed);
            patch.failure_reason = Some(reason.clone());
        }
        self.store.update_meeting(&meeting.id, &patch).await?;

        Ok(ProcessedResult::ok(format!(
            "meeting {} marked failed: {reason}",
            meeting.id
        )))
    }

    /// Reconcile each affected event id independently; one bad event must
    /// not abort the rest of the batch.
    async fn handle_calendar_sync(
        &self,
        calendar_id: &str,
        data: &EventData,
    ) -> Result<ProcessedResult, EngineError> {
        let owner = data
            .user_id
            .as_deref()
            .ok_or_else(|| EngineError::client("calendar sync event is missing its owner"))?;

        let mut changed = 0usize;
        let mut failed = 0usize;
        for event_id in &data.event_ids {
            match self.provider.get_event(event_id).await {
                Ok(remote) => {
                    match reconciler::reconcile(
                        self.store.as_ref(),
                        &remote,
                        owner,
                        ChangeSource::Webhook,
                    )
                    .await
                    {
                        Ok(true) => changed += 1,
                        Ok(false) => {}
                        Err(e) => {
                            warn!("Reconcile failed for calendar event {event_id}: {e:#}");
                            failed += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!("Fetch failed for calendar event {event_id}: {e:#}");
                    failed += 1;
                }
            }
        }

        Ok(ProcessedResult::ok(format!(
            "calendar {calendar_id}: {changed} changed, {failed} failed of {} events",
            data.event_ids.len()
        )))
    }
}

/// Advance processing to `completed` once summarization finishes — or fails.
/// A summarizer outage must never leave a meeting stuck in `processing`.
pub(crate) async fn finalize_summary(
    store: Arc<dyn MeetingStore>,
    summarizer: Arc<dyn TranscriptSummarizer>,
    meeting_id: &str,
    transcript_text: &str,
) {
    let mut patch = MeetingPatch {
        processing_status: Some(ProcessingStatus::Completed),
        ..Default::default()
    };
    match summarizer.summarize(transcript_text).await {
        Ok(summary) => patch.summary = Some(summary),
        Err(e) => warn!("Summarization failed for meeting {meeting_id}: {e:#}"),
    }
    if let Err(e) = store.update_meeting(meeting_id, &patch).await {
        tracing::error!("Failed to finalize meeting {meeting_id}: {e:#}");
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Raw HMAC-SHA256 hex over the body, with or without a `sha256=` prefix.
/// Constant-time comparison; fail closed on anything malformed.
pub fn verify_signature(body: &str, signature: &str, secret: &str) -> bool {
    let hex_sig = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(hex_sig.as_bytes(), expected.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
