use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Internal lifecycle state of the recording bot attached to a meeting.
///
/// Provider status codes map onto these via `lifecycle::map_provider_code`.
/// `Unknown` is a real state, not an error: the upstream adds codes without
/// notice and an unrecognized one must never bounce a webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    Joining,
    WaitingRoom,
    InCall,
    Recording,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Unknown,
}

impl MeetingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MeetingStatus::Joining => "joining",
            MeetingStatus::WaitingRoom => "waiting_room",
            MeetingStatus::InCall => "in_call",
            MeetingStatus::Recording => "recording",
            MeetingStatus::Paused => "paused",
            MeetingStatus::Completed => "completed",
            MeetingStatus::Failed => "failed",
            MeetingStatus::Cancelled => "cancelled",
            MeetingStatus::Unknown => "unknown",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "joining" => Some(MeetingStatus::Joining),
            "waiting_room" => Some(MeetingStatus::WaitingRoom),
            "in_call" => Some(MeetingStatus::InCall),
            "recording" => Some(MeetingStatus::Recording),
            "paused" => Some(MeetingStatus::Paused),
            "completed" => Some(MeetingStatus::Completed),
            "failed" => Some(MeetingStatus::Failed),
            "cancelled" => Some(MeetingStatus::Cancelled),
            "unknown" => Some(MeetingStatus::Unknown),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MeetingStatus::Completed | MeetingStatus::Failed | MeetingStatus::Cancelled
        )
    }
}

/// Post-recording pipeline state, independent of the bot lifecycle.
/// May only regress through an explicit retry action, never through events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ProcessingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ProcessingStatus::Pending),
            "processing" => Some(ProcessingStatus::Processing),
            "completed" => Some(ProcessingStatus::Completed),
            "failed" => Some(ProcessingStatus::Failed),
            "cancelled" => Some(ProcessingStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessingStatus::Completed | ProcessingStatus::Failed | ProcessingStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarProvider {
    Google,
    Outlook,
}

impl CalendarProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            CalendarProvider::Google => "google",
            CalendarProvider::Outlook => "outlook",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "google" => Some(CalendarProvider::Google),
            "outlook" => Some(CalendarProvider::Outlook),
            _ => None,
        }
    }
}

/// Whether a calendar drift was detected by an inbound webhook or by a
/// scheduled reconciliation sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    Webhook,
    Sweep,
}

impl ChangeSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeSource::Webhook => "webhook",
            ChangeSource::Sweep => "sweep",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "webhook" => Some(ChangeSource::Webhook),
            "sweep" => Some(ChangeSource::Sweep),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptWord {
    pub word: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub speaker: String,
    #[serde(default)]
    pub words: Vec<TranscriptWord>,
}

/// Flatten transcript segments into the plain text handed to the summarizer.
pub fn transcript_text(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|seg| {
            let words: Vec<&str> = seg.words.iter().map(|w| w.word.as_str()).collect();
            format!("{}: {}", seg.speaker, words.join(" "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingSummary {
    pub summary: String,
    #[serde(default)]
    pub wins: Vec<String>,
    #[serde(default)]
    pub support_areas: Vec<String>,
}

/// One recording/transcription job tied to at most one external bot session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub external_bot_id: Option<String>,
    pub status: Option<MeetingStatus>,
    pub processing_status: ProcessingStatus,
    pub scheduled_start: DateTime<Utc>,
    pub duration_minutes: i64,
    pub meeting_url: Option<String>,
    pub recording_url: Option<String>,
    pub transcript: Option<Vec<TranscriptSegment>>,
    pub summary: Option<MeetingSummary>,
    pub calendar_event_id: Option<String>,
    pub failure_reason: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MeetingRecord {
    /// A freshly requested recording with nothing reported by the provider yet.
    pub fn new(user_id: &str, title: &str, scheduled_start: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            external_bot_id: None,
            status: None,
            processing_status: ProcessingStatus::Pending,
            scheduled_start,
            duration_minutes: 30,
            meeting_url: None,
            recording_url: None,
            transcript: None,
            summary: None,
            calendar_event_id: None,
            failure_reason: None,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied to one MeetingRecord. Only `Some` fields are
/// written; `clear_external_bot_id` exists because unlinking a bot is a
/// distinct operation from leaving the linkage untouched.
#[derive(Debug, Clone, Default)]
pub struct MeetingPatch {
    pub title: Option<String>,
    pub status: Option<MeetingStatus>,
    pub processing_status: Option<ProcessingStatus>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    pub external_bot_id: Option<String>,
    pub clear_external_bot_id: bool,
    pub recording_url: Option<String>,
    pub transcript: Option<Vec<TranscriptSegment>>,
    pub summary: Option<MeetingSummary>,
    pub failure_reason: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl MeetingPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.status.is_none()
            && self.processing_status.is_none()
            && self.scheduled_start.is_none()
            && self.duration_minutes.is_none()
            && self.external_bot_id.is_none()
            && !self.clear_external_bot_id
            && self.recording_url.is_none()
            && self.transcript.is_none()
            && self.summary.is_none()
            && self.failure_reason.is_none()
            && self.last_synced_at.is_none()
    }
}

/// One user's link to one external calendar provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarIntegration {
    pub id: String,
    pub user_id: String,
    pub provider: CalendarProvider,
    pub external_calendar_id: String,
    pub active: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Field-level before/after captured when remote calendar truth drifts from
/// the local record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// Immutable drift record. Append-only; pruned by the retention sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeAuditEntry {
    pub id: String,
    pub meeting_id: String,
    pub source: ChangeSource,
    pub external_event_id: String,
    pub changes: Vec<FieldChange>,
    pub created_at: DateTime<Utc>,
}

impl ChangeAuditEntry {
    pub fn new(
        meeting_id: &str,
        source: ChangeSource,
        external_event_id: &str,
        changes: Vec<FieldChange>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            meeting_id: meeting_id.to_string(),
            source,
            external_event_id: external_event_id.to_string(),
            changes,
            created_at: Utc::now(),
        }
    }
}

/// Calendar event as reported by the recording provider's calendar API.
/// `duration` is raw: values above 1440 are seconds and get normalized to
/// minutes before any comparison (`reconciler::normalize_duration`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCalendarEvent {
    pub id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub duration: i64,
    #[serde(default)]
    pub meeting_url: Option<String>,
}

/// Normalized result contract handed back to the boundary layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedResult {
    pub success: bool,
    pub message: String,
    pub processed: bool,
}

impl ProcessedResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            processed: true,
        }
    }

    /// Accepted but nothing to do: unknown kind, or no matching record.
    /// Redelivery of these must not accumulate retries.
    pub fn noop(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            processed: false,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            processed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            MeetingStatus::Joining,
            MeetingStatus::WaitingRoom,
            MeetingStatus::InCall,
            MeetingStatus::Recording,
            MeetingStatus::Paused,
            MeetingStatus::Completed,
            MeetingStatus::Failed,
            MeetingStatus::Cancelled,
            MeetingStatus::Unknown,
        ] {
            assert_eq!(MeetingStatus::from_status(status.as_str()), Some(status));
        }
        assert_eq!(MeetingStatus::from_status("bogus"), None);
    }

    #[test]
    fn terminal_states_are_exactly_three() {
        let terminal: Vec<MeetingStatus> = [
            MeetingStatus::Joining,
            MeetingStatus::WaitingRoom,
            MeetingStatus::InCall,
            MeetingStatus::Recording,
            MeetingStatus::Paused,
            MeetingStatus::Completed,
            MeetingStatus::Failed,
            MeetingStatus::Cancelled,
            MeetingStatus::Unknown,
        ]
        .into_iter()
        .filter(|s| s.is_terminal())
        .collect();
        assert_eq!(
            terminal,
            vec![
                MeetingStatus::Completed,
                MeetingStatus::Failed,
                MeetingStatus::Cancelled
            ]
        );
    }

    #[test]
    fn transcript_text_joins_speaker_words() {
        let segments = vec![TranscriptSegment {
            speaker: "A".to_string(),
            words: vec![
                TranscriptWord {
                    word: "Hi".to_string(),
                },
                TranscriptWord {
                    word: "there".to_string(),
                },
            ],
        }];
        assert_eq!(transcript_text(&segments), "A: Hi there");
    }
}
