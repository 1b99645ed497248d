//! Bot lifecycle state machine.
//!
//! Maps fixed provider status codes to internal `MeetingStatus` values. The
//! mapping is applied unconditionally — the upstream delivers at-least-once
//! and not strictly ordered, so a "backward" move (recording → waiting room)
//! is accepted rather than rejected. What IS protected is terminal-state
//! integrity: once a record is completed/failed/cancelled, later events update
//! display status only and must never resurrect downstream processing.

use crate::core::types::MeetingStatus;

/// Provider codes that all collapse into the internal `Failed` state.
pub const FAILURE_CODES: &[&str] = &[
    "bot_rejected",
    "bot_removed",
    "waiting_room_timeout",
    "invalid_meeting_url",
    "meeting_error",
];

/// Outcome of applying one provider status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: MeetingStatus,
    /// The record was already in a terminal state before this event. Callers
    /// update the display status but skip every processing side effect.
    pub was_terminal: bool,
    pub failure_reason: Option<&'static str>,
}

/// Fixed lookup table from provider status codes to internal states.
/// Unrecognized codes map to `Unknown` — never an error.
pub fn map_provider_code(code: &str) -> MeetingStatus {
    match code {
        "joining_call" => MeetingStatus::Joining,
        "in_waiting_room" => MeetingStatus::WaitingRoom,
        "in_call_not_recording" => MeetingStatus::InCall,
        "in_call_recording" => MeetingStatus::Recording,
        "recording_paused" => MeetingStatus::Paused,
        "recording_resumed" => MeetingStatus::Recording,
        "call_ended" | "done" => MeetingStatus::Completed,
        "bot_rejected" | "bot_removed" | "waiting_room_timeout" | "invalid_meeting_url"
        | "meeting_error" => MeetingStatus::Failed,
        _ => MeetingStatus::Unknown,
    }
}

/// Human-readable reason recorded when a code from the collapsed failure
/// branch arrives.
pub fn failure_reason(code: &str) -> Option<&'static str> {
    match code {
        "bot_rejected" => Some("Bot was rejected from the meeting"),
        "bot_removed" => Some("Bot was removed from the call"),
        "waiting_room_timeout" => Some("Bot timed out in the waiting room"),
        "invalid_meeting_url" => Some("Meeting URL was invalid or unreachable"),
        "meeting_error" => Some("Provider reported a meeting error"),
        _ => None,
    }
}

/// Apply one incoming provider code against the current status.
///
/// `current = None` means the bot has not reported anything yet.
pub fn transition(current: Option<MeetingStatus>, code: &str) -> Transition {
    let next = map_provider_code(code);
    Transition {
        next,
        was_terminal: current.map(MeetingStatus::is_terminal).unwrap_or(false),
        failure_reason: failure_reason(code),
    }
}
