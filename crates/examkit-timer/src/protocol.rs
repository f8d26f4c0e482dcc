//! Message protocol spoken across the timer service boundary.
//!
//! Requests and responses are internally tagged by `type`, with camelCase
//! fields, so the JSON form is `{"type":"start_timer","timerId":"t1"}`.

use serde::{Deserialize, Serialize};

use crate::error::TimerError;
use crate::timer::{TimerConfig, TimerConfigPatch, TimerStatus};

/// A request to the timer registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TimerRequest {
    CreateTimer { timer_id: String, config: TimerConfig },
    StartTimer { timer_id: String },
    PauseTimer { timer_id: String },
    ResumeTimer { timer_id: String },
    StopTimer { timer_id: String },
    GetTimerStatus { timer_id: String },
    GetAllTimers,
    UpdateConfig { timer_id: String, config: TimerConfigPatch },
    ClearAllTimers,
}

/// Every `type` tag [`TimerRequest`] accepts.
pub const REQUEST_TYPES: &[&str] = &[
    "create_timer",
    "start_timer",
    "pause_timer",
    "resume_timer",
    "stop_timer",
    "get_timer_status",
    "get_all_timers",
    "update_config",
    "clear_all_timers",
];

/// Reply to a [`TimerRequest`].
///
/// `changed` is false when the operation was a no-op (pausing a paused
/// timer, stopping a stopped one).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TimerResponse {
    TimerCreated { timer_id: String },
    TimerStarted { timer_id: String, changed: bool },
    TimerPaused { timer_id: String, changed: bool },
    TimerResumed { timer_id: String, changed: bool },
    TimerStopped { timer_id: String, changed: bool },
    TimerStatus { status: TimerStatus },
    AllTimers { timers: Vec<TimerStatus> },
    ConfigUpdated { timer_id: String, status: TimerStatus },
    TimersCleared { count: usize },
    Error { code: ErrorCode, message: String },
}

impl From<TimerError> for TimerResponse {
    fn from(e: TimerError) -> Self {
        TimerResponse::Error {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

/// Error codes reported in [`TimerResponse::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    TimerNotFound,
    TimerExists,
    HandlerError,
    UnknownMessageType,
}

/// Decode a JSON request, classifying failures the way the wire expects.
///
/// An unrecognised `type` is `UNKNOWN_MESSAGE_TYPE`; anything else that
/// fails to decode is a malformed payload.
pub fn decode_request(raw: &str) -> Result<TimerRequest, TimerError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| TimerError::Malformed(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| TimerError::Malformed("missing \"type\" field".into()))?;
    if !REQUEST_TYPES.contains(&kind) {
        return Err(TimerError::UnknownMessageType(kind.to_string()));
    }

    serde_json::from_value(value).map_err(|e| TimerError::Malformed(e.to_string()))
}
