use thiserror::Error;

use crate::protocol::ErrorCode;

/// Errors from timer operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimerError {
    #[error("timer not found: {0}")]
    NotFound(String),

    #[error("timer already exists: {0}")]
    Exists(String),

    #[error("timer has already ended: {0}")]
    Ended(String),

    #[error("invalid timer config: {0}")]
    InvalidConfig(String),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("timer service is not running")]
    ServiceClosed,
}

impl TimerError {
    /// Wire code reported across the message boundary.
    pub fn code(&self) -> ErrorCode {
        match self {
            TimerError::NotFound(_) => ErrorCode::TimerNotFound,
            TimerError::Exists(_) => ErrorCode::TimerExists,
            TimerError::UnknownMessageType(_) => ErrorCode::UnknownMessageType,
            TimerError::Ended(_)
            | TimerError::InvalidConfig(_)
            | TimerError::Malformed(_)
            | TimerError::UnexpectedResponse(_)
            | TimerError::ServiceClosed => ErrorCode::HandlerError,
        }
    }
}
