use thiserror::Error;

use examkit_core::error::{IntegrityError, ValidationError};

use crate::model::SubmissionStatus;

/// Failure writing a submission to the downstream store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistError {
    /// Worth retrying: connection dropped, pool exhausted, lock timeout.
    #[error("transient persistence failure: {0}")]
    Transient(String),

    /// Retrying cannot help: constraint violation, permission denied.
    #[error("permanent persistence failure: {0}")]
    Permanent(String),
}

impl PersistError {
    /// Whether retrying this write is pointless.
    pub fn is_permanent(&self) -> bool {
        matches!(self, PersistError::Permanent(_))
    }
}

impl From<std::io::Error> for PersistError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::InvalidInput => {
                PersistError::Permanent(e.to_string())
            }
            _ => PersistError::Transient(e.to_string()),
        }
    }
}

/// Errors returned by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Rejected before entering the queue; the caller should use the slow path.
    #[error("submission rejected: {0}")]
    Validation(#[from] ValidationError),

    /// Hash mismatch with no marking scheme to re-evaluate against.
    #[error("submission rejected: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("submission not found: {0}")]
    NotFound(String),

    #[error("submission {id} is {status}, expected {expected}")]
    InvalidState {
        id: String,
        status: SubmissionStatus,
        expected: SubmissionStatus,
    },

    #[error("queue is shut down")]
    ShutDown,

    #[error("journal error: {0}")]
    Journal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_classified() {
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(PersistError::from(denied).is_permanent());
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(!PersistError::from(reset).is_permanent());
    }

    #[test]
    fn invalid_state_message() {
        let err = QueueError::InvalidState {
            id: "e:s:ab".into(),
            status: SubmissionStatus::Completed,
            expected: SubmissionStatus::Failed,
        };
        assert_eq!(err.to_string(), "submission e:s:ab is completed, expected failed");
    }
}
