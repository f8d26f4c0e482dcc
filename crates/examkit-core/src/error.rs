//! Error taxonomy for the scoring and submission path.
//!
//! Callers branch on these variants to pick a fallback: validation and
//! integrity failures degrade to a slower, always-correct path rather than
//! failing the user-visible operation.

use thiserror::Error;

use crate::model::QuestionType;

/// Errors raised by the progressive scoring engine and its worker.
#[derive(Debug, Error)]
pub enum ScoringError {
    /// The marking scheme cannot be scored (empty, duplicate ids, bad key).
    #[error("invalid marking scheme: {0}")]
    InvalidScheme(String),

    /// The answer refers to a question the scheme does not contain.
    #[error("unknown question: {0}")]
    UnknownQuestion(String),

    /// The answer's shape does not fit the question type.
    #[error("answer for {question_id} does not fit a {expected} question")]
    AnswerShape {
        question_id: String,
        expected: QuestionType,
    },

    /// The isolated scoring task did not answer finalize in time.
    #[error("finalize timed out after {0}ms")]
    FinalizeTimeout(u64),

    /// The isolated scoring task has shut down.
    #[error("scoring worker is not running")]
    WorkerClosed,
}

/// Server-side rejection of a submission payload before it enters the queue.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("score {score} outside plausible range [{min}, {max}]")]
    ScoreOutOfBounds { score: f64, min: f64, max: f64 },

    #[error("time taken {0}s is implausibly short")]
    TimeTooShort(u64),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// A recomputed integrity hash did not match the submitted one.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegrityError {
    #[error("integrity hash is not valid hex")]
    Malformed,

    #[error("integrity hash mismatch")]
    Mismatch,
}

/// Errors surfaced by the attempts read cache.
///
/// `Clone` because one fetch result is shared by every coalesced caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttemptsError {
    #[error("attempts fetch failed: {0}")]
    Fetch(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_descriptive() {
        let err = ScoringError::AnswerShape {
            question_id: "q1".into(),
            expected: QuestionType::Numerical,
        };
        assert_eq!(
            err.to_string(),
            "answer for q1 does not fit a numerical question"
        );
        assert_eq!(
            ScoringError::FinalizeTimeout(250).to_string(),
            "finalize timed out after 250ms"
        );
        let err = ValidationError::ScoreOutOfBounds {
            score: 500.0,
            min: -50.0,
            max: 110.0,
        };
        assert!(err.to_string().contains("500"));
    }
}
