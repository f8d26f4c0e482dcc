//! Server-side plausibility checks on a submission payload.
//!
//! Runs before a submission may enter the queue. A rejection is returned to
//! the caller so it can switch to the slower full-evaluation path.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::SealedSubmission;

/// Submissions faster than this are rejected outright.
pub const MIN_TIME_TAKEN_SECS: u64 = 10;
/// Submissions faster than this are accepted but flagged.
pub const FLAG_TIME_TAKEN_SECS: u64 = 30;
/// Lowest plausible score as a fraction of total marks.
pub const MIN_SCORE_RATIO: f64 = -0.5;
/// Highest plausible score as a fraction of total marks.
pub const MAX_SCORE_RATIO: f64 = 1.1;

/// Reason a valid submission deserves a second look.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationFlag {
    /// Completed in under thirty seconds.
    FastCompletion,
}

/// Outcome of a successful validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub flags: Vec<ValidationFlag>,
}

impl ValidationReport {
    pub fn is_flagged(&self) -> bool {
        !self.flags.is_empty()
    }
}

fn require(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(())
}

/// Check required fields, score bounds and completion time.
pub fn validate_submission(sub: &SealedSubmission) -> Result<ValidationReport, ValidationError> {
    require(&sub.exam_id, "examId")?;
    require(&sub.student_id, "studentId")?;
    require(&sub.integrity_hash, "integrityHash")?;

    if !sub.final_score.is_finite() {
        return Err(ValidationError::InvalidField {
            field: "finalScore",
            reason: "not a finite number".into(),
        });
    }
    if !sub.total_marks.is_finite() || sub.total_marks <= 0.0 {
        return Err(ValidationError::InvalidField {
            field: "totalMarks",
            reason: format!("must be positive, got {}", sub.total_marks),
        });
    }

    let min = MIN_SCORE_RATIO * sub.total_marks;
    let max = MAX_SCORE_RATIO * sub.total_marks;
    if sub.final_score < min || sub.final_score > max {
        return Err(ValidationError::ScoreOutOfBounds {
            score: sub.final_score,
            min,
            max,
        });
    }

    if sub.time_taken < MIN_TIME_TAKEN_SECS {
        return Err(ValidationError::TimeTooShort(sub.time_taken));
    }

    let mut report = ValidationReport::default();
    if sub.time_taken < FLAG_TIME_TAKEN_SECS {
        tracing::warn!(
            exam_id = %sub.exam_id,
            student_id = %sub.student_id,
            time_taken = sub.time_taken,
            "submission completed suspiciously fast"
        );
        report.flags.push(ValidationFlag::FastCompletion);
    }
    Ok(report)
}
