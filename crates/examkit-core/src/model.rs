//! Core data model types for examkit.
//!
//! These are the types every stage of the pipeline passes around: the marking
//! scheme an exam is scored against, the answers a student gives, the running
//! evaluation snapshot, and the sealed submission produced at finalize.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of question, which decides how an answer is compared with the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    /// Exactly one option is correct.
    SingleChoice,
    /// A set of options is correct; the answer must match the set exactly.
    MultipleChoice,
    /// A numeric value compared within a tolerance.
    Numerical,
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionType::SingleChoice => write!(f, "single_choice"),
            QuestionType::MultipleChoice => write!(f, "multiple_choice"),
            QuestionType::Numerical => write!(f, "numerical"),
        }
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" | "single_choice" | "mcq" => Ok(QuestionType::SingleChoice),
            "multiple" | "multiple_choice" | "msq" => Ok(QuestionType::MultipleChoice),
            "numerical" | "numeric" | "nat" => Ok(QuestionType::Numerical),
            other => Err(format!("unknown question type: {other}")),
        }
    }
}

/// The correct answer for a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerKey {
    Single { option: String },
    Multiple { options: BTreeSet<String> },
    Numeric { value: f64 },
}

impl AnswerKey {
    /// The question type this key shape belongs to.
    pub fn question_type(&self) -> QuestionType {
        match self {
            AnswerKey::Single { .. } => QuestionType::SingleChoice,
            AnswerKey::Multiple { .. } => QuestionType::MultipleChoice,
            AnswerKey::Numeric { .. } => QuestionType::Numerical,
        }
    }
}

/// Scoring rules for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionScheme {
    pub question_id: String,
    pub positive_marks: f64,
    /// Marks deducted for a wrong answer, stored as a non-negative number.
    pub negative_marks: f64,
    pub question_type: QuestionType,
    pub key: AnswerKey,
}

/// Per-question marking rules for a whole exam.
///
/// Immutable for the duration of an exam session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkingScheme {
    pub exam_id: String,
    pub questions: Vec<QuestionScheme>,
}

impl MarkingScheme {
    /// Maximum achievable score.
    pub fn total_marks(&self) -> f64 {
        self.questions.iter().map(|q| q.positive_marks).sum()
    }

    pub fn question(&self, question_id: &str) -> Option<&QuestionScheme> {
        self.questions.iter().find(|q| q.question_id == question_id)
    }
}

/// Exam metadata plus the marking scheme, as handed to the scoring engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamData {
    pub exam_id: String,
    pub title: String,
    pub student_id: String,
    /// Exam length in milliseconds.
    pub duration_ms: u64,
    pub scheme: MarkingScheme,
}

/// A student's answer to a question.
///
/// Serialized untagged so the wire form is a bare string, array or number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Choice(String),
    Choices(Vec<String>),
    Numeric(f64),
}

impl Answer {
    /// Whether the answer carries no selection at all.
    pub fn is_blank(&self) -> bool {
        match self {
            Answer::Choice(s) => s.trim().is_empty(),
            Answer::Choices(v) => v.iter().all(|s| s.trim().is_empty()),
            Answer::Numeric(n) => !n.is_finite(),
        }
    }
}

/// Classification of a single question's current answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Correct,
    Incorrect,
    Unattempted,
}

/// A question's contribution to the running score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub outcome: Outcome,
    pub marks: f64,
}

impl Contribution {
    pub const UNATTEMPTED: Contribution = Contribution {
        outcome: Outcome::Unattempted,
        marks: 0.0,
    };
}

/// Running evaluation state for one exam session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSnapshot {
    pub answers: BTreeMap<String, Answer>,
    pub running_score: f64,
    pub total_marks: f64,
    pub percentage: f64,
    pub correct: u32,
    pub incorrect: u32,
    pub unattempted: u32,
    pub last_updated_at: DateTime<Utc>,
}

/// Result of a full scoring pass over a set of answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub score: f64,
    pub total_marks: f64,
    pub percentage: f64,
    pub correct: u32,
    pub incorrect: u32,
    pub unattempted: u32,
}

/// Caller-supplied data stamped onto the sealed submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeMetadata {
    /// Seconds spent on the exam; measured from engine start when absent.
    #[serde(default)]
    pub time_taken: Option<u64>,
    /// Completion instant; now when absent.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Immutable, hash-verifiable result of one exam attempt.
///
/// This is also the wire-level submission payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedSubmission {
    pub exam_id: String,
    pub student_id: String,
    pub answers: BTreeMap<String, Answer>,
    pub final_score: f64,
    pub total_marks: f64,
    pub percentage: f64,
    pub correct_answers: u32,
    pub incorrect_answers: u32,
    pub unattempted: u32,
    /// Whole seconds spent on the exam.
    pub time_taken: u64,
    pub completed_at: DateTime<Utc>,
    pub integrity_hash: String,
}

impl SealedSubmission {
    /// Idempotency key used by the submission queue.
    ///
    /// A new attempt seals a new hash and therefore gets a new id.
    pub fn submission_id(&self) -> String {
        let prefix: String = self.integrity_hash.chars().take(16).collect();
        format!("{}:{}:{}", self.exam_id, self.student_id, prefix)
    }
}

/// Read-path summary of a student's attempts at an exam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSummary {
    pub student_id: String,
    pub exam_id: String,
    pub attempted: bool,
    pub attempt_count: u32,
    #[serde(default)]
    pub best_score: Option<f64>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_type_display_and_parse() {
        assert_eq!(QuestionType::SingleChoice.to_string(), "single_choice");
        assert_eq!("mcq".parse::<QuestionType>().unwrap(), QuestionType::SingleChoice);
        assert_eq!(
            "Multiple".parse::<QuestionType>().unwrap(),
            QuestionType::MultipleChoice
        );
        assert_eq!("numeric".parse::<QuestionType>().unwrap(), QuestionType::Numerical);
        assert!("essay".parse::<QuestionType>().is_err());
    }

    #[test]
    fn answers_deserialize_untagged() {
        let single: Answer = serde_json::from_str("\"B\"").unwrap();
        assert_eq!(single, Answer::Choice("B".into()));
        let multi: Answer = serde_json::from_str("[\"A\",\"C\"]").unwrap();
        assert_eq!(multi, Answer::Choices(vec!["A".into(), "C".into()]));
        let num: Answer = serde_json::from_str("9.81").unwrap();
        assert_eq!(num, Answer::Numeric(9.81));
    }

    #[test]
    fn blank_answers() {
        assert!(Answer::Choice("  ".into()).is_blank());
        assert!(Answer::Choices(vec![]).is_blank());
        assert!(!Answer::Numeric(0.0).is_blank());
    }

    #[test]
    fn submission_id_uses_hash_prefix() {
        let sub = SealedSubmission {
            exam_id: "physics".into(),
            student_id: "s-1".into(),
            answers: BTreeMap::new(),
            final_score: 0.0,
            total_marks: 0.0,
            percentage: 0.0,
            correct_answers: 0,
            incorrect_answers: 0,
            unattempted: 0,
            time_taken: 60,
            completed_at: Utc::now(),
            integrity_hash: "0123456789abcdef0123456789abcdef".into(),
        };
        assert_eq!(sub.submission_id(), "physics:s-1:0123456789abcdef");
    }

    #[test]
    fn sealed_submission_wire_names_are_camel_case() {
        let sub = SealedSubmission {
            exam_id: "e".into(),
            student_id: "s".into(),
            answers: BTreeMap::new(),
            final_score: 1.0,
            total_marks: 4.0,
            percentage: 25.0,
            correct_answers: 1,
            incorrect_answers: 0,
            unattempted: 3,
            time_taken: 120,
            completed_at: Utc::now(),
            integrity_hash: "h".into(),
        };
        let json = serde_json::to_value(&sub).unwrap();
        for field in [
            "examId",
            "studentId",
            "finalScore",
            "totalMarks",
            "correctAnswers",
            "incorrectAnswers",
            "timeTaken",
            "completedAt",
            "integrityHash",
        ] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
    }
}
