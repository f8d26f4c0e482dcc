//! TOML exam definition parser.
//!
//! Loads exam files and directories into marking schemes, and validates them.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::model::{AnswerKey, ExamData, MarkingScheme, QuestionScheme, QuestionType};

/// Intermediate TOML structure for exam files.
#[derive(Debug, Deserialize)]
struct TomlExamFile {
    exam: TomlExamHeader,
    #[serde(default)]
    questions: Vec<TomlQuestion>,
}

#[derive(Debug, Deserialize)]
struct TomlExamHeader {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default = "default_duration_secs")]
    duration_secs: u64,
    #[serde(default = "default_positive_marks")]
    positive_marks: f64,
    #[serde(default)]
    negative_marks: f64,
}

fn default_duration_secs() -> u64 {
    3600
}

fn default_positive_marks() -> f64 {
    4.0
}

#[derive(Debug, Deserialize)]
struct TomlQuestion {
    id: String,
    #[serde(default, rename = "type")]
    question_type: Option<String>,
    answer: toml::Value,
    #[serde(default)]
    positive_marks: Option<f64>,
    #[serde(default)]
    negative_marks: Option<f64>,
}

/// A parsed exam file: metadata plus its marking scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct ExamDefinition {
    pub id: String,
    pub title: String,
    pub duration_secs: u64,
    pub scheme: MarkingScheme,
}

impl ExamDefinition {
    /// Bind the definition to a student for a scoring session.
    pub fn into_exam_data(self, student_id: impl Into<String>) -> ExamData {
        ExamData {
            exam_id: self.id,
            title: self.title,
            student_id: student_id.into(),
            duration_ms: self.duration_secs * 1000,
            scheme: self.scheme,
        }
    }
}

fn parse_key(question_id: &str, value: toml::Value) -> Result<AnswerKey> {
    match value {
        toml::Value::String(option) => Ok(AnswerKey::Single { option }),
        toml::Value::Integer(i) => Ok(AnswerKey::Numeric { value: i as f64 }),
        toml::Value::Float(value) => Ok(AnswerKey::Numeric { value }),
        toml::Value::Array(items) => {
            let options = items
                .into_iter()
                .map(|v| match v {
                    toml::Value::String(s) => Ok(s),
                    other => anyhow::bail!(
                        "question {question_id}: answer options must be strings, got {}",
                        other.type_str()
                    ),
                })
                .collect::<Result<BTreeSet<_>>>()?;
            Ok(AnswerKey::Multiple { options })
        }
        other => anyhow::bail!(
            "question {question_id}: unsupported answer type {}",
            other.type_str()
        ),
    }
}

/// Parse a single exam file.
pub fn parse_exam(path: &Path) -> Result<ExamDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read exam file: {}", path.display()))?;

    parse_exam_str(&content, path)
}

/// Parse exam TOML from a string.
pub fn parse_exam_str(content: &str, source_path: &Path) -> Result<ExamDefinition> {
    let parsed: TomlExamFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;
    let header = parsed.exam;

    let questions = parsed
        .questions
        .into_iter()
        .map(|q| {
            let key = parse_key(&q.id, q.answer)?;
            // The declared type wins; a disagreement with the key shape is
            // reported by `validate_exam` and rejected when scoring starts.
            let question_type = match q.question_type {
                Some(t) => t
                    .parse::<QuestionType>()
                    .map_err(|e| anyhow::anyhow!("question {}: {}", q.id, e))?,
                None => key.question_type(),
            };
            Ok(QuestionScheme {
                question_id: q.id,
                positive_marks: q.positive_marks.unwrap_or(header.positive_marks),
                negative_marks: q.negative_marks.unwrap_or(header.negative_marks).abs(),
                question_type,
                key,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ExamDefinition {
        scheme: MarkingScheme {
            exam_id: header.id.clone(),
            questions,
        },
        id: header.id,
        title: header.title,
        duration_secs: header.duration_secs,
    })
}

/// Recursively load all `.toml` exam files from a directory.
///
/// Files that fail to parse are skipped with a warning.
pub fn load_exam_directory(dir: &Path) -> Result<Vec<ExamDefinition>> {
    let mut exams = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let path = entry?.path();

        if path.is_dir() {
            exams.extend(load_exam_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_exam(&path) {
                Ok(exam) => exams.push(exam),
                Err(e) => tracing::warn!("skipping {}: {:#}", path.display(), e),
            }
        }
    }

    exams.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(exams)
}

/// A warning from exam validation.
#[derive(Debug, Clone)]
pub struct ExamWarning {
    /// The question ID, when the warning is about one question.
    pub question_id: Option<String>,
    pub message: String,
}

impl ExamWarning {
    fn question(id: &str, message: impl Into<String>) -> Self {
        Self {
            question_id: Some(id.to_string()),
            message: message.into(),
        }
    }
}

/// Check an exam for problems that would make scoring wrong or impossible.
pub fn validate_exam(exam: &ExamDefinition) -> Vec<ExamWarning> {
    let mut warnings = Vec::new();

    if exam.scheme.questions.is_empty() {
        warnings.push(ExamWarning {
            question_id: None,
            message: "exam has no questions".into(),
        });
    }
    if exam.duration_secs == 0 {
        warnings.push(ExamWarning {
            question_id: None,
            message: "duration is zero".into(),
        });
    }

    let mut seen = HashSet::new();
    for q in &exam.scheme.questions {
        if !seen.insert(q.question_id.as_str()) {
            warnings.push(ExamWarning::question(
                &q.question_id,
                format!("duplicate question ID: {}", q.question_id),
            ));
        }
        if q.positive_marks <= 0.0 {
            warnings.push(ExamWarning::question(
                &q.question_id,
                format!("positive marks must be above zero, got {}", q.positive_marks),
            ));
        }
        if q.key.question_type() != q.question_type {
            warnings.push(ExamWarning::question(
                &q.question_id,
                format!(
                    "answer key is a {} key but question type is {}",
                    q.key.question_type(),
                    q.question_type
                ),
            ));
        }
        let empty_key = match &q.key {
            AnswerKey::Single { option } => option.trim().is_empty(),
            AnswerKey::Multiple { options } => options.iter().all(|o| o.trim().is_empty()),
            AnswerKey::Numeric { value } => !value.is_finite(),
        };
        if empty_key {
            warnings.push(ExamWarning::question(&q.question_id, "answer key is empty"));
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const VALID_TOML: &str = r#"
[exam]
id = "physics-101"
title = "Mechanics midterm"
duration_secs = 1800
positive_marks = 4
negative_marks = 1

[[questions]]
id = "q1"
type = "single"
answer = "B"

[[questions]]
id = "q2"
type = "multiple"
answer = ["C", "A"]
negative_marks = 2

[[questions]]
id = "q3"
type = "numerical"
answer = 9.81
negative_marks = 0
"#;

    #[test]
    fn parse_valid_toml() {
        let exam = parse_exam_str(VALID_TOML, &PathBuf::from("exam.toml")).unwrap();
        assert_eq!(exam.id, "physics-101");
        assert_eq!(exam.duration_secs, 1800);
        assert_eq!(exam.scheme.questions.len(), 3);
        assert_eq!(exam.scheme.total_marks(), 12.0);

        let q2 = exam.scheme.question("q2").unwrap();
        assert_eq!(q2.question_type, QuestionType::MultipleChoice);
        assert_eq!(q2.negative_marks, 2.0);
        assert_eq!(
            q2.key,
            AnswerKey::Multiple {
                options: ["A".to_string(), "C".to_string()].into()
            }
        );
        assert!(validate_exam(&exam).is_empty());
    }

    #[test]
    fn type_defaults_to_key_shape() {
        let toml = r#"
[exam]
id = "minimal"

[[questions]]
id = "n1"
answer = 42
"#;
        let exam = parse_exam_str(toml, &PathBuf::from("exam.toml")).unwrap();
        let q = &exam.scheme.questions[0];
        assert_eq!(q.question_type, QuestionType::Numerical);
        assert_eq!(q.key, AnswerKey::Numeric { value: 42.0 });
        assert_eq!(q.positive_marks, 4.0);
        assert_eq!(q.negative_marks, 0.0);
        assert_eq!(exam.duration_secs, 3600);
    }

    #[test]
    fn unknown_question_type_is_an_error() {
        let toml = r#"
[exam]
id = "bad"

[[questions]]
id = "q1"
type = "essay"
answer = "x"
"#;
        let err = parse_exam_str(toml, &PathBuf::from("exam.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("unknown question type"));
    }

    #[test]
    fn validate_reports_problems() {
        let toml = r#"
[exam]
id = "messy"

[[questions]]
id = "q1"
type = "single"
answer = ["A", "B"]

[[questions]]
id = "q1"
answer = " "
positive_marks = 0
"#;
        let exam = parse_exam_str(toml, &PathBuf::from("exam.toml")).unwrap();
        let messages: Vec<_> = validate_exam(&exam).into_iter().map(|w| w.message).collect();
        assert!(messages.iter().any(|m| m.contains("duplicate")));
        assert!(messages.iter().any(|m| m.contains("question type is single_choice")));
        assert!(messages.iter().any(|m| m.contains("positive marks")));
        assert!(messages.iter().any(|m| m.contains("empty")));
    }

    #[test]
    fn parse_malformed_toml() {
        let result = parse_exam_str("[exam\nid = ", &PathBuf::from("bad.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn load_directory_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.toml"), VALID_TOML).unwrap();
        std::fs::write(dir.path().join("bad.toml"), "not toml [").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let exams = load_exam_directory(dir.path()).unwrap();
        assert_eq!(exams.len(), 1);
        assert_eq!(exams[0].id, "physics-101");
    }

    #[test]
    fn into_exam_data_converts_duration() {
        let exam = parse_exam_str(VALID_TOML, &PathBuf::from("exam.toml")).unwrap();
        let data = exam.into_exam_data("student-7");
        assert_eq!(data.duration_ms, 1_800_000);
        assert_eq!(data.student_id, "student-7");
        assert_eq!(data.scheme.exam_id, "physics-101");
    }
}
