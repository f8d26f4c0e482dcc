//! Progressive scoring engine.
//!
//! Keeps a running score while answers change so that finalize only has to
//! re-validate and seal. Each `update_answer` touches one question and moves
//! the aggregates by the delta between its old and new contribution.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::ScoringError;
use crate::integrity::{seal_instant, IntegrityKey};
use crate::model::{
    Answer, AnswerKey, Contribution, Evaluation, EvaluationSnapshot, ExamData, FinalizeMetadata,
    MarkingScheme, Outcome, QuestionScheme, SealedSubmission,
};
use crate::offline_cache::OfflineCacheManager;

/// Configuration for the scoring engine.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Absolute tolerance for numerical questions.
    pub numeric_tolerance: f64,
    /// How long the scheme stays in the offline cache.
    pub scheme_ttl: Duration,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            numeric_tolerance: 0.01,
            scheme_ttl: Duration::from_secs(4 * 60 * 60),
        }
    }
}

impl From<&crate::config::ScoringSettings> for ScoringConfig {
    fn from(settings: &crate::config::ScoringSettings) -> Self {
        Self {
            numeric_tolerance: settings.numeric_tolerance,
            scheme_ttl: settings.scheme_ttl(),
        }
    }
}

/// Marking scheme as held in the offline cache, indexed for O(1) lookup.
#[derive(Debug)]
pub struct CachedScheme {
    pub scheme: MarkingScheme,
    index: HashMap<String, usize>,
    total_marks: f64,
}

impl CachedScheme {
    pub fn new(scheme: MarkingScheme) -> Result<Self, ScoringError> {
        check_scheme(&scheme)?;
        let index = scheme
            .questions
            .iter()
            .enumerate()
            .map(|(i, q)| (q.question_id.clone(), i))
            .collect();
        let total_marks = scheme.total_marks();
        Ok(Self {
            scheme,
            index,
            total_marks,
        })
    }

    pub fn question(&self, question_id: &str) -> Option<&QuestionScheme> {
        self.index
            .get(question_id)
            .map(|&i| &self.scheme.questions[i])
    }

    pub fn total_marks(&self) -> f64 {
        self.total_marks
    }
}

fn check_scheme(scheme: &MarkingScheme) -> Result<(), ScoringError> {
    if scheme.questions.is_empty() {
        return Err(ScoringError::InvalidScheme(format!(
            "exam {} has no questions",
            scheme.exam_id
        )));
    }
    let mut seen = BTreeSet::new();
    for q in &scheme.questions {
        if !seen.insert(q.question_id.as_str()) {
            return Err(ScoringError::InvalidScheme(format!(
                "duplicate question id {}",
                q.question_id
            )));
        }
        if q.key.question_type() != q.question_type {
            return Err(ScoringError::InvalidScheme(format!(
                "question {} is {} but its key is {}",
                q.question_id,
                q.question_type,
                q.key.question_type()
            )));
        }
        if q.positive_marks < 0.0 || q.negative_marks < 0.0 {
            return Err(ScoringError::InvalidScheme(format!(
                "question {} has negative mark values",
                q.question_id
            )));
        }
    }
    Ok(())
}

fn normalize_choice(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Score one answer against one question.
///
/// Returns `AnswerShape` when the answer cannot belong to the question type.
pub fn evaluate_question(
    question: &QuestionScheme,
    answer: Option<&Answer>,
    tolerance: f64,
) -> Result<Contribution, ScoringError> {
    let Some(answer) = answer.filter(|a| !a.is_blank()) else {
        return Ok(Contribution::UNATTEMPTED);
    };

    let correct = match (&question.key, answer) {
        (AnswerKey::Single { option }, Answer::Choice(given)) => {
            normalize_choice(option) == normalize_choice(given)
        }
        (AnswerKey::Multiple { options }, Answer::Choices(given)) => {
            let expected: BTreeSet<String> = options.iter().map(|o| normalize_choice(o)).collect();
            let given: BTreeSet<String> = given
                .iter()
                .filter(|g| !g.trim().is_empty())
                .map(|g| normalize_choice(g))
                .collect();
            expected == given
        }
        // A lone selection on a multi-answer question is a one-element set.
        (AnswerKey::Multiple { options }, Answer::Choice(given)) => {
            options.len() == 1
                && options
                    .iter()
                    .all(|o| normalize_choice(o) == normalize_choice(given))
        }
        (AnswerKey::Numeric { value }, Answer::Numeric(given)) => {
            (value - given).abs() <= tolerance
        }
        _ => {
            return Err(ScoringError::AnswerShape {
                question_id: question.question_id.clone(),
                expected: question.question_type,
            })
        }
    };

    Ok(if correct {
        Contribution {
            outcome: Outcome::Correct,
            marks: question.positive_marks,
        }
    } else {
        Contribution {
            outcome: Outcome::Incorrect,
            marks: -question.negative_marks,
        }
    })
}

fn percentage(score: f64, total_marks: f64) -> f64 {
    if total_marks > 0.0 {
        score / total_marks * 100.0
    } else {
        0.0
    }
}

/// Full scoring pass over a set of answers.
///
/// Used for finalize re-validation and for server-side re-evaluation when a
/// submission's integrity hash cannot be trusted. Answers to unknown
/// questions or of the wrong shape contribute nothing.
pub fn evaluate_full(
    scheme: &MarkingScheme,
    answers: &BTreeMap<String, Answer>,
    tolerance: f64,
) -> Evaluation {
    let mut eval = Evaluation {
        score: 0.0,
        total_marks: scheme.total_marks(),
        percentage: 0.0,
        correct: 0,
        incorrect: 0,
        unattempted: 0,
    };
    for question in &scheme.questions {
        let contribution =
            evaluate_question(question, answers.get(&question.question_id), tolerance)
                .unwrap_or(Contribution::UNATTEMPTED);
        eval.score += contribution.marks;
        match contribution.outcome {
            Outcome::Correct => eval.correct += 1,
            Outcome::Incorrect => eval.incorrect += 1,
            Outcome::Unattempted => eval.unattempted += 1,
        }
    }
    eval.percentage = percentage(eval.score, eval.total_marks);
    eval
}

/// Change applied by one `update_answer` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnswerDelta {
    pub previous: Contribution,
    pub current: Contribution,
    pub running_score: f64,
}

impl AnswerDelta {
    pub fn score_delta(&self) -> f64 {
        self.current.marks - self.previous.marks
    }
}

/// Incremental score engine for one exam session.
pub struct ProgressiveScoringEngine {
    exam_id: String,
    student_id: String,
    cache_key: String,
    cache: OfflineCacheManager<Arc<CachedScheme>>,
    /// Copy handed over at initialize, used to repopulate the cache on a miss.
    source: Arc<CachedScheme>,
    config: ScoringConfig,
    key: IntegrityKey,
    contributions: HashMap<String, Contribution>,
    snapshot: EvaluationSnapshot,
    started_at: DateTime<Utc>,
}

impl std::fmt::Debug for ProgressiveScoringEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressiveScoringEngine")
            .field("exam_id", &self.exam_id)
            .field("student_id", &self.student_id)
            .field("running_score", &self.snapshot.running_score)
            .finish_non_exhaustive()
    }
}

impl ProgressiveScoringEngine {
    /// Load the marking scheme into the offline cache and seed an empty snapshot.
    pub fn initialize(
        exam: ExamData,
        config: ScoringConfig,
        key: IntegrityKey,
    ) -> Result<Self, ScoringError> {
        let cached = Arc::new(CachedScheme::new(exam.scheme)?);
        let cache_key = format!("scheme:{}", exam.exam_id);
        let mut cache = OfflineCacheManager::new();
        cache.put(cache_key.clone(), Arc::clone(&cached), config.scheme_ttl);

        let total_marks = cached.total_marks();
        let question_count = cached.scheme.questions.len() as u32;
        let now = Utc::now();

        tracing::info!(
            exam_id = %exam.exam_id,
            student_id = %exam.student_id,
            questions = question_count,
            total_marks,
            "scoring engine initialized"
        );

        Ok(Self {
            exam_id: exam.exam_id,
            student_id: exam.student_id,
            cache_key,
            cache,
            source: cached,
            config,
            key,
            contributions: HashMap::new(),
            snapshot: EvaluationSnapshot {
                answers: BTreeMap::new(),
                running_score: 0.0,
                total_marks,
                percentage: 0.0,
                correct: 0,
                incorrect: 0,
                unattempted: question_count,
                last_updated_at: now,
            },
            started_at: now,
        })
    }

    pub fn exam_id(&self) -> &str {
        &self.exam_id
    }

    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    pub fn snapshot(&self) -> &EvaluationSnapshot {
        &self.snapshot
    }

    fn scheme(&mut self) -> Arc<CachedScheme> {
        if let Some(cached) = self.cache.get(&self.cache_key) {
            return cached;
        }
        tracing::debug!(exam_id = %self.exam_id, "marking scheme cache miss, repopulating");
        self.cache.cleanup();
        self.cache.put(
            self.cache_key.clone(),
            Arc::clone(&self.source),
            self.config.scheme_ttl,
        );
        Arc::clone(&self.source)
    }

    /// Record a changed answer; `None` clears it.
    ///
    /// Only the affected question's contribution is recomputed.
    pub fn update_answer(
        &mut self,
        question_id: &str,
        answer: Option<Answer>,
    ) -> Result<AnswerDelta, ScoringError> {
        let scheme = self.scheme();
        let question = scheme
            .question(question_id)
            .ok_or_else(|| ScoringError::UnknownQuestion(question_id.to_string()))?;

        let current = evaluate_question(question, answer.as_ref(), self.config.numeric_tolerance)?;
        let previous = self
            .contributions
            .get(question_id)
            .copied()
            .unwrap_or(Contribution::UNATTEMPTED);

        self.apply(previous, current);
        match answer.filter(|a| !a.is_blank()) {
            Some(a) => {
                self.snapshot.answers.insert(question_id.to_string(), a);
                self.contributions.insert(question_id.to_string(), current);
            }
            None => {
                self.snapshot.answers.remove(question_id);
                self.contributions.remove(question_id);
            }
        }
        self.snapshot.last_updated_at = Utc::now();

        tracing::debug!(
            question_id,
            delta = current.marks - previous.marks,
            running_score = self.snapshot.running_score,
            "answer updated"
        );

        Ok(AnswerDelta {
            previous,
            current,
            running_score: self.snapshot.running_score,
        })
    }

    fn apply(&mut self, previous: Contribution, current: Contribution) {
        let snap = &mut self.snapshot;
        snap.running_score += current.marks - previous.marks;
        for (outcome, step) in [(previous.outcome, -1i64), (current.outcome, 1i64)] {
            let counter = match outcome {
                Outcome::Correct => &mut snap.correct,
                Outcome::Incorrect => &mut snap.incorrect,
                Outcome::Unattempted => &mut snap.unattempted,
            };
            *counter = (*counter as i64 + step).max(0) as u32;
        }
        snap.percentage = percentage(snap.running_score, snap.total_marks);
    }

    /// Re-validate the running score and produce the sealed submission.
    pub fn finalize(&mut self, metadata: FinalizeMetadata) -> SealedSubmission {
        let scheme = self.scheme();
        let evaluation = evaluate_full(
            &scheme.scheme,
            &self.snapshot.answers,
            self.config.numeric_tolerance,
        );

        if (evaluation.score - self.snapshot.running_score).abs() > 1e-6
            || evaluation.correct != self.snapshot.correct
            || evaluation.incorrect != self.snapshot.incorrect
        {
            tracing::warn!(
                exam_id = %self.exam_id,
                running = self.snapshot.running_score,
                recomputed = evaluation.score,
                "running score diverged from full pass, using recomputed values"
            );
        }

        let completed_at = seal_instant(metadata.completed_at.unwrap_or_else(Utc::now));
        let time_taken = metadata.time_taken.unwrap_or_else(|| {
            (completed_at - self.started_at).num_seconds().max(0) as u64
        });
        let integrity_hash = self.key.sign(
            &self.snapshot.answers,
            evaluation.score,
            evaluation.total_marks,
            completed_at,
        );

        tracing::info!(
            exam_id = %self.exam_id,
            student_id = %self.student_id,
            score = evaluation.score,
            total_marks = evaluation.total_marks,
            time_taken,
            "submission sealed"
        );

        SealedSubmission {
            exam_id: self.exam_id.clone(),
            student_id: self.student_id.clone(),
            answers: self.snapshot.answers.clone(),
            final_score: evaluation.score,
            total_marks: evaluation.total_marks,
            percentage: evaluation.percentage,
            correct_answers: evaluation.correct,
            incorrect_answers: evaluation.incorrect,
            unattempted: evaluation.unattempted,
            time_taken,
            completed_at,
            integrity_hash,
        }
    }
}

/// Re-score a submission from its raw answers and seal it with `key`.
///
/// Server-side fallback when the client's hash cannot be trusted.
pub fn reseal(
    submission: &SealedSubmission,
    scheme: &MarkingScheme,
    tolerance: f64,
    key: &IntegrityKey,
) -> SealedSubmission {
    let evaluation = evaluate_full(scheme, &submission.answers, tolerance);
    let completed_at = seal_instant(submission.completed_at);
    let integrity_hash = key.sign(
        &submission.answers,
        evaluation.score,
        evaluation.total_marks,
        completed_at,
    );
    SealedSubmission {
        final_score: evaluation.score,
        total_marks: evaluation.total_marks,
        percentage: evaluation.percentage,
        correct_answers: evaluation.correct,
        incorrect_answers: evaluation.incorrect,
        unattempted: evaluation.unattempted,
        completed_at,
        integrity_hash,
        ..submission.clone()
    }
}
