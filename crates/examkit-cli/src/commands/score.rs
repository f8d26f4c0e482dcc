//! The `examkit score` command.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;

use examkit_core::config::load_config_from;
use examkit_core::error::ScoringError;
use examkit_core::model::{Answer, FinalizeMetadata, SealedSubmission};
use examkit_core::parser;
use examkit_core::scoring::{reseal, ProgressiveScoringEngine, ScoringConfig};
use examkit_core::worker::ScoringWorker;

pub async fn execute(
    exam_path: PathBuf,
    answers_path: PathBuf,
    student_id: String,
    time_taken: Option<u64>,
    output: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let key = super::integrity_key(&config)?;
    let exam = parser::parse_exam(&exam_path)?;
    let scheme = exam.scheme.clone();

    let raw = std::fs::read_to_string(&answers_path)
        .with_context(|| format!("failed to read {}", answers_path.display()))?;
    let answers: BTreeMap<String, Option<Answer>> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse answers in {}", answers_path.display()))?;

    let scoring_config = ScoringConfig::from(&config.scoring);
    let tolerance = scoring_config.numeric_tolerance;
    let engine = ProgressiveScoringEngine::initialize(
        exam.into_exam_data(student_id.clone()),
        scoring_config,
        key.clone(),
    )?;
    let worker = ScoringWorker::spawn(engine);
    let handle = worker.handle();

    for (question_id, answer) in &answers {
        handle.update_answer(question_id.clone(), answer.clone());
    }

    let timeout = config.scoring.finalize_timeout();
    let snapshot = handle.snapshot(timeout).await?;
    eprintln!(
        "Running score: {} / {} ({} correct, {} incorrect, {} unattempted)",
        snapshot.running_score,
        snapshot.total_marks,
        snapshot.correct,
        snapshot.incorrect,
        snapshot.unattempted
    );

    let metadata = FinalizeMetadata {
        time_taken,
        completed_at: None,
    };
    let sealed = match handle.finalize(metadata, timeout).await {
        Ok(sealed) => sealed,
        Err(e @ (ScoringError::FinalizeTimeout(_) | ScoringError::WorkerClosed)) => {
            tracing::warn!(error = %e, "scoring worker unavailable, sealing from a full pass");
            let draft = SealedSubmission {
                exam_id: scheme.exam_id.clone(),
                student_id,
                answers: answers
                    .into_iter()
                    .filter_map(|(id, a)| a.map(|a| (id, a)))
                    .collect(),
                final_score: 0.0,
                total_marks: 0.0,
                percentage: 0.0,
                correct_answers: 0,
                incorrect_answers: 0,
                unattempted: 0,
                time_taken: time_taken.unwrap_or(0),
                completed_at: Utc::now(),
                integrity_hash: String::new(),
            };
            reseal(&draft, &scheme, tolerance, &key)
        }
        Err(e) => return Err(e.into()),
    };

    eprintln!(
        "Final score: {} / {} ({:.1}%)",
        sealed.final_score, sealed.total_marks, sealed.percentage
    );
    eprintln!("Submission id: {}", sealed.submission_id());

    let json = serde_json::to_string_pretty(&sealed)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Submission written to: {}", path.display());
        }
        None => println!("{json}"),
    }

    Ok(())
}
