//! The `examkit verify` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use examkit_core::config::load_config_from;
use examkit_core::model::SealedSubmission;
use examkit_core::parser;
use examkit_core::scoring::reseal;
use examkit_core::validation::validate_submission;

pub fn execute(
    submission_path: PathBuf,
    exam_path: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let key = super::integrity_key(&config)?;

    let raw = std::fs::read_to_string(&submission_path)
        .with_context(|| format!("failed to read {}", submission_path.display()))?;
    let submission: SealedSubmission = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse submission in {}", submission_path.display()))?;

    println!("Submission: {}", submission.submission_id());

    let report = validate_submission(&submission).context("validation failed")?;
    if report.is_flagged() {
        for flag in &report.flags {
            println!("  FLAG: {flag:?}");
        }
    } else {
        println!("  Validation: ok");
    }

    match key.verify(&submission) {
        Ok(()) => {
            println!("  Integrity: ok");
            println!("  Score: {} / {}", submission.final_score, submission.total_marks);
        }
        Err(e) => {
            println!("  Integrity: {e}");
            let Some(exam_path) = exam_path else {
                anyhow::bail!("integrity check failed and no exam given to re-evaluate");
            };
            let exam = parser::parse_exam(&exam_path)?;
            anyhow::ensure!(
                exam.id == submission.exam_id,
                "exam file is for {}, submission is for {}",
                exam.id,
                submission.exam_id
            );
            let resealed = reseal(
                &submission,
                &exam.scheme,
                config.scoring.numeric_tolerance,
                &key,
            );
            println!(
                "  Re-evaluated score: {} / {} (claimed {})",
                resealed.final_score, resealed.total_marks, submission.final_score
            );
        }
    }

    Ok(())
}
