//! The `examkit burst` command.
//!
//! Seals `count` submissions for a built-in exam and pushes them all into
//! the queue at once, against a store that fails a share of writes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use comfy_table::{Cell, Table};

use examkit_core::config::load_config_from;
use examkit_core::integrity::IntegrityKey;
use examkit_core::model::{
    Answer, AnswerKey, ExamData, FinalizeMetadata, MarkingScheme, QuestionScheme, QuestionType,
    SealedSubmission,
};
use examkit_core::scoring::{ProgressiveScoringEngine, ScoringConfig};
use examkit_queue::mock::FlakyStore;
use examkit_queue::model::QueueStats;
use examkit_queue::{JsonlStore, QueueConfig, SubmissionQueueService, SubmissionStatus};

const SIMULATION_SECRET: &str = "examkit-burst-simulation";

pub struct BurstArgs {
    pub count: usize,
    pub workers: Option<usize>,
    pub failure_rate: f64,
    pub max_attempts: Option<u32>,
    pub latency_ms: u64,
    pub journal: Option<PathBuf>,
    pub store: Option<PathBuf>,
    pub seed: Option<u64>,
    pub config: Option<PathBuf>,
}

pub async fn execute(args: BurstArgs) -> Result<()> {
    anyhow::ensure!(args.count >= 1, "count must be at least 1");
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.failure_rate),
        "failure rate must be between 0.0 and 1.0"
    );

    let config = load_config_from(args.config.as_deref())?;
    let secret = if config.scoring.integrity_secret.is_empty() {
        SIMULATION_SECRET
    } else {
        config.scoring.integrity_secret.as_str()
    };
    let key = IntegrityKey::new(secret);

    let mut queue_config = QueueConfig::from(&config.queue);
    if let Some(workers) = args.workers {
        anyhow::ensure!(workers >= 1, "workers must be at least 1");
        queue_config.workers = workers;
    }
    if let Some(max_attempts) = args.max_attempts {
        anyhow::ensure!(max_attempts >= 1, "max attempts must be at least 1");
        queue_config.max_attempts = max_attempts;
    }
    queue_config.seed = args.seed;
    let workers = queue_config.workers;

    let submissions = seal_submissions(args.count, &key)?;

    let mut flaky = FlakyStore::new(
        args.failure_rate,
        Duration::from_millis(args.latency_ms),
        args.seed.unwrap_or(0),
    );
    let sink_path = args.store.or(config.queue.store_path.clone());
    if let Some(path) = &sink_path {
        flaky = flaky.with_sink(Arc::new(JsonlStore::new(path)));
    }
    let store = Arc::new(flaky);

    let journal_path = args.journal.or(config.queue.journal_path.clone());
    let mut builder =
        SubmissionQueueService::builder(store.clone(), key).config(queue_config);
    if let Some(path) = &journal_path {
        builder = builder.journal(path);
    }
    let queue = builder.start()?;

    eprintln!(
        "examkit v{}: bursting {} submissions into {} workers (failure rate {:.0}%)",
        env!("CARGO_PKG_VERSION"),
        args.count,
        workers,
        args.failure_rate * 100.0
    );

    let started = Instant::now();
    for submission in submissions {
        queue.enqueue(submission)?;
    }
    queue.wait_idle().await;
    let elapsed = started.elapsed();

    let stats = queue.get_stats();
    print_summary(&stats);
    println!(
        "Peak concurrent writes: {} (pool size {workers})",
        store.peak_in_flight()
    );
    println!(
        "Store calls: {}, failed writes: {}, stored: {}",
        store.calls(),
        store.failures(),
        store.stored().len()
    );
    println!("Elapsed: {:.2}s", elapsed.as_secs_f64());

    let failed = queue.failed_submissions();
    if !failed.is_empty() {
        println!("\n{} submission(s) need a manual retry:", failed.len());
        for f in failed.iter().take(10) {
            println!(
                "  {} after {} attempt(s): {}",
                f.submission_id,
                f.attempt_count,
                f.last_error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    queue.shutdown().await;
    if let Some(path) = &journal_path {
        eprintln!("Journal written to: {}", path.display());
    }
    if let Some(path) = &sink_path {
        eprintln!("Submissions written to: {}", path.display());
    }
    Ok(())
}

fn burst_scheme() -> MarkingScheme {
    let single = |id: &str, option: &str| QuestionScheme {
        question_id: id.into(),
        positive_marks: 4.0,
        negative_marks: 1.0,
        question_type: QuestionType::SingleChoice,
        key: AnswerKey::Single {
            option: option.into(),
        },
    };
    MarkingScheme {
        exam_id: "burst".into(),
        questions: vec![
            single("q1", "A"),
            single("q2", "B"),
            single("q3", "C"),
            QuestionScheme {
                question_id: "q4".into(),
                positive_marks: 4.0,
                negative_marks: 2.0,
                question_type: QuestionType::MultipleChoice,
                key: AnswerKey::Multiple {
                    options: ["A".to_string(), "D".to_string()].into(),
                },
            },
            QuestionScheme {
                question_id: "q5".into(),
                positive_marks: 4.0,
                negative_marks: 0.0,
                question_type: QuestionType::Numerical,
                key: AnswerKey::Numeric { value: 42.0 },
            },
        ],
    }
}

/// One sealed submission per simulated student, with answers varied by index.
fn seal_submissions(count: usize, key: &IntegrityKey) -> Result<Vec<SealedSubmission>> {
    let scheme = burst_scheme();
    let options = ["A", "B", "C", "D"];
    (0..count)
        .map(|i| {
            let exam = ExamData {
                exam_id: scheme.exam_id.clone(),
                title: "Burst simulation".into(),
                student_id: format!("student-{i:05}"),
                duration_ms: 3_600_000,
                scheme: scheme.clone(),
            };
            let mut engine =
                ProgressiveScoringEngine::initialize(exam, ScoringConfig::default(), key.clone())?;
            engine.update_answer("q1", Some(Answer::Choice(options[i % 4].into())))?;
            engine.update_answer("q2", Some(Answer::Choice(options[(i / 4) % 4].into())))?;
            if i % 3 != 0 {
                engine.update_answer("q3", Some(Answer::Choice("C".into())))?;
            }
            engine.update_answer(
                "q4",
                Some(Answer::Choices(vec!["A".into(), options[i % 4].into()])),
            )?;
            engine.update_answer("q5", Some(Answer::Numeric(40.0 + (i % 5) as f64)))?;
            Ok(engine.finalize(FinalizeMetadata {
                time_taken: Some(600 + (i as u64 % 1800)),
                completed_at: None,
            }))
        })
        .collect()
}

fn print_summary(stats: &QueueStats) {
    let mut table = Table::new();
    table.set_header(vec!["Status", "Count"]);
    for status in SubmissionStatus::ALL {
        table.add_row(vec![
            Cell::new(status.to_string()),
            Cell::new(stats.count(status)),
        ]);
    }
    println!("\n{table}");

    let mut workers = Table::new();
    workers.set_header(vec!["Worker", "Processed", "Errors", "Avg ms"]);
    for w in &stats.workers {
        workers.add_row(vec![
            Cell::new(&w.worker_id),
            Cell::new(w.processed_count),
            Cell::new(w.error_count),
            Cell::new(format!("{:.1}", w.average_processing_time)),
        ]);
    }
    println!("{workers}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_submissions_verify_and_are_unique() {
        let key = IntegrityKey::new("k");
        let subs = seal_submissions(40, &key).unwrap();
        assert_eq!(subs.len(), 40);
        assert!(subs.iter().all(|s| key.verify(s).is_ok()));

        let mut ids: Vec<String> = subs.iter().map(|s| s.submission_id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 40);
    }
}
