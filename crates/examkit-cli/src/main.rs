//! examkit CLI: operator tools for exam timing, scoring and submission intake.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::filter::LevelFilter;

mod commands;

#[derive(Parser)]
#[command(name = "examkit", version, about = "Exam timing, scoring and submission pipeline")]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a starter config and a sample exam
    Init,

    /// Validate exam definition files
    Validate {
        /// Path to an exam file or directory
        #[arg(long)]
        exam: PathBuf,
    },

    /// Score a set of answers and write the sealed submission
    Score {
        /// Exam definition file
        #[arg(long)]
        exam: PathBuf,

        /// JSON object mapping question ids to answers
        #[arg(long)]
        answers: PathBuf,

        /// Student id stamped on the submission
        #[arg(long, default_value = "student-1")]
        student: String,

        /// Seconds spent on the exam
        #[arg(long)]
        time_taken: Option<u64>,

        /// Write the submission here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Run server-side validation and integrity checks on a submission
    Verify {
        /// Sealed submission JSON
        #[arg(long)]
        submission: PathBuf,

        /// Exam definition used to re-evaluate a submission that fails the check
        #[arg(long)]
        exam: Option<PathBuf>,
    },

    /// Run a live countdown and print its events
    Timer {
        /// Countdown length in seconds
        #[arg(long)]
        duration_secs: u64,

        /// Tick interval in milliseconds
        #[arg(long)]
        precision_ms: Option<u64>,

        /// Warning threshold as SECS:MESSAGE (repeatable)
        #[arg(long = "warn")]
        warnings: Vec<String>,

        /// Emit time_expired instead of auto_submit at zero
        #[arg(long)]
        no_auto_submit: bool,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Simulate an end-of-exam submission burst against a flaky store
    Burst {
        /// Number of submissions
        #[arg(long, default_value = "500")]
        count: usize,

        /// Worker pool size
        #[arg(long)]
        workers: Option<usize>,

        /// Share of store writes that fail
        #[arg(long, default_value = "0.2")]
        failure_rate: f64,

        /// Failed writes allowed per submission
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Simulated store latency in milliseconds
        #[arg(long, default_value = "20")]
        latency_ms: u64,

        /// Journal queue transitions to this file
        #[arg(long)]
        journal: Option<PathBuf>,

        /// Also append stored submissions to this JSONL file
        #[arg(long)]
        store: Option<PathBuf>,

        /// Seed for failures and backoff jitter
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Offline queue administration over a journal
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Print status counts and failed submissions
    Stats {
        /// Queue journal file
        #[arg(long)]
        journal: PathBuf,

        /// Output format: text or json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Re-queue a failed submission
    Retry {
        /// Queue journal file
        #[arg(long)]
        journal: PathBuf,

        /// Submission id
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                "examkit=info"
                    .parse()
                    .unwrap_or_else(|_| LevelFilter::INFO.into()),
            ),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config;

    let result = match cli.command {
        Commands::Init => commands::init::execute(),
        Commands::Validate { exam } => commands::validate::execute(exam),
        Commands::Score {
            exam,
            answers,
            student,
            time_taken,
            output,
        } => commands::score::execute(exam, answers, student, time_taken, output, config).await,
        Commands::Verify { submission, exam } => {
            commands::verify::execute(submission, exam, config)
        }
        Commands::Timer {
            duration_secs,
            precision_ms,
            warnings,
            no_auto_submit,
            json,
        } => {
            commands::timer::execute(
                duration_secs,
                precision_ms,
                warnings,
                !no_auto_submit,
                json,
                config,
            )
            .await
        }
        Commands::Burst {
            count,
            workers,
            failure_rate,
            max_attempts,
            latency_ms,
            journal,
            store,
            seed,
        } => {
            commands::burst::execute(commands::burst::BurstArgs {
                count,
                workers,
                failure_rate,
                max_attempts,
                latency_ms,
                journal,
                store,
                seed,
                config,
            })
            .await
        }
        Commands::Queue { action } => match action {
            QueueAction::Stats { journal, format } => commands::queue::stats(journal, format),
            QueueAction::Retry { journal, id } => commands::queue::retry(journal, id),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
