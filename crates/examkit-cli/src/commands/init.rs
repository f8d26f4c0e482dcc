//! The `examkit init` command.

use std::path::Path;

use anyhow::Result;

pub fn execute() -> Result<()> {
    if Path::new("examkit.toml").exists() {
        println!("examkit.toml already exists, skipping.");
    } else {
        std::fs::write("examkit.toml", SAMPLE_CONFIG)?;
        println!("Created examkit.toml");
    }

    std::fs::create_dir_all("exams")?;
    let sample_path = Path::new("exams/sample.toml");
    if sample_path.exists() {
        println!("exams/sample.toml already exists, skipping.");
    } else {
        std::fs::write(sample_path, SAMPLE_EXAM)?;
        println!("Created exams/sample.toml");
    }

    println!("\nNext steps:");
    println!("  1. Set EXAMKIT_INTEGRITY_SECRET or edit examkit.toml");
    println!("  2. Run: examkit validate --exam exams/sample.toml");
    println!("  3. Run: examkit burst --count 500");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# examkit configuration

[timer]
precision_ms = 1000
drift_threshold_ms = 50
drift_window = 10

[scoring]
numeric_tolerance = 0.01
scheme_ttl_secs = 14400
finalize_timeout_ms = 5000
integrity_secret = "${EXAMKIT_SECRET}"

[queue]
workers = 10
max_attempts = 3
base_backoff_ms = 500
max_backoff_ms = 30000
jitter_ratio = 0.25
retention_secs = 86400
# journal_path = "examkit-journal.jsonl"
# store_path = "submissions.jsonl"

[attempts_cache]
ttl_secs = 120
max_entries = 500
"#;

const SAMPLE_EXAM: &str = r#"[exam]
id = "sample"
title = "Sample Physics Quiz"
duration_secs = 1800
positive_marks = 4
negative_marks = 1

[[questions]]
id = "q1"
answer = "B"

[[questions]]
id = "q2"
answer = ["A", "C"]
negative_marks = 2

[[questions]]
id = "q3"
type = "numerical"
answer = 9.81
negative_marks = 0
"#;
