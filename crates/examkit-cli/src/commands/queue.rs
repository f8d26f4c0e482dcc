//! The `examkit queue` admin commands, run against a journal file.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use examkit_queue::journal;

pub fn stats(journal_path: PathBuf, format: String) -> Result<()> {
    anyhow::ensure!(
        journal_path.exists(),
        "journal not found: {}",
        journal_path.display()
    );
    let summary = journal::summarize(&journal_path)?;

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        "text" => {
            let mut table = Table::new();
            table.set_header(vec!["Status", "Count"]);
            for c in &summary.stats {
                table.add_row(vec![Cell::new(c.status.to_string()), Cell::new(c.count)]);
            }
            println!("{table}");
            println!("Total: {}", summary.total);

            if !summary.failed_submissions.is_empty() {
                let mut failed = Table::new();
                failed.set_header(vec!["Submission", "Attempts", "Last error"]);
                for f in &summary.failed_submissions {
                    failed.add_row(vec![
                        Cell::new(&f.submission_id),
                        Cell::new(f.attempt_count),
                        Cell::new(f.last_error.as_deref().unwrap_or("")),
                    ]);
                }
                println!("\nFailed submissions:\n{failed}");
            }
        }
        other => anyhow::bail!("unknown format '{other}', expected text or json"),
    }
    Ok(())
}

pub fn retry(journal_path: PathBuf, submission_id: String) -> Result<()> {
    let record = journal::retry_failed(&journal_path, &submission_id)?;
    println!(
        "Re-queued {} ({} previous error(s)); it will be picked up on the next recover.",
        record.submission_id,
        record.error_log.len()
    );
    Ok(())
}
