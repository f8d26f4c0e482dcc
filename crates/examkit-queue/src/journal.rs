//! Append-only JSONL journal of queue transitions.
//!
//! Every state change writes the full record, so replaying the file and
//! keeping the last line per submission id rebuilds the queue.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use crate::model::{status_counts, FailedSubmission, QueuedSubmission, StatusCount, SubmissionStatus};

#[derive(Debug, Serialize, Deserialize)]
struct JournalEntry {
    at: DateTime<Utc>,
    record: QueuedSubmission,
}

/// Open journal file.
pub struct Journal {
    path: PathBuf,
    file: Mutex<File>,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").field("path", &self.path).finish()
    }
}

impl Journal {
    /// Open for appending, creating the file and its parent directory.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open journal {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &QueuedSubmission) -> Result<()> {
        let line = encode_line(record)?;
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        Ok(())
    }

    /// Hand the file to a background task and return its sender.
    ///
    /// Must be called inside a tokio runtime.
    pub(crate) fn into_writer(self) -> JournalWriter {
        let file = self.file.into_inner().unwrap_or_else(|e| e.into_inner());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(self.path, tokio::fs::File::from_std(file), rx));
        JournalWriter { tx }
    }
}

fn encode_line(record: &QueuedSubmission) -> Result<String> {
    let entry = JournalEntry {
        at: Utc::now(),
        record: record.clone(),
    };
    let mut line = serde_json::to_string(&entry).context("failed to encode journal entry")?;
    line.push('\n');
    Ok(line)
}

enum JournalOp {
    Append(String),
    Flush(oneshot::Sender<()>),
}

/// Sender half of a journal owned by a writer task.
///
/// Lines are written in the order they were sent; sending never blocks.
#[derive(Clone)]
pub(crate) struct JournalWriter {
    tx: mpsc::UnboundedSender<JournalOp>,
}

impl JournalWriter {
    pub(crate) fn append(&self, record: &QueuedSubmission) {
        match encode_line(record) {
            Ok(line) => {
                if self.tx.send(JournalOp::Append(line)).is_err() {
                    tracing::error!(submission_id = %record.submission_id, "journal writer is gone");
                }
            }
            Err(e) => {
                tracing::error!(submission_id = %record.submission_id, "journal append failed: {e:#}")
            }
        }
    }

    /// Resolve once every line sent so far is on disk.
    pub(crate) async fn flush(&self) {
        let (done, rx) = oneshot::channel();
        if self.tx.send(JournalOp::Flush(done)).is_ok() {
            let _ = rx.await;
        }
    }
}

async fn write_loop(
    path: PathBuf,
    mut file: tokio::fs::File,
    mut ops: mpsc::UnboundedReceiver<JournalOp>,
) {
    while let Some(op) = ops.recv().await {
        match op {
            JournalOp::Append(line) => {
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    tracing::error!(path = %path.display(), "journal append failed: {e}");
                }
            }
            JournalOp::Flush(done) => {
                if let Err(e) = file.flush().await {
                    tracing::error!(path = %path.display(), "journal flush failed: {e}");
                }
                let _ = done.send(());
            }
        }
    }
    if let Err(e) = file.flush().await {
        tracing::error!(path = %path.display(), "journal flush failed: {e}");
    }
}

/// Latest record per submission id, in first-seen order.
///
/// A missing file replays as empty. Unreadable lines, such as a write cut
/// short by a crash, are skipped with a warning.
pub fn replay(path: &Path) -> Result<Vec<QueuedSubmission>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("failed to read journal {}", path.display())),
    };

    let mut records: Vec<QueuedSubmission> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: JournalEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("{}:{}: skipping unreadable journal line: {}", path.display(), n + 1, e);
                continue;
            }
        };
        match index.get(&entry.record.submission_id) {
            Some(&i) => records[i] = entry.record,
            None => {
                index.insert(entry.record.submission_id.clone(), records.len());
                records.push(entry.record);
            }
        }
    }
    Ok(records)
}

/// Queue state as recorded in a journal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalSummary {
    pub stats: Vec<StatusCount>,
    pub total: usize,
    pub failed_submissions: Vec<FailedSubmission>,
}

/// Summarize a journal without a running queue.
pub fn summarize(path: &Path) -> Result<JournalSummary> {
    let records = replay(path)?;
    let stats = status_counts(|s| records.iter().filter(|r| r.status == s).count());
    let failed_submissions = records
        .iter()
        .filter(|r| r.status == SubmissionStatus::Failed)
        .map(FailedSubmission::from)
        .collect();
    Ok(JournalSummary {
        stats,
        total: records.len(),
        failed_submissions,
    })
}

/// Mark a failed submission as queued again, without a running queue.
///
/// The next `recover` from this journal picks it up.
pub fn retry_failed(path: &Path, submission_id: &str) -> Result<QueuedSubmission> {
    let mut record = replay(path)?
        .into_iter()
        .find(|r| r.submission_id == submission_id)
        .with_context(|| format!("submission not found in journal: {submission_id}"))?;
    if record.status != SubmissionStatus::Failed {
        anyhow::bail!(
            "submission {submission_id} is {}, only failed submissions can be retried",
            record.status
        );
    }
    record.status = SubmissionStatus::Queued;
    record.attempt_count = 0;
    record.updated_at = Utc::now();
    Journal::open(path)?.append(&record)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use examkit_core::model::SealedSubmission;
    use std::collections::BTreeMap;

    fn record(id: &str, status: SubmissionStatus) -> QueuedSubmission {
        let mut r = QueuedSubmission::new(
            id.into(),
            SealedSubmission {
                exam_id: "e".into(),
                student_id: id.into(),
                answers: BTreeMap::new(),
                final_score: 1.0,
                total_marks: 10.0,
                percentage: 10.0,
                correct_answers: 1,
                incorrect_answers: 0,
                unattempted: 9,
                time_taken: 100,
                completed_at: Utc::now(),
                integrity_hash: "00".into(),
            },
        );
        r.status = status;
        r
    }

    #[test]
    fn replay_keeps_last_record_per_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue/journal.jsonl");
        let journal = Journal::open(&path).unwrap();
        journal.append(&record("a", SubmissionStatus::Queued)).unwrap();
        journal.append(&record("b", SubmissionStatus::Queued)).unwrap();
        journal.append(&record("a", SubmissionStatus::Processing)).unwrap();
        journal.append(&record("a", SubmissionStatus::Completed)).unwrap();

        let records = replay(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].submission_id, "a");
        assert_eq!(records[0].status, SubmissionStatus::Completed);
        assert_eq!(records[1].status, SubmissionStatus::Queued);
    }

    #[test]
    fn replay_skips_torn_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        Journal::open(&path)
            .unwrap()
            .append(&record("a", SubmissionStatus::Queued))
            .unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"at\":\"2024-").unwrap();

        assert_eq!(replay(&path).unwrap().len(), 1);
        assert!(replay(&dir.path().join("missing.jsonl")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn writer_task_keeps_send_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let writer = Journal::open(&path).unwrap().into_writer();
        writer.append(&record("a", SubmissionStatus::Queued));
        writer.append(&record("b", SubmissionStatus::Queued));
        writer.append(&record("a", SubmissionStatus::Processing));
        writer.append(&record("a", SubmissionStatus::Failed));
        writer.flush().await;

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 4);
        let records = replay(&path).unwrap();
        assert_eq!(records[0].status, SubmissionStatus::Failed);
        assert_eq!(records[1].status, SubmissionStatus::Queued);
    }

    #[test]
    fn offline_summary_and_retry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let journal = Journal::open(&path).unwrap();
        journal.append(&record("ok", SubmissionStatus::Completed)).unwrap();
        let mut failed = record("bad", SubmissionStatus::Failed);
        failed.attempt_count = 3;
        journal.append(&failed).unwrap();

        let summary = summarize(&path).unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.failed_submissions.len(), 1);
        assert_eq!(summary.failed_submissions[0].submission_id, "bad");

        let retried = retry_failed(&path, "bad").unwrap();
        assert_eq!(retried.status, SubmissionStatus::Queued);
        assert_eq!(retried.attempt_count, 0);
        assert!(retry_failed(&path, "ok").is_err());
        assert!(retry_failed(&path, "nope").is_err());

        let summary = summarize(&path).unwrap();
        assert!(summary.failed_submissions.is_empty());
    }
}
