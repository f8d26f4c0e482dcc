//! Downstream persistence for queued submissions.
//!
//! Stores upsert by submission id, so a write replayed after a crash or a
//! retry never produces a duplicate row.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use examkit_core::model::SealedSubmission;

use crate::error::PersistError;
use crate::model::QueuedSubmission;

/// Where workers write submissions.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn persist(&self, record: &QueuedSubmission) -> Result<(), PersistError>;
}

/// In-memory store keyed by submission id.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<String, SealedSubmission>>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Distinct submissions stored.
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total successful writes, including overwrites.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn get(&self, submission_id: &str) -> Option<SealedSubmission> {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(submission_id)
            .cloned()
    }

    /// Every stored submission by one student for one exam.
    pub fn submissions_for(&self, student_id: &str, exam_id: &str) -> Vec<SealedSubmission> {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|s| s.student_id == student_id && s.exam_id == exam_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn persist(&self, record: &QueuedSubmission) -> Result<(), PersistError> {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.submission_id.clone(), record.payload.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRow {
    submission_id: String,
    reevaluated: bool,
    submission: SealedSubmission,
}

/// Append-only JSONL file; the last row for an id wins on load.
pub struct JsonlStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file back, collapsing rewrites of the same id.
    pub fn load(&self) -> Result<HashMap<String, SealedSubmission>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", self.path.display()))
            }
        };
        let mut rows = HashMap::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let row: StoredRow = serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid row", self.path.display(), n + 1))?;
            rows.insert(row.submission_id, row.submission);
        }
        Ok(rows)
    }
}

#[async_trait]
impl SubmissionStore for JsonlStore {
    async fn persist(&self, record: &QueuedSubmission) -> Result<(), PersistError> {
        let row = StoredRow {
            submission_id: record.submission_id.clone(),
            reevaluated: record.reevaluated,
            submission: record.payload.clone(),
        };
        let mut line =
            serde_json::to_string(&row).map_err(|e| PersistError::Permanent(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
