//! Queue records and the monitoring surface.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use examkit_core::model::SealedSubmission;
use examkit_core::validation::ValidationFlag;

/// Lifecycle of a queued submission.
///
/// `queued → processing → completed | failed`, with
/// `processing → retrying → processing` on transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Queued,
    Processing,
    Retrying,
    Completed,
    Failed,
    /// Withdrawn before a worker picked it up.
    Cancelled,
}

impl SubmissionStatus {
    pub const ALL: [SubmissionStatus; 6] = [
        SubmissionStatus::Queued,
        SubmissionStatus::Processing,
        SubmissionStatus::Retrying,
        SubmissionStatus::Completed,
        SubmissionStatus::Failed,
        SubmissionStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubmissionStatus::Completed | SubmissionStatus::Failed | SubmissionStatus::Cancelled
        )
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubmissionStatus::Queued => "queued",
            SubmissionStatus::Processing => "processing",
            SubmissionStatus::Retrying => "retrying",
            SubmissionStatus::Completed => "completed",
            SubmissionStatus::Failed => "failed",
            SubmissionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One failed persistence attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogEntry {
    pub attempt: u32,
    pub at: DateTime<Utc>,
    pub error: String,
}

/// A sealed submission plus its queue bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedSubmission {
    /// Idempotency key.
    pub submission_id: String,
    pub payload: SealedSubmission,
    pub status: SubmissionStatus,
    /// Failed persistence attempts so far.
    pub attempt_count: u32,
    #[serde(default)]
    pub error_log: Vec<ErrorLogEntry>,
    #[serde(default)]
    pub flags: Vec<ValidationFlag>,
    /// Score was recomputed server-side after an integrity mismatch.
    #[serde(default)]
    pub reevaluated: bool,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueuedSubmission {
    pub fn new(submission_id: String, payload: SealedSubmission) -> Self {
        let now = Utc::now();
        Self {
            submission_id,
            payload,
            status: SubmissionStatus::Queued,
            attempt_count: 0,
            error_log: Vec::new(),
            flags: Vec::new(),
            reevaluated: false,
            enqueued_at: now,
            updated_at: now,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.error_log.last().map(|e| e.error.as_str())
    }
}

/// Count of submissions in one status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: SubmissionStatus,
    pub count: usize,
}

/// Per-worker metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub worker_id: String,
    pub is_processing: bool,
    pub processed_count: u64,
    pub error_count: u64,
    /// Mean persistence time in milliseconds.
    pub average_processing_time: f64,
    pub started_at: DateTime<Utc>,
    /// Seconds since the worker started.
    pub uptime: u64,
}

/// Result of `get_stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub stats: Vec<StatusCount>,
    pub total: usize,
    /// Highest number of submissions seen in `processing` at once.
    pub peak_processing: usize,
    pub workers: Vec<WorkerStats>,
}

impl QueueStats {
    pub fn count(&self, status: SubmissionStatus) -> usize {
        self.stats
            .iter()
            .find(|c| c.status == status)
            .map(|c| c.count)
            .unwrap_or(0)
    }
}

/// A failed submission awaiting manual retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedSubmission {
    pub submission_id: String,
    pub exam_id: String,
    pub student_id: String,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&QueuedSubmission> for FailedSubmission {
    fn from(r: &QueuedSubmission) -> Self {
        Self {
            submission_id: r.submission_id.clone(),
            exam_id: r.payload.exam_id.clone(),
            student_id: r.payload.student_id.clone(),
            attempt_count: r.attempt_count,
            last_error: r.last_error().map(str::to_string),
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueView {
    pub stats: Vec<StatusCount>,
    pub failed_submissions: Vec<FailedSubmission>,
}

/// Monitoring payload: queue counts, failures awaiting action, workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSnapshot {
    pub queue: QueueView,
    pub workers: Vec<WorkerStats>,
    pub peak_processing: usize,
}

/// Build a full status table from per-status counts.
pub(crate) fn status_counts(mut count: impl FnMut(SubmissionStatus) -> usize) -> Vec<StatusCount> {
    SubmissionStatus::ALL
        .iter()
        .map(|&status| StatusCount {
            status,
            count: count(status),
        })
        .collect()
}
