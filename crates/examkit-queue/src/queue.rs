//! The submission queue and its worker pool.
//!
//! Queue state lives behind one lock: the records, the ready list and the
//! per-status counts. Workers claim a ready submission, persist it outside
//! the lock, then settle the outcome. A failed write is rescheduled by a
//! timer task after a backoff delay; a submission that runs out of attempts
//! stays `failed` until someone calls [`SubmissionQueueService::retry`].

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use examkit_core::config::QueueSettings;
use examkit_core::integrity::IntegrityKey;
use examkit_core::model::SealedSubmission;
use examkit_core::scoring::reseal;
use examkit_core::traits::SchemeSource;
use examkit_core::validation::{validate_submission, ValidationFlag};

use crate::backoff::Backoff;
use crate::error::{PersistError, QueueError};
use crate::journal::{self, Journal, JournalWriter};
use crate::listener::QueueListener;
use crate::model::{
    status_counts, ErrorLogEntry, FailedSubmission, MonitoringSnapshot, QueueStats, QueueView,
    QueuedSubmission, SubmissionStatus, WorkerStats,
};
use crate::store::SubmissionStore;

/// Configuration for the submission queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Worker pool size.
    pub workers: usize,
    /// Failed writes allowed before a submission is marked failed.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Terminal submissions older than this are purged.
    pub retention: Duration,
    /// Tolerance for numeric answers when re-evaluating a submission.
    pub numeric_tolerance: f64,
    /// Seed for backoff jitter; from entropy when unset.
    pub seed: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::from(&QueueSettings::default())
    }
}

impl From<&QueueSettings> for QueueConfig {
    fn from(s: &QueueSettings) -> Self {
        Self {
            workers: s.workers.max(1),
            max_attempts: s.max_attempts.max(1),
            backoff: Backoff::from(s),
            retention: Duration::from_secs(s.retention_secs),
            numeric_tolerance: 0.01,
            seed: None,
        }
    }
}

/// What `enqueue` did with a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    Enqueued {
        submission_id: String,
        flags: Vec<ValidationFlag>,
        /// The client score was replaced by a server-side re-evaluation.
        reevaluated: bool,
    },
    /// The id is already queued, in flight or completed; nothing changed.
    Duplicate {
        submission_id: String,
        status: SubmissionStatus,
    },
}

impl EnqueueOutcome {
    pub fn submission_id(&self) -> &str {
        match self {
            EnqueueOutcome::Enqueued { submission_id, .. }
            | EnqueueOutcome::Duplicate { submission_id, .. } => submission_id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, EnqueueOutcome::Duplicate { .. })
    }
}

#[derive(Default)]
struct QueueState {
    records: HashMap<String, QueuedSubmission>,
    ready: VecDeque<String>,
    counts: HashMap<SubmissionStatus, usize>,
    settled_at: HashMap<String, Instant>,
    peak_processing: usize,
    shutting_down: bool,
}

impl QueueState {
    fn count(&self, status: SubmissionStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    /// Submissions not yet in a terminal state.
    fn active(&self) -> usize {
        self.count(SubmissionStatus::Queued)
            + self.count(SubmissionStatus::Processing)
            + self.count(SubmissionStatus::Retrying)
    }

    fn insert(&mut self, record: QueuedSubmission) {
        *self.counts.entry(record.status).or_default() += 1;
        if record.status.is_terminal() {
            self.settled_at
                .insert(record.submission_id.clone(), Instant::now());
        }
        self.records.insert(record.submission_id.clone(), record);
    }

    fn remove(&mut self, id: &str) -> Option<QueuedSubmission> {
        let record = self.records.remove(id)?;
        if let Some(n) = self.counts.get_mut(&record.status) {
            *n = n.saturating_sub(1);
        }
        self.settled_at.remove(id);
        Some(record)
    }

    fn set_status(&mut self, id: &str, status: SubmissionStatus) -> Option<&mut QueuedSubmission> {
        let record = self.records.get_mut(id)?;
        if let Some(n) = self.counts.get_mut(&record.status) {
            *n = n.saturating_sub(1);
        }
        *self.counts.entry(status).or_default() += 1;
        if status.is_terminal() {
            self.settled_at.insert(id.to_string(), Instant::now());
        } else {
            self.settled_at.remove(id);
        }
        record.status = status;
        record.updated_at = Utc::now();
        Some(record)
    }

    /// Take the next ready submission and mark it processing.
    fn claim(&mut self) -> Option<QueuedSubmission> {
        while let Some(id) = self.ready.pop_front() {
            let ready = self.records.get(&id).is_some_and(|r| {
                matches!(r.status, SubmissionStatus::Queued | SubmissionStatus::Retrying)
            });
            if !ready {
                continue;
            }
            let record = self.set_status(&id, SubmissionStatus::Processing)?.clone();
            self.peak_processing = self
                .peak_processing
                .max(self.count(SubmissionStatus::Processing));
            return Some(record);
        }
        None
    }
}

struct WorkerSlot {
    worker_id: String,
    started_at: DateTime<Utc>,
    started: Instant,
    is_processing: bool,
    processed_count: u64,
    error_count: u64,
    busy_ms: f64,
}

impl WorkerSlot {
    fn new(index: usize) -> Self {
        Self {
            worker_id: format!("worker-{index}"),
            started_at: Utc::now(),
            started: Instant::now(),
            is_processing: false,
            processed_count: 0,
            error_count: 0,
            busy_ms: 0.0,
        }
    }

    fn stats(&self) -> WorkerStats {
        let attempts = self.processed_count + self.error_count;
        WorkerStats {
            worker_id: self.worker_id.clone(),
            is_processing: self.is_processing,
            processed_count: self.processed_count,
            error_count: self.error_count,
            average_processing_time: if attempts == 0 {
                0.0
            } else {
                self.busy_ms / attempts as f64
            },
            started_at: self.started_at,
            uptime: self.started.elapsed().as_secs(),
        }
    }
}

enum Settled {
    Completed(QueuedSubmission),
    Retrying(QueuedSubmission, Duration),
    Failed(QueuedSubmission),
}

struct Inner {
    state: Mutex<QueueState>,
    wake: Notify,
    active: watch::Sender<usize>,
    store: Arc<dyn SubmissionStore>,
    journal: Option<JournalWriter>,
    listeners: Vec<Arc<dyn QueueListener>>,
    key: IntegrityKey,
    schemes: Option<Arc<dyn SchemeSource>>,
    config: QueueConfig,
    rng: Mutex<StdRng>,
    workers: Vec<Mutex<WorkerSlot>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slot(&self, index: usize) -> MutexGuard<'_, WorkerSlot> {
        self.workers[index]
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Queue the journal line and publish the active count. The line is
    /// sent while the state lock is held, so the journal sees transitions in
    /// lock order; the disk write happens on the writer task.
    fn record_transition(&self, state: &QueueState, record: &QueuedSubmission) {
        if let Some(journal) = &self.journal {
            journal.append(record);
        }
        self.active.send_replace(state.active());
    }

    async fn flush_journal(&self) {
        if let Some(journal) = &self.journal {
            journal.flush().await;
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        self.config.backoff.delay(attempt, &mut *rng)
    }

    fn settle(&self, id: &str, result: Result<(), PersistError>) -> Option<Settled> {
        let mut state = self.lock();
        let settled = match result {
            Ok(()) => {
                let record = state.set_status(id, SubmissionStatus::Completed)?.clone();
                Settled::Completed(record)
            }
            Err(e) => {
                let record = state.records.get_mut(id)?;
                record.attempt_count += 1;
                record.error_log.push(ErrorLogEntry {
                    attempt: record.attempt_count,
                    at: Utc::now(),
                    error: e.to_string(),
                });
                let attempt = record.attempt_count;
                if e.is_permanent() || attempt >= self.config.max_attempts {
                    let record = state.set_status(id, SubmissionStatus::Failed)?.clone();
                    Settled::Failed(record)
                } else {
                    let record = state.set_status(id, SubmissionStatus::Retrying)?.clone();
                    Settled::Retrying(record, self.backoff_delay(attempt))
                }
            }
        };
        let record = match &settled {
            Settled::Completed(r) | Settled::Retrying(r, _) | Settled::Failed(r) => r,
        };
        self.record_transition(&state, record);
        Some(settled)
    }

    fn purge_terminal(&self, older_than: Duration) -> usize {
        let mut state = self.lock();
        let expired: Vec<String> = state
            .settled_at
            .iter()
            .filter(|(_, at)| at.elapsed() >= older_than)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            state.remove(id);
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "purged terminal submissions");
        }
        expired.len()
    }
}

async fn run_worker(inner: Arc<Inner>, index: usize) {
    let worker_id = inner.slot(index).worker_id.clone();
    tracing::debug!(%worker_id, "worker started");

    loop {
        let notified = inner.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let claimed = {
            let mut state = inner.lock();
            if state.shutting_down {
                break;
            }
            let claimed = state.claim();
            if let Some(record) = &claimed {
                inner.record_transition(&state, record);
            }
            claimed
        };
        let Some(record) = claimed else {
            notified.await;
            continue;
        };

        let id = record.submission_id.clone();
        let attempt = record.attempt_count + 1;
        tracing::debug!(%worker_id, submission_id = %id, attempt, "persisting submission");
        inner.slot(index).is_processing = true;

        let started = Instant::now();
        let result = inner.store.persist(&record).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        {
            let mut slot = inner.slot(index);
            slot.is_processing = false;
            slot.busy_ms += elapsed_ms;
            if result.is_ok() {
                slot.processed_count += 1;
            } else {
                slot.error_count += 1;
            }
        }

        match inner.settle(&id, result) {
            Some(Settled::Completed(record)) => {
                tracing::debug!(%worker_id, submission_id = %id, "submission persisted");
                for l in &inner.listeners {
                    l.on_completed(&record);
                }
            }
            Some(Settled::Retrying(record, delay)) => {
                tracing::warn!(
                    %worker_id,
                    submission_id = %id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = record.last_error().unwrap_or_default(),
                    "persist failed, retry scheduled"
                );
                for l in &inner.listeners {
                    l.on_retry_scheduled(&record, delay);
                }
                schedule_retry(&inner, id, delay);
            }
            Some(Settled::Failed(record)) => {
                tracing::error!(
                    %worker_id,
                    submission_id = %id,
                    attempts = record.attempt_count,
                    error = record.last_error().unwrap_or_default(),
                    "submission failed, manual retry required"
                );
                for l in &inner.listeners {
                    l.on_failed(&record);
                }
            }
            None => tracing::warn!(submission_id = %id, "submission vanished while processing"),
        }
    }

    tracing::debug!(%worker_id, "worker stopped");
}

fn schedule_retry(inner: &Arc<Inner>, id: String, delay: Duration) {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let requeued = {
            let mut state = inner.lock();
            let retrying = state
                .records
                .get(&id)
                .is_some_and(|r| r.status == SubmissionStatus::Retrying);
            if retrying {
                state.ready.push_back(id);
            }
            retrying
        };
        if requeued {
            inner.wake.notify_one();
        }
    });
}

fn spawn_sweeper(inner: Arc<Inner>) -> JoinHandle<()> {
    let retention = inner.config.retention;
    let period = (retention / 4).clamp(Duration::from_secs(1), Duration::from_secs(3600));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            interval.tick().await;
            inner.purge_terminal(retention);
        }
    })
}

/// Builder for [`SubmissionQueueService`].
pub struct QueueBuilder {
    store: Arc<dyn SubmissionStore>,
    key: IntegrityKey,
    config: QueueConfig,
    schemes: Option<Arc<dyn SchemeSource>>,
    listeners: Vec<Arc<dyn QueueListener>>,
    journal_path: Option<PathBuf>,
}

impl QueueBuilder {
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Marking schemes for re-evaluating submissions whose hash does not verify.
    pub fn schemes(mut self, schemes: Arc<dyn SchemeSource>) -> Self {
        self.schemes = Some(schemes);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn QueueListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Journal every transition to this JSONL file.
    pub fn journal(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal_path = Some(path.into());
        self
    }

    /// Start with an empty queue.
    pub fn start(self) -> Result<SubmissionQueueService, QueueError> {
        let journal = self.open_journal()?;
        Ok(self.launch(journal, Vec::new()))
    }

    /// Rebuild the queue from the journal, then start.
    ///
    /// Submissions that were queued, processing or retrying when the journal
    /// was last written go back to `queued`. Stores upsert by id, so a write
    /// that did land before the crash is harmless to repeat.
    pub fn recover(self) -> Result<SubmissionQueueService, QueueError> {
        let path = self
            .journal_path
            .clone()
            .ok_or_else(|| QueueError::Journal("recovery needs a journal path".into()))?;
        let mut records =
            journal::replay(&path).map_err(|e| QueueError::Journal(format!("{e:#}")))?;
        let journal = self.open_journal()?;

        let mut requeued = 0usize;
        for record in &mut records {
            if !record.status.is_terminal() {
                record.status = SubmissionStatus::Queued;
                record.updated_at = Utc::now();
                if let Some(journal) = &journal {
                    journal
                        .append(record)
                        .map_err(|e| QueueError::Journal(format!("{e:#}")))?;
                }
                requeued += 1;
            }
        }
        tracing::info!(
            path = %path.display(),
            records = records.len(),
            requeued,
            "queue recovered from journal"
        );
        Ok(self.launch(journal, records))
    }

    fn open_journal(&self) -> Result<Option<Journal>, QueueError> {
        self.journal_path
            .as_ref()
            .map(Journal::open)
            .transpose()
            .map_err(|e| QueueError::Journal(format!("{e:#}")))
    }

    fn launch(self, journal: Option<Journal>, records: Vec<QueuedSubmission>) -> SubmissionQueueService {
        let mut state = QueueState::default();
        for record in records {
            if record.status == SubmissionStatus::Queued {
                state.ready.push_back(record.submission_id.clone());
            }
            state.insert(record);
        }
        let (active, active_rx) = watch::channel(state.active());

        let rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let worker_count = self.config.workers.max(1);
        let inner = Arc::new(Inner {
            state: Mutex::new(state),
            wake: Notify::new(),
            active,
            store: self.store,
            journal: journal.map(Journal::into_writer),
            listeners: self.listeners,
            key: self.key,
            schemes: self.schemes,
            config: self.config,
            rng: Mutex::new(rng),
            workers: (0..worker_count).map(|i| Mutex::new(WorkerSlot::new(i))).collect(),
        });

        let workers = (0..worker_count)
            .map(|i| tokio::spawn(run_worker(Arc::clone(&inner), i)))
            .collect();
        let sweeper = spawn_sweeper(Arc::clone(&inner));
        tracing::info!(
            workers = worker_count,
            max_attempts = inner.config.max_attempts,
            "submission queue started"
        );

        SubmissionQueueService {
            inner,
            workers: Mutex::new(workers),
            sweeper,
            active_rx,
        }
    }
}

/// Server-side submission queue with a bounded worker pool.
pub struct SubmissionQueueService {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    sweeper: JoinHandle<()>,
    active_rx: watch::Receiver<usize>,
}

impl SubmissionQueueService {
    pub fn builder(store: Arc<dyn SubmissionStore>, key: IntegrityKey) -> QueueBuilder {
        QueueBuilder {
            store,
            key,
            config: QueueConfig::default(),
            schemes: None,
            listeners: Vec::new(),
            journal_path: None,
        }
    }

    /// Validate, integrity-check and queue a sealed submission.
    ///
    /// Idempotent on the submission id: while a submission with the same id
    /// is queued, in flight or completed, this returns `Duplicate` and changes
    /// nothing. A failed or cancelled id is queued afresh.
    pub fn enqueue(&self, submission: SealedSubmission) -> Result<EnqueueOutcome, QueueError> {
        let report = validate_submission(&submission)?;
        let submission_id = submission.submission_id();

        let (payload, reevaluated) = match self.inner.key.verify(&submission) {
            Ok(()) => (submission, false),
            Err(e) => {
                let scheme = self
                    .inner
                    .schemes
                    .as_ref()
                    .and_then(|s| s.scheme(&submission.exam_id));
                let Some(scheme) = scheme else {
                    tracing::warn!(%submission_id, error = %e, "integrity check failed, no scheme to re-evaluate");
                    return Err(e.into());
                };
                let resealed = reseal(
                    &submission,
                    &scheme,
                    self.inner.config.numeric_tolerance,
                    &self.inner.key,
                );
                tracing::warn!(
                    %submission_id,
                    error = %e,
                    claimed_score = submission.final_score,
                    recomputed_score = resealed.final_score,
                    "integrity check failed, re-evaluated from raw answers"
                );
                (resealed, true)
            }
        };

        let mut record = QueuedSubmission::new(submission_id.clone(), payload);
        record.flags = report.flags.clone();
        record.reevaluated = reevaluated;

        {
            let mut state = self.inner.lock();
            if state.shutting_down {
                return Err(QueueError::ShutDown);
            }
            if let Some(existing) = state.records.get(&submission_id) {
                if !matches!(
                    existing.status,
                    SubmissionStatus::Failed | SubmissionStatus::Cancelled
                ) {
                    tracing::debug!(%submission_id, status = %existing.status, "duplicate enqueue ignored");
                    return Ok(EnqueueOutcome::Duplicate {
                        submission_id,
                        status: existing.status,
                    });
                }
            }
            state.remove(&submission_id);
            state.insert(record.clone());
            state.ready.push_back(submission_id.clone());
            self.inner.record_transition(&state, &record);
        }
        self.inner.wake.notify_one();

        tracing::info!(%submission_id, reevaluated, flagged = report.is_flagged(), "submission enqueued");
        for l in &self.inner.listeners {
            l.on_enqueued(&record);
        }
        Ok(EnqueueOutcome::Enqueued {
            submission_id,
            flags: report.flags,
            reevaluated,
        })
    }

    /// Put a failed submission back in the queue with a fresh attempt budget.
    pub fn retry(&self, submission_id: &str) -> Result<(), QueueError> {
        {
            let mut state = self.inner.lock();
            if state.shutting_down {
                return Err(QueueError::ShutDown);
            }
            let status = state
                .records
                .get(submission_id)
                .map(|r| r.status)
                .ok_or_else(|| QueueError::NotFound(submission_id.to_string()))?;
            if status != SubmissionStatus::Failed {
                return Err(QueueError::InvalidState {
                    id: submission_id.to_string(),
                    status,
                    expected: SubmissionStatus::Failed,
                });
            }
            let record = state
                .set_status(submission_id, SubmissionStatus::Queued)
                .map(|r| {
                    r.attempt_count = 0;
                    r.clone()
                })
                .ok_or_else(|| QueueError::NotFound(submission_id.to_string()))?;
            state.ready.push_back(submission_id.to_string());
            self.inner.record_transition(&state, &record);
        }
        self.inner.wake.notify_one();
        tracing::info!(%submission_id, "manual retry queued");
        Ok(())
    }

    /// Withdraw a submission that no worker has picked up yet.
    pub fn cancel(&self, submission_id: &str) -> Result<(), QueueError> {
        let mut state = self.inner.lock();
        let status = state
            .records
            .get(submission_id)
            .map(|r| r.status)
            .ok_or_else(|| QueueError::NotFound(submission_id.to_string()))?;
        if status != SubmissionStatus::Queued {
            return Err(QueueError::InvalidState {
                id: submission_id.to_string(),
                status,
                expected: SubmissionStatus::Queued,
            });
        }
        state.ready.retain(|id| id != submission_id);
        let record = state
            .set_status(submission_id, SubmissionStatus::Cancelled)
            .map(|r| r.clone())
            .ok_or_else(|| QueueError::NotFound(submission_id.to_string()))?;
        self.inner.record_transition(&state, &record);
        tracing::info!(%submission_id, "submission cancelled");
        Ok(())
    }

    pub fn get(&self, submission_id: &str) -> Option<QueuedSubmission> {
        self.inner.lock().records.get(submission_id).cloned()
    }

    /// Counts per status plus per-worker metrics.
    pub fn get_stats(&self) -> QueueStats {
        let (stats, total, peak_processing) = {
            let state = self.inner.lock();
            (
                status_counts(|s| state.count(s)),
                state.records.len(),
                state.peak_processing,
            )
        };
        QueueStats {
            stats,
            total,
            peak_processing,
            workers: self.worker_stats(),
        }
    }

    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        (0..self.inner.workers.len())
            .map(|i| self.inner.slot(i).stats())
            .collect()
    }

    /// Failed submissions awaiting manual retry, oldest first.
    pub fn failed_submissions(&self) -> Vec<FailedSubmission> {
        let state = self.inner.lock();
        let mut failed: Vec<FailedSubmission> = state
            .records
            .values()
            .filter(|r| r.status == SubmissionStatus::Failed)
            .map(FailedSubmission::from)
            .collect();
        failed.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.submission_id.cmp(&b.submission_id))
        });
        failed
    }

    pub fn monitoring(&self) -> MonitoringSnapshot {
        let stats = self.get_stats();
        MonitoringSnapshot {
            queue: QueueView {
                stats: stats.stats,
                failed_submissions: self.failed_submissions(),
            },
            workers: stats.workers,
            peak_processing: stats.peak_processing,
        }
    }

    /// Drop terminal submissions settled at least `older_than` ago.
    pub fn purge_terminal(&self, older_than: Duration) -> usize {
        self.inner.purge_terminal(older_than)
    }

    /// Resolve once nothing is queued, processing or retrying and the
    /// journal has caught up.
    pub async fn wait_idle(&self) {
        let mut rx = self.active_rx.clone();
        let _ = rx.wait_for(|active| *active == 0).await;
        self.inner.flush_journal().await;
    }

    /// Stop accepting work and wait for workers to finish their current write.
    pub async fn shutdown(&self) {
        self.inner.lock().shutting_down = true;
        self.inner.wake.notify_waiters();
        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for worker in workers {
            let _ = worker.await;
        }
        self.sweeper.abort();
        self.inner.flush_journal().await;
        tracing::info!("submission queue stopped");
    }
}

impl Drop for SubmissionQueueService {
    fn drop(&mut self) {
        self.inner.lock().shutting_down = true;
        self.inner.wake.notify_waiters();
        self.sweeper.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> QueuedSubmission {
        QueuedSubmission::new(
            id.into(),
            SealedSubmission {
                exam_id: "e".into(),
                student_id: id.into(),
                answers: Default::default(),
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
        )
    }

    #[tokio::test]
    async fn state_counts_follow_transitions() {
        let mut state = QueueState::default();
        state.insert(record("a"));
        state.insert(record("b"));
        state.ready.extend(["a".to_string(), "b".to_string()]);
        assert_eq!(state.active(), 2);

        let claimed = state.claim().unwrap();
        assert_eq!(claimed.submission_id, "a");
        assert_eq!(state.count(SubmissionStatus::Processing), 1);
        assert_eq!(state.peak_processing, 1);

        state.set_status("a", SubmissionStatus::Completed);
        assert_eq!(state.count(SubmissionStatus::Processing), 0);
        assert_eq!(state.count(SubmissionStatus::Completed), 1);
        assert!(state.settled_at.contains_key("a"));
        assert_eq!(state.active(), 1);

        state.remove("a");
        assert_eq!(state.count(SubmissionStatus::Completed), 0);
        assert!(state.settled_at.is_empty());
    }

    #[tokio::test]
    async fn claim_skips_withdrawn_ids() {
        let mut state = QueueState::default();
        state.insert(record("a"));
        state.ready.push_back("a".into());
        state.ready.push_back("ghost".into());
        state.set_status("a", SubmissionStatus::Cancelled);
        assert!(state.claim().is_none());
        assert!(state.ready.is_empty());
    }
}
