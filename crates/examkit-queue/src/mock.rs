//! Test doubles for load simulation.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use examkit_core::model::AttemptSummary;
use examkit_core::traits::AttemptsSource;

use crate::error::PersistError;
use crate::model::QueuedSubmission;
use crate::store::{MemoryStore, SubmissionStore};

/// A store that fails a share of writes and tracks write concurrency.
///
/// Failures are transient and drawn from a seeded RNG, so a run is
/// reproducible for a given seed and submission order.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    sink: Option<Arc<dyn SubmissionStore>>,
    failure_rate: f64,
    latency: Duration,
    rng: Mutex<StdRng>,
    forced_failures: AtomicU32,
    calls: AtomicU64,
    failures: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FlakyStore {
    pub fn new(failure_rate: f64, latency: Duration, seed: u64) -> Self {
        Self {
            inner: Arc::new(MemoryStore::new()),
            sink: None,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            forced_failures: AtomicU32::new(0),
            calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// A store that never fails on its own.
    pub fn reliable(latency: Duration) -> Self {
        Self::new(0.0, latency, 0)
    }

    /// Forward every successful write to `sink` as well.
    pub fn with_sink(mut self, sink: Arc<dyn SubmissionStore>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Fail the next `n` writes regardless of the failure rate.
    pub fn fail_next(&self, n: u32) {
        self.forced_failures.store(n, Ordering::SeqCst);
    }

    /// Successfully written submissions.
    pub fn stored(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.inner)
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Most writes ever observed in progress at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn should_fail(&self) -> bool {
        let forced = self
            .forced_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            return true;
        }
        if self.failure_rate <= 0.0 {
            return false;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.gen_bool(self.failure_rate)
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SubmissionStore for FlakyStore {
    async fn persist(&self, record: &QueuedSubmission) -> Result<(), PersistError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.should_fail() {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(PersistError::Transient("connection pool timeout".into()));
        }
        if let Some(sink) = &self.sink {
            sink.persist(record).await?;
        }
        self.inner.persist(record).await
    }
}

/// Attempts source answering from a [`MemoryStore`], counting its fetches.
pub struct StoreAttempts {
    store: Arc<MemoryStore>,
    fetches: AtomicU64,
}

impl StoreAttempts {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            fetches: AtomicU64::new(0),
        }
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AttemptsSource for StoreAttempts {
    async fn fetch(&self, student_id: &str, exam_id: &str) -> anyhow::Result<AttemptSummary> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let rows = self.store.submissions_for(student_id, exam_id);
        Ok(AttemptSummary {
            student_id: student_id.to_string(),
            exam_id: exam_id.to_string(),
            attempted: !rows.is_empty(),
            attempt_count: rows.len() as u32,
            best_score: rows.iter().map(|s| s.final_score).reduce(f64::max),
            last_attempt_at: rows.iter().map(|s| s.completed_at).max(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use examkit_core::model::SealedSubmission;
    use std::collections::BTreeMap;

    fn record(id: &str) -> QueuedSubmission {
        QueuedSubmission::new(
            id.into(),
            SealedSubmission {
                exam_id: "e".into(),
                student_id: "s".into(),
                answers: BTreeMap::new(),
                final_score: 1.0,
                total_marks: 10.0,
                percentage: 10.0,
                correct_answers: 1,
                incorrect_answers: 0,
                unattempted: 0,
                time_taken: 100,
                completed_at: Utc::now(),
                integrity_hash: "00".into(),
            },
        )
    }

    #[tokio::test]
    async fn forced_failures_come_first() {
        let store = FlakyStore::reliable(Duration::ZERO);
        store.fail_next(2);
        assert!(store.persist(&record("a")).await.is_err());
        assert!(store.persist(&record("a")).await.is_err());
        assert!(store.persist(&record("a")).await.is_ok());
        assert_eq!(store.calls(), 3);
        assert_eq!(store.failures(), 2);
        assert_eq!(store.stored().len(), 1);
    }

    #[tokio::test]
    async fn same_seed_same_failures() {
        let a = FlakyStore::new(0.5, Duration::ZERO, 42);
        let b = FlakyStore::new(0.5, Duration::ZERO, 42);
        for i in 0..40 {
            let id = format!("r{i}");
            assert_eq!(
                a.persist(&record(&id)).await.is_ok(),
                b.persist(&record(&id)).await.is_ok()
            );
        }
        assert!(a.failures() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tracks_peak_concurrency() {
        let store = FlakyStore::reliable(Duration::from_millis(10));
        let records: Vec<_> = (0..5).map(|i| record(&format!("r{i}"))).collect();
        futures::future::join_all(records.iter().map(|r| store.persist(r))).await;
        assert_eq!(store.peak_in_flight(), 5);
    }

    #[tokio::test]
    async fn sink_sees_only_successful_writes() {
        let sink = Arc::new(MemoryStore::new());
        let store = FlakyStore::reliable(Duration::ZERO).with_sink(sink.clone());
        store.fail_next(1);
        assert!(store.persist(&record("a")).await.is_err());
        assert!(store.persist(&record("a")).await.is_ok());
        assert_eq!(sink.writes(), 1);
        assert!(sink.get("a").is_some());
    }
}
