//! Read-path cache for "has this student already attempted this exam".
//!
//! Concurrent misses for the same key share one upstream fetch through an
//! in-flight map keyed like the cache itself. Entries expire after a TTL and
//! the oldest are evicted first once the size bound is reached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::AttemptsCacheSettings;
use crate::error::AttemptsError;
use crate::model::AttemptSummary;
use crate::traits::AttemptsSource;

type SharedFetch = Shared<BoxFuture<'static, Result<AttemptSummary, AttemptsError>>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    student_id: String,
    exam_id: String,
}

impl CacheKey {
    fn new(student_id: &str, exam_id: &str) -> Self {
        Self {
            student_id: student_id.to_string(),
            exam_id: exam_id.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: AttemptSummary,
    inserted_at: Instant,
    expires_at: Instant,
}

struct InFlight {
    id: u64,
    fetch: SharedFetch,
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptsCacheStats {
    pub hits: u64,
    /// Calls that started an upstream fetch.
    pub misses: u64,
    /// Calls that joined a fetch already in flight.
    pub coalesced: u64,
    pub evictions: u64,
    pub entries: usize,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    in_flight: HashMap<CacheKey, InFlight>,
    next_fetch_id: u64,
    stats: AttemptsCacheStats,
}

/// Deduplicating TTL cache in front of an [`AttemptsSource`].
pub struct AttemptsCacheManager {
    source: Arc<dyn AttemptsSource>,
    ttl: Duration,
    max_entries: usize,
    state: Mutex<CacheState>,
}

impl AttemptsCacheManager {
    /// Two-minute TTL, 500 entries.
    pub fn new(source: Arc<dyn AttemptsSource>) -> Self {
        Self::with_settings(source, &AttemptsCacheSettings::default())
    }

    pub fn with_settings(source: Arc<dyn AttemptsSource>, settings: &AttemptsCacheSettings) -> Self {
        Self {
            source,
            ttl: Duration::from_secs(settings.ttl_secs),
            max_entries: settings.max_entries.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached summary, or the result of exactly one shared upstream fetch.
    pub async fn get(
        &self,
        student_id: &str,
        exam_id: &str,
    ) -> Result<AttemptSummary, AttemptsError> {
        let key = CacheKey::new(student_id, exam_id);

        let (fetch_id, fetch) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let now = Instant::now();

            match state.entries.get(&key) {
                Some(entry) if now < entry.expires_at => {
                    state.stats.hits += 1;
                    return Ok(entry.data.clone());
                }
                Some(_) => {
                    state.entries.remove(&key);
                }
                None => {}
            }

            if let Some(in_flight) = state.in_flight.get(&key) {
                state.stats.coalesced += 1;
                (in_flight.id, in_flight.fetch.clone())
            } else {
                state.stats.misses += 1;
                state.next_fetch_id += 1;
                let id = state.next_fetch_id;
                let source = Arc::clone(&self.source);
                let (student, exam) = (student_id.to_string(), exam_id.to_string());
                let fetch = async move {
                    source
                        .fetch(&student, &exam)
                        .await
                        .map_err(|e| AttemptsError::Fetch(format!("{e:#}")))
                }
                .boxed()
                .shared();
                state.in_flight.insert(
                    key.clone(),
                    InFlight {
                        id,
                        fetch: fetch.clone(),
                    },
                );
                tracing::debug!(student_id, exam_id, "attempts cache miss, fetching");
                (id, fetch)
            }
        };

        let result = fetch.await;

        let mut guard = self.lock();
        let state = &mut *guard;
        // Only the first caller to finish settles the fetch, and only if no
        // invalidation replaced it meanwhile.
        if state.in_flight.get(&key).map(|f| f.id) == Some(fetch_id) {
            state.in_flight.remove(&key);
            match &result {
                Ok(data) => self.insert(state, key, data.clone()),
                Err(e) => tracing::warn!(student_id, exam_id, error = %e, "attempts fetch failed"),
            }
        }
        result
    }

    fn insert(&self, state: &mut CacheState, key: CacheKey, data: AttemptSummary) {
        let now = Instant::now();
        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_entries {
            state.entries.retain(|_, e| now < e.expires_at);
            while state.entries.len() >= self.max_entries {
                let oldest = state
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(k) => {
                        state.entries.remove(&k);
                        state.stats.evictions += 1;
                    }
                    None => break,
                }
            }
        }
        state.entries.insert(
            key,
            CacheEntry {
                data,
                inserted_at: now,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Drop the entry so the next `get` refetches.
    ///
    /// Call after a new sealed submission is recorded for this key. A fetch
    /// already in flight still answers its callers but is not cached.
    pub fn invalidate(&self, student_id: &str, exam_id: &str) {
        let key = CacheKey::new(student_id, exam_id);
        let mut state = self.lock();
        let removed = state.entries.remove(&key).is_some();
        state.in_flight.remove(&key);
        tracing::debug!(student_id, exam_id, removed, "attempts cache invalidated");
    }

    /// Drop every entry for a student.
    pub fn invalidate_student(&self, student_id: &str) {
        let mut state = self.lock();
        state.entries.retain(|k, _| k.student_id != student_id);
        state.in_flight.retain(|k, _| k.student_id != student_id);
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.in_flight.clear();
    }

    pub fn stats(&self) -> AttemptsCacheStats {
        let state = self.lock();
        AttemptsCacheStats {
            entries: state.entries.len(),
            ..state.stats
        }
    }
}
