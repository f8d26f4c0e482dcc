//! TTL-keyed store for data scoring needs without a network round trip.
//!
//! Entries carry their own expiry instant, so expired data is simply never
//! returned and `cleanup` can run whenever convenient. A miss is not an
//! error: callers recompute or refetch.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    data: V,
    expires_at: Instant,
}

/// In-process TTL cache keyed by string.
#[derive(Debug, Clone)]
pub struct OfflineCacheManager<V> {
    entries: HashMap<String, CacheEntry<V>>,
}

impl<V: Clone> Default for OfflineCacheManager<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> OfflineCacheManager<V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Store `data` under `key` for `ttl`, replacing any previous entry.
    pub fn put(&mut self, key: impl Into<String>, data: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries
            .insert(key.into(), CacheEntry { data, expires_at });
    }

    /// Fetch unexpired data; `None` on a miss or after expiry.
    pub fn get(&self, key: &str) -> Option<V> {
        let entry = self.entries.get(key)?;
        if Instant::now() >= entry.expires_at {
            return None;
        }
        Some(entry.data.clone())
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn cleanup(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| now < e.expires_at);
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, "offline cache cleanup");
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored entries, including expired ones not yet cleaned up.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
