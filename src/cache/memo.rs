//! Remote Content Memo
//!
//! Bounded in-memory cache of content read from the remote store, using Moka.
//! Remote content is addressed by its own hash, so entries never go stale;
//! the TTL only bounds memory held by rarely read ids.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::sync::Cache;
use serde::Serialize;
use tracing::{debug, trace};

const DEFAULT_CAPACITY: u64 = 1_000;
const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoStats {
    pub hits: u64,
    pub misses: u64,
    /// Approximate; moka applies pending inserts lazily
    pub entries: u64,
}

pub struct ContentMemo {
    /// Payloads by remote content identifier
    entries: Cache<String, String>,
    /// Cache hit counter
    hits: AtomicU64,
    /// Cache miss counter
    misses: AtomicU64,
}

impl ContentMemo {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    /// # Arguments
    /// * `capacity` - Maximum number of memoized payloads
    /// * `ttl` - Time after insertion at which an entry is dropped
    pub fn with_limits(capacity: u64, ttl: Duration) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .name("remote_content_memo")
            .build();

        Self {
            entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, cid: &str) -> Option<String> {
        match self.entries.get(cid) {
            Some(payload) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(cid = cid, "Memo HIT");
                Some(payload)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(cid = cid, "Memo MISS");
                None
            }
        }
    }

    pub fn insert(&self, cid: &str, payload: &str) {
        self.entries.insert(cid.to_string(), payload.to_string());
        debug!(cid = cid, size = payload.len(), "Memoized remote content");
    }

    /// Hit and miss counts since startup, reported by `Orchestrator::status`
    pub fn stats(&self) -> MemoStats {
        MemoStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.entry_count(),
        }
    }
}

impl Default for ContentMemo {
    fn default() -> Self {
        Self::new()
    }
}
