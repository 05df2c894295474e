//! Recall result cache.
//!
//! Insertion-ordered entries with a uniform TTL (milliseconds). When the
//! size crosses the high-water mark a single deferred cleanup task trims the
//! oldest entries back toward the low-water mark; `destroy` cancels any
//! pending cleanup and empties the cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::constants::defaults;

use super::RecallResult;

struct CacheEntry {
    result: RecallResult,
    inserted_at: Instant,
}

#[derive(Default)]
struct CacheMap {
    entries: HashMap<String, CacheEntry>,
    /// Insertion order, oldest first. May contain stale keys for entries
    /// that were refreshed; eviction skips those.
    order: Vec<String>,
}

struct CacheShared {
    map: Mutex<CacheMap>,
    ttl: Duration,
    high_water: usize,
    low_water: usize,
    cleanup_in_flight: AtomicBool,
    destroyed: AtomicBool,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

/// Concurrency-safe recall result cache.
pub struct RecallCache {
    shared: Arc<CacheShared>,
}

impl RecallCache {
    /// Create a cache with the given TTL (ms) and water marks.
    #[must_use]
    pub fn new(ttl_ms: u64, high_water: usize, low_water: usize) -> Self {
        Self {
            shared: Arc::new(CacheShared {
                map: Mutex::new(CacheMap::default()),
                ttl: Duration::from_millis(ttl_ms),
                high_water: high_water.max(1),
                low_water: low_water.min(high_water.saturating_sub(1)),
                cleanup_in_flight: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                cleanup_task: Mutex::new(None),
            }),
        }
    }

    /// Current entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.map.lock().entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch a live entry; entries past the TTL are evicted on read.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<RecallResult> {
        let mut map = self.shared.map.lock();
        match map.entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.shared.ttl => {
                Some(entry.result.clone())
            }
            Some(_) => {
                map.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert an entry and, when past the high-water mark, schedule the
    /// single deferred cleanup.
    pub fn put(&self, key: String, result: RecallResult) {
        if self.shared.destroyed.load(Ordering::SeqCst) {
            return;
        }
        let size = {
            let mut map = self.shared.map.lock();
            map.entries.insert(
                key.clone(),
                CacheEntry {
                    result,
                    inserted_at: Instant::now(),
                },
            );
            map.order.push(key);
            map.entries.len()
        };

        if size > self.shared.high_water {
            self.schedule_cleanup();
        }
    }

    fn schedule_cleanup(&self) {
        if self.shared.destroyed.load(Ordering::SeqCst) {
            return;
        }
        if self
            .shared
            .cleanup_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            // Deferred: give the current batch of inserts a chance to land.
            tokio::task::yield_now().await;
            if !shared.destroyed.load(Ordering::SeqCst) {
                let removed = cleanup(&shared);
                debug!(removed, "recall cache cleanup finished");
            }
            shared.cleanup_in_flight.store(false, Ordering::SeqCst);
        });
        *self.shared.cleanup_task.lock() = Some(handle);
    }

    /// Cancel any pending cleanup and empty the cache. Further puts are
    /// ignored.
    pub fn destroy(&self) {
        self.shared.destroyed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.shared.cleanup_task.lock().take() {
            handle.abort();
        }
        let mut map = self.shared.map.lock();
        map.entries.clear();
        map.order.clear();
    }
}

/// Remove `max(min_cleanup, size - low_water)` oldest entries.
fn cleanup(shared: &CacheShared) -> usize {
    let mut map = shared.map.lock();
    let size = map.entries.len();
    if size <= shared.low_water {
        return 0;
    }
    let target = (size - shared.low_water).max(defaults::RECALL_CACHE_MIN_CLEANUP);

    let mut removed = 0;
    let mut index = 0;
    while removed < target && index < map.order.len() {
        let key = map.order[index].clone();
        index += 1;
        if map.entries.remove(&key).is_some() {
            removed += 1;
        }
    }
    map.order.drain(0..index);
    removed
}

impl Drop for RecallCache {
    fn drop(&mut self) {
        if let Some(handle) = self.shared.cleanup_task.lock().take() {
            handle.abort();
        }
    }
}
