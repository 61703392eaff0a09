//! Store statistics and flush health.
//!
//! Counters are updated by the write path, the flusher and the lookup
//! path. They are the only way a caller learns that the background flusher
//! dropped data, since `append` returns before chunks reach disk.
//!
//! ```rust,ignore
//! let stats = store.stats();
//! println!("flushed: {}", stats.flushed_chunks);
//! if store.health().is_degraded() {
//!     eprintln!("flusher lost data: {:?}", store.health().last_error);
//! }
//! ```

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Store counters.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct StoreStats {
    // Write path
    appends: AtomicU64,
    bytes_appended: AtomicU64,
    flushed_chunks: AtomicU64,
    flushed_batches: AtomicU64,
    bytes_flushed: AtomicU64,
    flush_failures: AtomicU64,
    dropped_chunks: AtomicU64,
    rolls: AtomicU64,
    roll_failures: AtomicU64,

    // Read path
    queries: AtomicU64,
    deletes: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    evictions: AtomicU64,
    load_failures: AtomicU64,

    last_error: Mutex<Option<String>>,
}

impl StoreStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_append(&self, bytes: u64) {
        self.appends.fetch_add(1, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self, chunks: u64, bytes: u64) {
        self.flushed_batches.fetch_add(1, Ordering::Relaxed);
        self.flushed_chunks.fetch_add(chunks, Ordering::Relaxed);
        self.bytes_flushed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_flush_failure(&self, error: &dyn std::fmt::Display) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
        self.set_last_error(error);
    }

    pub(crate) fn record_dropped(&self, chunks: u64) {
        self.dropped_chunks.fetch_add(chunks, Ordering::Relaxed);
    }

    pub(crate) fn record_roll(&self) {
        self.rolls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_roll_failure(&self, error: &dyn std::fmt::Display) {
        self.roll_failures.fetch_add(1, Ordering::Relaxed);
        self.set_last_error(error);
    }

    pub(crate) fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load_failure(&self, error: &dyn std::fmt::Display) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
        self.set_last_error(error);
    }

    fn set_last_error(&self, error: &dyn std::fmt::Display) {
        *self.last_error.lock() = Some(error.to_string());
    }

    /// Returns the total number of accepted appends.
    pub fn appends(&self) -> u64 {
        self.appends.load(Ordering::Relaxed)
    }

    /// Returns the total number of chunks written to segments.
    pub fn flushed_chunks(&self) -> u64 {
        self.flushed_chunks.load(Ordering::Relaxed)
    }

    /// Returns the total number of chunks dropped after failed flushes.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            appends: self.appends(),
            bytes_appended: self.bytes_appended.load(Ordering::Relaxed),
            flushed_chunks: self.flushed_chunks(),
            flushed_batches: self.flushed_batches.load(Ordering::Relaxed),
            bytes_flushed: self.bytes_flushed.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            dropped_chunks: self.dropped_chunks(),
            rolls: self.rolls.load(Ordering::Relaxed),
            roll_failures: self.roll_failures.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
        }
    }

    /// Returns the flush health report.
    pub fn health(&self) -> Health {
        Health {
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            dropped_chunks: self.dropped_chunks(),
            roll_failures: self.roll_failures.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
        }
    }
}

/// A point-in-time copy of [`StoreStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Accepted appends.
    pub appends: u64,
    /// Payload bytes accepted by append.
    pub bytes_appended: u64,
    /// Chunks written to segments.
    pub flushed_chunks: u64,
    /// Successful segment writes.
    pub flushed_batches: u64,
    /// Framed bytes written to segments.
    pub bytes_flushed: u64,
    /// Failed segment write attempts.
    pub flush_failures: u64,
    /// Chunks lost after exhausting flush retries.
    pub dropped_chunks: u64,
    /// Segments created by rolling.
    pub rolls: u64,
    /// Rolls that could not create a segment.
    pub roll_failures: u64,
    /// Point lookups.
    pub queries: u64,
    /// Delete requests.
    pub deletes: u64,
    /// Lookups served by the segment cache.
    pub cache_hits: u64,
    /// Lookups that went to the directory.
    pub cache_misses: u64,
    /// Segments evicted from the cache.
    pub evictions: u64,
    /// Segments that failed to load.
    pub load_failures: u64,
}

/// Degraded-health signal of the background write path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Health {
    /// Failed segment write attempts.
    pub flush_failures: u64,
    /// Chunks lost after exhausting flush retries.
    pub dropped_chunks: u64,
    /// Rolls that could not create a segment.
    pub roll_failures: u64,
    /// Most recent flush, roll or load error.
    pub last_error: Option<String>,
}

impl Health {
    /// Whether the store has lost data or is stuck on an oversized segment.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.dropped_chunks > 0 || self.roll_failures > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = StoreStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
        assert!(!stats.health().is_degraded());
        assert!(stats.health().last_error.is_none());
    }

    #[test]
    fn record_write_path() {
        let stats = StoreStats::new();
        stats.record_append(10);
        stats.record_append(5);
        stats.record_flush(2, 49);

        let snap = stats.snapshot();
        assert_eq!(snap.appends, 2);
        assert_eq!(snap.bytes_appended, 15);
        assert_eq!(snap.flushed_chunks, 2);
        assert_eq!(snap.flushed_batches, 1);
        assert_eq!(snap.bytes_flushed, 49);
    }

    #[test]
    fn failures_degrade_health() {
        let stats = StoreStats::new();
        stats.record_flush_failure(&"disk full");
        assert!(!stats.health().is_degraded());

        stats.record_dropped(3);
        let health = stats.health();
        assert!(health.is_degraded());
        assert_eq!(health.flush_failures, 1);
        assert_eq!(health.dropped_chunks, 3);
        assert_eq!(health.last_error.as_deref(), Some("disk full"));
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(StoreStats::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let s = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    s.record_append(1);
                    s.record_query();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.appends, 800);
        assert_eq!(snap.queries, 800);
    }
}
