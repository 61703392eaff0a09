//! Store configuration.

use crate::error::{CoreError, CoreResult};
use std::time::Duration;

/// Configuration for opening a [`crate::SnapshotStore`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the base directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Maximum number of chunks written to a segment in one flush.
    pub batch_size: usize,

    /// Number of opened segments kept in the segment cache.
    pub segment_cache_size: usize,

    /// Capacity of the write queue between producers and the flusher.
    /// A full queue blocks `append`.
    pub write_queue_capacity: usize,

    /// Byte size above which the active segment is rolled.
    pub max_segment_size: u64,

    /// How long the idle flusher blocks waiting for the next chunk.
    pub flush_idle_timeout: Duration,

    /// Whether to fsync the segment after every flushed batch.
    pub sync_on_flush: bool,

    /// Attempts made to write one batch before it is dropped.
    pub flush_retry_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            batch_size: 100,
            segment_cache_size: 10,
            write_queue_capacity: 10_000,
            max_segment_size: 64 * 1024 * 1024, // 64 MB
            flush_idle_timeout: Duration::from_millis(10),
            sync_on_flush: true,
            flush_retry_limit: 3,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the base directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the flush batch size.
    #[must_use]
    pub const fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the segment cache capacity.
    #[must_use]
    pub const fn segment_cache_size(mut self, size: usize) -> Self {
        self.segment_cache_size = size;
        self
    }

    /// Sets the write queue capacity.
    #[must_use]
    pub const fn write_queue_capacity(mut self, capacity: usize) -> Self {
        self.write_queue_capacity = capacity;
        self
    }

    /// Sets the segment roll threshold.
    #[must_use]
    pub const fn max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Sets the idle receive timeout of the flusher.
    #[must_use]
    pub const fn flush_idle_timeout(mut self, timeout: Duration) -> Self {
        self.flush_idle_timeout = timeout;
        self
    }

    /// Sets whether to fsync after every flushed batch.
    #[must_use]
    pub const fn sync_on_flush(mut self, value: bool) -> Self {
        self.sync_on_flush = value;
        self
    }

    /// Sets the number of write attempts per batch.
    #[must_use]
    pub const fn flush_retry_limit(mut self, attempts: u32) -> Self {
        self.flush_retry_limit = attempts;
        self
    }

    /// Checks that every size is usable.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] naming the first bad setting.
    pub fn validate(&self) -> CoreResult<()> {
        if self.batch_size == 0 {
            return Err(CoreError::invalid_config("batch_size must be at least 1"));
        }
        if self.segment_cache_size == 0 {
            return Err(CoreError::invalid_config(
                "segment_cache_size must be at least 1",
            ));
        }
        if self.write_queue_capacity == 0 {
            return Err(CoreError::invalid_config(
                "write_queue_capacity must be at least 1",
            ));
        }
        if self.max_segment_size == 0 {
            return Err(CoreError::invalid_config(
                "max_segment_size must be at least 1 byte",
            ));
        }
        Ok(())
    }
}
