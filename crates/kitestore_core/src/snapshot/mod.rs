//! The snapshot engine: write-behind appends over a segmented log.
//!
//! ```text
//! producers ──append──▶ bounded queue ──▶ flusher thread ──▶ active segment
//!                                                   │
//!                                           roll when too big
//!
//! readers ──query/head/delete──▶ segment cache ──miss──▶ segment directory
//! ```
//!
//! Ids are allocated and enqueued under one lock, so the queue holds
//! chunks in id order and the flusher can append them without sorting.
//!
//! Locking: the engine lock guards the segment directory and the cache;
//! each segment has its own lock. The engine lock is always taken first.
//! The flusher appends to the active segment without the engine lock,
//! which is safe because the active segment is never closed by eviction.

mod flusher;

use crate::config::Config;
use crate::dir::{sync_directory, StoreDir};
use crate::error::{CoreError, CoreResult};
use crate::segment::{Chunk, Segment, SegmentCache, SegmentDirectory, MAX_PAYLOAD_SIZE};
use crate::stats::{Health, StatsSnapshot, StoreStats};
use crate::types::ChunkId;
use parking_lot::{Condvar, Mutex, RwLock, RwLockWriteGuard};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Name of the background flush thread.
const FLUSHER_THREAD: &str = "kitestore-flusher";

/// Descriptor of one segment, as reported by [`SnapshotStore::segments`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// First id the segment holds.
    pub start_id: ChunkId,
    /// Resident chunk count, known only while the segment is open.
    pub chunk_count: Option<usize>,
    /// Bytes in the segment file.
    pub byte_size: u64,
    /// Whether the segment holds a live file handle.
    pub is_open: bool,
    /// Whether the segment is in the segment cache.
    pub is_cached: bool,
    /// Whether the segment receives appends.
    pub is_active: bool,
}

/// Directory and cache, guarded together by the engine lock.
struct Segments {
    directory: SegmentDirectory,
    cache: SegmentCache,
}

/// State shared between the store handle and the flusher thread.
struct Shared {
    config: Config,
    path: PathBuf,
    /// Holds the directory lock until shutdown.
    dir: Mutex<Option<StoreDir>>,
    next_id: AtomicI64,
    running: AtomicBool,
    segments: RwLock<Segments>,
    stats: StoreStats,
    /// Highest id the flusher has written or dropped.
    settled: Mutex<ChunkId>,
    settled_cond: Condvar,
}

/// A segmented, write-behind chunk store.
///
/// # Opening a Store
///
/// ```rust,ignore
/// use kitestore_core::{ChunkId, SnapshotStore};
/// use std::path::Path;
///
/// let store = SnapshotStore::open(Path::new("snapshot"), 100, 10)?;
///
/// let id = store.append(b"message".to_vec())?;
/// store.flush_pending(std::time::Duration::from_secs(1));
///
/// let chunk = store.query(id)?.expect("flushed");
/// store.delete(id)?;
///
/// store.destroy()?;
/// ```
///
/// `append` returns as soon as the chunk is queued. The chunk becomes
/// visible to `query` once the flusher has written it.
pub struct SnapshotStore {
    shared: Arc<Shared>,
    /// Write end of the queue. `None` once the write path is closed.
    producer: Mutex<Option<SyncSender<Chunk>>>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotStore {
    /// Opens a store with a batch size and a segment cache size.
    ///
    /// Every other setting uses its default.
    pub fn open(path: &Path, batch_size: usize, segment_cache_size: usize) -> CoreResult<Self> {
        let config = Config::default()
            .batch_size(batch_size)
            .segment_cache_size(segment_cache_size);
        Self::open_with_config(path, config)
    }

    /// Opens a store with custom configuration.
    ///
    /// Recovery opens only the last segment; every earlier segment stays
    /// closed until a lookup needs it.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, the directory cannot be
    /// created or locked, the last segment cannot be opened, or the first
    /// segment of an empty store cannot be created.
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        config.validate()?;

        let dir = StoreDir::open(path, config.create_if_missing)?;
        let files = dir.scan_segments()?;
        debug!(path = %path.display(), segments = files.len(), "scanned store directory");

        let directory = SegmentDirectory::from_segments(
            files
                .into_iter()
                .map(|f| Arc::new(Segment::closed(f.start_id, f.path, f.size)))
                .collect(),
        );

        let next_id = match directory.last() {
            Some(last) => {
                last.open()?;
                last.next_id().unwrap_or(last.start_id())
            }
            None => ChunkId::FIRST,
        };

        let shared = Arc::new(Shared {
            path: dir.path().to_path_buf(),
            dir: Mutex::new(Some(dir)),
            next_id: AtomicI64::new(next_id.as_i64()),
            running: AtomicBool::new(true),
            segments: RwLock::new(Segments {
                directory,
                cache: SegmentCache::new(config.segment_cache_size),
            }),
            stats: StoreStats::new(),
            settled: Mutex::new(ChunkId::new(next_id.as_i64() - 1)),
            settled_cond: Condvar::new(),
            config,
        });

        {
            let mut segments = shared.segments.write();
            if segments.directory.is_empty() {
                shared.create_segment_locked(&mut *segments, next_id)?;
            }
        }
        shared.check_roll();

        let (sender, receiver) = mpsc::sync_channel(shared.config.write_queue_capacity);
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(FLUSHER_THREAD.to_string())
            .spawn(move || flusher::run(&worker, &receiver))?;

        info!(
            path = %shared.path.display(),
            segments = shared.segments.read().directory.len(),
            next_id = %next_id,
            "store opened"
        );

        Ok(Self {
            shared,
            producer: Mutex::new(Some(sender)),
            flusher: Mutex::new(Some(handle)),
        })
    }

    /// Queues a payload and returns the id assigned to it.
    ///
    /// Blocks while the write queue is full. The chunk is not durable when
    /// this returns.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreClosed`] once the store is shutting down;
    /// the write path is closed for good at that point. Payloads larger
    /// than [`MAX_PAYLOAD_SIZE`] are [`CoreError::InvalidOperation`] and
    /// consume no id.
    pub fn append(&self, payload: impl Into<Vec<u8>>) -> CoreResult<ChunkId> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(CoreError::invalid_operation(format!(
                "payload of {} bytes exceeds the {MAX_PAYLOAD_SIZE} byte limit",
                payload.len()
            )));
        }

        let mut producer = self.producer.lock();
        if !self.shared.running.load(Ordering::Acquire) {
            producer.take();
            return Err(CoreError::StoreClosed);
        }
        let Some(sender) = producer.as_ref() else {
            return Err(CoreError::StoreClosed);
        };

        let id = ChunkId::new(self.shared.next_id.fetch_add(1, Ordering::AcqRel));
        let chunk = Chunk::new(id, payload);
        let bytes = chunk.payload.len() as u64;

        if sender.send(chunk).is_err() {
            // The flusher is gone; hand the id back so no gap is left.
            self.shared.next_id.store(id.as_i64(), Ordering::Release);
            producer.take();
            error!(id = %id, "flusher stopped, closing write path");
            return Err(CoreError::StoreClosed);
        }

        self.shared.stats.record_append(bytes);
        Ok(id)
    }

    /// Like [`SnapshotStore::append`], but reports a closed store as
    /// [`ChunkId::INVALID`].
    pub fn append_or_invalid(&self, payload: impl Into<Vec<u8>>) -> ChunkId {
        self.append(payload).unwrap_or(ChunkId::INVALID)
    }

    /// Returns the chunk with `id`, deleted or not.
    ///
    /// An id that was never flushed, or whose segment cannot be loaded,
    /// is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ChecksumMismatch`] if the stored payload is
    /// damaged, or [`CoreError::StoreClosed`] after shutdown.
    pub fn query(&self, id: ChunkId) -> CoreResult<Option<Chunk>> {
        self.ensure_running()?;
        self.shared.stats.record_query();
        if !id.is_valid() {
            return Ok(None);
        }

        let found = self.shared.resolve(
            |s| s.cache.lookup(id),
            |s| s.directory.floor(id).cloned(),
            |segment| segment.get(id),
        )?;
        Ok(found.flatten())
    }

    /// Returns the start id and the chunks of the oldest segment.
    ///
    /// An empty store yields `(ChunkId::INVALID, [])`.
    pub fn head(&self) -> CoreResult<(ChunkId, Vec<Chunk>)> {
        self.ensure_running()?;

        let head = self.shared.resolve(
            |s| {
                s.directory
                    .first()
                    .and_then(|first| s.cache.get(first.start_id()))
            },
            |s| s.directory.first().cloned(),
            |segment| Ok((segment.start_id(), segment.load_chunks()?)),
        )?;
        Ok(head.unwrap_or((ChunkId::INVALID, Vec::new())))
    }

    /// Soft-deletes the chunk with `id`.
    ///
    /// Returns whether a chunk was found. Deleted chunks stay readable
    /// through [`SnapshotStore::query`] with their flag set.
    pub fn delete(&self, id: ChunkId) -> CoreResult<bool> {
        self.ensure_running()?;
        self.shared.stats.record_delete();
        if !id.is_valid() {
            return Ok(false);
        }

        let deleted = self.shared.resolve(
            |s| s.cache.lookup(id),
            |s| s.directory.floor(id).cloned(),
            |segment| segment.delete(id),
        )?;
        Ok(deleted.unwrap_or(false))
    }

    /// Closes a sealed segment and deletes its file.
    ///
    /// Returns `false` if no segment starts at `start_id`.
    ///
    /// # Errors
    ///
    /// Refuses the active segment with [`CoreError::InvalidOperation`].
    pub fn remove_segment(&self, start_id: ChunkId) -> CoreResult<bool> {
        self.ensure_running()?;

        let mut segments = self.shared.segments.write();
        if segments.directory.is_last(start_id) {
            return Err(CoreError::invalid_operation(format!(
                "segment {start_id} is active and cannot be removed"
            )));
        }
        let Some(segment) = segments.directory.remove(start_id) else {
            return Ok(false);
        };
        segments.cache.remove(start_id);

        segment.close()?;
        match fs::remove_file(segment.path()) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Err(err) = sync_directory(&self.shared.path) {
            warn!(error = %err, "failed to sync store directory after removal");
        }

        info!(start_id = %start_id, path = %segment.path().display(), "segment removed");
        Ok(true)
    }

    /// Stops the store.
    ///
    /// Closes the write path, waits for the flusher to write everything
    /// already queued, closes every segment and releases the directory
    /// lock. Calling it again does nothing.
    pub fn destroy(&self) -> CoreResult<()> {
        self.shared.running.store(false, Ordering::Release);
        self.producer.lock().take();

        if let Some(handle) = self.flusher.lock().take() {
            if handle.join().is_err() {
                error!("flusher thread panicked");
            }
        }

        let mut first_error = None;
        {
            let mut segments = self.shared.segments.write();
            segments.cache.drain();
            for segment in segments.directory.iter() {
                if let Err(err) = segment.close() {
                    warn!(start_id = %segment.start_id(), error = %err, "failed to close segment");
                    first_error.get_or_insert(err);
                }
            }
        }

        if self.shared.dir.lock().take().is_some() {
            let stats = self.shared.stats.snapshot();
            info!(
                path = %self.shared.path.display(),
                appends = stats.appends,
                flushed = stats.flushed_chunks,
                dropped = stats.dropped_chunks,
                "store closed"
            );
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Waits until every id allocated before the call is written or dropped.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn flush_pending(&self, timeout: Duration) -> bool {
        let target = ChunkId::new(self.shared.next_id.load(Ordering::Acquire) - 1);
        let deadline = Instant::now() + timeout;

        let mut settled = self.shared.settled.lock();
        while *settled < target {
            if self
                .shared
                .settled_cond
                .wait_until(&mut settled, deadline)
                .timed_out()
            {
                return *settled >= target;
            }
        }
        true
    }

    /// Returns the id the next append will receive.
    #[must_use]
    pub fn next_id(&self) -> ChunkId {
        ChunkId::new(self.shared.next_id.load(Ordering::Acquire))
    }

    /// Describes every segment, ascending by start id.
    #[must_use]
    pub fn segments(&self) -> Vec<SegmentInfo> {
        let segments = self.shared.segments.read();
        segments
            .directory
            .iter()
            .map(|segment| {
                let is_open = segment.is_open();
                SegmentInfo {
                    start_id: segment.start_id(),
                    chunk_count: is_open.then(|| segment.chunk_count()),
                    byte_size: segment.byte_size(),
                    is_open,
                    is_cached: segments.cache.contains_segment(segment.start_id()),
                    is_active: segments.directory.is_last(segment.start_id()),
                }
            })
            .collect()
    }

    /// Returns the number of segments in the segment cache.
    #[must_use]
    pub fn cached_segment_count(&self) -> usize {
        self.shared.segments.read().cache.len()
    }

    /// Returns whether the store still accepts requests.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Returns a snapshot of the store counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Returns the health of the background write path.
    #[must_use]
    pub fn health(&self) -> Health {
        self.shared.stats.health()
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    fn ensure_running(&self) -> CoreResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(CoreError::StoreClosed)
        }
    }
}

impl Shared {
    /// Finds a segment, loading it into the cache on a miss, and runs `f`
    /// on it while the engine lock keeps it from being evicted.
    ///
    /// `cached` probes the cache; `indexed` picks the directory entry to
    /// load. A segment that fails to load is logged and reported as absent.
    fn resolve<T>(
        &self,
        cached: impl Fn(&Segments) -> Option<Arc<Segment>>,
        indexed: impl FnOnce(&Segments) -> Option<Arc<Segment>>,
        f: impl FnOnce(&Segment) -> CoreResult<T>,
    ) -> CoreResult<Option<T>> {
        {
            let segments = self.segments.read();
            if let Some(segment) = cached(&*segments) {
                self.stats.record_cache_hit();
                return f(&segment).map(Some);
            }
        }

        self.stats.record_cache_miss();
        let mut segments = self.segments.write();
        // Another reader may have loaded it while we waited for the lock.
        let segment = match cached(&*segments) {
            Some(segment) => segment,
            None => {
                let Some(segment) = indexed(&*segments) else {
                    return Ok(None);
                };
                if let Err(err) = self.load_locked(&mut *segments, &segment) {
                    warn!(
                        start_id = %segment.start_id(),
                        error = %err,
                        "failed to load segment"
                    );
                    self.stats.record_load_failure(&err);
                    return Ok(None);
                }
                segment
            }
        };

        let _segments = RwLockWriteGuard::downgrade(segments);
        f(&segment).map(Some)
    }

    /// Opens `segment` and admits it to the cache, closing what falls out.
    fn load_locked(&self, segments: &mut Segments, segment: &Arc<Segment>) -> CoreResult<()> {
        if segments.directory.is_last(segment.start_id()) {
            segment.open()?;
        } else {
            segment.open_sealed()?;
        }
        for evicted in segments.cache.admit(Arc::clone(segment)) {
            self.stats.record_eviction();
            // The active segment stays open for the flusher.
            if segments.directory.is_last(evicted.start_id()) {
                continue;
            }
            if let Err(err) = evicted.close() {
                warn!(start_id = %evicted.start_id(), error = %err, "failed to close evicted segment");
            }
            debug!(start_id = %evicted.start_id(), "segment evicted");
        }
        Ok(())
    }

    /// Marks every id up to `id` as written or dropped.
    fn settle(&self, id: ChunkId) {
        let mut settled = self.settled.lock();
        if id > *settled {
            *settled = id;
        }
        self.settled_cond.notify_all();
    }
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("path", &self.shared.path)
            .field("is_running", &self.is_running())
            .field("next_id", &self.next_id())
            .finish_non_exhaustive()
    }
}

impl Drop for SnapshotStore {
    fn drop(&mut self) {
        let _ = self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const WAIT: Duration = Duration::from_secs(5);

    fn test_config() -> Config {
        Config::default()
            .batch_size(2)
            .segment_cache_size(2)
            .sync_on_flush(false)
            .flush_idle_timeout(Duration::from_millis(1))
    }

    #[test]
    fn fresh_store_bootstraps_first_segment() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::open_with_config(dir.path(), test_config()).unwrap();

        assert_eq!(store.next_id(), ChunkId::FIRST);
        let segments = store.segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start_id, ChunkId::FIRST);
        assert!(segments[0].is_open);
        assert!(segments[0].is_active);
        assert!(dir.path().join("segment-0.data").exists());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::open_with_config(dir.path(), test_config()).unwrap();

        let result = store.append(vec![0u8; MAX_PAYLOAD_SIZE + 1]);
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
        assert_eq!(store.next_id(), ChunkId::FIRST);

        let id = store.append(vec![1u8; MAX_PAYLOAD_SIZE]).unwrap();
        assert_eq!(id, ChunkId::FIRST);
        assert!(store.flush_pending(WAIT));
        assert_eq!(store.query(id).unwrap().unwrap().payload.len(), MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn append_then_query() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::open_with_config(dir.path(), test_config()).unwrap();

        let id = store.append(b"payload".to_vec()).unwrap();
        assert_eq!(id, ChunkId::FIRST);
        assert!(store.flush_pending(WAIT));

        let chunk = store.query(id).unwrap().unwrap();
        assert_eq!(chunk.payload, b"payload");
        assert!(!chunk.is_deleted());
        assert!(store.query(ChunkId::new(1)).unwrap().is_none());
        assert!(store.query(ChunkId::INVALID).unwrap().is_none());
    }

    #[test]
    fn delete_unknown_id_is_noop() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::open_with_config(dir.path(), test_config()).unwrap();
        assert!(!store.delete(ChunkId::new(42)).unwrap());
        assert!(!store.delete(ChunkId::INVALID).unwrap());
    }

    #[test]
    fn invalid_config_rejected() {
        let dir = tempdir().unwrap();
        let result = SnapshotStore::open(dir.path(), 0, 1);
        assert!(matches!(result, Err(CoreError::InvalidConfig { .. })));
    }

    #[test]
    fn destroy_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::open_with_config(dir.path(), test_config()).unwrap();
        store.append(b"x".to_vec()).unwrap();

        store.destroy().unwrap();
        store.destroy().unwrap();
        assert!(!store.is_running());
        assert!(store.segments().iter().all(|s| !s.is_open));
        assert!(matches!(store.head(), Err(CoreError::StoreClosed)));
        assert_eq!(store.stats().flushed_chunks, 1);
    }

    #[test]
    fn append_after_destroy_is_rejected() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::open_with_config(dir.path(), test_config()).unwrap();
        store.destroy().unwrap();

        assert!(matches!(store.append(b"late".to_vec()), Err(CoreError::StoreClosed)));
        assert_eq!(store.append_or_invalid(b"late".to_vec()), ChunkId::INVALID);
        assert_eq!(store.next_id(), ChunkId::FIRST);
    }

    #[test]
    fn debug_output() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::open_with_config(dir.path(), test_config()).unwrap();
        let debug = format!("{store:?}");
        assert!(debug.contains("SnapshotStore"));
        assert!(debug.contains("is_running: true"));
    }
}
