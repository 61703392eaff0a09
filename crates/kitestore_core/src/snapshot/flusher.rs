//! Background flush loop and segment roll policy.

use super::{Segments, Shared};
use crate::dir::{segment_file_name, sync_directory};
use crate::error::{CoreError, CoreResult};
use crate::segment::{Chunk, Segment};
use crate::types::ChunkId;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// Drains the write queue into segments until every producer is gone.
///
/// A chunk joins the pending batch as soon as it arrives. The batch is
/// written when it reaches `batch_size`, or as soon as the queue runs dry,
/// so a lone chunk is not held back waiting for company. With nothing
/// pending the loop blocks on the queue for `flush_idle_timeout`.
pub(super) fn run(shared: &Shared, receiver: &Receiver<Chunk>) {
    let batch_size = shared.config.batch_size;
    let idle = shared.config.flush_idle_timeout;
    let mut batch: Vec<Chunk> = Vec::with_capacity(batch_size);

    debug!("flusher started");
    loop {
        let received = if batch.is_empty() {
            receiver.recv_timeout(idle).map_err(|e| match e {
                RecvTimeoutError::Timeout => TryRecvError::Empty,
                RecvTimeoutError::Disconnected => TryRecvError::Disconnected,
            })
        } else {
            receiver.try_recv()
        };

        match received {
            Ok(chunk) => {
                batch.push(chunk);
                if batch.len() >= batch_size {
                    shared.flush_batch(&mut batch);
                }
            }
            Err(TryRecvError::Empty) => {
                if !batch.is_empty() {
                    shared.flush_batch(&mut batch);
                }
            }
            Err(TryRecvError::Disconnected) => {
                if !batch.is_empty() {
                    shared.flush_batch(&mut batch);
                }
                break;
            }
        }

        shared.check_roll();
    }

    shared.settled_cond.notify_all();
    debug!("flusher stopped");
}

impl Shared {
    /// Writes `batch` to the active segment, rolling in between as needed.
    fn flush_batch(&self, batch: &mut Vec<Chunk>) {
        let chunks = std::mem::take(batch);
        let max = self.config.max_segment_size;
        let mut rest = chunks.as_slice();

        while let Some(first) = rest.first() {
            let Some(active) = self.active_segment(first.id) else {
                self.drop_run(rest, "no active segment");
                return;
            };

            // Fill the segment until it crosses the roll threshold.
            let mut size = active.byte_size();
            let mut take = 0;
            for chunk in rest {
                if take > 0 && size > max {
                    break;
                }
                size += chunk.encoded_len() as u64;
                take += 1;
            }

            let (run, tail) = rest.split_at(take);
            self.write_run(&active, run);
            rest = tail;
        }

        *batch = chunks;
        batch.clear();
    }

    /// Appends one run to `segment`, retrying before giving up on it.
    fn write_run(&self, segment: &Segment, run: &[Chunk]) {
        let attempts = self.config.flush_retry_limit.max(1);

        for attempt in 1..=attempts {
            match segment.append(run, self.config.sync_on_flush) {
                Ok(bytes) => {
                    self.stats.record_flush(run.len() as u64, bytes);
                    if let Some(last) = run.last() {
                        self.settle(last.id);
                    }
                    return;
                }
                Err(err) => {
                    warn!(
                        start_id = %segment.start_id(),
                        attempt,
                        error = %err,
                        "segment append failed"
                    );
                    self.stats.record_flush_failure(&err);
                    if attempt < attempts {
                        thread::sleep(self.config.flush_idle_timeout);
                    }
                }
            }
        }

        self.drop_run(run, "retries exhausted");
    }

    /// Gives up on a run and moves the write path past its ids.
    fn drop_run(&self, run: &[Chunk], reason: &str) {
        let (Some(first), Some(last)) = (run.first(), run.last()) else {
            return;
        };
        error!(
            first = %first.id,
            last = %last.id,
            count = run.len(),
            reason,
            "dropping unflushed chunks"
        );
        self.stats.record_dropped(run.len() as u64);

        // Later chunks must not land in a segment whose id run stops short
        // of the dropped ones.
        let mut segments = self.segments.write();
        let needs_roll = segments
            .directory
            .last()
            .map_or(true, |s| s.next_id() != Some(last.id.next()));
        if needs_roll {
            if let Err(err) = self.create_segment_locked(&mut *segments, last.id.next()) {
                error!(start_id = %last.id.next(), error = %err, "failed to roll past dropped chunks");
                self.stats.record_roll_failure(&err);
            }
        }
        drop(segments);

        self.settle(last.id);
    }

    /// Returns the segment the next write should go to, creating the first
    /// one at `first` if the directory is empty.
    fn active_segment(&self, first: ChunkId) -> Option<Arc<Segment>> {
        if let Some(active) = self.check_roll() {
            return Some(active);
        }

        let mut segments = self.segments.write();
        if let Some(last) = segments.directory.last() {
            return Some(Arc::clone(last));
        }
        match self.create_segment_locked(&mut *segments, first) {
            Ok(segment) => Some(segment),
            Err(err) => {
                error!(start_id = %first, error = %err, "failed to create segment");
                self.stats.record_roll_failure(&err);
                None
            }
        }
    }

    /// Rolls the active segment once it exceeds `max_segment_size`.
    ///
    /// Returns the active segment after the check, or `None` if the
    /// directory is empty. When the roll fails the old segment stays
    /// active and keeps receiving writes.
    pub(super) fn check_roll(&self) -> Option<Arc<Segment>> {
        let max = self.config.max_segment_size;
        {
            let segments = self.segments.read();
            let last = segments.directory.last()?;
            if last.byte_size() <= max {
                return Some(Arc::clone(last));
            }
        }

        let mut segments = self.segments.write();
        let last = Arc::clone(segments.directory.last()?);
        if last.byte_size() <= max {
            return Some(last);
        }
        let Some(start) = last.next_id() else {
            return Some(last);
        };

        match self.create_segment_locked(&mut *segments, start) {
            Ok(segment) => Some(segment),
            Err(err) => {
                error!(
                    start_id = %start,
                    size = last.byte_size(),
                    error = %err,
                    "failed to roll segment"
                );
                self.stats.record_roll_failure(&err);
                Some(last)
            }
        }
    }

    /// Creates the segment starting at `start` and makes it active.
    ///
    /// The superseded segment is closed unless the cache holds it, so every
    /// open segment is either cached or active.
    pub(super) fn create_segment_locked(
        &self,
        segments: &mut Segments,
        start: ChunkId,
    ) -> CoreResult<Arc<Segment>> {
        let superseded = segments.directory.last().cloned();
        if let Some(last) = &superseded {
            if start <= last.start_id() {
                return Err(CoreError::invalid_operation(format!(
                    "segment {start} does not follow active segment {}",
                    last.start_id()
                )));
            }
        }

        let path = self.path.join(segment_file_name(start));
        let segment = Arc::new(Segment::create(start, path)?);
        if let Err(err) = sync_directory(&self.path) {
            warn!(error = %err, "failed to sync store directory after roll");
        }

        segments.directory.push(Arc::clone(&segment))?;

        if let Some(old) = superseded {
            if !segments.cache.contains_segment(old.start_id()) {
                if let Err(err) = old.close() {
                    warn!(start_id = %old.start_id(), error = %err, "failed to close sealed segment");
                }
            }
            self.stats.record_roll();
            info!(
                from = %old.start_id(),
                to = %start,
                sealed_size = old.byte_size(),
                "rolled to new segment"
            );
        } else {
            info!(start_id = %start, "created first segment");
        }

        Ok(segment)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::dir::segment_file_name;
    use crate::snapshot::SnapshotStore;
    use crate::types::ChunkId;
    use std::fs;
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn batch_larger_than_segment_is_split() {
        let dir = tempdir().unwrap();
        // Two 18-byte chunks cross the threshold.
        let config = Config::default()
            .batch_size(10)
            .max_segment_size(20)
            .sync_on_flush(false)
            .flush_idle_timeout(Duration::from_millis(1));
        let store = SnapshotStore::open_with_config(dir.path(), config).unwrap();

        for payload in [b"a", b"b", b"c", b"d", b"e"] {
            store.append(payload.to_vec()).unwrap();
        }
        assert!(store.flush_pending(WAIT));

        let starts: Vec<i64> = store.segments().iter().map(|s| s.start_id.as_i64()).collect();
        assert_eq!(starts, vec![0, 2, 4]);
        for id in 0..5 {
            assert!(store.query(ChunkId::new(id)).unwrap().is_some());
        }
        assert_eq!(store.stats().rolls, 2);
    }

    fn quick_config() -> Config {
        Config::default()
            .sync_on_flush(false)
            .flush_idle_timeout(Duration::from_millis(1))
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        done()
    }

    #[test]
    fn sealed_segments_are_closed_unless_cached() {
        let dir = tempdir().unwrap();
        let config = quick_config()
            .batch_size(1)
            .segment_cache_size(3)
            .max_segment_size(1);
        let store = SnapshotStore::open_with_config(dir.path(), config).unwrap();

        for i in 0..6u8 {
            store.append(vec![i]).unwrap();
        }
        assert!(store.flush_pending(WAIT));

        let segments = store.segments();
        assert!(segments.len() >= 6);
        assert!(segments.last().unwrap().is_open);
        for info in &segments {
            assert!(
                !info.is_open || info.is_cached || info.is_active,
                "stray open segment {}",
                info.start_id
            );
        }

        // Queries admit sealed segments to the cache, which bounds them.
        for id in 0..6 {
            assert!(store.query(ChunkId::new(id)).unwrap().is_some());
        }
        let open = store.segments().iter().filter(|s| s.is_open).count();
        assert!(open <= 3 + 1);
    }

    #[test]
    fn failed_writes_drop_the_run_and_roll_past_it() {
        let dir = tempdir().unwrap();
        let config = quick_config().batch_size(1).flush_retry_limit(2);
        let store = SnapshotStore::open_with_config(dir.path(), config).unwrap();

        // A closed segment refuses appends.
        let active = store.shared.segments.read().directory.last().cloned().unwrap();
        active.close().unwrap();

        assert_eq!(store.append(b"lost".to_vec()).unwrap(), ChunkId::new(0));
        assert!(store.flush_pending(WAIT));

        let stats = store.stats();
        assert_eq!(stats.flush_failures, 2);
        assert_eq!(stats.dropped_chunks, 1);

        let starts: Vec<i64> = store.segments().iter().map(|s| s.start_id.as_i64()).collect();
        assert_eq!(starts, vec![0, 1]);
        assert!(store.query(ChunkId::new(0)).unwrap().is_none());

        let health = store.health();
        assert!(health.is_degraded());
        assert!(health.last_error.is_some());

        // Writing resumes in the new segment.
        assert_eq!(store.append(b"kept".to_vec()).unwrap(), ChunkId::new(1));
        assert!(store.flush_pending(WAIT));
        assert_eq!(store.query(ChunkId::new(1)).unwrap().unwrap().payload, b"kept");
        assert_eq!(store.stats().dropped_chunks, 1);
    }

    #[test]
    fn failed_roll_keeps_writing_to_the_old_segment() {
        let dir = tempdir().unwrap();
        let config = quick_config().batch_size(10).max_segment_size(20);
        let store = SnapshotStore::open_with_config(dir.path(), config).unwrap();

        // The roll target cannot be created as a file.
        let blocker = dir.path().join(segment_file_name(ChunkId::new(2)));
        fs::create_dir(&blocker).unwrap();

        store.append(b"a".to_vec()).unwrap();
        store.append(b"b".to_vec()).unwrap();
        assert!(store.flush_pending(WAIT));
        assert_eq!(store.append(b"c".to_vec()).unwrap(), ChunkId::new(2));
        assert!(store.flush_pending(WAIT));

        assert!(store.stats().roll_failures >= 1);
        assert!(store.health().is_degraded());
        let starts: Vec<i64> = store.segments().iter().map(|s| s.start_id.as_i64()).collect();
        assert_eq!(starts, vec![0]);
        assert_eq!(store.query(ChunkId::new(2)).unwrap().unwrap().payload, b"c");

        // Once the path frees up the next check rolls after the last chunk.
        fs::remove_dir(&blocker).unwrap();
        assert!(wait_until(|| store.segments().len() == 2));
        assert_eq!(store.segments()[1].start_id, ChunkId::new(3));
    }
}
