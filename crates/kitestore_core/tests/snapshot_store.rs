//! Integration tests for the snapshot engine.

use kitestore_core::{ChunkId, Config, CoreError, SnapshotStore};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

const WAIT: Duration = Duration::from_secs(10);

/// Framed size of a one-byte chunk.
const ONE_BYTE_CHUNK: u64 = 18;

fn config() -> Config {
    Config::default()
        .batch_size(2)
        .segment_cache_size(1)
        .sync_on_flush(false)
        .flush_idle_timeout(Duration::from_millis(1))
}

fn open(path: &Path, config: Config) -> SnapshotStore {
    SnapshotStore::open_with_config(path, config).unwrap()
}

/// Waits for the flusher's roll after the last write to land.
fn wait_for_segments(store: &SnapshotStore, count: usize) {
    let deadline = Instant::now() + WAIT;
    while store.segments().len() < count {
        assert!(Instant::now() < deadline, "expected {count} segments");
        thread::sleep(Duration::from_millis(1));
    }
}

fn payloads(chunks: &[kitestore_core::Chunk]) -> Vec<&[u8]> {
    chunks.iter().map(|c| c.payload.as_slice()).collect()
}

#[test]
fn append_head_query_delete_reopen() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), config());

    let ids: Vec<ChunkId> = ["a", "b", "c"]
        .iter()
        .map(|p| store.append(p.as_bytes().to_vec()).unwrap())
        .collect();
    assert_eq!(ids, vec![ChunkId::new(0), ChunkId::new(1), ChunkId::new(2)]);
    assert!(store.flush_pending(WAIT));

    let (head_id, chunks) = store.head().unwrap();
    assert_eq!(head_id, ChunkId::new(0));
    assert_eq!(payloads(&chunks), vec![b"a".as_slice(), b"b", b"c"]);

    let chunk = store.query(ChunkId::new(1)).unwrap().unwrap();
    assert_eq!(chunk.payload, b"b");
    assert!(!chunk.is_deleted());

    assert!(store.delete(ChunkId::new(1)).unwrap());
    let chunk = store.query(ChunkId::new(1)).unwrap().unwrap();
    assert_eq!(chunk.payload, b"b");
    assert!(chunk.is_deleted());

    store.destroy().unwrap();
    drop(store);

    let store = open(dir.path(), config());
    assert_eq!(store.append(b"d".to_vec()).unwrap(), ChunkId::new(3));
    assert!(store.flush_pending(WAIT));

    // The delete survived the restart.
    assert!(store.query(ChunkId::new(1)).unwrap().unwrap().is_deleted());
    assert_eq!(store.query(ChunkId::new(3)).unwrap().unwrap().payload, b"d");
}

#[test]
fn roll_after_size_threshold() {
    let dir = tempdir().unwrap();
    // One chunk fits under the threshold, two cross it.
    let store = open(dir.path(), config().max_segment_size(ONE_BYTE_CHUNK + 2));

    for p in ["a", "b", "c"] {
        store.append(p.as_bytes().to_vec()).unwrap();
    }
    assert!(store.flush_pending(WAIT));

    let starts: Vec<ChunkId> = store.segments().iter().map(|s| s.start_id).collect();
    assert_eq!(starts, vec![ChunkId::new(0), ChunkId::new(2)]);
    assert!(dir.path().join("segment-2.data").exists());

    let (head_id, chunks) = store.head().unwrap();
    assert_eq!(head_id, ChunkId::new(0));
    assert_eq!(payloads(&chunks), vec![b"a".as_slice(), b"b"]);

    assert_eq!(store.query(ChunkId::new(2)).unwrap().unwrap().payload, b"c");
    assert_eq!(store.stats().rolls, 1);
}

#[test]
fn empty_store_head() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), config());

    let (head_id, chunks) = store.head().unwrap();
    assert_eq!(head_id, ChunkId::new(0));
    assert!(chunks.is_empty());
    assert!(store.query(ChunkId::new(0)).unwrap().is_none());
}

#[test]
fn query_before_flush_is_absent_not_error() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), config());
    assert!(store.query(ChunkId::new(1_000)).unwrap().is_none());
    assert!(!store.delete(ChunkId::new(1_000)).unwrap());
}

#[test]
fn concurrent_producers_get_unique_contiguous_ids() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 250;

    let dir = tempdir().unwrap();
    let store = Arc::new(open(
        dir.path(),
        config()
            .batch_size(16)
            .segment_cache_size(4)
            .write_queue_capacity(32)
            .max_segment_size(4 * 1024),
    ));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut ids = Vec::with_capacity(PER_THREAD);
                for i in 0..PER_THREAD {
                    let payload = format!("{t}:{i}").into_bytes();
                    ids.push((store.append(payload).unwrap(), format!("{t}:{i}")));
                }
                ids
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        let ids = handle.join().unwrap();
        // Each producer sees its own ids strictly increase.
        assert!(ids.windows(2).all(|w| w[0].0 < w[1].0));
        all.extend(ids);
    }

    let unique: HashSet<i64> = all.iter().map(|(id, _)| id.as_i64()).collect();
    assert_eq!(unique.len(), THREADS * PER_THREAD);
    assert_eq!(unique.iter().min(), Some(&0));
    assert_eq!(
        unique.iter().max(),
        Some(&((THREADS * PER_THREAD) as i64 - 1))
    );

    assert!(store.flush_pending(WAIT));
    for (id, payload) in &all {
        let chunk = store.query(*id).unwrap().unwrap();
        assert_eq!(chunk.payload, payload.as_bytes());
    }

    let stats = store.stats();
    assert_eq!(stats.appends, (THREADS * PER_THREAD) as u64);
    assert_eq!(stats.flushed_chunks, (THREADS * PER_THREAD) as u64);
    assert!(!store.health().is_degraded());
}

#[test]
fn cache_never_exceeds_capacity() {
    let dir = tempdir().unwrap();
    let store = open(
        dir.path(),
        config().segment_cache_size(2).max_segment_size(ONE_BYTE_CHUNK),
    );

    for i in 0..12u8 {
        store.append(vec![i]).unwrap();
    }
    assert!(store.flush_pending(WAIT));
    wait_for_segments(&store, 7);

    for id in (0..12).rev() {
        let chunk = store.query(ChunkId::new(id)).unwrap().unwrap();
        assert_eq!(chunk.payload, vec![id as u8]);
        assert!(store.cached_segment_count() <= 2);
    }

    let stats = store.stats();
    assert!(stats.cache_misses > 0);
    assert!(stats.evictions > 0);

    // Only cached segments and the active one hold file handles.
    let segments = store.segments();
    for info in &segments {
        if info.is_open {
            assert!(info.is_cached || info.is_active, "{info:?}");
        }
    }
    assert!(segments.last().unwrap().is_open);
}

#[test]
fn repeated_query_hits_cache() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), config());
    store.append(b"x".to_vec()).unwrap();
    assert!(store.flush_pending(WAIT));

    store.query(ChunkId::new(0)).unwrap();
    let before = store.stats().cache_hits;
    store.query(ChunkId::new(0)).unwrap();
    assert_eq!(store.stats().cache_hits, before + 1);
}

#[test]
fn remove_sealed_segment() {
    let dir = tempdir().unwrap();
    let store = open(
        dir.path(),
        config().segment_cache_size(4).max_segment_size(ONE_BYTE_CHUNK - 1),
    );

    // One chunk per segment.
    for p in ["a", "b", "c"] {
        store.append(p.as_bytes().to_vec()).unwrap();
    }
    assert!(store.flush_pending(WAIT));
    wait_for_segments(&store, 4);
    assert!(store.query(ChunkId::new(0)).unwrap().is_some());

    let active = store.segments().last().unwrap().start_id;
    assert!(matches!(
        store.remove_segment(active),
        Err(CoreError::InvalidOperation { .. })
    ));

    assert!(store.remove_segment(ChunkId::new(0)).unwrap());
    assert!(!store.remove_segment(ChunkId::new(0)).unwrap());
    assert!(!dir.path().join("segment-0.data").exists());
    assert!(store.query(ChunkId::new(0)).unwrap().is_none());

    let (head_id, chunks) = store.head().unwrap();
    assert_eq!(head_id, ChunkId::new(1));
    assert_eq!(payloads(&chunks), vec![b"b".as_slice()]);
}

#[test]
fn second_open_is_locked_out() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), config());

    let second = SnapshotStore::open_with_config(dir.path(), config());
    assert!(matches!(second, Err(CoreError::StoreLocked)));

    store.destroy().unwrap();
    let reopened = SnapshotStore::open_with_config(dir.path(), config());
    assert!(reopened.is_ok());
}

#[test]
fn closed_store_rejects_requests() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), config());
    store.append(b"a".to_vec()).unwrap();
    store.destroy().unwrap();

    assert!(matches!(store.append(b"b".to_vec()), Err(CoreError::StoreClosed)));
    assert_eq!(store.append_or_invalid(b"b".to_vec()), ChunkId::INVALID);
    assert!(matches!(store.query(ChunkId::new(0)), Err(CoreError::StoreClosed)));
    assert!(matches!(store.delete(ChunkId::new(0)), Err(CoreError::StoreClosed)));
    assert!(matches!(
        store.remove_segment(ChunkId::new(0)),
        Err(CoreError::StoreClosed)
    ));
    assert!(!store.is_running());
}

#[test]
fn destroy_drains_queued_chunks() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), config().batch_size(10));

    for i in 0..500u32 {
        store.append(i.to_le_bytes().to_vec()).unwrap();
    }
    store.destroy().unwrap();
    assert_eq!(store.stats().flushed_chunks, 500);
    drop(store);

    let store = open(dir.path(), config());
    assert_eq!(store.next_id(), ChunkId::new(500));
    let chunk = store.query(ChunkId::new(499)).unwrap().unwrap();
    assert_eq!(chunk.payload, 499u32.to_le_bytes());
}

#[test]
fn positional_open_uses_defaults() {
    let dir = tempdir().unwrap();
    let store = SnapshotStore::open(dir.path(), 2, 1).unwrap();
    assert_eq!(store.config().batch_size, 2);
    assert_eq!(store.config().segment_cache_size, 1);
    assert_eq!(store.config().max_segment_size, Config::default().max_segment_size);
    assert_eq!(store.path(), dir.path());
}
