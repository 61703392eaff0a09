//! Benchmark utilities.

use kitestore_core::{Chunk, ChunkId};

/// Deterministic payload of the given size.
pub fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// A contiguous run of chunks starting at `start`.
pub fn chunk_run(start: i64, count: usize, size: usize) -> Vec<Chunk> {
    let data = payload(size);
    (0..count)
        .map(|i| Chunk::new(ChunkId::new(start).offset(i), data.clone()))
        .collect()
}
