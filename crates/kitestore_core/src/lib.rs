//! # KiteStore Core
//!
//! Segmented log storage engine for the KiteStore message broker.
//!
//! This crate provides:
//! - Chunk records with CRC32-checked payloads and soft-delete flags
//! - Segment files, a sorted segment directory and a bounded segment cache
//! - The snapshot engine: write-behind appends, a background flusher,
//!   size-based segment rolling and recovery on open
//! - The message store contract of the relational backend

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dir;
mod error;
mod message_store;
mod segment;
mod snapshot;
mod stats;
mod types;

pub use config::Config;
pub use dir::{
    parse_segment_file_name, scan_segment_files, segment_file_name, SegmentFile, SegmentName,
    StoreDir,
};
pub use error::{CoreError, CoreResult};
pub use message_store::{InMemoryMessageStore, MessageEntity, MessageStore, PageFilter};
pub use segment::{
    compute_checksum, parse_chunks, Chunk, ChunkFlag, ParsedSegment, Segment, SegmentCache,
    SegmentDirectory, CHUNK_HEADER_SIZE, MAX_CHUNK_SIZE, MAX_PAYLOAD_SIZE,
};
pub use snapshot::{SegmentInfo, SnapshotStore};
pub use stats::{Health, StatsSnapshot, StoreStats};
pub use types::ChunkId;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
