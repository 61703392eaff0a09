//! Segment storage for chunks.
//!
//! A segment is one file holding a contiguous, ascending run of chunk ids
//! starting at the segment's start id. Only the last segment of a store
//! receives appends; every earlier one is sealed.
//!
//! ## Chunk Record Format
//!
//! ```text
//! | length (4) | id (8) | checksum (4) | flag (1) | payload (N) |
//! ```
//!
//! All integers are little-endian. `length` covers the whole frame.
//! The checksum is CRC32 (IEEE) over the payload.
//!
//! Flags:
//! - `0x00` = normal
//! - `0x01` = deleted (soft delete, flipped in place)
//!
//! ## Recovery Policy
//!
//! - A frame cut off by end-of-file is a crash mid-write: the tail is
//!   truncated and every complete chunk before it is kept.
//! - A length outside `CHUNK_HEADER_SIZE..=MAX_CHUNK_SIZE`, an unknown flag, or an id that
//!   breaks the contiguous run is `SegmentCorruption`.
//! - A frame that overruns end-of-file only counts as torn when its header
//!   is sound and no intact frame follows it; otherwise it is corruption.
//!   Only the active segment is truncated, sealed segments are left as is.
//! - Checksums are verified when chunks are read, not when they are loaded.

mod cache;
mod directory;
mod file;
mod record;

pub use cache::SegmentCache;
pub use directory::SegmentDirectory;
pub use file::{parse_chunks, ParsedSegment, Segment};
pub use record::{
    compute_checksum, Chunk, ChunkFlag, CHUNK_HEADER_SIZE, MAX_CHUNK_SIZE, MAX_PAYLOAD_SIZE,
};
