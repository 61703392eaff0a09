//! A single segment file.

use crate::error::{CoreError, CoreResult};
use crate::segment::record::{decode_frame, Chunk, ChunkFlag, Frame, CHUNK_HEADER_SIZE, FLAG_OFFSET};
use crate::types::ChunkId;
use kitestore_storage::{FileBackend, StorageBackend};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Chunks recovered from a segment image.
#[derive(Debug, Default)]
pub struct ParsedSegment {
    /// Complete chunks in file order.
    pub chunks: Vec<Chunk>,
    /// File offset of each chunk in `chunks`.
    pub offsets: Vec<u64>,
    /// Length of the prefix made of complete frames.
    pub valid_len: u64,
    /// Whether bytes after `valid_len` hold an incomplete frame.
    pub torn: bool,
}

/// Parses the chunk frames of a segment that starts at `start_id`.
///
/// Ids must run contiguously from `start_id`. A frame cut short by the end
/// of `data` ends the parse and sets `torn`, provided its header is sound
/// and no intact frame follows it. Any other inconsistency is
/// [`CoreError::SegmentCorruption`]. Checksums are not verified here.
pub fn parse_chunks(start_id: ChunkId, data: &[u8]) -> CoreResult<ParsedSegment> {
    let mut parsed = ParsedSegment::default();
    let mut offset = 0usize;

    while offset < data.len() {
        match decode_frame(&data[offset..])? {
            Frame::Complete { chunk, len } => {
                let expected = start_id.offset(parsed.chunks.len());
                if chunk.id != expected {
                    return Err(CoreError::segment_corruption(format!(
                        "expected {expected} at offset {offset}, found {}",
                        chunk.id
                    )));
                }
                parsed.offsets.push(offset as u64);
                parsed.chunks.push(chunk);
                offset += len;
            }
            Frame::Torn { id } => {
                let expected = start_id.offset(parsed.chunks.len());
                if id.is_some_and(|id| id != expected) {
                    return Err(CoreError::segment_corruption(format!(
                        "expected {expected} in torn frame at offset {offset}"
                    )));
                }
                // A damaged length field looks torn, but the records behind it survive.
                if intact_frame_after(data, offset, expected.next()) {
                    return Err(CoreError::segment_corruption(format!(
                        "frame at offset {offset} overruns the chunk that follows it"
                    )));
                }
                parsed.torn = true;
                break;
            }
        }
    }

    parsed.valid_len = offset as u64;
    Ok(parsed)
}

/// Whether a checksummed frame for `id` starts anywhere after `from`.
fn intact_frame_after(data: &[u8], from: usize, id: ChunkId) -> bool {
    let wanted = id.as_i64().to_le_bytes();
    let last_start = data.len().saturating_sub(CHUNK_HEADER_SIZE - 1);

    (from + 1..last_start).any(|pos| {
        data[pos + 4..pos + 12] == wanted
            && matches!(
                decode_frame(&data[pos..]),
                Ok(Frame::Complete { chunk, .. }) if chunk.id == id && chunk.verify().is_ok()
            )
    })
}

/// Mutable state of a segment, guarded by the segment's lock.
struct SegmentState {
    /// Live handle while the segment is open.
    backend: Option<Box<dyn StorageBackend>>,
    /// Resident chunks, only populated while open.
    chunks: Vec<Chunk>,
    /// File offset of each resident chunk.
    offsets: Vec<u64>,
    /// Bytes in the file. Survives close.
    byte_size: u64,
}

/// One on-disk file holding a contiguous run of chunks.
///
/// A segment is either open (live file handle, chunks resident in memory)
/// or closed (only its descriptor: start id, path, byte size). Opening is
/// lazy; closing is always safe and is how the segment cache bounds memory.
///
/// All methods take `&self`; an internal lock serializes writes, deletes
/// and open/close transitions against readers.
pub struct Segment {
    start_id: ChunkId,
    path: PathBuf,
    state: RwLock<SegmentState>,
}

impl Segment {
    /// Creates a closed descriptor for a segment file.
    #[must_use]
    pub fn closed(start_id: ChunkId, path: PathBuf, byte_size: u64) -> Self {
        Self {
            start_id,
            path,
            state: RwLock::new(SegmentState {
                backend: None,
                chunks: Vec::new(),
                offsets: Vec::new(),
                byte_size,
            }),
        }
    }

    /// Creates (or reopens) the segment file at `path` and opens it.
    pub fn create(start_id: ChunkId, path: PathBuf) -> CoreResult<Self> {
        let segment = Self::closed(start_id, path, 0);
        segment.open()?;
        Ok(segment)
    }

    /// Returns the id of the first chunk this segment may hold.
    #[must_use]
    pub fn start_id(&self) -> ChunkId {
        self.start_id
    }

    /// Returns the path of the segment file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the file name of the segment.
    #[must_use]
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Returns whether the segment holds a live file handle.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.read().backend.is_some()
    }

    /// Returns the number of bytes written to the segment file.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        self.state.read().byte_size
    }

    /// Returns the number of resident chunks (zero while closed).
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.state.read().chunks.len()
    }

    /// Returns the id the next appended chunk must carry, if open.
    #[must_use]
    pub fn next_id(&self) -> Option<ChunkId> {
        let state = self.state.read();
        state
            .backend
            .as_ref()
            .map(|_| self.start_id.offset(state.chunks.len()))
    }

    /// Returns the id of the last resident chunk.
    #[must_use]
    pub fn last_id(&self) -> Option<ChunkId> {
        self.state.read().chunks.last().map(|c| c.id)
    }

    /// Whether `id` is resident in this segment.
    #[must_use]
    pub fn contains(&self, id: ChunkId) -> bool {
        let state = self.state.read();
        id >= self.start_id && id < self.start_id.offset(state.chunks.len())
    }

    /// Opens the segment file, creating it if missing, and loads its chunks.
    ///
    /// Opening an already open segment is a no-op.
    pub fn open(&self) -> CoreResult<()> {
        if self.is_open() {
            return Ok(());
        }
        let backend = FileBackend::open(&self.path)?;
        self.open_with(Box::new(backend))
    }

    /// Opens the segment over an explicit backend.
    ///
    /// A torn tail is cut off so the next append lands on a frame boundary.
    pub fn open_with(&self, backend: Box<dyn StorageBackend>) -> CoreResult<()> {
        self.load(backend, true)
    }

    /// Opens a sealed segment file, which must already exist.
    ///
    /// Sealed segments never receive appends, so a torn tail is reported
    /// and left on disk.
    pub fn open_sealed(&self) -> CoreResult<()> {
        if self.is_open() {
            return Ok(());
        }
        let backend = FileBackend::open_existing(&self.path)?;
        self.load(Box::new(backend), false)
    }

    fn load(&self, mut backend: Box<dyn StorageBackend>, repair_tail: bool) -> CoreResult<()> {
        let mut state = self.state.write();
        if state.backend.is_some() {
            return Ok(());
        }

        let data = backend.read_all()?;
        let parsed = parse_chunks(self.start_id, &data)?;

        let mut byte_size = parsed.valid_len;
        if parsed.torn && repair_tail {
            warn!(
                path = %self.path.display(),
                valid_len = parsed.valid_len,
                file_len = data.len(),
                "truncating torn segment tail"
            );
            backend.truncate(parsed.valid_len)?;
        } else if parsed.torn {
            warn!(
                path = %self.path.display(),
                valid_len = parsed.valid_len,
                file_len = data.len(),
                "sealed segment ends in a torn frame"
            );
            byte_size = data.len() as u64;
        }

        debug!(
            path = %self.path.display(),
            chunks = parsed.chunks.len(),
            "segment opened"
        );

        state.byte_size = byte_size;
        state.chunks = parsed.chunks;
        state.offsets = parsed.offsets;
        state.backend = Some(backend);
        Ok(())
    }

    /// Appends a batch of chunks at the tail of the segment.
    ///
    /// The batch must continue the segment's id run. Either every chunk is
    /// written (and synced when `sync` is set) or none is: on failure the
    /// file is cut back to its previous length.
    ///
    /// Returns the number of bytes written.
    pub fn append(&self, batch: &[Chunk], sync: bool) -> CoreResult<u64> {
        let mut state = self.state.write();
        let state = &mut *state;

        let Some(backend) = state.backend.as_mut() else {
            return Err(CoreError::invalid_operation(format!(
                "segment {} is closed",
                self.start_id
            )));
        };

        let mut expected = self.start_id.offset(state.chunks.len());
        let mut buf = Vec::new();
        let mut offsets = Vec::with_capacity(batch.len());
        for chunk in batch {
            if chunk.id != expected {
                return Err(CoreError::invalid_operation(format!(
                    "segment {} expects {expected}, got {}",
                    self.start_id, chunk.id
                )));
            }
            offsets.push(state.byte_size + buf.len() as u64);
            chunk.encode_into(&mut buf);
            expected = expected.next();
        }

        if buf.is_empty() {
            return Ok(0);
        }

        let written = backend.append(&buf).and_then(|_| {
            if sync {
                backend.sync()
            } else {
                backend.flush()
            }
        });

        if let Err(err) = written {
            if let Err(rollback) = backend.truncate(state.byte_size) {
                warn!(
                    path = %self.path.display(),
                    error = %rollback,
                    "failed to roll back partial append"
                );
            }
            return Err(err.into());
        }

        state.byte_size += buf.len() as u64;
        state.offsets.extend(offsets);
        state.chunks.extend_from_slice(batch);
        Ok(buf.len() as u64)
    }

    /// Returns the chunk with `id`, verifying its checksum.
    ///
    /// An id outside the resident range is `Ok(None)`.
    pub fn get(&self, id: ChunkId) -> CoreResult<Option<Chunk>> {
        let state = self.state.read();
        let Some(chunk) = self.index_of(id).and_then(|i| state.chunks.get(i)) else {
            return Ok(None);
        };
        chunk.verify()?;
        Ok(Some(chunk.clone()))
    }

    /// Returns every resident chunk in id order, verifying checksums.
    pub fn load_chunks(&self) -> CoreResult<Vec<Chunk>> {
        let state = self.state.read();
        for chunk in &state.chunks {
            chunk.verify()?;
        }
        Ok(state.chunks.clone())
    }

    /// Flags the chunk with `id` as deleted, in memory and on disk.
    ///
    /// Returns `false` if the id is not resident. Deleting twice is harmless.
    pub fn delete(&self, id: ChunkId) -> CoreResult<bool> {
        let mut state = self.state.write();
        let state = &mut *state;

        let Some(index) = self.index_of(id).filter(|&i| i < state.chunks.len()) else {
            return Ok(false);
        };
        if state.chunks[index].is_deleted() {
            return Ok(true);
        }

        let Some(backend) = state.backend.as_mut() else {
            return Ok(false);
        };
        backend.write_at(
            state.offsets[index] + FLAG_OFFSET,
            &[ChunkFlag::Deleted.as_byte()],
        )?;
        state.chunks[index].flag = ChunkFlag::Deleted;
        Ok(true)
    }

    /// Releases the file handle and the resident chunks.
    ///
    /// The byte size is kept so the descriptor stays accurate.
    pub fn close(&self) -> CoreResult<()> {
        let mut state = self.state.write();
        let Some(mut backend) = state.backend.take() else {
            return Ok(());
        };
        state.chunks = Vec::new();
        state.offsets = Vec::new();
        backend.flush()?;
        debug!(path = %self.path.display(), "segment closed");
        Ok(())
    }

    fn index_of(&self, id: ChunkId) -> Option<usize> {
        usize::try_from(id.as_i64() - self.start_id.as_i64()).ok()
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Segment")
            .field("start_id", &self.start_id)
            .field("path", &self.path)
            .field("byte_size", &state.byte_size)
            .field("open", &state.backend.is_some())
            .field("chunks", &state.chunks.len())
            .finish()
    }
}
