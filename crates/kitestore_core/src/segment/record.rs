//! Chunk record types and framing.

use crate::error::{CoreError, CoreResult};
use crate::types::ChunkId;

/// Header size: length (4) + id (8) + checksum (4) + flag (1) = 17
pub const CHUNK_HEADER_SIZE: usize = 17;

/// Largest encoded chunk, header included.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Largest payload a chunk may carry.
pub const MAX_PAYLOAD_SIZE: usize = MAX_CHUNK_SIZE - CHUNK_HEADER_SIZE;

/// Position of the flag byte inside an encoded chunk.
pub(crate) const FLAG_OFFSET: u64 = 16;

/// Computes the CRC32 (IEEE) checksum of a chunk payload.
#[must_use]
pub fn compute_checksum(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

/// Status flag of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkFlag {
    /// Live chunk.
    #[default]
    Normal,
    /// Soft-deleted chunk. Its bytes stay on disk.
    Deleted,
}

impl ChunkFlag {
    /// Parses a flag byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Normal),
            1 => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Returns the on-disk byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Deleted => 1,
        }
    }
}

/// One stored message.
///
/// The checksum covers the payload only, so flipping the flag in place
/// never invalidates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Store-assigned identifier.
    pub id: ChunkId,
    /// CRC32 of `payload`, computed at creation.
    pub checksum: u32,
    /// Status flag.
    pub flag: ChunkFlag,
    /// Opaque caller bytes.
    pub payload: Vec<u8>,
}

impl Chunk {
    /// Creates a normal chunk and computes its checksum.
    #[must_use]
    pub fn new(id: ChunkId, payload: Vec<u8>) -> Self {
        Self {
            id,
            checksum: compute_checksum(&payload),
            flag: ChunkFlag::Normal,
            payload,
        }
    }

    /// Returns whether the chunk has been soft-deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.flag == ChunkFlag::Deleted
    }

    /// Returns the framed size of this chunk on disk.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        CHUNK_HEADER_SIZE + self.payload.len()
    }

    /// Recomputes the payload checksum and compares it to the stored one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ChecksumMismatch`] if they differ.
    pub fn verify(&self) -> CoreResult<()> {
        let actual = compute_checksum(&self.payload);
        if actual != self.checksum {
            return Err(CoreError::ChecksumMismatch {
                id: self.id,
                expected: self.checksum,
                actual,
            });
        }
        Ok(())
    }

    /// Appends the framed chunk to `buf`.
    ///
    /// ```text
    /// | length (4) | id (8) | checksum (4) | flag (1) | payload (N) |
    /// ```
    ///
    /// `length` counts the whole frame, header included. Payloads above
    /// [`MAX_PAYLOAD_SIZE`] produce frames that do not decode; the store
    /// rejects them before they get here.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let len = self.encoded_len() as u32;
        buf.reserve(self.encoded_len());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&self.id.as_i64().to_le_bytes());
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf.push(self.flag.as_byte());
        buf.extend_from_slice(&self.payload);
    }

    /// Encodes the chunk to a fresh buffer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Decodes exactly one chunk from `data`.
    ///
    /// The checksum is carried over, not verified; see [`Chunk::verify`].
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        match decode_frame(data)? {
            Frame::Complete { chunk, len } if len == data.len() => Ok(chunk),
            Frame::Complete { .. } => Err(CoreError::segment_corruption(
                "trailing bytes after chunk frame",
            )),
            Frame::Torn { .. } => Err(CoreError::segment_corruption("incomplete chunk frame")),
        }
    }
}

/// Result of decoding the frame at the start of a buffer.
#[derive(Debug)]
pub(crate) enum Frame {
    /// A whole chunk and the number of bytes it occupied.
    Complete { chunk: Chunk, len: usize },
    /// The buffer ends before the frame does.
    ///
    /// `id` is set when the header itself was complete.
    Torn { id: Option<ChunkId> },
}

/// Decodes the frame at the start of `data`.
///
/// Running out of bytes is [`Frame::Torn`], which recovery treats as a
/// crash mid-write. A header that cannot describe a valid frame is an
/// error, even when the frame it claims would run past the end of `data`.
pub(crate) fn decode_frame(data: &[u8]) -> CoreResult<Frame> {
    if data.len() < CHUNK_HEADER_SIZE {
        return Ok(Frame::Torn { id: None });
    }

    let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if len < CHUNK_HEADER_SIZE {
        return Err(CoreError::segment_corruption(format!(
            "chunk length {len} is smaller than the header"
        )));
    }
    if len > MAX_CHUNK_SIZE {
        return Err(CoreError::segment_corruption(format!(
            "chunk length {len} exceeds the {MAX_CHUNK_SIZE} byte limit"
        )));
    }

    let mut id_bytes = [0u8; 8];
    id_bytes.copy_from_slice(&data[4..12]);
    let id = ChunkId::new(i64::from_le_bytes(id_bytes));

    let checksum = u32::from_le_bytes([data[12], data[13], data[14], data[15]]);

    let flag = ChunkFlag::from_byte(data[16]).ok_or_else(|| {
        CoreError::segment_corruption(format!("unknown flag {:#04x} on {id}", data[16]))
    })?;

    if data.len() < len {
        return Ok(Frame::Torn { id: Some(id) });
    }

    let payload = data[CHUNK_HEADER_SIZE..len].to_vec();

    Ok(Frame::Complete {
        chunk: Chunk {
            id,
            checksum,
            flag,
            payload,
        },
        len,
    })
}
