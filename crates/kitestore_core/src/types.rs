//! Core type definitions for KiteStore.

use std::fmt;

/// Identifier of a stored chunk.
///
/// Ids are assigned by the store, never by the caller. They are unique and
/// strictly increasing within one store directory. Segment start ids use
/// the same type, which is what lets the directory be binary-searched by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId(pub i64);

impl ChunkId {
    /// Sentinel for "no chunk": an empty head, a rejected append.
    pub const INVALID: Self = Self(-1);

    /// The first id handed out by a fresh store.
    pub const FIRST: Self = Self(0);

    /// Creates a chunk id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Returns the id that follows this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the id `n` positions after this one.
    #[must_use]
    pub const fn offset(self, n: usize) -> Self {
        Self(self.0 + n as i64)
    }

    /// Whether this is a real id rather than the [`ChunkId::INVALID`] sentinel.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk:{}", self.0)
    }
}

impl From<i64> for ChunkId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}
