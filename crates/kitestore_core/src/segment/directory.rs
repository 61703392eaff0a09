//! Sorted directory of every known segment.

use crate::error::{CoreError, CoreResult};
use crate::segment::file::Segment;
use crate::types::ChunkId;
use std::sync::Arc;

/// All segments of a store, ascending by start id.
///
/// The directory records what exists on disk; whether a segment is loaded
/// is the cache's business. The last entry is the active segment, the only
/// one that receives appends.
#[derive(Debug, Default)]
pub struct SegmentDirectory {
    segments: Vec<Arc<Segment>>,
}

impl SegmentDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a directory from segments in any order.
    #[must_use]
    pub fn from_segments(mut segments: Vec<Arc<Segment>>) -> Self {
        segments.sort_by_key(|s| s.start_id());
        Self { segments }
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns whether the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the oldest segment.
    #[must_use]
    pub fn first(&self) -> Option<&Arc<Segment>> {
        self.segments.first()
    }

    /// Returns the active segment.
    #[must_use]
    pub fn last(&self) -> Option<&Arc<Segment>> {
        self.segments.last()
    }

    /// Returns whether `start_id` names the active segment.
    #[must_use]
    pub fn is_last(&self, start_id: ChunkId) -> bool {
        self.last().is_some_and(|s| s.start_id() == start_id)
    }

    /// Returns the segment starting exactly at `start_id`.
    #[must_use]
    pub fn get(&self, start_id: ChunkId) -> Option<&Arc<Segment>> {
        self.segments
            .binary_search_by_key(&start_id, |s| s.start_id())
            .ok()
            .map(|i| &self.segments[i])
    }

    /// Returns the segment with the greatest start id not above `id`.
    ///
    /// This is the only segment that can hold `id`; whether it actually
    /// does is for the segment to answer.
    #[must_use]
    pub fn floor(&self, id: ChunkId) -> Option<&Arc<Segment>> {
        let idx = self.segments.partition_point(|s| s.start_id() <= id);
        idx.checked_sub(1).map(|i| &self.segments[i])
    }

    /// Appends a new active segment.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] unless the new start id is
    /// above the current active segment's.
    pub fn push(&mut self, segment: Arc<Segment>) -> CoreResult<()> {
        if let Some(last) = self.last() {
            if segment.start_id() <= last.start_id() {
                return Err(CoreError::invalid_operation(format!(
                    "segment {} does not follow active segment {}",
                    segment.start_id(),
                    last.start_id()
                )));
            }
        }
        self.segments.push(segment);
        Ok(())
    }

    /// Removes the segment starting at `start_id`.
    pub fn remove(&mut self, start_id: ChunkId) -> Option<Arc<Segment>> {
        let idx = self
            .segments
            .binary_search_by_key(&start_id, |s| s.start_id())
            .ok()?;
        Some(self.segments.remove(idx))
    }

    /// Iterates over segments in ascending start id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Segment>> {
        self.segments.iter()
    }
}
