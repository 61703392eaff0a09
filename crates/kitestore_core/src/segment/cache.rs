//! Bounded cache of opened segments.

use crate::segment::file::Segment;
use crate::types::ChunkId;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// A bounded set of opened segments with first-in, first-out eviction.
///
/// Membership is keyed by start id, so finding the segment that holds an
/// id is a range lookup rather than a scan. Eviction follows admission
/// order, not access order.
///
/// The cache never closes anything itself: [`SegmentCache::admit`] hands
/// the evicted segments back so the owner can decide which may be closed.
#[derive(Debug)]
pub struct SegmentCache {
    capacity: usize,
    order: VecDeque<ChunkId>,
    segments: BTreeMap<ChunkId, Arc<Segment>>,
}

impl SegmentCache {
    /// Creates an empty cache holding at most `capacity` segments.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::with_capacity(capacity),
            segments: BTreeMap::new(),
        }
    }

    /// Returns the maximum number of cached segments.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of cached segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the cached segment whose resident chunks include `id`.
    #[must_use]
    pub fn lookup(&self, id: ChunkId) -> Option<Arc<Segment>> {
        self.segments
            .range(..=id)
            .next_back()
            .map(|(_, s)| s)
            .filter(|s| s.contains(id))
            .cloned()
    }

    /// Returns the cached segment starting at `start_id`.
    #[must_use]
    pub fn get(&self, start_id: ChunkId) -> Option<Arc<Segment>> {
        self.segments.get(&start_id).cloned()
    }

    /// Returns whether the segment starting at `start_id` is cached.
    #[must_use]
    pub fn contains_segment(&self, start_id: ChunkId) -> bool {
        self.segments.contains_key(&start_id)
    }

    /// Admits a segment, evicting the oldest entries to make room.
    ///
    /// Returns the evicted segments. Admitting a segment that is already
    /// cached changes nothing.
    pub fn admit(&mut self, segment: Arc<Segment>) -> Vec<Arc<Segment>> {
        let start_id = segment.start_id();
        if self.segments.contains_key(&start_id) {
            return Vec::new();
        }

        let mut evicted = Vec::new();
        while self.segments.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(old) = self.segments.remove(&oldest) {
                evicted.push(old);
            }
        }

        self.order.push_back(start_id);
        self.segments.insert(start_id, segment);
        evicted
    }

    /// Drops the segment starting at `start_id` from the cache.
    pub fn remove(&mut self, start_id: ChunkId) -> Option<Arc<Segment>> {
        let segment = self.segments.remove(&start_id)?;
        self.order.retain(|&id| id != start_id);
        Some(segment)
    }

    /// Empties the cache, returning its segments in admission order.
    pub fn drain(&mut self) -> Vec<Arc<Segment>> {
        let mut drained = Vec::with_capacity(self.segments.len());
        for start_id in self.order.drain(..) {
            if let Some(segment) = self.segments.remove(&start_id) {
                drained.push(segment);
            }
        }
        drained
    }
}
