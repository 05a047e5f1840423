//! LRU-K page replacement policy.
//!
//! The replacer tracks per-frame access histories and selects eviction
//! victims by backward K-distance: the time elapsed since a frame's K-th most
//! recent access. Frames with fewer than K recorded accesses have infinite
//! K-distance and are preferred victims; ties among them break toward the
//! frame whose history started earliest.
//!
//! # Data Structure
//!
//! Rather than storing timestamps, frames live in one of two queues:
//!
//! - `hist_list` holds frames with fewer than K accesses. A frame enters at
//!   the front on its first access and is not reordered by later accesses,
//!   so the back of the queue is the coldest candidate.
//! - `cache_list` holds frames with K or more accesses, moved to the front on
//!   every access. Position from the back is exactly the backward K-distance
//!   order.
//!
//! Eviction scans `hist_list` from the back first, then `cache_list`.

use std::collections::{HashMap, VecDeque};

use super::frame::FrameId;

/// The kind of access being recorded.
///
/// Accepted for future policies that weight scans differently from point
/// lookups; the LRU-K policy itself ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessType {
    /// Unclassified access.
    #[default]
    Unknown,
    /// Point lookup.
    Lookup,
    /// Sequential scan.
    Scan,
    /// Index traversal.
    Index,
}

/// Replacer errors.
#[derive(Debug, PartialEq, Eq)]
pub enum ReplacerError {
    /// The frame id is outside the pool's frame range.
    InvalidFrameId(FrameId),
}

impl std::fmt::Display for ReplacerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplacerError::InvalidFrameId(frame_id) => {
                write!(f, "invalid frame id: {}", frame_id)
            }
        }
    }
}

impl std::error::Error for ReplacerError {}

/// Per-frame record in the replacer.
#[derive(Debug, Default)]
struct LruKNode {
    /// Number of recorded accesses.
    access_count: usize,
    /// Whether the frame may be selected as an eviction victim.
    is_evictable: bool,
}

/// LRU-K replacement policy over a fixed range of frame ids.
pub struct LruKReplacer {
    /// Number of frames the pool owns; valid ids are `0..num_frames`.
    num_frames: usize,
    /// The K in LRU-K.
    k: usize,
    /// Count of evictable frames.
    curr_size: usize,
    /// Per-frame access counts and evictability.
    node_store: HashMap<FrameId, LruKNode>,
    /// Frames with access_count < k; front = most recent first access.
    hist_list: VecDeque<FrameId>,
    /// Frames with access_count >= k; front = most recent access.
    cache_list: VecDeque<FrameId>,
}

impl LruKReplacer {
    /// Creates a replacer for `num_frames` frames with the given K.
    ///
    /// # Panics
    ///
    /// Panics if `k` is 0.
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1, "k must be at least 1");
        Self {
            num_frames,
            k,
            curr_size: 0,
            node_store: HashMap::with_capacity(num_frames),
            hist_list: VecDeque::new(),
            cache_list: VecDeque::new(),
        }
    }

    /// Records an access to a frame.
    ///
    /// On the first access the frame enters the history queue; on reaching K
    /// accesses it graduates to the cache queue; every later access moves it
    /// to the front of the cache queue.
    ///
    /// # Errors
    ///
    /// Returns `ReplacerError::InvalidFrameId` for ids outside `0..num_frames`.
    pub fn record_access(
        &mut self,
        frame_id: FrameId,
        _access_type: AccessType,
    ) -> Result<(), ReplacerError> {
        if frame_id.as_usize() >= self.num_frames {
            return Err(ReplacerError::InvalidFrameId(frame_id));
        }

        let node = self.node_store.entry(frame_id).or_default();
        node.access_count += 1;
        let count = node.access_count;

        if count == 1 {
            self.hist_list.push_front(frame_id);
        } else if count == self.k {
            remove_from(&mut self.hist_list, frame_id);
            self.cache_list.push_front(frame_id);
        } else if count > self.k {
            remove_from(&mut self.cache_list, frame_id);
            self.cache_list.push_front(frame_id);
        }
        // 1 < count < k: the frame keeps its history position, so ties among
        // the infinite-distance cohort break by earliest first access.

        Ok(())
    }

    /// Sets whether a frame may be evicted.
    ///
    /// Unknown frames are a no-op.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        let Some(node) = self.node_store.get_mut(&frame_id) else {
            return;
        };

        if evictable && !node.is_evictable {
            self.curr_size += 1;
        } else if node.is_evictable && !evictable {
            self.curr_size -= 1;
        }
        node.is_evictable = evictable;
    }

    /// Drops a frame and its access history from the replacer.
    ///
    /// Unknown frames are a no-op.
    ///
    /// # Panics
    ///
    /// Panics if the frame is present but not evictable; removing a pinned
    /// frame is a caller bug.
    pub fn remove(&mut self, frame_id: FrameId) {
        let Some(node) = self.node_store.get(&frame_id) else {
            return;
        };

        assert!(
            node.is_evictable,
            "cannot remove non-evictable frame {}",
            frame_id
        );

        if node.access_count < self.k {
            remove_from(&mut self.hist_list, frame_id);
        } else {
            remove_from(&mut self.cache_list, frame_id);
        }
        self.node_store.remove(&frame_id);
        self.curr_size -= 1;
    }

    /// Selects and removes the eviction victim with the largest backward
    /// K-distance, or returns `None` if no frame is evictable.
    pub fn evict(&mut self) -> Option<FrameId> {
        let victim = Self::scan_from_back(&self.hist_list, &self.node_store)
            .or_else(|| Self::scan_from_back(&self.cache_list, &self.node_store))?;

        let node = &self.node_store[&victim];
        if node.access_count < self.k {
            remove_from(&mut self.hist_list, victim);
        } else {
            remove_from(&mut self.cache_list, victim);
        }
        self.node_store.remove(&victim);
        self.curr_size -= 1;

        Some(victim)
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.curr_size
    }

    fn scan_from_back(
        list: &VecDeque<FrameId>,
        node_store: &HashMap<FrameId, LruKNode>,
    ) -> Option<FrameId> {
        list.iter()
            .rev()
            .copied()
            .find(|frame_id| node_store[frame_id].is_evictable)
    }
}

fn remove_from(list: &mut VecDeque<FrameId>, frame_id: FrameId) {
    if let Some(pos) = list.iter().position(|&id| id == frame_id) {
        list.remove(pos);
    }
}
