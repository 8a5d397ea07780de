use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// LRU (Least Recently Used) page replacement policy.
///
/// Candidates are frames whose pin count has dropped to zero. The order map
/// keeps unpin recency: the oldest entry is the next victim. `pin` removes a
/// frame from the candidate set, `unpin` adds it if absent.
pub struct LruReplacer {
    inner: Mutex<LruInner>,
}

struct LruInner {
    // insertion-ordered; front = least recently unpinned = next victim
    order: LinkedHashMap<FrameId, ()>,
    capacity: usize,
}

impl LruReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            inner: Mutex::new(LruInner {
                order: LinkedHashMap::new(),
                capacity: pool_size,
            }),
        }
    }

    /// Remove and return the least recently unpinned frame
    pub fn victim(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        inner.order.pop_front().map(|(frame_id, _)| frame_id)
    }

    /// A frame was pinned: it is no longer a replacement candidate
    pub fn pin(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        let _ = inner.order.remove(&frame_id);
    }

    /// A frame's pin count dropped to zero: make it a candidate.
    /// No-op if the frame is already present.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if inner.order.len() < inner.capacity && !inner.order.contains_key(&frame_id) {
            let _ = inner.order.insert(frame_id, ());
        }
    }

    /// Current candidate count
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
