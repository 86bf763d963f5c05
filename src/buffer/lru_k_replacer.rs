use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::{FrameId, KeelError, Result};

#[derive(Debug, Default, Clone, Copy)]
struct FrameState {
    access_count: usize,
    is_evictable: bool,
}

/// All replacer state lives under one mutex.
#[derive(Debug, Default)]
struct ReplacerInner {
    frames: HashMap<FrameId, FrameState>,
    /// Frames with fewer than k accesses, newest at the front (FIFO victim
    /// order scans from the back).
    history_list: VecDeque<FrameId>,
    /// Frames with at least k accesses, most recently used at the front.
    cache_list: VecDeque<FrameId>,
    /// Number of currently evictable frames
    curr_size: usize,
}

impl ReplacerInner {
    fn erase(list: &mut VecDeque<FrameId>, frame_id: FrameId) {
        if let Some(pos) = list.iter().position(|&f| f == frame_id) {
            list.remove(pos);
        }
    }
}

/// LRU-K Replacement Policy
///
/// Frames with fewer than k recorded accesses live in a FIFO "history"
/// list; once a frame reaches k accesses it graduates to the LRU "cache"
/// list. Eviction scans the history list oldest-first (a frame without k
/// accesses has no reliable k-back distance, so it is the preferred
/// victim), then the cache list from its LRU end.
pub struct LruKReplacer {
    k: usize,
    /// Maximum number of frames the replacer can track
    max_frames: usize,
    inner: Mutex<ReplacerInner>,
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer for frame ids `0..max_frames`.
    pub fn new(k: usize, max_frames: usize) -> Self {
        assert!(k >= 1, "k must be at least 1");
        Self {
            k,
            max_frames,
            inner: Mutex::new(ReplacerInner::default()),
        }
    }

    /// Evicts the preferred victim among evictable frames, resetting its
    /// state completely. Returns None if no frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        if inner.curr_size == 0 {
            return None;
        }

        // Oldest history entry first, then the cache LRU end.
        let victim = Self::scan_back(&inner.history_list, &inner.frames)
            .or_else(|| Self::scan_back(&inner.cache_list, &inner.frames))?;

        ReplacerInner::erase(&mut inner.history_list, victim);
        ReplacerInner::erase(&mut inner.cache_list, victim);
        inner.frames.remove(&victim);
        inner.curr_size -= 1;
        Some(victim)
    }

    /// Finds the first evictable frame scanning from the back (the oldest /
    /// least recently used end).
    fn scan_back(
        list: &VecDeque<FrameId>,
        frames: &HashMap<FrameId, FrameState>,
    ) -> Option<FrameId> {
        list.iter()
            .rev()
            .copied()
            .find(|f| frames.get(f).is_some_and(|s| s.is_evictable))
    }

    /// Records an access to `frame_id`, promoting it between the history
    /// and cache lists as its access count crosses k.
    pub fn record_access(&self, frame_id: FrameId) -> Result<()> {
        if frame_id.as_usize() >= self.max_frames {
            return Err(KeelError::InvalidFrameId(frame_id));
        }

        let mut inner = self.inner.lock();
        let count = {
            let state = inner.frames.entry(frame_id).or_default();
            state.access_count += 1;
            state.access_count
        };

        if count == 1 {
            inner.history_list.push_front(frame_id);
        } else if count == self.k {
            ReplacerInner::erase(&mut inner.history_list, frame_id);
            inner.cache_list.push_front(frame_id);
        } else if count > self.k {
            ReplacerInner::erase(&mut inner.cache_list, frame_id);
            inner.cache_list.push_front(frame_id);
        }
        // 1 < count < k: FIFO position in the history list is unchanged.
        Ok(())
    }

    /// Marks `frame_id` evictable or pinned. Idempotent; a frame id that
    /// was never accessed is ignored.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        if frame_id.as_usize() >= self.max_frames {
            return;
        }

        let mut inner = self.inner.lock();
        let Some(state) = inner.frames.get_mut(&frame_id) else {
            return;
        };
        if state.is_evictable == evictable {
            return;
        }
        state.is_evictable = evictable;
        if evictable {
            inner.curr_size += 1;
        } else {
            inner.curr_size -= 1;
        }
    }

    /// Removes `frame_id` from the replacer regardless of its position.
    /// Untracked frames are a no-op; removing a non-evictable frame is a
    /// caller bug and fails loudly.
    pub fn remove(&self, frame_id: FrameId) -> Result<()> {
        if frame_id.as_usize() >= self.max_frames {
            return Err(KeelError::InvalidFrameId(frame_id));
        }

        let mut inner = self.inner.lock();
        let Some(state) = inner.frames.get(&frame_id).copied() else {
            return Ok(());
        };
        if !state.is_evictable {
            return Err(KeelError::FrameNotEvictable(frame_id));
        }

        ReplacerInner::erase(&mut inner.history_list, frame_id);
        ReplacerInner::erase(&mut inner.cache_list, frame_id);
        inner.frames.remove(&frame_id);
        inner.curr_size -= 1;
        Ok(())
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().curr_size
    }

    /// Returns the k value of this replacer.
    pub fn k(&self) -> usize {
        self.k
    }
}
