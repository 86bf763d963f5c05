use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::common::{FrameId, KeelError, PageId, Result};
use crate::container::ExtendibleHashTable;
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{LruKReplacer, Page, PageRef};

const PAGE_TABLE_BUCKET_SIZE: usize = 8;

/// BufferPoolManager caches disk pages in a fixed set of frames.
///
/// The page-table (an extendible hash table) maps resident page ids to
/// frames, the free list hands out never-used frames, and the LRU-K
/// replacer picks victims among unpinned frames. A single latch serializes
/// the bookkeeping; disk transfers go through the scheduler while frame
/// state is already stabilized.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    /// The buffer pool frames, indexed by frame id
    frames: Vec<PageRef>,
    /// Page table: maps page IDs to frame IDs
    page_table: ExtendibleHashTable<PageId, FrameId>,
    /// Frames that never held a page
    free_list: Mutex<VecDeque<FrameId>>,
    /// LRU-K replacer for eviction decisions
    replacer: LruKReplacer,
    /// Next page id to hand out; page 0 is reserved for the header page
    next_page_id: AtomicU32,
    /// Serializes all bookkeeping operations
    latch: Mutex<()>,
    /// Disk scheduler wrapping the disk manager
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    /// Creates a buffer pool with `pool_size` frames and LRU-`k` eviction.
    pub fn new(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            frames.push(Arc::new(Page::new()));
            free_list.push_back(FrameId::new(i as u32));
        }

        Self {
            pool_size,
            frames,
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            free_list: Mutex::new(free_list),
            replacer: LruKReplacer::new(k, pool_size),
            next_page_id: AtomicU32::new(1),
            latch: Mutex::new(()),
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Allocates a new page and pins it into a frame.
    ///
    /// Fails with `BufferPoolFull` when every frame is pinned. The returned
    /// page has pin count 1 and zeroed contents.
    pub fn new_page(&self) -> Result<(PageId, PageRef)> {
        let _guard = self.latch.lock();

        let frame_id = self.acquire_frame()?;
        let page_id = PageId::new(self.next_page_id.fetch_add(1, Ordering::SeqCst));

        let frame = &self.frames[frame_id.as_usize()];
        frame.reset();
        frame.set_page_id(page_id);
        frame.pin();

        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id)?;
        self.replacer.set_evictable(frame_id, false);

        Ok((page_id, Arc::clone(frame)))
    }

    /// Fetches a page, reading it from disk on a miss. The page is pinned;
    /// the caller must `unpin_page` when done.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageRef> {
        if page_id == crate::common::INVALID_PAGE_ID {
            return Err(KeelError::InvalidPageId(page_id));
        }
        let _guard = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id.as_usize()];
            frame.pin();
            self.replacer.record_access(frame_id)?;
            self.replacer.set_evictable(frame_id, false);
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.acquire_frame()?;
        let frame = &self.frames[frame_id.as_usize()];

        let data = self.disk_scheduler.read_page(page_id)?;
        frame.set_page_id(page_id);
        frame.fill_from(&data[..]);
        frame.set_dirty(false);
        frame.pin();

        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id)?;
        self.replacer.set_evictable(frame_id, false);

        Ok(Arc::clone(frame))
    }

    /// Drops one pin on `page_id`, folding `is_dirty` into the frame's
    /// dirty flag. Returns false when the page is not resident or its pin
    /// count is already zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _guard = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.as_usize()];
        let Some(remaining) = frame.unpin() else {
            return false;
        };
        if is_dirty {
            frame.set_dirty(true);
        }
        if remaining == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Writes `page_id` to disk regardless of its dirty flag, then clears
    /// the flag. Returns false when the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let _guard = self.latch.lock();
        self.flush_page_internal(page_id)
    }

    fn flush_page_internal(&self, page_id: PageId) -> Result<bool> {
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(false);
        };
        let frame = &self.frames[frame_id.as_usize()];

        self.disk_scheduler.write_page(page_id, frame.snapshot())?;
        frame.set_dirty(false);
        Ok(true)
    }

    /// Flushes every resident page.
    pub fn flush_all_pages(&self) -> Result<()> {
        let _guard = self.latch.lock();

        for frame in &self.frames {
            let page_id = frame.page_id();
            if page_id != crate::common::INVALID_PAGE_ID {
                self.flush_page_internal(page_id)?;
            }
        }
        Ok(())
    }

    /// Deletes `page_id` from the pool, returning the frame to the free
    /// list. A page that is not resident needs no work and yields true; a
    /// pinned page cannot be deleted and yields false.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let _guard = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(true);
        };
        let frame = &self.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            return Ok(false);
        }

        self.page_table.remove(&page_id);
        self.replacer.remove(frame_id)?;
        frame.reset();
        self.free_list.lock().push_back(frame_id);
        self.disk_scheduler.disk_manager().deallocate_page(page_id)?;
        Ok(true)
    }

    /// Returns the pin count for a page, or None when it is not resident.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        self.page_table
            .find(&page_id)
            .map(|frame_id| self.frames[frame_id.as_usize()].pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.free_list.lock().len()
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.disk_scheduler.disk_manager()
    }

    /// Finds a frame for a new resident page: the free list first, then an
    /// eviction. Dirty victims are written out before the frame is reused.
    fn acquire_frame(&self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.lock().pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.replacer.evict() else {
            return Err(KeelError::BufferPoolFull);
        };

        let frame = &self.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            debug!("evicting dirty page {}, writing back", old_page_id);
            self.disk_scheduler
                .write_page(old_page_id, frame.snapshot())?;
        }

        self.page_table.remove(&old_page_id);
        frame.reset();
        Ok(frame_id)
    }
}
