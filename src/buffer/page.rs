use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::disk::PageBuf;

/// A buffer frame: metadata plus the cached page data.
///
/// The pin count and dirty flag are atomics so the buffer pool can update
/// them without holding the data latch; the data itself sits behind a
/// reader-writer latch that index code takes explicitly while crabbing.
pub struct Page {
    /// The page ID stored in this frame (INVALID_PAGE_ID if empty)
    page_id: RwLock<PageId>,
    /// Number of callers currently holding this page
    pin_count: AtomicU32,
    /// Whether the page has been modified since being read from disk
    is_dirty: AtomicBool,
    /// The actual page data
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
}

pub type PageRef = Arc<Page>;

impl Page {
    pub fn new() -> Self {
        Self {
            page_id: RwLock::new(INVALID_PAGE_ID),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    pub fn page_id(&self) -> PageId {
        *self.page_id.read()
    }

    pub fn set_page_id(&self, page_id: PageId) {
        *self.page_id.write() = page_id;
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Takes another pin on this frame.
    pub fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops one pin and returns the remaining count, or None when the
    /// frame was not pinned at all.
    pub fn unpin(&self) -> Option<u32> {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .ok()
            .map(|previous| previous - 1)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Replaces the frame contents with a page arriving from disk.
    pub fn fill_from(&self, data: &[u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        self.data.write().copy_from_slice(data);
    }

    /// Clones the frame contents into an owned buffer, ready to hand to
    /// the disk scheduler.
    pub fn snapshot(&self) -> PageBuf {
        let guard = self.data.read();
        Box::new(**guard)
    }

    /// Returns the frame to its empty state between residencies.
    pub fn reset(&self) {
        self.data.write().fill(0);
        self.set_page_id(INVALID_PAGE_ID);
        self.set_dirty(false);
        self.pin_count.store(0, Ordering::Release);
    }

    /// Acquires the page's read latch.
    pub fn read_latch(self: &Arc<Self>) -> PageReadGuard {
        let guard = self.data.read();
        // The frame is kept alive via the Arc held by the guard, so the
        // lifetime extension is sound as long as the guard drops first
        // (field order below guarantees it).
        let guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> =
            unsafe { std::mem::transmute(guard) };
        PageReadGuard {
            guard,
            page: Arc::clone(self),
        }
    }

    /// Acquires the page's write latch.
    pub fn write_latch(self: &Arc<Self>) -> PageWriteGuard {
        let guard = self.data.write();
        let guard: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> =
            unsafe { std::mem::transmute(guard) };
        PageWriteGuard {
            guard,
            page: Arc::clone(self),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII read latch on a page's data. Dropping releases the latch; the pin
/// is managed separately through the buffer pool.
pub struct PageReadGuard {
    // Declared before `page` so the lock guard drops while the frame is
    // still alive.
    guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>,
    page: PageRef,
}

impl PageReadGuard {
    pub fn page_id(&self) -> PageId {
        self.page.page_id()
    }

    pub fn data(&self) -> &[u8] {
        &self.guard[..]
    }
}

/// RAII write latch on a page's data.
pub struct PageWriteGuard {
    guard: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>,
    page: PageRef,
}

impl PageWriteGuard {
    pub fn page_id(&self) -> PageId {
        self.page.page_id()
    }

    pub fn data(&self) -> &[u8] {
        &self.guard[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.guard[..]
    }
}
