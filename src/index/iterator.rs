use std::marker::PhantomData;
use std::sync::Arc;

use crate::buffer::{BufferPoolManager, PageReadGuard};
use crate::common::{PageId, Result, INVALID_PAGE_ID};
use crate::storage::page::{BTreeLeafPageRef, IndexField};

/// An ordered cursor over the B+Tree's leaf linked list.
///
/// The iterator holds a read latch and a pin on its current leaf; crossing
/// to the next leaf acquires that leaf's latch before the current one is
/// released. Dropping the iterator releases whatever it holds.
///
/// A "null" iterator (no leaf) compares equal to every iterator, so
/// `iter != end` loops terminate against either representation of the end.
pub struct IndexIterator<K, V> {
    bpm: Arc<BufferPoolManager>,
    guard: Option<PageReadGuard>,
    page_id: PageId,
    index: usize,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> IndexIterator<K, V>
where
    K: IndexField,
    V: IndexField,
{
    pub(crate) fn new(
        bpm: Arc<BufferPoolManager>,
        guard: Option<PageReadGuard>,
        index: usize,
    ) -> Self {
        let page_id = guard.as_ref().map_or(INVALID_PAGE_ID, |g| g.page_id());
        Self {
            bpm,
            guard,
            page_id,
            index,
            _marker: PhantomData,
        }
    }

    pub(crate) fn null(bpm: Arc<BufferPoolManager>) -> Self {
        Self::new(bpm, None, 0)
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// True when no element is left to yield.
    pub fn is_end(&self) -> bool {
        let Some(guard) = &self.guard else {
            return true;
        };
        let leaf = BTreeLeafPageRef::<K, V>::new(guard.data());
        self.index >= leaf.size() && leaf.next_page_id() == INVALID_PAGE_ID
    }

    /// The entry under the cursor, hopping leaves if the index sits past
    /// the current leaf's last element.
    fn entry(&mut self) -> Result<Option<(K, V)>> {
        loop {
            let Some(guard) = &self.guard else {
                return Ok(None);
            };
            let (size, next) = {
                let leaf = BTreeLeafPageRef::<K, V>::new(guard.data());
                (leaf.size(), leaf.next_page_id())
            };

            if self.index < size {
                let leaf = BTreeLeafPageRef::<K, V>::new(guard.data());
                return Ok(Some((leaf.key_at(self.index), leaf.value_at(self.index))));
            }
            if next == INVALID_PAGE_ID {
                return Ok(None);
            }
            self.hop_to(next)?;
        }
    }

    /// Moves to the front of `next`: latch the next leaf, then release the
    /// current one.
    fn hop_to(&mut self, next: PageId) -> Result<()> {
        let next_page = self.bpm.fetch_page(next)?;
        let next_guard = next_page.read_latch();

        if let Some(old) = self.guard.take() {
            let old_page_id = old.page_id();
            drop(old);
            self.bpm.unpin_page(old_page_id, false);
        }

        self.guard = Some(next_guard);
        self.page_id = next;
        self.index = 0;
        Ok(())
    }
}

impl<K, V> Iterator for IndexIterator<K, V>
where
    K: IndexField,
    V: IndexField,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.entry() {
            Ok(Some(item)) => {
                self.index += 1;
                Some(Ok(item))
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl<K, V> PartialEq for IndexIterator<K, V> {
    fn eq(&self, other: &Self) -> bool {
        // A null iterator compares equal to anything; `!=`-style end
        // checks depend on this.
        if self.page_id == INVALID_PAGE_ID || other.page_id == INVALID_PAGE_ID {
            return true;
        }
        self.page_id == other.page_id && self.index == other.index
    }
}

impl<K, V> Drop for IndexIterator<K, V> {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            let page_id = guard.page_id();
            drop(guard);
            self.bpm.unpin_page(page_id, false);
        }
    }
}
