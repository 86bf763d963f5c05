use std::marker::PhantomData;

use crate::common::PageId;
use crate::index::KeyComparator;

use super::btree_page::{
    read_max_size, read_page_id, read_parent_page_id, read_size, write_page_type,
    write_parent_page_id, write_size, write_u16, write_u32, BTreePageType, IndexField,
    BTREE_PAGE_HEADER_SIZE, OFFSET_MAX_SIZE, OFFSET_PAGE_ID, OFFSET_PARENT_PAGE_ID,
};

// An internal page owns `size` children separated by `size - 1` keys; the
// key slot at index 0 is never consulted.
//
// Entry layout after the common header: [key bytes | child page id] per slot.

fn entry_offset<K: IndexField>(index: usize) -> usize {
    BTREE_PAGE_HEADER_SIZE + index * (K::ENCODED_SIZE + PageId::ENCODED_SIZE)
}

fn key_at_raw<K: IndexField>(data: &[u8], index: usize) -> K {
    K::decode(&data[entry_offset::<K>(index)..])
}

fn value_at_raw<K: IndexField>(data: &[u8], index: usize) -> PageId {
    PageId::decode(&data[entry_offset::<K>(index) + K::ENCODED_SIZE..])
}

fn lookup_raw<K: IndexField, C: KeyComparator<K>>(data: &[u8], key: &K, comparator: &C) -> PageId {
    use std::cmp::Ordering;

    let size = read_size(data);
    // Binary search over keys [1, size) for the first key >= target.
    let mut lo = 1;
    let mut hi = size;
    while lo < hi {
        let mid = (lo + hi) / 2;
        if comparator.compare(&key_at_raw::<K>(data, mid), key) == Ordering::Less {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }

    if lo == size {
        // Larger than every key: rightmost child.
        return value_at_raw::<K>(data, size - 1);
    }
    if comparator.compare(&key_at_raw::<K>(data, lo), key) == Ordering::Equal {
        return value_at_raw::<K>(data, lo);
    }
    value_at_raw::<K>(data, lo - 1)
}

/// Read-only view of an internal B+Tree page.
pub struct BTreeInternalPageRef<'a, K> {
    data: &'a [u8],
    _marker: PhantomData<K>,
}

impl<'a, K: IndexField> BTreeInternalPageRef<'a, K> {
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert_eq!(
            super::btree_page::read_page_type(data),
            BTreePageType::Internal
        );
        Self {
            data,
            _marker: PhantomData,
        }
    }

    pub fn size(&self) -> usize {
        read_size(self.data)
    }

    pub fn max_size(&self) -> usize {
        read_max_size(self.data)
    }

    pub fn min_size(&self) -> usize {
        (self.max_size() + 1) / 2
    }

    pub fn page_id(&self) -> PageId {
        read_page_id(self.data)
    }

    pub fn parent_page_id(&self) -> PageId {
        read_parent_page_id(self.data)
    }

    pub fn key_at(&self, index: usize) -> K {
        key_at_raw::<K>(self.data, index)
    }

    pub fn value_at(&self, index: usize) -> PageId {
        value_at_raw::<K>(self.data, index)
    }

    /// Index of the entry holding `value`, if present.
    pub fn value_index(&self, value: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == value)
    }

    /// Child to descend into when searching for `key`.
    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> PageId {
        lookup_raw::<K, C>(self.data, key, comparator)
    }
}

/// Mutable view of an internal B+Tree page.
pub struct BTreeInternalPage<'a, K> {
    data: &'a mut [u8],
    _marker: PhantomData<K>,
}

impl<'a, K: IndexField> BTreeInternalPage<'a, K> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Initializes a fresh internal page.
    pub fn init(&mut self, page_id: PageId, parent_page_id: PageId, max_size: usize) {
        self.data.fill(0);
        write_page_type(self.data, BTreePageType::Internal);
        write_size(self.data, 0);
        write_u16(self.data, OFFSET_MAX_SIZE, max_size as u16);
        write_u32(self.data, OFFSET_PAGE_ID, page_id.as_u32());
        write_u32(self.data, OFFSET_PARENT_PAGE_ID, parent_page_id.as_u32());
    }

    pub fn size(&self) -> usize {
        read_size(self.data)
    }

    pub fn max_size(&self) -> usize {
        read_max_size(self.data)
    }

    pub fn min_size(&self) -> usize {
        (self.max_size() + 1) / 2
    }

    pub fn page_id(&self) -> PageId {
        read_page_id(self.data)
    }

    pub fn parent_page_id(&self) -> PageId {
        read_parent_page_id(self.data)
    }

    pub fn set_parent_page_id(&mut self, parent: PageId) {
        write_parent_page_id(self.data, parent);
    }

    pub fn key_at(&self, index: usize) -> K {
        key_at_raw::<K>(self.data, index)
    }

    pub fn set_key_at(&mut self, index: usize, key: &K) {
        key.encode(&mut self.data[entry_offset::<K>(index)..]);
    }

    pub fn value_at(&self, index: usize) -> PageId {
        value_at_raw::<K>(self.data, index)
    }

    pub fn set_value_at(&mut self, index: usize, value: PageId) {
        value.encode(&mut self.data[entry_offset::<K>(index) + K::ENCODED_SIZE..]);
    }

    pub fn value_index(&self, value: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == value)
    }

    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> PageId {
        lookup_raw::<K, C>(self.data, key, comparator)
    }

    fn set_size(&mut self, size: usize) {
        write_size(self.data, size);
    }

    fn entry_size() -> usize {
        K::ENCODED_SIZE + PageId::ENCODED_SIZE
    }

    /// Shifts entries `[from, size)` right by one slot.
    fn shift_right(&mut self, from: usize) {
        let size = self.size();
        let start = entry_offset::<K>(from);
        let end = entry_offset::<K>(size);
        self.data.copy_within(start..end, start + Self::entry_size());
    }

    /// Shifts entries `[from, size)` left by one slot.
    fn shift_left(&mut self, from: usize) {
        let size = self.size();
        let start = entry_offset::<K>(from);
        let end = entry_offset::<K>(size);
        self.data
            .copy_within(start..end, start - Self::entry_size());
    }

    /// Turns this page into a new root over exactly two children.
    pub fn populate_new_root(&mut self, left: PageId, key: &K, right: PageId) {
        self.set_value_at(0, left);
        self.set_key_at(1, key);
        self.set_value_at(1, right);
        self.set_size(2);
    }

    /// Inserts `(key, value)` immediately after the entry holding
    /// `old_value`. Returns the new size.
    pub fn insert_node_after(&mut self, old_value: PageId, key: &K, value: PageId) -> usize {
        let insert_at = self
            .value_index(old_value)
            .expect("old child must be present")
            + 1;
        self.shift_right(insert_at);
        self.set_key_at(insert_at, key);
        self.set_value_at(insert_at, value);
        let new_size = self.size() + 1;
        self.set_size(new_size);
        new_size
    }

    /// Removes the entry at `index`.
    pub fn remove(&mut self, index: usize) {
        debug_assert!(index < self.size());
        self.shift_left(index + 1);
        let new_size = self.size() - 1;
        self.set_size(new_size);
    }

    /// Appends `(key, value)` without any ordering check; used when
    /// rebuilding a page from a scratch buffer.
    pub fn push_back(&mut self, key: &K, value: PageId) {
        let size = self.size();
        self.set_key_at(size, key);
        self.set_value_at(size, value);
        self.set_size(size + 1);
    }

    /// Moves the upper half of this page's entries to `recipient` (assumed
    /// fresh). Returns the page ids of the moved children so the caller can
    /// re-point their parent ids at the recipient.
    pub fn move_half_to(&mut self, recipient: &mut BTreeInternalPage<'_, K>) -> Vec<PageId> {
        let size = self.size();
        let split_from = self.min_size();
        let mut moved = Vec::with_capacity(size - split_from);

        for i in split_from..size {
            let key = self.key_at(i);
            let value = self.value_at(i);
            recipient.push_back(&key, value);
            moved.push(value);
        }
        self.set_size(split_from);
        moved
    }

    /// Moves every entry into `recipient`, pulling `middle_key` (the
    /// parent's separator) down as the first moved key. Returns the moved
    /// children's page ids.
    pub fn move_all_to(
        &mut self,
        recipient: &mut BTreeInternalPage<'_, K>,
        middle_key: &K,
    ) -> Vec<PageId> {
        let size = self.size();
        let mut moved = Vec::with_capacity(size);

        for i in 0..size {
            let key = if i == 0 {
                *middle_key
            } else {
                self.key_at(i)
            };
            let value = self.value_at(i);
            recipient.push_back(&key, value);
            moved.push(value);
        }
        self.set_size(0);
        moved
    }

    /// Moves this page's first child to the end of `recipient` (its left
    /// sibling). The parent's separator comes down as the moved entry's
    /// key. Returns the moved child's page id.
    pub fn move_first_to_end_of(
        &mut self,
        recipient: &mut BTreeInternalPage<'_, K>,
        middle_key: &K,
    ) -> PageId {
        let value = self.value_at(0);
        recipient.push_back(middle_key, value);
        self.shift_left(1);
        let new_size = self.size() - 1;
        self.set_size(new_size);
        value
    }

    /// Moves this page's last child to the front of `recipient` (its right
    /// sibling). The parent's separator comes down to caption what used to
    /// be the recipient's first child. Returns the moved child's page id.
    pub fn move_last_to_front_of(
        &mut self,
        recipient: &mut BTreeInternalPage<'_, K>,
        middle_key: &K,
    ) -> PageId {
        let last = self.size() - 1;
        let key = self.key_at(last);
        let value = self.value_at(last);
        self.set_size(last);

        recipient.shift_right(0);
        recipient.set_key_at(1, middle_key);
        recipient.set_value_at(0, value);
        recipient.set_key_at(0, &key);
        let new_size = recipient.size() + 1;
        recipient.set_size(new_size);
        // The recipient's slot-0 key is unused; writing `key` there keeps
        // the donor's key available to the caller via key_at(0) before the
        // parent separator is fixed up.
        value
    }
}
