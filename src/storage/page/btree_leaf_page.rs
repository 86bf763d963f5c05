use std::marker::PhantomData;

use crate::common::PageId;
use crate::index::KeyComparator;

use super::btree_page::{
    read_max_size, read_page_id, read_parent_page_id, read_size, read_u32, write_page_type,
    write_parent_page_id, write_size, write_u16, write_u32, BTreePageType, IndexField,
    BTREE_LEAF_PAGE_HEADER_SIZE, OFFSET_MAX_SIZE, OFFSET_NEXT_PAGE_ID, OFFSET_PAGE_ID,
    OFFSET_PARENT_PAGE_ID,
};

// Entry layout after the leaf header: [key bytes | record id] per slot,
// kept in ascending key order. Leaves chain through next-page-id.

fn entry_offset<K: IndexField, V: IndexField>(index: usize) -> usize {
    BTREE_LEAF_PAGE_HEADER_SIZE + index * (K::ENCODED_SIZE + V::ENCODED_SIZE)
}

fn key_at_raw<K: IndexField, V: IndexField>(data: &[u8], index: usize) -> K {
    K::decode(&data[entry_offset::<K, V>(index)..])
}

fn value_at_raw<K: IndexField, V: IndexField>(data: &[u8], index: usize) -> V {
    V::decode(&data[entry_offset::<K, V>(index) + K::ENCODED_SIZE..])
}

/// First index whose key is >= `key` (so also the insert position).
fn key_index_raw<K: IndexField, V: IndexField, C: KeyComparator<K>>(
    data: &[u8],
    key: &K,
    comparator: &C,
) -> usize {
    use std::cmp::Ordering;

    let size = read_size(data);
    let mut lo = 0;
    let mut hi = size;
    while lo < hi {
        let mid = (lo + hi) / 2;
        if comparator.compare(&key_at_raw::<K, V>(data, mid), key) == Ordering::Less {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Read-only view of a leaf B+Tree page.
pub struct BTreeLeafPageRef<'a, K, V> {
    data: &'a [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: IndexField, V: IndexField> BTreeLeafPageRef<'a, K, V> {
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert_eq!(super::btree_page::read_page_type(data), BTreePageType::Leaf);
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
        self.max_size() / 2
    }

    pub fn page_id(&self) -> PageId {
        read_page_id(self.data)
    }

    pub fn parent_page_id(&self) -> PageId {
        read_parent_page_id(self.data)
    }

    pub fn next_page_id(&self) -> PageId {
        PageId::new(read_u32(self.data, OFFSET_NEXT_PAGE_ID))
    }

    pub fn key_at(&self, index: usize) -> K {
        key_at_raw::<K, V>(self.data, index)
    }

    pub fn value_at(&self, index: usize) -> V {
        value_at_raw::<K, V>(self.data, index)
    }

    pub fn key_index<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> usize {
        key_index_raw::<K, V, C>(self.data, key, comparator)
    }

    /// Point lookup within this leaf.
    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> Option<V> {
        let index = self.key_index(key, comparator);
        if index < self.size()
            && comparator.compare(&self.key_at(index), key) == std::cmp::Ordering::Equal
        {
            Some(self.value_at(index))
        } else {
            None
        }
    }
}

/// Mutable view of a leaf B+Tree page.
pub struct BTreeLeafPage<'a, K, V> {
    data: &'a mut [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: IndexField, V: IndexField> BTreeLeafPage<'a, K, V> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Initializes a fresh leaf page with no next leaf.
    pub fn init(&mut self, page_id: PageId, parent_page_id: PageId, max_size: usize) {
        self.data.fill(0);
        write_page_type(self.data, BTreePageType::Leaf);
        write_size(self.data, 0);
        write_u16(self.data, OFFSET_MAX_SIZE, max_size as u16);
        write_u32(self.data, OFFSET_PAGE_ID, page_id.as_u32());
        write_u32(self.data, OFFSET_PARENT_PAGE_ID, parent_page_id.as_u32());
        write_u32(
            self.data,
            OFFSET_NEXT_PAGE_ID,
            crate::common::INVALID_PAGE_ID.as_u32(),
        );
    }

    pub fn size(&self) -> usize {
        read_size(self.data)
    }

    pub fn max_size(&self) -> usize {
        read_max_size(self.data)
    }

    pub fn min_size(&self) -> usize {
        self.max_size() / 2
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

    pub fn next_page_id(&self) -> PageId {
        PageId::new(read_u32(self.data, OFFSET_NEXT_PAGE_ID))
    }

    pub fn set_next_page_id(&mut self, next: PageId) {
        write_u32(self.data, OFFSET_NEXT_PAGE_ID, next.as_u32());
    }

    pub fn key_at(&self, index: usize) -> K {
        key_at_raw::<K, V>(self.data, index)
    }

    pub fn value_at(&self, index: usize) -> V {
        value_at_raw::<K, V>(self.data, index)
    }

    pub fn key_index<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> usize {
        key_index_raw::<K, V, C>(self.data, key, comparator)
    }

    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> Option<V> {
        let index = self.key_index(key, comparator);
        if index < self.size()
            && comparator.compare(&self.key_at(index), key) == std::cmp::Ordering::Equal
        {
            Some(self.value_at(index))
        } else {
            None
        }
    }

    fn set_size(&mut self, size: usize) {
        write_size(self.data, size);
    }

    fn entry_size() -> usize {
        K::ENCODED_SIZE + V::ENCODED_SIZE
    }

    fn set_entry(&mut self, index: usize, key: &K, value: &V) {
        let offset = entry_offset::<K, V>(index);
        key.encode(&mut self.data[offset..]);
        value.encode(&mut self.data[offset + K::ENCODED_SIZE..]);
    }

    fn shift_right(&mut self, from: usize) {
        let size = self.size();
        let start = entry_offset::<K, V>(from);
        let end = entry_offset::<K, V>(size);
        self.data.copy_within(start..end, start + Self::entry_size());
    }

    fn shift_left(&mut self, from: usize) {
        let size = self.size();
        let start = entry_offset::<K, V>(from);
        let end = entry_offset::<K, V>(size);
        self.data
            .copy_within(start..end, start - Self::entry_size());
    }

    /// Inserts `(key, value)` in sorted position. Duplicate keys are
    /// rejected; the size is returned either way, so an unchanged size
    /// signals the duplicate.
    pub fn insert<C: KeyComparator<K>>(&mut self, key: &K, value: &V, comparator: &C) -> usize {
        let size = self.size();
        let index = self.key_index(key, comparator);
        if index < size
            && comparator.compare(&self.key_at(index), key) == std::cmp::Ordering::Equal
        {
            return size;
        }

        self.shift_right(index);
        self.set_entry(index, key, value);
        self.set_size(size + 1);
        size + 1
    }

    /// Removes `key` if present, returning the resulting size (unchanged
    /// when the key was absent).
    pub fn remove_and_delete_record<C: KeyComparator<K>>(
        &mut self,
        key: &K,
        comparator: &C,
    ) -> usize {
        let size = self.size();
        let index = self.key_index(key, comparator);
        if index >= size
            || comparator.compare(&self.key_at(index), key) != std::cmp::Ordering::Equal
        {
            return size;
        }

        self.shift_left(index + 1);
        self.set_size(size - 1);
        size - 1
    }

    /// Moves the upper half of the entries to `recipient` (assumed fresh).
    /// The caller splices the leaf linked list.
    pub fn move_half_to(&mut self, recipient: &mut BTreeLeafPage<'_, K, V>) {
        let size = self.size();
        let split_from = (self.max_size() + 1) / 2;

        for i in split_from..size {
            let key = self.key_at(i);
            let value = self.value_at(i);
            recipient.push_back(&key, &value);
        }
        self.set_size(split_from);
    }

    /// Moves every entry into `recipient` and hands over the next-leaf
    /// pointer; used when this page merges into its left sibling.
    pub fn move_all_to(&mut self, recipient: &mut BTreeLeafPage<'_, K, V>) {
        let size = self.size();
        for i in 0..size {
            let key = self.key_at(i);
            let value = self.value_at(i);
            recipient.push_back(&key, &value);
        }
        self.set_size(0);
        recipient.set_next_page_id(self.next_page_id());
    }

    /// Moves the first entry to the end of `recipient` (the left sibling).
    pub fn move_first_to_end_of(&mut self, recipient: &mut BTreeLeafPage<'_, K, V>) {
        let key = self.key_at(0);
        let value = self.value_at(0);
        recipient.push_back(&key, &value);
        self.shift_left(1);
        let new_size = self.size() - 1;
        self.set_size(new_size);
    }

    /// Moves the last entry to the front of `recipient` (the right sibling).
    pub fn move_last_to_front_of(&mut self, recipient: &mut BTreeLeafPage<'_, K, V>) {
        let last = self.size() - 1;
        let key = self.key_at(last);
        let value = self.value_at(last);
        self.set_size(last);

        recipient.shift_right(0);
        recipient.set_entry(0, &key, &value);
        let new_size = recipient.size() + 1;
        recipient.set_size(new_size);
    }

    fn push_back(&mut self, key: &K, value: &V) {
        let size = self.size();
        self.set_entry(size, key, value);
        self.set_size(size + 1);
    }
}
