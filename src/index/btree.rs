use std::marker::PhantomData;
use std::sync::Arc;

use log::debug;
use parking_lot::{RwLock, RwLockWriteGuard};

use crate::buffer::{BufferPoolManager, PageReadGuard, PageWriteGuard};
use crate::common::{PageId, Result, HEADER_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::page::{
    BTreeInternalPage, BTreeInternalPageRef, BTreeLeafPage, BTreeLeafPageRef, BTreePageRef,
    HeaderPage, IndexField, BTREE_LEAF_PAGE_HEADER_SIZE, BTREE_PAGE_HEADER_SIZE,
};

use super::iterator::IndexIterator;
use super::KeyComparator;

/// The operation a descent is performed for; decides the latching mode and
/// the safe-node rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TreeOp {
    Insert,
    Delete,
}

/// Which leaf a read-only descent should land on.
#[derive(Clone, Copy)]
enum LeafTarget<'k, K> {
    Key(&'k K),
    Leftmost,
    Rightmost,
}

/// Latches and bookkeeping accumulated by one write operation.
///
/// `header` holds the tree's root latch (the crabbing sentinel); `path`
/// holds write latches from the highest retained ancestor down to the
/// current node. Deleted pages and deferred parent-pointer updates are
/// applied after every latch is released.
struct WriteContext<'a> {
    bpm: &'a BufferPoolManager,
    header: Option<RwLockWriteGuard<'a, PageId>>,
    path: Vec<PageWriteGuard>,
    deleted: Vec<PageId>,
    reparent: Vec<(PageId, PageId)>,
}

impl<'a> WriteContext<'a> {
    fn new(bpm: &'a BufferPoolManager, header: RwLockWriteGuard<'a, PageId>) -> Self {
        Self {
            bpm,
            header: Some(header),
            path: Vec::new(),
            deleted: Vec::new(),
            reparent: Vec::new(),
        }
    }

    /// Releases every retained ancestor latch, deepest first, unpinning the
    /// pages clean: they are guaranteed unmodified by this operation.
    fn release_ancestors(&mut self) {
        while let Some(guard) = self.path.pop() {
            let page_id = guard.page_id();
            drop(guard);
            self.bpm.unpin_page(page_id, false);
        }
        self.header = None;
    }
}

impl Drop for WriteContext<'_> {
    fn drop(&mut self) {
        // Backstop for error unwinds: release remaining latches and pins.
        while let Some(guard) = self.path.pop() {
            let page_id = guard.page_id();
            drop(guard);
            self.bpm.unpin_page(page_id, true);
        }
    }
}

/// A concurrent B+Tree index over fixed-width keys and values.
///
/// Pages are resolved through the buffer pool; descents crab latches
/// top-down, releasing ancestors as soon as the child is known safe for
/// the operation. The root page id lives behind a reader-writer latch and
/// is mirrored into the header page record for this index name.
pub struct BPlusTree<K, V, C> {
    index_name: String,
    /// Holding this lock's guard is the header latch of the tree.
    root_page_id: RwLock<PageId>,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: usize,
    internal_max_size: usize,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: IndexField,
    V: IndexField,
    C: KeyComparator<K>,
{
    /// Creates an empty tree. Nothing touches disk until the first insert.
    pub fn new(
        index_name: &str,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Self {
        assert!(leaf_max_size >= 2, "leaf max size too small");
        assert!(internal_max_size >= 3, "internal max size too small");
        let leaf_entry = K::ENCODED_SIZE + V::ENCODED_SIZE;
        let internal_entry = K::ENCODED_SIZE + PageId::ENCODED_SIZE;
        assert!(
            BTREE_LEAF_PAGE_HEADER_SIZE + leaf_max_size * leaf_entry <= PAGE_SIZE,
            "leaf max size does not fit a page"
        );
        assert!(
            BTREE_PAGE_HEADER_SIZE + internal_max_size * internal_entry <= PAGE_SIZE,
            "internal max size does not fit a page"
        );

        Self {
            index_name: index_name.to_string(),
            root_page_id: RwLock::new(INVALID_PAGE_ID),
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        }
    }

    /// Opens a tree whose root was previously recorded in the header page.
    pub fn open(
        index_name: &str,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let tree = Self::new(index_name, Arc::clone(&bpm), comparator, leaf_max_size, internal_max_size);
        let page = bpm.fetch_page(HEADER_PAGE_ID)?;
        let root = {
            let mut guard = page.write_latch();
            let header = HeaderPage::new(guard.data_mut());
            header.get_root_id(index_name)
        };
        bpm.unpin_page(HEADER_PAGE_ID, false);
        if let Some(root) = root {
            *tree.root_page_id.write() = root;
        }
        Ok(tree)
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    pub fn get_root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    /// Mirrors the current root page id into the header page record for
    /// this index: inserted on first use, updated afterwards.
    pub fn update_root_page_id(&self, insert: bool) -> Result<()> {
        let root = *self.root_page_id.read();
        self.record_root_page_id(root, insert)
    }

    fn record_root_page_id(&self, root: PageId, insert: bool) -> Result<()> {
        let page = self.bpm.fetch_page(HEADER_PAGE_ID)?;
        let result = {
            let mut guard = page.write_latch();
            let mut header = HeaderPage::new(guard.data_mut());
            if insert {
                header.insert_record(&self.index_name, root)
            } else {
                header.update_record(&self.index_name, root)
            }
        };
        self.bpm.unpin_page(HEADER_PAGE_ID, true);
        result
    }

    /*****************************************************************
     * SEARCH
     *****************************************************************/

    /// Point lookup: descends with read crabbing and probes the leaf.
    pub fn get_value(&self, key: &K) -> Result<Option<V>> {
        let Some(guard) = self.find_leaf_read(LeafTarget::Key(key))? else {
            return Ok(None);
        };
        let result = BTreeLeafPageRef::<K, V>::new(guard.data()).lookup(key, &self.comparator);
        let page_id = guard.page_id();
        drop(guard);
        self.bpm.unpin_page(page_id, false);
        Ok(result)
    }

    /// Read-latched descent to a leaf. Each child is latched before the
    /// parent latch is released. Returns None on an empty tree.
    fn find_leaf_read(&self, target: LeafTarget<'_, K>) -> Result<Option<PageReadGuard>> {
        let header = self.root_page_id.read();
        let root = *header;
        if root == INVALID_PAGE_ID {
            return Ok(None);
        }

        let page = self.bpm.fetch_page(root)?;
        let mut guard = page.read_latch();
        drop(header);

        loop {
            let child = {
                let view = BTreePageRef::new(guard.data());
                if view.is_leaf() {
                    return Ok(Some(guard));
                }
                let internal = BTreeInternalPageRef::<K>::new(guard.data());
                match target {
                    LeafTarget::Key(key) => internal.lookup(key, &self.comparator),
                    LeafTarget::Leftmost => internal.value_at(0),
                    LeafTarget::Rightmost => internal.value_at(internal.size() - 1),
                }
            };

            let child_page = match self.bpm.fetch_page(child) {
                Ok(page) => page,
                Err(e) => {
                    let page_id = guard.page_id();
                    drop(guard);
                    self.bpm.unpin_page(page_id, false);
                    return Err(e);
                }
            };
            let child_guard = child_page.read_latch();

            let page_id = guard.page_id();
            drop(guard);
            self.bpm.unpin_page(page_id, false);
            guard = child_guard;
        }
    }

    /*****************************************************************
     * INSERTION
     *****************************************************************/

    /// Inserts `(key, value)`. Returns false when the key already exists;
    /// duplicate keys are rejected and the stored value is kept.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool> {
        let mut ctx = WriteContext::new(self.bpm.as_ref(), self.root_page_id.write());

        if **ctx.header.as_ref().expect("header latch held at entry") == INVALID_PAGE_ID {
            self.start_new_tree(&mut ctx, key, value)?;
            return Ok(true);
        }

        self.find_leaf_write(key, TreeOp::Insert, &mut ctx, false, false)?;
        let mut leaf_guard = ctx.path.pop().expect("descent latched a leaf");
        let leaf_page_id = leaf_guard.page_id();

        let (old_size, new_size) = {
            let mut leaf = BTreeLeafPage::<K, V>::new(leaf_guard.data_mut());
            let old_size = leaf.size();
            let new_size = leaf.insert(key, value, &self.comparator);
            (old_size, new_size)
        };

        if new_size == old_size {
            // Duplicate key.
            drop(leaf_guard);
            self.bpm.unpin_page(leaf_page_id, false);
            ctx.release_ancestors();
            return Ok(false);
        }

        if new_size < self.leaf_max_size {
            drop(leaf_guard);
            self.bpm.unpin_page(leaf_page_id, true);
            ctx.release_ancestors();
            return Ok(true);
        }

        // The leaf reached its capacity: split it and lift the new
        // sibling's first key into the parent.
        self.split_leaf(&mut ctx, leaf_guard)?;
        self.finish_write(&mut ctx)?;
        Ok(true)
    }

    /// Creates the first leaf of an empty tree and records the root.
    fn start_new_tree(&self, ctx: &mut WriteContext<'_>, key: &K, value: &V) -> Result<()> {
        let (page_id, page) = self.bpm.new_page()?;
        {
            let mut guard = page.write_latch();
            let mut leaf = BTreeLeafPage::<K, V>::new(guard.data_mut());
            leaf.init(page_id, INVALID_PAGE_ID, self.leaf_max_size);
            leaf.insert(key, value, &self.comparator);
        }
        **ctx.header.as_mut().expect("header latch held at entry") = page_id;
        self.record_root_page_id(page_id, true)?;
        self.bpm.unpin_page(page_id, true);
        ctx.release_ancestors();
        debug!("{}: started new tree at {}", self.index_name, page_id);
        Ok(())
    }

    fn split_leaf(&self, ctx: &mut WriteContext<'_>, mut leaf_guard: PageWriteGuard) -> Result<()> {
        let leaf_page_id = leaf_guard.page_id();
        let (sibling_page_id, sibling_page) = self.bpm.new_page()?;
        let mut sibling_guard = sibling_page.write_latch();

        let risen_key = {
            let parent = BTreeLeafPageRef::<K, V>::new(leaf_guard.data()).parent_page_id();
            let mut leaf = BTreeLeafPage::<K, V>::new(leaf_guard.data_mut());
            let mut sibling = BTreeLeafPage::<K, V>::new(sibling_guard.data_mut());
            sibling.init(sibling_page_id, parent, self.leaf_max_size);
            leaf.move_half_to(&mut sibling);
            // Splice the new leaf into the linked list.
            sibling.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(sibling_page_id);
            sibling.key_at(0)
        };

        self.insert_into_parent(ctx, &mut leaf_guard, risen_key, &mut sibling_guard)?;

        drop(sibling_guard);
        self.bpm.unpin_page(sibling_page_id, true);
        drop(leaf_guard);
        self.bpm.unpin_page(leaf_page_id, true);
        Ok(())
    }

    /// Links a freshly split `(left, right)` pair under their parent,
    /// splitting ancestors as needed. Both children's latches are held by
    /// the caller so their parent pointers can be fixed in place.
    fn insert_into_parent(
        &self,
        ctx: &mut WriteContext<'_>,
        left_guard: &mut PageWriteGuard,
        key: K,
        right_guard: &mut PageWriteGuard,
    ) -> Result<()> {
        let left_page_id = left_guard.page_id();
        let right_page_id = right_guard.page_id();

        if ctx.path.is_empty() {
            // `left` was the root: grow the tree by one level.
            let (root_page_id, root_page) = self.bpm.new_page()?;
            {
                let mut root_guard = root_page.write_latch();
                let mut root = BTreeInternalPage::<K>::new(root_guard.data_mut());
                root.init(root_page_id, INVALID_PAGE_ID, self.internal_max_size);
                root.populate_new_root(left_page_id, &key, right_page_id);
            }
            self.bpm.unpin_page(root_page_id, true);

            crate::storage::page::write_parent(left_guard.data_mut(), root_page_id);
            crate::storage::page::write_parent(right_guard.data_mut(), root_page_id);

            let header = ctx
                .header
                .as_mut()
                .expect("root split requires the header latch");
            **header = root_page_id;
            self.record_root_page_id(root_page_id, false)?;
            ctx.header = None;
            debug!("{}: new root {}", self.index_name, root_page_id);
            return Ok(());
        }

        let mut parent_guard = ctx.path.pop().expect("ancestor latch retained");
        let parent_page_id = parent_guard.page_id();

        let parent_size = BTreeInternalPageRef::<K>::new(parent_guard.data()).size();
        if parent_size < self.internal_max_size {
            let mut parent = BTreeInternalPage::<K>::new(parent_guard.data_mut());
            parent.insert_node_after(left_page_id, &key, right_page_id);
            drop(parent_guard);
            self.bpm.unpin_page(parent_page_id, true);
            ctx.release_ancestors();
            return Ok(());
        }

        // The parent is full. Build an oversized scratch copy holding the
        // new entry, split it, and write the lower half back in place.
        let entry_size = K::ENCODED_SIZE + PageId::ENCODED_SIZE;
        let mut scratch = vec![0u8; PAGE_SIZE + entry_size];
        scratch[..PAGE_SIZE].copy_from_slice(parent_guard.data());
        {
            let mut overflow = BTreeInternalPage::<K>::new(&mut scratch);
            overflow.insert_node_after(left_page_id, &key, right_page_id);
        }

        let (sibling_page_id, sibling_page) = self.bpm.new_page()?;
        let mut sibling_guard = sibling_page.write_latch();

        let (risen_key, moved_children) = {
            let grandparent = BTreeInternalPageRef::<K>::new(parent_guard.data()).parent_page_id();
            let mut overflow = BTreeInternalPage::<K>::new(&mut scratch);
            let mut sibling = BTreeInternalPage::<K>::new(sibling_guard.data_mut());
            sibling.init(sibling_page_id, grandparent, self.internal_max_size);
            let moved = overflow.move_half_to(&mut sibling);
            (sibling.key_at(0), moved)
        };

        parent_guard.data_mut().copy_from_slice(&scratch[..PAGE_SIZE]);

        for child in moved_children {
            if child == left_page_id {
                crate::storage::page::write_parent(left_guard.data_mut(), sibling_page_id);
            } else if child == right_page_id {
                crate::storage::page::write_parent(right_guard.data_mut(), sibling_page_id);
            } else {
                ctx.reparent.push((child, sibling_page_id));
            }
        }

        self.insert_into_parent(ctx, &mut parent_guard, risen_key, &mut sibling_guard)?;

        drop(sibling_guard);
        self.bpm.unpin_page(sibling_page_id, true);
        drop(parent_guard);
        self.bpm.unpin_page(parent_page_id, true);
        Ok(())
    }

    /*****************************************************************
     * REMOVAL
     *****************************************************************/

    /// Removes `key` if present. Underflowing pages borrow from or merge
    /// with a sibling; emptied pages are deleted after latches drop.
    pub fn remove(&self, key: &K) -> Result<()> {
        let mut ctx = WriteContext::new(self.bpm.as_ref(), self.root_page_id.write());

        if **ctx.header.as_ref().expect("header latch held at entry") == INVALID_PAGE_ID {
            ctx.release_ancestors();
            return Ok(());
        }

        self.find_leaf_write(key, TreeOp::Delete, &mut ctx, false, false)?;
        let mut leaf_guard = ctx.path.pop().expect("descent latched a leaf");
        let leaf_page_id = leaf_guard.page_id();

        let (old_size, new_size) = {
            let mut leaf = BTreeLeafPage::<K, V>::new(leaf_guard.data_mut());
            let old_size = leaf.size();
            let new_size = leaf.remove_and_delete_record(key, &self.comparator);
            (old_size, new_size)
        };

        if new_size == old_size {
            // Key absent.
            drop(leaf_guard);
            self.bpm.unpin_page(leaf_page_id, false);
            ctx.release_ancestors();
            return Ok(());
        }

        let should_delete = self.coalesce_or_redistribute(&mut ctx, &mut leaf_guard)?;
        if should_delete {
            ctx.deleted.push(leaf_page_id);
        }
        drop(leaf_guard);
        self.bpm.unpin_page(leaf_page_id, true);

        self.finish_write(&mut ctx)?;
        Ok(())
    }

    /// Restores the minimum-occupancy invariant for a node that just lost
    /// an entry. Returns whether the caller should delete the node's page.
    fn coalesce_or_redistribute(
        &self,
        ctx: &mut WriteContext<'_>,
        node_guard: &mut PageWriteGuard,
    ) -> Result<bool> {
        if ctx.path.is_empty() {
            if ctx.header.is_some() {
                // Nothing latched above: the node is the root.
                return self.adjust_root(ctx, node_guard);
            }
            // Ancestors were released during the descent, so the node was
            // safe and cannot underflow.
            return Ok(false);
        }

        {
            let view = BTreePageRef::new(node_guard.data());
            if view.size() >= view.min_size() {
                ctx.release_ancestors();
                return Ok(false);
            }
        }

        let node_page_id = node_guard.page_id();
        let is_leaf = BTreePageRef::new(node_guard.data()).is_leaf();

        let mut parent_guard = ctx.path.pop().expect("ancestor latch retained");
        let parent_page_id = parent_guard.page_id();
        let index = BTreeInternalPageRef::<K>::new(parent_guard.data())
            .value_index(node_page_id)
            .expect("node must be a child of its latched parent");

        // Prefer the left sibling; only the leftmost child borrows right.
        let sibling_index = if index > 0 { index - 1 } else { 1 };
        let sibling_page_id =
            BTreeInternalPageRef::<K>::new(parent_guard.data()).value_at(sibling_index);
        let sibling_page = self.bpm.fetch_page(sibling_page_id)?;
        let mut sibling_guard = sibling_page.write_latch();

        let sibling_above_min = {
            let view = BTreePageRef::new(sibling_guard.data());
            view.size() > view.min_size()
        };

        if sibling_above_min {
            self.redistribute(
                ctx,
                node_guard,
                &mut sibling_guard,
                &mut parent_guard,
                index,
                is_leaf,
            );
            drop(sibling_guard);
            self.bpm.unpin_page(sibling_page_id, true);
            drop(parent_guard);
            self.bpm.unpin_page(parent_page_id, true);
            ctx.release_ancestors();
            return Ok(false);
        }

        // Merge. The right page of the pair always folds into the left one.
        let node_is_deleted = index > 0;
        if node_is_deleted {
            // node -> left sibling; parent drops the separator at `index`.
            let middle_key = BTreeInternalPageRef::<K>::new(parent_guard.data()).key_at(index);
            self.merge_into(
                ctx,
                &mut sibling_guard,
                node_guard,
                sibling_page_id,
                &middle_key,
                is_leaf,
            );
            {
                let mut parent = BTreeInternalPage::<K>::new(parent_guard.data_mut());
                parent.remove(index);
            }
        } else {
            // right sibling -> node; parent drops the separator at 1.
            let middle_key = BTreeInternalPageRef::<K>::new(parent_guard.data()).key_at(1);
            self.merge_into(
                ctx,
                node_guard,
                &mut sibling_guard,
                node_page_id,
                &middle_key,
                is_leaf,
            );
            {
                let mut parent = BTreeInternalPage::<K>::new(parent_guard.data_mut());
                parent.remove(1);
            }
            ctx.deleted.push(sibling_page_id);
        }
        debug!(
            "{}: merged {} of parent {}",
            self.index_name,
            if node_is_deleted { node_page_id } else { sibling_page_id },
            parent_page_id
        );

        drop(sibling_guard);
        self.bpm.unpin_page(sibling_page_id, true);

        // The parent lost an entry; continue the repair one level up.
        let parent_should_delete = self.coalesce_or_redistribute(ctx, &mut parent_guard)?;
        if parent_should_delete {
            ctx.deleted.push(parent_page_id);
        }
        drop(parent_guard);
        self.bpm.unpin_page(parent_page_id, true);

        Ok(node_is_deleted)
    }

    /// Moves every entry of `right` into `left`. Internal merges pull the
    /// parent's separator down and queue the moved children for
    /// reparenting onto `left_page_id`.
    fn merge_into(
        &self,
        ctx: &mut WriteContext<'_>,
        left_guard: &mut PageWriteGuard,
        right_guard: &mut PageWriteGuard,
        left_page_id: PageId,
        middle_key: &K,
        is_leaf: bool,
    ) {
        if is_leaf {
            let mut left = BTreeLeafPage::<K, V>::new(left_guard.data_mut());
            let mut right = BTreeLeafPage::<K, V>::new(right_guard.data_mut());
            right.move_all_to(&mut left);
        } else {
            let mut left = BTreeInternalPage::<K>::new(left_guard.data_mut());
            let mut right = BTreeInternalPage::<K>::new(right_guard.data_mut());
            let moved = right.move_all_to(&mut left, middle_key);
            for child in moved {
                ctx.reparent.push((child, left_page_id));
            }
        }
    }

    /// Borrows one entry from a sibling that sits above its minimum.
    fn redistribute(
        &self,
        ctx: &mut WriteContext<'_>,
        node_guard: &mut PageWriteGuard,
        sibling_guard: &mut PageWriteGuard,
        parent_guard: &mut PageWriteGuard,
        index: usize,
        is_leaf: bool,
    ) {
        let node_page_id = node_guard.page_id();
        let from_prev = index > 0;

        if is_leaf {
            let mut node = BTreeLeafPage::<K, V>::new(node_guard.data_mut());
            let mut sibling = BTreeLeafPage::<K, V>::new(sibling_guard.data_mut());
            let mut parent = BTreeInternalPage::<K>::new(parent_guard.data_mut());
            if from_prev {
                // Left sibling's last entry becomes the node's first.
                sibling.move_last_to_front_of(&mut node);
                parent.set_key_at(index, &node.key_at(0));
            } else {
                // Right sibling's first entry becomes the node's last.
                sibling.move_first_to_end_of(&mut node);
                parent.set_key_at(index + 1, &sibling.key_at(0));
            }
        } else {
            let separator_index = if from_prev { index } else { index + 1 };
            let middle_key =
                BTreeInternalPageRef::<K>::new(parent_guard.data()).key_at(separator_index);

            let mut node = BTreeInternalPage::<K>::new(node_guard.data_mut());
            let mut sibling = BTreeInternalPage::<K>::new(sibling_guard.data_mut());
            let moved_child = if from_prev {
                let moved = sibling.move_last_to_front_of(&mut node, &middle_key);
                let new_separator = node.key_at(0);
                let mut parent = BTreeInternalPage::<K>::new(parent_guard.data_mut());
                parent.set_key_at(separator_index, &new_separator);
                moved
            } else {
                let moved = sibling.move_first_to_end_of(&mut node, &middle_key);
                let new_separator = sibling.key_at(0);
                let mut parent = BTreeInternalPage::<K>::new(parent_guard.data_mut());
                parent.set_key_at(separator_index, &new_separator);
                moved
            };
            ctx.reparent.push((moved_child, node_page_id));
        }
    }

    /// Handles underflow at the root: an internal root with a single child
    /// promotes that child; an empty leaf root empties the tree. Returns
    /// whether the old root page should be deleted.
    fn adjust_root(
        &self,
        ctx: &mut WriteContext<'_>,
        root_guard: &mut PageWriteGuard,
    ) -> Result<bool> {
        let (is_leaf, size) = {
            let view = BTreePageRef::new(root_guard.data());
            (view.is_leaf(), view.size())
        };

        if !is_leaf && size == 1 {
            let child = BTreeInternalPageRef::<K>::new(root_guard.data()).value_at(0);
            let header = ctx.header.as_mut().expect("root change needs the header latch");
            **header = child;
            ctx.reparent.push((child, INVALID_PAGE_ID));
            self.record_root_page_id(child, false)?;
            debug!("{}: root collapsed into {}", self.index_name, child);
            return Ok(true);
        }

        if is_leaf && size == 0 {
            let header = ctx.header.as_mut().expect("root change needs the header latch");
            **header = INVALID_PAGE_ID;
            self.record_root_page_id(INVALID_PAGE_ID, false)?;
            debug!("{}: tree is empty", self.index_name);
            return Ok(true);
        }

        Ok(false)
    }

    /*****************************************************************
     * DESCENT
     *****************************************************************/

    /// Write-latched descent. Latches each page top-down, releasing all
    /// retained ancestors (header latch included) once the just-latched
    /// child cannot split (insert) or underflow (delete). Every latched
    /// page is pushed onto `ctx.path`; the leaf ends up last.
    fn find_leaf_write(
        &self,
        key: &K,
        op: TreeOp,
        ctx: &mut WriteContext<'_>,
        leftmost: bool,
        rightmost: bool,
    ) -> Result<()> {
        let mut page_id = **ctx.header.as_ref().expect("header latch held at entry");
        let root_page_id = page_id;

        loop {
            let page = self.bpm.fetch_page(page_id)?;
            let guard = page.write_latch();

            let (is_leaf, safe) = {
                let view = BTreePageRef::new(guard.data());
                (view.is_leaf(), self.is_safe(&view, op, page_id == root_page_id))
            };

            if safe {
                ctx.release_ancestors();
            }
            ctx.path.push(guard);

            if is_leaf {
                return Ok(());
            }

            page_id = {
                let guard = ctx.path.last().expect("current page latched");
                let internal = BTreeInternalPageRef::<K>::new(guard.data());
                if leftmost {
                    internal.value_at(0)
                } else if rightmost {
                    internal.value_at(internal.size() - 1)
                } else {
                    internal.lookup(key, &self.comparator)
                }
            };
        }
    }

    /// Safe-node rule: a page that cannot split (insert) or drop below its
    /// minimum (delete) lets the descent release everything above it.
    fn is_safe(&self, view: &BTreePageRef<'_>, op: TreeOp, is_root: bool) -> bool {
        match op {
            TreeOp::Insert => {
                if view.is_leaf() {
                    view.size() < self.leaf_max_size - 1
                } else {
                    view.size() < self.internal_max_size
                }
            }
            TreeOp::Delete => {
                let min = if is_root {
                    if view.is_leaf() {
                        1
                    } else {
                        2
                    }
                } else {
                    view.min_size()
                };
                view.size() > min
            }
        }
    }

    /// Applies the work deferred until all latches were released: parent
    /// pointer updates for moved children, then page deletions.
    fn finish_write(&self, ctx: &mut WriteContext<'_>) -> Result<()> {
        ctx.release_ancestors();

        for (child, parent) in std::mem::take(&mut ctx.reparent) {
            let page = self.bpm.fetch_page(child)?;
            {
                let mut guard = page.write_latch();
                crate::storage::page::write_parent(guard.data_mut(), parent);
            }
            self.bpm.unpin_page(child, true);
        }

        for page_id in std::mem::take(&mut ctx.deleted) {
            self.bpm.delete_page(page_id)?;
        }
        Ok(())
    }

    /*****************************************************************
     * ITERATION
     *****************************************************************/

    /// Iterator positioned at the first key of the tree.
    pub fn begin(&self) -> Result<IndexIterator<K, V>> {
        match self.find_leaf_read(LeafTarget::Leftmost)? {
            Some(guard) => Ok(IndexIterator::new(Arc::clone(&self.bpm), Some(guard), 0)),
            None => Ok(IndexIterator::null(Arc::clone(&self.bpm))),
        }
    }

    /// Iterator positioned at `key` (or the first key after it) within its
    /// leaf.
    pub fn begin_at(&self, key: &K) -> Result<IndexIterator<K, V>> {
        match self.find_leaf_read(LeafTarget::Key(key))? {
            Some(guard) => {
                let index =
                    BTreeLeafPageRef::<K, V>::new(guard.data()).key_index(key, &self.comparator);
                Ok(IndexIterator::new(Arc::clone(&self.bpm), Some(guard), index))
            }
            None => Ok(IndexIterator::null(Arc::clone(&self.bpm))),
        }
    }

    /// Iterator one past the last key: the rightmost leaf at index `size`.
    pub fn end(&self) -> Result<IndexIterator<K, V>> {
        match self.find_leaf_read(LeafTarget::Rightmost)? {
            Some(guard) => {
                let index = BTreeLeafPageRef::<K, V>::new(guard.data()).size();
                Ok(IndexIterator::new(Arc::clone(&self.bpm), Some(guard), index))
            }
            None => Ok(IndexIterator::null(Arc::clone(&self.bpm))),
        }
    }

    /*****************************************************************
     * BULK OPERATIONS AND DEBUG
     *****************************************************************/

    /// Reads whitespace-separated integer keys from `path` and inserts
    /// each one, deriving the record id from the key.
    pub fn insert_from_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()>
    where
        K: From<i64>,
        V: From<i64>,
    {
        let contents = std::fs::read_to_string(path)?;
        for token in contents.split_whitespace() {
            if let Ok(raw) = token.parse::<i64>() {
                self.insert(&K::from(raw), &V::from(raw))?;
            }
        }
        Ok(())
    }

    /// Reads whitespace-separated integer keys from `path` and removes
    /// each one.
    pub fn remove_from_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()>
    where
        K: From<i64>,
    {
        let contents = std::fs::read_to_string(path)?;
        for token in contents.split_whitespace() {
            if let Ok(raw) = token.parse::<i64>() {
                self.remove(&K::from(raw))?;
            }
        }
        Ok(())
    }

    /// Verifies the tree's structural invariants, panicking on the first
    /// violation. Test support: every root-to-leaf path must have equal
    /// length, every non-root page must respect its occupancy bounds, and
    /// the leaf chain must be strictly ascending.
    pub fn check_integrity(&self) -> Result<()> {
        let root = self.get_root_page_id();
        if root == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut leaf_depths = Vec::new();
        self.check_page(root, root, 0, &mut leaf_depths)?;
        assert!(
            leaf_depths.windows(2).all(|w| w[0] == w[1]),
            "leaves at unequal depths: {:?}",
            leaf_depths
        );

        // Walk the leaf chain and require strictly ascending keys.
        let Some(mut guard) = self.find_leaf_read(LeafTarget::Leftmost)? else {
            return Ok(());
        };
        let mut prev: Option<K> = None;
        loop {
            let next = {
                let leaf = BTreeLeafPageRef::<K, V>::new(guard.data());
                for i in 0..leaf.size() {
                    let key = leaf.key_at(i);
                    if let Some(prev) = prev {
                        assert_eq!(
                            self.comparator.compare(&prev, &key),
                            std::cmp::Ordering::Less,
                            "leaf chain out of order"
                        );
                    }
                    prev = Some(key);
                }
                leaf.next_page_id()
            };

            let page_id = guard.page_id();
            drop(guard);
            self.bpm.unpin_page(page_id, false);

            if next == INVALID_PAGE_ID {
                return Ok(());
            }
            let page = self.bpm.fetch_page(next)?;
            guard = page.read_latch();
        }
    }

    fn check_page(
        &self,
        page_id: PageId,
        root: PageId,
        depth: usize,
        leaf_depths: &mut Vec<usize>,
    ) -> Result<()> {
        let page = self.bpm.fetch_page(page_id)?;
        let guard = page.read_latch();

        let children = {
            let view = BTreePageRef::new(guard.data());
            let (size, min, max) = (view.size(), view.min_size(), view.max_size());
            if page_id != root {
                assert!(
                    size >= min,
                    "page {} underflow: {} < {}",
                    page_id,
                    size,
                    min
                );
            }
            assert!(size <= max, "page {} overflow: {} > {}", page_id, size, max);

            if view.is_leaf() {
                leaf_depths.push(depth);
                Vec::new()
            } else {
                let internal = BTreeInternalPageRef::<K>::new(guard.data());
                (0..size).map(|i| internal.value_at(i)).collect()
            }
        };

        drop(guard);
        self.bpm.unpin_page(page_id, false);

        for child in children {
            self.check_page(child, root, depth + 1, leaf_depths)?;
        }
        Ok(())
    }

    /// Renders the tree level by level for test diagnostics.
    pub fn dump(&self) -> Result<String>
    where
        K: std::fmt::Debug,
    {
        let root = self.get_root_page_id();
        if root == INVALID_PAGE_ID {
            return Ok("<empty>".to_string());
        }
        let mut out = String::new();
        self.dump_page(root, 0, &mut out)?;
        Ok(out)
    }

    fn dump_page(&self, page_id: PageId, depth: usize, out: &mut String) -> Result<()>
    where
        K: std::fmt::Debug,
    {
        use std::fmt::Write;

        let page = self.bpm.fetch_page(page_id)?;
        let guard = page.read_latch();
        let is_leaf = BTreePageRef::new(guard.data()).is_leaf();

        let children = if is_leaf {
            let leaf = BTreeLeafPageRef::<K, V>::new(guard.data());
            let keys: Vec<String> = (0..leaf.size()).map(|i| format!("{:?}", leaf.key_at(i))).collect();
            let _ = writeln!(
                out,
                "{}leaf {} [{}] next={}",
                "  ".repeat(depth),
                page_id,
                keys.join(", "),
                leaf.next_page_id()
            );
            Vec::new()
        } else {
            let internal = BTreeInternalPageRef::<K>::new(guard.data());
            let keys: Vec<String> = (1..internal.size()).map(|i| format!("{:?}", internal.key_at(i))).collect();
            let _ = writeln!(
                out,
                "{}internal {} [{}]",
                "  ".repeat(depth),
                page_id,
                keys.join(", ")
            );
            (0..internal.size()).map(|i| internal.value_at(i)).collect()
        };

        drop(guard);
        self.bpm.unpin_page(page_id, false);

        for child in children {
            self.dump_page(child, depth + 1, out)?;
        }
        Ok(())
    }
}
