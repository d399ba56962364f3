//! Concurrent B+ tree index over buffer-pool pages.
//!
//! All values live in leaf pages linked in key order; internal pages route
//! the descent. Readers traverse with shared latch crabbing (hold the
//! parent only until the child is latched). Writers traverse with exclusive
//! latch crabbing: ancestor latches are held until a node is proven safe
//! (insert: below max, delete: above min), at which point every ancestor is
//! released in one shot. A process-wide root-pointer latch serializes access
//! to the root page id stored in the header page.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{PageId, RecordId, Result, INVALID_PAGE_ID};

use super::btree_iterator::IndexIterator;
use super::btree_page::{
    BTreeHeaderPageMut, BTreeHeaderPageRef, BTreePageMut, BTreePageRef, InternalPageMut,
    InternalPageRef, LeafPageMut, LeafPageRef, internal_slot_capacity, leaf_slot_capacity,
};
use super::key::{IndexKey, KeyComparator, OrdComparator};

/// The write operation a descent is performed for; decides node safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TreeOp {
    Insert,
    Remove,
}

/// Per-operation ownership of everything latched so far: the ancestor write
/// guards from root side (front) to leaf side (back), the header-page guard,
/// and the root-pointer latch. Dropping the context releases whatever is
/// still held.
struct Context<'a> {
    write_set: VecDeque<WritePageGuard>,
    header: Option<WritePageGuard>,
    root_latch: Option<RwLockWriteGuard<'a, ()>>,
}

impl<'a> Context<'a> {
    fn new() -> Self {
        Self {
            write_set: VecDeque::new(),
            header: None,
            root_latch: None,
        }
    }

    /// Releases every ancestor guard in root-to-leaf order, along with the
    /// header guard and the root-pointer latch. Called once the node being
    /// descended into is safe for the current operation.
    fn release_ancestors(&mut self) {
        self.write_set.clear();
        self.header = None;
        self.root_latch = None;
    }
}

/// A concurrent B+ tree keyed by a fixed-width `K` and storing `RecordId`
/// values. Keys are unique; duplicate inserts are rejected.
pub struct BPlusTree<K: IndexKey, C: KeyComparator<K> = OrdComparator> {
    /// Diagnostic name
    name: String,
    /// Entry point: the page holding the current root page id
    header_page_id: PageId,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: u32,
    internal_max_size: u32,
    /// Serializes access to the root page id across operations
    root_latch: RwLock<()>,
    _key: PhantomData<K>,
}

impl<K: IndexKey, C: KeyComparator<K>> BPlusTree<K, C> {
    /// Creates a tree anchored at `header_page_id`, resetting its stored
    /// root pointer. The header page must already be allocated.
    pub fn new(
        name: impl Into<String>,
        header_page_id: PageId,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self> {
        let tree = Self::open(
            name,
            header_page_id,
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
        );
        let mut header = tree.bpm.write_page(tree.header_page_id)?;
        BTreeHeaderPageMut::new(header.data_mut()).set_root_page_id(INVALID_PAGE_ID);
        Ok(tree)
    }

    /// Attaches to an existing tree without touching the header page.
    pub fn open(
        name: impl Into<String>,
        header_page_id: PageId,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Self {
        // Keep two spare slots below the physical capacity so a page can
        // hold one entry past its max while a split is in flight.
        let leaf_max_size = leaf_max_size.min(leaf_slot_capacity::<K>() as u32 - 2);
        let internal_max_size = internal_max_size.min(internal_slot_capacity::<K>() as u32 - 2);
        assert!(leaf_max_size >= 2, "leaf_max_size must be at least 2");
        assert!(
            internal_max_size >= 3,
            "internal_max_size must be at least 3"
        );

        Self {
            name: name.into(),
            header_page_id,
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            root_latch: RwLock::new(()),
            _key: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    /// The page id currently stored as the root; `INVALID_PAGE_ID` when the
    /// tree is empty.
    pub fn root_page_id(&self) -> Result<PageId> {
        let guard = self.bpm.read_page(self.header_page_id)?;
        Ok(BTreeHeaderPageRef::new(guard.data()).root_page_id())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.root_page_id()? == INVALID_PAGE_ID)
    }

    /*****************************************************************************
     * SEARCH
     *****************************************************************************/

    /// Point lookup. Returns the value stored for `key`, if any.
    pub fn get(&self, key: &K) -> Result<Option<RecordId>> {
        match self.find_leaf_read(key)? {
            Some(guard) => {
                let leaf = LeafPageRef::<K>::new(guard.data());
                Ok(leaf.lookup(key, &self.comparator))
            }
            None => Ok(None),
        }
    }

    /// Shared-crab descent to the leaf that may contain `key`. The parent
    /// guard is held only until the child guard is latched; the root-pointer
    /// latch is released once the descent is below the root.
    fn find_leaf_read(&self, key: &K) -> Result<Option<ReadPageGuard>> {
        let root_latch = self.root_latch.read();
        let root_id = {
            let header = self.bpm.read_page(self.header_page_id)?;
            BTreeHeaderPageRef::new(header.data()).root_page_id()
        };
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut root_latch = Some(root_latch);
        let mut guard = self.bpm.read_page(root_id)?;
        loop {
            let child_id = {
                let page = BTreePageRef::new(guard.data());
                if page.is_leaf() {
                    break;
                }
                let internal = InternalPageRef::<K>::new(guard.data());
                let index = internal.key_index(key, &self.comparator);
                internal.child_at(index - 1)
            };
            guard = self.bpm.read_page(child_id)?;
            root_latch.take();
        }
        Ok(Some(guard))
    }

    /*****************************************************************************
     * INSERTION
     *****************************************************************************/

    /// Inserts a key/value pair. Returns false if the key already exists.
    pub fn insert(&self, key: K, value: RecordId) -> Result<bool> {
        let mut ctx = Context::new();
        ctx.root_latch = Some(self.root_latch.write());

        let mut header_guard = self.bpm.write_page(self.header_page_id)?;
        let root_id = BTreeHeaderPageRef::new(header_guard.data()).root_page_id();

        if root_id == INVALID_PAGE_ID {
            let leaf_id = self.bpm.new_page()?;
            let mut leaf_guard = self.bpm.write_page(leaf_id)?;
            let mut leaf = LeafPageMut::<K>::new(leaf_guard.data_mut());
            leaf.init(leaf_id, INVALID_PAGE_ID, self.leaf_max_size, INVALID_PAGE_ID);
            leaf.insert(key, value, &self.comparator);
            BTreeHeaderPageMut::new(header_guard.data_mut()).set_root_page_id(leaf_id);
            debug!(index = %self.name, root = leaf_id.as_u32(), "btree.start_new_tree");
            return Ok(true);
        }

        ctx.header = Some(header_guard);
        let mut leaf_guard = self.find_leaf_write(&key, TreeOp::Insert, root_id, &mut ctx)?;

        let (inserted, overflow) = {
            let mut leaf = LeafPageMut::<K>::new(leaf_guard.data_mut());
            let inserted = leaf.insert(key, value, &self.comparator);
            (inserted, leaf.size() > leaf.max_size())
        };
        if !inserted {
            return Ok(false);
        }

        if overflow {
            let (right_guard, risen_key) = self.split_leaf(&mut leaf_guard)?;
            self.insert_into_parent(&mut ctx, leaf_guard, right_guard, risen_key)?;
        }
        Ok(true)
    }

    /// Exclusive-crab descent. At each node: if the node is safe for `op`,
    /// all currently held ancestors (and the root-pointer latch) are
    /// released; then the descent continues into the child, pushing the
    /// current guard onto the context.
    fn find_leaf_write(
        &self,
        key: &K,
        op: TreeOp,
        root_id: PageId,
        ctx: &mut Context<'_>,
    ) -> Result<WritePageGuard> {
        let mut guard = self.bpm.write_page(root_id)?;
        loop {
            let (safe, child_id) = {
                let page = BTreePageRef::new(guard.data());
                let safe = Self::is_safe(&page, op);
                if page.is_leaf() {
                    (safe, None)
                } else {
                    let internal = InternalPageRef::<K>::new(guard.data());
                    let index = internal.key_index(key, &self.comparator);
                    (safe, Some(internal.child_at(index - 1)))
                }
            };
            if safe {
                ctx.release_ancestors();
            }
            match child_id {
                None => return Ok(guard),
                Some(child_id) => {
                    ctx.write_set.push_back(guard);
                    guard = self.bpm.write_page(child_id)?;
                }
            }
        }
    }

    /// A node is safe when the pending operation cannot propagate a
    /// structural change to its parent.
    fn is_safe(page: &BTreePageRef<'_>, op: TreeOp) -> bool {
        match op {
            TreeOp::Insert => page.size() < page.max_size(),
            TreeOp::Remove => {
                if page.is_root() {
                    // A shrinking root may need the header updated: a leaf
                    // root empties, an internal root collapses at size 1.
                    if page.is_leaf() {
                        page.size() > 1
                    } else {
                        page.size() > 2
                    }
                } else {
                    page.size() > page.min_size()
                }
            }
        }
    }

    /// Splits an overflowing leaf: allocates a right sibling, moves the
    /// upper half of the entries into it, and relinks the leaf chain.
    /// Returns the sibling's guard and the key to promote.
    fn split_leaf(&self, left_guard: &mut WritePageGuard) -> Result<(WritePageGuard, K)> {
        let new_page_id = self.bpm.new_page()?;
        let mut right_guard = self.bpm.write_page(new_page_id)?;

        let risen_key = {
            let mut left = LeafPageMut::<K>::new(left_guard.data_mut());
            let mut right = LeafPageMut::<K>::new(right_guard.data_mut());
            right.init(
                new_page_id,
                left.parent_page_id(),
                left.max_size(),
                left.next_page_id(),
            );
            left.move_half_to(&mut right);
            left.set_next_page_id(new_page_id);
            right.key_at(0)
        };

        debug!(
            index = %self.name,
            page = left_guard.page_id().as_u32(),
            sibling = new_page_id.as_u32(),
            "btree.split_leaf"
        );
        Ok((right_guard, risen_key))
    }

    /// Splits an overflowing internal page. The promoted separator is the
    /// first key of the new right sibling, which is removed from the sibling
    /// before it is handed up.
    fn split_internal(&self, left_guard: &mut WritePageGuard) -> Result<(WritePageGuard, K)> {
        let new_page_id = self.bpm.new_page()?;
        let mut right_guard = self.bpm.write_page(new_page_id)?;

        let risen_key = {
            let mut left = InternalPageMut::<K>::new(left_guard.data_mut());
            let mut right = InternalPageMut::<K>::new(right_guard.data_mut());
            right.init(new_page_id, left.parent_page_id(), left.max_size(), 1);
            left.move_half_to(&mut right, &self.bpm)?;
            let risen_key = right.key_at(1);
            right.remove_first_key();
            risen_key
        };

        debug!(
            index = %self.name,
            page = left_guard.page_id().as_u32(),
            sibling = new_page_id.as_u32(),
            "btree.split_internal"
        );
        Ok((right_guard, risen_key))
    }

    /// Links a freshly split-off `right` sibling into the parent of `left`,
    /// splitting the parent in turn if it overflows. If `left` is the root,
    /// a new root is created and the header updated.
    fn insert_into_parent(
        &self,
        ctx: &mut Context<'_>,
        mut left_guard: WritePageGuard,
        mut right_guard: WritePageGuard,
        key: K,
    ) -> Result<()> {
        let left_id = left_guard.page_id();
        let right_id = right_guard.page_id();
        let parent_id = BTreePageRef::new(left_guard.data()).parent_page_id();

        if parent_id == INVALID_PAGE_ID {
            let new_root_id = self.bpm.new_page()?;
            let mut root_guard = self.bpm.write_page(new_root_id)?;
            {
                let mut root = InternalPageMut::<K>::new(root_guard.data_mut());
                root.init(new_root_id, INVALID_PAGE_ID, self.internal_max_size, 2);
                root.set_key_at(1, key);
                root.set_child_at(0, left_id);
                root.set_child_at(1, right_id);
            }
            BTreePageMut::new(left_guard.data_mut()).set_parent_page_id(new_root_id);
            BTreePageMut::new(right_guard.data_mut()).set_parent_page_id(new_root_id);

            let header_guard = ctx
                .header
                .as_mut()
                .expect("header guard must be held for a root split");
            BTreeHeaderPageMut::new(header_guard.data_mut()).set_root_page_id(new_root_id);
            debug!(index = %self.name, root = new_root_id.as_u32(), "btree.new_root");
            return Ok(());
        }

        let mut parent_guard = ctx
            .write_set
            .pop_back()
            .expect("parent guard must be held for a split");
        debug_assert_eq!(parent_guard.page_id(), parent_id);

        BTreePageMut::new(right_guard.data_mut()).set_parent_page_id(parent_id);
        drop(left_guard);
        drop(right_guard);

        let overflow = {
            let mut parent = InternalPageMut::<K>::new(parent_guard.data_mut());
            parent.insert(key, right_id, &self.comparator);
            parent.size() > parent.max_size()
        };

        if overflow {
            let (parent_sibling_guard, risen_key) = self.split_internal(&mut parent_guard)?;
            self.insert_into_parent(ctx, parent_guard, parent_sibling_guard, risen_key)?;
        }
        Ok(())
    }

    /*****************************************************************************
     * REMOVE
     *****************************************************************************/

    /// Deletes the entry for `key`; a no-op if the key is absent.
    pub fn remove(&self, key: &K) -> Result<()> {
        let mut ctx = Context::new();
        ctx.root_latch = Some(self.root_latch.write());

        let header_guard = self.bpm.write_page(self.header_page_id)?;
        let root_id = BTreeHeaderPageRef::new(header_guard.data()).root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(());
        }
        ctx.header = Some(header_guard);

        let mut leaf_guard = self.find_leaf_write(key, TreeOp::Remove, root_id, &mut ctx)?;

        let underflow = {
            let mut leaf = LeafPageMut::<K>::new(leaf_guard.data_mut());
            leaf.remove(key, &self.comparator);
            leaf.size() < leaf.min_size()
        };
        if underflow {
            self.join_or_redistribute(&mut ctx, leaf_guard)?;
        }
        Ok(())
    }

    /// Repairs an underfull node: borrows an entry from a sibling when one
    /// can spare it, otherwise merges the sibling pair and recurses into the
    /// parent. Root shrinkage is handled by collapsing into the sole child
    /// or emptying the tree.
    fn join_or_redistribute(&self, ctx: &mut Context<'_>, mut guard: WritePageGuard) -> Result<()> {
        let (is_root, is_leaf, size, min_size) = {
            let page = BTreePageRef::new(guard.data());
            (page.is_root(), page.is_leaf(), page.size(), page.min_size())
        };

        if is_root {
            if !is_leaf && size == 1 {
                let child_id = InternalPageRef::<K>::new(guard.data()).child_at(0);
                {
                    let mut child_guard = self.bpm.write_page(child_id)?;
                    BTreePageMut::new(child_guard.data_mut())
                        .set_parent_page_id(INVALID_PAGE_ID);
                }
                let header_guard = ctx
                    .header
                    .as_mut()
                    .expect("header guard must be held for a root collapse");
                BTreeHeaderPageMut::new(header_guard.data_mut()).set_root_page_id(child_id);

                let old_root = guard.page_id();
                drop(guard);
                self.reclaim_page(old_root);
                debug!(index = %self.name, root = child_id.as_u32(), "btree.root_collapse");
            } else if is_leaf && size == 0 {
                let header_guard = ctx
                    .header
                    .as_mut()
                    .expect("header guard must be held when the tree empties");
                BTreeHeaderPageMut::new(header_guard.data_mut())
                    .set_root_page_id(INVALID_PAGE_ID);

                let old_root = guard.page_id();
                drop(guard);
                self.reclaim_page(old_root);
                debug!(index = %self.name, "btree.tree_emptied");
            }
            return Ok(());
        }

        if size >= min_size {
            return Ok(());
        }

        let mut parent_guard = ctx
            .write_set
            .pop_back()
            .expect("parent guard must be held for an underflow");
        let page_id = guard.page_id();

        let (index, parent_size) = {
            let parent = InternalPageRef::<K>::new(parent_guard.data());
            let index = parent
                .value_index(page_id)
                .expect("underfull node not referenced by its parent");
            (index, parent.size() as usize)
        };

        if index + 1 < parent_size {
            // Prefer the right sibling.
            let sibling_id = InternalPageRef::<K>::new(parent_guard.data()).child_at(index + 1);
            let mut sibling_guard = self.bpm.write_page(sibling_id)?;
            let can_spare = {
                let sibling = BTreePageRef::new(sibling_guard.data());
                sibling.size() > sibling.min_size()
            };
            if can_spare {
                self.redistribute(&mut guard, &mut sibling_guard, &mut parent_guard, index, false)
            } else {
                self.coalesce(ctx, guard, sibling_guard, parent_guard, index + 1)
            }
        } else {
            // This node is the last child; fall back to the left sibling.
            let sibling_id = InternalPageRef::<K>::new(parent_guard.data()).child_at(index - 1);
            let mut sibling_guard = self.bpm.write_page(sibling_id)?;
            let can_spare = {
                let sibling = BTreePageRef::new(sibling_guard.data());
                sibling.size() > sibling.min_size()
            };
            if can_spare {
                self.redistribute(&mut guard, &mut sibling_guard, &mut parent_guard, index, true)
            } else {
                self.coalesce(ctx, sibling_guard, guard, parent_guard, index)
            }
        }
    }

    /// Moves one entry from `sibling` into the underfull node and fixes the
    /// parent separator. `from_prev` selects the direction: false borrows
    /// the right sibling's first entry, true borrows the left sibling's
    /// last.
    fn redistribute(
        &self,
        guard: &mut WritePageGuard,
        sibling_guard: &mut WritePageGuard,
        parent_guard: &mut WritePageGuard,
        index: usize,
        from_prev: bool,
    ) -> Result<()> {
        let is_leaf = BTreePageRef::new(guard.data()).is_leaf();
        debug!(
            index = %self.name,
            page = guard.page_id().as_u32(),
            sibling = sibling_guard.page_id().as_u32(),
            from_prev,
            "btree.redistribute"
        );

        if is_leaf {
            let mut sibling = LeafPageMut::<K>::new(sibling_guard.data_mut());
            let mut node = LeafPageMut::<K>::new(guard.data_mut());
            let mut parent = InternalPageMut::<K>::new(parent_guard.data_mut());
            if !from_prev {
                let node_size = node.size() as usize;
                sibling.move_one_to(0, &mut node, node_size);
                parent.set_key_at(index + 1, sibling.key_at(0));
            } else {
                let sibling_size = sibling.size() as usize;
                sibling.move_one_to(sibling_size - 1, &mut node, 0);
                parent.set_key_at(index, node.key_at(0));
            }
        } else {
            let mut sibling = InternalPageMut::<K>::new(sibling_guard.data_mut());
            let mut node = InternalPageMut::<K>::new(guard.data_mut());
            let mut parent = InternalPageMut::<K>::new(parent_guard.data_mut());
            if !from_prev {
                let pull_down_key = parent.key_at(index + 1);
                parent.set_key_at(index + 1, sibling.key_at(1));
                sibling.move_first_to_end(&mut node, pull_down_key, &self.bpm)?;
            } else {
                let pull_down_key = parent.key_at(index);
                let risen_key = sibling.key_at(sibling.size() as usize - 1);
                sibling.move_last_to_begin(&mut node, pull_down_key, &self.bpm)?;
                parent.set_key_at(index, risen_key);
            }
        }
        Ok(())
    }

    /// Merges `right` into `left` (always the left page of the pair),
    /// removes the parent's entry for `right`, reclaims the dead page, and
    /// recurses into the parent, which may now itself be underfull.
    fn coalesce(
        &self,
        ctx: &mut Context<'_>,
        mut left_guard: WritePageGuard,
        mut right_guard: WritePageGuard,
        mut parent_guard: WritePageGuard,
        key_index: usize,
    ) -> Result<()> {
        let pull_down_key = InternalPageRef::<K>::new(parent_guard.data()).key_at(key_index);
        let is_leaf = BTreePageRef::new(left_guard.data()).is_leaf();

        debug!(
            index = %self.name,
            left = left_guard.page_id().as_u32(),
            right = right_guard.page_id().as_u32(),
            "btree.coalesce"
        );

        if is_leaf {
            let mut right = LeafPageMut::<K>::new(right_guard.data_mut());
            let mut left = LeafPageMut::<K>::new(left_guard.data_mut());
            right.move_all_to(&mut left);
        } else {
            let mut right = InternalPageMut::<K>::new(right_guard.data_mut());
            let mut left = InternalPageMut::<K>::new(left_guard.data_mut());
            right.move_all_to(&mut left, pull_down_key, &self.bpm)?;
        }

        let right_id = right_guard.page_id();
        drop(left_guard);
        drop(right_guard);
        self.reclaim_page(right_id);

        {
            let mut parent = InternalPageMut::<K>::new(parent_guard.data_mut());
            parent.remove(key_index);
        }
        self.join_or_redistribute(ctx, parent_guard)
    }

    /// Returns a page that is no longer referenced by the tree to the buffer
    /// pool. A racing pin (e.g. a stale iterator) makes this fail; the page
    /// is then simply left behind, which is safe because ids are never
    /// reused.
    fn reclaim_page(&self, page_id: PageId) {
        if let Err(error) = self.bpm.delete_page(page_id) {
            warn!(index = %self.name, page = page_id.as_u32(), %error, "btree.reclaim_skipped");
        }
    }

    /*****************************************************************************
     * ITERATION
     *****************************************************************************/

    /// Cursor positioned at the first entry of the tree.
    pub fn begin(&self) -> Result<IndexIterator<K>> {
        let root_latch = self.root_latch.read();
        let root_id = {
            let header = self.bpm.read_page(self.header_page_id)?;
            BTreeHeaderPageRef::new(header.data()).root_page_id()
        };
        if root_id == INVALID_PAGE_ID {
            return Ok(self.end());
        }

        let mut root_latch = Some(root_latch);
        let mut guard = self.bpm.read_page(root_id)?;
        loop {
            let child_id = {
                let page = BTreePageRef::new(guard.data());
                if page.is_leaf() {
                    break;
                }
                InternalPageRef::<K>::new(guard.data()).child_at(0)
            };
            guard = self.bpm.read_page(child_id)?;
            root_latch.take();
        }
        Ok(IndexIterator::new(Arc::clone(&self.bpm), guard.page_id(), 0))
    }

    /// Cursor positioned at `key` if it is present, otherwise the end
    /// cursor.
    pub fn begin_at(&self, key: &K) -> Result<IndexIterator<K>> {
        match self.find_leaf_read(key)? {
            Some(guard) => {
                let leaf = LeafPageRef::<K>::new(guard.data());
                let index = leaf.key_index(key, &self.comparator);
                if index < leaf.size() as usize
                    && self.comparator.compare(&leaf.key_at(index), key) == Ordering::Equal
                {
                    Ok(IndexIterator::new(
                        Arc::clone(&self.bpm),
                        guard.page_id(),
                        index,
                    ))
                } else {
                    Ok(self.end())
                }
            }
            None => Ok(self.end()),
        }
    }

    /// The end cursor.
    pub fn end(&self) -> IndexIterator<K> {
        IndexIterator::end(Arc::clone(&self.bpm))
    }

    /*****************************************************************************
     * INTEGRITY
     *****************************************************************************/

    /// Walks the whole tree and panics on any structural invariant
    /// violation: unsorted or out-of-range keys, size bounds, leaves at
    /// different depths, wrong parent pointers, or a broken leaf chain.
    pub fn verify_integrity(&self) -> Result<()> {
        let root_id = self.root_page_id()?;
        if root_id == INVALID_PAGE_ID {
            return Ok(());
        }

        {
            let guard = self.bpm.read_page(root_id)?;
            let page = BTreePageRef::new(guard.data());
            assert!(page.is_root(), "root page has a parent pointer");
            if !page.is_leaf() {
                assert!(page.size() >= 2, "internal root below minimum size");
            }
            assert!(page.size() <= page.max_size(), "root above maximum size");
        }

        let mut leaf_depth = None;
        let mut leaves = Vec::new();
        self.verify_node(
            root_id,
            INVALID_PAGE_ID,
            None,
            None,
            0,
            &mut leaf_depth,
            &mut leaves,
        )?;

        for pair in leaves.windows(2) {
            let guard = self.bpm.read_page(pair[0])?;
            let leaf = LeafPageRef::<K>::new(guard.data());
            assert_eq!(leaf.next_page_id(), pair[1], "broken leaf chain");
        }
        if let Some(&last) = leaves.last() {
            let guard = self.bpm.read_page(last)?;
            let leaf = LeafPageRef::<K>::new(guard.data());
            assert_eq!(
                leaf.next_page_id(),
                INVALID_PAGE_ID,
                "last leaf has a next pointer"
            );
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn verify_node(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        low: Option<K>,
        high: Option<K>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        leaves: &mut Vec<PageId>,
    ) -> Result<()> {
        let cmp = &self.comparator;
        let guard = self.bpm.read_page(page_id)?;

        let children = {
            let page = BTreePageRef::new(guard.data());
            assert_eq!(
                page.parent_page_id(),
                expected_parent,
                "bad parent pointer on {page_id}"
            );
            let size = page.size();
            if !page.is_root() {
                assert!(size >= page.min_size(), "underfull node {page_id}");
            }
            assert!(size <= page.max_size(), "overfull node {page_id}");
            let size = size as usize;

            if page.is_leaf() {
                assert_eq!(page.max_size(), self.leaf_max_size);
                match *leaf_depth {
                    None => *leaf_depth = Some(depth),
                    Some(d) => assert_eq!(d, depth, "leaves at different depths"),
                }
                let leaf = LeafPageRef::<K>::new(guard.data());
                for i in 0..size {
                    let k = leaf.key_at(i);
                    if i > 0 {
                        assert_eq!(
                            cmp.compare(&leaf.key_at(i - 1), &k),
                            Ordering::Less,
                            "keys not strictly increasing in {page_id}"
                        );
                    }
                    if let Some(lo) = low {
                        assert_ne!(
                            cmp.compare(&lo, &k),
                            Ordering::Greater,
                            "key below subtree bound in {page_id}"
                        );
                    }
                    if let Some(hi) = high {
                        assert_eq!(
                            cmp.compare(&k, &hi),
                            Ordering::Less,
                            "key above subtree bound in {page_id}"
                        );
                    }
                }
                leaves.push(page_id);
                Vec::new()
            } else {
                assert_eq!(page.max_size(), self.internal_max_size);
                let internal = InternalPageRef::<K>::new(guard.data());
                for i in 1..size {
                    let k = internal.key_at(i);
                    if i > 1 {
                        assert_eq!(
                            cmp.compare(&internal.key_at(i - 1), &k),
                            Ordering::Less,
                            "separators not strictly increasing in {page_id}"
                        );
                    }
                    if let Some(lo) = low {
                        assert_ne!(
                            cmp.compare(&lo, &k),
                            Ordering::Greater,
                            "separator below subtree bound in {page_id}"
                        );
                    }
                    if let Some(hi) = high {
                        assert_eq!(
                            cmp.compare(&k, &hi),
                            Ordering::Less,
                            "separator above subtree bound in {page_id}"
                        );
                    }
                }
                (0..size)
                    .map(|i| {
                        let child_low = if i == 0 { low } else { Some(internal.key_at(i)) };
                        let child_high = if i + 1 < size {
                            Some(internal.key_at(i + 1))
                        } else {
                            high
                        };
                        (internal.child_at(i), child_low, child_high)
                    })
                    .collect()
            }
        };
        drop(guard);

        for (child_id, child_low, child_high) in children {
            self.verify_node(
                child_id,
                page_id,
                child_low,
                child_high,
                depth + 1,
                leaf_depth,
                leaves,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SlotId;
    use crate::storage::disk::DiskManager;
    use tempfile::NamedTempFile;

    fn rid(n: u32) -> RecordId {
        RecordId::new(PageId::new(n), SlotId::new(0))
    }

    fn create_tree(
        pool_size: usize,
        leaf_max: u32,
        internal_max: u32,
    ) -> (BPlusTree<u32, OrdComparator>, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(pool_size, 2, dm));
        let header_page_id = bpm.new_page().unwrap();
        let tree =
            BPlusTree::new("test_idx", header_page_id, bpm, OrdComparator, leaf_max, internal_max)
                .unwrap();
        (tree, temp_file)
    }

    #[test]
    fn test_new_tree_is_empty() {
        let (tree, _temp) = create_tree(16, 4, 4);
        assert!(tree.is_empty().unwrap());
        assert_eq!(tree.root_page_id().unwrap(), INVALID_PAGE_ID);
    }

    #[test]
    fn test_single_insert_get() {
        let (tree, _temp) = create_tree(16, 4, 4);
        assert!(tree.insert(5, rid(5)).unwrap());
        assert!(!tree.is_empty().unwrap());
        assert_eq!(tree.get(&5).unwrap(), Some(rid(5)));
        assert_eq!(tree.get(&6).unwrap(), None);
        tree.verify_integrity().unwrap();
    }

    #[test]
    fn test_duplicate_insert_returns_false() {
        let (tree, _temp) = create_tree(16, 4, 4);
        assert!(tree.insert(5, rid(1)).unwrap());
        assert!(!tree.insert(5, rid(2)).unwrap());
        assert_eq!(tree.get(&5).unwrap(), Some(rid(1)));
    }

    #[test]
    fn test_split_and_lookup() {
        let (tree, _temp) = create_tree(32, 2, 3);
        for k in 1..=20u32 {
            assert!(tree.insert(k, rid(k)).unwrap());
            tree.verify_integrity().unwrap();
        }
        for k in 1..=20u32 {
            assert_eq!(tree.get(&k).unwrap(), Some(rid(k)), "missing key {k}");
        }
    }

    #[test]
    fn test_remove_until_empty() {
        let (tree, _temp) = create_tree(32, 2, 3);
        for k in 1..=10u32 {
            tree.insert(k, rid(k)).unwrap();
        }
        for k in 1..=10u32 {
            tree.remove(&k).unwrap();
            tree.verify_integrity().unwrap();
        }
        assert!(tree.is_empty().unwrap());
        assert_eq!(tree.root_page_id().unwrap(), INVALID_PAGE_ID);
    }
}
