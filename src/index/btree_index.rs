use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::{RwLock, RwLockWriteGuard};

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{LarchError, PageId, RecordId, Result, INVALID_PAGE_ID};

use super::btree_iterator::BPlusTreeIterator;
use super::btree_page::{
    HeaderPage, HeaderPageRef, InternalPage, InternalPageRef, LeafPage, LeafPageRef, NodePage,
    NodePageRef,
};
use super::generic_key::{GenericKey, KeyComparator};

/// Which structural hazard a write descent guards against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LatchOp {
    Insert,
    Delete,
}

/// Write guards held along the path from the root to the current node, in
/// descent order. When a child is proven safe for the operation, every
/// ancestor latch - the tree-wide root latch included - is released.
struct Context<'a> {
    root_latch: Option<RwLockWriteGuard<'a, ()>>,
    write_set: VecDeque<WritePageGuard>,
}

impl<'a> Context<'a> {
    fn new(root_latch: RwLockWriteGuard<'a, ()>) -> Self {
        Self {
            root_latch: Some(root_latch),
            write_set: VecDeque::new(),
        }
    }

    /// Drops all held ancestor latches, deepest first.
    fn release_ancestors(&mut self) {
        while let Some(guard) = self.write_set.pop_back() {
            drop(guard);
        }
        self.root_latch = None;
    }

    fn holds_root_latch(&self) -> bool {
        self.root_latch.is_some()
    }
}

/// A concurrent B+ tree index mapping fixed-width keys to record ids.
///
/// Keys live inline in the node pages; all key ordering goes through the
/// injected comparator. A dedicated header page stores the root page id, so
/// the index is addressed on disk solely by its header page.
///
/// Readers couple shared latches down the tree and hold at most one page
/// latch at a time once descended. Writers crab: they keep an ordered set of
/// exclusive latches from the root down and release every ancestor as soon
/// as the current node cannot split (insert) or shrink structurally
/// (delete). A tree-wide reader-writer latch protects the identity of the
/// root pointer and is released the moment a descent proves the root will
/// not change.
pub struct BPlusTree<const N: usize, C: KeyComparator<N>> {
    header_page_id: PageId,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: usize,
    internal_max_size: usize,
    root_latch: RwLock<()>,
}

impl<const N: usize, C: KeyComparator<N>> BPlusTree<N, C> {
    /// Creates a fresh index, allocating its header page. The tree starts
    /// out empty.
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let header_page_id = bpm.new_page()?;
        {
            let mut guard = bpm.write_page(header_page_id)?;
            HeaderPage::new(guard.data_mut()).init();
        }

        Ok(Self {
            header_page_id,
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            root_latch: RwLock::new(()),
        })
    }

    /// Opens an existing index rooted at the given header page.
    pub fn open(
        header_page_id: PageId,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Self {
        Self {
            header_page_id,
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            root_latch: RwLock::new(()),
        }
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// The current root page id, or `INVALID_PAGE_ID` for an empty tree.
    pub fn root_page_id(&self) -> Result<PageId> {
        let _root_latch = self.root_latch.read();
        let guard = self.bpm.read_page(self.header_page_id)?;
        Ok(HeaderPageRef::new(guard.data()).root_page_id())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.root_page_id()? == INVALID_PAGE_ID)
    }

    /// Whether the node behind `data` cannot trigger a structural change of
    /// its ancestors under the given operation.
    fn is_safe(data: &[u8], op: LatchOp) -> bool {
        let node = NodePageRef::new(data);
        match op {
            LatchOp::Insert => node.size() < node.max_size(),
            LatchOp::Delete => {
                if node.is_root() {
                    // The root only changes when an internal root is left
                    // with one child or a leaf root runs empty.
                    if node.is_leaf() {
                        node.size() > 1
                    } else {
                        node.size() > 2
                    }
                } else {
                    node.size() > node.min_size()
                }
            }
        }
    }

    /*****************************************************************************
     * SEARCH
     *****************************************************************************/

    /// Descends with shared latches to the leaf that may contain `key`.
    /// Returns None on an empty tree.
    fn find_leaf_page(&self, key: &GenericKey<N>) -> Result<Option<ReadPageGuard>> {
        let root_latch = self.root_latch.read();
        let root_page_id = {
            let header_guard = self.bpm.read_page(self.header_page_id)?;
            HeaderPageRef::new(header_guard.data()).root_page_id()
        };
        if root_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = self.bpm.read_page(root_page_id)?;
        // The root page is latched; its identity can no longer change under us.
        drop(root_latch);

        while !NodePageRef::new(guard.data()).is_leaf() {
            let child_id =
                InternalPageRef::<N>::new(guard.data()).look_up_child(key, &self.comparator);
            // Latch the child, then release the parent by replacing the guard
            guard = self.bpm.read_page(child_id)?;
        }

        Ok(Some(guard))
    }

    /// Point lookup.
    pub fn get(&self, key: &GenericKey<N>) -> Result<Option<RecordId>> {
        match self.find_leaf_page(key)? {
            Some(guard) => {
                Ok(LeafPageRef::<N>::new(guard.data()).look_up(key, &self.comparator))
            }
            None => Ok(None),
        }
    }

    /// Executor-facing lookup: appends the rid for `key` (if any) to
    /// `result` and reports whether the key was found.
    pub fn scan_key(&self, key: &GenericKey<N>, result: &mut Vec<RecordId>) -> Result<bool> {
        match self.get(key)? {
            Some(rid) => {
                result.push(rid);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /*****************************************************************************
     * INSERTION
     *****************************************************************************/

    /// Inserts a key/rid pair. Returns false if the key is already present;
    /// only unique keys are supported.
    pub fn insert(&self, key: &GenericKey<N>, rid: RecordId) -> Result<bool> {
        let mut ctx = Context::new(self.root_latch.write());

        let root_page_id = {
            let mut header_guard = self.bpm.write_page(self.header_page_id)?;
            let root_page_id = HeaderPageRef::new(header_guard.data()).root_page_id();
            if root_page_id == INVALID_PAGE_ID {
                let new_root_id = self.start_new_tree(key, rid)?;
                HeaderPage::new(header_guard.data_mut()).set_root_page_id(new_root_id);
                return Ok(true);
            }
            root_page_id
        };

        let mut guard = self.bpm.write_page(root_page_id)?;
        if Self::is_safe(guard.data(), LatchOp::Insert) {
            ctx.release_ancestors();
        }

        loop {
            if NodePageRef::new(guard.data()).is_leaf() {
                break;
            }
            let child_id =
                InternalPageRef::<N>::new(guard.data()).look_up_child(key, &self.comparator);
            let child_guard = self.bpm.write_page(child_id)?;
            let child_safe = Self::is_safe(child_guard.data(), LatchOp::Insert);
            ctx.write_set.push_back(guard);
            if child_safe {
                ctx.release_ancestors();
            }
            guard = child_guard;
        }

        let (inserted, overflow) = {
            let mut leaf = LeafPage::<N>::new(guard.data_mut());
            let inserted = leaf.insert(key, rid, &self.comparator);
            let overflow = leaf.size() > leaf.max_size();
            (inserted, overflow)
        };
        if !inserted {
            return Ok(false);
        }
        if overflow {
            self.split_leaf(&mut ctx, guard)?;
        }
        Ok(true)
    }

    /// Builds the first leaf of an empty tree and seeds it with one entry.
    fn start_new_tree(&self, key: &GenericKey<N>, rid: RecordId) -> Result<PageId> {
        let root_page_id = self.bpm.new_page()?;
        let mut guard = self.bpm.write_page(root_page_id)?;
        let mut leaf = LeafPage::<N>::new(guard.data_mut());
        leaf.init(root_page_id, INVALID_PAGE_ID, self.leaf_max_size);
        leaf.insert(key, rid, &self.comparator);
        debug!("started new tree at {}", root_page_id);
        Ok(root_page_id)
    }

    /// Splits an overflowing leaf and threads the new sibling into the leaf
    /// chain; the risen key is the new sibling's first key.
    fn split_leaf(&self, ctx: &mut Context<'_>, mut guard: WritePageGuard) -> Result<()> {
        let new_page_id = self.bpm.new_page()?;
        let mut new_guard = self.bpm.write_page(new_page_id)?;

        let risen_key = {
            let mut leaf = LeafPage::<N>::new(guard.data_mut());
            let mut new_leaf = LeafPage::<N>::new(new_guard.data_mut());
            new_leaf.init(new_page_id, leaf.parent_page_id(), self.leaf_max_size);
            leaf.move_half_to(&mut new_leaf);
            new_leaf.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(new_page_id);
            new_leaf.key_at(0)
        };
        trace!("split leaf {} -> {}", guard.page_id(), new_page_id);
        self.insert_into_parent(ctx, guard, new_guard, risen_key)
    }

    /// Installs the separator for a freshly split pair in their parent,
    /// splitting upward as long as the parent overflows too.
    fn insert_into_parent(
        &self,
        ctx: &mut Context<'_>,
        mut old_guard: WritePageGuard,
        mut new_guard: WritePageGuard,
        risen_key: GenericKey<N>,
    ) -> Result<()> {
        let old_page_id = old_guard.page_id();
        let new_page_id = new_guard.page_id();
        let parent_page_id = NodePageRef::new(old_guard.data()).parent_page_id();

        if parent_page_id == INVALID_PAGE_ID {
            // The split node was the root; grow the tree by one level.
            debug_assert!(
                ctx.holds_root_latch(),
                "splitting the root without the root latch"
            );
            let new_root_id = self.bpm.new_page()?;
            {
                let mut root_guard = self.bpm.write_page(new_root_id)?;
                let mut root = InternalPage::<N>::new(root_guard.data_mut());
                root.init(new_root_id, INVALID_PAGE_ID, self.internal_max_size);
                root.populate_new_root(old_page_id, &risen_key, new_page_id);
            }
            NodePage::new(old_guard.data_mut()).set_parent_page_id(new_root_id);
            NodePage::new(new_guard.data_mut()).set_parent_page_id(new_root_id);
            drop(new_guard);
            drop(old_guard);

            let mut header_guard = self.bpm.write_page(self.header_page_id)?;
            HeaderPage::new(header_guard.data_mut()).set_root_page_id(new_root_id);
            debug!("root split; new root {}", new_root_id);
            return Ok(());
        }

        let mut parent_guard = ctx
            .write_set
            .pop_back()
            .expect("parent of an unsafe child must be in the crab set");
        debug_assert_eq!(parent_guard.page_id(), parent_page_id);

        NodePage::new(new_guard.data_mut()).set_parent_page_id(parent_page_id);
        drop(new_guard);
        drop(old_guard);

        let overflow = {
            let mut parent = InternalPage::<N>::new(parent_guard.data_mut());
            parent.insert(&risen_key, new_page_id, &self.comparator);
            parent.size() > parent.max_size()
        };
        if !overflow {
            return Ok(());
        }

        let sibling_id = self.bpm.new_page()?;
        let mut sibling_guard = self.bpm.write_page(sibling_id)?;
        let risen = {
            let mut parent = InternalPage::<N>::new(parent_guard.data_mut());
            let mut sibling = InternalPage::<N>::new(sibling_guard.data_mut());
            sibling.init(sibling_id, parent.parent_page_id(), self.internal_max_size);
            parent.split_half_to(&mut sibling)
        };
        self.reparent_children(&sibling_guard, sibling_id)?;
        trace!("split internal {} -> {}", parent_guard.page_id(), sibling_id);
        self.insert_into_parent(ctx, parent_guard, sibling_guard, risen)
    }

    /// Points every child of the internal page behind `guard` at its new
    /// parent.
    fn reparent_children(&self, guard: &WritePageGuard, new_parent: PageId) -> Result<()> {
        let children: Vec<PageId> = {
            let page = InternalPageRef::<N>::new(guard.data());
            (0..page.size()).map(|i| page.child_at(i)).collect()
        };
        for child_id in children {
            let mut child_guard = self.bpm.write_page(child_id)?;
            NodePage::new(child_guard.data_mut()).set_parent_page_id(new_parent);
        }
        Ok(())
    }

    /*****************************************************************************
     * REMOVAL
     *****************************************************************************/

    /// Removes `key` if present; absent keys are a no-op.
    pub fn remove(&self, key: &GenericKey<N>) -> Result<()> {
        let mut ctx = Context::new(self.root_latch.write());

        let root_page_id = {
            let header_guard = self.bpm.read_page(self.header_page_id)?;
            HeaderPageRef::new(header_guard.data()).root_page_id()
        };
        if root_page_id == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut guard = self.bpm.write_page(root_page_id)?;
        if Self::is_safe(guard.data(), LatchOp::Delete) {
            ctx.release_ancestors();
        }

        loop {
            if NodePageRef::new(guard.data()).is_leaf() {
                break;
            }
            let child_id =
                InternalPageRef::<N>::new(guard.data()).look_up_child(key, &self.comparator);
            let child_guard = self.bpm.write_page(child_id)?;
            let child_safe = Self::is_safe(child_guard.data(), LatchOp::Delete);
            ctx.write_set.push_back(guard);
            if child_safe {
                ctx.release_ancestors();
            }
            guard = child_guard;
        }

        let (removed, size, min_size, is_root) = {
            let mut leaf = LeafPage::<N>::new(guard.data_mut());
            let removed = leaf.remove(key, &self.comparator);
            let is_root = leaf.parent_page_id() == INVALID_PAGE_ID;
            (removed, leaf.size(), leaf.min_size(), is_root)
        };
        if !removed {
            return Ok(());
        }
        if is_root || size < min_size {
            self.join_or_redistribute(&mut ctx, guard)?;
        }
        Ok(())
    }

    /// Fixes up an underflowing node: borrow from a sibling when one has
    /// spare entries, merge otherwise, cascading to the root as needed.
    fn join_or_redistribute(&self, ctx: &mut Context<'_>, mut guard: WritePageGuard) -> Result<()> {
        let (node_page_id, is_leaf, is_root, size, min_size) = {
            let node = NodePageRef::new(guard.data());
            (
                node.page_id(),
                node.is_leaf(),
                node.is_root(),
                node.size(),
                node.min_size(),
            )
        };

        if is_root {
            if !is_leaf && size == 1 {
                // The root routes to a single child; promote the child.
                let child_id = InternalPageRef::<N>::new(guard.data()).child_at(0);
                {
                    let mut child_guard = self.bpm.write_page(child_id)?;
                    NodePage::new(child_guard.data_mut()).set_parent_page_id(INVALID_PAGE_ID);
                }
                drop(guard);
                {
                    let mut header_guard = self.bpm.write_page(self.header_page_id)?;
                    HeaderPage::new(header_guard.data_mut()).set_root_page_id(child_id);
                }
                let _ = self.bpm.delete_page(node_page_id);
                debug!("root collapsed into {}", child_id);
            } else if is_leaf && size == 0 {
                drop(guard);
                {
                    let mut header_guard = self.bpm.write_page(self.header_page_id)?;
                    HeaderPage::new(header_guard.data_mut()).set_root_page_id(INVALID_PAGE_ID);
                }
                let _ = self.bpm.delete_page(node_page_id);
                debug!("tree emptied");
            }
            return Ok(());
        }

        if size >= min_size {
            return Ok(());
        }

        let mut parent_guard = ctx
            .write_set
            .pop_back()
            .expect("parent of an unsafe child must be in the crab set");

        let (index, parent_size) = {
            let parent = InternalPageRef::<N>::new(parent_guard.data());
            let index = parent
                .value_index(node_page_id)
                .expect("node not referenced by its parent");
            (index, parent.size())
        };

        if index + 1 < parent_size {
            // Prefer the right sibling
            let sibling_id = InternalPageRef::<N>::new(parent_guard.data()).child_at(index + 1);
            let mut sibling_guard = self.bpm.write_page(sibling_id)?;
            let has_spare = {
                let sibling = NodePageRef::new(sibling_guard.data());
                sibling.size() > sibling.min_size()
            };
            if has_spare {
                return self.redistribute_from_right(
                    &mut parent_guard,
                    &mut guard,
                    &mut sibling_guard,
                    index,
                );
            }
            self.coalesce(ctx, parent_guard, guard, sibling_guard, index + 1)
        } else {
            let sibling_id = InternalPageRef::<N>::new(parent_guard.data()).child_at(index - 1);
            let mut sibling_guard = self.bpm.write_page(sibling_id)?;
            let has_spare = {
                let sibling = NodePageRef::new(sibling_guard.data());
                sibling.size() > sibling.min_size()
            };
            if has_spare {
                return self.redistribute_from_left(
                    &mut parent_guard,
                    &mut guard,
                    &mut sibling_guard,
                    index,
                );
            }
            self.coalesce(ctx, parent_guard, sibling_guard, guard, index)
        }
    }

    /// Borrows one entry from the right sibling; the parent separator at
    /// `index + 1` is refreshed (leaves) or rotated through (internals).
    fn redistribute_from_right(
        &self,
        parent_guard: &mut WritePageGuard,
        node_guard: &mut WritePageGuard,
        sibling_guard: &mut WritePageGuard,
        index: usize,
    ) -> Result<()> {
        let node_page_id = node_guard.page_id();

        if NodePageRef::new(node_guard.data()).is_leaf() {
            {
                let mut node = LeafPage::<N>::new(node_guard.data_mut());
                let mut sibling = LeafPage::<N>::new(sibling_guard.data_mut());
                sibling.move_first_to_end_of(&mut node);
            }
            let new_separator = LeafPageRef::<N>::new(sibling_guard.data()).key_at(0);
            InternalPage::<N>::new(parent_guard.data_mut()).set_key_at(index + 1, &new_separator);
        } else {
            let pull_down = InternalPageRef::<N>::new(parent_guard.data()).key_at(index + 1);
            let (new_separator, moved_child) = {
                let sibling = InternalPageRef::<N>::new(sibling_guard.data());
                (sibling.key_at(1), sibling.child_at(0))
            };
            {
                let mut node = InternalPage::<N>::new(node_guard.data_mut());
                let mut sibling = InternalPage::<N>::new(sibling_guard.data_mut());
                sibling.move_first_to_end_of(&mut node, &pull_down);
            }
            InternalPage::<N>::new(parent_guard.data_mut()).set_key_at(index + 1, &new_separator);
            let mut child_guard = self.bpm.write_page(moved_child)?;
            NodePage::new(child_guard.data_mut()).set_parent_page_id(node_page_id);
        }
        trace!("redistributed into {} from right sibling", node_page_id);
        Ok(())
    }

    /// Borrows one entry from the left sibling; the parent separator at
    /// `index` is refreshed (leaves) or rotated through (internals).
    fn redistribute_from_left(
        &self,
        parent_guard: &mut WritePageGuard,
        node_guard: &mut WritePageGuard,
        sibling_guard: &mut WritePageGuard,
        index: usize,
    ) -> Result<()> {
        let node_page_id = node_guard.page_id();

        if NodePageRef::new(node_guard.data()).is_leaf() {
            {
                let mut node = LeafPage::<N>::new(node_guard.data_mut());
                let mut sibling = LeafPage::<N>::new(sibling_guard.data_mut());
                sibling.move_last_to_front_of(&mut node);
            }
            let new_separator = LeafPageRef::<N>::new(node_guard.data()).key_at(0);
            InternalPage::<N>::new(parent_guard.data_mut()).set_key_at(index, &new_separator);
        } else {
            let pull_down = InternalPageRef::<N>::new(parent_guard.data()).key_at(index);
            let (new_separator, moved_child) = {
                let sibling = InternalPageRef::<N>::new(sibling_guard.data());
                (
                    sibling.key_at(sibling.size() - 1),
                    sibling.child_at(sibling.size() - 1),
                )
            };
            {
                let mut node = InternalPage::<N>::new(node_guard.data_mut());
                let mut sibling = InternalPage::<N>::new(sibling_guard.data_mut());
                sibling.move_last_to_front_of(&mut node, &pull_down);
            }
            InternalPage::<N>::new(parent_guard.data_mut()).set_key_at(index, &new_separator);
            let mut child_guard = self.bpm.write_page(moved_child)?;
            NodePage::new(child_guard.data_mut()).set_parent_page_id(node_page_id);
        }
        trace!("redistributed into {} from left sibling", node_page_id);
        Ok(())
    }

    /// Merges the right node into the left, removes their separator from the
    /// parent, frees the right page, and recurses on the parent.
    fn coalesce(
        &self,
        ctx: &mut Context<'_>,
        mut parent_guard: WritePageGuard,
        mut left_guard: WritePageGuard,
        mut right_guard: WritePageGuard,
        separator_index: usize,
    ) -> Result<()> {
        let left_page_id = left_guard.page_id();
        let right_page_id = right_guard.page_id();

        if NodePageRef::new(left_guard.data()).is_leaf() {
            let mut left = LeafPage::<N>::new(left_guard.data_mut());
            let mut right = LeafPage::<N>::new(right_guard.data_mut());
            right.move_all_to(&mut left);
        } else {
            let pull_down =
                InternalPageRef::<N>::new(parent_guard.data()).key_at(separator_index);
            let old_left_size = InternalPageRef::<N>::new(left_guard.data()).size();
            {
                let mut left = InternalPage::<N>::new(left_guard.data_mut());
                let mut right = InternalPage::<N>::new(right_guard.data_mut());
                right.move_all_to(&mut left, &pull_down);
            }
            let moved: Vec<PageId> = {
                let left = InternalPageRef::<N>::new(left_guard.data());
                (old_left_size..left.size()).map(|i| left.child_at(i)).collect()
            };
            for child_id in moved {
                let mut child_guard = self.bpm.write_page(child_id)?;
                NodePage::new(child_guard.data_mut()).set_parent_page_id(left_page_id);
            }
        }
        trace!("coalesced {} into {}", right_page_id, left_page_id);

        drop(right_guard);
        drop(left_guard);

        InternalPage::<N>::new(parent_guard.data_mut()).remove_at(separator_index);
        // Best effort; a reader racing on the detached page keeps it pinned
        // for a moment longer and the frame is reclaimed by eviction instead.
        let _ = self.bpm.delete_page(right_page_id);

        self.join_or_redistribute(ctx, parent_guard)
    }

    /*****************************************************************************
     * ITERATION
     *****************************************************************************/

    /// Iterator positioned at the leftmost slot of the tree.
    pub fn begin(&self) -> Result<BPlusTreeIterator<N>> {
        let root_latch = self.root_latch.read();
        let root_page_id = {
            let header_guard = self.bpm.read_page(self.header_page_id)?;
            HeaderPageRef::new(header_guard.data()).root_page_id()
        };
        if root_page_id == INVALID_PAGE_ID {
            return Ok(BPlusTreeIterator::end(Arc::clone(&self.bpm)));
        }

        let mut guard = self.bpm.read_page(root_page_id)?;
        drop(root_latch);

        while !NodePageRef::new(guard.data()).is_leaf() {
            let child_id = InternalPageRef::<N>::new(guard.data()).child_at(0);
            guard = self.bpm.read_page(child_id)?;
        }

        Ok(BPlusTreeIterator::new(
            Arc::clone(&self.bpm),
            guard.page_id(),
            0,
        ))
    }

    /// Iterator positioned at the slot holding exactly `key`, or the end
    /// sentinel if the key is absent.
    pub fn begin_at(&self, key: &GenericKey<N>) -> Result<BPlusTreeIterator<N>> {
        let guard = match self.find_leaf_page(key)? {
            Some(guard) => guard,
            None => return Ok(BPlusTreeIterator::end(Arc::clone(&self.bpm))),
        };

        let leaf = LeafPageRef::<N>::new(guard.data());
        let index = leaf.key_index(key, &self.comparator);
        if index >= leaf.size()
            || self
                .comparator
                .compare(&leaf.key_at(index), key)
                != std::cmp::Ordering::Equal
        {
            return Ok(BPlusTreeIterator::end(Arc::clone(&self.bpm)));
        }

        Ok(BPlusTreeIterator::new(
            Arc::clone(&self.bpm),
            guard.page_id(),
            index,
        ))
    }

    /// The past-the-end sentinel.
    pub fn end(&self) -> BPlusTreeIterator<N> {
        BPlusTreeIterator::end(Arc::clone(&self.bpm))
    }

    /*****************************************************************************
     * VALIDATION
     *****************************************************************************/

    /// Walks the whole tree and verifies its structural invariants: key
    /// order, routing ranges, node fill, uniform leaf depth and parent
    /// links. Intended for tests and debugging.
    pub fn check_integrity(&self) -> Result<()> {
        let root_page_id = self.root_page_id()?;
        if root_page_id == INVALID_PAGE_ID {
            return Ok(());
        }
        let mut leaf_depth = None;
        self.check_subtree(root_page_id, INVALID_PAGE_ID, None, None, 0, &mut leaf_depth)
    }

    fn check_subtree(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        lower: Option<GenericKey<N>>,
        upper: Option<GenericKey<N>>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
    ) -> Result<()> {
        let corrupt = |msg: String| LarchError::IndexCorrupted(msg);

        let guard = self.bpm.read_page(page_id)?;
        let node = NodePageRef::new(guard.data());

        if node.page_id() != page_id {
            return Err(corrupt(format!("{} holds wrong self id", page_id)));
        }
        if node.parent_page_id() != expected_parent {
            return Err(corrupt(format!(
                "{} has parent {}, expected {}",
                page_id,
                node.parent_page_id(),
                expected_parent
            )));
        }
        let is_root = expected_parent == INVALID_PAGE_ID;
        if !is_root && (node.size() < node.min_size() || node.size() > node.max_size()) {
            return Err(corrupt(format!(
                "{} has size {} outside [{}, {}]",
                page_id,
                node.size(),
                node.min_size(),
                node.max_size()
            )));
        }

        let in_bounds = |k: &GenericKey<N>| {
            let above = lower
                .as_ref()
                .map(|lo| self.comparator.compare(k, lo) != std::cmp::Ordering::Less)
                .unwrap_or(true);
            let below = upper
                .as_ref()
                .map(|hi| self.comparator.compare(k, hi) == std::cmp::Ordering::Less)
                .unwrap_or(true);
            above && below
        };

        if node.is_leaf() {
            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(d) if d != depth => {
                    return Err(corrupt(format!(
                        "leaf {} at depth {}, expected {}",
                        page_id, depth, d
                    )))
                }
                _ => {}
            }
            let leaf = LeafPageRef::<N>::new(guard.data());
            for i in 0..leaf.size() {
                let k = leaf.key_at(i);
                if !in_bounds(&k) {
                    return Err(corrupt(format!("leaf {} key {} out of range", page_id, k)));
                }
                if i > 0
                    && self.comparator.compare(&leaf.key_at(i - 1), &k)
                        != std::cmp::Ordering::Less
                {
                    return Err(corrupt(format!("leaf {} keys not ascending", page_id)));
                }
            }
            return Ok(());
        }

        let internal = InternalPageRef::<N>::new(guard.data());
        if internal.size() < 2 {
            return Err(corrupt(format!(
                "internal {} has fewer than two children",
                page_id
            )));
        }
        for i in 1..internal.size() {
            let k = internal.key_at(i);
            if !in_bounds(&k) {
                return Err(corrupt(format!(
                    "internal {} separator {} out of range",
                    page_id, k
                )));
            }
            if i > 1
                && self
                    .comparator
                    .compare(&internal.key_at(i - 1), &k)
                    != std::cmp::Ordering::Less
            {
                return Err(corrupt(format!("internal {} keys not ascending", page_id)));
            }
        }

        let children: Vec<(PageId, Option<GenericKey<N>>, Option<GenericKey<N>>)> = (0..internal
            .size())
            .map(|i| {
                let child_lower = if i == 0 { lower } else { Some(internal.key_at(i)) };
                let child_upper = if i + 1 < internal.size() {
                    Some(internal.key_at(i + 1))
                } else {
                    upper
                };
                (internal.child_at(i), child_lower, child_upper)
            })
            .collect();
        drop(guard);

        for (child_id, child_lower, child_upper) in children {
            self.check_subtree(
                child_id,
                page_id,
                child_lower,
                child_upper,
                depth + 1,
                leaf_depth,
            )?;
        }
        Ok(())
    }
}
