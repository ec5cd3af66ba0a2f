use std::fmt;
use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::common::{PageId, RecordId, Result, INVALID_PAGE_ID};

use super::btree_page::LeafPageRef;
use super::generic_key::GenericKey;

/// Forward-only cursor over the leaf chain of a B+ tree.
///
/// The iterator holds no latches between calls: every dereference and every
/// advance re-acquires a shared latch on the current leaf and drops it
/// before returning. Entries come back by value, so nothing the caller keeps
/// is protected by the latch. The end sentinel is an invalid current page.
pub struct BPlusTreeIterator<const N: usize> {
    bpm: Arc<BufferPoolManager>,
    current_page_id: PageId,
    current_index: usize,
}

impl<const N: usize> BPlusTreeIterator<N> {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, index: usize) -> Self {
        Self {
            bpm,
            current_page_id: page_id,
            current_index: index,
        }
    }

    pub(crate) fn end(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            current_page_id: INVALID_PAGE_ID,
            current_index: 0,
        }
    }

    pub fn is_end(&self) -> bool {
        self.current_page_id == INVALID_PAGE_ID
    }

    /// Reads the entry under the cursor. Must not be called on the end
    /// sentinel.
    pub fn entry(&self) -> Result<(GenericKey<N>, RecordId)> {
        assert!(!self.is_end(), "dereferenced the end iterator");
        let guard = self.bpm.read_page(self.current_page_id)?;
        let leaf = LeafPageRef::<N>::new(guard.data());
        Ok((
            leaf.key_at(self.current_index),
            leaf.rid_at(self.current_index),
        ))
    }

    /// Steps to the next slot, following the leaf chain across page
    /// boundaries. Advancing the end sentinel is a no-op.
    pub fn advance(&mut self) -> Result<()> {
        if self.is_end() {
            return Ok(());
        }
        let guard = self.bpm.read_page(self.current_page_id)?;
        let leaf = LeafPageRef::<N>::new(guard.data());
        if self.current_index + 1 < leaf.size() {
            self.current_index += 1;
        } else {
            self.current_page_id = leaf.next_page_id();
            self.current_index = 0;
        }
        Ok(())
    }
}

impl<const N: usize> PartialEq for BPlusTreeIterator<N> {
    fn eq(&self, other: &Self) -> bool {
        (self.is_end() && other.is_end())
            || (self.current_page_id == other.current_page_id
                && self.current_index == other.current_index)
    }
}

impl<const N: usize> Eq for BPlusTreeIterator<N> {}

impl<const N: usize> fmt::Debug for BPlusTreeIterator<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BPlusTreeIterator")
            .field("current_page_id", &self.current_page_id)
            .field("current_index", &self.current_index)
            .finish()
    }
}

impl<const N: usize> Iterator for BPlusTreeIterator<N> {
    type Item = Result<(GenericKey<N>, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_end() {
            return None;
        }
        let entry = match self.entry() {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e)),
        };
        if let Err(e) = self.advance() {
            return Some(Err(e));
        }
        Some(Ok(entry))
    }
}
