use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::common::{BirchError, PageId, RecordId, Result, INVALID_PAGE_ID};

use super::btree_page::{BTreePageRef, LeafPageRef};
use super::key::IndexKey;

/// Forward cursor over the leaf chain of a B+ tree.
///
/// The position is a `(leaf page id, slot index)` pair; the end position is
/// the invalid page id. Each dereference and advance briefly latches the
/// current leaf; no latch is held between calls, so entries seen across a
/// concurrent structural change may be skipped or repeated.
pub struct IndexIterator<K: IndexKey> {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    index: usize,
    _key: PhantomData<K>,
}

impl<K: IndexKey> IndexIterator<K> {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, index: usize) -> Self {
        Self {
            bpm,
            page_id,
            index,
            _key: PhantomData,
        }
    }

    pub(crate) fn end(bpm: Arc<BufferPoolManager>) -> Self {
        Self::new(bpm, INVALID_PAGE_ID, 0)
    }

    pub fn is_end(&self) -> bool {
        self.page_id == INVALID_PAGE_ID
    }

    /// The entry at the current position. The leaf is read under a shared
    /// latch taken for the duration of this call only.
    pub fn entry(&self) -> Result<(K, RecordId)> {
        assert!(!self.is_end(), "dereferenced an end iterator");

        let guard = self.bpm.read_page(self.page_id)?;
        let page = BTreePageRef::new(guard.data());
        if !page.is_leaf() || self.index >= page.size() as usize {
            return Err(BirchError::IndexCorrupted(format!(
                "iterator position {}:{} no longer addresses a leaf entry",
                self.page_id, self.index
            )));
        }
        let leaf = LeafPageRef::<K>::new(guard.data());
        Ok((leaf.key_at(self.index), leaf.value_at(self.index)))
    }

    /// Advances to the next entry, following the next-leaf pointer at the
    /// end of the current leaf. The previous leaf's latch is released before
    /// the next leaf is ever touched.
    pub fn advance(&mut self) -> Result<()> {
        if self.is_end() {
            return Ok(());
        }

        let (size, next) = {
            let guard = self.bpm.read_page(self.page_id)?;
            let page = BTreePageRef::new(guard.data());
            if !page.is_leaf() {
                // The page was repurposed underneath a stale cursor.
                (0, INVALID_PAGE_ID)
            } else {
                let leaf = LeafPageRef::<K>::new(guard.data());
                (leaf.size() as usize, leaf.next_page_id())
            }
        };

        if self.index + 1 < size {
            self.index += 1;
        } else {
            self.page_id = next;
            self.index = 0;
        }
        Ok(())
    }

    /// Returns the current entry and advances past it; None at the end.
    pub fn next_entry(&mut self) -> Result<Option<(K, RecordId)>> {
        if self.is_end() {
            return Ok(None);
        }
        let entry = self.entry()?;
        self.advance()?;
        Ok(Some(entry))
    }
}

impl<K: IndexKey> fmt::Debug for IndexIterator<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexIterator")
            .field("page_id", &self.page_id)
            .field("index", &self.index)
            .finish()
    }
}

impl<K: IndexKey> PartialEq for IndexIterator<K> {
    fn eq(&self, other: &Self) -> bool {
        if self.is_end() && other.is_end() {
            return true;
        }
        self.page_id == other.page_id && self.index == other.index
    }
}

impl<K: IndexKey> Eq for IndexIterator<K> {}

impl<K: IndexKey> Iterator for IndexIterator<K> {
    type Item = Result<(K, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
