use parking_lot::{ArcRwLockReadGuard, RawRwLock};

use crate::common::types::{Page, PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::serialization::deserialize_node;
use crate::index::btree::node::BTreeNode;
use super::base::{BPlusTree, LeafSearch};

/// Forward iterator over the leaf chain, yielding `(key, rid)` in ascending
/// key order. The current leaf stays pinned and read-latched while entries
/// are drawn from it; crossing a page boundary releases the latch before
/// the next leaf is acquired, so the iterator never holds two latches and
/// cannot participate in a latch cycle with a rebalancing writer.
pub struct TreeIterator<'a, K: IndexKey> {
    tree: &'a BPlusTree<K>,
    cursor: Option<LeafCursor<K>>,
}

struct LeafCursor<K> {
    page_id: PageId,
    guard: ArcRwLockReadGuard<RawRwLock, Page>,
    node: BTreeNode<K>,
    idx: usize,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Iterate from the smallest key
    pub fn iter(&self) -> Result<TreeIterator<'_, K>, BTreeError> {
        let cursor = self
            .find_leaf_read(LeafSearch::Leftmost)?
            .map(|leaf| LeafCursor {
                page_id: leaf.page_id,
                guard: leaf.guard,
                node: leaf.node,
                idx: 0,
            });
        Ok(TreeIterator { tree: self, cursor })
    }

    /// Iterate from the first key >= `key`
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<'_, K>, BTreeError> {
        let cursor = self.find_leaf_read(LeafSearch::Key(key))?.map(|leaf| {
            let idx = leaf.node.key_index(key);
            LeafCursor {
                page_id: leaf.page_id,
                guard: leaf.guard,
                node: leaf.node,
                idx,
            }
        });
        Ok(TreeIterator { tree: self, cursor })
    }

    fn read_leaf_cursor(&self, page_id: PageId) -> Result<LeafCursor<K>, BTreeError> {
        let ptr = self.buffer_pool.fetch_page(page_id)?;
        let guard = ptr.read_arc();
        let node = match deserialize_node::<K>(&guard) {
            Ok(node) => node,
            Err(e) => {
                drop(guard);
                let _ = self.buffer_pool.unpin_page(page_id, false);
                return Err(e);
            }
        };
        if !node.is_leaf() {
            drop(guard);
            let _ = self.buffer_pool.unpin_page(page_id, false);
            return Err(BTreeError::Corrupted(format!(
                "leaf chain points at non-leaf page {}",
                page_id
            )));
        }
        Ok(LeafCursor {
            page_id,
            guard,
            node,
            idx: 0,
        })
    }
}

impl<K: IndexKey> Iterator for TreeIterator<'_, K> {
    type Item = Result<(K, Rid), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let cursor = self.cursor.as_mut()?;

            if cursor.idx < cursor.node.size() {
                let item = (
                    cursor.node.keys[cursor.idx].clone(),
                    cursor.node.rids[cursor.idx],
                );
                cursor.idx += 1;
                return Some(Ok(item));
            }

            let next_id = cursor.node.next_page_id;
            self.release_current();

            if next_id == INVALID_PAGE_ID {
                return None;
            }
            match self.tree.read_leaf_cursor(next_id) {
                Ok(cursor) => self.cursor = Some(cursor),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl<K: IndexKey> TreeIterator<'_, K> {
    fn release_current(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            let page_id = cursor.page_id;
            drop(cursor.guard);
            if let Err(e) = self.tree.buffer_pool.unpin_page(page_id, false) {
                log::error!("iterator failed to unpin leaf {}: {}", page_id, e);
            }
        }
    }
}

impl<K: IndexKey> Drop for TreeIterator<'_, K> {
    fn drop(&mut self) {
        self.release_current();
    }
}
