use parking_lot::MutexGuard;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::latch::WriteSet;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::{deserialize_node, serialize_node};
use super::base::{BPlusTree, TreeOp};

impl<K: IndexKey> BPlusTree<K> {
    /// Insert a key/rid pair. Returns false when the key already exists
    /// (unique keys only).
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        loop {
            {
                let mut root = self.root_page_id.lock();
                if *root == INVALID_PAGE_ID {
                    self.start_new_tree(&mut root, key.clone(), rid)?;
                    return Ok(true);
                }
            }
            // A concurrent remove may empty the tree between the check and
            // the descent; loop back to the empty-tree path when it does.
            if let Some(inserted) = self.insert_into_leaf(key.clone(), rid)? {
                return Ok(inserted);
            }
        }
    }

    fn start_new_tree(
        &self,
        root: &mut MutexGuard<'_, PageId>,
        key: K,
        rid: Rid,
    ) -> Result<(), BTreeError> {
        let (ptr, page_id) = self.buffer_pool.new_page()?;

        let mut leaf = BTreeNode::new_leaf(INVALID_PAGE_ID, self.leaf_max_size);
        leaf.leaf_insert(key, rid);
        serialize_node(&leaf, &mut ptr.write());
        self.buffer_pool.unpin_page(page_id, true)?;

        **root = page_id;
        self.update_root_record(page_id)
    }

    fn insert_into_leaf(&self, key: K, rid: Rid) -> Result<Option<bool>, BTreeError> {
        let mut ws = match self.find_leaf_write(&key, TreeOp::Insert)? {
            Some(ws) => ws,
            None => return Ok(None),
        };
        let leaf_id = ws
            .last_page_id()
            .ok_or_else(|| BTreeError::Corrupted("write descent returned no leaf".into()))?;

        let mut node = {
            let page = ws
                .page_mut(leaf_id)
                .ok_or_else(|| BTreeError::Corrupted("leaf missing from latch set".into()))?;
            deserialize_node::<K>(page)?
        };

        if !node.leaf_insert(key, rid) {
            ws.release_all(false);
            return Ok(Some(false));
        }

        if node.size() > node.max_size as usize {
            self.split(&mut ws, leaf_id, node)?;
        } else {
            let page = ws
                .page_mut(leaf_id)
                .ok_or_else(|| BTreeError::Corrupted("leaf missing from latch set".into()))?;
            serialize_node(&node, page);
        }

        ws.release_all(true);
        Ok(Some(true))
    }

    /// Split an overfull node: the upper entries move into a fresh right
    /// sibling and the separator is pushed into the parent, recursively.
    pub(crate) fn split(
        &self,
        ws: &mut WriteSet<'_>,
        page_id: PageId,
        mut node: BTreeNode<K>,
    ) -> Result<(), BTreeError> {
        let (right_ptr, right_id) = self.buffer_pool.new_page()?;
        let mut right = node.split_off_upper(right_id);

        if !right.is_leaf() {
            // The moved subtrees are adopted by the new sibling
            for child in right.children.clone() {
                self.set_parent(ws, child, right_id)?;
            }
        }

        let parent_id = node.parent_page_id;
        {
            let page = ws
                .page_mut(page_id)
                .ok_or_else(|| BTreeError::Corrupted("split node missing from latch set".into()))?;
            serialize_node(&node, page);
        }
        serialize_node(&right, &mut right_ptr.write());

        let separator = right.keys[0].clone();
        let result = self.insert_into_parent(ws, page_id, parent_id, separator, right_id);
        self.buffer_pool.unpin_page(right_id, true)?;
        result
    }

    fn insert_into_parent(
        &self,
        ws: &mut WriteSet<'_>,
        left_id: PageId,
        parent_id: PageId,
        key: K,
        right_id: PageId,
    ) -> Result<(), BTreeError> {
        if parent_id == INVALID_PAGE_ID {
            // The old root split: grow the tree by one level
            let mut root = self.root_page_id.lock();

            let (root_ptr, new_root_id) = self.buffer_pool.new_page()?;
            let mut new_root = BTreeNode::new_internal(INVALID_PAGE_ID, self.internal_max_size);
            new_root.populate_new_root(left_id, key, right_id);
            serialize_node(&new_root, &mut root_ptr.write());
            self.buffer_pool.unpin_page(new_root_id, true)?;

            self.set_parent(ws, left_id, new_root_id)?;
            self.set_parent(ws, right_id, new_root_id)?;

            *root = new_root_id;
            return self.update_root_record(new_root_id);
        }

        // An unsafe child kept its parent latched, so the parent is ours
        let mut parent = {
            let page = ws
                .page_mut(parent_id)
                .ok_or_else(|| BTreeError::Corrupted("parent missing from latch set".into()))?;
            deserialize_node::<K>(page)?
        };
        parent.insert_node_after(left_id, key, right_id);

        if parent.size() > parent.max_size as usize {
            self.split(ws, parent_id, parent)
        } else {
            let page = ws
                .page_mut(parent_id)
                .ok_or_else(|| BTreeError::Corrupted("parent missing from latch set".into()))?;
            serialize_node(&parent, page);
            Ok(())
        }
    }
}
