use crate::common::types::{PageId, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::latch::WriteSet;
use crate::index::btree::node::{BTreeNode, NodeType};
use crate::index::btree::serialization::{deserialize_node, serialize_node};
use super::base::{BPlusTree, TreeOp};

impl<K: IndexKey> BPlusTree<K> {
    /// Delete a key. Removing an absent key is a no-op.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        let mut ws = match self.find_leaf_write(key, TreeOp::Remove)? {
            Some(ws) => ws,
            None => return Ok(()),
        };
        let leaf_id = ws
            .last_page_id()
            .ok_or_else(|| BTreeError::Corrupted("write descent returned no leaf".into()))?;

        self.delete_entry(&mut ws, leaf_id, key.clone())?;
        ws.release_all(true);
        Ok(())
    }

    /// Remove `key`'s entry from the node on `page_id`, then restore the
    /// occupancy invariant by merging with or borrowing from a sibling,
    /// recursing into the parent when a merge removes a separator.
    fn delete_entry(
        &self,
        ws: &mut WriteSet<'_>,
        page_id: PageId,
        key: K,
    ) -> Result<(), BTreeError> {
        let mut node = {
            let page = ws
                .page_mut(page_id)
                .ok_or_else(|| BTreeError::Corrupted("node missing from latch set".into()))?;
            deserialize_node::<K>(page)?
        };

        match node.node_type {
            NodeType::Leaf => {
                if !node.leaf_remove(&key) {
                    return Ok(());
                }
            }
            NodeType::Internal => {
                let child = node.child_for(&key);
                let idx = node
                    .value_index(child)
                    .ok_or_else(|| BTreeError::Corrupted("separator child not found".into()))?;
                node.remove_at(idx);
            }
        }

        if node.is_root() {
            return self.adjust_root(ws, page_id, node);
        }

        if node.size() >= node.min_size() {
            let page = ws
                .page_mut(page_id)
                .ok_or_else(|| BTreeError::Corrupted("node missing from latch set".into()))?;
            serialize_node(&node, page);
            return Ok(());
        }

        // Underflow: the unsafe descent kept the parent latched
        let parent_id = node.parent_page_id;
        let mut parent = {
            let page = ws
                .page_mut(parent_id)
                .ok_or_else(|| BTreeError::Corrupted("parent missing from latch set".into()))?;
            deserialize_node::<K>(page)?
        };

        let idx = parent
            .value_index(page_id)
            .ok_or_else(|| BTreeError::Corrupted("node not referenced by parent".into()))?;
        // Previous sibling if one exists, else the next
        let sibling_idx = if idx == 0 { 1 } else { idx - 1 };
        let middle_idx = idx.max(sibling_idx);
        let middle_key = parent.keys[middle_idx].clone();
        let sibling_id = parent.children[sibling_idx];

        // The parent's write latch shuts out every other writer below it,
        // so the sibling latch cannot deadlock.
        let sibling_ptr = self.buffer_pool.fetch_page(sibling_id)?;
        let mut sibling_guard = sibling_ptr.write_arc();
        let mut sibling = match deserialize_node::<K>(&sibling_guard) {
            Ok(sibling) => sibling,
            Err(e) => {
                drop(sibling_guard);
                let _ = self.buffer_pool.unpin_page(sibling_id, false);
                return Err(e);
            }
        };

        if node.size() + sibling.size() < node.max_size as usize {
            // Merge, always the right node into the left
            let (survivor_id, merged_id) = if idx > sibling_idx {
                (sibling_id, page_id)
            } else {
                (page_id, sibling_id)
            };

            let (left, right) = if idx > sibling_idx {
                (&mut sibling, &mut node)
            } else {
                (&mut node, &mut sibling)
            };

            let adopted: Vec<PageId> = if right.is_leaf() {
                Vec::new()
            } else {
                right.children.clone()
            };
            right.move_all_to(left, &middle_key);

            for child in adopted {
                self.set_parent(ws, child, survivor_id)?;
            }

            if survivor_id == page_id {
                let page = ws
                    .page_mut(page_id)
                    .ok_or_else(|| BTreeError::Corrupted("node missing from latch set".into()))?;
                serialize_node(&node, page);
                drop(sibling_guard);
                self.buffer_pool.unpin_page(sibling_id, true)?;
            } else {
                serialize_node(&sibling, &mut sibling_guard);
                drop(sibling_guard);
                self.buffer_pool.unpin_page(sibling_id, true)?;
                ws.release_page(page_id, true);
            }
            self.discard_page(merged_id);

            return self.delete_entry(ws, parent_id, middle_key);
        }

        // Redistribute a single entry through the parent's separator
        if sibling_idx < idx {
            // Borrow the previous sibling's last entry
            match node.node_type {
                NodeType::Leaf => {
                    sibling.move_last_to_front_of(&mut node, &middle_key);
                    parent.set_key_at(middle_idx, node.keys[0].clone());
                }
                NodeType::Internal => {
                    let rotated = sibling.keys[sibling.size() - 1].clone();
                    sibling.move_last_to_front_of(&mut node, &rotated);
                    let moved_child = node.children[0];
                    self.set_parent(ws, moved_child, page_id)?;
                    parent.set_key_at(middle_idx, rotated);
                }
            }
        } else {
            // Borrow the next sibling's first entry
            match node.node_type {
                NodeType::Leaf => {
                    sibling.move_first_to_end_of(&mut node, &middle_key);
                    parent.set_key_at(middle_idx, sibling.keys[0].clone());
                }
                NodeType::Internal => {
                    sibling.move_first_to_end_of(&mut node, &middle_key);
                    let moved_child = node.children[node.size() - 1];
                    self.set_parent(ws, moved_child, page_id)?;
                    parent.set_key_at(middle_idx, sibling.keys[0].clone());
                }
            }
        }

        {
            let page = ws
                .page_mut(page_id)
                .ok_or_else(|| BTreeError::Corrupted("node missing from latch set".into()))?;
            serialize_node(&node, page);
        }
        serialize_node(&sibling, &mut sibling_guard);
        drop(sibling_guard);
        self.buffer_pool.unpin_page(sibling_id, true)?;
        {
            let page = ws
                .page_mut(parent_id)
                .ok_or_else(|| BTreeError::Corrupted("parent missing from latch set".into()))?;
            serialize_node(&parent, page);
        }
        Ok(())
    }

    /// Root occupancy rules: an internal root shrinking to a single child
    /// promotes that child; an empty leaf root empties the tree. The root
    /// is otherwise exempt from the minimum-size bound.
    fn adjust_root(
        &self,
        ws: &mut WriteSet<'_>,
        page_id: PageId,
        node: BTreeNode<K>,
    ) -> Result<(), BTreeError> {
        if !node.is_leaf() && node.size() == 1 {
            let mut root = self.root_page_id.lock();
            let only_child = node.children[0];
            self.set_parent(ws, only_child, INVALID_PAGE_ID)?;
            *root = only_child;
            self.update_root_record(only_child)?;
            drop(root);

            ws.release_page(page_id, false);
            self.discard_page(page_id);
        } else if node.is_leaf() && node.size() == 0 {
            let mut root = self.root_page_id.lock();
            *root = INVALID_PAGE_ID;
            self.update_root_record(INVALID_PAGE_ID)?;
            drop(root);

            ws.release_page(page_id, false);
            self.discard_page(page_id);
        } else {
            let page = ws
                .page_mut(page_id)
                .ok_or_else(|| BTreeError::Corrupted("root missing from latch set".into()))?;
            serialize_node(&node, page);
        }
        Ok(())
    }
}
