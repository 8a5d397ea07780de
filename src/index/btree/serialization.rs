use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, Rid, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::{BTreeNode, NodeType};

// Common header layout, little-endian:
//   page_id: u32, parent_page_id: u32, node_type: u32, size: u32, max_size: u32
// Leaf pages additionally carry next_page_id: u32.
// The entry array follows: fixed-width key then value (leaf: rid as two
// u32s; internal: child page id as u32).
const PAGE_ID_OFFSET: usize = 0;
const PARENT_OFFSET: usize = 4;
const NODE_TYPE_OFFSET: usize = 8;
const SIZE_OFFSET: usize = 12;
const MAX_SIZE_OFFSET: usize = 16;
const NEXT_PAGE_OFFSET: usize = 20;
const LEAF_ENTRIES_OFFSET: usize = 24;
const INTERNAL_ENTRIES_OFFSET: usize = 20;

const NODE_TYPE_LEAF: u32 = 1;
const NODE_TYPE_INTERNAL: u32 = 2;

const RID_LEN: usize = 8;
const CHILD_LEN: usize = 4;

/// Largest entry count of this key type that still fits in a page
pub fn max_entries_for<K: IndexKey>(node_type: NodeType) -> u32 {
    let (header, value_len) = match node_type {
        NodeType::Leaf => (LEAF_ENTRIES_OFFSET, RID_LEN),
        NodeType::Internal => (INTERNAL_ENTRIES_OFFSET, CHILD_LEN),
    };
    ((PAGE_SIZE - header) / (K::ENCODED_LEN + value_len)) as u32
}

/// Serialize a node into a page's byte buffer
pub fn serialize_node<K: IndexKey>(node: &BTreeNode<K>, page: &mut Page) {
    debug_assert!(node.size() <= max_entries_for::<K>(node.node_type) as usize);

    page.data.fill(0);
    LittleEndian::write_u32(&mut page.data[PAGE_ID_OFFSET..], page.page_id);
    LittleEndian::write_u32(&mut page.data[PARENT_OFFSET..], node.parent_page_id);
    let tag = match node.node_type {
        NodeType::Leaf => NODE_TYPE_LEAF,
        NodeType::Internal => NODE_TYPE_INTERNAL,
    };
    LittleEndian::write_u32(&mut page.data[NODE_TYPE_OFFSET..], tag);
    LittleEndian::write_u32(&mut page.data[SIZE_OFFSET..], node.size() as u32);
    LittleEndian::write_u32(&mut page.data[MAX_SIZE_OFFSET..], node.max_size);

    match node.node_type {
        NodeType::Leaf => {
            LittleEndian::write_u32(&mut page.data[NEXT_PAGE_OFFSET..], node.next_page_id);
            let stride = K::ENCODED_LEN + RID_LEN;
            let mut offset = LEAF_ENTRIES_OFFSET;
            for (key, rid) in node.keys.iter().zip(node.rids.iter()) {
                key.encode(&mut page.data[offset..offset + K::ENCODED_LEN]);
                let value_at = offset + K::ENCODED_LEN;
                LittleEndian::write_u32(&mut page.data[value_at..], rid.page_id);
                LittleEndian::write_u32(&mut page.data[value_at + 4..], rid.slot);
                offset += stride;
            }
        }
        NodeType::Internal => {
            let stride = K::ENCODED_LEN + CHILD_LEN;
            let mut offset = INTERNAL_ENTRIES_OFFSET;
            for (key, child) in node.keys.iter().zip(node.children.iter()) {
                key.encode(&mut page.data[offset..offset + K::ENCODED_LEN]);
                LittleEndian::write_u32(&mut page.data[offset + K::ENCODED_LEN..], *child);
                offset += stride;
            }
        }
    }
}

/// Deserialize a node from a page's byte buffer
pub fn deserialize_node<K: IndexKey>(page: &Page) -> Result<BTreeNode<K>, BTreeError> {
    let tag = LittleEndian::read_u32(&page.data[NODE_TYPE_OFFSET..]);
    let node_type = match tag {
        NODE_TYPE_LEAF => NodeType::Leaf,
        NODE_TYPE_INTERNAL => NodeType::Internal,
        _ => return Err(BTreeError::InvalidPageFormat(page.page_id)),
    };

    let parent_page_id = LittleEndian::read_u32(&page.data[PARENT_OFFSET..]);
    let size = LittleEndian::read_u32(&page.data[SIZE_OFFSET..]) as usize;
    let max_size = LittleEndian::read_u32(&page.data[MAX_SIZE_OFFSET..]);

    if size > max_entries_for::<K>(node_type) as usize {
        return Err(BTreeError::InvalidPageFormat(page.page_id));
    }

    let mut node = match node_type {
        NodeType::Leaf => BTreeNode::new_leaf(parent_page_id, max_size),
        NodeType::Internal => BTreeNode::new_internal(parent_page_id, max_size),
    };

    match node_type {
        NodeType::Leaf => {
            node.next_page_id = LittleEndian::read_u32(&page.data[NEXT_PAGE_OFFSET..]);
            let stride = K::ENCODED_LEN + RID_LEN;
            let mut offset = LEAF_ENTRIES_OFFSET;
            node.keys.reserve(size);
            node.rids.reserve(size);
            for _ in 0..size {
                node.keys
                    .push(K::decode(&page.data[offset..offset + K::ENCODED_LEN]));
                let value_at = offset + K::ENCODED_LEN;
                node.rids.push(Rid::new(
                    LittleEndian::read_u32(&page.data[value_at..]),
                    LittleEndian::read_u32(&page.data[value_at + 4..]),
                ));
                offset += stride;
            }
        }
        NodeType::Internal => {
            let stride = K::ENCODED_LEN + CHILD_LEN;
            let mut offset = INTERNAL_ENTRIES_OFFSET;
            node.keys.reserve(size);
            node.children.reserve(size);
            for _ in 0..size {
                node.keys
                    .push(K::decode(&page.data[offset..offset + K::ENCODED_LEN]));
                node.children
                    .push(LittleEndian::read_u32(&page.data[offset + K::ENCODED_LEN..]));
                offset += stride;
            }
        }
    }

    Ok(node)
}

/// Rewrite only the parent pointer in a serialized node page.
/// Used when a split or merge adopts children into a different parent.
pub(crate) fn write_parent_page_id(page: &mut Page, parent: PageId) {
    LittleEndian::write_u32(&mut page.data[PARENT_OFFSET..], parent);
}
