pub mod error;
pub mod index;
pub mod key;
pub mod latch;
pub mod node;
pub mod serialization;

pub use error::BTreeError;
pub use index::BPlusTree;
pub use index::iterator::TreeIterator;
pub use key::{FixedKey, IndexKey};
pub use node::{BTreeNode, NodeType};
pub use serialization::{deserialize_node, serialize_node, max_entries_for};
