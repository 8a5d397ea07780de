// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use common::types::{PageId, Rid};
pub use index::btree::BPlusTree;
pub use storage::buffer::{BufferPoolError, BufferPoolManager};
pub use storage::disk::DiskManager;
pub use transaction::concurrency::LockManager;
pub use transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionError, TransactionManager,
    TransactionState,
};
