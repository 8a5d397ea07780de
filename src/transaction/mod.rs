pub mod concurrency;

// Public exports
pub use concurrency::transaction_manager::TransactionManager;
pub use concurrency::{
    AbortReason, IsolationLevel, LockManager, Transaction, TransactionError, TransactionState,
};
