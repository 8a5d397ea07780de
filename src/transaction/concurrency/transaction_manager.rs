use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Result, Transaction, TransactionError, TransactionState,
};

/// Transaction manager - creates, tracks and finishes transactions.
/// Commit and abort both release every lock the transaction still holds.
pub struct TransactionManager {
    /// Next transaction ID to assign
    next_txn_id: AtomicU32,

    /// Lock manager used to release held locks at completion
    lock_manager: Arc<LockManager>,

    /// Active transactions map (txn_id -> Transaction)
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction at the given isolation level
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, txn.clone());
        txn
    }

    /// Commit: release all locks, then mark the transaction committed.
    /// A transaction the deadlock detector already aborted cannot commit.
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<()> {
        if txn.state() == TransactionState::Aborted {
            self.finish(txn);
            return Err(TransactionError::NotActive(txn.id()));
        }

        self.lock_manager.unlock_all(txn);
        txn.set_state(TransactionState::Committed);
        self.finish(txn);
        Ok(())
    }

    /// Abort: release all locks and mark the transaction aborted
    pub fn abort(&self, txn: &Arc<Transaction>) {
        self.lock_manager.unlock_all(txn);
        txn.set_state(TransactionState::Aborted);
        self.finish(txn);
    }

    /// Get a transaction by ID
    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    /// All currently active transaction IDs
    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }

    fn finish(&self, txn: &Arc<Transaction>) {
        self.active_transactions.lock().remove(&txn.id());
        self.lock_manager.remove_transaction(txn.id());
    }
}
