use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{
    AbortReason, IsolationLevel, Result, Transaction, TransactionError, TransactionState,
};

/// How often the background detector scans for wait-for cycles
const CYCLE_DETECTION_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Kind of write an executor is about to perform; decides between a fresh
/// exclusive lock and an upgrade of an already-held shared lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    Insert,
    Update,
    Delete,
}

#[derive(Debug)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

#[derive(Default)]
struct QueueState {
    requests: VecDeque<LockRequest>,
    upgrading: bool,
}

/// Per-record request queue. Grants are FIFO: a request is granted at the
/// head of the queue, or, for shared requests, when nothing exclusive sits
/// ahead of it (so a contiguous shared prefix coalesces).
struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            cv: Condvar::new(),
        }
    }
}

fn can_grant(state: &QueueState, txn_id: TxnId) -> bool {
    let idx = match state.requests.iter().position(|r| r.txn_id == txn_id) {
        Some(idx) => idx,
        None => return false,
    };
    match state.requests[idx].mode {
        LockMode::Shared => state
            .requests
            .iter()
            .take(idx)
            .all(|r| r.mode == LockMode::Shared),
        // Head of the queue with no grants left behind it: this also covers
        // an in-place upgrade that must outwait the other shared holders
        LockMode::Exclusive => {
            idx == 0 && state.requests.iter().skip(1).all(|r| !r.granted)
        }
    }
}

struct LockManagerCore {
    /// Lock table. The outer mutex guards only map growth; each queue has
    /// its own mutex and condition variable.
    lock_table: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    /// Transactions seen in lock calls, so the detector can abort victims
    txns: Mutex<HashMap<TxnId, Arc<Transaction>>>,
    shutdown: AtomicBool,
    tick: Mutex<()>,
    tick_cv: Condvar,
}

impl LockManagerCore {
    fn queue_for(&self, rid: Rid) -> Arc<LockRequestQueue> {
        self.lock_table
            .lock()
            .entry(rid)
            .or_insert_with(|| Arc::new(LockRequestQueue::new()))
            .clone()
    }

    fn is_live(&self, txn_id: TxnId) -> bool {
        self.txns
            .lock()
            .get(&txn_id)
            .map_or(true, |txn| txn.state() != TransactionState::Aborted)
    }

    /// Wait-for edges: every waiting request points at every granted
    /// request of another live transaction on the same record.
    fn build_waits_for(&self) -> BTreeMap<TxnId, BTreeSet<TxnId>> {
        let queues: Vec<Arc<LockRequestQueue>> =
            self.lock_table.lock().values().cloned().collect();

        let mut graph: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        for queue in queues {
            let state = queue.state.lock();
            let holders: Vec<TxnId> = state
                .requests
                .iter()
                .filter(|r| r.granted && self.is_live(r.txn_id))
                .map(|r| r.txn_id)
                .collect();
            for waiter in state.requests.iter().filter(|r| !r.granted) {
                if !self.is_live(waiter.txn_id) {
                    continue;
                }
                for &holder in &holders {
                    if holder != waiter.txn_id {
                        graph.entry(waiter.txn_id).or_default().insert(holder);
                    }
                }
            }
        }
        graph
    }

    /// Abort victims until the wait-for graph is acyclic
    fn detect_and_break_cycles(&self) {
        loop {
            let graph = self.build_waits_for();
            let victim = match find_cycle_victim(&graph) {
                Some(victim) => victim,
                None => break,
            };

            log::debug!("aborting transaction {} to break a deadlock", victim);
            if let Some(txn) = self.txns.lock().get(&victim) {
                txn.set_state(TransactionState::Aborted);
            }

            // Waiters observe the aborted state through their wait predicate
            let queues: Vec<Arc<LockRequestQueue>> =
                self.lock_table.lock().values().cloned().collect();
            for queue in queues {
                queue.cv.notify_all();
            }
        }
    }
}

/// DFS in ascending transaction-id order. Closing a cycle reports the
/// youngest (largest id) transaction on the cycle as the victim.
fn find_cycle_victim(graph: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<TxnId> {
    let mut visited = BTreeSet::new();
    for &start in graph.keys() {
        if visited.contains(&start) {
            continue;
        }
        let mut stack = Vec::new();
        if let Some(victim) = dfs_cycle(start, graph, &mut visited, &mut stack) {
            return Some(victim);
        }
    }
    None
}

fn dfs_cycle(
    node: TxnId,
    graph: &BTreeMap<TxnId, BTreeSet<TxnId>>,
    visited: &mut BTreeSet<TxnId>,
    stack: &mut Vec<TxnId>,
) -> Option<TxnId> {
    visited.insert(node);
    stack.push(node);

    if let Some(neighbors) = graph.get(&node) {
        for &next in neighbors {
            if let Some(pos) = stack.iter().position(|&n| n == next) {
                // The cycle is the stack suffix starting at `next`
                return stack[pos..].iter().copied().max();
            }
            if !visited.contains(&next) {
                if let Some(victim) = dfs_cycle(next, graph, visited, stack) {
                    return Some(victim);
                }
            }
        }
    }

    let _ = stack.pop();
    None
}

/// Record-level lock manager enforcing strict two-phase locking under the
/// standard isolation levels, with a background wait-for cycle detector
/// that aborts the youngest transaction of any deadlock.
pub struct LockManager {
    core: Arc<LockManagerCore>,
    detector: Option<JoinHandle<()>>,
}

impl LockManager {
    pub fn new() -> Self {
        let core = Arc::new(LockManagerCore {
            lock_table: Mutex::new(HashMap::new()),
            txns: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
            tick: Mutex::new(()),
            tick_cv: Condvar::new(),
        });

        let detector_core = core.clone();
        let detector = std::thread::spawn(move || {
            log::info!("cycle detection thread launched");
            loop {
                {
                    let mut tick = detector_core.tick.lock();
                    if detector_core.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    detector_core
                        .tick_cv
                        .wait_for(&mut tick, CYCLE_DETECTION_INTERVAL);
                }
                if detector_core.shutdown.load(Ordering::Acquire) {
                    break;
                }
                detector_core.detect_and_break_cycles();
            }
            log::info!("cycle detection thread stopped");
        });

        Self {
            core,
            detector: Some(detector),
        }
    }

    /// Acquire a shared lock on `rid`, blocking until granted or aborted.
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<()> {
        match txn.isolation_level() {
            IsolationLevel::ReadUncommitted => {
                // Reads never lock at this level; asking for one is an error
                return Err(abort(txn, AbortReason::LockSharedOnReadUncommitted));
            }
            IsolationLevel::RepeatableRead => {
                if txn.state() == TransactionState::Shrinking {
                    return Err(abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadCommitted => {
                // Locks are released right after the read, so re-acquisition
                // in any state is fine
            }
        }

        if txn.is_shared_locked(&rid) || txn.is_exclusive_locked(&rid) {
            return Ok(());
        }

        self.register(txn);
        let queue = self.core.queue_for(rid);
        {
            let mut state = queue.state.lock();
            state.requests.push_back(LockRequest {
                txn_id: txn.id(),
                mode: LockMode::Shared,
                granted: false,
            });
            self.wait_for_grant(&queue, &mut state, txn)?;
        }

        txn.add_shared(rid);
        Ok(())
    }

    /// Acquire an exclusive lock on `rid`, blocking until granted or aborted.
    pub fn lock_exclusive(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<()> {
        if txn.state() == TransactionState::Shrinking {
            return Err(abort(txn, AbortReason::LockOnShrinking));
        }
        if txn.is_exclusive_locked(&rid) {
            return Ok(());
        }

        self.register(txn);
        let queue = self.core.queue_for(rid);
        {
            let mut state = queue.state.lock();
            state.requests.push_back(LockRequest {
                txn_id: txn.id(),
                mode: LockMode::Exclusive,
                granted: false,
            });
            self.wait_for_grant(&queue, &mut state, txn)?;
        }

        txn.add_exclusive(rid);
        Ok(())
    }

    /// Upgrade a held shared lock to exclusive. At most one transaction may
    /// be upgrading per record; a second upgrader aborts.
    pub fn lock_upgrade(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<()> {
        if txn.state() == TransactionState::Shrinking {
            return Err(abort(txn, AbortReason::LockOnShrinking));
        }
        if txn.is_exclusive_locked(&rid) {
            return Ok(());
        }

        self.register(txn);
        let queue = self.core.queue_for(rid);
        {
            let mut state = queue.state.lock();
            if state.upgrading {
                return Err(abort(txn, AbortReason::UpgradeConflict));
            }
            state.upgrading = true;

            // Flip the existing shared request in place and wait it out
            match state.requests.iter_mut().find(|r| r.txn_id == txn.id()) {
                Some(request) => {
                    request.mode = LockMode::Exclusive;
                    request.granted = false;
                }
                None => {
                    state.requests.push_back(LockRequest {
                        txn_id: txn.id(),
                        mode: LockMode::Exclusive,
                        granted: false,
                    });
                }
            }

            let waited = self.wait_for_grant(&queue, &mut state, txn);
            state.upgrading = false;
            waited?;
        }

        txn.promote_to_exclusive(rid);
        Ok(())
    }

    /// Release a held lock. Under REPEATABLE READ the first release moves
    /// the transaction into its shrinking phase.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) {
        if txn.isolation_level() == IsolationLevel::RepeatableRead
            && txn.state() == TransactionState::Growing
        {
            txn.set_state(TransactionState::Shrinking);
        }

        let queue = self.core.lock_table.lock().get(&rid).cloned();
        if let Some(queue) = queue {
            let mut state = queue.state.lock();
            if let Some(pos) = state.requests.iter().position(|r| r.txn_id == txn.id()) {
                let _ = state.requests.remove(pos);
            }
            let newly_grantable = state
                .requests
                .iter()
                .any(|r| !r.granted && can_grant(&state, r.txn_id));
            if newly_grantable {
                queue.cv.notify_all();
            }
        }

        txn.clear_lock(&rid);
    }

    /// Read-path wrapper: nothing under READ UNCOMMITTED, lock-and-release
    /// under READ COMMITTED, 2PL shared lock under REPEATABLE READ.
    pub fn lock_read(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<()> {
        match txn.isolation_level() {
            IsolationLevel::ReadUncommitted => Ok(()),
            IsolationLevel::ReadCommitted => {
                self.lock_shared(txn, rid)?;
                self.unlock(txn, rid);
                Ok(())
            }
            IsolationLevel::RepeatableRead => self.lock_shared(txn, rid),
        }
    }

    /// Write-path wrapper: upgrade when a shared lock is already held,
    /// otherwise take an exclusive lock.
    pub fn lock_write(&self, txn: &Arc<Transaction>, rid: Rid, _write_type: WriteType) -> Result<()> {
        if txn.is_shared_locked(&rid) {
            self.lock_upgrade(txn, rid)
        } else if !txn.is_exclusive_locked(&rid) {
            self.lock_exclusive(txn, rid)
        } else {
            Ok(())
        }
    }

    /// Release every lock the transaction still holds
    pub fn unlock_all(&self, txn: &Arc<Transaction>) {
        for rid in txn.held_locks() {
            self.unlock(txn, rid);
        }
    }

    /// Forget a finished transaction
    pub fn remove_transaction(&self, txn_id: TxnId) {
        self.core.txns.lock().remove(&txn_id);
    }

    fn register(&self, txn: &Arc<Transaction>) {
        self.core
            .txns
            .lock()
            .entry(txn.id())
            .or_insert_with(|| txn.clone());
    }

    /// Block on the queue's condition variable until this transaction's
    /// request can be granted, or until the detector aborts it.
    fn wait_for_grant(
        &self,
        queue: &LockRequestQueue,
        state: &mut parking_lot::MutexGuard<'_, QueueState>,
        txn: &Arc<Transaction>,
    ) -> Result<()> {
        loop {
            if txn.state() == TransactionState::Aborted {
                // Clean up so the queue does not block on a dead request
                if let Some(pos) = state.requests.iter().position(|r| r.txn_id == txn.id()) {
                    let _ = state.requests.remove(pos);
                }
                queue.cv.notify_all();
                return Err(TransactionError::Abort {
                    txn_id: txn.id(),
                    reason: AbortReason::Deadlock,
                });
            }
            if can_grant(state, txn.id()) {
                if let Some(request) = state.requests.iter_mut().find(|r| r.txn_id == txn.id()) {
                    request.granted = true;
                }
                return Ok(());
            }
            queue.cv.wait(state);
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.core.shutdown.store(true, Ordering::Release);
        {
            let _tick = self.core.tick.lock();
        }
        self.core.tick_cv.notify_all();
        if let Some(detector) = self.detector.take() {
            let _ = detector.join();
        }
    }
}

fn abort(txn: &Transaction, reason: AbortReason) -> TransactionError {
    txn.set_state(TransactionState::Aborted);
    TransactionError::Abort {
        txn_id: txn.id(),
        reason,
    }
}
