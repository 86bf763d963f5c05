use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::common::{
    AbortReason, KeelError, RecordId, Result, TableOid, TxnId, CYCLE_DETECTION_INTERVAL,
    INVALID_TXN_ID,
};

use super::transaction::{IsolationLevel, Transaction, TransactionState};

/// The five hierarchical lock modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
    IntentionShared,
    IntentionExclusive,
    SharedIntentionExclusive,
}

impl LockMode {
    fn is_intention(self) -> bool {
        matches!(
            self,
            LockMode::IntentionShared
                | LockMode::IntentionExclusive
                | LockMode::SharedIntentionExclusive
        )
    }
}

/// Whether `requested` can be granted alongside an already-granted `held`.
fn compatible(held: LockMode, requested: LockMode) -> bool {
    use LockMode::*;
    match (held, requested) {
        (IntentionShared, Exclusive) | (Exclusive, IntentionShared) => false,
        (IntentionShared, _) | (_, IntentionShared) => true,
        (IntentionExclusive, IntentionExclusive) => true,
        (IntentionExclusive, _) | (_, IntentionExclusive) => false,
        (Shared, Shared) => true,
        _ => false,
    }
}

/// Whether a held lock may be upgraded to `to`.
fn upgrade_allowed(from: LockMode, to: LockMode) -> bool {
    use LockMode::*;
    matches!(
        (from, to),
        (IntentionShared, Shared)
            | (IntentionShared, Exclusive)
            | (IntentionShared, IntentionExclusive)
            | (IntentionShared, SharedIntentionExclusive)
            | (Shared, Exclusive)
            | (Shared, SharedIntentionExclusive)
            | (IntentionExclusive, Exclusive)
            | (IntentionExclusive, SharedIntentionExclusive)
            | (SharedIntentionExclusive, Exclusive)
    )
}

/// One transaction's pending or granted lock on a resource.
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

struct QueueState {
    requests: VecDeque<LockRequest>,
    /// Transaction currently upgrading its lock on this resource
    upgrading: TxnId,
}

/// FIFO lock request queue for a single table or row.
struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                requests: VecDeque::new(),
                upgrading: INVALID_TXN_ID,
            }),
            cv: Condvar::new(),
        }
    }
}

/// A request is grantable iff it is compatible with every granted request
/// and every ungranted request ahead of it is the request itself.
fn grantable(state: &QueueState, txn_id: TxnId, mode: LockMode) -> bool {
    for request in &state.requests {
        if request.granted {
            if !compatible(request.mode, mode) {
                return false;
            }
        } else if request.txn_id != txn_id {
            return false;
        } else {
            return true;
        }
    }
    false
}

/// Hierarchical two-phase lock manager.
///
/// Tables and rows each map to a FIFO lock request queue; granting honors
/// the mode compatibility matrix and arrival order. A background thread
/// builds the wait-for graph from the queues and aborts the youngest
/// transaction of every cycle it finds.
pub struct LockManager {
    table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_lock_map: Mutex<HashMap<RecordId, Arc<LockRequestQueue>>>,
    /// Transactions seen by this lock manager, for the deadlock detector
    txn_table: Mutex<HashMap<TxnId, Arc<Transaction>>>,
    /// Wait-for graph; rebuilt by the detector, also driven directly by
    /// the debug edge API
    waits_for: Mutex<BTreeMap<TxnId, Vec<TxnId>>>,
    enable_cycle_detection: AtomicBool,
    detection_interval: Duration,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_interval(CYCLE_DETECTION_INTERVAL)
    }

    pub fn with_interval(detection_interval: Duration) -> Self {
        Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            txn_table: Mutex::new(HashMap::new()),
            waits_for: Mutex::new(BTreeMap::new()),
            enable_cycle_detection: AtomicBool::new(false),
            detection_interval,
            detector: Mutex::new(None),
        }
    }

    /*****************************************************************
     * TABLE LOCKS
     *****************************************************************/

    /// Acquires (or upgrades to) `mode` on table `oid`, blocking until the
    /// request is grantable. Returns Ok(false) when the transaction was
    /// aborted while waiting; isolation violations abort immediately.
    pub fn lock_table(&self, txn: &Arc<Transaction>, mode: LockMode, oid: TableOid) -> Result<bool> {
        self.check_table_admission(txn, mode)?;
        self.register_txn(txn);

        let queue = {
            let mut map = self.table_lock_map.lock();
            Arc::clone(map.entry(oid).or_insert_with(|| Arc::new(LockRequestQueue::new())))
        };

        let mut state = queue.state.lock();

        if let Some(existing) = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id())
        {
            let held = state.requests[existing].mode;
            if held == mode {
                return Ok(true);
            }
            if state.upgrading != INVALID_TXN_ID {
                drop(state);
                return Err(self.abort_txn(txn, AbortReason::UpgradeConflict));
            }
            if !upgrade_allowed(held, mode) {
                drop(state);
                return Err(self.abort_txn(txn, AbortReason::IncompatibleUpgrade));
            }

            state.requests.remove(existing);
            txn.remove_table_lock(held, oid);

            // The upgrade jumps ahead of every waiting request.
            let insert_at = state
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(state.requests.len());
            state.requests.insert(
                insert_at,
                LockRequest {
                    txn_id: txn.id(),
                    mode,
                    granted: false,
                },
            );
            state.upgrading = txn.id();

            if !self.wait_until_granted(txn, &queue, &mut state, mode, true) {
                return Ok(false);
            }
            txn.add_table_lock(mode, oid);
            if mode != LockMode::Exclusive {
                queue.cv.notify_all();
            }
            return Ok(true);
        }

        state.requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode,
            granted: false,
        });

        if !self.wait_until_granted(txn, &queue, &mut state, mode, false) {
            return Ok(false);
        }
        txn.add_table_lock(mode, oid);
        if mode != LockMode::Exclusive {
            queue.cv.notify_all();
        }
        Ok(true)
    }

    /// Releases the table lock held by `txn` on `oid`, waking waiters and
    /// applying the isolation-dependent 2PL state transition.
    pub fn unlock_table(&self, txn: &Arc<Transaction>, oid: TableOid) -> Result<bool> {
        let queue = {
            let map = self.table_lock_map.lock();
            match map.get(&oid) {
                Some(queue) => Arc::clone(queue),
                None => {
                    drop(map);
                    return Err(self.abort_txn(txn, AbortReason::AttemptedUnlockButNoLockHeld));
                }
            }
        };

        if txn.holds_row_locks_on(oid) {
            return Err(self.abort_txn(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        let mut state = queue.state.lock();
        let Some(position) = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
        else {
            drop(state);
            return Err(self.abort_txn(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let released = state.requests.remove(position).expect("position is in bounds");
        queue.cv.notify_all();
        drop(state);

        self.shrink_if_needed(txn, released.mode);
        txn.remove_table_lock(released.mode, oid);
        Ok(true)
    }

    /*****************************************************************
     * ROW LOCKS
     *****************************************************************/

    /// Acquires (or upgrades to) `mode` on a single row. Intention modes
    /// are not meaningful on rows, and an exclusive row lock requires an
    /// exclusive-flavored lock on the owning table.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: RecordId,
    ) -> Result<bool> {
        if mode.is_intention() {
            return Err(self.abort_txn(txn, AbortReason::AttemptedIntentionLockOnRow));
        }
        self.check_table_admission(txn, mode)?;

        if mode == LockMode::Exclusive
            && !txn.is_table_locked(LockMode::Exclusive, oid)
            && !txn.is_table_locked(LockMode::IntentionExclusive, oid)
            && !txn.is_table_locked(LockMode::SharedIntentionExclusive, oid)
        {
            return Err(self.abort_txn(txn, AbortReason::TableLockNotPresent));
        }
        self.register_txn(txn);

        let queue = {
            let mut map = self.row_lock_map.lock();
            Arc::clone(map.entry(rid).or_insert_with(|| Arc::new(LockRequestQueue::new())))
        };

        let mut state = queue.state.lock();

        if let Some(existing) = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id())
        {
            let held = state.requests[existing].mode;
            if held == mode {
                return Ok(true);
            }
            if state.upgrading != INVALID_TXN_ID {
                drop(state);
                return Err(self.abort_txn(txn, AbortReason::UpgradeConflict));
            }
            if !upgrade_allowed(held, mode) {
                drop(state);
                return Err(self.abort_txn(txn, AbortReason::IncompatibleUpgrade));
            }

            state.requests.remove(existing);
            txn.remove_row_lock(held, oid, rid);

            let insert_at = state
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(state.requests.len());
            state.requests.insert(
                insert_at,
                LockRequest {
                    txn_id: txn.id(),
                    mode,
                    granted: false,
                },
            );
            state.upgrading = txn.id();

            if !self.wait_until_granted(txn, &queue, &mut state, mode, true) {
                return Ok(false);
            }
            txn.add_row_lock(mode, oid, rid);
            if mode != LockMode::Exclusive {
                queue.cv.notify_all();
            }
            return Ok(true);
        }

        state.requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode,
            granted: false,
        });

        if !self.wait_until_granted(txn, &queue, &mut state, mode, false) {
            return Ok(false);
        }
        txn.add_row_lock(mode, oid, rid);
        if mode != LockMode::Exclusive {
            queue.cv.notify_all();
        }
        Ok(true)
    }

    /// Releases the row lock held by `txn` on `rid`.
    pub fn unlock_row(&self, txn: &Arc<Transaction>, oid: TableOid, rid: RecordId) -> Result<bool> {
        let queue = {
            let map = self.row_lock_map.lock();
            match map.get(&rid) {
                Some(queue) => Arc::clone(queue),
                None => {
                    drop(map);
                    return Err(self.abort_txn(txn, AbortReason::AttemptedUnlockButNoLockHeld));
                }
            }
        };

        let mut state = queue.state.lock();
        let Some(position) = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
        else {
            drop(state);
            return Err(self.abort_txn(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let released = state.requests.remove(position).expect("position is in bounds");
        queue.cv.notify_all();
        drop(state);

        self.shrink_if_needed(txn, released.mode);
        txn.remove_row_lock(released.mode, oid, rid);
        Ok(true)
    }

    /// Releases every lock the transaction still holds, rows before
    /// tables. This is the rollback path after an abort, so no admission
    /// check or 2PL transition applies.
    pub fn release_all_locks(&self, txn: &Arc<Transaction>) {
        for (mode, oid, rid) in txn.snapshot_row_locks() {
            let queue = self.row_lock_map.lock().get(&rid).cloned();
            if let Some(queue) = queue {
                Self::withdraw_request(&queue, txn.id());
            }
            txn.remove_row_lock(mode, oid, rid);
        }
        for (mode, oid) in txn.snapshot_table_locks() {
            let queue = self.table_lock_map.lock().get(&oid).cloned();
            if let Some(queue) = queue {
                Self::withdraw_request(&queue, txn.id());
            }
            txn.remove_table_lock(mode, oid);
        }
    }

    fn withdraw_request(queue: &LockRequestQueue, txn_id: TxnId) {
        let mut state = queue.state.lock();
        if let Some(position) = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn_id && r.granted)
        {
            state.requests.remove(position);
            queue.cv.notify_all();
        }
    }

    /*****************************************************************
     * SHARED GRANT / ADMISSION MACHINERY
     *****************************************************************/

    /// Blocks on the queue's condition variable until the request at the
    /// head position becomes grantable, marking it granted. Returns false
    /// when the transaction was aborted while waiting (the request is then
    /// withdrawn and other waiters are notified).
    fn wait_until_granted(
        &self,
        txn: &Arc<Transaction>,
        queue: &LockRequestQueue,
        state: &mut MutexGuard<'_, QueueState>,
        mode: LockMode,
        upgrading: bool,
    ) -> bool {
        while !grantable(&**state, txn.id(), mode) {
            queue.cv.wait(state);
            if txn.state() == TransactionState::Aborted {
                if upgrading {
                    state.upgrading = INVALID_TXN_ID;
                }
                if let Some(position) =
                    state.requests.iter().position(|r| r.txn_id == txn.id())
                {
                    state.requests.remove(position);
                }
                queue.cv.notify_all();
                return false;
            }
        }

        if upgrading {
            state.upgrading = INVALID_TXN_ID;
        }
        let request = state
            .requests
            .iter_mut()
            .find(|r| r.txn_id == txn.id())
            .expect("request must still be queued");
        request.granted = true;
        true
    }

    /// Isolation-aware admission rules shared by table and row locking.
    fn check_table_admission(&self, txn: &Arc<Transaction>, mode: LockMode) -> Result<()> {
        use LockMode::*;

        match txn.isolation_level() {
            IsolationLevel::ReadUncommitted => {
                if matches!(mode, Shared | IntentionShared | SharedIntentionExclusive) {
                    return Err(self.abort_txn(txn, AbortReason::LockSharedOnReadUncommitted));
                }
                if txn.state() == TransactionState::Shrinking
                    && matches!(mode, Exclusive | IntentionExclusive)
                {
                    return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadCommitted => {
                if txn.state() == TransactionState::Shrinking
                    && !matches!(mode, IntentionShared | Shared)
                {
                    return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::RepeatableRead => {
                if txn.state() == TransactionState::Shrinking {
                    return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
                }
            }
        }
        Ok(())
    }

    /// GROWING -> SHRINKING when the released mode is consequential for the
    /// transaction's isolation level.
    fn shrink_if_needed(&self, txn: &Arc<Transaction>, released: LockMode) {
        let shrinks = match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                matches!(released, LockMode::Shared | LockMode::Exclusive)
            }
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
                released == LockMode::Exclusive
            }
        };
        if shrinks {
            let state = txn.state();
            if state != TransactionState::Committed && state != TransactionState::Aborted {
                txn.set_state(TransactionState::Shrinking);
            }
        }
    }

    fn abort_txn(&self, txn: &Arc<Transaction>, reason: AbortReason) -> KeelError {
        txn.set_state(TransactionState::Aborted);
        KeelError::TransactionAbort {
            txn_id: txn.id(),
            reason,
        }
    }

    fn register_txn(&self, txn: &Arc<Transaction>) {
        self.txn_table
            .lock()
            .entry(txn.id())
            .or_insert_with(|| Arc::clone(txn));
    }

    /*****************************************************************
     * DEADLOCK DETECTION
     *****************************************************************/

    /// Adds a wait-for edge t1 -> t2.
    pub fn add_edge(&self, t1: TxnId, t2: TxnId) {
        let mut graph = self.waits_for.lock();
        let neighbors = graph.entry(t1).or_default();
        if !neighbors.contains(&t2) {
            neighbors.push(t2);
            neighbors.sort();
        }
    }

    /// Removes the wait-for edge t1 -> t2 if present.
    pub fn remove_edge(&self, t1: TxnId, t2: TxnId) {
        let mut graph = self.waits_for.lock();
        if let Some(neighbors) = graph.get_mut(&t1) {
            neighbors.retain(|&t| t != t2);
            if neighbors.is_empty() {
                graph.remove(&t1);
            }
        }
    }

    /// All edges of the wait-for graph, ordered.
    pub fn get_edge_list(&self) -> Vec<(TxnId, TxnId)> {
        let graph = self.waits_for.lock();
        let mut edges = Vec::new();
        for (&from, neighbors) in graph.iter() {
            for &to in neighbors {
                edges.push((from, to));
            }
        }
        edges
    }

    /// Looks for a cycle, exploring transactions in ascending id order.
    /// Returns the youngest (largest) transaction id on the first cycle
    /// found.
    pub fn has_cycle(&self) -> Option<TxnId> {
        let graph = self.waits_for.lock();
        Self::find_cycle_victim(&graph)
    }

    fn find_cycle_victim(graph: &BTreeMap<TxnId, Vec<TxnId>>) -> Option<TxnId> {
        fn dfs(
            graph: &BTreeMap<TxnId, Vec<TxnId>>,
            node: TxnId,
            visited: &mut HashSet<TxnId>,
            on_path: &mut Vec<TxnId>,
        ) -> Option<TxnId> {
            on_path.push(node);
            if let Some(neighbors) = graph.get(&node) {
                for &next in neighbors {
                    if let Some(start) = on_path.iter().position(|&t| t == next) {
                        // Back edge: everything from `next` onward is the cycle.
                        return on_path[start..].iter().copied().max();
                    }
                    if !visited.contains(&next) {
                        if let Some(victim) = dfs(graph, next, visited, on_path) {
                            return Some(victim);
                        }
                    }
                }
            }
            on_path.pop();
            visited.insert(node);
            None
        }

        let mut visited = HashSet::new();
        for &start in graph.keys() {
            if visited.contains(&start) {
                continue;
            }
            let mut on_path = Vec::new();
            if let Some(victim) = dfs(graph, start, &mut visited, &mut on_path) {
                return Some(victim);
            }
        }
        None
    }

    /// Starts the background deadlock detection thread.
    pub fn start_cycle_detection(self: &Arc<Self>) {
        self.enable_cycle_detection.store(true, Ordering::SeqCst);
        let lock_manager = Arc::clone(self);
        let handle = thread::spawn(move || lock_manager.run_cycle_detection());
        *self.detector.lock() = Some(handle);
    }

    /// Stops the background thread and joins it.
    pub fn stop_cycle_detection(&self) {
        self.enable_cycle_detection.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector.lock().take() {
            let _ = handle.join();
        }
    }

    /// Background entry point: sleeps between rounds while enabled.
    pub fn run_cycle_detection(&self) {
        while self.enable_cycle_detection.load(Ordering::SeqCst) {
            thread::sleep(self.detection_interval);
            self.detect_and_resolve();
        }
    }

    /// One detection round: rebuild the wait-for graph from the queues,
    /// then abort the youngest transaction of every cycle until none
    /// remains.
    fn detect_and_resolve(&self) {
        // txn -> the queue it is currently sleeping in, for victim wakeup
        let mut waiting_in: HashMap<TxnId, Arc<LockRequestQueue>> = HashMap::new();

        {
            let mut graph = self.waits_for.lock();
            graph.clear();

            let queues: Vec<Arc<LockRequestQueue>> = {
                let tables = self.table_lock_map.lock();
                let rows = self.row_lock_map.lock();
                tables.values().chain(rows.values()).cloned().collect()
            };

            for queue in &queues {
                let state = queue.state.lock();
                for waiter in state.requests.iter().filter(|r| !r.granted) {
                    waiting_in.insert(waiter.txn_id, Arc::clone(queue));
                    for holder in state.requests.iter().filter(|r| r.granted) {
                        let neighbors = graph.entry(waiter.txn_id).or_default();
                        if !neighbors.contains(&holder.txn_id) {
                            neighbors.push(holder.txn_id);
                        }
                    }
                }
            }
            for neighbors in graph.values_mut() {
                neighbors.sort();
            }
        }

        loop {
            let victim = {
                let graph = self.waits_for.lock();
                Self::find_cycle_victim(&graph)
            };
            let Some(victim) = victim else {
                break;
            };

            debug!("deadlock detected, aborting {}", victim);
            if let Some(txn) = self.txn_table.lock().get(&victim) {
                txn.set_state(TransactionState::Aborted);
            }

            {
                let mut graph = self.waits_for.lock();
                graph.remove(&victim);
                for neighbors in graph.values_mut() {
                    neighbors.retain(|&t| t != victim);
                }
                graph.retain(|_, neighbors| !neighbors.is_empty());
            }

            if let Some(queue) = waiting_in.get(&victim) {
                let _state = queue.state.lock();
                queue.cv.notify_all();
            }
        }

        self.waits_for.lock().clear();
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.enable_cycle_detection.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector.get_mut().take() {
            let _ = handle.join();
        }
    }
}
