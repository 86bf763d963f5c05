use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::common::{RecordId, TableOid, TxnId};

use super::lock_manager::LockMode;

/// Isolation level a transaction runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking state. A transaction moves GROWING -> SHRINKING once,
/// then ends COMMITTED or ABORTED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// A transaction: identity, isolation level, 2PL state, and the lock sets
/// maintained by the lock manager on every grant and release.
pub struct Transaction {
    txn_id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,

    shared_table_locks: Mutex<HashSet<TableOid>>,
    exclusive_table_locks: Mutex<HashSet<TableOid>>,
    intention_shared_table_locks: Mutex<HashSet<TableOid>>,
    intention_exclusive_table_locks: Mutex<HashSet<TableOid>>,
    shared_intention_exclusive_table_locks: Mutex<HashSet<TableOid>>,

    shared_row_locks: Mutex<HashMap<TableOid, HashSet<RecordId>>>,
    exclusive_row_locks: Mutex<HashMap<TableOid, HashSet<RecordId>>>,
}

impl Transaction {
    pub fn new(txn_id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            txn_id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            shared_table_locks: Mutex::new(HashSet::new()),
            exclusive_table_locks: Mutex::new(HashSet::new()),
            intention_shared_table_locks: Mutex::new(HashSet::new()),
            intention_exclusive_table_locks: Mutex::new(HashSet::new()),
            shared_intention_exclusive_table_locks: Mutex::new(HashSet::new()),
            shared_row_locks: Mutex::new(HashMap::new()),
            exclusive_row_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.txn_id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn commit(&self) {
        self.set_state(TransactionState::Committed);
    }

    pub fn abort(&self) {
        self.set_state(TransactionState::Aborted);
    }

    fn table_lock_set(&self, mode: LockMode) -> &Mutex<HashSet<TableOid>> {
        match mode {
            LockMode::Shared => &self.shared_table_locks,
            LockMode::Exclusive => &self.exclusive_table_locks,
            LockMode::IntentionShared => &self.intention_shared_table_locks,
            LockMode::IntentionExclusive => &self.intention_exclusive_table_locks,
            LockMode::SharedIntentionExclusive => &self.shared_intention_exclusive_table_locks,
        }
    }

    pub(crate) fn add_table_lock(&self, mode: LockMode, oid: TableOid) {
        self.table_lock_set(mode).lock().insert(oid);
    }

    pub(crate) fn remove_table_lock(&self, mode: LockMode, oid: TableOid) {
        self.table_lock_set(mode).lock().remove(&oid);
    }

    pub fn is_table_locked(&self, mode: LockMode, oid: TableOid) -> bool {
        self.table_lock_set(mode).lock().contains(&oid)
    }

    pub(crate) fn add_row_lock(&self, mode: LockMode, oid: TableOid, rid: RecordId) {
        let set = match mode {
            LockMode::Shared => &self.shared_row_locks,
            LockMode::Exclusive => &self.exclusive_row_locks,
            _ => return,
        };
        set.lock().entry(oid).or_default().insert(rid);
    }

    pub(crate) fn remove_row_lock(&self, mode: LockMode, oid: TableOid, rid: RecordId) {
        let set = match mode {
            LockMode::Shared => &self.shared_row_locks,
            LockMode::Exclusive => &self.exclusive_row_locks,
            _ => return,
        };
        let mut map = set.lock();
        if let Some(rows) = map.get_mut(&oid) {
            rows.remove(&rid);
            if rows.is_empty() {
                map.remove(&oid);
            }
        }
    }

    pub fn is_row_locked(&self, mode: LockMode, oid: TableOid, rid: RecordId) -> bool {
        let set = match mode {
            LockMode::Shared => &self.shared_row_locks,
            LockMode::Exclusive => &self.exclusive_row_locks,
            _ => return false,
        };
        set.lock()
            .get(&oid)
            .map(|rows| rows.contains(&rid))
            .unwrap_or(false)
    }

    /// Every row lock currently held, for the rollback path.
    pub fn snapshot_row_locks(&self) -> Vec<(LockMode, TableOid, RecordId)> {
        let mut locks = Vec::new();
        for (mode, set) in [
            (LockMode::Shared, &self.shared_row_locks),
            (LockMode::Exclusive, &self.exclusive_row_locks),
        ] {
            for (&oid, rows) in set.lock().iter() {
                for &rid in rows {
                    locks.push((mode, oid, rid));
                }
            }
        }
        locks
    }

    /// Every table lock currently held, for the rollback path.
    pub fn snapshot_table_locks(&self) -> Vec<(LockMode, TableOid)> {
        let mut locks = Vec::new();
        for mode in [
            LockMode::Shared,
            LockMode::Exclusive,
            LockMode::IntentionShared,
            LockMode::IntentionExclusive,
            LockMode::SharedIntentionExclusive,
        ] {
            for &oid in self.table_lock_set(mode).lock().iter() {
                locks.push((mode, oid));
            }
        }
        locks
    }

    /// Whether the transaction still holds any row lock on `oid`; a table
    /// cannot be unlocked while it does.
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        let shared = self.shared_row_locks.lock();
        if shared.get(&oid).is_some_and(|rows| !rows.is_empty()) {
            return true;
        }
        let exclusive = self.exclusive_row_locks.lock();
        exclusive.get(&oid).is_some_and(|rows| !rows.is_empty())
    }
}
