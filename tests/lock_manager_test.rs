//! Integration tests for the lock manager

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use keel::common::{AbortReason, RecordId, TableOid, TxnId};
use keel::concurrency::{IsolationLevel, LockManager, LockMode, Transaction, TransactionState};

fn txn(id: u32, level: IsolationLevel) -> Arc<Transaction> {
    Arc::new(Transaction::new(TxnId::new(id), level))
}

#[test]
fn test_compatible_table_locks_grant_together() {
    let lm = Arc::new(LockManager::new());
    let oid = TableOid::new(1);

    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);
    let t3 = txn(3, IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::IntentionShared, oid).unwrap());
    assert!(lm.lock_table(&t2, LockMode::IntentionExclusive, oid).unwrap());
    assert!(lm.lock_table(&t3, LockMode::IntentionShared, oid).unwrap());

    lm.unlock_table(&t1, oid).unwrap();
    lm.unlock_table(&t2, oid).unwrap();
    lm.unlock_table(&t3, oid).unwrap();
}

#[test]
fn test_exclusive_blocks_until_released() {
    let lm = Arc::new(LockManager::new());
    let oid = TableOid::new(1);

    let t1 = txn(1, IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&t1, LockMode::Exclusive, oid).unwrap());

    let waiter = {
        let lm = Arc::clone(&lm);
        thread::spawn(move || {
            let t2 = txn(2, IsolationLevel::RepeatableRead);
            let granted = lm.lock_table(&t2, LockMode::Exclusive, oid).unwrap();
            (granted, t2)
        })
    };

    // Give the waiter time to queue up behind the X lock.
    thread::sleep(Duration::from_millis(50));
    lm.unlock_table(&t1, oid).unwrap();

    let (granted, t2) = waiter.join().unwrap();
    assert!(granted);
    assert!(t2.is_table_locked(LockMode::Exclusive, oid));
}

#[test]
fn test_upgrade_waits_for_other_holders() {
    // Scenario: T1 and T2 hold IS; T1 upgrades to S (compatible, succeeds);
    // T1's further upgrade to X must wait until T2 releases.
    let lm = Arc::new(LockManager::new());
    let oid = TableOid::new(1);

    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::IntentionShared, oid).unwrap());
    assert!(lm.lock_table(&t2, LockMode::IntentionShared, oid).unwrap());

    // IS -> S while another IS holder exists: compatible, grants at once.
    assert!(lm.lock_table(&t1, LockMode::Shared, oid).unwrap());
    assert!(t1.is_table_locked(LockMode::Shared, oid));
    assert!(!t1.is_table_locked(LockMode::IntentionShared, oid));

    let upgrader = {
        let lm = Arc::clone(&lm);
        let t1 = Arc::clone(&t1);
        thread::spawn(move || lm.lock_table(&t1, LockMode::Exclusive, oid).unwrap())
    };

    // The S -> X upgrade cannot complete while T2 still holds IS.
    thread::sleep(Duration::from_millis(50));
    assert!(!t1.is_table_locked(LockMode::Exclusive, oid));

    lm.unlock_table(&t2, oid).unwrap();
    assert!(upgrader.join().unwrap());
    assert!(t1.is_table_locked(LockMode::Exclusive, oid));
}

#[test]
fn test_upgrade_conflict_aborts_second_upgrader() {
    let lm = Arc::new(LockManager::new());
    let oid = TableOid::new(1);

    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);
    let t3 = txn(3, IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, oid).unwrap());
    assert!(lm.lock_table(&t2, LockMode::Shared, oid).unwrap());
    assert!(lm.lock_table(&t3, LockMode::Shared, oid).unwrap());

    // T2 starts an upgrade that has to wait behind T1 and T3.
    let first_upgrader = {
        let lm = Arc::clone(&lm);
        let t2 = Arc::clone(&t2);
        thread::spawn(move || lm.lock_table(&t2, LockMode::Exclusive, oid))
    };
    thread::sleep(Duration::from_millis(50));

    // A second concurrent upgrade on the same queue is rejected.
    let err = lm.lock_table(&t3, LockMode::Exclusive, oid).unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::UpgradeConflict));
    assert_eq!(t3.state(), TransactionState::Aborted);

    // Let T1 go; with T3 aborted its request is gone once it wakes, but it
    // never blocked the upgrade (it held S, which T2 must outwait).
    lm.unlock_table(&t1, oid).unwrap();
    // T3 still holds its granted S lock; release it so the upgrade lands.
    lm.unlock_table(&t3, oid).unwrap();

    assert!(first_upgrader.join().unwrap().unwrap());
    assert!(t2.is_table_locked(LockMode::Exclusive, oid));
}

#[test]
fn test_fifo_fairness_between_waiters() {
    let lm = Arc::new(LockManager::new());
    let oid = TableOid::new(1);

    let t1 = txn(1, IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&t1, LockMode::Exclusive, oid).unwrap());

    // An S waiter queues first, then an X waiter behind it.
    let s_waiter = {
        let lm = Arc::clone(&lm);
        thread::spawn(move || {
            let t2 = txn(2, IsolationLevel::RepeatableRead);
            lm.lock_table(&t2, LockMode::Shared, oid).unwrap();
            let held = t2.is_table_locked(LockMode::Shared, oid);
            lm.unlock_table(&t2, oid).unwrap();
            held
        })
    };
    thread::sleep(Duration::from_millis(30));
    let x_waiter = {
        let lm = Arc::clone(&lm);
        thread::spawn(move || {
            let t3 = txn(3, IsolationLevel::RepeatableRead);
            lm.lock_table(&t3, LockMode::Exclusive, oid).unwrap();
            let held = t3.is_table_locked(LockMode::Exclusive, oid);
            lm.unlock_table(&t3, oid).unwrap();
            held
        })
    };
    thread::sleep(Duration::from_millis(30));

    lm.unlock_table(&t1, oid).unwrap();
    assert!(s_waiter.join().unwrap());
    assert!(x_waiter.join().unwrap());
}

#[test]
fn test_row_lock_requires_and_releases() {
    let lm = Arc::new(LockManager::new());
    let oid = TableOid::new(1);
    let rid = RecordId::from_key(42);

    let t1 = txn(1, IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::IntentionExclusive, oid).unwrap());
    assert!(lm.lock_row(&t1, LockMode::Exclusive, oid, rid).unwrap());
    assert!(t1.is_row_locked(LockMode::Exclusive, oid, rid));

    assert!(lm.unlock_row(&t1, oid, rid).unwrap());
    assert!(lm.unlock_table(&t1, oid).unwrap());
}

#[test]
fn test_row_s_then_upgrade_to_x() {
    let lm = Arc::new(LockManager::new());
    let oid = TableOid::new(1);
    let rid = RecordId::from_key(7);

    let t1 = txn(1, IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&t1, LockMode::SharedIntentionExclusive, oid).unwrap());
    assert!(lm.lock_row(&t1, LockMode::Shared, oid, rid).unwrap());
    assert!(lm.lock_row(&t1, LockMode::Exclusive, oid, rid).unwrap());
    assert!(t1.is_row_locked(LockMode::Exclusive, oid, rid));
    assert!(!t1.is_row_locked(LockMode::Shared, oid, rid));
}

#[test]
fn test_read_committed_s_allowed_while_shrinking() {
    let lm = Arc::new(LockManager::new());
    let t1 = txn(1, IsolationLevel::ReadCommitted);
    let a = TableOid::new(1);
    let b = TableOid::new(2);

    lm.lock_table(&t1, LockMode::Exclusive, a).unwrap();
    lm.unlock_table(&t1, a).unwrap();
    assert_eq!(t1.state(), TransactionState::Shrinking);

    // READ_COMMITTED may still take IS/S while shrinking.
    assert!(lm.lock_table(&t1, LockMode::Shared, b).unwrap());
    let err = lm.lock_table(&t1, LockMode::Exclusive, b).unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::LockOnShrinking));
}

#[test]
fn test_read_uncommitted_shrinks_only_on_x() {
    let lm = Arc::new(LockManager::new());
    let t1 = txn(1, IsolationLevel::ReadUncommitted);
    let a = TableOid::new(1);

    lm.lock_table(&t1, LockMode::IntentionExclusive, a).unwrap();
    lm.unlock_table(&t1, a).unwrap();
    // Releasing IX does not end the growing phase.
    assert_eq!(t1.state(), TransactionState::Growing);

    lm.lock_table(&t1, LockMode::Exclusive, a).unwrap();
    lm.unlock_table(&t1, a).unwrap();
    assert_eq!(t1.state(), TransactionState::Shrinking);
}

#[test]
fn test_waiter_exits_on_external_abort() {
    let lm = Arc::new(LockManager::new());
    let oid = TableOid::new(1);

    let t1 = txn(1, IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&t1, LockMode::Exclusive, oid).unwrap());

    let t2 = txn(2, IsolationLevel::RepeatableRead);
    let waiter = {
        let lm = Arc::clone(&lm);
        let t2 = Arc::clone(&t2);
        thread::spawn(move || lm.lock_table(&t2, LockMode::Exclusive, oid).unwrap())
    };
    thread::sleep(Duration::from_millis(50));

    // Abort the waiter externally and wake the queue, as the deadlock
    // detector would.
    t2.set_state(TransactionState::Aborted);
    lm.unlock_table(&t1, oid).unwrap();

    // The waiter returns failure instead of acquiring the lock.
    assert!(!waiter.join().unwrap());
    assert!(!t2.is_table_locked(LockMode::Exclusive, oid));
}
