use std::fmt;

use thiserror::Error;

use super::types::{FrameId, PageId, TxnId};

/// Reasons a lock operation aborts its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockSharedOnReadUncommitted,
    LockOnShrinking,
    AttemptedIntentionLockOnRow,
    TableLockNotPresent,
    IncompatibleUpgrade,
    UpgradeConflict,
    AttemptedUnlockButNoLockHeld,
    TableUnlockedBeforeUnlockingRows,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            AbortReason::LockSharedOnReadUncommitted => {
                "shared lock requested under READ_UNCOMMITTED"
            }
            AbortReason::LockOnShrinking => "lock requested while shrinking",
            AbortReason::AttemptedIntentionLockOnRow => "intention lock requested on a row",
            AbortReason::TableLockNotPresent => "row lock requested without a table lock",
            AbortReason::IncompatibleUpgrade => "incompatible lock upgrade",
            AbortReason::UpgradeConflict => "another transaction is already upgrading",
            AbortReason::AttemptedUnlockButNoLockHeld => "unlock requested but no lock held",
            AbortReason::TableUnlockedBeforeUnlockingRows => {
                "table unlocked before unlocking its rows"
            }
        };
        write!(f, "{}", msg)
    }
}

/// Database error types
#[derive(Error, Debug)]
pub enum KeelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("Buffer pool is full, no evictable frames available")]
    BufferPoolFull,

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Invalid frame ID: {0}")]
    InvalidFrameId(FrameId),

    #[error("Frame {0} is not evictable")]
    FrameNotEvictable(FrameId),

    #[error("Page {0} is still pinned")]
    PageStillPinned(PageId),

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),

    #[error("Header page is full")]
    HeaderPageFull,

    #[error("Index {0} not found in header page")]
    IndexNotFound(String),

    #[error("{txn_id} aborted: {reason}")]
    TransactionAbort { txn_id: TxnId, reason: AbortReason },
}

impl KeelError {
    /// The abort reason, when this error is a transaction abort.
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            KeelError::TransactionAbort { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, KeelError>;
