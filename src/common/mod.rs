pub mod config;
pub mod error;
pub mod types;

pub use config::{
    CYCLE_DETECTION_INTERVAL, DEFAULT_BUCKET_SIZE, DEFAULT_BUFFER_POOL_SIZE, DEFAULT_LRUK_K,
    HEADER_PAGE_ID, INVALID_FRAME_ID, INVALID_PAGE_ID, INVALID_TXN_ID, PAGE_SIZE,
};
pub use error::{AbortReason, KeelError, Result};
pub use types::{FrameId, Lsn, PageId, RecordId, SlotId, TableOid, TxnId, INVALID_LSN};
