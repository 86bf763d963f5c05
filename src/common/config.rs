use std::time::Duration;

use super::types::{FrameId, PageId, TxnId};

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

/// Invalid frame ID constant
pub const INVALID_FRAME_ID: FrameId = FrameId(u32::MAX);

/// Invalid transaction ID constant
pub const INVALID_TXN_ID: TxnId = TxnId(u32::MAX);

/// Page ID of the header page holding (index name, root page id) records
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Default K value for LRU-K replacement policy
pub const DEFAULT_LRUK_K: usize = 2;

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 10;

/// Default bucket capacity for the extendible hash table
pub const DEFAULT_BUCKET_SIZE: usize = 4;

/// Time the deadlock detector sleeps between detection rounds
pub const CYCLE_DETECTION_INTERVAL: Duration = Duration::from_millis(50);
