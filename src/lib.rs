//! keel - the storage and concurrency core of a disk-oriented RDBMS
//!
//! The crate turns a fixed-size page file on disk into a transactionally
//! correct, concurrently accessed indexed store. It is meant to be linked
//! into a surrounding database; there is no standalone surface.
//!
//! # Architecture
//!
//! - **Container** (`container`): a generic concurrent extendible hash
//!   table, also used by the buffer pool as its page-table.
//! - **Buffer pool** (`buffer`): fixed set of frames caching disk pages,
//!   LRU-K eviction, pin/dirty lifecycle, per-page read/write latches.
//! - **Storage** (`storage`): the disk manager and scheduler moving
//!   `PAGE_SIZE` buffers to and from the page file, plus the byte-level
//!   B+Tree page views and the header page that records index roots.
//! - **Index** (`index`): a latch-crabbing B+Tree over generic fixed-width
//!   keys, with ordered iteration over the leaf linked list.
//! - **Concurrency** (`concurrency`): transactions and a hierarchical
//!   two-phase lock manager with wait-for-graph deadlock detection.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use keel::buffer::BufferPoolManager;
//! use keel::common::RecordId;
//! use keel::index::{BPlusTree, GenericComparator, GenericKey};
//! use keel::storage::disk::DiskManager;
//!
//! let disk_manager = Arc::new(DiskManager::new("index.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
//!
//! let tree: BPlusTree<GenericKey<8>, RecordId, GenericComparator<8>> =
//!     BPlusTree::new("primary", Arc::clone(&bpm), GenericComparator::default(), 32, 32);
//!
//! let key = GenericKey::from_i64(42);
//! tree.insert(&key, &RecordId::from_key(42)).unwrap();
//! assert!(tree.get_value(&key).unwrap().is_some());
//! ```

pub mod buffer;
pub mod common;
pub mod concurrency;
pub mod container;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{KeelError, PageId, RecordId, Result, SlotId, TableOid, TxnId};
