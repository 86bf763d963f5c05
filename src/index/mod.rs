mod btree;
mod iterator;
mod key;

pub use btree::BPlusTree;
pub use iterator::IndexIterator;
pub use key::{BytewiseComparator, GenericComparator, GenericKey, KeyComparator};
