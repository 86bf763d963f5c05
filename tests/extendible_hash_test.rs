//! Integration tests for the extendible hash table

use std::hash::{BuildHasher, Hasher};
use std::sync::Arc;
use std::thread;

use keel::container::ExtendibleHashTable;

/// Hashes small integer keys to themselves so directory bits are the low
/// bits of the key, as in the textbook examples.
#[derive(Default, Clone)]
struct IdentityState;

struct IdentityHasher(u64);

impl Hasher for IdentityHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        let mut buf = [0u8; 8];
        let n = bytes.len().min(8);
        buf[..n].copy_from_slice(&bytes[..n]);
        self.0 = u64::from_le_bytes(buf);
    }
}

impl BuildHasher for IdentityState {
    type Hasher = IdentityHasher;

    fn build_hasher(&self) -> IdentityHasher {
        IdentityHasher(0)
    }
}

#[test]
fn test_grow_on_collisions() {
    // bucket_size=2 with identity hashing: 1, 5, 9 share their low bits
    // until the directory doubles enough to tell them apart.
    let table: ExtendibleHashTable<u32, char, IdentityState> =
        ExtendibleHashTable::with_hasher(2, IdentityState);

    table.insert(1, 'a');
    table.insert(5, 'a');
    table.insert(9, 'a');

    assert_eq!(table.find(&1), Some('a'));
    assert_eq!(table.find(&5), Some('a'));
    assert_eq!(table.find(&9), Some('a'));
    assert!(table.num_buckets() >= 2);
}

#[test]
fn test_insert_find_remove() {
    let table = ExtendibleHashTable::new(4);

    for k in 0..64u32 {
        table.insert(k, k * 10);
    }
    for k in 0..64u32 {
        assert_eq!(table.find(&k), Some(k * 10));
    }

    assert!(table.remove(&10));
    assert!(!table.remove(&10));
    assert_eq!(table.find(&10), None);
    assert_eq!(table.find(&11), Some(110));
}

#[test]
fn test_overwrite_keeps_one_entry() {
    let table = ExtendibleHashTable::new(2);
    table.insert(1u32, "first");
    table.insert(1u32, "second");
    assert_eq!(table.find(&1), Some("second"));
}

#[test]
fn test_depth_invariant_after_growth() {
    let table: ExtendibleHashTable<u32, u32, IdentityState> =
        ExtendibleHashTable::with_hasher(2, IdentityState);

    for k in 0..32u32 {
        table.insert(k, k);
    }

    let gd = table.global_depth();
    assert!(gd >= 4);
    // Every key's bucket agrees with the key's hash at local depth.
    for k in 0..32u32 {
        let idx = (k as usize) & ((1usize << gd) - 1);
        let ld = table.local_depth(idx);
        assert!(ld <= gd);
        assert_eq!((k as u64) & ((1 << ld) - 1), (idx as u64) & ((1 << ld) - 1));
    }
}

#[test]
fn test_concurrent_mixed_workload() {
    let table = Arc::new(ExtendibleHashTable::new(4));
    let mut handles = Vec::new();

    for t in 0..8u32 {
        let table = Arc::clone(&table);
        handles.push(thread::spawn(move || {
            let base = t * 1000;
            for i in 0..200 {
                table.insert(base + i, i);
            }
            for i in 0..200 {
                assert_eq!(table.find(&(base + i)), Some(i));
            }
            for i in 0..100 {
                assert!(table.remove(&(base + i)));
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    for t in 0..8u32 {
        let base = t * 1000;
        for i in 0..100 {
            assert_eq!(table.find(&(base + i)), None);
        }
        for i in 100..200 {
            assert_eq!(table.find(&(base + i)), Some(i));
        }
    }
}
