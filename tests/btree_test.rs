//! Integration tests for the B+Tree index

use std::io::Write;
use std::sync::Arc;

use keel::buffer::BufferPoolManager;
use keel::common::{PageId, RecordId};
use keel::index::{BPlusTree, GenericComparator, GenericKey};
use keel::storage::disk::DiskManager;
use tempfile::NamedTempFile;

type Key = GenericKey<8>;
type TestTree = BPlusTree<Key, RecordId, GenericComparator<8>>;

fn key(v: i64) -> Key {
    GenericKey::from_i64(v)
}

fn rid(v: i64) -> RecordId {
    RecordId::from_key(v)
}

fn create_tree(pool_size: usize, leaf_max: usize, internal_max: usize) -> (TestTree, NamedTempFile) {
    let temp = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, 2, dm));
    let tree = BPlusTree::new(
        "test_index",
        bpm,
        GenericComparator::default(),
        leaf_max,
        internal_max,
    );
    (tree, temp)
}

#[test]
fn test_empty_tree() {
    let (tree, _temp) = create_tree(10, 3, 3);
    assert!(tree.is_empty());
    assert_eq!(tree.get_value(&key(1)).unwrap(), None);
    tree.remove(&key(1)).unwrap();
}

#[test]
fn test_insert_and_lookup() {
    let (tree, _temp) = create_tree(32, 4, 4);

    for v in [5, 1, 9, 3, 7] {
        assert!(tree.insert(&key(v), &rid(v)).unwrap());
    }
    for v in [1, 3, 5, 7, 9] {
        assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)));
    }
    assert_eq!(tree.get_value(&key(2)).unwrap(), None);
    assert!(!tree.is_empty());
}

#[test]
fn test_duplicate_insert_rejected() {
    let (tree, _temp) = create_tree(32, 4, 4);

    assert!(tree.insert(&key(1), &rid(1)).unwrap());
    assert!(!tree.insert(&key(1), &rid(99)).unwrap());
    // The first value survives.
    assert_eq!(tree.get_value(&key(1)).unwrap(), Some(rid(1)));
}

#[test]
fn test_sequential_inserts_split() {
    // leaf_max=3, internal_max=3: inserting 1..=5 forces a leaf split and
    // a root above it, with [1,2] staying in the left leaf.
    let (tree, _temp) = create_tree(32, 3, 3);

    for v in 1..=5 {
        assert!(tree.insert(&key(v), &rid(v)).unwrap());
    }
    for v in 1..=5 {
        assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)));
    }

    // The root is no longer the original leaf.
    let root = tree.get_root_page_id();
    assert_ne!(root, PageId::new(1));

    // The leaf chain yields the keys in order.
    let collected: Vec<i64> = tree
        .begin()
        .unwrap()
        .map(|item| item.unwrap().0.as_i64())
        .collect();
    assert_eq!(collected, vec![1, 2, 3, 4, 5]);
    tree.check_integrity().unwrap();
}

#[test]
fn test_many_inserts_ascending() {
    let (tree, _temp) = create_tree(64, 4, 4);

    for v in 0..256 {
        assert!(tree.insert(&key(v), &rid(v)).unwrap());
    }
    for v in 0..256 {
        assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)), "key {}", v);
    }
    tree.check_integrity().unwrap();
}

#[test]
fn test_many_inserts_random_order() {
    use rand::seq::SliceRandom;

    let (tree, _temp) = create_tree(64, 4, 4);

    let mut keys: Vec<i64> = (0..256).collect();
    keys.shuffle(&mut rand::thread_rng());
    for &v in &keys {
        assert!(tree.insert(&key(v), &rid(v)).unwrap());
    }

    // Iteration yields the full sorted sequence regardless of insert order.
    let collected: Vec<i64> = tree
        .begin()
        .unwrap()
        .map(|item| item.unwrap().0.as_i64())
        .collect();
    let expected: Vec<i64> = (0..256).collect();
    assert_eq!(collected, expected);
    tree.check_integrity().unwrap();
}

#[test]
fn test_remove_simple() {
    let (tree, _temp) = create_tree(32, 4, 4);

    for v in 1..=4 {
        tree.insert(&key(v), &rid(v)).unwrap();
    }
    tree.remove(&key(2)).unwrap();
    assert_eq!(tree.get_value(&key(2)).unwrap(), None);
    assert_eq!(tree.get_value(&key(1)).unwrap(), Some(rid(1)));
    assert_eq!(tree.get_value(&key(3)).unwrap(), Some(rid(3)));

    // Removing an absent key is a no-op.
    tree.remove(&key(2)).unwrap();
    assert_eq!(tree.get_value(&key(3)).unwrap(), Some(rid(3)));
}

#[test]
fn test_remove_triggers_coalesce() {
    let (tree, _temp) = create_tree(32, 3, 3);

    for v in 1..=5 {
        tree.insert(&key(v), &rid(v)).unwrap();
    }
    // Deleting through the split keys exercises redistribute and merge.
    tree.remove(&key(3)).unwrap();
    for v in [1, 2, 4, 5] {
        assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)), "key {}", v);
    }
    assert_eq!(tree.get_value(&key(3)).unwrap(), None);

    let collected: Vec<i64> = tree
        .begin()
        .unwrap()
        .map(|item| item.unwrap().0.as_i64())
        .collect();
    assert_eq!(collected, vec![1, 2, 4, 5]);
    tree.check_integrity().unwrap();
}

#[test]
fn test_remove_everything_empties_tree() {
    let (tree, _temp) = create_tree(64, 3, 3);

    for v in 0..64 {
        tree.insert(&key(v), &rid(v)).unwrap();
    }
    for v in 0..64 {
        tree.remove(&key(v)).unwrap();
    }

    assert!(tree.is_empty());
    for v in 0..64 {
        assert_eq!(tree.get_value(&key(v)).unwrap(), None);
    }

    // The tree grows again after being emptied.
    tree.insert(&key(7), &rid(7)).unwrap();
    assert_eq!(tree.get_value(&key(7)).unwrap(), Some(rid(7)));
}

#[test]
fn test_remove_descending_order() {
    let (tree, _temp) = create_tree(64, 4, 4);

    for v in 0..128 {
        tree.insert(&key(v), &rid(v)).unwrap();
    }
    for v in (64..128).rev() {
        tree.remove(&key(v)).unwrap();
    }
    for v in 0..64 {
        assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)), "key {}", v);
    }
    for v in 64..128 {
        assert_eq!(tree.get_value(&key(v)).unwrap(), None);
    }
    tree.check_integrity().unwrap();
}

#[test]
fn test_iterator_full_scan() {
    let (tree, _temp) = create_tree(32, 3, 3);

    for v in 1..=10 {
        tree.insert(&key(v), &rid(v)).unwrap();
    }

    let mut seen = Vec::new();
    for item in tree.begin().unwrap() {
        let (k, v) = item.unwrap();
        seen.push(k.as_i64());
        assert_eq!(v, rid(k.as_i64()));
    }
    assert_eq!(seen, (1..=10).collect::<Vec<_>>());
}

#[test]
fn test_iterator_begin_at() {
    let (tree, _temp) = create_tree(32, 3, 3);

    for v in (2..=20).step_by(2) {
        tree.insert(&key(v), &rid(v)).unwrap();
    }

    // Starting at an existing key.
    let seen: Vec<i64> = tree
        .begin_at(&key(10))
        .unwrap()
        .map(|item| item.unwrap().0.as_i64())
        .collect();
    assert_eq!(seen, vec![10, 12, 14, 16, 18, 20]);

    // Starting between keys lands on the next larger one.
    let seen: Vec<i64> = tree
        .begin_at(&key(11))
        .unwrap()
        .map(|item| item.unwrap().0.as_i64())
        .collect();
    assert_eq!(seen, vec![12, 14, 16, 18, 20]);
}

#[test]
fn test_iterator_end_equality() {
    let (tree, _temp) = create_tree(32, 3, 3);

    for v in 1..=10 {
        tree.insert(&key(v), &rid(v)).unwrap();
    }

    let mut iter = tree.begin().unwrap();
    let mut count = 0;
    while !iter.is_end() {
        iter.next().unwrap().unwrap();
        count += 1;
    }
    assert_eq!(count, 10);

    // Walking off the last element equals End().
    let end = tree.end().unwrap();
    assert!(iter == end);

    // The null iterator compares equal to anything.
    let (empty_tree, _temp2) = create_tree(8, 3, 3);
    let null_iter = empty_tree.begin().unwrap();
    let other = tree.begin().unwrap();
    assert!(null_iter == other);
}

#[test]
fn test_insert_from_file() {
    let (tree, _temp) = create_tree(64, 4, 4);

    let mut input = NamedTempFile::new().unwrap();
    for v in 1..=50 {
        writeln!(input, "{}", v).unwrap();
    }
    input.flush().unwrap();

    tree.insert_from_file(input.path()).unwrap();
    for v in 1..=50 {
        assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)), "key {}", v);
    }

    let mut removals = NamedTempFile::new().unwrap();
    for v in 1..=25 {
        writeln!(removals, "{}", v).unwrap();
    }
    removals.flush().unwrap();

    tree.remove_from_file(removals.path()).unwrap();
    for v in 1..=25 {
        assert_eq!(tree.get_value(&key(v)).unwrap(), None);
    }
    for v in 26..=50 {
        assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)));
    }
}

#[test]
fn test_root_recorded_in_header_page() {
    let temp = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(32, 2, dm));

    let tree: TestTree = BPlusTree::new(
        "orders_pk",
        Arc::clone(&bpm),
        GenericComparator::default(),
        4,
        4,
    );
    for v in 1..=32 {
        tree.insert(&key(v), &rid(v)).unwrap();
    }
    let root = tree.get_root_page_id();
    bpm.flush_all_pages().unwrap();
    drop(tree);

    // A reopened tree finds its root through the header page.
    let reopened: TestTree =
        BPlusTree::open("orders_pk", bpm, GenericComparator::default(), 4, 4).unwrap();
    assert_eq!(reopened.get_root_page_id(), root);
    for v in 1..=32 {
        assert_eq!(reopened.get_value(&key(v)).unwrap(), Some(rid(v)));
    }
}
