//! Integration tests for the LRU-K replacer

use keel::buffer::LruKReplacer;
use keel::common::FrameId;

#[test]
fn test_history_eviction_order() {
    let replacer = LruKReplacer::new(2, 10);

    // Access frames in order; none reaches k accesses.
    for i in 0..5 {
        replacer.record_access(FrameId::new(i)).unwrap();
        replacer.set_evictable(FrameId::new(i), true);
    }

    assert_eq!(replacer.size(), 5);

    // Young frames leave in arrival order.
    for i in 0..5 {
        assert_eq!(replacer.evict(), Some(FrameId::new(i)));
    }

    assert_eq!(replacer.size(), 0);
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_young_frames_preferred_over_old() {
    let replacer = LruKReplacer::new(2, 10);

    // Frame 0 graduates to the cache list, frame 1 stays young.
    replacer.record_access(FrameId::new(0)).unwrap();
    replacer.record_access(FrameId::new(0)).unwrap();
    replacer.record_access(FrameId::new(1)).unwrap();

    replacer.set_evictable(FrameId::new(0), true);
    replacer.set_evictable(FrameId::new(1), true);

    // A frame without k accesses has no k-back distance and goes first.
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
}

#[test]
fn test_cache_list_is_lru() {
    let replacer = LruKReplacer::new(2, 10);

    for i in 0..3 {
        replacer.record_access(FrameId::new(i)).unwrap();
        replacer.record_access(FrameId::new(i)).unwrap();
        replacer.set_evictable(FrameId::new(i), true);
    }

    // Touch frame 0 again: it becomes most recently used.
    replacer.record_access(FrameId::new(0)).unwrap();

    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
}

#[test]
fn test_pinned_frames_not_evicted() {
    let replacer = LruKReplacer::new(2, 10);

    replacer.record_access(FrameId::new(0)).unwrap();
    replacer.record_access(FrameId::new(1)).unwrap();
    replacer.record_access(FrameId::new(2)).unwrap();

    replacer.set_evictable(FrameId::new(1), true);
    replacer.set_evictable(FrameId::new(2), true);

    assert_eq!(replacer.size(), 2);
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_remove_untracked_is_noop() {
    let replacer = LruKReplacer::new(2, 10);
    replacer.remove(FrameId::new(3)).unwrap();
    assert_eq!(replacer.size(), 0);
}

#[test]
fn test_remove_non_evictable_errors() {
    let replacer = LruKReplacer::new(2, 10);
    replacer.record_access(FrameId::new(3)).unwrap();
    assert!(replacer.remove(FrameId::new(3)).is_err());
}

#[test]
fn test_concurrent_access() {
    use std::sync::Arc;
    use std::thread;

    let replacer = Arc::new(LruKReplacer::new(2, 100));
    let mut handles = Vec::new();

    for t in 0..4u32 {
        let replacer = Arc::clone(&replacer);
        handles.push(thread::spawn(move || {
            for i in 0..25 {
                let frame = FrameId::new(t * 25 + i);
                replacer.record_access(frame).unwrap();
                replacer.set_evictable(frame, true);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(replacer.size(), 100);
    let mut evicted = 0;
    while replacer.evict().is_some() {
        evicted += 1;
    }
    assert_eq!(evicted, 100);
}
