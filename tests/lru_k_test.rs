//! Integration tests for the LRU-K replacer

use larch::buffer::{AccessType, LruKReplacer};
use larch::common::FrameId;

fn record(replacer: &LruKReplacer, id: u32) {
    replacer.record_access(FrameId::new(id), AccessType::Unknown);
}

#[test]
fn test_lru_k_eviction_order() {
    let replacer = LruKReplacer::new(2, 10);

    for i in 0..5 {
        record(&replacer, i);
        replacer.set_evictable(FrameId::new(i), true);
    }

    assert_eq!(replacer.size(), 5);

    // All frames have a single access (< k = 2), so all have +inf distance
    // and leave in order of their first access
    for i in 0..5 {
        assert_eq!(replacer.evict(), Some(FrameId::new(i)));
    }

    assert_eq!(replacer.size(), 0);
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_lru_k_respects_k_distance() {
    let replacer = LruKReplacer::new(2, 10);

    // Frame 0: accessed once (+inf k-distance)
    record(&replacer, 0);

    // Frames 1 and 2: two accesses each, 1 older than 2
    record(&replacer, 1);
    record(&replacer, 1);
    record(&replacer, 2);
    record(&replacer, 2);

    replacer.set_evictable(FrameId::new(0), true);
    replacer.set_evictable(FrameId::new(1), true);
    replacer.set_evictable(FrameId::new(2), true);

    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
}

#[test]
fn test_lru_k_pinned_frames_not_evicted() {
    let replacer = LruKReplacer::new(2, 10);

    record(&replacer, 0);
    record(&replacer, 1);
    record(&replacer, 2);

    replacer.set_evictable(FrameId::new(1), true);
    replacer.set_evictable(FrameId::new(2), true);

    assert_eq!(replacer.size(), 2);

    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_lru_k_history_limit() {
    let replacer = LruKReplacer::new(2, 10);

    // Many accesses to frame 0; only the two most recent count
    for _ in 0..10 {
        record(&replacer, 0);
    }

    record(&replacer, 1);
    record(&replacer, 1);

    replacer.set_evictable(FrameId::new(0), true);
    replacer.set_evictable(FrameId::new(1), true);

    // Frame 0's 2nd-most-recent access is older than frame 1's
    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
}

/// Scarce-history scenario: capacity 7, K = 2, frames 5 and 6 have fewer
/// than K accesses and so carry +inf distance; they go first, LRU-ordered by
/// their only access. The rest leave by K-distance.
#[test]
fn test_lru_k_scarce_history_tie_break() {
    let replacer = LruKReplacer::new(2, 7);

    for i in [1, 2, 3, 4, 1, 2, 3, 4, 5, 6] {
        record(&replacer, i);
    }
    for i in 1..=6 {
        replacer.set_evictable(FrameId::new(i), true);
    }
    assert_eq!(replacer.size(), 6);

    // Frames 5 and 6 have +inf distance; 5's lone access is older
    assert_eq!(replacer.evict(), Some(FrameId::new(5)));
    assert_eq!(replacer.size(), 5);
    assert_eq!(replacer.evict(), Some(FrameId::new(6)));
    assert_eq!(replacer.size(), 4);

    // Pinning frame 1 hides the largest K-distance; frame 2 is next
    replacer.set_evictable(FrameId::new(1), false);
    assert_eq!(replacer.size(), 3);
    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
    assert_eq!(replacer.size(), 2);
    assert_eq!(replacer.evict(), Some(FrameId::new(3)));
    assert_eq!(replacer.evict(), Some(FrameId::new(4)));
    assert_eq!(replacer.size(), 0);

    // Frame 1 is still tracked but pinned
    assert_eq!(replacer.evict(), None);
    replacer.set_evictable(FrameId::new(1), true);
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
}

#[test]
fn test_lru_k_remove_is_the_only_other_exit() {
    let replacer = LruKReplacer::new(2, 10);

    record(&replacer, 0);
    record(&replacer, 1);
    replacer.set_evictable(FrameId::new(0), true);
    replacer.set_evictable(FrameId::new(1), true);

    assert_eq!(replacer.size(), 2);

    replacer.remove(FrameId::new(0));
    assert_eq!(replacer.size(), 1);

    // Removed frames never come back out of evict
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_lru_k_concurrent_access() {
    use std::sync::Arc;
    use std::thread;

    let replacer = Arc::new(LruKReplacer::new(2, 100));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let replacer = Arc::clone(&replacer);
            thread::spawn(move || {
                for i in 0..25 {
                    let frame_id = FrameId::new((t * 25 + i) as u32);
                    replacer.record_access(frame_id, AccessType::Unknown);
                    replacer.set_evictable(frame_id, true);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(replacer.size(), 100);

    for _ in 0..100 {
        assert!(replacer.evict().is_some());
    }

    assert_eq!(replacer.size(), 0);
}
