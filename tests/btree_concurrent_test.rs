//! Concurrency tests: latch crabbing under parallel writers and readers

use std::sync::Arc;
use std::thread;

use larch::buffer::BufferPoolManager;
use larch::common::{PageId, RecordId, SlotId};
use larch::index::{BPlusTree, GenericKey, IntegerComparator};
use larch::storage::disk::DiskManager;
use tempfile::NamedTempFile;

const KEY_WIDTH: usize = 8;

type TestTree = BPlusTree<KEY_WIDTH, IntegerComparator>;

fn setup(
    pool_size: usize,
    leaf_max: usize,
    internal_max: usize,
) -> (Arc<TestTree>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, 2, dm));
    let tree = BPlusTree::new(bpm, IntegerComparator, leaf_max, internal_max).unwrap();
    (Arc::new(tree), temp_file)
}

fn key(v: i64) -> GenericKey<KEY_WIDTH> {
    GenericKey::from_integer(v)
}

fn rid(v: i64) -> RecordId {
    RecordId::new(PageId::new(0), SlotId::new(v as u32))
}

#[test]
fn test_concurrent_disjoint_inserts() {
    const THREADS: i64 = 4;
    const PER_THREAD: i64 = 250;

    let (tree, _temp) = setup(256, 2, 3);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let v = t * PER_THREAD + i + 1;
                    assert!(tree.insert(&key(v), rid(v)).unwrap(), "insert {}", v);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // The merged leaf sequence matches the serial result exactly
    let seen: Vec<i64> = tree
        .begin()
        .unwrap()
        .map(|entry| entry.unwrap().0.to_integer())
        .collect();
    let expected: Vec<i64> = (1..=THREADS * PER_THREAD).collect();
    assert_eq!(seen, expected);

    for v in 1..=THREADS * PER_THREAD {
        assert_eq!(tree.get(&key(v)).unwrap(), Some(rid(v)), "lookup {}", v);
    }
    tree.check_integrity().unwrap();
}

#[test]
fn test_concurrent_interleaved_key_ranges() {
    const THREADS: i64 = 4;
    const PER_THREAD: i64 = 200;

    let (tree, _temp) = setup(256, 2, 3);

    // Thread t inserts keys congruent to t modulo THREADS, so the write
    // paths collide constantly
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let v = i * THREADS + t + 1;
                    assert!(tree.insert(&key(v), rid(v)).unwrap(), "insert {}", v);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let seen: Vec<i64> = tree
        .begin()
        .unwrap()
        .map(|entry| entry.unwrap().0.to_integer())
        .collect();
    let expected: Vec<i64> = (1..=THREADS * PER_THREAD).collect();
    assert_eq!(seen, expected);
    tree.check_integrity().unwrap();
}

#[test]
fn test_readers_run_alongside_writers() {
    const WRITERS: i64 = 2;
    const READERS: usize = 2;
    const PER_WRITER: i64 = 300;

    let (tree, _temp) = setup(256, 4, 4);

    // Seed some data so readers have something to find immediately
    for v in 1..=100i64 {
        tree.insert(&key(v), rid(v)).unwrap();
    }

    let mut handles = Vec::new();
    for t in 0..WRITERS {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            for i in 0..PER_WRITER {
                let v = 1000 + t * PER_WRITER + i;
                assert!(tree.insert(&key(v), rid(v)).unwrap());
            }
        }));
    }
    for _ in 0..READERS {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            for round in 0..50 {
                // Seeded keys are always visible
                let v = (round % 100) + 1;
                assert_eq!(tree.get(&key(v)).unwrap(), Some(rid(v)));
                // In-flight keys are either fully there or fully absent
                let w = 1000 + (round % PER_WRITER);
                if let Some(r) = tree.get(&key(w)).unwrap() {
                    assert_eq!(r, rid(w));
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for v in 1..=100i64 {
        assert_eq!(tree.get(&key(v)).unwrap(), Some(rid(v)));
    }
    for t in 0..WRITERS {
        for i in 0..PER_WRITER {
            let v = 1000 + t * PER_WRITER + i;
            assert_eq!(tree.get(&key(v)).unwrap(), Some(rid(v)));
        }
    }
    tree.check_integrity().unwrap();
}

#[test]
fn test_concurrent_inserts_and_removes_on_disjoint_ranges() {
    let (tree, _temp) = setup(256, 2, 3);

    // Pre-load the range the remover will tear down
    for v in 1..=200i64 {
        tree.insert(&key(v), rid(v)).unwrap();
    }

    let inserter = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for v in 201..=400i64 {
                assert!(tree.insert(&key(v), rid(v)).unwrap());
            }
        })
    };
    let remover = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for v in 1..=200i64 {
                tree.remove(&key(v)).unwrap();
            }
        })
    };
    inserter.join().unwrap();
    remover.join().unwrap();

    for v in 1..=200i64 {
        assert_eq!(tree.get(&key(v)).unwrap(), None, "{} still present", v);
    }
    for v in 201..=400i64 {
        assert_eq!(tree.get(&key(v)).unwrap(), Some(rid(v)), "{} lost", v);
    }
    tree.check_integrity().unwrap();
}
