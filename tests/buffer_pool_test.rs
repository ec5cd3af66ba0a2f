//! Integration tests for the buffer pool manager

use std::sync::Arc;
use std::thread;

use larch::buffer::BufferPoolManager;
use larch::common::{LarchError, PAGE_SIZE};
use larch::storage::disk::DiskManager;
use tempfile::NamedTempFile;

fn create_bpm(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, 2, dm));
    (bpm, temp_file)
}

#[test]
fn test_page_data_round_trip() {
    let (bpm, _temp) = create_bpm(10);

    let page_id = bpm.new_page().unwrap();
    {
        let mut guard = bpm.write_page(page_id).unwrap();
        guard.data_mut()[0] = 1;
        guard.data_mut()[PAGE_SIZE - 1] = 255;
    }
    {
        let guard = bpm.read_page(page_id).unwrap();
        assert_eq!(guard.data()[0], 1);
        assert_eq!(guard.data()[PAGE_SIZE - 1], 255);
    }
}

#[test]
fn test_guard_pins_and_unpins() {
    let (bpm, _temp) = create_bpm(10);

    let page_id = bpm.new_page().unwrap();
    assert_eq!(bpm.pin_count(page_id), Some(0));

    {
        let _guard = bpm.read_page(page_id).unwrap();
        assert_eq!(bpm.pin_count(page_id), Some(1));
    }
    assert_eq!(bpm.pin_count(page_id), Some(0));
}

#[test]
fn test_eviction_and_reload() {
    let (bpm, _temp) = create_bpm(4);

    // Fill every frame and then some, forcing evictions
    let page_ids: Vec<_> = (0..16)
        .map(|i| {
            let pid = bpm.new_page().unwrap();
            let mut guard = bpm.write_page(pid).unwrap();
            guard.data_mut()[0] = i as u8;
            pid
        })
        .collect();

    // Every page comes back with its own data
    for (i, &pid) in page_ids.iter().enumerate() {
        let guard = bpm.read_page(pid).unwrap();
        assert_eq!(guard.data()[0], i as u8, "page {} corrupted", i);
    }
}

#[test]
fn test_pool_exhaustion() {
    let (bpm, _temp) = create_bpm(2);

    let p1 = bpm.new_page().unwrap();
    let p2 = bpm.new_page().unwrap();

    let _g1 = bpm.read_page(p1).unwrap();
    let _g2 = bpm.read_page(p2).unwrap();

    assert!(matches!(bpm.new_page(), Err(LarchError::BufferPoolFull)));
}

#[test]
fn test_concurrent_readers_on_one_page() {
    let (bpm, _temp) = create_bpm(8);

    let page_id = bpm.new_page().unwrap();
    {
        let mut guard = bpm.write_page(page_id).unwrap();
        guard.data_mut()[0] = 42;
    }

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let bpm = Arc::clone(&bpm);
            thread::spawn(move || {
                for _ in 0..100 {
                    let guard = bpm.read_page(page_id).unwrap();
                    assert_eq!(guard.data()[0], 42);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_concurrent_writers_on_distinct_pages() {
    let (bpm, _temp) = create_bpm(16);

    let page_ids: Vec<_> = (0..8).map(|_| bpm.new_page().unwrap()).collect();

    let handles: Vec<_> = page_ids
        .iter()
        .map(|&pid| {
            let bpm = Arc::clone(&bpm);
            thread::spawn(move || {
                for i in 0..100u8 {
                    let mut guard = bpm.write_page(pid).unwrap();
                    guard.data_mut()[0] = i;
                    guard.data_mut()[1] = i;
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // No torn writes within a page
    for &pid in &page_ids {
        let guard = bpm.read_page(pid).unwrap();
        assert_eq!(guard.data()[0], guard.data()[1]);
    }
}

#[test]
fn test_flush_persists_across_reopen() {
    let temp_file = NamedTempFile::new().unwrap();

    let page_id = {
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = BufferPoolManager::new(4, 2, dm);
        let page_id = bpm.new_page().unwrap();
        {
            let mut guard = bpm.write_page(page_id).unwrap();
            guard.data_mut()[100] = 7;
        }
        bpm.flush_all_pages().unwrap();
        page_id
    };

    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = BufferPoolManager::new(4, 2, dm);
    let guard = bpm.read_page(page_id).unwrap();
    assert_eq!(guard.data()[100], 7);
}
