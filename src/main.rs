use std::sync::Arc;

use larch::buffer::BufferPoolManager;
use larch::common::{PageId, RecordId, SlotId};
use larch::index::{BPlusTree, GenericKey, IntegerComparator};
use larch::storage::disk::DiskManager;

fn main() {
    env_logger::init();

    println!("Larch - a disk-oriented storage and index core");
    println!("==============================================\n");

    let db_path = "demo.db";

    let disk_manager = Arc::new(DiskManager::new(db_path).expect("Failed to create disk manager"));
    println!("Created disk manager for: {}", db_path);

    let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
    println!("Created buffer pool manager with 64 frames\n");

    // Small node sizes so the demo actually grows a multi-level tree
    let tree =
        BPlusTree::<8, _>::new(Arc::clone(&bpm), IntegerComparator, 4, 4).expect("Failed to create index");
    println!("Created B+ tree index (header page {})", tree.header_page_id());

    let keys = [3i64, 8, 2, 7, 9, 1, 5, 10, 4, 6];
    for &k in &keys {
        let key = GenericKey::from_integer(k);
        let rid = RecordId::new(PageId::new(0), SlotId::new(k as u32));
        tree.insert(&key, rid).expect("insert failed");
        println!("Inserted key {}", k);
    }

    println!("\nPoint lookups:");
    for k in [1i64, 5, 10, 42] {
        let key = GenericKey::from_integer(k);
        match tree.get(&key).expect("lookup failed") {
            Some(rid) => println!("  {} -> {}", k, rid),
            None => println!("  {} -> not found", k),
        }
    }

    println!("\nFull scan in key order:");
    let mut iter = tree.begin().expect("begin failed");
    while !iter.is_end() {
        let (key, rid) = iter.entry().expect("deref failed");
        println!("  {} -> {}", key, rid);
        iter.advance().expect("advance failed");
    }

    for k in [2i64, 7] {
        tree.remove(&GenericKey::from_integer(k)).expect("remove failed");
        println!("\nRemoved key {}", k);
    }

    println!("\nScan after removals:");
    let mut iter = tree.begin().expect("begin failed");
    while !iter.is_end() {
        let (key, rid) = iter.entry().expect("deref failed");
        println!("  {} -> {}", key, rid);
        iter.advance().expect("advance failed");
    }

    bpm.flush_all_pages().expect("flush failed");
    println!("\nFlushed all pages to disk");

    std::fs::remove_file(db_path).ok();
    println!("Demo completed successfully!");
}
