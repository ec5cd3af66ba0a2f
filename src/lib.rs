//! Larch - a disk-oriented storage and index core in Rust
//!
//! This crate provides the storage heart of a relational database: pages on
//! disk, a buffer pool that caches them in memory, and a concurrent B+ tree
//! index built on top.
//!
//! # Architecture
//!
//! The system is organized into several layers:
//!
//! - **Storage Layer** (`storage`): Handles disk I/O
//!   - `DiskManager`: Reads and writes pages to/from a database file
//!   - `DiskScheduler`: Background disk I/O scheduling
//!
//! - **Buffer Pool** (`buffer`): Memory management for database pages
//!   - `BufferPoolManager`: Fetches pages from disk and caches them in memory
//!   - `LruKReplacer`: LRU-K page replacement policy
//!   - `FrameHeader`: Per-frame metadata and data storage
//!   - `ReadPageGuard`/`WritePageGuard`: RAII guards for thread-safe page access
//!
//! - **Index** (`index`): A latch-crabbed B+ tree over fixed-width keys
//!   - `BPlusTree`: Point lookups, unique-key inserts, deletes with
//!     rebalancing, and ordered leaf-chain iteration
//!   - `BPlusTreeIterator`: Forward-only cursor over the leaf chain
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use larch::buffer::BufferPoolManager;
//! use larch::index::{BPlusTree, GenericKey, IntegerComparator};
//! use larch::storage::disk::DiskManager;
//! use larch::common::{PageId, RecordId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(100, 2, disk_manager));
//!
//! // A tree over 8-byte keys with room for 64 entries per node
//! let tree = BPlusTree::<8, _>::new(bpm, IntegerComparator, 64, 64).unwrap();
//!
//! let key = GenericKey::from_integer(42);
//! let rid = RecordId::new(PageId::new(7), SlotId::new(0));
//! assert!(tree.insert(&key, rid).unwrap());
//! assert_eq!(tree.get(&key).unwrap(), Some(rid));
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{LarchError, PageId, RecordId, Result, SlotId};
