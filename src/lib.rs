//! birchdb - a disk-oriented B+ tree storage engine in Rust
//!
//! The crate implements the storage-index core of a relational database:
//! a concurrent, latch-crabbed B+ tree index layered on a fixed-size page
//! cache with an LRU-K eviction policy.
//!
//! # Architecture
//!
//! The system is organized into three layers:
//!
//! - **Storage Layer** (`storage`): file-backed page I/O
//!   - `DiskManager`: reads and writes fixed-size pages to a backing file
//!   - `DiskScheduler`: background worker thread for disk requests
//!
//! - **Buffer Pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: caches pages in a bounded set of frames
//!   - `LruKReplacer`: LRU-K page replacement policy
//!   - `FrameHeader`: per-frame metadata and data storage
//!   - `ReadPageGuard`/`WritePageGuard`: RAII guards for latched page access
//!
//! - **Index** (`index`): the B+ tree
//!   - `BPlusTree`: point lookup, insert, delete, range iteration under
//!     latch crabbing
//!   - `IndexIterator`: forward cursor over the leaf chain
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use birchdb::buffer::BufferPoolManager;
//! use birchdb::index::{BPlusTree, OrdComparator};
//! use birchdb::storage::disk::DiskManager;
//! use birchdb::common::{PageId, RecordId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(100, 2, disk_manager));
//!
//! // The header page anchors the index; the root pointer lives inside it.
//! let header_page_id = bpm.new_page().unwrap();
//! let tree: BPlusTree<u32, OrdComparator> =
//!     BPlusTree::new("pk_idx", header_page_id, bpm, OrdComparator, 64, 64).unwrap();
//!
//! tree.insert(42, RecordId::new(PageId::new(7), SlotId::new(0))).unwrap();
//! assert!(tree.get(&42).unwrap().is_some());
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{BirchError, PageId, RecordId, Result, SlotId};
