//! # TreeVault - Embedded Ordered Key-Value Store
//!
//! TreeVault is a persistent, single-file, embedded key-value store. Keys
//! and values are arbitrary byte strings; the store supports point reads,
//! inserts/updates, and deletes, and every mutation is durable on return.
//!
//! ## Quick Start
//!
//! ```ignore
//! use treevault::Store;
//!
//! let mut store = Store::open("./data.tv")?;
//! store.set(b"name", b"alice")?;
//! assert_eq!(store.get(b"name")?, Some(b"alice".to_vec()));
//! store.delete(b"name")?;
//! store.close();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │      Public API (Store)             │
//! ├─────────────────────────────────────┤
//! │  Copy-on-Write B+Tree Engine        │   btree::tree
//! ├─────────────────────────────────────┤
//! │  Node Codec (packed page layout)    │   btree::node
//! ├─────────────────────────────────────┤
//! │  Allocator + Free List + Commit     │   storage::store / freelist
//! ├─────────────────────────────────────┤
//! │  Chunked mmap over a single file    │   storage::mmap
//! └─────────────────────────────────────┘
//! ```
//!
//! The tree engine is parameterized on page capabilities (get/new/del) and
//! knows nothing about storage; the storage layer implements those
//! capabilities over a staged-update set and a memory-mapped file, and
//! drives a write → fsync → master-page → fsync commit protocol that keeps
//! the file crash-consistent: a torn run leaves the previous committed
//! state intact.
//!
//! ## File Format
//!
//! A single file of 4 KiB pages. Page 0 holds the master page (signature,
//! tree root, page count); the rest hold tree nodes and free-list nodes.
//! All integers are little-endian.
//!
//! ## Concurrency
//!
//! None. The store is single-threaded by contract: it carries no internal
//! synchronization, and callers serialize all access. Each mutating call
//! is its own commit; there is no transaction grouping.

#[macro_use]
mod macros;

pub mod btree;
pub mod config;
pub mod storage;

pub use btree::{BTree, Node, NodeType, PageStore};
pub use storage::{FreeList, FreePages, Store, VerifyStats};
