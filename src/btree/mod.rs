//! # B+Tree
//!
//! A copy-on-write B+tree over fixed-size pages. The tree is split into two
//! layers:
//!
//! - [`node`]: the pure codec over a packed page image: accessors, bulk
//!   slot copies, rebuild constructors, split, and merge. No I/O, no
//!   allocation policy.
//! - [`tree`]: the engine, with insert, delete, and lookup expressed
//!   entirely through the [`PageStore`] capabilities (`page_get` /
//!   `page_new` / `page_del`), so it knows nothing about files, mappings,
//!   or free lists.
//!
//! The storage layer implements `PageStore` on its staged-update state;
//! tests implement it on a plain map. Every mutation re-emits the touched
//! path as fresh pages and schedules the old ones for reclamation, which is
//! what makes the single-file commit protocol crash-consistent: until the
//! master page is rewritten, the old tree is fully intact on disk.

pub mod node;
pub mod tree;

pub use node::{Node, NodeType};
pub use tree::{BTree, PageStore};
