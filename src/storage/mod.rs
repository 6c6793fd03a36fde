//! # Storage Layer
//!
//! Everything that touches the file lives here. The layer owns four
//! tightly coupled pieces:
//!
//! - [`mmap`]: the chunked memory mapping. It grows by appending chunks so
//!   existing page addresses never move, and serves all page reads.
//! - [`master`]: the 32-byte master page anchoring the tree root and the
//!   committed page count.
//! - [`freelist`]: the persistent stack of reusable page ids, reconciled
//!   once per commit.
//! - [`store`]: the [`Store`] itself: staged updates, the allocator, the
//!   commit protocol, and the public open/get/set/delete surface.
//! - [`verify`]: offline structural checking over all of the above.
//!
//! ## Ownership of Page Bytes
//!
//! The storage layer alone owns page memory: bytes live either in a
//! mapping chunk or in the staged-update map. The tree engine and the
//! free list receive owned page *copies* ([`crate::btree::Node`]) and hand
//! back finished nodes to be staged, so no borrow of the mapping survives
//! across a mutation.
//!
//! ## Crash Consistency
//!
//! Copy-on-write never overwrites a live page, staged pages are fsynced
//! before the master page is rewritten, and the master page is rewritten
//! with a positional write followed by a second fsync. Interrupt the
//! process anywhere and a reopen finds either the old state or the new
//! one, never a blend.

pub mod freelist;
pub mod master;
pub mod mmap;
pub mod store;
pub mod verify;

pub use freelist::{FreeList, FreeListHeader, FreePages};
pub use master::MasterPage;
pub use mmap::ChunkedMmap;
pub use store::Store;
pub use verify::VerifyStats;
