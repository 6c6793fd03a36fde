//! # TreeVault Configuration Constants
//!
//! This module centralizes the on-disk layout constants. Constants that
//! depend on each other are co-located and tied together with compile-time
//! assertions so that a change to one cannot silently invalidate another.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> NODE_HEADER (4 bytes: type + key count)
//!       │
//!       ├─> MAX_KEY_SIZE / MAX_VAL_SIZE
//!       │     Chosen so a node holding a single maximum-size entry still
//!       │     fits in one page (asserted below). The three-way node split
//!       │     relies on this bound.
//!       │
//!       ├─> FREE_LIST_HEADER (20 bytes: type + size + total + next)
//!       │
//!       └─> FREE_LIST_CAP (derived: pointers per free-list page)
//!
//! MASTER_PAGE_SIZE (32 bytes)
//!       │
//!       └─> DB_SIGNATURE (16 bytes of it)
//! ```

// ============================================================================
// PAGE LAYOUT
// ============================================================================

/// Size of each page in bytes. The unit of allocation, addressing, and I/O.
pub const PAGE_SIZE: usize = 4096;

/// Size of the tree-node header: a 2-byte node type and a 2-byte key count.
pub const NODE_HEADER: usize = 4;

/// Maximum key length in bytes.
pub const MAX_KEY_SIZE: usize = 1000;

/// Maximum value length in bytes.
pub const MAX_VAL_SIZE: usize = 3000;

// A node holding one maximum-size entry (header, child pointer, offset,
// length prefixes, key, value) must fit in a single page.
const _: () = assert!(
    NODE_HEADER + 8 + 2 + 4 + MAX_KEY_SIZE + MAX_VAL_SIZE <= PAGE_SIZE,
    "a single maximum-size entry must fit in one page"
);

// ============================================================================
// FREE LIST
// ============================================================================

/// Size of the free-list node header: type (2) + size (2) + total (8) +
/// next (8).
pub const FREE_LIST_HEADER: usize = 4 + 8 + 8;

/// Number of 8-byte page pointers a single free-list node can hold.
pub const FREE_LIST_CAP: usize = (PAGE_SIZE - FREE_LIST_HEADER) / 8;

const _: () = assert!(FREE_LIST_CAP == 509, "free-list capacity derivation mismatch");

// ============================================================================
// MASTER PAGE
// ============================================================================

/// Size of the master page payload at offset 0 of the file.
pub const MASTER_PAGE_SIZE: usize = 32;

/// On-disk signature: the ASCII store name padded with NULs to 16 bytes.
pub const DB_SIGNATURE: &[u8; 16] = b"TreeVaultDB\0\0\0\0\0";

// ============================================================================
// MEMORY MAPPING
// ============================================================================

/// Size of the initial mapping chunk. Doubled until it covers the file, so
/// small stores reserve address space rather than remapping as they grow.
pub const MIN_MMAP_SIZE: usize = 64 << 20;

const _: () = assert!(
    MIN_MMAP_SIZE % PAGE_SIZE == 0,
    "initial mapping size must be a multiple of the page size"
);
