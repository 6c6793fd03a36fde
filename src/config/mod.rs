//! Configuration constants for the store.
//!
//! Import layout constants from this module rather than redefining them
//! locally; the constants file carries the compile-time assertions that keep
//! derived values honest.

mod constants;

pub use constants::{
    DB_SIGNATURE, FREE_LIST_CAP, FREE_LIST_HEADER, MASTER_PAGE_SIZE, MAX_KEY_SIZE, MAX_VAL_SIZE,
    MIN_MMAP_SIZE, NODE_HEADER, PAGE_SIZE,
};
