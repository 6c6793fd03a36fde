//! # Master Page
//!
//! The first 32 bytes of the store file anchor everything else:
//!
//! ```text
//! Offset  Size  Field       Description
//! ------  ----  ---------   ----------------------------------------
//! 0       16    signature   ASCII "TreeVaultDB" padded with NULs
//! 16      8     root        page id of the tree root (0 = empty tree)
//! 24      8     flushed     pages in use, including this one (>= 1)
//! ```
//!
//! The master page is rewritten at the end of every commit with a single
//! positional write, *after* the data pages have been fsynced, and never
//! through the memory mapping, because mapped writes give no atomicity.
//! A reopened file therefore always presents either the previous root or
//! the new one, never a mix.

use eyre::{ensure, Result};
use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{DB_SIGNATURE, MASTER_PAGE_SIZE, PAGE_SIZE};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct MasterPage {
    signature: [u8; 16],
    root: U64,
    flushed: U64,
}

const _: () = assert!(std::mem::size_of::<MasterPage>() == MASTER_PAGE_SIZE);
const _: () = assert!(MASTER_PAGE_SIZE <= PAGE_SIZE);

impl MasterPage {
    pub fn new(root: u64, flushed: u64) -> Self {
        Self {
            signature: *DB_SIGNATURE,
            root: U64::new(root),
            flushed: U64::new(flushed),
        }
    }

    /// Parses and signature-checks a master page image.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= MASTER_PAGE_SIZE,
            "buffer too small for master page: {} < {}",
            bytes.len(),
            MASTER_PAGE_SIZE
        );

        let master = Self::ref_from_bytes(&bytes[..MASTER_PAGE_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse master page: {:?}", e))?;

        ensure!(
            &master.signature == DB_SIGNATURE,
            "bad master page signature"
        );

        Ok(master)
    }

    /// Range-checks the page counters against the actual file size.
    pub fn validate(&self, file_pages: u64) -> Result<()> {
        let flushed = self.flushed();
        ensure!(
            flushed >= 1 && flushed <= file_pages,
            "master page flushed count {} out of range (file holds {} pages)",
            flushed,
            file_pages
        );
        ensure!(
            self.root() < flushed,
            "master page root {} not below flushed count {}",
            self.root(),
            flushed
        );
        Ok(())
    }

    zerocopy_accessors! {
        root: u64,
        flushed: u64,
    }
}
