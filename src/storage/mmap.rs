//! # Chunked Memory Mapping
//!
//! This module maps the store file into the process address space in one or
//! more chunks and serves page reads directly from them. It is the only
//! place that touches `memmap2`.
//!
//! ## Why Chunks Instead of Remapping
//!
//! The obvious way to grow a mapping is to unmap and remap at the new size,
//! but that moves the region and invalidates every outstanding page
//! address. Instead the mapping grows by *appending* chunks:
//!
//! ```text
//! file offset:   0 ................ total ............. 2*total
//!                [  chunk 0        ][  chunk 1 (= total bytes) ]
//! ```
//!
//! Each new chunk is mapped at file offset `total` with length `total`, so
//! the mapped span doubles and existing chunks never move or unmap until
//! the store closes. Chunks are contiguous in file-offset space but need
//! not be contiguous in virtual memory; page lookup walks the chunk list
//! and does the offset arithmetic per chunk.
//!
//! ## Mapping Beyond the File
//!
//! The initial chunk is at least 64 MiB even for a small file: mapping past
//! the end of the file only reserves address space, and the commit path
//! grows the file before any page beyond it is written. This keeps the
//! common case at exactly one chunk for stores under 64 MiB.
//!
//! ## Durability
//!
//! Writes through the mapping land in the OS page cache; the commit path
//! makes them durable with fsync on the backing file before the master
//! page is rewritten. This module does no syncing of its own.

use std::fs::File;

use eyre::{ensure, Result, WrapErr};
use memmap2::{MmapMut, MmapOptions};
use tracing::debug;

use crate::config::{MIN_MMAP_SIZE, PAGE_SIZE};

/// The mapped view of the store file: an ordered list of chunks covering
/// `0..total` in file-offset space.
#[derive(Debug)]
pub struct ChunkedMmap {
    total: usize,
    chunks: Vec<MmapMut>,
}

impl ChunkedMmap {
    /// Maps the initial chunk: the smallest power-of-two doubling of 64 MiB
    /// that covers the current file size.
    pub fn init(file: &File, file_size: u64) -> Result<Self> {
        ensure!(
            file_size % PAGE_SIZE as u64 == 0,
            "file size {} is not a multiple of the page size {}",
            file_size,
            PAGE_SIZE
        );

        let mut size = MIN_MMAP_SIZE;
        while (size as u64) < file_size {
            size *= 2;
        }

        // SAFETY: mapping a file shared+writable is unsafe because another
        // process could truncate or rewrite it under us. This is safe in
        // practice because:
        // 1. The store owns its file for the lifetime of the process; the
        //    documented contract forbids external writers.
        // 2. The mapping may extend past the end of the file, but pages
        //    beyond the file are never touched before the commit path has
        //    grown the file to cover them.
        // 3. The chunk is dropped (unmapped) only when the store closes.
        let chunk = unsafe {
            MmapOptions::new()
                .len(size)
                .map_mut(file)
                .wrap_err("failed to memory-map store file")?
        };

        Ok(Self {
            total: size,
            chunks: vec![chunk],
        })
    }

    /// Total mapped bytes across all chunks.
    pub fn total_bytes(&self) -> usize {
        self.total
    }

    /// Ensures the mapping covers at least `npages` pages, appending
    /// doubling chunks as needed. Existing chunks never move.
    pub fn extend(&mut self, file: &File, npages: u64) -> Result<()> {
        while (self.total as u64) < npages * PAGE_SIZE as u64 {
            // The new chunk starts exactly where the mapped span ends;
            // growth is monotonic so offset and length both equal `total`.
            let offset = self.total as u64;
            let len = self.total;
            assert!(len > 0, "mapped span cannot be empty when extending");

            // SAFETY: same justification as `init`; additionally the chunk
            // is mapped at the end of the previously mapped span, so no two
            // chunks overlap in file-offset space.
            let chunk = unsafe {
                MmapOptions::new()
                    .offset(offset)
                    .len(len)
                    .map_mut(file)
                    .wrap_err("failed to map additional store chunk")?
            };

            self.total += len;
            self.chunks.push(chunk);
            debug!(
                total = self.total,
                chunks = self.chunks.len(),
                "mmap.extend"
            );
        }
        Ok(())
    }

    /// The page image at `ptr`, borrowed from the mapping.
    pub fn page(&self, ptr: u64) -> Result<&[u8]> {
        let (chunk, offset) = self.locate(ptr)?;
        Ok(&self.chunks[chunk][offset..offset + PAGE_SIZE])
    }

    /// Mutable access to the page image at `ptr`, for the commit path.
    pub fn page_mut(&mut self, ptr: u64) -> Result<&mut [u8]> {
        let (chunk, offset) = self.locate(ptr)?;
        Ok(&mut self.chunks[chunk][offset..offset + PAGE_SIZE])
    }

    fn locate(&self, ptr: u64) -> Result<(usize, usize)> {
        let mut start = 0u64;
        for (i, chunk) in self.chunks.iter().enumerate() {
            let end = start + (chunk.len() / PAGE_SIZE) as u64;
            if ptr < end {
                return Ok((i, ((ptr - start) as usize) * PAGE_SIZE));
            }
            start = end;
        }
        eyre::bail!(
            "page {} beyond the mapped span of {} bytes",
            ptr,
            self.total
        )
    }
}
