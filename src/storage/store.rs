//! # The Store
//!
//! `Store` ties the pieces together: one backing file, the chunked mapping
//! over it, the staged-update set, and the tree and free-list heads. It
//! implements the page capabilities consumed by the B+tree engine
//! ([`PageStore`]) and by the free list ([`FreePages`]), and drives the
//! commit protocol that makes each mutation durable.
//!
//! ## Staged Updates
//!
//! Between the start of a mutation and its commit, nothing touches the
//! file. New and rewritten pages are staged in an in-memory map keyed by
//! page id (`Some(bytes)`); retired pages are staged as deallocations
//! (`None`). Page reads check the staging area first and fall through to
//! the mapping, so a mutation sees its own writes.
//!
//! Allocation hands out ids from two sources: pointers popped off the free
//! list by index (counted in `nfree`, settled at commit) and fresh ids past
//! the end of the committed file (counted in `nappend`).
//!
//! ## Commit Protocol
//!
//! Every `set`/`delete` runs the same sequence:
//!
//! ```text
//! 1. free list <- update(nfree, freed ids)     may stage more pages
//! 2. grow file to flushed + nappend pages      geometric, +max(1, n/8)
//! 3. grow mapping to cover the file            appended chunks only
//! 4. copy staged pages into the mapping
//! 5. fsync                                     data durable
//! 6. advance flushed, clear staging
//! 7. positional write of the master page      not through the mapping
//! 8. fsync                                     commit point
//! ```
//!
//! A crash before step 8 leaves the old master pointing at the old tree,
//! whose pages were never overwritten (copy-on-write); a crash after it
//! presents the new tree. There is no in-between. On a commit error the
//! staged state is discarded and the pre-call tree and free-list heads are
//! restored, so the in-memory view matches the file; the documented caller
//! contract after an I/O error is still to close and reopen.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashMap;
use tracing::debug;
use zerocopy::IntoBytes;

use crate::btree::{BTree, Node, PageStore};
use crate::config::PAGE_SIZE;
use crate::storage::freelist::{FreeList, FreePages};
use crate::storage::master::MasterPage;
use crate::storage::mmap::ChunkedMmap;

/// Mutable storage state shared by the page capabilities. Kept separate
/// from the tree handle so the engine can borrow it mutably while the tree
/// updates its own root.
#[derive(Debug)]
pub(crate) struct StoreState {
    pub(crate) mmap: ChunkedMmap,
    pub(crate) file_size: u64,
    /// Pages already persisted, including the master page.
    pub(crate) flushed: u64,
    /// Fresh pages appended past `flushed` in the current mutation.
    pub(crate) nappend: u64,
    /// Pointers popped off the free list in the current mutation.
    pub(crate) nfree: u64,
    /// Staged writes (`Some`) and deallocations (`None`) by page id.
    pub(crate) updates: HashMap<u64, Option<Vec<u8>>>,
    pub(crate) free: FreeList,
}

impl StoreState {
    /// A copy of the page at `ptr`: staged bytes win over the mapping.
    pub(crate) fn page_copy(&self, ptr: u64) -> Result<Node> {
        match self.updates.get(&ptr) {
            Some(Some(bytes)) => Ok(Node::from_page(bytes)),
            _ => Ok(Node::from_page(self.mmap.page(ptr)?)),
        }
    }
}

impl PageStore for StoreState {
    fn page_get(&self, ptr: u64) -> Result<Node> {
        self.page_copy(ptr)
    }

    fn page_new(&mut self, node: Node) -> Result<u64> {
        let free = self.free;
        let ptr = if self.nfree < free.total(self)? {
            // reuse a pointer from the free list; settled at commit
            let ptr = free.get(self, self.nfree)?;
            self.nfree += 1;
            ptr
        } else {
            let ptr = self.flushed + self.nappend;
            self.nappend += 1;
            ptr
        };
        self.updates.insert(ptr, Some(node.into_page()));
        Ok(ptr)
    }

    fn page_del(&mut self, ptr: u64) {
        self.updates.insert(ptr, None);
    }
}

impl FreePages for StoreState {
    fn node(&self, ptr: u64) -> Result<Node> {
        self.page_copy(ptr)
    }

    fn append(&mut self, node: Node) -> Result<u64> {
        let ptr = self.flushed + self.nappend;
        self.nappend += 1;
        self.updates.insert(ptr, Some(node.into_page()));
        Ok(ptr)
    }

    fn reuse(&mut self, ptr: u64, node: Node) {
        self.updates.insert(ptr, Some(node.into_page()));
    }
}

/// A persistent, single-file, embedded ordered key-value store.
///
/// Not internally synchronized: the caller must ensure no two operations
/// run concurrently against the same store.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    file: File,
    pub(crate) state: StoreState,
    pub(crate) tree: BTree,
}

impl Store {
    /// Opens or creates the store at `path`.
    ///
    /// An existing file must be a whole number of pages and carry a valid
    /// master page; an empty file is a fresh store whose master page is
    /// written on the first commit. Resources acquired here are released
    /// on any failure path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open store file '{}'", path.display()))?;

        let metadata = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat store file '{}'", path.display()))?;
        let file_size = metadata.len();
        ensure!(
            file_size % PAGE_SIZE as u64 == 0,
            "store file '{}' size {} is not a multiple of the page size {}",
            path.display(),
            file_size,
            PAGE_SIZE
        );

        let mmap = ChunkedMmap::init(&file, file_size)?;

        let (root, flushed) = if file_size == 0 {
            // fresh store: page 0 is reserved for the master page
            (0, 1)
        } else {
            let master = MasterPage::from_bytes(mmap.page(0)?)
                .wrap_err_with(|| format!("store file '{}' is corrupt", path.display()))?;
            master
                .validate(file_size / PAGE_SIZE as u64)
                .wrap_err_with(|| format!("store file '{}' is corrupt", path.display()))?;
            (master.root(), master.flushed())
        };

        debug!(
            path = %path.display(),
            root,
            flushed,
            file_size,
            "store.open"
        );

        Ok(Self {
            path,
            file,
            state: StoreState {
                mmap,
                file_size,
                flushed,
                nappend: 0,
                nfree: 0,
                updates: HashMap::new(),
                free: FreeList::default(),
            },
            tree: BTree::new(root),
        })
    }

    /// Closes the store, unmapping every chunk and releasing the file.
    pub fn close(self) {
        debug!(path = %self.path.display(), "store.close");
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Page id of the committed tree root; 0 for an empty tree.
    pub fn root_page(&self) -> u64 {
        self.tree.root()
    }

    /// Pages persisted in the file, including the master page.
    pub fn flushed_pages(&self) -> u64 {
        self.state.flushed
    }

    /// Free pointers currently available for reuse.
    pub fn free_pages(&self) -> Result<u64> {
        self.state.free.total(&self.state)
    }

    /// Looks up a key, returning a copy of its value if present.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.tree.get(&self.state, key)
    }

    /// Inserts or updates a key and commits.
    pub fn set(&mut self, key: &[u8], val: &[u8]) -> Result<()> {
        let tree = self.tree;
        let free = self.state.free;
        let result = match self.tree.insert(&mut self.state, key, val) {
            Ok(()) => self.commit(),
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.rollback(tree, free);
        }
        result
    }

    /// Deletes a key and commits regardless of whether it was present.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let tree = self.tree;
        let free = self.state.free;
        let result = match self.tree.delete(&mut self.state, key) {
            Ok(deleted) => self.commit().map(|()| deleted),
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.rollback(tree, free);
        }
        result
    }

    /// Discards staged state after a failed mutation, restoring the
    /// pre-call tree and free-list heads.
    fn rollback(&mut self, tree: BTree, free: FreeList) {
        self.tree = tree;
        self.state.free = free;
        self.state.updates.clear();
        self.state.nappend = 0;
        self.state.nfree = 0;
    }

    fn commit(&mut self) -> Result<()> {
        self.write_pages()?;
        self.sync_pages()
    }

    /// Steps 1-4 of the protocol: settle the free list, grow file and
    /// mapping, copy staged pages into the mapping.
    fn write_pages(&mut self) -> Result<()> {
        let freed: Vec<u64> = self
            .state
            .updates
            .iter()
            .filter_map(|(&ptr, page)| page.is_none().then_some(ptr))
            .collect();
        debug!(
            staged = self.state.updates.len(),
            freed = freed.len(),
            nfree = self.state.nfree,
            nappend = self.state.nappend,
            "store.commit.write_pages"
        );

        // exactly once per commit; its own page traffic goes through
        // append/reuse and never back into the list
        let nfree = self.state.nfree;
        let mut free = self.state.free;
        free.update(&mut self.state, nfree, freed)?;
        self.state.free = free;

        let npages = self.state.flushed + self.state.nappend;
        self.extend_file(npages)?;
        self.state.mmap.extend(&self.file, npages)?;

        let StoreState { mmap, updates, .. } = &mut self.state;
        for (&ptr, page) in updates.iter() {
            if let Some(bytes) = page {
                mmap.page_mut(ptr)?.copy_from_slice(bytes);
            }
        }
        Ok(())
    }

    /// Steps 5-8: data fsync, state advance, master write, commit fsync.
    fn sync_pages(&mut self) -> Result<()> {
        self.file
            .sync_all()
            .wrap_err("fsync of data pages failed")?;

        self.state.flushed += self.state.nappend;
        self.state.nappend = 0;
        self.state.nfree = 0;
        self.state.updates.clear();

        self.write_master()?;
        self.file
            .sync_all()
            .wrap_err("fsync of master page failed")?;
        Ok(())
    }

    /// Grows the file to at least `npages` pages, adding an eighth of the
    /// current size (at least one page) per iteration so growth stays
    /// geometric.
    fn extend_file(&mut self, npages: u64) -> Result<()> {
        let mut file_pages = self.state.file_size / PAGE_SIZE as u64;
        if file_pages >= npages {
            return Ok(());
        }
        while file_pages < npages {
            file_pages += (file_pages / 8).max(1);
        }

        let file_size = file_pages * PAGE_SIZE as u64;
        self.file
            .set_len(file_size)
            .wrap_err_with(|| format!("failed to grow store file to {} bytes", file_size))?;
        self.state.file_size = file_size;
        debug!(file_size, "store.commit.extend_file");
        Ok(())
    }

    /// The master page goes through a positional write on the file
    /// descriptor: a 32-byte `pwrite` is atomic where a mapped write is
    /// not.
    fn write_master(&self) -> Result<()> {
        let master = MasterPage::new(self.tree.root(), self.state.flushed);
        self.file
            .write_all_at(master.as_bytes(), 0)
            .wrap_err("failed to write master page")?;
        Ok(())
    }
}
