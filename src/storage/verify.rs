//! # Structural Verification
//!
//! Offline integrity checking over a committed store: walks the tree and
//! the free list and cross-checks them against the page accounting. Used
//! by tests after bulk workloads and available to embedders as a sanity
//! check after suspicious shutdowns.
//!
//! The checks, in order:
//!
//! 1. every interior slot key equals the first key of the child it points
//!    to, and keys are strictly ascending within every node;
//! 2. every node fits one page;
//! 3. every referenced page id is non-zero and below the flushed count;
//! 4. the tree pages, the free-list node pages, the free pointers, and the
//!    master page partition `0..flushed` exactly, with nothing shared and
//!    nothing unaccounted;
//! 5. the head node's stored total equals the number of pointers actually
//!    reachable in the list.
//!
//! Check 4 assumes the file's whole history ran in this process: the
//! master page does not record the free-list head, so pages freed by an
//! earlier process are unreachable after a reopen and will be reported
//! here as unaccounted.

use eyre::{bail, ensure, Result};
use hashbrown::HashSet;

use crate::btree::NodeType;
use crate::config::PAGE_SIZE;
use crate::storage::freelist::{pointer_at, FreeListHeader};
use crate::storage::store::Store;

/// Page accounting gathered by [`Store::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyStats {
    /// Pages reachable from the tree root.
    pub tree_pages: u64,
    /// Pages holding free-list nodes.
    pub list_pages: u64,
    /// Free pointers stored across the list.
    pub free_pages: u64,
    /// Entries in the tree, counting the sentinel.
    pub entries: u64,
}

impl Store {
    /// Walks the committed tree and free list, checking structural
    /// invariants and page accounting. Fails on the first violation.
    pub fn verify(&self) -> Result<VerifyStats> {
        ensure!(
            self.state.updates.is_empty(),
            "verify requires a committed store"
        );

        let mut seen: HashSet<u64> = HashSet::new();
        let mut stats = VerifyStats {
            tree_pages: 0,
            list_pages: 0,
            free_pages: 0,
            entries: 0,
        };

        if self.tree.root() != 0 {
            self.verify_node(self.tree.root(), None, &mut seen, &mut stats)?;
        }

        let mut stored_total = 0u64;
        let mut ptr = self.state.free.head();
        let mut at_head = true;
        while ptr != 0 {
            self.claim_page(ptr, &mut seen)?;
            stats.list_pages += 1;

            let node = self.state.page_copy(ptr)?;
            let header = FreeListHeader::from_bytes(node.as_bytes())?;
            if at_head {
                stored_total = header.total();
                at_head = false;
            }
            for i in 0..header.size() as usize {
                let free_ptr = pointer_at(&node, i);
                self.claim_page(free_ptr, &mut seen)?;
                stats.free_pages += 1;
            }
            ptr = header.next();
        }

        ensure!(
            stored_total == stats.free_pages,
            "free-list head records {} pointers but {} are reachable",
            stored_total,
            stats.free_pages
        );
        ensure!(
            seen.len() as u64 + 1 == self.state.flushed,
            "{} pages accounted for out of {} committed; the rest are neither reachable nor free",
            seen.len() + 1,
            self.state.flushed
        );

        Ok(stats)
    }

    fn claim_page(&self, ptr: u64, seen: &mut HashSet<u64>) -> Result<()> {
        ensure!(
            ptr != 0 && ptr < self.state.flushed,
            "page {} outside the committed range 1..{}",
            ptr,
            self.state.flushed
        );
        ensure!(seen.insert(ptr), "page {} claimed twice", ptr);
        Ok(())
    }

    fn verify_node(
        &self,
        ptr: u64,
        expected_first: Option<&[u8]>,
        seen: &mut HashSet<u64>,
        stats: &mut VerifyStats,
    ) -> Result<()> {
        self.claim_page(ptr, seen)?;
        stats.tree_pages += 1;

        let node = self.state.page_copy(ptr)?;
        ensure!(
            node.used_bytes() <= PAGE_SIZE,
            "page {} holds a node of {} bytes",
            ptr,
            node.used_bytes()
        );
        let nkeys = node.key_count();
        ensure!(nkeys >= 1, "page {} holds a node with no keys", ptr);
        for i in 1..nkeys {
            ensure!(
                node.key(i - 1) < node.key(i),
                "keys out of order in page {}",
                ptr
            );
        }
        if let Some(expected) = expected_first {
            ensure!(
                node.key(0) == expected,
                "page {} starts with a key that does not match its separator",
                ptr
            );
        }

        match node.node_type() {
            Some(NodeType::Leaf) => {
                stats.entries += nkeys as u64;
            }
            Some(NodeType::Interior) => {
                for i in 0..nkeys {
                    self.verify_node(node.child(i), Some(node.key(i)), seen, stats)?;
                }
            }
            _ => bail!(
                "page {} has type {} where a tree node was expected",
                ptr,
                node.raw_type()
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_scratch() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("test.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn fresh_store_verifies_clean() {
        let (_dir, store) = open_scratch();

        let stats = store.verify().unwrap();

        assert_eq!(stats.tree_pages, 0);
        assert_eq!(stats.free_pages, 0);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn populated_store_accounts_for_every_page() {
        let (_dir, mut store) = open_scratch();

        for i in 0..300u32 {
            let key = format!("key{:05}", i);
            let val = format!("val{:05}", i);
            store.set(key.as_bytes(), val.as_bytes()).unwrap();
        }

        let stats = store.verify().unwrap();

        // 300 keys plus the sentinel
        assert_eq!(stats.entries, 301);
        assert_eq!(
            stats.tree_pages + stats.list_pages + stats.free_pages + 1,
            store.flushed_pages()
        );
    }

    #[test]
    fn verification_holds_through_deletions() {
        let (_dir, mut store) = open_scratch();

        for i in 0..300u32 {
            let key = format!("key{:05}", i);
            store.set(key.as_bytes(), b"some value").unwrap();
        }
        for i in (0..300u32).step_by(3) {
            let key = format!("key{:05}", i);
            assert!(store.delete(key.as_bytes()).unwrap());
        }

        let stats = store.verify().unwrap();

        assert_eq!(stats.entries, 201);
        assert_eq!(
            stats.tree_pages + stats.list_pages + stats.free_pages + 1,
            store.flushed_pages()
        );
    }
}
