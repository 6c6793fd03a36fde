//! # Copy-on-Write B+Tree Engine
//!
//! This module implements insert, delete, and point lookup over tree nodes.
//! The engine owns nothing but the root page id; every page it touches goes
//! through the [`PageStore`] capabilities, so the same code runs against the
//! memory-mapped store and against an in-memory map in tests.
//!
//! ## Copy-on-Write Mutation
//!
//! A mutation never writes a page in place. Each node on the path from the
//! root to the affected leaf is read, scheduled for deletion, and re-emitted
//! as a freshly built copy:
//!
//! ```text
//! insert(k):
//!   root' = rebuild(root with k)        old root scheduled for deletion
//!   split root' into 1..3 pages
//!   1 page  -> that page is the new root
//!   2..3    -> new interior root pointing at the pieces
//! ```
//!
//! The store decides what "deletion" means (it queues the ids for the free
//! list at commit) and when the staged pages become durable. The engine is
//! storage-agnostic and performs no I/O of its own.
//!
//! ## Deletion and Rebalancing
//!
//! Deletion rebuilds the leaf without the key and then considers merging a
//! child that has shrunk below a quarter page with a sibling under the same
//! parent, preferring the left sibling. When an interior root is left with
//! a single child, that level is removed. This keeps space bounded without
//! the full redistribution machinery of a textbook B-tree; nodes between a
//! quarter and a full page are left alone.
//!
//! ## Size Preconditions
//!
//! Keys are 1..=1000 bytes and values at most 3000 bytes, checked at the
//! public entry points before anything is staged, so a rejected call leaves
//! no trace in the store.

use eyre::{bail, ensure, Result};
use smallvec::{smallvec, SmallVec};

use super::node::{Node, NodeType};
use crate::config::{MAX_KEY_SIZE, MAX_VAL_SIZE, NODE_HEADER, PAGE_SIZE};

/// Page capabilities the tree engine operates through.
///
/// `page_get` dereferences a page id into a node image, `page_new` stages a
/// node and returns its id, and `page_del` schedules an id for reclamation
/// at the next commit.
pub trait PageStore {
    fn page_get(&self, ptr: u64) -> Result<Node>;
    fn page_new(&mut self, node: Node) -> Result<u64>;
    fn page_del(&mut self, ptr: u64);
}

/// The B+tree handle: just the root page id, 0 meaning an empty tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct BTree {
    root: u64,
}

/// Merge decision for an undersized child, carrying the sibling when one
/// qualifies.
enum Sibling {
    None,
    Left(u64, Node),
    Right(u64, Node),
}

impl BTree {
    pub fn new(root: u64) -> Self {
        Self { root }
    }

    pub fn root(&self) -> u64 {
        self.root
    }

    /// Looks up a key, returning a copy of its value if present.
    pub fn get(&self, store: &impl PageStore, key: &[u8]) -> Result<Option<Vec<u8>>> {
        check_key(key)?;
        if self.root == 0 {
            return Ok(None);
        }

        let mut node = store.page_get(self.root)?;
        loop {
            let idx = node.lookup_le(key);
            match node.node_type() {
                Some(NodeType::Leaf) => {
                    if node.key(idx) == key {
                        return Ok(Some(node.value(idx).to_vec()));
                    }
                    return Ok(None);
                }
                Some(NodeType::Interior) => {
                    node = store.page_get(node.child(idx))?;
                }
                _ => bail!(
                    "unexpected page type {} during lookup",
                    node.raw_type()
                ),
            }
        }
    }

    /// Inserts or updates a key.
    pub fn insert(&mut self, store: &mut impl PageStore, key: &[u8], val: &[u8]) -> Result<()> {
        check_key(key)?;
        ensure!(
            val.len() <= MAX_VAL_SIZE,
            "value of {} bytes exceeds the {}-byte maximum",
            val.len(),
            MAX_VAL_SIZE
        );

        if self.root == 0 {
            // First write: the sentinel empty key makes the leftmost slot
            // cover the whole key space, so descents always land somewhere.
            let mut root = Node::new();
            root.set_header(NodeType::Leaf, 2);
            root.append_kv(0, 0, b"", b"");
            root.append_kv(1, 0, key, val);
            self.root = store.page_new(root)?;
            return Ok(());
        }

        let node = store.page_get(self.root)?;
        store.page_del(self.root);

        let node = insert_into(store, node, key, val)?;
        let mut pieces = node.split();
        if pieces.len() == 1 {
            self.root = store.page_new(pieces.pop().expect("split returned a piece"))?;
        } else {
            // The root split: add a level referencing the pieces by their
            // first keys.
            let mut root = Node::new();
            root.set_header(NodeType::Interior, pieces.len() as u16);
            for (i, piece) in pieces.into_iter().enumerate() {
                let first_key = piece.key(0).to_vec();
                let ptr = store.page_new(piece)?;
                root.append_kv(i as u16, ptr, &first_key, b"");
            }
            self.root = store.page_new(root)?;
        }
        Ok(())
    }

    /// Deletes a key, reporting whether it was present. The tree is
    /// unchanged when the key is absent.
    pub fn delete(&mut self, store: &mut impl PageStore, key: &[u8]) -> Result<bool> {
        check_key(key)?;
        if self.root == 0 {
            return Ok(false);
        }

        let root = store.page_get(self.root)?;
        let updated = match delete_from(store, &root, key)? {
            Some(node) => node,
            None => return Ok(false),
        };

        store.page_del(self.root);
        if updated.node_type() == Some(NodeType::Interior) && updated.key_count() == 1 {
            // The root is down to one child: remove a level.
            self.root = updated.child(0);
        } else {
            self.root = store.page_new(updated)?;
        }
        Ok(true)
    }
}

fn check_key(key: &[u8]) -> Result<()> {
    ensure!(!key.is_empty(), "key must not be empty");
    ensure!(
        key.len() <= MAX_KEY_SIZE,
        "key of {} bytes exceeds the {}-byte maximum",
        key.len(),
        MAX_KEY_SIZE
    );
    Ok(())
}

/// Rebuilds `node` with `key` inserted or updated, recursing into the
/// affected child of an interior node. The result may exceed one page and
/// is split by the caller.
fn insert_into(store: &mut impl PageStore, node: Node, key: &[u8], val: &[u8]) -> Result<Node> {
    let idx = node.lookup_le(key);
    match node.node_type() {
        Some(NodeType::Leaf) => {
            if node.key(idx) == key {
                Ok(Node::leaf_update(&node, idx, key, val))
            } else {
                Ok(Node::leaf_insert(&node, idx + 1, key, val))
            }
        }
        Some(NodeType::Interior) => {
            let child_ptr = node.child(idx);
            let child = store.page_get(child_ptr)?;
            store.page_del(child_ptr);

            let child = insert_into(store, child, key, val)?;
            let pieces = child.split();
            replace_child(store, &node, idx, pieces)
        }
        _ => bail!("unexpected page type {} during insert", node.raw_type()),
    }
}

/// Rebuilds an interior node with the single slot at `idx` replaced by one
/// slot per replacement child, each keyed by its first key.
fn replace_child(
    store: &mut impl PageStore,
    old: &Node,
    idx: u16,
    children: SmallVec<[Node; 3]>,
) -> Result<Node> {
    let inc = children.len() as u16;
    let mut new = Node::scratch();
    new.set_header(NodeType::Interior, old.key_count() + inc - 1);
    new.append_range(old, 0, 0, idx);
    for (i, child) in children.into_iter().enumerate() {
        let first_key = child.key(0).to_vec();
        let ptr = store.page_new(child)?;
        new.append_kv(idx + i as u16, ptr, &first_key, b"");
    }
    new.append_range(old, idx + inc, idx + 1, old.key_count() - idx - 1);
    Ok(new)
}

/// Rebuilds an interior node with the two slots at `idx` and `idx + 1`
/// collapsed into one slot pointing at a merged child.
fn replace_merged_children(old: &Node, idx: u16, ptr: u64, first_key: &[u8]) -> Node {
    let mut new = Node::new();
    new.set_header(NodeType::Interior, old.key_count() - 1);
    new.append_range(old, 0, 0, idx);
    new.append_kv(idx, ptr, first_key, b"");
    new.append_range(old, idx + 1, idx + 2, old.key_count() - idx - 2);
    new
}

/// Recursive deletion; `None` propagates "key not found" without touching
/// the store.
fn delete_from(store: &mut impl PageStore, node: &Node, key: &[u8]) -> Result<Option<Node>> {
    let idx = node.lookup_le(key);
    match node.node_type() {
        Some(NodeType::Leaf) => {
            if node.key(idx) != key {
                return Ok(None);
            }
            Ok(Some(Node::leaf_delete(node, idx)))
        }
        Some(NodeType::Interior) => delete_from_child(store, node, idx, key),
        _ => bail!("unexpected page type {} during delete", node.raw_type()),
    }
}

/// Deletes from child `idx` of an interior node, merging the shrunken child
/// with a sibling when that keeps the result within one page.
fn delete_from_child(
    store: &mut impl PageStore,
    node: &Node,
    idx: u16,
    key: &[u8],
) -> Result<Option<Node>> {
    let child_ptr = node.child(idx);
    let child = store.page_get(child_ptr)?;
    let updated = match delete_from(store, &child, key)? {
        Some(node) => node,
        None => return Ok(None),
    };
    store.page_del(child_ptr);

    let new = match should_merge(store, node, idx, &updated)? {
        Sibling::Left(sibling_ptr, sibling) => {
            let merged = Node::merge(&sibling, &updated);
            store.page_del(sibling_ptr);
            let first_key = merged.key(0).to_vec();
            let ptr = store.page_new(merged)?;
            replace_merged_children(node, idx - 1, ptr, &first_key)
        }
        Sibling::Right(sibling_ptr, sibling) => {
            let merged = Node::merge(&updated, &sibling);
            store.page_del(sibling_ptr);
            let first_key = merged.key(0).to_vec();
            let ptr = store.page_new(merged)?;
            replace_merged_children(node, idx, ptr, &first_key)
        }
        Sibling::None => {
            assert!(
                updated.key_count() > 0,
                "deletion emptied a node below the root"
            );
            replace_child(store, node, idx, smallvec![updated])?
        }
    };
    Ok(Some(new))
}

/// A child qualifies for merging when it has shrunk below a quarter page
/// and a sibling under the same parent fits with it in a single page. The
/// left sibling wins ties.
fn should_merge(
    store: &impl PageStore,
    node: &Node,
    idx: u16,
    updated: &Node,
) -> Result<Sibling> {
    if updated.used_bytes() > PAGE_SIZE / 4 {
        return Ok(Sibling::None);
    }

    if idx > 0 {
        let ptr = node.child(idx - 1);
        let sibling = store.page_get(ptr)?;
        if sibling.used_bytes() + updated.used_bytes() - NODE_HEADER <= PAGE_SIZE {
            return Ok(Sibling::Left(ptr, sibling));
        }
    }
    if idx + 1 < node.key_count() {
        let ptr = node.child(idx + 1);
        let sibling = store.page_get(ptr)?;
        if sibling.used_bytes() + updated.used_bytes() - NODE_HEADER <= PAGE_SIZE {
            return Ok(Sibling::Right(ptr, sibling));
        }
    }
    Ok(Sibling::None)
}
