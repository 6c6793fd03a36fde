//! # Tree Node Codec
//!
//! This module defines the packed page layout for B+tree nodes and the pure
//! structural operations over it: slot accessors, bulk slot copies, the
//! rebuild constructors used by copy-on-write mutation, and the node split
//! and merge primitives.
//!
//! ## Node Layout
//!
//! A node is one page interpreted as:
//!
//! ```text
//! Offset            Size        Field
//! ------            --------    -----------------------------------------
//! 0                 2           node type (1 = interior, 2 = leaf)
//! 2                 2           nkeys: number of keys
//! 4                 8 * nkeys   child pointers (unused in leaf slots)
//! 4 + 8n            2 * nkeys   key offsets (see below)
//! 4 + 10n           packed      entries: klen:2 | vlen:2 | key | val
//! ```
//!
//! All integers are little-endian. The offset array stores, for each slot i,
//! the offset of the *end* of slot i's entry relative to the start of the
//! entry region; slot 0 implicitly begins at offset 0, so `offset(0)` is a
//! constant 0 and slot i's entry spans `offset(i)..offset(i + 1)`.
//!
//! ## Rebuild Discipline
//!
//! Nodes are immutable once allocated; every mutation rebuilds the affected
//! node left-to-right into a fresh buffer with `append_range` (bulk slot
//! copy) and `append_kv` (single entry append). A rebuild in flight may
//! exceed one page by at most one oversized entry, so working buffers are
//! two pages and the result is cut back to one page per piece by `split`.
//!
//! ## Interior Node Invariant
//!
//! The key stored for a child slot equals the first key of that child, and
//! the first entry of the first leaf is a zero-length sentinel key. Slot 0
//! of any node is therefore never greater than a lookup key, which is why
//! `lookup_le` starts scanning at slot 1.

use std::cmp::Ordering;

use smallvec::{smallvec, SmallVec};

use crate::config::{NODE_HEADER, PAGE_SIZE};

/// Type tag stored in the first two bytes of every page.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Interior = 1,
    Leaf = 2,
    FreeList = 3,
}

impl NodeType {
    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(NodeType::Interior),
            2 => Some(NodeType::Leaf),
            3 => Some(NodeType::FreeList),
            _ => None,
        }
    }
}

/// An owned page image interpreted as a tree node.
///
/// The buffer is one page for nodes read from storage and two pages for a
/// rebuild in flight; `into_page` cuts a finished node back to page size.
#[derive(Debug, Clone)]
pub struct Node {
    data: Vec<u8>,
}

impl Node {
    /// A zeroed page-sized node.
    pub fn new() -> Self {
        Self {
            data: vec![0u8; PAGE_SIZE],
        }
    }

    /// A zeroed double-page working buffer for a rebuild that may overflow
    /// one page before being split.
    pub fn scratch() -> Self {
        Self {
            data: vec![0u8; 2 * PAGE_SIZE],
        }
    }

    /// Copies a page image into an owned node.
    pub fn from_page(bytes: &[u8]) -> Self {
        assert_eq!(
            bytes.len(),
            PAGE_SIZE,
            "page image must be exactly {} bytes",
            PAGE_SIZE
        );
        Self {
            data: bytes.to_vec(),
        }
    }

    /// Consumes the node, returning a page-sized buffer ready to be staged.
    ///
    /// The node contents must fit a single page; a node still exceeding
    /// `PAGE_SIZE` here is a missed split and aborts.
    pub fn into_page(mut self) -> Vec<u8> {
        let used = self.used_bytes();
        assert!(
            used <= PAGE_SIZE,
            "node of {} bytes does not fit a {}-byte page",
            used,
            PAGE_SIZE
        );
        self.data.truncate(PAGE_SIZE);
        self.data
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn read_u16(&self, pos: usize) -> u16 {
        u16::from_le_bytes(self.data[pos..pos + 2].try_into().unwrap())
    }

    fn write_u16(&mut self, pos: usize, val: u16) {
        self.data[pos..pos + 2].copy_from_slice(&val.to_le_bytes());
    }

    fn read_u64(&self, pos: usize) -> u64 {
        u64::from_le_bytes(self.data[pos..pos + 8].try_into().unwrap())
    }

    fn write_u64(&mut self, pos: usize, val: u64) {
        self.data[pos..pos + 8].copy_from_slice(&val.to_le_bytes());
    }

    // ------------------------------------------------------------------
    // header
    // ------------------------------------------------------------------

    pub fn raw_type(&self) -> u16 {
        self.read_u16(0)
    }

    pub fn node_type(&self) -> Option<NodeType> {
        NodeType::from_u16(self.raw_type())
    }

    pub fn key_count(&self) -> u16 {
        self.read_u16(2)
    }

    /// Sets the node type and final key count. Must be called before any
    /// slot is written: the pointer, offset, and entry positions all derive
    /// from the key count.
    pub fn set_header(&mut self, node_type: NodeType, nkeys: u16) {
        self.set_header_raw(node_type as u16, nkeys);
    }

    fn set_header_raw(&mut self, raw_type: u16, nkeys: u16) {
        self.write_u16(0, raw_type);
        self.write_u16(2, nkeys);
    }

    // ------------------------------------------------------------------
    // child pointers
    // ------------------------------------------------------------------

    pub fn child(&self, idx: u16) -> u64 {
        assert!(
            idx < self.key_count(),
            "child index {} out of range ({} keys)",
            idx,
            self.key_count()
        );
        self.read_u64(NODE_HEADER + 8 * idx as usize)
    }

    pub fn set_child(&mut self, idx: u16, ptr: u64) {
        assert!(
            idx < self.key_count(),
            "child index {} out of range ({} keys)",
            idx,
            self.key_count()
        );
        self.write_u64(NODE_HEADER + 8 * idx as usize, ptr);
    }

    // ------------------------------------------------------------------
    // key offsets
    // ------------------------------------------------------------------

    fn offset_pos(&self, idx: u16) -> usize {
        NODE_HEADER + 8 * self.key_count() as usize + 2 * (idx as usize - 1)
    }

    /// Offset of the end of slot `idx - 1` (equivalently, the start of slot
    /// `idx`) relative to the entry region. `offset(0)` is always 0.
    pub fn offset(&self, idx: u16) -> u16 {
        assert!(
            idx <= self.key_count(),
            "offset index {} out of range ({} keys)",
            idx,
            self.key_count()
        );
        if idx == 0 {
            return 0;
        }
        self.read_u16(self.offset_pos(idx))
    }

    pub fn set_offset(&mut self, idx: u16, offset: u16) {
        assert!(
            idx >= 1 && idx <= self.key_count(),
            "offset index {} out of writable range 1..={}",
            idx,
            self.key_count()
        );
        let pos = self.offset_pos(idx);
        self.write_u16(pos, offset);
    }

    // ------------------------------------------------------------------
    // entries
    // ------------------------------------------------------------------

    /// Byte position of slot `idx`'s entry; `kv_pos(nkeys)` is the end of
    /// the last entry and therefore the node size.
    pub fn kv_pos(&self, idx: u16) -> usize {
        assert!(
            idx <= self.key_count(),
            "entry index {} out of range ({} keys)",
            idx,
            self.key_count()
        );
        NODE_HEADER + 10 * self.key_count() as usize + self.offset(idx) as usize
    }

    /// The key of slot `idx`, borrowed from the page image.
    pub fn key(&self, idx: u16) -> &[u8] {
        assert!(
            idx < self.key_count(),
            "key index {} out of range ({} keys)",
            idx,
            self.key_count()
        );
        let pos = self.kv_pos(idx);
        let klen = self.read_u16(pos) as usize;
        &self.data[pos + 4..pos + 4 + klen]
    }

    /// The value of slot `idx`, borrowed from the page image.
    pub fn value(&self, idx: u16) -> &[u8] {
        assert!(
            idx < self.key_count(),
            "value index {} out of range ({} keys)",
            idx,
            self.key_count()
        );
        let pos = self.kv_pos(idx);
        let klen = self.read_u16(pos) as usize;
        let vlen = self.read_u16(pos + 2) as usize;
        &self.data[pos + 4 + klen..pos + 4 + klen + vlen]
    }

    /// Node size in bytes: header, slot arrays, and all entries.
    pub fn used_bytes(&self) -> usize {
        self.kv_pos(self.key_count())
    }

    // ------------------------------------------------------------------
    // lookup
    // ------------------------------------------------------------------

    /// Largest slot index whose key is less than or equal to `key`.
    ///
    /// Slot 0 is skipped: in an interior node it carries a copy of an
    /// ancestor separator and in the leftmost leaf it is the sentinel, so
    /// it is never greater than any lookup key and remains the fallback
    /// when every later key is greater.
    pub fn lookup_le(&self, key: &[u8]) -> u16 {
        let nkeys = self.key_count();
        let mut found = 0;
        for i in 1..nkeys {
            match self.key(i).cmp(key) {
                Ordering::Less => found = i,
                Ordering::Equal => return i,
                Ordering::Greater => break,
            }
        }
        found
    }

    // ------------------------------------------------------------------
    // construction
    // ------------------------------------------------------------------

    /// Appends one entry at slot `idx` and records the end offset of the
    /// slot. Nodes are built strictly left to right.
    pub fn append_kv(&mut self, idx: u16, ptr: u64, key: &[u8], val: &[u8]) {
        self.set_child(idx, ptr);
        let pos = self.kv_pos(idx);
        self.write_u16(pos, key.len() as u16);
        self.write_u16(pos + 2, val.len() as u16);
        self.data[pos + 4..pos + 4 + key.len()].copy_from_slice(key);
        self.data[pos + 4 + key.len()..pos + 4 + key.len() + val.len()].copy_from_slice(val);
        self.set_offset(idx + 1, self.offset(idx) + 4 + (key.len() + val.len()) as u16);
    }

    /// Copies `n` consecutive slots from `src` starting at `src_idx` into
    /// this node starting at `dst_idx`: child pointers slot for slot,
    /// offsets rebased onto this node's offset at `dst_idx`, and the entry
    /// bytes in one bulk copy.
    ///
    /// The destination header must already carry the final key count; all
    /// slot positions derive from it.
    pub fn append_range(&mut self, src: &Node, dst_idx: u16, src_idx: u16, n: u16) {
        assert!(
            src_idx + n <= src.key_count(),
            "source range {}..{} out of bounds ({} keys)",
            src_idx,
            src_idx + n,
            src.key_count()
        );
        assert!(
            dst_idx + n <= self.key_count(),
            "destination range {}..{} out of bounds ({} keys)",
            dst_idx,
            dst_idx + n,
            self.key_count()
        );
        if n == 0 {
            return;
        }

        for i in 0..n {
            self.set_child(dst_idx + i, src.child(src_idx + i));
        }

        let dst_begin = self.offset(dst_idx);
        let src_begin = src.offset(src_idx);
        for i in 1..=n {
            let offset = dst_begin + src.offset(src_idx + i) - src_begin;
            self.set_offset(dst_idx + i, offset);
        }

        let begin = src.kv_pos(src_idx);
        let end = src.kv_pos(src_idx + n);
        let dst_pos = self.kv_pos(dst_idx);
        self.data[dst_pos..dst_pos + (end - begin)].copy_from_slice(&src.data[begin..end]);
    }

    /// Rebuilds `old` with a new entry inserted at slot `idx`.
    pub fn leaf_insert(old: &Node, idx: u16, key: &[u8], val: &[u8]) -> Node {
        let mut new = Node::scratch();
        new.set_header(NodeType::Leaf, old.key_count() + 1);
        new.append_range(old, 0, 0, idx);
        new.append_kv(idx, 0, key, val);
        new.append_range(old, idx + 1, idx, old.key_count() - idx);
        new
    }

    /// Rebuilds `old` with the entry at slot `idx` replaced.
    pub fn leaf_update(old: &Node, idx: u16, key: &[u8], val: &[u8]) -> Node {
        let mut new = Node::scratch();
        new.set_header(NodeType::Leaf, old.key_count());
        new.append_range(old, 0, 0, idx);
        new.append_kv(idx, 0, key, val);
        new.append_range(old, idx + 1, idx + 1, old.key_count() - idx - 1);
        new
    }

    /// Rebuilds `old` with the entry at slot `idx` removed.
    pub fn leaf_delete(old: &Node, idx: u16) -> Node {
        let mut new = Node::new();
        new.set_header(NodeType::Leaf, old.key_count() - 1);
        new.append_range(old, 0, 0, idx);
        new.append_range(old, idx, idx + 1, old.key_count() - idx - 1);
        new
    }

    /// Concatenates two siblings. The caller must have verified that the
    /// combined size fits one page.
    pub fn merge(left: &Node, right: &Node) -> Node {
        debug_assert_eq!(left.raw_type(), right.raw_type());
        let mut new = Node::new();
        new.set_header_raw(left.raw_type(), left.key_count() + right.key_count());
        new.append_range(left, 0, 0, left.key_count());
        new.append_range(right, left.key_count(), 0, right.key_count());
        new
    }

    // ------------------------------------------------------------------
    // splitting
    // ------------------------------------------------------------------

    /// Splits an oversized node in two at the smallest prefix whose
    /// remainder fits one page. The right piece is guaranteed to fit; the
    /// left piece may still overflow and be split again.
    fn split_in_two(&self) -> (Node, Node) {
        let nkeys = self.key_count();
        assert!(nkeys >= 2, "cannot split a node with {} keys", nkeys);
        let total = self.used_bytes();

        let mut idx: u16 = 0;
        let mut prefix = 0usize;
        while total - prefix > PAGE_SIZE - NODE_HEADER {
            assert!(idx < nkeys - 1, "split point ran past the node end");
            // per-slot footprint: pointer, offset, length prefixes, entry
            prefix += 8 + 2 + 4 + self.key(idx).len() + self.value(idx).len();
            idx += 1;
        }

        let mut left = Node::scratch();
        left.set_header_raw(self.raw_type(), idx);
        left.append_range(self, 0, 0, idx);

        let mut right = Node::new();
        right.set_header_raw(self.raw_type(), nkeys - idx);
        right.append_range(self, 0, idx, nkeys - idx);

        (left, right)
    }

    /// Splits a node into one, two, or three page-sized pieces.
    ///
    /// One insertion grows a node by at most one maximum-size entry, so two
    /// extra pages always absorb the overflow; a left piece that still
    /// exceeds a page after the second split is unreachable and aborts.
    pub fn split(mut self) -> SmallVec<[Node; 3]> {
        if self.used_bytes() <= PAGE_SIZE {
            self.data.truncate(PAGE_SIZE);
            return smallvec![self];
        }

        let (mut left, right) = self.split_in_two();
        if left.used_bytes() <= PAGE_SIZE {
            left.data.truncate(PAGE_SIZE);
            return smallvec![left, right];
        }

        let (mut leftleft, middle) = left.split_in_two();
        assert!(
            leftleft.used_bytes() <= PAGE_SIZE,
            "node still exceeds a page after a three-way split"
        );
        leftleft.data.truncate(PAGE_SIZE);
        smallvec![leftleft, middle, right]
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}
