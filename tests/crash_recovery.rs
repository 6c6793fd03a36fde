//! Crash-consistency tests: interrupted commits are simulated by putting
//! the master page back to its pre-commit image, which is exactly what a
//! crash between the data fsync and the master-page write leaves behind.

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;

use treevault::config::{DB_SIGNATURE, PAGE_SIZE};
use treevault::Store;

/// Overwrites the master page with the given root/flushed pair, leaving
/// every data page in place.
fn rewrite_master(path: &std::path::Path, root: u64, flushed: u64) {
    let mut master = [0u8; 32];
    master[..16].copy_from_slice(DB_SIGNATURE);
    master[16..24].copy_from_slice(&root.to_le_bytes());
    master[24..32].copy_from_slice(&flushed.to_le_bytes());

    let file = OpenOptions::new().write(true).open(path).unwrap();
    file.write_all_at(&master, 0).unwrap();
    file.sync_all().unwrap();
}

#[test]
fn lost_master_write_rolls_back_to_previous_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.tv");

    let mut store = Store::open(&path).unwrap();
    store.set(b"x", b"1").unwrap();
    store.close();

    // the first commit's data pages are on disk, but the master still
    // shows the empty store
    rewrite_master(&path, 0, 1);

    let mut store = Store::open(&path).unwrap();
    assert_eq!(store.get(b"x").unwrap(), None, "half-committed state leaked");

    // the store remains writable from the rolled-back state
    store.set(b"y", b"2").unwrap();
    assert_eq!(store.get(b"y").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn lost_master_write_after_second_commit_keeps_first() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.tv");

    let mut store = Store::open(&path).unwrap();
    store.set(b"stable", b"old").unwrap();
    let root_after_first = store.root_page();
    let flushed_after_first = store.flushed_pages();
    store.set(b"stable", b"new").unwrap();
    store.close();

    // crash swallowed the second commit's master write; copy-on-write
    // guarantees the first tree is still intact on disk
    rewrite_master(&path, root_after_first, flushed_after_first);

    let store = Store::open(&path).unwrap();
    assert_eq!(store.get(b"stable").unwrap(), Some(b"old".to_vec()));
}

#[test]
fn corrupt_signature_is_rejected_at_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.tv");

    let mut store = Store::open(&path).unwrap();
    store.set(b"k", b"v").unwrap();
    store.close();

    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.write_all_at(b"NotTreeVault\0\0\0\0", 0).unwrap();
    drop(file);

    let result = Store::open(&path);
    assert!(result.is_err());
}

#[test]
fn out_of_range_counters_are_rejected_at_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.tv");

    let mut store = Store::open(&path).unwrap();
    store.set(b"k", b"v").unwrap();
    let file_pages = store.flushed_pages();
    store.close();

    // flushed beyond the file
    rewrite_master(&path, 1, u64::MAX / PAGE_SIZE as u64);
    assert!(Store::open(&path).is_err());

    // root at or past flushed
    rewrite_master(&path, file_pages, file_pages);
    assert!(Store::open(&path).is_err());
}

#[test]
fn rejected_writes_leave_the_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.tv");

    let mut store = Store::open(&path).unwrap();
    store.set(b"k", b"v").unwrap();
    store.close();
    let before = std::fs::read(&path).unwrap();

    let mut store = Store::open(&path).unwrap();
    assert!(store.set(b"", b"v").is_err());
    assert!(store.set(b"big", &vec![0u8; 4001]).is_err());
    store.close();

    let after = std::fs::read(&path).unwrap();
    assert_eq!(before, after, "a rejected write modified the file");
}
