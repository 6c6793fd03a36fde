//! Page accounting under churn: frees go onto the free list, later inserts
//! draw from it instead of growing the file, and verification accounts for
//! every committed page throughout.

use treevault::Store;

#[test]
fn wide_entries_delete_and_reinsert_reuse_pages() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = Store::open(dir.path().join("store.tv")).unwrap();

    // 900-byte keys with 3000-byte values: one entry per leaf
    let key_of = |i: u32| {
        let mut key = format!("{:05}", i).into_bytes();
        key.resize(900, b'k');
        key
    };
    let val = vec![0xABu8; 3000];

    for i in 0..500u32 {
        store.set(&key_of(i), &val).unwrap();
    }
    let stats_full = store.verify().unwrap();
    assert_eq!(stats_full.entries, 501);
    let flushed_full = store.flushed_pages();

    for i in 200..300u32 {
        assert!(store.delete(&key_of(i)).unwrap());
    }
    let stats_after = store.verify().unwrap();
    assert_eq!(stats_after.entries, 401);
    assert!(
        stats_after.free_pages >= 100,
        "dropping 100 one-entry leaves must free at least 100 pages, got {}",
        stats_after.free_pages
    );
    let flushed_after_delete = store.flushed_pages();

    // re-adding the same hundred draws almost everything from the free
    // list; the file must not grow anywhere near another hundred pages
    for i in 200..300u32 {
        store.set(&key_of(i), &val).unwrap();
    }
    store.verify().unwrap();
    assert!(
        store.flushed_pages() - flushed_after_delete < 100,
        "reinserting freed entries grew the file from {} to {} pages",
        flushed_after_delete,
        store.flushed_pages()
    );
    assert!(store.flushed_pages() >= flushed_full - 100);

    for i in 0..500u32 {
        assert_eq!(store.get(&key_of(i)).unwrap(), Some(val.clone()));
    }
}

#[test]
fn delete_everything_then_insert_draws_from_free_list() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = Store::open(dir.path().join("store.tv")).unwrap();

    for i in 0..2_000u32 {
        let key = format!("key{:05}", i);
        let val = format!("val{:05}", i);
        store.set(key.as_bytes(), val.as_bytes()).unwrap();
    }
    for i in 0..2_000u32 {
        let key = format!("key{:05}", i);
        assert!(store.delete(key.as_bytes()).unwrap());
    }

    // everything but the sentinel leaf, the free-list nodes, and the
    // master page is on the free list
    let stats = store.verify().unwrap();
    assert_eq!(stats.entries, 1, "only the sentinel should remain");
    assert_eq!(stats.tree_pages, 1);
    assert_eq!(
        stats.free_pages,
        store.flushed_pages() - 1 - stats.tree_pages - stats.list_pages
    );
    assert_eq!(store.free_pages().unwrap(), stats.free_pages);

    // the next insert is served from the free list, not by appending
    let flushed = store.flushed_pages();
    store.set(b"afterwards", b"v").unwrap();
    assert_eq!(
        store.flushed_pages(),
        flushed,
        "insert appended instead of reusing a freed page"
    );
    store.verify().unwrap();
}

#[test]
fn free_list_survives_heavy_alternation() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = Store::open(dir.path().join("store.tv")).unwrap();

    for round in 0..10u32 {
        for i in 0..100u32 {
            let key = format!("r{:02}k{:04}", round, i);
            store.set(key.as_bytes(), b"payload payload payload").unwrap();
        }
        for i in 0..100u32 {
            if i % 2 == round % 2 {
                let key = format!("r{:02}k{:04}", round, i);
                assert!(store.delete(key.as_bytes()).unwrap());
            }
        }
        store.verify().unwrap();
    }

    // file growth is bounded by reuse: ten rounds of one hundred small
    // inserts never need more than a few hundred pages
    assert!(
        store.flushed_pages() < 500,
        "page reuse failed, file grew to {} pages",
        store.flushed_pages()
    );
}
