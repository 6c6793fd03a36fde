//! End-to-end persistence tests: the store is driven purely through its
//! public API, closed and reopened between phases, and checked against a
//! reference map.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use treevault::Store;

fn scratch_path(dir: &tempfile::TempDir) -> std::path::PathBuf {
    dir.path().join("store.tv")
}

#[test]
fn basic_set_get_miss() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = Store::open(scratch_path(&dir)).unwrap();

    store.set(b"a", b"1").unwrap();
    store.set(b"b", b"2").unwrap();

    assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(store.get(b"c").unwrap(), None);
}

#[test]
fn ten_thousand_keys_random_order_with_periodic_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir);

    let mut order: Vec<u32> = (0..10_000).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(0x7ee_1a01);
    order.shuffle(&mut rng);

    let mut store = Store::open(&path).unwrap();
    for (n, &i) in order.iter().enumerate() {
        let key = format!("key{:05}", i);
        let val = format!("val{:05}", i);
        store.set(key.as_bytes(), val.as_bytes()).unwrap();

        if (n + 1) % 1_000 == 0 {
            store.close();
            store = Store::open(&path).unwrap();
        }
    }
    store.close();

    let store = Store::open(&path).unwrap();
    for i in 0..10_000u32 {
        let key = format!("key{:05}", i);
        let val = format!("val{:05}", i);
        assert_eq!(
            store.get(key.as_bytes()).unwrap(),
            Some(val.into_bytes()),
            "key {} lost across reopens",
            key
        );
    }
}

#[test]
fn deletes_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir);

    let mut store = Store::open(&path).unwrap();
    for i in 0..200u32 {
        let key = format!("key{:05}", i);
        store.set(key.as_bytes(), b"v").unwrap();
    }
    for i in (0..200u32).step_by(2) {
        let key = format!("key{:05}", i);
        assert!(store.delete(key.as_bytes()).unwrap());
    }
    store.close();

    let store = Store::open(&path).unwrap();
    for i in 0..200u32 {
        let key = format!("key{:05}", i);
        let got = store.get(key.as_bytes()).unwrap();
        if i % 2 == 0 {
            assert_eq!(got, None, "deleted key {} came back", key);
        } else {
            assert_eq!(got, Some(b"v".to_vec()));
        }
    }
}

#[test]
fn repeated_set_of_same_pair_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = Store::open(scratch_path(&dir)).unwrap();

    store.set(b"k", b"v").unwrap();
    let first = store.get(b"k").unwrap();
    store.set(b"k", b"v").unwrap();

    assert_eq!(store.get(b"k").unwrap(), first);
    store.verify().unwrap();
}

#[test]
fn delete_then_get_reports_missing() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = Store::open(scratch_path(&dir)).unwrap();

    store.set(b"k", b"v").unwrap();
    assert!(store.delete(b"k").unwrap());

    assert_eq!(store.get(b"k").unwrap(), None);
}

#[test]
fn deleting_an_absent_key_still_commits() {
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir);

    let mut store = Store::open(&path).unwrap();
    store.set(b"k", b"v").unwrap();

    assert!(!store.delete(b"absent").unwrap());
    store.close();

    // the file reflects a completed commit either way
    let store = Store::open(&path).unwrap();
    assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn empty_key_rejected_on_every_operation() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = Store::open(scratch_path(&dir)).unwrap();

    assert!(store.set(b"", b"v").is_err());
    assert!(store.get(b"").is_err());
    assert!(store.delete(b"").is_err());
}

#[test]
fn exact_size_limits_accepted_one_over_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir);
    let mut store = Store::open(&path).unwrap();

    let key = vec![b'k'; 1000];
    let val = vec![b'v'; 3000];
    store.set(&key, &val).unwrap();
    store.close();

    let mut store = Store::open(&path).unwrap();
    assert_eq!(store.get(&key).unwrap(), Some(val));

    assert!(store.set(&vec![b'k'; 1001], b"v").is_err());
    assert!(store.set(b"k", &vec![b'v'; 3001]).is_err());
}
