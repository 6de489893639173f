//! ACID Property Tests
//!
//! - Atomicity: a batch is visible in full or not at all
//! - Isolation: snapshots, read-your-writes, first-committer-wins
//! - Linearization: concurrent commits get disjoint, increasing sequences

use crate::common::*;
use replstore::TransactionStatus;
use std::collections::BTreeMap;
use std::sync::{Arc, Barrier};
use std::thread;

// ============================================================================
// Atomicity
// ============================================================================

#[test]
fn atomicity_batch_visible_together() {
    let test = TestStore::new();
    let store = &test.store;

    let mut txn = store.begin_transaction().unwrap();
    for key in ["c", "a", "b"] {
        store.put(&mut txn, Key::from(key), key.as_bytes().to_vec()).unwrap();
    }
    let result = store.commit(&mut txn).unwrap();

    // applied in key order with consecutive sequence numbers
    let keys: Vec<_> = result.records.iter().map(|r| r.key.clone()).collect();
    assert_eq!(keys, vec![Key::from("a"), Key::from("b"), Key::from("c")]);
    assert_eq!(result.first_sequence_number(), 1);
    assert_eq!(result.last_sequence_number(), 3);
    for key in ["a", "b", "c"] {
        assert_eq!(test.get(key), Some(key.as_bytes().to_vec()));
    }
}

#[test]
fn atomicity_aborted_writes_never_visible() {
    let test = TestStore::new();
    let store = &test.store;

    let mut txn = store.begin_transaction().unwrap();
    store.put(&mut txn, Key::from("k"), b"v".to_vec()).unwrap();
    store.abort(&mut txn).unwrap();

    assert_eq!(test.get("k"), None);
    assert_eq!(store.last_committed_sequence_number(), 0);
    assert!(matches!(txn.status(), TransactionStatus::Aborted { .. }));
}

// ============================================================================
// Isolation
// ============================================================================

#[test]
fn read_your_writes_before_commit() {
    let test = TestStore::new();
    let store = &test.store;

    let mut writer = store.begin_transaction().unwrap();
    store.put(&mut writer, Key::from("k"), b"mine".to_vec()).unwrap();
    assert_eq!(
        store.read(&mut writer, &Key::from("k")).unwrap(),
        Some(b"mine".to_vec())
    );

    // nobody else sees it yet
    assert_eq!(test.get("k"), None);

    store.delete(&mut writer, Key::from("k")).unwrap();
    assert_eq!(store.read(&mut writer, &Key::from("k")).unwrap(), None);
}

#[test]
fn snapshot_ignores_later_commits() {
    let test = TestStore::new();
    let store = &test.store;
    test.put("k", "v1");

    let mut reader = store.begin_transaction().unwrap();
    test.put("k", "v2");
    test.delete("k");
    test.put("other", "x");

    assert_eq!(
        store.read(&mut reader, &Key::from("k")).unwrap(),
        Some(b"v1".to_vec())
    );
    assert_eq!(store.read(&mut reader, &Key::from("other")).unwrap(), None);
    assert_eq!(test.get("other"), Some(b"x".to_vec()));
}

#[test]
fn stale_read_conflicts_and_discards_writes() {
    let test = TestStore::new();
    let store = &test.store;
    test.put("balance", "100");

    let mut t1 = store.begin_transaction().unwrap();
    let seen = store.read(&mut t1, &Key::from("balance")).unwrap();
    assert_eq!(seen, Some(b"100".to_vec()));
    store.put(&mut t1, Key::from("audit"), b"read 100".to_vec()).unwrap();

    test.put("balance", "50");

    let err = store.commit(&mut t1).unwrap_err();
    assert!(err.is_conflict());
    assert!(err.is_retryable());
    assert!(matches!(t1.status(), TransactionStatus::Aborted { .. }));
    assert_eq!(test.get("audit"), None);
    assert_eq!(test.get("balance"), Some(b"50".to_vec()));
}

#[test]
fn read_of_absent_key_conflicts_with_insert() {
    let test = TestStore::new();
    let store = &test.store;

    let mut t1 = store.begin_transaction().unwrap();
    assert_eq!(store.read(&mut t1, &Key::from("slot")).unwrap(), None);
    store.put(&mut t1, Key::from("slot"), b"t1".to_vec()).unwrap();

    test.put("slot", "t2");

    assert!(store.commit(&mut t1).unwrap_err().is_conflict());
    assert_eq!(test.get("slot"), Some(b"t2".to_vec()));
}

#[test]
fn blind_writes_do_not_conflict() {
    let test = TestStore::new();
    let store = &test.store;

    let mut t1 = store.begin_transaction().unwrap();
    let mut t2 = store.begin_transaction().unwrap();
    store.put(&mut t1, Key::from("k"), b"1".to_vec()).unwrap();
    store.put(&mut t2, Key::from("k"), b"2".to_vec()).unwrap();

    store.commit(&mut t1).unwrap();
    store.commit(&mut t2).unwrap();
    assert_eq!(test.get("k"), Some(b"2".to_vec()));
}

#[test]
fn retry_after_conflict_succeeds() {
    let test = TestStore::new();
    let store = &test.store;
    test.put("counter", "0");

    let mut t1 = store.begin_transaction().unwrap();
    store.read(&mut t1, &Key::from("counter")).unwrap();
    test.put("counter", "1");
    store.put(&mut t1, Key::from("counter"), b"1".to_vec()).unwrap();
    assert!(store.commit(&mut t1).unwrap_err().is_conflict());

    let mut retry = store.begin_transaction().unwrap();
    let current = store.read(&mut retry, &Key::from("counter")).unwrap();
    assert_eq!(current, Some(b"1".to_vec()));
    store.put(&mut retry, Key::from("counter"), b"2".to_vec()).unwrap();
    store.commit(&mut retry).unwrap();
    assert_eq!(test.get("counter"), Some(b"2".to_vec()));
}

#[test]
fn committed_transaction_cannot_be_aborted() {
    let test = TestStore::new();
    let store = &test.store;

    let mut txn = store.begin_transaction().unwrap();
    store.put(&mut txn, Key::from("k"), b"v".to_vec()).unwrap();
    store.commit(&mut txn).unwrap();

    assert!(matches!(
        store.abort(&mut txn),
        Err(StoreError::TransactionNotActive { .. })
    ));
    assert_eq!(test.get("k"), Some(b"v".to_vec()));
}

#[test]
fn read_only_commit_assigns_no_sequence() {
    let test = TestStore::new();
    let store = &test.store;
    test.put("k", "v");

    let mut txn = store.begin_transaction().unwrap();
    store.read(&mut txn, &Key::from("k")).unwrap();
    let result = store.commit(&mut txn).unwrap();
    assert!(result.is_read_only());
    assert_eq!(store.last_committed_sequence_number(), 1);
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn concurrent_disjoint_commits_all_succeed() {
    const THREADS: usize = 8;
    const COMMITS: usize = 25;

    let test = TestStore::new();
    let store = Arc::clone(&test.store);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let key = Key::from(format!("thread-{}", t));
                let mut seqs = Vec::with_capacity(COMMITS);
                for i in 0..COMMITS {
                    let mut txn = store.begin_transaction().unwrap();
                    store.read(&mut txn, &key).unwrap();
                    store
                        .put(&mut txn, key.clone(), i.to_string().into_bytes())
                        .unwrap();
                    let result = store.commit(&mut txn).unwrap();
                    seqs.push(result.last_sequence_number());
                }
                seqs
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        let seqs = handle.join().unwrap();
        // per key: strictly increasing in commit order
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        all.extend(seqs);
    }

    // no overlapping ranges and no gaps
    all.sort_unstable();
    let expected: Vec<u64> = (1..=(THREADS * COMMITS) as u64).collect();
    assert_eq!(all, expected);
    assert_eq!(
        store.last_committed_sequence_number(),
        (THREADS * COMMITS) as u64
    );
    for t in 0..THREADS {
        assert_eq!(
            get(&store, &format!("thread-{}", t)),
            Some((COMMITS - 1).to_string().into_bytes())
        );
    }
}

#[test]
fn concurrent_increments_lose_no_updates() {
    const THREADS: usize = 4;
    const INCREMENTS: usize = 20;

    let test = TestStore::new();
    test.put("counter", "0");
    let store = Arc::clone(&test.store);

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let key = Key::from("counter");
                let mut done = 0;
                while done < INCREMENTS {
                    let mut txn = store.begin_transaction().unwrap();
                    let current: u64 = String::from_utf8(
                        store.read(&mut txn, &key).unwrap().unwrap(),
                    )
                    .unwrap()
                    .parse()
                    .unwrap();
                    store
                        .put(&mut txn, key.clone(), (current + 1).to_string().into_bytes())
                        .unwrap();
                    match store.commit(&mut txn) {
                        Ok(_) => done += 1,
                        Err(e) if e.is_conflict() => continue,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(
        get(&store, "counter"),
        Some((THREADS * INCREMENTS).to_string().into_bytes())
    );
}

#[test]
fn readers_see_consistent_snapshots_during_writes() {
    let test = TestStore::new();
    test.put("a", "0");
    test.put("b", "0");
    let store = Arc::clone(&test.store);

    // writer keeps a == b
    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 1..=50u32 {
                let mut txn = store.begin_transaction().unwrap();
                let v = i.to_string().into_bytes();
                store.put(&mut txn, Key::from("a"), v.clone()).unwrap();
                store.put(&mut txn, Key::from("b"), v).unwrap();
                store.commit(&mut txn).unwrap();
            }
        })
    };

    let mut observed = BTreeMap::new();
    for _ in 0..50 {
        let mut txn = store.begin_transaction().unwrap();
        let a = store.read(&mut txn, &Key::from("a")).unwrap();
        let b = store.read(&mut txn, &Key::from("b")).unwrap();
        assert_eq!(a, b);
        *observed.entry(a).or_insert(0) += 1;
        store.abort(&mut txn).unwrap();
    }
    writer.join().unwrap();
    assert!(!observed.is_empty());
}
