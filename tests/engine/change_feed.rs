//! Change feed ordering and delivery

use crate::common::*;
use replstore::RecordState;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn feed_reports_each_write_with_state() {
    let test = TestStore::new();
    let mut feed = test.store.subscribe();

    test.put("k", "1");
    test.put("k", "2");
    test.delete("k");

    let events = feed.drain();
    let states: Vec<_> = events.iter().map(|e| e.state).collect();
    assert_eq!(
        states,
        vec![
            RecordState::Inserted,
            RecordState::Updated,
            RecordState::Deleted
        ]
    );
    let seqs: Vec<_> = events.iter().map(|e| e.sequence_number).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
    assert!(events.iter().all(|e| e.key == Key::from("k")));
}

#[test]
fn batch_events_share_the_transaction() {
    let test = TestStore::new();
    let mut feed = test.store.subscribe();

    let mut txn = test.store.begin_transaction().unwrap();
    for key in ["z", "m", "a"] {
        test.store.put(&mut txn, Key::from(key), b"v".to_vec()).unwrap();
    }
    let result = test.store.commit(&mut txn).unwrap();

    let events = feed.drain();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.txn_id == result.txn_id));
    let keys: Vec<_> = events.iter().map(|e| e.key.clone()).collect();
    assert_eq!(keys, vec![Key::from("a"), Key::from("m"), Key::from("z")]);
}

#[test]
fn conflicted_and_aborted_transactions_publish_nothing() {
    let test = TestStore::new();
    test.put("k", "0");
    let mut feed = test.store.subscribe();

    let mut aborted = test.store.begin_transaction().unwrap();
    test.store.put(&mut aborted, Key::from("x"), b"v".to_vec()).unwrap();
    test.store.abort(&mut aborted).unwrap();

    let mut stale = test.store.begin_transaction().unwrap();
    test.store.read(&mut stale, &Key::from("k")).unwrap();
    test.put("k", "1");
    test.store.put(&mut stale, Key::from("k"), b"2".to_vec()).unwrap();
    assert!(test.store.commit(&mut stale).is_err());

    let events = feed.drain();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].sequence_number, 2);
}

#[test]
fn every_subscriber_sees_commit_order_under_concurrency() {
    const THREADS: usize = 4;
    const COMMITS: usize = 25;

    let test = TestStore::new();
    let mut first = test.store.subscribe();
    let mut second = test.store.subscribe();
    let store = Arc::clone(&test.store);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..COMMITS {
                    put(&store, &format!("t{}-{}", t, i), "v");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = (THREADS * COMMITS) as u64;
    for feed in [&mut first, &mut second] {
        let seqs: Vec<_> = feed.drain().iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, (1..=total).collect::<Vec<_>>());
    }
}

#[test]
fn subscriber_waits_for_next_commit() {
    let test = TestStore::new();
    let mut feed = test.store.subscribe();
    let store = Arc::clone(&test.store);

    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        put(&store, "late", "v");
    });
    let event = feed.next_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(event.key, Key::from("late"));
    writer.join().unwrap();
}

#[test]
fn subscription_starts_at_subscribe_time() {
    let test = TestStore::new();
    test.put("before", "v");
    let mut feed = test.store.subscribe();
    test.put("after", "v");

    let events: Vec<_> = feed.by_ref().collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].key, Key::from("after"));
    assert_eq!(feed.last_seen(), 2);
}
