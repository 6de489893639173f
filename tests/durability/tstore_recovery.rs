//! Engine contract conformance and TStore crash recovery

use crate::common::*;
use replstore_core::{ProviderBackend, RecordState};
use replstore_storage::testing::{MemoryBackend, SegmentCorruptor};
use replstore_storage::{TStoreBackend, TStoreConfig};
use tempfile::TempDir;

fn tstore(dir: &TempDir) -> TStoreBackend {
    let backend = TStoreBackend::open(dir.path(), TStoreConfig::for_testing()).unwrap();
    backend.recover().unwrap();
    backend
}

/// Behavior every engine must share
fn check_contract(backend: &dyn ProviderBackend) {
    let k = Key::from("k");
    assert_eq!(backend.put(k.clone(), b"1".to_vec(), Some(0)).unwrap(), 1);
    assert_eq!(backend.get(&k).unwrap().unwrap().state, RecordState::Inserted);

    // optimistic concurrency
    let err = backend.put(k.clone(), b"2".to_vec(), Some(0)).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Conflict {
            expected: 0,
            actual: 1,
            ..
        }
    ));
    assert_eq!(backend.put(k.clone(), b"2".to_vec(), Some(1)).unwrap(), 2);
    assert_eq!(backend.get(&k).unwrap().unwrap().state, RecordState::Updated);

    // deletes leave tombstones; deleting nothing consumes nothing
    backend.delete(&k, Some(2)).unwrap();
    assert!(backend.get(&k).unwrap().unwrap().is_tombstone());
    backend.delete(&Key::from("absent"), None).unwrap();
    assert_eq!(backend.stats().last_sequence_number, 3);
    assert_eq!(backend.stats().tombstone_count, 1);

    // a tombstone reads as sequence 3, re-insert starts a new life
    assert_eq!(backend.put(k.clone(), b"3".to_vec(), Some(3)).unwrap(), 4);
    assert_eq!(backend.get(&k).unwrap().unwrap().state, RecordState::Inserted);
}

fn check_enumerate_resumes(backend: &dyn ProviderBackend) {
    for i in 0..10 {
        backend
            .put(Key::from(format!("user:{:02}", i)), vec![i as u8], None)
            .unwrap();
    }
    backend.put(Key::from("order:1"), vec![], None).unwrap();

    let mut cursor = backend.enumerate(b"user:", None).unwrap();
    let first: Vec<_> = cursor.by_ref().take(4).map(|r| r.unwrap().key).collect();
    assert_eq!(first.len(), 4);
    let token = cursor.resume_token().unwrap();
    drop(cursor);

    let rest: Vec<_> = backend
        .enumerate(b"user:", Some(&token))
        .unwrap()
        .map(|r| r.unwrap().key)
        .collect();
    assert_eq!(rest.len(), 6);
    assert_eq!(rest[0], Key::from("user:04"));
    assert!(rest.iter().all(|k| k.starts_with(b"user:")));
}

#[test]
fn tstore_satisfies_engine_contract() {
    let dir = tempfile::tempdir().unwrap();
    check_contract(&tstore(&dir));
}

#[test]
fn memory_engine_satisfies_engine_contract() {
    check_contract(&MemoryBackend::new(ProviderKind::Ese));
}

#[test]
fn enumerate_is_restartable() {
    let dir = tempfile::tempdir().unwrap();
    check_enumerate_resumes(&tstore(&dir));
    check_enumerate_resumes(&MemoryBackend::new(ProviderKind::Ese));
}

#[test]
fn resume_token_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let token = {
        let backend = tstore(&dir);
        for i in 0..6 {
            backend
                .put(Key::from(format!("k{}", i)), vec![], None)
                .unwrap();
        }
        let mut cursor = backend.enumerate(b"k", None).unwrap();
        cursor.next().unwrap().unwrap();
        cursor.next().unwrap().unwrap();
        cursor.resume_token().unwrap().to_bytes()
    };

    let backend = tstore(&dir);
    let token = replstore_core::ResumeToken::from_bytes(&token);
    let keys: Vec<_> = backend
        .enumerate(b"k", Some(&token))
        .unwrap()
        .map(|r| r.unwrap().key)
        .collect();
    assert_eq!(keys.first(), Some(&Key::from("k2")));
    assert_eq!(keys.len(), 4);
}

#[test]
fn checkpoint_and_log_tail_recover_together() {
    let dir = tempfile::tempdir().unwrap();
    {
        let backend = tstore(&dir);
        backend.put(Key::from("a"), b"1".to_vec(), None).unwrap();
        backend.put(Key::from("b"), b"1".to_vec(), None).unwrap();
        let ticket = backend.begin_checkpoint().unwrap();
        assert_eq!(ticket.sequence_number, 2);
        backend.complete_checkpoint(ticket).unwrap();
        backend.delete(&Key::from("a"), None).unwrap();
        backend.put(Key::from("c"), b"1".to_vec(), None).unwrap();
    }

    let backend = TStoreBackend::open(dir.path(), TStoreConfig::for_testing()).unwrap();
    let info = backend.recover().unwrap();
    assert_eq!(info.last_sequence_number, 4);
    assert_eq!(info.record_count, 3);
    assert_eq!(info.tombstone_count, 1);
    assert!(backend.get(&Key::from("a")).unwrap().unwrap().is_tombstone());
    assert!(backend.get(&Key::from("c")).unwrap().is_some());
}

#[test]
fn torn_engine_log_tail_drops_last_operation() {
    let dir = tempfile::tempdir().unwrap();
    {
        let backend = tstore(&dir);
        backend.put(Key::from("a"), b"1".to_vec(), None).unwrap();
        backend.put(Key::from("b"), b"1".to_vec(), None).unwrap();
    }
    SegmentCorruptor::new(dir.path(), "ops")
        .truncate_tail(2)
        .unwrap();

    let backend = TStoreBackend::open(dir.path(), TStoreConfig::for_testing()).unwrap();
    let info = backend.recover().unwrap();
    assert_eq!(info.last_sequence_number, 1);
    assert!(info.truncated_bytes > 0);
    assert!(backend.get(&Key::from("b")).unwrap().is_none());
    // the engine keeps working after the repair
    assert_eq!(backend.put(Key::from("b"), b"2".to_vec(), None).unwrap(), 2);
}
