//! Replication log on disk

use crate::common::*;
use replstore_core::{Record, RecordState};
use replstore_durability::{
    LogFormat, ReadStopReason, ReplicationEntry, ReplicationLog, ReplicationLogConfig,
    LOG_SEGMENT_PREFIX,
};
use replstore_storage::testing::SegmentCorruptor;
use tempfile::TempDir;

fn entry(txn_id: u64, first_seq: u64, keys: &[&str]) -> ReplicationEntry {
    let records = keys
        .iter()
        .enumerate()
        .map(|(i, k)| {
            Record::live(
                Key::from(*k),
                vec![b'x'; 64],
                first_seq + i as u64,
                RecordState::Inserted,
            )
        })
        .collect();
    ReplicationEntry::new(txn_id, records)
}

fn open(dir: &TempDir) -> ReplicationLog {
    ReplicationLog::open(dir.path(), ReplicationLogConfig::for_testing())
        .unwrap()
        .0
}

#[test]
fn entries_survive_reopen_in_both_formats() {
    let dir = tempfile::tempdir().unwrap();
    {
        let log = open(&dir);
        log.append(&entry(1, 1, &["a", "b"]), LogFormat::Plain).unwrap();
        log.append(&entry(2, 3, &["c"]), LogFormat::Compressed).unwrap();
    }

    let (log, recovery) =
        ReplicationLog::open(dir.path(), ReplicationLogConfig::for_testing()).unwrap();
    assert_eq!(recovery.entries.len(), 2);
    assert_eq!(recovery.stop_reason, ReadStopReason::EndOfData);
    assert_eq!(recovery.truncated_bytes, 0);
    let expected = entry(1, 1, &["a", "b"]);
    assert_eq!(recovery.entries[0].txn_id, expected.txn_id);
    assert_eq!(recovery.entries[0].records, expected.records);
    assert_eq!(recovery.entries[1].records[0].key, Key::from("c"));
    assert_eq!(log.last_sequence_number(), 3);
}

#[test]
fn append_rejects_overlapping_sequences() {
    let dir = tempfile::tempdir().unwrap();
    let log = open(&dir);
    log.append(&entry(1, 1, &["a", "b"]), LogFormat::Plain).unwrap();
    assert!(log.append(&entry(2, 2, &["c"]), LogFormat::Plain).is_err());
    assert_eq!(log.last_sequence_number(), 2);
}

#[test]
fn segments_rotate_and_truncate() {
    let dir = tempfile::tempdir().unwrap();
    let log = ReplicationLog::open(
        dir.path(),
        ReplicationLogConfig::for_testing().with_segment_size(1024),
    )
    .unwrap()
    .0;
    for i in 0..40u64 {
        log.append(&entry(i + 1, i + 1, &["k"]), LogFormat::Plain).unwrap();
    }
    let segments = log.segment_count();
    assert!(segments > 2);

    let removed = log.truncate_through(20).unwrap();
    assert!(removed > 0);
    assert_eq!(log.segment_count(), segments - removed);

    // nothing after 20 was dropped
    let tail = log.entries_since(20).unwrap();
    assert_eq!(tail.first().unwrap().first_sequence_number(), 21);
    assert_eq!(tail.len(), 20);
}

#[test]
fn torn_tail_is_cut_off() {
    let dir = tempfile::tempdir().unwrap();
    {
        let log = open(&dir);
        log.append(&entry(1, 1, &["a"]), LogFormat::Plain).unwrap();
        log.append(&entry(2, 2, &["b"]), LogFormat::Plain).unwrap();
    }
    let corruptor = SegmentCorruptor::new(dir.path(), LOG_SEGMENT_PREFIX);
    corruptor.truncate_tail(5).unwrap();

    let (log, recovery) =
        ReplicationLog::open(dir.path(), ReplicationLogConfig::for_testing()).unwrap();
    assert_eq!(recovery.entries.len(), 1);
    assert!(recovery.truncated_bytes > 0);
    assert!(matches!(
        recovery.stop_reason,
        ReadStopReason::PartialRecord { .. } | ReadStopReason::ChecksumMismatch { .. }
    ));

    // the repaired log accepts the lost sequence again
    log.append(&entry(3, 2, &["b"]), LogFormat::Plain).unwrap();
    assert_eq!(log.last_sequence_number(), 2);
}

#[test]
fn damaged_closed_segment_is_corruption() {
    let dir = tempfile::tempdir().unwrap();
    {
        let log = ReplicationLog::open(
            dir.path(),
            ReplicationLogConfig::for_testing().with_segment_size(1024),
        )
        .unwrap()
        .0;
        for i in 0..30u64 {
            log.append(&entry(i + 1, i + 1, &["k"]), LogFormat::Plain).unwrap();
        }
    }
    let corruptor = SegmentCorruptor::new(dir.path(), LOG_SEGMENT_PREFIX);
    // oldest segment, well inside its last frame
    assert!(corruptor.flip_byte_from_end(0, 10).unwrap());

    let err = ReplicationLog::open(dir.path(), ReplicationLogConfig::for_testing())
        .err()
        .unwrap();
    assert!(matches!(err, StoreError::Corruption(_)));
}
