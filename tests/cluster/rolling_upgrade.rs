//! A store following its cluster through a rolling upgrade

use crate::common::*;
use replstore::LOG_DIR;
use replstore_durability::{scan_segments, LogFormat, LOG_SEGMENT_PREFIX};

#[test]
fn store_enables_features_as_nodes_upgrade() {
    let registry = registry_at(&[("n1", "1.9.0.0"), ("n2", "1.9.0.0"), ("n3", "1.9.0.0")]);
    let config = StoreConfig::for_testing().with_tombstone_cleanup(0, 100);
    let test = TestStore::with_config(config, CompatibilityGate::new(registry.clone()));

    // start of the upgrade: everything legacy, nothing fails
    test.put("a", "1");
    test.delete("a");
    test.put("b", "1");
    test.delete("b");
    assert!(test.store.cleanup_tombstones().unwrap().denied);

    // two of three nodes upgraded: still legacy
    registry.report_str("n1", "2.1.0.0").unwrap();
    registry.report_str("n2", "2.1.0.0").unwrap();
    test.put("c", "1");
    assert!(test.store.cleanup_tombstones().unwrap().denied);

    // n3 halfway: cleanup allowed, compression not yet
    registry.report_str("n3", "2.0.0.0").unwrap();
    test.put("d", "1");
    let outcome = test.store.cleanup_tombstones().unwrap();
    assert!(!outcome.denied);
    assert_eq!(outcome.removed, 1);

    // fully upgraded
    registry.report_str("n3", "2.1.0.0").unwrap();
    test.put("e", "1");

    let formats: Vec<u8> = scan_segments(&test.path().join(LOG_DIR), LOG_SEGMENT_PREFIX, 0)
        .unwrap()
        .frames
        .iter()
        .map(|f| f.format_version)
        .collect();
    let plain = LogFormat::Plain.to_tag();
    let compressed = LogFormat::Compressed.to_tag();
    assert_eq!(formats, vec![plain, plain, plain, plain, plain, plain, compressed]);

    // every entry replays regardless of format
    let test = test.reopen();
    for key in ["c", "d", "e"] {
        assert_eq!(test.get(key), Some(b"1".to_vec()));
    }
    assert_eq!(test.store.operations_since(0).unwrap().len(), 7);
}

#[test]
fn late_joining_old_node_downgrades_silently() {
    let registry = registry_at(&[("n1", "2.1.0.0")]);
    let test = TestStore::with_gate(CompatibilityGate::new(registry.clone()));
    test.put("a", "1");

    registry.report_str("old", "1.0").unwrap();
    // commits keep succeeding in the legacy format
    test.put("b", "2");
    registry.remove("old");
    test.put("c", "3");

    let formats: Vec<u8> = scan_segments(&test.path().join(LOG_DIR), LOG_SEGMENT_PREFIX, 0)
        .unwrap()
        .frames
        .iter()
        .map(|f| f.format_version)
        .collect();
    assert_eq!(
        formats,
        vec![
            LogFormat::Compressed.to_tag(),
            LogFormat::Plain.to_tag(),
            LogFormat::Compressed.to_tag()
        ]
    );
}
