//! Version-gated store behavior during rolling upgrades
//!
//! A denied feature falls back to legacy behavior without surfacing an
//! error to the caller.

use crate::common::*;
use replstore::LOG_DIR;
use replstore_durability::{scan_segments, LogFormat, LOG_SEGMENT_PREFIX};

/// Format byte of every replication log frame, in order
fn log_formats(test: &TestStore) -> Vec<u8> {
    scan_segments(&test.path().join(LOG_DIR), LOG_SEGMENT_PREFIX, 0)
        .unwrap()
        .frames
        .iter()
        .map(|f| f.format_version)
        .collect()
}

#[test]
fn log_compression_follows_cluster_minimum() {
    let registry = registry_at(&[("n1", "2.1.0.0"), ("n2", "2.0.0.0")]);
    let test = TestStore::with_gate(CompatibilityGate::new(registry.clone()));

    // n2 lags behind: legacy format, commit still succeeds
    test.put("a", "1");
    registry.report_str("n2", "2.1.0.0").unwrap();
    test.put("b", "2");
    // a node on an older release joins
    registry.report_str("n3", "2.0.5.0").unwrap();
    test.put("c", "3");

    assert_eq!(
        log_formats(&test),
        vec![
            LogFormat::Plain.to_tag(),
            LogFormat::Compressed.to_tag(),
            LogFormat::Plain.to_tag(),
        ]
    );
    // mixed-format logs replay in full
    let entries = test.store.operations_since(0).unwrap();
    assert_eq!(entries.len(), 3);
}

#[test]
fn empty_registry_fails_closed() {
    let registry = registry_at(&[]);
    let test = TestStore::with_gate(CompatibilityGate::new(registry));
    test.put("a", "1");

    assert_eq!(log_formats(&test), vec![LogFormat::Plain.to_tag()]);
    assert!(test.store.cleanup_tombstones().unwrap().denied);
}

#[test]
fn decommissioned_laggard_unblocks_features() {
    let registry = registry_at(&[("n1", "2.1.0.0"), ("old", "1.9")]);
    let test = TestStore::with_gate(CompatibilityGate::new(registry.clone()));
    assert!(!test.store.gate().is_enabled(Feature::TombstoneCleanup));

    registry.remove("old");
    assert!(test.store.gate().is_enabled(Feature::TombstoneCleanup));
    assert!(test.store.gate().is_enabled(Feature::CompressedReplicationLog));
    test.put("a", "1");
    assert_eq!(log_formats(&test), vec![LogFormat::Compressed.to_tag()]);
}

#[test]
fn tombstone_cleanup_waits_for_upgrade() {
    let registry = registry_at(&[("n1", "2.0.0.0"), ("n2", "1.5.0.0")]);
    let config = StoreConfig::for_testing().with_tombstone_cleanup(1, 100);
    let test = TestStore::with_config(config, CompatibilityGate::new(registry.clone()));
    for key in ["a", "b", "c", "d"] {
        test.put(key, "v");
        test.delete(key);
    }

    let denied = test.store.cleanup_tombstones().unwrap();
    assert!(denied.denied);
    assert_eq!(denied.removed, 0);
    assert_eq!(test.store.status().tombstone_count, 4);

    registry.report_str("n2", "2.0.0.0").unwrap();
    let outcome = test.store.cleanup_tombstones().unwrap();
    assert!(!outcome.denied);
    assert_eq!(outcome.removed, 2);
    assert_eq!(test.store.status().tombstone_count, 2);
}
