//! Version registry behavior

use crate::common::*;
use chrono::{Duration, Utc};
use std::sync::Arc;
use std::thread;

fn v(s: &str) -> ClusterVersion {
    ClusterVersion::parse(s).unwrap()
}

#[test]
fn repeated_report_leaves_snapshot_unchanged() {
    let registry = VersionRegistry::new();
    assert!(registry.report_str("n1", "2.1.0.0").unwrap());
    let before = registry.snapshot();

    assert!(!registry.report_str("n1", "2.1.0.0").unwrap());
    assert_eq!(registry.snapshot(), before);
    assert_eq!(registry.len(), 1);
}

#[test]
fn one_entry_per_node() {
    let registry = VersionRegistry::new();
    registry.report_str("n1", "1.0").unwrap();
    registry.report_str("n1", "2.0").unwrap();
    registry.report_str("n2", "1.5").unwrap();

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot["n1"], v("2.0"));
    assert_eq!(snapshot["n2"], v("1.5"));
}

#[test]
fn later_wall_clock_report_wins() {
    let registry = VersionRegistry::new();
    let now = Utc::now();
    registry.report_at("n1", v("2.1.0.0"), now).unwrap();

    // delayed report sent before the upgrade
    let changed = registry
        .report_at("n1", v("2.0.0.0"), now - Duration::seconds(5))
        .unwrap();
    assert!(!changed);
    assert_eq!(registry.get("n1"), Some(v("2.1.0.0")));

    registry
        .report_at("n1", v("2.2.0.0"), now + Duration::seconds(5))
        .unwrap();
    assert_eq!(registry.get("n1"), Some(v("2.2.0.0")));
    assert_eq!(
        registry.entries()["n1"].reported_at,
        now + Duration::seconds(5)
    );
}

#[test]
fn remove_forgets_node() {
    let registry = VersionRegistry::new();
    registry.report_str("n1", "2.0").unwrap();
    assert_eq!(registry.remove("n1"), Some(v("2.0")));
    assert_eq!(registry.remove("n1"), None);
    assert!(registry.is_empty());
    assert!(registry.snapshot().is_empty());
}

#[test]
fn invalid_reports_rejected() {
    let registry = VersionRegistry::new();
    assert!(matches!(
        registry.report_str("n1", "2.x"),
        Err(StoreError::Validation(_))
    ));
    assert!(matches!(
        registry.report_str("", "2.0"),
        Err(StoreError::Validation(_))
    ));
    assert!(registry.is_empty());
}

#[test]
fn version_string_echoed_exactly() {
    let registry = VersionRegistry::new();
    registry.report_str("n1", "6.4.0617.09590").unwrap();
    assert_eq!(registry.get("n1").unwrap().version(), "6.4.0617.09590");
}

#[test]
fn concurrent_nodes_report_independently() {
    let registry = Arc::new(VersionRegistry::new());
    let handles: Vec<_> = (0..8)
        .map(|n| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let node = format!("node-{}", n);
                for minor in 0..50 {
                    registry
                        .report_str(&node, &format!("2.{}.0.0", minor))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.len(), 8);
    assert!(snapshot.values().all(|version| *version == v("2.49.0.0")));
}
