//! Compatibility gate decisions

use crate::common::*;
use proptest::prelude::*;
use std::sync::Arc;

fn v(s: &str) -> ClusterVersion {
    ClusterVersion::parse(s).unwrap()
}

#[test]
fn minimum_tracks_least_upgraded_node() {
    let registry = registry_at(&[("n1", "2.1.0.0"), ("n2", "2.0.0.0")]);
    let gate = CompatibilityGate::new(Arc::clone(&registry));

    assert_eq!(gate.minimum_cluster_version().unwrap().version(), "2.0.0.0");
    assert!(!gate.is_feature_safe(&v("2.1.0.0")));

    registry.report_str("n2", "2.1.0.0").unwrap();
    assert!(gate.is_feature_safe(&v("2.1.0.0")));

    registry.report_str("n2", "2.2.0.0").unwrap();
    assert_eq!(gate.minimum_cluster_version().unwrap().version(), "2.1.0.0");
}

#[test]
fn empty_registry_is_unsafe_for_everything() {
    let gate = CompatibilityGate::new(registry_at(&[]));
    assert_eq!(gate.minimum_cluster_version(), None);
    assert!(!gate.is_feature_safe(&v("0")));
    for feature in Feature::ALL {
        let decision = gate.decide(feature);
        assert!(!decision.safe);
        assert_eq!(decision.minimum, None);
        assert_eq!(decision.required, feature.min_version());
    }
}

#[test]
fn prefix_version_sorts_below_longer() {
    let gate = CompatibilityGate::new(registry_at(&[("n1", "2.1")]));
    assert!(!gate.is_feature_safe(&v("2.1.0.0")));
    assert!(gate.is_feature_safe(&v("2.1")));
    assert!(gate.is_feature_safe(&v("2.0.9.9")));
}

#[test]
fn decision_reports_inputs() {
    let gate = CompatibilityGate::new(registry_at(&[("n1", "2.0.5.0")]));
    let compressed = gate.decide(Feature::CompressedReplicationLog);
    assert!(!compressed.safe);
    assert_eq!(compressed.minimum, Some(v("2.0.5.0")));
    assert_eq!(compressed.required.version(), "2.1.0.0");

    let cleanup = gate.decide(Feature::TombstoneCleanup);
    assert!(cleanup.safe);
    assert!(gate.is_enabled(Feature::TombstoneCleanup));
}

#[test]
fn clones_share_the_registry() {
    let registry = registry_at(&[("n1", "1.0")]);
    let gate = CompatibilityGate::new(Arc::clone(&registry));
    let clone = gate.clone();
    registry.report_str("n1", "3.0").unwrap();
    assert!(clone.is_enabled(Feature::CompressedReplicationLog));
    assert!(Arc::ptr_eq(gate.registry(), clone.registry()));
}

fn version_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..20, 1..5)
}

proptest! {
    #[test]
    fn gate_matches_pointwise_minimum(
        versions in prop::collection::vec(version_strategy(), 1..8),
        required in version_strategy(),
    ) {
        let registry = Arc::new(VersionRegistry::new());
        for (i, components) in versions.iter().enumerate() {
            registry
                .report(&format!("n{}", i), ClusterVersion::from_components(components))
                .unwrap();
        }
        let gate = CompatibilityGate::new(registry);
        let required = ClusterVersion::from_components(&required);

        let expected = versions
            .iter()
            .all(|c| ClusterVersion::from_components(c) >= required);
        prop_assert_eq!(gate.is_feature_safe(&required), expected);
    }

    #[test]
    fn ordering_is_componentwise(a in version_strategy(), b in version_strategy()) {
        let va = ClusterVersion::from_components(&a);
        let vb = ClusterVersion::from_components(&b);
        prop_assert_eq!(va.cmp(&vb), a.cmp(&b));
        prop_assert_eq!(va == vb, a == b);
    }
}
