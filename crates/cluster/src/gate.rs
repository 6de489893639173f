//! Compatibility gate
//!
//! Answers "is behavior X safe right now?" from the registry's current
//! contents. Nothing is cached: every call recomputes the minimum, so a
//! node reporting an upgrade (or a downgraded node joining) takes effect on
//! the very next decision.
//!
//! An empty registry fails closed. Until at least one node has reported,
//! no version-sensitive feature is considered safe.

use crate::feature::Feature;
use crate::registry::VersionRegistry;
use replstore_core::ClusterVersion;
use std::sync::Arc;

/// Outcome of one feature check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityDecision {
    /// Feature asked about
    pub feature: Feature,
    /// Version the feature needs
    pub required: ClusterVersion,
    /// Minimum cluster version at decision time (`None` when empty)
    pub minimum: Option<ClusterVersion>,
    /// Whether the feature may be used
    pub safe: bool,
}

/// Feature decisions derived from a [`VersionRegistry`]
#[derive(Debug, Clone)]
pub struct CompatibilityGate {
    registry: Arc<VersionRegistry>,
}

impl CompatibilityGate {
    /// Gate reading from `registry`
    pub fn new(registry: Arc<VersionRegistry>) -> Self {
        CompatibilityGate { registry }
    }

    /// Registry this gate reads from
    pub fn registry(&self) -> &Arc<VersionRegistry> {
        &self.registry
    }

    /// Lowest version reported by any node, `None` when no node reported
    pub fn minimum_cluster_version(&self) -> Option<ClusterVersion> {
        self.registry.minimum()
    }

    /// Whether every node runs at least `min`
    pub fn is_feature_safe(&self, min: &ClusterVersion) -> bool {
        self.minimum_cluster_version()
            .is_some_and(|current| &current >= min)
    }

    /// Full decision for `feature`
    pub fn decide(&self, feature: Feature) -> CompatibilityDecision {
        let required = feature.min_version();
        let minimum = self.minimum_cluster_version();
        let safe = minimum.as_ref().is_some_and(|m| m >= &required);
        CompatibilityDecision {
            feature,
            required,
            minimum,
            safe,
        }
    }

    /// Whether `feature` may be used
    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.is_feature_safe(&feature.min_version())
    }
}
