//! Version-sensitive store behaviors

use replstore_core::ClusterVersion;
use std::fmt;

/// A behavior that is only safe once every node runs a recent enough version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Write replication log entries in the zstd-compressed format
    ///
    /// Older nodes can only decode the plain format.
    CompressedReplicationLog,
    /// Physically purge old tombstones
    ///
    /// Older secondaries expect every delete to stay enumerable.
    TombstoneCleanup,
}

impl Feature {
    /// Every feature, in declaration order
    pub const ALL: [Feature; 2] = [Feature::CompressedReplicationLog, Feature::TombstoneCleanup];

    /// Lowest cluster version at which the feature is safe
    pub fn min_version(self) -> ClusterVersion {
        match self {
            Feature::CompressedReplicationLog => ClusterVersion::from_components(&[2, 1, 0, 0]),
            Feature::TombstoneCleanup => ClusterVersion::from_components(&[2, 0, 0, 0]),
        }
    }

    /// Stable name used in logs and configuration
    pub fn as_str(self) -> &'static str {
        match self {
            Feature::CompressedReplicationLog => "compressed_replication_log",
            Feature::TombstoneCleanup => "tombstone_cleanup",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
