//! Reported node versions
//!
//! One entry per node id. Reports are idempotent: repeating the same
//! version only refreshes its timestamp. When two reports for one node
//! race, the one with the later wall-clock timestamp wins regardless of
//! arrival order.
//!
//! The registry is an ordinary owned value. Whoever tracks membership
//! creates it, shares it by `Arc` with the gate, and drops it when the
//! node leaves; there is no process-wide instance.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use replstore_core::{ClusterVersion, StoreError, StoreResult};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// What the registry holds for one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Version the node reported
    pub version: ClusterVersion,
    /// Wall-clock time of the report
    pub reported_at: DateTime<Utc>,
}

/// Latest reported version per node
#[derive(Debug, Default)]
pub struct VersionRegistry {
    entries: DashMap<String, RegistryEntry>,
}

impl VersionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `version` for `node_id` as of now
    ///
    /// Returns whether the node's stored version changed.
    pub fn report(&self, node_id: &str, version: ClusterVersion) -> StoreResult<bool> {
        self.report_at(node_id, version, Utc::now())
    }

    /// Parse `version` and record it for `node_id`
    pub fn report_str(&self, node_id: &str, version: &str) -> StoreResult<bool> {
        self.report(node_id, ClusterVersion::parse(version)?)
    }

    /// Record `version` for `node_id` as reported at `reported_at`
    ///
    /// A report older than the stored one is ignored. Returns whether the
    /// node's stored version changed.
    pub fn report_at(
        &self,
        node_id: &str,
        version: ClusterVersion,
        reported_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        if node_id.is_empty() {
            return Err(StoreError::validation("node id must not be empty"));
        }
        match self.entries.entry(node_id.to_string()) {
            Entry::Vacant(slot) => {
                info!(node_id, version = %version, "Node joined version registry");
                slot.insert(RegistryEntry {
                    version,
                    reported_at,
                });
                Ok(true)
            }
            Entry::Occupied(mut slot) => {
                let current = slot.get();
                if reported_at < current.reported_at {
                    debug!(node_id, version = %version, "Ignoring stale version report");
                    return Ok(false);
                }
                let changed = current.version != version;
                if changed {
                    info!(
                        node_id,
                        from = %current.version,
                        to = %version,
                        "Node reported new version"
                    );
                }
                slot.insert(RegistryEntry {
                    version,
                    reported_at,
                });
                Ok(changed)
            }
        }
    }

    /// Forget `node_id`, returning its last version
    pub fn remove(&self, node_id: &str) -> Option<ClusterVersion> {
        let removed = self.entries.remove(node_id).map(|(_, e)| e.version);
        if removed.is_some() {
            info!(node_id, "Node left version registry");
        }
        removed
    }

    /// Version last reported by `node_id`
    pub fn get(&self, node_id: &str) -> Option<ClusterVersion> {
        self.entries.get(node_id).map(|e| e.version.clone())
    }

    /// Node id → version, in node id order
    pub fn snapshot(&self) -> BTreeMap<String, ClusterVersion> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().version.clone()))
            .collect()
    }

    /// Node id → full entry, in node id order
    pub fn entries(&self) -> BTreeMap<String, RegistryEntry> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Lowest version any node reported, `None` when empty
    pub fn minimum(&self) -> Option<ClusterVersion> {
        self.entries.iter().map(|e| e.value().version.clone()).min()
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no node has reported
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
