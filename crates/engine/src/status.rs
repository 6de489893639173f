//! Replica health and status reporting

use replstore_core::{ProviderKind, SequenceNumber};
use std::fmt;

/// Whether the replica may serve requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthState {
    /// Normal operation
    Serving,
    /// A storage fault left work in the replication log; `recover()` must
    /// run before the replica serves again
    NeedsRecovery {
        /// What failed
        reason: String,
    },
    /// Corruption detected; out-of-band repair required
    Faulted {
        /// What was found
        reason: String,
    },
}

impl HealthState {
    /// Whether requests are accepted
    pub fn is_serving(&self) -> bool {
        matches!(self, HealthState::Serving)
    }

    /// Whether the replica is permanently down
    pub fn is_faulted(&self) -> bool {
        matches!(self, HealthState::Faulted { .. })
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Serving => write!(f, "serving"),
            HealthState::NeedsRecovery { reason } => write!(f, "needs recovery: {}", reason),
            HealthState::Faulted { reason } => write!(f, "faulted: {}", reason),
        }
    }
}

/// Point-in-time replica status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStatus {
    /// Store name from the identity header
    pub name: String,
    /// Engine backing the store
    pub provider_kind: ProviderKind,
    /// Live records
    pub row_count_estimate: usize,
    /// Approximate bytes held by the engine
    pub logical_size_estimate: usize,
    /// Highest sequence number visible to new transactions
    pub last_committed_sequence_number: SequenceNumber,
    /// Tombstones not yet purged
    pub tombstone_count: usize,
    /// Highest sequence number among purged tombstones
    pub tombstone_low_watermark: SequenceNumber,
    /// Transactions begun and not yet finished
    pub active_transactions: usize,
    /// Replication log segments on disk
    pub log_segments: usize,
    /// Health
    pub health: HealthState,
    /// One-line human-readable summary
    pub status_details: String,
}

/// Result of one tombstone cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupOutcome {
    /// Tombstones removed
    pub removed: usize,
    /// Backend low watermark after the pass
    pub low_watermark: SequenceNumber,
    /// The cluster version gate denied cleanup
    pub denied: bool,
}

/// Result of a checkpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    /// Identifier assigned by the engine
    pub checkpoint_id: u64,
    /// Highest sequence number the checkpoint covers
    pub sequence_number: SequenceNumber,
    /// Replication log segments dropped afterwards
    pub log_segments_removed: usize,
}

/// Result of `ReplicatedStore::recover`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Highest sequence number after recovery
    pub last_sequence_number: SequenceNumber,
    /// Operations the engine replayed from its own log
    pub backend_replayed: usize,
    /// Records applied from the replication log
    pub log_replayed: usize,
    /// Bytes of torn tail removed from the engine and replication logs
    pub truncated_bytes: u64,
    /// Active transactions retired by the reset
    pub retired_transactions: usize,
}
