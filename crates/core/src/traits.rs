//! Provider backend contract
//!
//! Every storage engine implements [`ProviderBackend`]. The transactional
//! core only ever talks to an engine through this trait, and a store is
//! bound to exactly one implementation for its lifetime.
//!
//! # Sequence Numbers
//!
//! The backend owns the sequence allocator. Each successful `put` or
//! `delete` of a live key is assigned `last + 1`, where `last` is the
//! highest sequence number the backend has ever assigned (tombstone
//! purges never lower it). `0` is never assigned and means "absent".
//!
//! # Durability
//!
//! A mutation returns only after it is durable. A failed mutation leaves
//! no trace after `recover()`.

use crate::error::StoreResult;
use crate::provider::ProviderKind;
use crate::types::{Key, Record, SequenceNumber};

/// Opaque position for resuming an enumeration
///
/// Holds the last key handed out; a resumed enumeration continues with
/// the first key strictly greater than it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeToken {
    after: Key,
}

impl ResumeToken {
    /// Token positioned after `key`
    pub fn after(key: Key) -> Self {
        ResumeToken { after: key }
    }

    /// Last key returned before the token was taken
    pub fn last_key(&self) -> &Key {
        &self.after
    }

    /// Serialize for hand-off to a remote caller
    pub fn to_bytes(&self) -> Vec<u8> {
        self.after.as_bytes().to_vec()
    }

    /// Rebuild from bytes produced by [`ResumeToken::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        ResumeToken {
            after: Key::from(bytes),
        }
    }
}

/// Lazy, finite cursor over records in key order
///
/// Tombstones are included; callers that only want live data filter on
/// [`Record::is_tombstone`].
pub trait RecordCursor: Iterator<Item = StoreResult<Record>> {
    /// Position after the last record yielded, if any was yielded
    fn resume_token(&self) -> Option<ResumeToken>;
}

/// Handle for a checkpoint between `begin_checkpoint` and `complete_checkpoint`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointTicket {
    /// Monotonic checkpoint identifier
    pub checkpoint_id: u64,
    /// Highest sequence number captured by the checkpoint
    pub sequence_number: SequenceNumber,
}

/// Summary of a backend recovery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryInfo {
    /// Highest sequence number ever assigned
    pub last_sequence_number: SequenceNumber,
    /// Records (live and tombstones) present after recovery
    pub record_count: usize,
    /// Tombstones present after recovery
    pub tombstone_count: usize,
    /// Log operations replayed on top of the last checkpoint
    pub replayed_operations: usize,
    /// Bytes of torn log tail discarded
    pub truncated_bytes: u64,
}

/// Result of a tombstone purge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeOutcome {
    /// Tombstones physically removed
    pub removed: usize,
    /// Highest sequence number among removed tombstones (0 if none)
    pub low_watermark: SequenceNumber,
}

/// Point-in-time counters reported by a backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Highest sequence number ever assigned
    pub last_sequence_number: SequenceNumber,
    /// Live records
    pub live_count: usize,
    /// Tombstones not yet purged
    pub tombstone_count: usize,
    /// Approximate bytes held by live records and tombstones
    pub logical_size: usize,
    /// Highest sequence number among purged tombstones (0 if none)
    pub tombstone_low_watermark: SequenceNumber,
}

/// Storage contract every engine implements
///
/// Thread safety: all methods may be called concurrently.
pub trait ProviderBackend: Send + Sync {
    /// Kind tag of this engine
    fn kind(&self) -> ProviderKind;

    /// Current counters
    fn stats(&self) -> BackendStats;

    /// Current record for `key`, tombstones included
    fn get(&self, key: &Key) -> StoreResult<Option<Record>>;

    /// Store `value` under `key`
    ///
    /// With `expected = Some(seq)` the write only happens when the key's
    /// current sequence number (0 if absent) equals `seq`; otherwise it
    /// fails with `Conflict`. Returns the newly assigned sequence number.
    fn put(
        &self,
        key: Key,
        value: Vec<u8>,
        expected: Option<SequenceNumber>,
    ) -> StoreResult<SequenceNumber>;

    /// Replace a live key with a tombstone
    ///
    /// Deleting an absent or already deleted key is a no-op that consumes
    /// no sequence number. `expected` behaves as in [`ProviderBackend::put`].
    fn delete(&self, key: &Key, expected: Option<SequenceNumber>) -> StoreResult<()>;

    /// Enumerate records whose key starts with `prefix`
    fn enumerate<'a>(
        &'a self,
        prefix: &[u8],
        resume: Option<&ResumeToken>,
    ) -> StoreResult<Box<dyn RecordCursor + 'a>>;

    /// Start a durability snapshot
    fn begin_checkpoint(&self) -> StoreResult<CheckpointTicket>;

    /// Finish the checkpoint started with `ticket`
    fn complete_checkpoint(&self, ticket: CheckpointTicket) -> StoreResult<()>;

    /// Restore the last consistent state from durable storage
    fn recover(&self) -> StoreResult<RecoveryInfo>;

    /// Physically remove up to `limit` tombstones with sequence numbers
    /// below `below`, oldest first
    ///
    /// The highest-sequence tombstone in the store is never removed.
    /// Engines without tombstone cleanup keep the default no-op.
    fn purge_tombstones(&self, below: SequenceNumber, limit: usize) -> StoreResult<PurgeOutcome> {
        let _ = (below, limit);
        Ok(PurgeOutcome::default())
    }
}
