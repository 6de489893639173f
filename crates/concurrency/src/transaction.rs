//! Transaction state for optimistic concurrency control
//!
//! A [`Transaction`] buffers its writes privately and records the sequence
//! number it observed for every key it read. Nothing reaches the backend
//! until the manager commits it.
//!
//! ## Lifecycle
//!
//! ```text
//! Active ──commit──► Committing ──► Committed
//!   │                    │
//!   ├──abort─────────────┴────────► Aborted { reason }
//!   └──reaped (idle)──────────────► Aborted { "timed out" }
//! ```
//!
//! A transaction is owned by one caller. The manager keeps only a shared
//! handle so the reaper can retire idle transactions without
//! touching the caller's buffered state.

use parking_lot::Mutex;
use replstore_core::{Key, SequenceNumber, StoreError, StoreResult, WriteOp};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::snapshot::VisibleVersion;

const PHASE_ACTIVE: u8 = 0;
const PHASE_COMMITTING: u8 = 1;
const PHASE_FINISHED: u8 = 2;
const PHASE_REAPED: u8 = 3;

/// Status of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Transaction is executing, can read/write
    Active,
    /// Transaction is being validated and applied
    Committing,
    /// Transaction committed successfully
    Committed,
    /// Transaction was aborted
    Aborted {
        /// Human-readable reason for abort
        reason: String,
    },
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Active => write!(f, "active"),
            TransactionStatus::Committing => write!(f, "committing"),
            TransactionStatus::Committed => write!(f, "committed"),
            TransactionStatus::Aborted { reason } => write!(f, "aborted ({})", reason),
        }
    }
}

/// What a transaction saw when it read a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedVersion {
    /// Sequence number of the version read (0 = absent)
    pub sequence_number: SequenceNumber,
    /// Whether the version read was a tombstone
    pub tombstone: bool,
}

impl From<&VisibleVersion> for ObservedVersion {
    fn from(v: &VisibleVersion) -> Self {
        ObservedVersion {
            sequence_number: v.sequence_number,
            tombstone: v.is_tombstone(),
        }
    }
}

/// Part of a transaction shared with the manager's registry
#[derive(Debug)]
pub(crate) struct TxnHandle {
    pub(crate) txn_id: u64,
    pub(crate) start_sequence_number: SequenceNumber,
    started_at: Instant,
    last_activity: Mutex<Instant>,
    phase: AtomicU8,
    reaped_idle_ms: AtomicU64,
}

impl TxnHandle {
    pub(crate) fn new(txn_id: u64, start_sequence_number: SequenceNumber) -> Self {
        let now = Instant::now();
        TxnHandle {
            txn_id,
            start_sequence_number,
            started_at: now,
            last_activity: Mutex::new(now),
            phase: AtomicU8::new(PHASE_ACTIVE),
            reaped_idle_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub(crate) fn idle(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Retire an idle transaction; fails once it started committing
    pub(crate) fn try_reap(&self, idle: Duration) -> bool {
        let won = self
            .phase
            .compare_exchange(PHASE_ACTIVE, PHASE_REAPED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.reaped_idle_ms
                .store(idle.as_millis() as u64, Ordering::Release);
        }
        won
    }

    fn try_transition(&self, to: u8) -> bool {
        self.phase
            .compare_exchange(PHASE_ACTIVE, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish(&self) {
        self.phase.store(PHASE_FINISHED, Ordering::Release);
    }

    fn is_reaped(&self) -> bool {
        self.phase.load(Ordering::Acquire) == PHASE_REAPED
    }
}

/// A transaction's private state
///
/// Obtained from [`crate::TransactionManager::begin`].
#[derive(Debug)]
pub struct Transaction {
    handle: Arc<TxnHandle>,
    /// Keys read with the version observed at the snapshot
    read_set: HashMap<Key, ObservedVersion>,
    /// Buffered writes, applied in key order at commit
    write_set: BTreeMap<Key, WriteOp>,
    status: TransactionStatus,
}

impl Transaction {
    pub(crate) fn new(handle: Arc<TxnHandle>) -> Self {
        Transaction {
            handle,
            read_set: HashMap::new(),
            write_set: BTreeMap::new(),
            status: TransactionStatus::Active,
        }
    }

    /// Transaction id
    pub fn txn_id(&self) -> u64 {
        self.handle.txn_id
    }

    /// Sequence number of the snapshot this transaction reads from
    pub fn start_sequence_number(&self) -> SequenceNumber {
        self.handle.start_sequence_number
    }

    /// Current status
    pub fn status(&self) -> &TransactionStatus {
        &self.status
    }

    /// Whether the transaction can still read and write
    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active && !self.handle.is_reaped()
    }

    /// Time since begin
    pub fn elapsed(&self) -> Duration {
        self.handle.started_at.elapsed()
    }

    /// Fail unless the transaction is `Active`
    ///
    /// A transaction the reaper retired is moved to `Aborted` here and
    /// reported as `Timeout`.
    pub fn ensure_active(&mut self) -> StoreResult<()> {
        if self.status == TransactionStatus::Active && self.handle.is_reaped() {
            self.status = TransactionStatus::Aborted {
                reason: "timed out".to_string(),
            };
            self.write_set.clear();
            return Err(StoreError::Timeout {
                txn_id: self.txn_id(),
                idle_ms: self.handle.reaped_idle_ms.load(Ordering::Acquire),
            });
        }
        if self.status != TransactionStatus::Active {
            return Err(StoreError::TransactionNotActive {
                txn_id: self.txn_id(),
                state: self.status.to_string(),
            });
        }
        Ok(())
    }

    /// Buffer a write of `value` under `key`
    pub fn put(&mut self, key: Key, value: Vec<u8>) -> StoreResult<()> {
        self.write(key, WriteOp::Put(value))
    }

    /// Buffer a delete of `key`
    pub fn delete(&mut self, key: Key) -> StoreResult<()> {
        self.write(key, WriteOp::Delete)
    }

    /// Buffer `op` for `key`, replacing any earlier write to the same key
    pub fn write(&mut self, key: Key, op: WriteOp) -> StoreResult<()> {
        self.ensure_active()?;
        self.handle.touch();
        self.write_set.insert(key, op);
        Ok(())
    }

    /// Buffered write for `key`, if any
    pub fn buffered(&self, key: &Key) -> Option<&WriteOp> {
        self.write_set.get(key)
    }

    /// Remember the first version observed for `key`
    pub(crate) fn record_read(&mut self, key: Key, observed: ObservedVersion) {
        self.handle.touch();
        self.read_set.entry(key).or_insert(observed);
    }

    pub(crate) fn touch(&self) {
        self.handle.touch();
    }

    /// Observed version for `key`
    pub fn read_version(&self, key: &Key) -> Option<ObservedVersion> {
        self.read_set.get(key).copied()
    }

    /// Keys read and the versions observed
    pub fn read_set(&self) -> &HashMap<Key, ObservedVersion> {
        &self.read_set
    }

    /// Buffered writes in key order
    pub fn write_set(&self) -> &BTreeMap<Key, WriteOp> {
        &self.write_set
    }

    /// Number of keys read
    pub fn read_count(&self) -> usize {
        self.read_set.len()
    }

    /// Number of buffered writes
    pub fn write_count(&self) -> usize {
        self.write_set.len()
    }

    /// Whether commit would write nothing
    pub fn is_read_only(&self) -> bool {
        self.write_set.is_empty()
    }

    pub(crate) fn handle(&self) -> &Arc<TxnHandle> {
        &self.handle
    }

    /// `Active` → `Committing`
    ///
    /// Loses to a concurrent reap, in which case the caller sees `Timeout`.
    pub(crate) fn mark_committing(&mut self) -> StoreResult<()> {
        self.ensure_active()?;
        if !self.handle.try_transition(PHASE_COMMITTING) {
            return self.ensure_active();
        }
        self.status = TransactionStatus::Committing;
        Ok(())
    }

    /// `Committing` → `Committed`
    pub(crate) fn mark_committed(&mut self) {
        self.handle.finish();
        self.status = TransactionStatus::Committed;
    }

    /// `Active` or `Committing` → `Aborted`
    ///
    /// Buffered writes are discarded; the read set is kept for diagnostics.
    pub(crate) fn mark_aborted(&mut self, reason: impl Into<String>) -> StoreResult<()> {
        match &self.status {
            TransactionStatus::Committed => Err(StoreError::TransactionNotActive {
                txn_id: self.txn_id(),
                state: self.status.to_string(),
            }),
            TransactionStatus::Aborted { .. } => Ok(()),
            TransactionStatus::Active | TransactionStatus::Committing => {
                if self.status == TransactionStatus::Active {
                    // a reaped transaction stays reaped
                    self.handle.try_transition(PHASE_FINISHED);
                } else {
                    self.handle.finish();
                }
                self.status = TransactionStatus::Aborted {
                    reason: reason.into(),
                };
                self.write_set.clear();
                Ok(())
            }
        }
    }
}
