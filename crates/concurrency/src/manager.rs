//! Transaction manager coordinating snapshots and commits
//!
//! Provides atomic multi-key commit by orchestrating:
//! 1. Validation (first-committer-wins on the read set)
//! 2. Replication log append (durability)
//! 3. Backend application (visibility)
//!
//! Invariants:
//! - All-or-nothing commit: a batch is either absent from the log or
//!   present in full, and replay finishes any partially applied batch
//! - Log before backend: nothing reaches the backend that is not logged
//! - Sequence ranges of two commits never overlap
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. mark_committing()       - Active → Committing (loses to the reaper)
//! 2. take the commit mutex
//! 3. validate_read_set()     - any divergence: abort, return Conflict
//! 4. plan writes             - key order, seq = backend last + 1 ..
//! 5. log.append(entry)       - DURABILITY POINT
//! 6. index.install()         - keep old versions for pinned snapshots
//! 7. apply to backend        - key order, assigned seq must match plan
//! 8. advance visible seq, mark_committed(), release the snapshot pin
//! ```
//!
//! A crash before step 5 leaves no trace. A crash after step 5 is repaired
//! on recovery by replaying the log into the backend.

use crate::snapshot::{SnapshotPins, VersionIndex, VisibleVersion};
use crate::transaction::{ObservedVersion, Transaction, TxnHandle};
use crate::validation::validate_read_set;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use replstore_core::{
    Key, ProviderBackend, Record, RecordState, SequenceNumber, StoreError, StoreResult, WriteOp,
};
use replstore_durability::{LogFormat, ReplicationEntry, ReplicationLog};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Outcome of a successful commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    /// Committed transaction
    pub txn_id: u64,
    /// Records written, in key order with consecutive sequence numbers
    pub records: Vec<Record>,
    /// False when the batch is durable in the log but the backend could
    /// not absorb it; the replica must recover before serving writes
    pub applied: bool,
}

impl CommitResult {
    /// First sequence number of the batch (0 for a read-only commit)
    pub fn first_sequence_number(&self) -> SequenceNumber {
        self.records.first().map_or(0, |r| r.sequence_number)
    }

    /// Last sequence number of the batch (0 for a read-only commit)
    pub fn last_sequence_number(&self) -> SequenceNumber {
        self.records.last().map_or(0, |r| r.sequence_number)
    }

    /// Whether nothing was written
    pub fn is_read_only(&self) -> bool {
        self.records.is_empty()
    }
}

/// Manages transaction lifecycle and atomic commits
///
/// `begin` and `read` take no lock shared with the commit path beyond the
/// index read lock; commits serialize on one mutex.
pub struct TransactionManager {
    /// Highest sequence number visible to new snapshots
    visible: AtomicU64,
    /// Next transaction ID
    next_txn_id: AtomicU64,
    /// Serializes commits, cleanup and recovery
    commit_lock: Mutex<()>,
    index: VersionIndex,
    pins: SnapshotPins,
    active: DashMap<u64, Arc<TxnHandle>>,
}

impl TransactionManager {
    /// Create a manager whose first snapshot sees `visible_sequence_number`
    pub fn new(visible_sequence_number: SequenceNumber) -> Self {
        TransactionManager {
            visible: AtomicU64::new(visible_sequence_number),
            next_txn_id: AtomicU64::new(1),
            commit_lock: Mutex::new(()),
            index: VersionIndex::new(),
            pins: SnapshotPins::new(),
            active: DashMap::new(),
        }
    }

    /// Highest sequence number visible to new snapshots
    pub fn visible_sequence_number(&self) -> SequenceNumber {
        self.visible.load(Ordering::SeqCst)
    }

    /// Oldest snapshot any live transaction may still read from
    pub fn oldest_active_snapshot(&self) -> SequenceNumber {
        self.pins.oldest(self.visible_sequence_number())
    }

    /// Transactions begun and not yet finished
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Keys currently carrying version history
    pub fn versioned_keys(&self) -> usize {
        self.index.len()
    }

    /// Block commits while the guard is held
    ///
    /// Used for maintenance that must not interleave with a commit's
    /// plan/apply window (tombstone cleanup, checkpoint, recovery).
    pub fn lock_commits(&self) -> MutexGuard<'_, ()> {
        self.commit_lock.lock()
    }

    /// Start a transaction at the current snapshot
    pub fn begin(&self) -> Transaction {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let start = self.pins.pin_with(|| self.visible.load(Ordering::SeqCst));
        let handle = Arc::new(TxnHandle::new(txn_id, start));
        self.active.insert(txn_id, Arc::clone(&handle));
        debug!(txn_id, seq = start, "Transaction started");
        Transaction::new(handle)
    }

    /// Read `key` as of the transaction's snapshot
    ///
    /// Buffered writes of the transaction itself win and are not added to
    /// the read set.
    pub fn read(
        &self,
        txn: &mut Transaction,
        key: &Key,
        backend: &dyn ProviderBackend,
    ) -> StoreResult<Option<Vec<u8>>> {
        txn.ensure_active()?;
        if let Some(op) = txn.buffered(key) {
            let value = match op {
                WriteOp::Put(v) => Some(v.clone()),
                WriteOp::Delete => None,
            };
            txn.touch();
            return Ok(value);
        }
        let visible = self
            .index
            .read_at(key, txn.start_sequence_number(), |k| backend.get(k));
        // a reap during the lookup may have collected this snapshot's history
        txn.ensure_active()?;
        let visible: VisibleVersion = visible?;
        txn.record_read(key.clone(), ObservedVersion::from(&visible));
        Ok(visible.value)
    }

    /// Discard an active transaction
    ///
    /// Aborting a transaction the reaper already retired succeeds.
    pub fn abort(&self, txn: &mut Transaction) -> StoreResult<()> {
        txn.mark_aborted("aborted by caller")?;
        self.release(txn.txn_id());
        self.index.collect(self.oldest_active_snapshot());
        debug!(txn_id = txn.txn_id(), "Transaction aborted");
        Ok(())
    }

    /// Commit a transaction atomically
    ///
    /// # Returns
    /// - `Ok(CommitResult)` once the batch is durable in `log`
    /// - `Err(Conflict)` if any read no longer matches the backend
    /// - `Err(Timeout)` if the reaper retired the transaction first
    /// - `Err(IoFailure)` if the log append failed, or an earlier batch is
    ///   still waiting in the log for recovery; nothing was committed
    /// - `Err(Corruption)` if the backend disagrees with the log
    pub fn commit(
        &self,
        txn: &mut Transaction,
        backend: &dyn ProviderBackend,
        log: &ReplicationLog,
        format: LogFormat,
    ) -> StoreResult<CommitResult> {
        self.commit_with(txn, backend, log, format, |_| {})
    }

    /// [`TransactionManager::commit`], running `on_applied` before the
    /// commit mutex is released
    ///
    /// `on_applied` sees every batch the backend absorbed, in commit order.
    /// Read-only commits and batches left in the log are not passed to it.
    pub fn commit_with<F>(
        &self,
        txn: &mut Transaction,
        backend: &dyn ProviderBackend,
        log: &ReplicationLog,
        format: LogFormat,
        on_applied: F,
    ) -> StoreResult<CommitResult>
    where
        F: FnOnce(&CommitResult),
    {
        txn.mark_committing()?;
        let _guard = self.commit_lock.lock();
        let txn_id = txn.txn_id();

        // A batch left in the log by an earlier failed apply owns the next
        // sequence numbers until recovery replays it.
        let backend_last = backend.stats().last_sequence_number;
        if log.last_sequence_number() > backend_last {
            let behind = StoreError::io_failure(format!(
                "backend at sequence {} is behind the replication log at {}; recovery required",
                backend_last,
                log.last_sequence_number()
            ));
            return Err(self.abandon(txn, "backend behind the replication log", behind));
        }

        let validation = match validate_read_set(txn.read_set(), backend) {
            Ok(v) => v,
            Err(e) => return Err(self.abandon(txn, "read validation failed", e)),
        };
        if let Err(conflict) = validation.into_result() {
            debug!(txn_id, "Transaction conflicts with a newer commit");
            return Err(self.abandon(txn, "read-write conflict", conflict));
        }

        let plan = match plan_writes(txn, backend) {
            Ok(plan) => plan,
            Err(e) => return Err(self.abandon(txn, "planning writes failed", e)),
        };
        if plan.is_empty() {
            self.finish(txn);
            return Ok(CommitResult {
                txn_id,
                records: Vec::new(),
                applied: true,
            });
        }

        let records: Vec<Record> = plan.iter().map(|(_, next)| next.clone()).collect();
        let entry = ReplicationEntry::new(txn_id, records.clone());
        if let Err(e) = log.append(&entry, format) {
            warn!(txn_id, error = %e, "Replication log append failed; transaction not committed");
            return Err(self.abandon(txn, "replication log append failed", e));
        }

        // Durable from here on.
        self.index.install(&plan);
        let applied = match apply_records(backend, &records) {
            Ok(()) => true,
            Err(e @ StoreError::IoFailure { .. }) => {
                warn!(txn_id, error = %e, "Backend apply failed; recovering from the log");
                match backend.recover().and_then(|_| replay_log(backend, log)) {
                    Ok(_) => true,
                    Err(e) => {
                        error!(txn_id, error = %e, "Backend recovery failed; batch left in the log");
                        false
                    }
                }
            }
            Err(e) => {
                error!(txn_id, error = %e, "Backend diverged from the replication log");
                self.finish(txn);
                return Err(e);
            }
        };

        if applied {
            self.visible.store(entry.last_sequence_number(), Ordering::SeqCst);
        }
        self.finish(txn);
        self.index.collect(self.oldest_active_snapshot());
        debug!(
            txn_id,
            seq = entry.last_sequence_number(),
            writes = records.len(),
            "Transaction committed"
        );
        let result = CommitResult {
            txn_id,
            records,
            applied,
        };
        if applied {
            on_applied(&result);
        }
        Ok(result)
    }

    /// Retire transactions idle for at least `max_idle`
    ///
    /// Returns the ids reaped. Their owners see `Timeout` on next use.
    pub fn reap_idle(&self, max_idle: Duration) -> Vec<u64> {
        let candidates: Vec<Arc<TxnHandle>> = self
            .active
            .iter()
            .filter(|e| e.value().idle() >= max_idle)
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut reaped = Vec::new();
        for handle in candidates {
            let idle = handle.idle();
            if handle.try_reap(idle) {
                self.release(handle.txn_id);
                warn!(
                    txn_id = handle.txn_id,
                    idle_ms = idle.as_millis() as u64,
                    "Reaped idle transaction"
                );
                reaped.push(handle.txn_id);
            }
        }
        if !reaped.is_empty() {
            self.index.collect(self.oldest_active_snapshot());
        }
        reaped
    }

    /// Forget all in-memory state after the backend was rebuilt
    ///
    /// Every active transaction is retired (its owner sees `Timeout`) since
    /// the version history its snapshot relied on is gone. The caller must
    /// hold [`TransactionManager::lock_commits`].
    pub fn reset(&self, visible_sequence_number: SequenceNumber) -> usize {
        let retired = self.reap_idle(Duration::ZERO).len();
        self.index.clear();
        self.visible.store(visible_sequence_number, Ordering::SeqCst);
        info!(
            seq = visible_sequence_number,
            retired, "Transaction manager reset"
        );
        retired
    }

    fn release(&self, txn_id: u64) {
        if let Some((_, handle)) = self.active.remove(&txn_id) {
            self.pins.unpin(handle.start_sequence_number);
        }
    }

    fn finish(&self, txn: &mut Transaction) {
        txn.mark_committed();
        self.release(txn.txn_id());
    }

    fn abandon(&self, txn: &mut Transaction, reason: &str, cause: StoreError) -> StoreError {
        let _ = txn.mark_aborted(reason);
        self.release(txn.txn_id());
        cause
    }
}

/// Records the transaction's writes would produce, paired with the records
/// they replace
///
/// Deletes of keys that are not live produce nothing.
fn plan_writes(
    txn: &Transaction,
    backend: &dyn ProviderBackend,
) -> StoreResult<Vec<(Option<Record>, Record)>> {
    let mut next = backend.stats().last_sequence_number + 1;
    let mut plan = Vec::with_capacity(txn.write_count());
    for (key, op) in txn.write_set() {
        let previous = backend.get(key)?;
        let live = previous.as_ref().is_some_and(|r| !r.is_tombstone());
        let record = match op {
            WriteOp::Put(value) => {
                let state = if live {
                    RecordState::Updated
                } else {
                    RecordState::Inserted
                };
                Record::live(key.clone(), value.clone(), next, state)
            }
            WriteOp::Delete if live => Record::tombstone(key.clone(), next),
            WriteOp::Delete => continue,
        };
        next += 1;
        plan.push((previous, record));
    }
    Ok(plan)
}

/// Apply one logged record and check the backend assigned its sequence
fn apply_record(backend: &dyn ProviderBackend, record: &Record) -> StoreResult<()> {
    let assigned = if record.is_tombstone() {
        backend.delete(&record.key, None)?;
        backend.stats().last_sequence_number
    } else {
        backend.put(record.key.clone(), record.value.clone(), None)?
    };
    if assigned != record.sequence_number {
        return Err(StoreError::corruption(format!(
            "backend assigned sequence {} to a record logged at {}",
            assigned, record.sequence_number
        )));
    }
    Ok(())
}

fn apply_records(backend: &dyn ProviderBackend, records: &[Record]) -> StoreResult<()> {
    records.iter().try_for_each(|r| apply_record(backend, r))
}

/// Apply every logged record the backend has not absorbed yet
///
/// Returns the number of records applied. A gap between the backend and
/// the log is `Corruption`.
pub fn replay_log(backend: &dyn ProviderBackend, log: &ReplicationLog) -> StoreResult<usize> {
    let mut last = backend.stats().last_sequence_number;
    let mut applied = 0;
    for entry in log.entries_since(last)? {
        for record in &entry.records {
            if record.sequence_number <= last {
                continue;
            }
            if record.sequence_number != last + 1 {
                return Err(StoreError::corruption(format!(
                    "replication log jumps from sequence {} to {}",
                    last, record.sequence_number
                )));
            }
            apply_record(backend, record)?;
            last = record.sequence_number;
            applied += 1;
        }
    }
    if applied > 0 {
        info!(records = applied, seq = last, "Replayed replication log into backend");
    }
    Ok(applied)
}
