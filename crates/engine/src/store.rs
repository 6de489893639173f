//! The replicated store
//!
//! [`ReplicatedStore`] ties one storage engine, the replication log, the
//! transaction manager and the change feed together, and consults the
//! cluster compatibility gate before any version-sensitive behavior.
//!
//! # Directory Layout
//!
//! ```text
//! <store>/
//! ├── identity.hdr      name, provider kind, creation epoch (checksummed)
//! ├── replstore.toml    configuration
//! ├── backend/          owned by the engine
//! └── replog/           replication log segments
//! ```
//!
//! # Health
//!
//! ```text
//! Serving ──storage fault not repaired inline──► NeedsRecovery ──recover()──► Serving
//!    │                                                 │
//!    └──────────────Corruption────────────────────────┴──────────► Faulted (sticky)
//! ```

use crate::change_feed::{ChangeFeed, Subscription};
use crate::config::{StoreConfig, CONFIG_FILE_NAME};
use crate::reaper::TransactionReaper;
use crate::status::{
    CheckpointInfo, CleanupOutcome, HealthState, RecoveryReport, StoreStatus,
};
use parking_lot::{Mutex, RwLock};
use replstore_cluster::{CompatibilityGate, Feature, VersionRegistry};
use replstore_concurrency::{replay_log, CommitResult, Transaction, TransactionManager};
use replstore_core::{
    BackendStats, Key, ProviderBackend, ProviderKind, Record, SequenceNumber, StoreError,
    StoreIdentity, StoreResult, WriteOp,
};
use replstore_durability::{LogFormat, ReplicationEntry, ReplicationLog};
use replstore_storage::ProviderSelector;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Identity header file name
pub const IDENTITY_FILE_NAME: &str = "identity.hdr";
/// Engine directory name
pub const BACKEND_DIR: &str = "backend";
/// Replication log directory name
pub const LOG_DIR: &str = "replog";

/// Builder for creating or opening a [`ReplicatedStore`]
///
/// ```ignore
/// let gate = CompatibilityGate::new(registry);
/// let store = ReplicatedStore::builder()
///     .path("/data/orders")
///     .provider(ProviderKind::TStore)
///     .gate(gate)
///     .create("orders")?;
/// ```
#[derive(Default)]
pub struct StoreBuilder {
    path: Option<PathBuf>,
    config: Option<StoreConfig>,
    provider: Option<ProviderKind>,
    selector: Option<ProviderSelector>,
    gate: Option<CompatibilityGate>,
}

impl StoreBuilder {
    /// Builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Store directory (required)
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Use `config` instead of the store's `replstore.toml`
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Engine for a new store, overriding the config's provider
    pub fn provider(mut self, kind: ProviderKind) -> Self {
        self.provider = Some(kind);
        self
    }

    /// Engine registry (defaults to the engines this build ships)
    pub fn selector(mut self, selector: ProviderSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Compatibility gate (defaults to a gate over an empty registry,
    /// which denies every version-sensitive feature)
    pub fn gate(mut self, gate: CompatibilityGate) -> Self {
        self.gate = Some(gate);
        self
    }

    fn require_path(&self) -> StoreResult<PathBuf> {
        self.path
            .clone()
            .ok_or_else(|| StoreError::validation("store path is required"))
    }

    /// Create a new store named `name`
    ///
    /// The provider kind is validated before anything is written to disk.
    pub fn create(self, name: &str) -> StoreResult<Arc<ReplicatedStore>> {
        let dir = self.require_path()?;
        let mut config = self.config.unwrap_or_default();
        if let Some(kind) = self.provider {
            config = config.with_provider(kind);
        }
        config.validate()?;
        let selector = self
            .selector
            .unwrap_or_else(|| ProviderSelector::with_defaults(config.tstore_config()));
        let kind = selector.select_for_new_store(config.provider_kind()?)?;
        let identity = StoreIdentity::new(name, kind)?;

        let identity_path = dir.join(IDENTITY_FILE_NAME);
        if identity_path.exists() {
            return Err(StoreError::validation(format!(
                "a store already exists at {}",
                dir.display()
            )));
        }
        fs::create_dir_all(dir.join(BACKEND_DIR))
            .map_err(|e| StoreError::io_context("creating store directory", e))?;
        config.write_to_file(&dir.join(CONFIG_FILE_NAME))?;
        identity.write_new(&identity_path)?;
        info!(name, provider = %kind, path = %dir.display(), "Store created");

        let gate = self.gate.unwrap_or_else(default_gate);
        ReplicatedStore::start(dir, identity, config, &selector, gate)
    }

    /// Open an existing store
    ///
    /// The engine is chosen from the identity header, never from config.
    pub fn open(self) -> StoreResult<Arc<ReplicatedStore>> {
        let dir = self.require_path()?;
        let identity = StoreIdentity::read_from(&dir.join(IDENTITY_FILE_NAME))?;
        let config = match self.config {
            Some(config) => {
                config.validate()?;
                config
            }
            None => StoreConfig::load_or_create(&dir)?,
        };
        if config.provider_kind().ok() != Some(identity.provider_kind()) {
            debug!(
                configured = %config.provider,
                stored = %identity.provider_kind(),
                "Configured provider ignored for existing store"
            );
        }
        let selector = self
            .selector
            .unwrap_or_else(|| ProviderSelector::with_defaults(config.tstore_config()));
        let gate = self.gate.unwrap_or_else(default_gate);
        ReplicatedStore::start(dir, identity, config, &selector, gate)
    }
}

fn default_gate() -> CompatibilityGate {
    CompatibilityGate::new(Arc::new(VersionRegistry::new()))
}

/// A replica of a transactional key-value store
pub struct ReplicatedStore {
    dir: PathBuf,
    identity: StoreIdentity,
    config: StoreConfig,
    backend: Box<dyn ProviderBackend>,
    log: ReplicationLog,
    manager: TransactionManager,
    gate: CompatibilityGate,
    feed: ChangeFeed,
    health: RwLock<HealthState>,
    /// Highest sequence number handed to the change feed
    published: AtomicU64,
    compression_denied: AtomicBool,
    cleanup_denied: AtomicBool,
    reaper: Mutex<Option<(TransactionReaper, JoinHandle<()>)>>,
}

impl ReplicatedStore {
    /// Builder for creating or opening a store
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    /// Create a store at `path` with default configuration
    pub fn create<P: AsRef<Path>>(
        path: P,
        name: &str,
        kind: ProviderKind,
        gate: CompatibilityGate,
    ) -> StoreResult<Arc<Self>> {
        StoreBuilder::new()
            .path(path.as_ref())
            .provider(kind)
            .gate(gate)
            .create(name)
    }

    /// Open the store at `path`
    pub fn open<P: AsRef<Path>>(path: P, gate: CompatibilityGate) -> StoreResult<Arc<Self>> {
        StoreBuilder::new().path(path.as_ref()).gate(gate).open()
    }

    fn start(
        dir: PathBuf,
        identity: StoreIdentity,
        config: StoreConfig,
        selector: &ProviderSelector,
        gate: CompatibilityGate,
    ) -> StoreResult<Arc<Self>> {
        let backend =
            selector.resolve_existing(identity.provider_kind(), &dir.join(BACKEND_DIR))?;
        let backend_info = backend.recover()?;
        let (log, log_recovery) = ReplicationLog::open(&dir.join(LOG_DIR), config.log_config())?;
        let log_replayed = replay_log(backend.as_ref(), &log)?;
        let last = backend.stats().last_sequence_number;

        info!(
            name = identity.name(),
            provider = %identity.provider_kind(),
            seq = last,
            backend_replayed = backend_info.replayed_operations,
            log_replayed,
            log_entries = log_recovery.entries.len(),
            "Store opened"
        );

        let reaper_interval = config.reaper_interval_ms;
        let store = Arc::new(ReplicatedStore {
            dir,
            identity,
            config,
            backend,
            log,
            manager: TransactionManager::new(last),
            gate,
            feed: ChangeFeed::new(),
            health: RwLock::new(HealthState::Serving),
            published: AtomicU64::new(last),
            compression_denied: AtomicBool::new(false),
            cleanup_denied: AtomicBool::new(false),
            reaper: Mutex::new(None),
        });
        if reaper_interval > 0 {
            let reaper = TransactionReaper::new(
                Arc::downgrade(&store),
                Duration::from_millis(reaper_interval),
            );
            let handle = reaper.start();
            *store.reaper.lock() = Some((reaper, handle));
        }
        Ok(store)
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Start a transaction reading from the current snapshot
    pub fn begin_transaction(&self) -> StoreResult<Transaction> {
        self.ensure_serving()?;
        Ok(self.manager.begin())
    }

    /// Read `key` as the transaction sees it
    pub fn read(&self, txn: &mut Transaction, key: &Key) -> StoreResult<Option<Vec<u8>>> {
        self.ensure_serving()?;
        let result = self.manager.read(txn, key, self.backend.as_ref());
        self.observe(result)
    }

    /// Buffer `op` for `key` in the transaction
    pub fn write(&self, txn: &mut Transaction, key: Key, op: WriteOp) -> StoreResult<()> {
        self.ensure_serving()?;
        if key.is_empty() {
            return Err(StoreError::validation("key must not be empty"));
        }
        txn.write(key, op)
    }

    /// Buffer a put
    pub fn put(&self, txn: &mut Transaction, key: Key, value: Vec<u8>) -> StoreResult<()> {
        self.write(txn, key, WriteOp::Put(value))
    }

    /// Buffer a delete
    pub fn delete(&self, txn: &mut Transaction, key: Key) -> StoreResult<()> {
        self.write(txn, key, WriteOp::Delete)
    }

    /// Commit the transaction
    ///
    /// On success the batch is durable and, unless the replica dropped to
    /// `NeedsRecovery`, visible to new transactions and published to the
    /// change feed.
    pub fn commit(&self, txn: &mut Transaction) -> StoreResult<CommitResult> {
        if let Err(e) = self.ensure_serving() {
            let _ = self.manager.abort(txn);
            return Err(e);
        }
        let format = self.log_format();
        let result = self.manager.commit_with(
            txn,
            self.backend.as_ref(),
            &self.log,
            format,
            |applied| {
                self.feed.publish(applied.txn_id, &applied.records);
                self.published
                    .fetch_max(applied.last_sequence_number(), Ordering::SeqCst);
            },
        );
        match &result {
            Ok(committed) if !committed.applied => self.set_health(HealthState::NeedsRecovery {
                reason: format!(
                    "transaction {} is durable in the replication log but not applied",
                    committed.txn_id
                ),
            }),
            Err(StoreError::IoFailure { .. }) => self.repair_log(),
            Err(StoreError::Corruption(reason)) => self.set_health(HealthState::Faulted {
                reason: reason.clone(),
            }),
            _ => {}
        }
        result
    }

    /// Discard the transaction
    pub fn abort(&self, txn: &mut Transaction) -> StoreResult<()> {
        self.manager.abort(txn)
    }

    /// Retire transactions idle longer than the configured timeout
    pub fn reap_idle_transactions(&self) -> Vec<u64> {
        self.manager
            .reap_idle(Duration::from_millis(self.config.idle_transaction_timeout_ms))
    }

    /// Subscribe to batches committed from now on
    pub fn subscribe(&self) -> Subscription {
        self.feed.subscribe()
    }

    // ------------------------------------------------------------------
    // Replication log
    // ------------------------------------------------------------------

    /// Highest sequence number visible to new transactions
    pub fn last_committed_sequence_number(&self) -> SequenceNumber {
        self.manager.visible_sequence_number()
    }

    /// Batches committed after `seq`, in commit order
    ///
    /// Fails with `Validation` when the log no longer holds everything
    /// after `seq` because a checkpoint truncated it.
    pub fn operations_since(&self, seq: SequenceNumber) -> StoreResult<Vec<ReplicationEntry>> {
        self.ensure_not_faulted()?;
        let entries = self.observe(self.log.entries_since(seq))?;
        let last = self
            .last_committed_sequence_number()
            .max(self.log.last_sequence_number());
        let first = entries
            .first()
            .map(|e| e.first_sequence_number())
            .unwrap_or(last + 1);
        if seq < last && first > seq + 1 {
            return Err(StoreError::validation(format!(
                "operations after {} were truncated; the log starts at {}",
                seq, first
            )));
        }
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Checkpoint the engine and drop covered replication log segments
    pub fn checkpoint(&self) -> StoreResult<CheckpointInfo> {
        self.ensure_serving()?;
        let ticket = self.observe(self.backend.begin_checkpoint())?;
        let checkpoint_id = ticket.checkpoint_id;
        let sequence_number = ticket.sequence_number;
        self.observe(self.backend.complete_checkpoint(ticket))?;

        let log_segments_removed = if self.config.truncate_log_on_checkpoint {
            self.observe(self.log.truncate_through(sequence_number))?
        } else {
            0
        };
        info!(
            checkpoint_id,
            seq = sequence_number,
            log_segments_removed,
            "Checkpoint completed"
        );
        Ok(CheckpointInfo {
            checkpoint_id,
            sequence_number,
            log_segments_removed,
        })
    }

    /// Purge old tombstones when over the configured limit
    ///
    /// Removes at most `min(count / 2, max_tombstones_per_cleanup)`
    /// tombstones older than every active snapshot. Does nothing, and
    /// reports `denied`, while the cluster version gate disallows it.
    pub fn cleanup_tombstones(&self) -> StoreResult<CleanupOutcome> {
        self.ensure_serving()?;
        let stats = self.backend.stats();
        if !self.feature_allowed(Feature::TombstoneCleanup, &self.cleanup_denied) {
            return Ok(CleanupOutcome {
                removed: 0,
                low_watermark: stats.tombstone_low_watermark,
                denied: true,
            });
        }
        if stats.tombstone_count <= self.config.tombstone_cleanup_limit {
            return Ok(CleanupOutcome {
                removed: 0,
                low_watermark: stats.tombstone_low_watermark,
                denied: false,
            });
        }

        let limit = (stats.tombstone_count / 2).min(self.config.max_tombstones_per_cleanup);
        let _guard = self.manager.lock_commits();
        let below = self.manager.oldest_active_snapshot();
        let outcome = self.observe(self.backend.purge_tombstones(below, limit))?;
        let low_watermark = self.backend.stats().tombstone_low_watermark;
        info!(
            removed = outcome.removed,
            low_watermark,
            below,
            "Tombstone cleanup pass"
        );
        Ok(CleanupOutcome {
            removed: outcome.removed,
            low_watermark,
            denied: false,
        })
    }

    /// Rebuild in-memory state from durable storage
    ///
    /// Validates the identity header, recovers the engine and the
    /// replication log, replays logged batches the engine is missing, and
    /// retires every active transaction. A faulted replica stays faulted.
    pub fn recover(&self) -> StoreResult<RecoveryReport> {
        if let HealthState::Faulted { reason } = self.health() {
            return Err(StoreError::corruption(format!(
                "replica is faulted: {}",
                reason
            )));
        }
        let _guard = self.manager.lock_commits();
        let result = self.recover_locked();
        match &result {
            Ok(report) => {
                self.set_health(HealthState::Serving);
                info!(
                    seq = report.last_sequence_number,
                    log_replayed = report.log_replayed,
                    retired = report.retired_transactions,
                    "Replica recovered"
                );
            }
            Err(StoreError::Corruption(reason)) => self.set_health(HealthState::Faulted {
                reason: reason.clone(),
            }),
            Err(e) => self.set_health(HealthState::NeedsRecovery {
                reason: e.to_string(),
            }),
        }
        result
    }

    fn recover_locked(&self) -> StoreResult<RecoveryReport> {
        let stored = StoreIdentity::read_from(&self.dir.join(IDENTITY_FILE_NAME))?;
        if stored != self.identity {
            return Err(StoreError::corruption(format!(
                "identity header changed: opened as '{}' ({}), found '{}' ({})",
                self.identity.name(),
                self.identity.provider_kind(),
                stored.name(),
                stored.provider_kind()
            )));
        }

        let backend_info = self.backend.recover()?;
        let log_recovery = self.log.recover()?;
        let log_replayed = replay_log(self.backend.as_ref(), &self.log)?;
        let last = self.backend.stats().last_sequence_number;
        let retired = self.manager.reset(last);

        let published = self.published.load(Ordering::SeqCst);
        if last > published {
            for entry in self.log.entries_since(published)? {
                let fresh: Vec<Record> = entry
                    .records
                    .into_iter()
                    .filter(|r| r.sequence_number > published && r.sequence_number <= last)
                    .collect();
                self.feed.publish(entry.txn_id, &fresh);
            }
            self.published.store(last, Ordering::SeqCst);
        }

        Ok(RecoveryReport {
            last_sequence_number: last,
            backend_replayed: backend_info.replayed_operations,
            log_replayed,
            truncated_bytes: backend_info.truncated_bytes + log_recovery.truncated_bytes,
            retired_transactions: retired,
        })
    }

    /// Stop the background reaper and wait for it
    pub fn shutdown(&self) {
        if let Some((reaper, handle)) = self.reaper.lock().take() {
            reaper.shutdown();
            if handle.join().is_err() {
                warn!("Reaper thread panicked");
            }
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Point-in-time status
    pub fn status(&self) -> StoreStatus {
        let stats = self.backend.stats();
        let health = self.health();
        let last = self.last_committed_sequence_number();
        let active = self.manager.active_count();
        let status_details = format!(
            "{} store '{}' is {}: seq {}, {} live, {} tombstones, {} active transactions",
            self.identity.provider_kind(),
            self.identity.name(),
            health,
            last,
            stats.live_count,
            stats.tombstone_count,
            active
        );
        StoreStatus {
            name: self.identity.name().to_string(),
            provider_kind: self.identity.provider_kind(),
            row_count_estimate: stats.live_count,
            logical_size_estimate: stats.logical_size,
            last_committed_sequence_number: last,
            tombstone_count: stats.tombstone_count,
            tombstone_low_watermark: stats.tombstone_low_watermark,
            active_transactions: active,
            log_segments: self.log.segment_count(),
            health,
            status_details,
        }
    }

    /// Current health
    pub fn health(&self) -> HealthState {
        self.health.read().clone()
    }

    /// Identity header contents
    pub fn identity(&self) -> &StoreIdentity {
        &self.identity
    }

    /// Engine kind
    pub fn provider_kind(&self) -> ProviderKind {
        self.identity.provider_kind()
    }

    /// Effective configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Compatibility gate this store consults
    pub fn gate(&self) -> &CompatibilityGate {
        &self.gate
    }

    /// Engine counters
    pub fn backend_stats(&self) -> BackendStats {
        self.backend.stats()
    }

    /// Store directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn ensure_serving(&self) -> StoreResult<()> {
        match &*self.health.read() {
            HealthState::Serving => Ok(()),
            HealthState::NeedsRecovery { reason } => Err(StoreError::io_failure(format!(
                "replica needs recovery: {}",
                reason
            ))),
            HealthState::Faulted { reason } => Err(StoreError::corruption(format!(
                "replica is faulted: {}",
                reason
            ))),
        }
    }

    fn ensure_not_faulted(&self) -> StoreResult<()> {
        match &*self.health.read() {
            HealthState::Faulted { reason } => Err(StoreError::corruption(format!(
                "replica is faulted: {}",
                reason
            ))),
            _ => Ok(()),
        }
    }

    /// Fault the replica on corruption
    fn observe<T>(&self, result: StoreResult<T>) -> StoreResult<T> {
        if let Err(StoreError::Corruption(reason)) = &result {
            self.set_health(HealthState::Faulted {
                reason: reason.clone(),
            });
        }
        result
    }

    fn set_health(&self, next: HealthState) {
        let mut health = self.health.write();
        if health.is_faulted() || *health == next {
            return;
        }
        match &next {
            HealthState::Serving => info!(name = self.identity.name(), "Replica serving"),
            HealthState::NeedsRecovery { reason } => {
                warn!(name = self.identity.name(), reason = %reason, "Replica needs recovery")
            }
            HealthState::Faulted { reason } => {
                error!(name = self.identity.name(), reason = %reason, "Replica faulted")
            }
        }
        *health = next;
    }

    /// Clear a failed append so the next commit can use the log again
    fn repair_log(&self) {
        let _guard = self.manager.lock_commits();
        if !self.log.is_faulted() {
            return;
        }
        match self.log.recover() {
            Ok(recovery) => info!(
                truncated_bytes = recovery.truncated_bytes,
                "Replication log repaired after failed append"
            ),
            Err(e) => {
                let corrupt = e.is_fatal();
                let reason = e.to_string();
                if corrupt {
                    self.set_health(HealthState::Faulted { reason });
                } else {
                    self.set_health(HealthState::NeedsRecovery { reason });
                }
            }
        }
    }

    fn log_format(&self) -> LogFormat {
        if self.feature_allowed(Feature::CompressedReplicationLog, &self.compression_denied) {
            LogFormat::Compressed
        } else {
            LogFormat::Plain
        }
    }

    /// Ask the gate, logging when the answer flips
    fn feature_allowed(&self, feature: Feature, denied: &AtomicBool) -> bool {
        let decision = self.gate.decide(feature);
        let was_denied = denied.swap(!decision.safe, Ordering::Relaxed);
        if !decision.safe && !was_denied {
            warn!(
                feature = %feature,
                required = %decision.required,
                minimum = ?decision.minimum.as_ref().map(|v| v.version()),
                "Cluster version too low; using legacy behavior"
            );
        } else if decision.safe && was_denied {
            info!(feature = %feature, "Cluster upgraded; feature enabled");
        }
        decision.safe
    }
}

impl Drop for ReplicatedStore {
    fn drop(&mut self) {
        // the last reference may be dropped on the reaper thread itself
        if let Some((reaper, _handle)) = self.reaper.get_mut().take() {
            reaper.shutdown();
        }
    }
}
