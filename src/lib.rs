//! replstore - a provider-abstracted replicated key-value store
//!
//! Each replica persists its data through a pluggable storage engine chosen
//! once, at creation, and recorded in the store's identity header. Commits
//! are made durable in a replication log before they reach the engine, and
//! version-sensitive behavior is gated on the minimum version reported
//! across the cluster.
//!
//! # Quick Start
//!
//! ```ignore
//! use replstore::{CompatibilityGate, Key, ProviderKind, ReplicatedStore, VersionRegistry};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(VersionRegistry::new());
//! registry.report_str("node-1", "2.1.0.0")?;
//!
//! let store = ReplicatedStore::create(
//!     "/data/orders",
//!     "orders",
//!     ProviderKind::TStore,
//!     CompatibilityGate::new(registry),
//! )?;
//!
//! let mut txn = store.begin_transaction()?;
//! store.put(&mut txn, Key::from("order:1"), b"pending".to_vec())?;
//! store.commit(&mut txn)?;
//! ```

pub use replstore_cluster::{
    CompatibilityDecision, CompatibilityGate, Feature, RegistryEntry, VersionRegistry,
};
pub use replstore_concurrency::{CommitResult, Transaction, TransactionStatus};
pub use replstore_core::{
    ClusterVersion, Key, ProviderKind, Record, RecordState, SequenceNumber, StoreError,
    StoreIdentity, StoreResult, WriteOp,
};
pub use replstore_engine::{
    ChangeEvent, CheckpointInfo, CleanupOutcome, HealthState, RecoveryReport, ReplicatedStore,
    StoreBuilder, StoreConfig, StoreStatus, Subscription, CONFIG_FILE_NAME, IDENTITY_FILE_NAME,
    LOG_DIR,
};
pub use replstore_storage::{BackendFactory, ProviderSelector};
