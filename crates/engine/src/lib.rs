//! Store engine for replstore
//!
//! This crate orchestrates all lower layers:
//! - Store lifecycle: create, open, recover, shutdown
//! - Engine selection from the identity header
//! - Transaction commit through the replication log
//! - Version-gated behavior (log compression, tombstone cleanup)
//! - Background reaping of idle transactions
//! - The change feed
//!
//! The engine is the only component that knows about:
//! - Replica health
//! - Cross-layer coordination (engine + replication log + recovery)
//! - The cluster compatibility gate

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod change_feed;
pub mod config;
pub mod reaper;
pub mod status;
pub mod store;

pub use change_feed::{ChangeEvent, ChangeFeed, Subscription, DEFAULT_SUBSCRIBER_CAPACITY};
pub use config::{ConfigError, StoreConfig, CONFIG_FILE_NAME};
pub use reaper::TransactionReaper;
pub use status::{CheckpointInfo, CleanupOutcome, HealthState, RecoveryReport, StoreStatus};
pub use store::{ReplicatedStore, StoreBuilder, BACKEND_DIR, IDENTITY_FILE_NAME, LOG_DIR};
