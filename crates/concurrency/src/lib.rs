//! Concurrency layer for replstore
//!
//! This crate implements optimistic concurrency control (OCC) with:
//! - Transaction: read set tracking and private write buffering
//! - Snapshot isolation over single-version backends (version index)
//! - Conflict detection at commit time
//! - TransactionManager: the commit protocol and idle transaction reaping

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod snapshot;
pub mod transaction;
pub mod validation;

pub use manager::{replay_log, CommitResult, TransactionManager};
pub use snapshot::{SnapshotPins, VersionIndex, VisibleVersion};
pub use transaction::{ObservedVersion, Transaction, TransactionStatus};
pub use validation::{validate_read_set, ConflictType, ValidationResult};
