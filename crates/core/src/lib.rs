//! Core types and traits for replstore
//!
//! This crate defines the foundational types used throughout the system:
//! - Key, Record, RecordState, WriteOp: the key-value data model
//! - ProviderKind: which storage engine backs a store
//! - StoreIdentity: the persisted identity header
//! - ClusterVersion: ordered node software versions
//! - StoreError: the failure taxonomy
//! - ProviderBackend: the storage engine contract

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod identity;
pub mod provider;
pub mod traits;
pub mod types;
pub mod version;

pub use error::{StoreError, StoreResult};
pub use identity::{StoreIdentity, MAX_STORE_NAME_LENGTH};
pub use provider::{KeyValueStoreProviderKind, ProviderKind};
pub use traits::{
    BackendStats, CheckpointTicket, ProviderBackend, PurgeOutcome, RecordCursor, RecoveryInfo,
    ResumeToken,
};
pub use types::{Key, Record, RecordState, SequenceNumber, WriteOp};
pub use version::{ClusterVersion, ClusterVersionError};
