//! Error types for replstore
//!
//! Every layer reports failures through [`StoreError`]. The variants follow
//! the failure taxonomy callers act on:
//!
//! | Variant | Caller action |
//! |---------|---------------|
//! | `Validation` | Fix the input, never retry |
//! | `Conflict` | Retry the whole transaction |
//! | `IoFailure` | Transient, retry with backoff (replica recovers locally) |
//! | `Corruption` | Fatal, replica refuses to serve until repaired |
//! | `Timeout` | Transaction was reaped; treated as an abort |

use std::io;
use thiserror::Error;

/// Result type alias for replstore operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Error type for every store operation
#[derive(Debug, Error)]
pub enum StoreError {
    /// Bad input, e.g. requesting the `Unknown` provider kind
    #[error("Validation error: {0}")]
    Validation(String),

    /// Optimistic concurrency failure
    #[error("Conflict on key {key:?}: expected sequence {expected}, found {actual}")]
    Conflict {
        /// Key whose sequence number diverged
        key: Vec<u8>,
        /// Sequence number the caller expected (0 = absent)
        expected: u64,
        /// Sequence number currently stored (0 = absent)
        actual: u64,
    },

    /// Storage durability fault
    #[error("I/O failure: {message}")]
    IoFailure {
        /// Description of the failed operation
        message: String,
        /// Underlying I/O error, if any
        #[source]
        source: Option<io::Error>,
    },

    /// Format mismatch or checksum failure
    #[error("Corruption: {0}")]
    Corruption(String),

    /// Transaction exceeded its idle window and was reaped
    #[error("Transaction {txn_id} timed out after {idle_ms}ms idle")]
    Timeout {
        /// Reaped transaction
        txn_id: u64,
        /// Idle time when the transaction was reaped
        idle_ms: u64,
    },

    /// Operation on a transaction that is no longer active
    #[error("Transaction {txn_id} is not active: {state}")]
    TransactionNotActive {
        /// Transaction id
        txn_id: u64,
        /// Current state description
        state: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Build a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        StoreError::Validation(msg.into())
    }

    /// Build a corruption error
    pub fn corruption(msg: impl Into<String>) -> Self {
        StoreError::Corruption(msg.into())
    }

    /// Build an I/O failure without an underlying `io::Error`
    pub fn io_failure(msg: impl Into<String>) -> Self {
        StoreError::IoFailure {
            message: msg.into(),
            source: None,
        }
    }

    /// Wrap an `io::Error` with context
    pub fn io_context(context: impl Into<String>, source: io::Error) -> Self {
        let context = context.into();
        StoreError::IoFailure {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Whether the caller may retry the failed operation
    ///
    /// Conflicts are retried by re-running the whole transaction; I/O
    /// failures are retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::IoFailure { .. })
    }

    /// Whether the replica must stop serving
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Corruption(_))
    }

    /// Whether this error is an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::IoFailure {
            message: e.to_string(),
            source: Some(e),
        }
    }
}
