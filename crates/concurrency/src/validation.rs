//! Commit-time validation of a transaction's read set
//!
//! Rules:
//! - First committer wins, judged on the READ set only
//! - Blind writes (write without read) never conflict
//! - A key read as a tombstone that has since been purged is unchanged:
//!   purging removes the tombstone without allocating a sequence number
//! - Write skew is allowed

use crate::transaction::ObservedVersion;
use replstore_core::{Key, ProviderBackend, StoreError, StoreResult};
use std::collections::HashMap;

/// A read that no longer matches the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictType {
    /// Key was read at one sequence number but the backend now holds another
    ReadWriteConflict {
        /// The key that has a conflict
        key: Key,
        /// Sequence number observed at the snapshot (0 = absent)
        read_sequence: u64,
        /// Sequence number held by the backend at validation (0 = absent)
        current_sequence: u64,
    },
}

impl ConflictType {
    /// Key the conflict is about
    pub fn key(&self) -> &Key {
        match self {
            ConflictType::ReadWriteConflict { key, .. } => key,
        }
    }
}

impl From<ConflictType> for StoreError {
    fn from(c: ConflictType) -> Self {
        match c {
            ConflictType::ReadWriteConflict {
                key,
                read_sequence,
                current_sequence,
            } => StoreError::Conflict {
                key: key.into_bytes(),
                expected: read_sequence,
                actual: current_sequence,
            },
        }
    }
}

/// Result of transaction validation
///
/// A transaction commits only if `is_valid()` returns true.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// All conflicts detected, in key order
    pub conflicts: Vec<ConflictType>,
}

impl ValidationResult {
    /// No conflicts
    pub fn ok() -> Self {
        Self::default()
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Get the number of conflicts
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    /// `Ok` when valid, otherwise the first conflict as `StoreError::Conflict`
    pub fn into_result(self) -> StoreResult<()> {
        match self.conflicts.into_iter().next() {
            None => Ok(()),
            Some(conflict) => Err(conflict.into()),
        }
    }
}

/// Whether a read still holds given what the backend reports now
fn still_current(observed: ObservedVersion, current: u64) -> bool {
    observed.sequence_number == current || (observed.tombstone && current == 0)
}

/// Validate `read_set` against the backend's current sequence numbers
///
/// Backend errors abort validation; a transaction is never committed on a
/// read the backend could not confirm.
pub fn validate_read_set(
    read_set: &HashMap<Key, ObservedVersion>,
    backend: &dyn ProviderBackend,
) -> StoreResult<ValidationResult> {
    let mut keys: Vec<&Key> = read_set.keys().collect();
    keys.sort();

    let mut result = ValidationResult::ok();
    for key in keys {
        let observed = read_set[key];
        let current = backend.get(key)?.map_or(0, |r| r.sequence_number);
        if !still_current(observed, current) {
            result.conflicts.push(ConflictType::ReadWriteConflict {
                key: key.clone(),
                read_sequence: observed.sequence_number,
                current_sequence: current,
            });
        }
    }
    Ok(result)
}
