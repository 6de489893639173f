//! TStore operation log records.
//!
//! Every mutation is written here, framed and checksummed, before it
//! touches the in-memory table.

use replstore_core::{Key, Record, SequenceNumber, StoreError, StoreResult};
use replstore_durability::encode_frame;
use serde::{Deserialize, Serialize};

/// Segment file prefix of the operation log
pub(crate) const OPLOG_PREFIX: &str = "ops";

/// Frame format byte of operation records
const OPLOG_FORMAT_VERSION: u8 = 1;

/// One logged mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum OpRecord {
    /// Live record written (insert or update)
    Put(Record),
    /// Tombstone written
    Delete {
        key: Key,
        sequence_number: SequenceNumber,
    },
    /// Tombstones physically removed
    Purge {
        keys: Vec<Key>,
        low_watermark: SequenceNumber,
    },
}

impl OpRecord {
    /// Sequence number consumed by this operation, if any
    pub(crate) fn sequence_number(&self) -> Option<SequenceNumber> {
        match self {
            OpRecord::Put(record) => Some(record.sequence_number),
            OpRecord::Delete {
                sequence_number, ..
            } => Some(*sequence_number),
            OpRecord::Purge { .. } => None,
        }
    }

    pub(crate) fn to_frame(&self) -> StoreResult<Vec<u8>> {
        let payload =
            rmp_serde::to_vec(self).map_err(|e| StoreError::Serialization(e.to_string()))?;
        encode_frame(OPLOG_FORMAT_VERSION, &payload)
            .map_err(|e| StoreError::validation(format!("operation rejected: {}", e)))
    }

    pub(crate) fn from_payload(format_version: u8, payload: &[u8]) -> StoreResult<Self> {
        if format_version != OPLOG_FORMAT_VERSION {
            return Err(StoreError::corruption(format!(
                "unknown operation log format {}",
                format_version
            )));
        }
        rmp_serde::from_slice(payload)
            .map_err(|e| StoreError::corruption(format!("operation log record: {}", e)))
    }
}
