//! Replication log entries.
//!
//! One entry holds the complete write batch of one committed transaction,
//! in the key order the batch was applied in. Entries are serialized with
//! MessagePack and, in the compressed format, wrapped in zstd.

use chrono::{DateTime, Utc};
use replstore_core::{Record, SequenceNumber, StoreError};
use serde::{Deserialize, Serialize};

/// zstd level for the compressed format
const COMPRESSION_LEVEL: i32 = 3;

/// Encoding of an entry payload, stored in the frame's format byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogFormat {
    /// MessagePack payload, readable by every node version
    Plain,
    /// zstd-compressed MessagePack payload
    Compressed,
}

impl LogFormat {
    /// Frame format byte
    pub fn to_tag(self) -> u8 {
        match self {
            LogFormat::Plain => 1,
            LogFormat::Compressed => 2,
        }
    }

    /// Decode a frame format byte
    pub fn from_tag(tag: u8) -> Result<Self, LogRecordError> {
        match tag {
            1 => Ok(LogFormat::Plain),
            2 => Ok(LogFormat::Compressed),
            other => Err(LogRecordError::UnknownFormat(other)),
        }
    }
}

/// Errors encoding or decoding a log entry
#[derive(Debug, thiserror::Error)]
pub enum LogRecordError {
    /// Frame carries a format byte this build does not know
    #[error("unknown log entry format {0}")]
    UnknownFormat(u8),

    /// MessagePack encoding failed
    #[error("encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding failed
    #[error("decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// zstd failed
    #[error("compression failed: {0}")]
    Compression(#[from] std::io::Error),
}

impl From<LogRecordError> for StoreError {
    fn from(e: LogRecordError) -> Self {
        match e {
            LogRecordError::Encode(e) => StoreError::Serialization(e.to_string()),
            other => StoreError::Corruption(format!("replication log entry: {}", other)),
        }
    }
}

/// The write batch of one committed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationEntry {
    /// Committing transaction
    pub txn_id: u64,
    /// Wall-clock commit time
    pub committed_at: DateTime<Utc>,
    /// Resulting records in key order, consecutive sequence numbers
    pub records: Vec<Record>,
}

impl ReplicationEntry {
    /// Build an entry stamped with the current time
    pub fn new(txn_id: u64, records: Vec<Record>) -> Self {
        ReplicationEntry {
            txn_id,
            committed_at: Utc::now(),
            records,
        }
    }

    /// Lowest sequence number in the batch (0 when empty)
    pub fn first_sequence_number(&self) -> SequenceNumber {
        self.records
            .iter()
            .map(|r| r.sequence_number)
            .min()
            .unwrap_or(0)
    }

    /// Highest sequence number in the batch (0 when empty)
    pub fn last_sequence_number(&self) -> SequenceNumber {
        self.records
            .iter()
            .map(|r| r.sequence_number)
            .max()
            .unwrap_or(0)
    }

    /// Serialize to a frame payload in `format`
    pub fn encode(&self, format: LogFormat) -> Result<Vec<u8>, LogRecordError> {
        let packed = rmp_serde::to_vec(self)?;
        match format {
            LogFormat::Plain => Ok(packed),
            LogFormat::Compressed => Ok(zstd::encode_all(packed.as_slice(), COMPRESSION_LEVEL)?),
        }
    }

    /// Deserialize a frame payload written with format byte `tag`
    pub fn decode(tag: u8, payload: &[u8]) -> Result<Self, LogRecordError> {
        match LogFormat::from_tag(tag)? {
            LogFormat::Plain => Ok(rmp_serde::from_slice(payload)?),
            LogFormat::Compressed => {
                let packed = zstd::decode_all(payload)?;
                Ok(rmp_serde::from_slice(&packed)?)
            }
        }
    }
}
