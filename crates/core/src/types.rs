//! Key, record and write types shared by every layer

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic 64-bit sequence number assigned by a backend's allocator
///
/// `0` is reserved to mean "key absent" in read sets and expectations.
pub type SequenceNumber = u64;

/// Opaque byte-string key
///
/// Keys order lexicographically by bytes, which is the order commits apply
/// writes in and the order enumeration returns records in.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Key(Vec<u8>);

impl Key {
    /// Create a key from raw bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Key(bytes.into())
    }

    /// Borrow the key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume the key, returning its bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Key length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check whether this key begins with `prefix`
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "Key({:?})", s),
            Err(_) => write!(f, "Key({:02x?})", self.0),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.as_bytes().to_vec())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key(s.into_bytes())
    }
}

impl From<&[u8]> for Key {
    fn from(b: &[u8]) -> Self {
        Key(b.to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(b: Vec<u8>) -> Self {
        Key(b)
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Lifecycle state of a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordState {
    /// First live version after absence
    Inserted,
    /// Replacement of a live version
    Updated,
    /// Tombstone; the key reads as absent
    Deleted,
}

impl RecordState {
    /// Whether the record is a tombstone
    pub fn is_tombstone(&self) -> bool {
        matches!(self, RecordState::Deleted)
    }

    /// One-byte tag used by on-disk codecs
    pub fn to_tag(self) -> u8 {
        match self {
            RecordState::Inserted => 1,
            RecordState::Updated => 2,
            RecordState::Deleted => 3,
        }
    }

    /// Decode a one-byte tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(RecordState::Inserted),
            2 => Some(RecordState::Updated),
            3 => Some(RecordState::Deleted),
            _ => None,
        }
    }
}

/// A versioned key-value record as held by a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Record key
    pub key: Key,
    /// Value bytes (empty for tombstones)
    pub value: Vec<u8>,
    /// Sequence number of the mutation that produced this record
    pub sequence_number: SequenceNumber,
    /// Record state
    pub state: RecordState,
}

impl Record {
    /// Create a live record
    pub fn live(key: Key, value: Vec<u8>, sequence_number: SequenceNumber, state: RecordState) -> Self {
        Record {
            key,
            value,
            sequence_number,
            state,
        }
    }

    /// Create a tombstone
    pub fn tombstone(key: Key, sequence_number: SequenceNumber) -> Self {
        Record {
            key,
            value: Vec::new(),
            sequence_number,
            state: RecordState::Deleted,
        }
    }

    /// Whether this record is a tombstone
    pub fn is_tombstone(&self) -> bool {
        self.state.is_tombstone()
    }

    /// Value if the record is live
    pub fn live_value(&self) -> Option<&[u8]> {
        if self.is_tombstone() {
            None
        } else {
            Some(&self.value)
        }
    }

    /// Approximate in-memory footprint, used for size estimates
    pub fn logical_size(&self) -> usize {
        self.key.len() + self.value.len() + std::mem::size_of::<SequenceNumber>() + 1
    }
}

/// A buffered transactional write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Store a value
    Put(Vec<u8>),
    /// Write a tombstone
    Delete,
}

impl WriteOp {
    /// Whether this write is a delete
    pub fn is_delete(&self) -> bool {
        matches!(self, WriteOp::Delete)
    }
}
