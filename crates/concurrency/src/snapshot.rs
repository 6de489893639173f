//! Point-in-time reads over a backend that only keeps the newest record
//!
//! A backend holds one record per key. Snapshot isolation needs the
//! version a key had at a transaction's start sequence number, so the
//! commit path keeps short version chains for keys it overwrote while
//! older snapshots were still pinned.
//!
//! # Snapshot Guarantees
//!
//! A read at snapshot `S` returns the newest version with sequence number
//! `<= S`. Writes committed after `S` are never visible, and a key that
//! did not exist at `S` reads as absent even if it exists now.
//!
//! # Chains
//!
//! ```text
//! key -> [seq 42 "v3"] -> [seq 17 "v2"] -> [seq 0 absent]
//!         newest                            oldest kept
//! ```
//!
//! Before a commit applies a write, the chain for that key is seeded with
//! the record the backend currently holds (or an absent marker) and the
//! new version is pushed on top. Reads that find no chain fall through to
//! the backend while still holding the index read lock, so a commit can
//! never slip a newer record under a reader between the two lookups.

use parking_lot::{Mutex, RwLock};
use replstore_core::{Key, Record, SequenceNumber, StoreError, StoreResult};
use std::collections::{BTreeMap, VecDeque};

/// The version of a key visible at some snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleVersion {
    /// Sequence number of the version (0 if the key never existed)
    pub sequence_number: SequenceNumber,
    /// Value, `None` for tombstones and absent keys
    pub value: Option<Vec<u8>>,
}

impl VisibleVersion {
    /// The key did not exist at the snapshot
    pub fn absent() -> Self {
        VisibleVersion {
            sequence_number: 0,
            value: None,
        }
    }

    /// Visible form of a backend record
    pub fn from_record(record: &Record) -> Self {
        VisibleVersion {
            sequence_number: record.sequence_number,
            value: record.live_value().map(<[u8]>::to_vec),
        }
    }

    /// Whether the key was absent at the snapshot
    pub fn is_absent(&self) -> bool {
        self.sequence_number == 0
    }

    /// Whether the version is a tombstone
    pub fn is_tombstone(&self) -> bool {
        self.sequence_number != 0 && self.value.is_none()
    }
}

/// Recent versions of one key, newest first
#[derive(Debug)]
struct VersionChain {
    versions: VecDeque<VisibleVersion>,
}

impl VersionChain {
    fn seeded(previous: Option<&Record>) -> Self {
        let base = previous.map_or_else(VisibleVersion::absent, VisibleVersion::from_record);
        VersionChain {
            versions: VecDeque::from([base]),
        }
    }

    fn at(&self, snapshot: SequenceNumber) -> Option<&VisibleVersion> {
        self.versions
            .iter()
            .find(|v| v.sequence_number <= snapshot)
    }

    /// Drop versions no snapshot at or above `oldest` can reach.
    ///
    /// Returns true when the chain no longer carries history.
    fn prune(&mut self, oldest: SequenceNumber) -> bool {
        if let Some(pos) = self
            .versions
            .iter()
            .position(|v| v.sequence_number <= oldest)
        {
            self.versions.truncate(pos + 1);
        }
        self.versions.len() == 1 && self.versions[0].sequence_number <= oldest
    }
}

/// Version chains for recently overwritten keys
#[derive(Debug, Default)]
pub struct VersionIndex {
    chains: RwLock<BTreeMap<Key, VersionChain>>,
}

impl VersionIndex {
    /// Empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Version of `key` visible at `snapshot`
    ///
    /// `current` is asked for the backend's record only when the index
    /// holds no history for the key. A backend record newer than the
    /// snapshot at that point means the index missed a commit and is
    /// reported as `Corruption`.
    pub fn read_at<F>(
        &self,
        key: &Key,
        snapshot: SequenceNumber,
        current: F,
    ) -> StoreResult<VisibleVersion>
    where
        F: FnOnce(&Key) -> StoreResult<Option<Record>>,
    {
        let chains = self.chains.read();
        if let Some(chain) = chains.get(key) {
            return Ok(chain.at(snapshot).cloned().unwrap_or_else(VisibleVersion::absent));
        }
        match current(key)? {
            None => Ok(VisibleVersion::absent()),
            Some(record) if record.sequence_number <= snapshot => {
                Ok(VisibleVersion::from_record(&record))
            }
            Some(record) => Err(StoreError::corruption(format!(
                "record at sequence {} is newer than snapshot {} with no version history",
                record.sequence_number, snapshot
            ))),
        }
    }

    /// Record new versions ahead of applying them to the backend
    ///
    /// Each pair is (record the backend holds now, record about to replace it).
    pub fn install(&self, writes: &[(Option<Record>, Record)]) {
        let mut chains = self.chains.write();
        for (previous, next) in writes {
            chains
                .entry(next.key.clone())
                .or_insert_with(|| VersionChain::seeded(previous.as_ref()))
                .versions
                .push_front(VisibleVersion::from_record(next));
        }
    }

    /// Drop history older than the oldest snapshot still in use
    pub fn collect(&self, oldest_snapshot: SequenceNumber) -> usize {
        let mut chains = self.chains.write();
        let before = chains.len();
        chains.retain(|_, chain| !chain.prune(oldest_snapshot));
        before - chains.len()
    }

    /// Forget all history
    pub fn clear(&self) {
        self.chains.write().clear();
    }

    /// Keys currently carrying history
    pub fn len(&self) -> usize {
        self.chains.read().len()
    }

    /// Whether no key carries history
    pub fn is_empty(&self) -> bool {
        self.chains.read().is_empty()
    }
}

/// Reference counts of snapshots held by live transactions
#[derive(Debug, Default)]
pub struct SnapshotPins {
    pins: Mutex<BTreeMap<SequenceNumber, usize>>,
}

impl SnapshotPins {
    /// No pins
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the snapshot produced by `snapshot` while holding the pin lock
    ///
    /// Reading the visible sequence number inside the lock keeps a
    /// concurrent [`SnapshotPins::oldest`] from missing the new pin.
    pub fn pin_with<F>(&self, snapshot: F) -> SequenceNumber
    where
        F: FnOnce() -> SequenceNumber,
    {
        let mut pins = self.pins.lock();
        let seq = snapshot();
        *pins.entry(seq).or_insert(0) += 1;
        seq
    }

    /// Release one pin of `seq`
    pub fn unpin(&self, seq: SequenceNumber) {
        let mut pins = self.pins.lock();
        if let Some(count) = pins.get_mut(&seq) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&seq);
            }
        }
    }

    /// Oldest pinned snapshot, or `fallback` when nothing is pinned
    pub fn oldest(&self, fallback: SequenceNumber) -> SequenceNumber {
        self.pins
            .lock()
            .keys()
            .next()
            .copied()
            .map_or(fallback, |seq| seq.min(fallback))
    }

    /// Number of pinned transactions
    pub fn count(&self) -> usize {
        self.pins.lock().values().sum()
    }
}
