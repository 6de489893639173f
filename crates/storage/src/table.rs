//! Ordered in-memory record table shared by the in-memory engines.
//!
//! Holds the current record per key (tombstones included) together with
//! the counters a backend reports. Mutation methods never allocate
//! sequence numbers on their own: callers compute the next record with
//! [`Table::next_put`] / [`Table::next_delete`], make it durable, then
//! [`Table::apply`] it.

use replstore_core::{
    BackendStats, Key, Record, RecordState, SequenceNumber, StoreError, StoreResult,
};
use std::collections::BTreeMap;
use std::ops::Bound;

/// Current records plus bookkeeping
#[derive(Debug, Clone, Default)]
pub struct Table {
    records: BTreeMap<Key, Record>,
    last_sequence_number: SequenceNumber,
    tombstones: usize,
    logical_size: usize,
    tombstone_low_watermark: SequenceNumber,
}

impl Table {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from checkpointed records
    pub fn from_records(
        records: Vec<Record>,
        last_sequence_number: SequenceNumber,
        tombstone_low_watermark: SequenceNumber,
    ) -> Self {
        let mut table = Table {
            last_sequence_number,
            tombstone_low_watermark,
            ..Default::default()
        };
        for record in records {
            table.apply(record);
        }
        table
    }

    /// Current record for `key`, tombstones included
    pub fn get(&self, key: &Key) -> Option<&Record> {
        self.records.get(key)
    }

    /// Sequence number of the current record (0 if absent)
    pub fn current_sequence_number(&self, key: &Key) -> SequenceNumber {
        self.records.get(key).map_or(0, |r| r.sequence_number)
    }

    /// Fail with `Conflict` unless `expected` matches the current sequence
    pub fn check_expected(&self, key: &Key, expected: Option<SequenceNumber>) -> StoreResult<()> {
        if let Some(expected) = expected {
            let actual = self.current_sequence_number(key);
            if actual != expected {
                return Err(StoreError::Conflict {
                    key: key.as_bytes().to_vec(),
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Record a put of `value` under `key` would produce
    pub fn next_put(&self, key: Key, value: Vec<u8>) -> Record {
        let state = match self.records.get(&key) {
            Some(current) if !current.is_tombstone() => RecordState::Updated,
            _ => RecordState::Inserted,
        };
        Record::live(key, value, self.last_sequence_number + 1, state)
    }

    /// Tombstone a delete of `key` would produce; `None` if `key` is not live
    pub fn next_delete(&self, key: &Key) -> Option<Record> {
        match self.records.get(key) {
            Some(current) if !current.is_tombstone() => Some(Record::tombstone(
                key.clone(),
                self.last_sequence_number + 1,
            )),
            _ => None,
        }
    }

    /// Install `record` as the current version of its key
    pub fn apply(&mut self, record: Record) {
        self.last_sequence_number = self.last_sequence_number.max(record.sequence_number);
        if record.is_tombstone() {
            self.tombstones += 1;
        }
        self.logical_size += record.logical_size();
        if let Some(previous) = self.records.insert(record.key.clone(), record) {
            if previous.is_tombstone() {
                self.tombstones -= 1;
            }
            self.logical_size -= previous.logical_size();
        }
    }

    /// Up to `limit` tombstones with sequence numbers below `below`, oldest first
    ///
    /// The newest tombstone in the table is never a candidate.
    pub fn purge_candidates(&self, below: SequenceNumber, limit: usize) -> Vec<Key> {
        let mut tombstones: Vec<(SequenceNumber, &Key)> = self
            .records
            .values()
            .filter(|r| r.is_tombstone())
            .map(|r| (r.sequence_number, &r.key))
            .collect();
        tombstones.sort_unstable();
        tombstones.pop();
        tombstones
            .into_iter()
            .filter(|(seq, _)| *seq < below)
            .take(limit)
            .map(|(_, key)| key.clone())
            .collect()
    }

    /// Physically remove tombstones; live records among `keys` are left alone
    pub fn remove_tombstones(&mut self, keys: &[Key], low_watermark: SequenceNumber) -> usize {
        let mut removed = 0;
        for key in keys {
            if self.records.get(key).is_some_and(|r| r.is_tombstone()) {
                if let Some(record) = self.records.remove(key) {
                    self.tombstones -= 1;
                    self.logical_size -= record.logical_size();
                    removed += 1;
                }
            }
        }
        self.tombstone_low_watermark = self.tombstone_low_watermark.max(low_watermark);
        removed
    }

    /// Up to `limit` records starting with `prefix`, strictly after `after`
    pub fn batch_after(&self, prefix: &[u8], after: Option<&Key>, limit: usize) -> Vec<Record> {
        let lower = match after {
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Included(Key::from(prefix)),
        };
        self.records
            .range((lower, Bound::Unbounded))
            .skip_while(|(k, _)| k.as_bytes() < prefix)
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Every record in key order
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Highest sequence number ever assigned
    pub fn last_sequence_number(&self) -> SequenceNumber {
        self.last_sequence_number
    }

    /// Highest sequence number among purged tombstones
    pub fn tombstone_low_watermark(&self) -> SequenceNumber {
        self.tombstone_low_watermark
    }

    /// Records (live and tombstones)
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table holds no records at all
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Tombstones currently held
    pub fn tombstone_count(&self) -> usize {
        self.tombstones
    }

    /// Counters in backend form
    pub fn stats(&self) -> BackendStats {
        BackendStats {
            last_sequence_number: self.last_sequence_number,
            live_count: self.records.len() - self.tombstones,
            tombstone_count: self.tombstones,
            logical_size: self.logical_size,
            tombstone_low_watermark: self.tombstone_low_watermark,
        }
    }
}
