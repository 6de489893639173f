//! Volatile backend for tests and for plugging in extra engine kinds
//!
//! State survives `recover()` (nothing is ever lost) but not the process.

use crate::cursor::TableCursor;
use crate::selector::BackendFactory;
use crate::table::Table;
use parking_lot::{Mutex, RwLock};
use replstore_core::{
    BackendStats, CheckpointTicket, Key, ProviderBackend, ProviderKind, PurgeOutcome, Record,
    RecordCursor, RecoveryInfo, ResumeToken, SequenceNumber, StoreError, StoreResult,
};
use std::path::Path;

/// In-memory [`ProviderBackend`] reporting a configurable kind
pub struct MemoryBackend {
    kind: ProviderKind,
    table: RwLock<Table>,
    /// Serializes mutations; holds the next checkpoint id
    writer: Mutex<u64>,
}

impl MemoryBackend {
    /// Empty backend reporting `kind`
    pub fn new(kind: ProviderKind) -> Self {
        MemoryBackend {
            kind,
            table: RwLock::new(Table::new()),
            writer: Mutex::new(1),
        }
    }
}

impl ProviderBackend for MemoryBackend {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn stats(&self) -> BackendStats {
        self.table.read().stats()
    }

    fn get(&self, key: &Key) -> StoreResult<Option<Record>> {
        Ok(self.table.read().get(key).cloned())
    }

    fn put(
        &self,
        key: Key,
        value: Vec<u8>,
        expected: Option<SequenceNumber>,
    ) -> StoreResult<SequenceNumber> {
        let _writer = self.writer.lock();
        let mut table = self.table.write();
        table.check_expected(&key, expected)?;
        let record = table.next_put(key, value);
        let seq = record.sequence_number;
        table.apply(record);
        Ok(seq)
    }

    fn delete(&self, key: &Key, expected: Option<SequenceNumber>) -> StoreResult<()> {
        let _writer = self.writer.lock();
        let mut table = self.table.write();
        table.check_expected(key, expected)?;
        if let Some(tombstone) = table.next_delete(key) {
            table.apply(tombstone);
        }
        Ok(())
    }

    fn enumerate<'a>(
        &'a self,
        prefix: &[u8],
        resume: Option<&ResumeToken>,
    ) -> StoreResult<Box<dyn RecordCursor + 'a>> {
        Ok(Box::new(TableCursor::new(&self.table, prefix, resume, 64)))
    }

    fn begin_checkpoint(&self) -> StoreResult<CheckpointTicket> {
        let mut next_id = self.writer.lock();
        let ticket = CheckpointTicket {
            checkpoint_id: *next_id,
            sequence_number: self.table.read().last_sequence_number(),
        };
        *next_id += 1;
        Ok(ticket)
    }

    fn complete_checkpoint(&self, ticket: CheckpointTicket) -> StoreResult<()> {
        if ticket.checkpoint_id >= *self.writer.lock() {
            return Err(StoreError::validation(format!(
                "checkpoint {} was never started",
                ticket.checkpoint_id
            )));
        }
        Ok(())
    }

    fn recover(&self) -> StoreResult<RecoveryInfo> {
        let table = self.table.read();
        Ok(RecoveryInfo {
            last_sequence_number: table.last_sequence_number(),
            record_count: table.len(),
            tombstone_count: table.tombstone_count(),
            ..Default::default()
        })
    }

    fn purge_tombstones(&self, below: SequenceNumber, limit: usize) -> StoreResult<PurgeOutcome> {
        let _writer = self.writer.lock();
        let mut table = self.table.write();
        let keys = table.purge_candidates(below, limit);
        let low_watermark = keys
            .iter()
            .filter_map(|k| table.get(k))
            .map(|r| r.sequence_number)
            .max()
            .unwrap_or(0);
        let removed = table.remove_tombstones(&keys, low_watermark);
        Ok(PurgeOutcome {
            removed,
            low_watermark,
        })
    }
}

/// Factory producing a fresh [`MemoryBackend`] per open
#[derive(Debug, Clone, Copy)]
pub struct MemoryFactory {
    kind: ProviderKind,
}

impl MemoryFactory {
    /// Factory whose backends report `kind`
    pub fn new(kind: ProviderKind) -> Self {
        MemoryFactory { kind }
    }
}

impl BackendFactory for MemoryFactory {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn open(&self, _dir: &Path) -> StoreResult<Box<dyn ProviderBackend>> {
        Ok(Box::new(MemoryBackend::new(self.kind)))
    }
}
