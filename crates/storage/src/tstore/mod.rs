//! TStore: log-structured, checkpointed in-memory engine
//!
//! The whole table lives in memory. Durability comes from an operation
//! log of checksummed frames plus periodic full checkpoints:
//!
//! ```text
//! <dir>/
//! ├── checkpoint-000004.ckpt   last published checkpoint
//! ├── ops-000007.seg           operations after the checkpoint
//! └── ops-000008.seg           active segment
//! ```
//!
//! # Write Path
//!
//! Mutations serialize on the writer mutex: compute the resulting record
//! under a read lock, append and fsync its log frame, then install it
//! under a short write lock. A failed append leaves the engine refusing
//! mutations until `recover()` rebuilds it from disk.
//!
//! # Checkpoints
//!
//! `begin_checkpoint` rotates the log so the snapshot covers every closed
//! segment exactly, then writes a pending checkpoint file.
//! `complete_checkpoint` publishes it and drops the segments it covers.

mod checkpoint;
mod config;
mod oplog;

pub use config::{TStoreConfig, TStoreConfigError};

use crate::cursor::TableCursor;
use crate::table::Table;
use checkpoint::CheckpointBody;
use oplog::{OpRecord, OPLOG_PREFIX};
use parking_lot::{Mutex, RwLock};
use replstore_core::{
    BackendStats, CheckpointTicket, Key, ProviderBackend, ProviderKind, PurgeOutcome, Record,
    RecordCursor, RecoveryInfo, ResumeToken, SequenceNumber, StoreError, StoreResult,
};
use replstore_durability::{scan_segments, Segment, SEGMENT_HEADER_SIZE};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
struct PendingCheckpoint {
    id: u64,
    sequence_number: SequenceNumber,
    log_start_segment: u64,
}

struct WriterState {
    active: Option<Segment>,
    pending: Option<PendingCheckpoint>,
    last_checkpoint_id: u64,
    /// False until the first successful recover and after any write fault
    ready: bool,
}

/// The TStore engine
pub struct TStoreBackend {
    dir: PathBuf,
    config: TStoreConfig,
    table: RwLock<Table>,
    writer: Mutex<WriterState>,
}

impl TStoreBackend {
    /// Bind an engine to `dir`, creating the directory if needed.
    ///
    /// Nothing is loaded until [`ProviderBackend::recover`] runs; mutations
    /// before that fail with `IoFailure`.
    pub fn open(dir: &Path, config: TStoreConfig) -> StoreResult<Self> {
        config
            .validate()
            .map_err(|e| StoreError::validation(e.to_string()))?;
        fs::create_dir_all(dir)
            .map_err(|e| StoreError::io_context("creating TStore directory", e))?;
        Ok(TStoreBackend {
            dir: dir.to_path_buf(),
            config,
            table: RwLock::new(Table::new()),
            writer: Mutex::new(WriterState {
                active: None,
                pending: None,
                last_checkpoint_id: 0,
                ready: false,
            }),
        })
    }

    /// Engine directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_ready(writer: &WriterState) -> StoreResult<()> {
        if writer.ready {
            Ok(())
        } else {
            Err(StoreError::io_failure("TStore requires recovery"))
        }
    }

    /// Close the active segment and start the next one; returns its number.
    fn rotate(&self, writer: &mut WriterState) -> StoreResult<u64> {
        let next = match writer.active.as_mut() {
            Some(segment) => {
                segment
                    .sync()
                    .map_err(|e| StoreError::io_context("syncing operation log", e))?;
                segment.segment_number() + 1
            }
            None => return Err(StoreError::io_failure("no active operation log segment")),
        };
        let segment = Segment::create(&self.dir, OPLOG_PREFIX, next)
            .map_err(|e| StoreError::io_context("creating operation log segment", e))?;
        writer.active = Some(segment);
        debug!(segment = next, "Rotated operation log");
        Ok(next)
    }

    /// Append one operation durably. Any failure faults the engine.
    fn log_op(&self, writer: &mut WriterState, op: &OpRecord) -> StoreResult<()> {
        let frame = op.to_frame()?;
        let result = self.write_frame(writer, &frame);
        if result.is_err() {
            writer.ready = false;
            warn!(dir = %self.dir.display(), "Operation log append failed; engine needs recovery");
        }
        result
    }

    fn write_frame(&self, writer: &mut WriterState, frame: &[u8]) -> StoreResult<()> {
        let rotate = writer.active.as_ref().map_or(true, |s| {
            s.size() > SEGMENT_HEADER_SIZE as u64
                && s.size() + frame.len() as u64 > self.config.segment_size
        });
        if rotate {
            self.rotate(writer)?;
        }
        let segment = writer
            .active
            .as_mut()
            .ok_or_else(|| StoreError::io_failure("no active operation log segment"))?;
        let start = segment.size();
        let written = segment.write(frame).and_then(|_| {
            if self.config.sync_writes {
                segment.sync()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            let _ = segment.truncate(start);
            return Err(StoreError::io_context("appending to operation log", e));
        }
        Ok(())
    }

    fn replay(table: &mut Table, op: OpRecord) -> StoreResult<()> {
        if let Some(seq) = op.sequence_number() {
            if seq <= table.last_sequence_number() {
                return Err(StoreError::corruption(format!(
                    "operation log sequence {} does not follow {}",
                    seq,
                    table.last_sequence_number()
                )));
            }
        }
        match op {
            OpRecord::Put(record) => table.apply(record),
            OpRecord::Delete {
                key,
                sequence_number,
            } => table.apply(Record::tombstone(key, sequence_number)),
            OpRecord::Purge {
                keys,
                low_watermark,
            } => {
                table.remove_tombstones(&keys, low_watermark);
            }
        }
        Ok(())
    }
}

impl ProviderBackend for TStoreBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::TStore
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
        let mut writer = self.writer.lock();
        Self::ensure_ready(&writer)?;
        let record = {
            let table = self.table.read();
            table.check_expected(&key, expected)?;
            table.next_put(key, value)
        };
        let seq = record.sequence_number;
        self.log_op(&mut writer, &OpRecord::Put(record.clone()))?;
        self.table.write().apply(record);
        Ok(seq)
    }

    fn delete(&self, key: &Key, expected: Option<SequenceNumber>) -> StoreResult<()> {
        let mut writer = self.writer.lock();
        Self::ensure_ready(&writer)?;
        let tombstone = {
            let table = self.table.read();
            table.check_expected(key, expected)?;
            table.next_delete(key)
        };
        let Some(tombstone) = tombstone else {
            return Ok(());
        };
        self.log_op(
            &mut writer,
            &OpRecord::Delete {
                key: key.clone(),
                sequence_number: tombstone.sequence_number,
            },
        )?;
        self.table.write().apply(tombstone);
        Ok(())
    }

    fn enumerate<'a>(
        &'a self,
        prefix: &[u8],
        resume: Option<&ResumeToken>,
    ) -> StoreResult<Box<dyn RecordCursor + 'a>> {
        Ok(Box::new(TableCursor::new(
            &self.table,
            prefix,
            resume,
            self.config.cursor_batch_size,
        )))
    }

    fn begin_checkpoint(&self) -> StoreResult<CheckpointTicket> {
        let mut writer = self.writer.lock();
        Self::ensure_ready(&writer)?;
        if let Some(pending) = writer.pending {
            return Err(StoreError::validation(format!(
                "checkpoint {} is still in progress",
                pending.id
            )));
        }

        let log_start_segment = match self.rotate(&mut writer) {
            Ok(n) => n,
            Err(e) => {
                writer.ready = false;
                return Err(e);
            }
        };
        let id = writer.last_checkpoint_id + 1;
        let body = {
            let table = self.table.read();
            CheckpointBody {
                checkpoint_id: id,
                last_sequence_number: table.last_sequence_number(),
                log_start_segment,
                tombstone_low_watermark: table.tombstone_low_watermark(),
                records: table.records().cloned().collect(),
            }
        };
        checkpoint::write_pending(&self.dir, &body)?;

        let pending = PendingCheckpoint {
            id,
            sequence_number: body.last_sequence_number,
            log_start_segment,
        };
        writer.pending = Some(pending);
        debug!(
            checkpoint_id = id,
            seq = pending.sequence_number,
            records = body.records.len(),
            "Checkpoint written"
        );
        Ok(CheckpointTicket {
            checkpoint_id: id,
            sequence_number: pending.sequence_number,
        })
    }

    fn complete_checkpoint(&self, ticket: CheckpointTicket) -> StoreResult<()> {
        let mut writer = self.writer.lock();
        let pending = match writer.pending {
            Some(p) if p.id == ticket.checkpoint_id => p,
            _ => {
                return Err(StoreError::validation(format!(
                    "checkpoint {} is not in progress",
                    ticket.checkpoint_id
                )))
            }
        };

        checkpoint::publish(&self.dir, pending.id)?;
        writer.pending = None;
        writer.last_checkpoint_id = pending.id;

        checkpoint::remove_older(&self.dir, pending.id)?;
        let covered = Segment::list(&self.dir, OPLOG_PREFIX)
            .map_err(|e| StoreError::io_context("listing operation log", e))?;
        for number in covered
            .into_iter()
            .filter(|n| *n < pending.log_start_segment)
        {
            Segment::remove(&self.dir, OPLOG_PREFIX, number)
                .map_err(|e| StoreError::io_context("removing operation log segment", e))?;
        }

        info!(
            checkpoint_id = pending.id,
            seq = pending.sequence_number,
            "Checkpoint completed"
        );
        Ok(())
    }

    fn recover(&self) -> StoreResult<RecoveryInfo> {
        let mut writer = self.writer.lock();
        writer.active = None;
        writer.pending = None;
        writer.ready = false;

        let discarded = checkpoint::remove_pending(&self.dir)?;
        if discarded > 0 {
            warn!(discarded, "Discarded unpublished checkpoints");
        }

        let (mut table, log_start_segment, checkpoint_id) =
            match checkpoint::load_latest(&self.dir)? {
                Some(body) => (
                    Table::from_records(
                        body.records,
                        body.last_sequence_number,
                        body.tombstone_low_watermark,
                    ),
                    body.log_start_segment,
                    body.checkpoint_id,
                ),
                None => (Table::new(), 0, 0),
            };

        for stale in Segment::list(&self.dir, OPLOG_PREFIX)
            .map_err(|e| StoreError::io_context("listing operation log", e))?
            .into_iter()
            .filter(|n| *n < log_start_segment)
        {
            Segment::remove(&self.dir, OPLOG_PREFIX, stale)
                .map_err(|e| StoreError::io_context("removing stale segment", e))?;
        }

        let outcome = scan_segments(&self.dir, OPLOG_PREFIX, log_start_segment)?;
        let replayed = outcome.frames.len();
        for frame in outcome.frames {
            let op = OpRecord::from_payload(frame.format_version, &frame.payload)?;
            Self::replay(&mut table, op)?;
        }

        let active = match outcome.segments.last() {
            Some(&n) => Segment::open_append(&self.dir, OPLOG_PREFIX, n),
            None => Segment::create(&self.dir, OPLOG_PREFIX, log_start_segment.max(1)),
        }
        .map_err(|e| StoreError::io_context("opening operation log", e))?;

        let info = RecoveryInfo {
            last_sequence_number: table.last_sequence_number(),
            record_count: table.len(),
            tombstone_count: table.tombstone_count(),
            replayed_operations: replayed,
            truncated_bytes: outcome.truncated_bytes,
        };
        *self.table.write() = table;
        writer.active = Some(active);
        writer.last_checkpoint_id = checkpoint_id;
        writer.ready = true;

        info!(
            dir = %self.dir.display(),
            checkpoint_id,
            last_seq = info.last_sequence_number,
            records = info.record_count,
            replayed = info.replayed_operations,
            "TStore recovered"
        );
        Ok(info)
    }

    fn purge_tombstones(&self, below: SequenceNumber, limit: usize) -> StoreResult<PurgeOutcome> {
        let mut writer = self.writer.lock();
        Self::ensure_ready(&writer)?;
        let (keys, low_watermark) = {
            let table = self.table.read();
            let keys = table.purge_candidates(below, limit);
            let low = keys
                .iter()
                .filter_map(|k| table.get(k))
                .map(|r| r.sequence_number)
                .max()
                .unwrap_or(0);
            (keys, low)
        };
        if keys.is_empty() {
            return Ok(PurgeOutcome::default());
        }

        self.log_op(
            &mut writer,
            &OpRecord::Purge {
                keys: keys.clone(),
                low_watermark,
            },
        )?;
        let removed = self.table.write().remove_tombstones(&keys, low_watermark);
        debug!(removed, low_watermark, "Purged tombstones");
        Ok(PurgeOutcome {
            removed,
            low_watermark,
        })
    }
}
