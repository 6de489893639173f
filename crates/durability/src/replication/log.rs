//! Segmented replication log.
//!
//! The log is the commit point of the store: a transaction is committed
//! once its entry is durable here, before any backend write happens.
//! Recovery replays entries the backend has not yet absorbed, and a
//! secondary catches up by reading entries after its last sequence number.
//!
//! # File Layout
//!
//! ```text
//! replog/
//! ├── replog-000001.seg
//! ├── replog-000002.seg
//! └── replog-000003.seg   (active)
//! ```

use super::config::ReplicationLogConfig;
use super::entry::{LogFormat, ReplicationEntry};
use crate::format::{decode_frame, encode_frame, Segment, SEGMENT_HEADER_SIZE};
use crate::reader::{scan_segments, ReadStopReason};
use parking_lot::Mutex;
use replstore_core::{SequenceNumber, StoreError, StoreResult};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name prefix of replication log segments
pub const LOG_SEGMENT_PREFIX: &str = "replog";

/// What opening or recovering the log found on disk
#[derive(Debug, Clone)]
pub struct LogRecovery {
    /// Every entry still in the log, in commit order
    pub entries: Vec<ReplicationEntry>,
    /// Bytes of torn tail removed
    pub truncated_bytes: u64,
    /// Why the scan stopped
    pub stop_reason: ReadStopReason,
}

struct LogState {
    active: Option<Segment>,
    /// Highest sequence number per segment (0 for a segment with no entries)
    segment_max: BTreeMap<u64, SequenceNumber>,
    last_sequence_number: SequenceNumber,
    faulted: bool,
}

/// Append-only log of committed write batches.
///
/// Thread safety: appends, reads and truncation serialize on one mutex.
pub struct ReplicationLog {
    dir: PathBuf,
    config: ReplicationLogConfig,
    state: Mutex<LogState>,
}

impl ReplicationLog {
    /// Open (or create) the log in `dir`, repairing a torn tail.
    pub fn open(dir: &Path, config: ReplicationLogConfig) -> StoreResult<(Self, LogRecovery)> {
        config
            .validate()
            .map_err(|e| StoreError::validation(e.to_string()))?;
        fs::create_dir_all(dir)
            .map_err(|e| StoreError::io_context("creating replication log directory", e))?;

        let log = ReplicationLog {
            dir: dir.to_path_buf(),
            config,
            state: Mutex::new(LogState {
                active: None,
                segment_max: BTreeMap::new(),
                last_sequence_number: 0,
                faulted: true,
            }),
        };
        let recovery = log.recover()?;
        Ok((log, recovery))
    }

    /// Rescan the log from disk and reopen the active segment.
    ///
    /// Clears a fault left by a failed append.
    pub fn recover(&self) -> StoreResult<LogRecovery> {
        let mut state = self.state.lock();
        state.active = None;
        state.faulted = true;

        let outcome = scan_segments(&self.dir, LOG_SEGMENT_PREFIX, 0)?;

        let mut segment_max: BTreeMap<u64, SequenceNumber> =
            outcome.segments.iter().map(|n| (*n, 0)).collect();
        let mut entries = Vec::with_capacity(outcome.frames.len());
        let mut last = 0;
        for frame in &outcome.frames {
            let entry = ReplicationEntry::decode(frame.format_version, &frame.payload)?;
            if entry.records.is_empty() {
                continue;
            }
            if entry.first_sequence_number() <= last {
                return Err(StoreError::corruption(format!(
                    "replication log out of order: entry for txn {} starts at {} after {}",
                    entry.txn_id,
                    entry.first_sequence_number(),
                    last
                )));
            }
            last = entry.last_sequence_number();
            segment_max.insert(frame.segment_number, last);
            entries.push(entry);
        }

        let active = match outcome.segments.last() {
            Some(&number) => Segment::open_append(&self.dir, LOG_SEGMENT_PREFIX, number),
            None => {
                segment_max.insert(1, 0);
                Segment::create(&self.dir, LOG_SEGMENT_PREFIX, 1)
            }
        }
        .map_err(|e| StoreError::io_context("opening active log segment", e))?;

        info!(
            entries = entries.len(),
            last_seq = last,
            segments = segment_max.len(),
            truncated_bytes = outcome.truncated_bytes,
            "Replication log opened"
        );

        state.active = Some(active);
        state.segment_max = segment_max;
        state.last_sequence_number = last;
        state.faulted = false;

        Ok(LogRecovery {
            entries,
            truncated_bytes: outcome.truncated_bytes,
            stop_reason: outcome.stop_reason,
        })
    }

    /// Durably append one committed batch.
    ///
    /// The entry's sequence numbers must follow the last logged one. On an
    /// I/O error nothing of the entry stays in the log and further appends
    /// fail until [`ReplicationLog::recover`] runs.
    pub fn append(&self, entry: &ReplicationEntry, format: LogFormat) -> StoreResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.faulted {
            return Err(StoreError::io_failure(
                "replication log is faulted; recovery required",
            ));
        }
        if entry.records.is_empty() {
            return Ok(());
        }
        if entry.first_sequence_number() <= state.last_sequence_number {
            return Err(StoreError::validation(format!(
                "entry starts at {} but log is at {}",
                entry.first_sequence_number(),
                state.last_sequence_number
            )));
        }

        let frame = encode_frame(format.to_tag(), &entry.encode(format)?)
            .map_err(|e| StoreError::validation(format!("replication entry rejected: {}", e)))?;

        let needs_rotation = match &state.active {
            Some(seg) => {
                seg.size() > SEGMENT_HEADER_SIZE as u64
                    && seg.size() + frame.len() as u64 > self.config.segment_size
            }
            None => true,
        };
        if needs_rotation {
            if let Err(e) = self.rotate(state) {
                state.faulted = true;
                return Err(e);
            }
        }

        let segment = match state.active.as_mut() {
            Some(segment) => segment,
            None => {
                state.faulted = true;
                return Err(StoreError::io_failure("no active log segment"));
            }
        };
        let start = segment.size();
        let written = segment.write(&frame).and_then(|_| {
            if self.config.sync_writes {
                segment.sync()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            let _ = segment.truncate(start);
            state.faulted = true;
            return Err(StoreError::io_context("appending replication entry", e));
        }

        let number = segment.segment_number();
        state.last_sequence_number = entry.last_sequence_number();
        state.segment_max.insert(number, state.last_sequence_number);
        debug!(
            txn_id = entry.txn_id,
            seq = state.last_sequence_number,
            format = ?format,
            "Replication entry appended"
        );
        Ok(())
    }

    fn rotate(&self, state: &mut LogState) -> StoreResult<()> {
        let next = match state.active.as_mut() {
            Some(seg) => {
                seg.sync()
                    .map_err(|e| StoreError::io_context("syncing log segment", e))?;
                seg.segment_number() + 1
            }
            None => state.segment_max.keys().next_back().map_or(1, |n| n + 1),
        };
        let segment = Segment::create(&self.dir, LOG_SEGMENT_PREFIX, next)
            .map_err(|e| StoreError::io_context("creating log segment", e))?;
        state.segment_max.insert(next, 0);
        state.active = Some(segment);
        debug!(segment = next, "Rotated replication log segment");
        Ok(())
    }

    /// Entries holding any sequence number greater than `seq`, in order.
    pub fn entries_since(&self, seq: SequenceNumber) -> StoreResult<Vec<ReplicationEntry>> {
        let state = self.state.lock();
        let mut out = Vec::new();
        for (&number, &max) in state.segment_max.iter() {
            if max <= seq {
                continue;
            }
            let body = Segment::read_body(&self.dir, LOG_SEGMENT_PREFIX, number)
                .map_err(|e| StoreError::io_context("reading log segment", e))?;
            let mut offset = 0;
            while offset < body.len() {
                let (frame, consumed) = decode_frame(&body[offset..]).map_err(|e| {
                    StoreError::corruption(format!("log segment {}: {}", number, e))
                })?;
                let entry = ReplicationEntry::decode(frame.format_version, frame.payload)?;
                if entry.last_sequence_number() > seq {
                    out.push(entry);
                }
                offset += consumed;
            }
        }
        Ok(out)
    }

    /// Delete closed segments whose entries are all at or below `seq`.
    ///
    /// Returns the number of segments removed. The active segment stays.
    pub fn truncate_through(&self, seq: SequenceNumber) -> StoreResult<usize> {
        let mut state = self.state.lock();
        let active = state.active.as_ref().map(|s| s.segment_number());
        let doomed: Vec<u64> = state
            .segment_max
            .iter()
            .filter(|(number, max)| Some(**number) != active && **max <= seq)
            .map(|(number, _)| *number)
            .collect();

        for number in &doomed {
            Segment::remove(&self.dir, LOG_SEGMENT_PREFIX, *number)
                .map_err(|e| StoreError::io_context("removing log segment", e))?;
            state.segment_max.remove(number);
        }
        if !doomed.is_empty() {
            info!(removed = doomed.len(), through_seq = seq, "Truncated replication log");
        } else {
            debug!(through_seq = seq, "No replication log segments to truncate");
        }
        Ok(doomed.len())
    }

    /// Highest sequence number in the log.
    pub fn last_sequence_number(&self) -> SequenceNumber {
        self.state.lock().last_sequence_number
    }

    /// Number of segment files the log currently spans.
    pub fn segment_count(&self) -> usize {
        self.state.lock().segment_max.len()
    }

    /// Whether a failed append left the log needing recovery.
    pub fn is_faulted(&self) -> bool {
        self.state.lock().faulted
    }

    /// Log directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for ReplicationLog {
    fn drop(&mut self) {
        if let Some(segment) = self.state.get_mut().active.as_mut() {
            if let Err(e) = segment.sync() {
                warn!(error = %e, "Failed to sync replication log on close");
            }
        }
    }
}
