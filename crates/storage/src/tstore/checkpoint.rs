//! TStore checkpoint files.
//!
//! A checkpoint is a full copy of the table written to
//! `checkpoint-NNNNNN.tmp` by `begin_checkpoint` and atomically renamed to
//! `checkpoint-NNNNNN.ckpt` by `complete_checkpoint`. Only published
//! checkpoints are ever loaded; leftover `.tmp` files are discarded.
//!
//! # Format
//!
//! ```text
//! ┌─────────────┬─────────────────┬──────────────────────────────────┐
//! │ Magic (4)   │ Format Ver (4)  │ Frame(MessagePack CheckpointBody)│
//! └─────────────┴─────────────────┴──────────────────────────────────┘
//! ```

use replstore_core::{Record, SequenceNumber, StoreError, StoreResult};
use replstore_durability::{decode_frame, encode_frame, sync_dir};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Magic bytes identifying a checkpoint file: "TSCK"
const CHECKPOINT_MAGIC: [u8; 4] = *b"TSCK";

/// Current checkpoint format version
const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Table contents captured by a checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CheckpointBody {
    pub checkpoint_id: u64,
    pub last_sequence_number: SequenceNumber,
    /// First operation log segment not covered by this checkpoint
    pub log_start_segment: u64,
    pub tombstone_low_watermark: SequenceNumber,
    pub records: Vec<Record>,
}

pub(crate) fn checkpoint_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("checkpoint-{:06}.ckpt", id))
}

pub(crate) fn pending_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("checkpoint-{:06}.tmp", id))
}

fn parse_id(name: &str, suffix: &str) -> Option<u64> {
    name.strip_prefix("checkpoint-")?
        .strip_suffix(suffix)?
        .parse()
        .ok()
}

fn list_with_suffix(dir: &Path, suffix: &str) -> StoreResult<Vec<u64>> {
    let entries =
        fs::read_dir(dir).map_err(|e| StoreError::io_context("listing checkpoints", e))?;
    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io_context("listing checkpoints", e))?;
        if let Some(id) = entry.file_name().to_str().and_then(|n| parse_id(n, suffix)) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Published checkpoint ids, ascending
pub(crate) fn list_checkpoints(dir: &Path) -> StoreResult<Vec<u64>> {
    list_with_suffix(dir, ".ckpt")
}

/// Write the body to its pending file and fsync it.
pub(crate) fn write_pending(dir: &Path, body: &CheckpointBody) -> StoreResult<PathBuf> {
    let payload =
        rmp_serde::to_vec(body).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let frame = encode_frame(1, &payload)
        .map_err(|e| StoreError::validation(format!("checkpoint rejected: {}", e)))?;
    let mut bytes = Vec::with_capacity(8 + frame.len());
    bytes.extend_from_slice(&CHECKPOINT_MAGIC);
    bytes.extend_from_slice(&CHECKPOINT_FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&frame);

    let path = pending_path(dir, body.checkpoint_id);
    let mut file =
        File::create(&path).map_err(|e| StoreError::io_context("creating checkpoint", e))?;
    file.write_all(&bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| StoreError::io_context("writing checkpoint", e))?;
    Ok(path)
}

/// Atomically publish a pending checkpoint.
pub(crate) fn publish(dir: &Path, id: u64) -> StoreResult<()> {
    fs::rename(pending_path(dir, id), checkpoint_path(dir, id))
        .and_then(|_| sync_dir(dir))
        .map_err(|e| StoreError::io_context("publishing checkpoint", e))
}

/// Decode a checkpoint file image.
pub(crate) fn decode(bytes: &[u8]) -> StoreResult<CheckpointBody> {
    if bytes.len() < 8 || bytes[0..4] != CHECKPOINT_MAGIC {
        return Err(StoreError::corruption("checkpoint has bad magic"));
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[4..8]);
    let version = u32::from_le_bytes(version);
    if version != CHECKPOINT_FORMAT_VERSION {
        return Err(StoreError::corruption(format!(
            "unsupported checkpoint format version {}",
            version
        )));
    }
    let (frame, _) = decode_frame(&bytes[8..])
        .map_err(|e| StoreError::corruption(format!("checkpoint frame: {}", e)))?;
    rmp_serde::from_slice(frame.payload)
        .map_err(|e| StoreError::corruption(format!("checkpoint body: {}", e)))
}

/// Load the newest published checkpoint, if any.
pub(crate) fn load_latest(dir: &Path) -> StoreResult<Option<CheckpointBody>> {
    let Some(&id) = list_checkpoints(dir)?.last() else {
        return Ok(None);
    };
    let bytes = fs::read(checkpoint_path(dir, id))
        .map_err(|e| StoreError::io_context("reading checkpoint", e))?;
    let body = decode(&bytes)?;
    if body.checkpoint_id != id {
        return Err(StoreError::corruption(format!(
            "checkpoint file {} holds id {}",
            id, body.checkpoint_id
        )));
    }
    Ok(Some(body))
}

/// Remove published checkpoints older than `keep`.
pub(crate) fn remove_older(dir: &Path, keep: u64) -> StoreResult<()> {
    for id in list_checkpoints(dir)? {
        if id < keep {
            fs::remove_file(checkpoint_path(dir, id))
                .map_err(|e| StoreError::io_context("removing old checkpoint", e))?;
        }
    }
    Ok(())
}

/// Remove every pending checkpoint file.
pub(crate) fn remove_pending(dir: &Path) -> StoreResult<usize> {
    let ids = list_with_suffix(dir, ".tmp")?;
    for id in &ids {
        fs::remove_file(pending_path(dir, *id))
            .map_err(|e| StoreError::io_context("removing pending checkpoint", e))?;
    }
    Ok(ids.len())
}
