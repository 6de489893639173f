//! Durability layer for replstore
//!
//! Everything that appends to or replays from disk:
//!
//! - Checksummed frames and numbered segment files
//! - Segment scanning with torn-tail repair
//! - The replication log holding one entry per committed transaction

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod format;
pub mod reader;
pub mod replication;

pub use format::{
    decode_frame, encode_frame, sync_dir, FrameError, Segment, MAX_FRAME_LEN, SEGMENT_HEADER_SIZE,
};
pub use reader::{scan_segments, ReadStopReason, ScanOutcome, ScannedFrame};
pub use replication::{
    LogConfigError, LogFormat, LogRecordError, LogRecovery, ReplicationEntry, ReplicationLog,
    ReplicationLogConfig, LOG_SEGMENT_PREFIX,
};
