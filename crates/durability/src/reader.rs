//! Segment scanning for recovery and replay.
//!
//! A scan reads every frame of every segment in order. A torn or
//! checksum-failing tail in the newest segment is what a crash mid-append
//! leaves behind and is cut off; the same damage in an older segment means
//! acknowledged data is gone and is reported as corruption.

use crate::format::{decode_frame, FrameError, Segment};
use replstore_core::{StoreError, StoreResult};
use std::fs;
use std::io;
use std::path::Path;
use tracing::warn;

/// A frame read back from a segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFrame {
    /// Segment the frame was read from
    pub segment_number: u64,
    /// Format version byte of the frame
    pub format_version: u8,
    /// Frame payload
    pub payload: Vec<u8>,
}

/// Reason why a scan stopped reading
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStopReason {
    /// Every segment was read to its end
    EndOfData,
    /// Newest segment ended in an incomplete frame
    PartialRecord {
        /// Segment holding the partial frame
        segment_number: u64,
        /// Offset of the partial frame within the segment body
        offset: usize,
    },
    /// Newest segment ended in a frame whose checksum failed
    ChecksumMismatch {
        /// Segment holding the bad frame
        segment_number: u64,
        /// Offset of the bad frame within the segment body
        offset: usize,
    },
    /// Newest segment had an incomplete header
    TornHeader {
        /// Segment that was dropped
        segment_number: u64,
    },
}

/// Result of scanning a segment directory
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Frames in log order
    pub frames: Vec<ScannedFrame>,
    /// Segments present after the scan, ascending
    pub segments: Vec<u64>,
    /// Why the scan stopped
    pub stop_reason: ReadStopReason,
    /// Bytes of torn tail removed from disk
    pub truncated_bytes: u64,
}

/// Scan segments numbered `start_segment` and above.
///
/// Repairs the newest segment in place when it ends in a torn frame.
pub fn scan_segments(dir: &Path, prefix: &str, start_segment: u64) -> StoreResult<ScanOutcome> {
    let mut segments: Vec<u64> = Segment::list(dir, prefix)
        .map_err(|e| StoreError::io_context("listing segments", e))?
        .into_iter()
        .filter(|n| *n >= start_segment)
        .collect();

    let mut frames = Vec::new();
    let mut stop_reason = ReadStopReason::EndOfData;
    let mut truncated_bytes = 0u64;
    let newest = segments.last().copied();

    let mut index = 0;
    while index < segments.len() {
        let segment_number = segments[index];
        let is_newest = Some(segment_number) == newest;

        let body = match Segment::read_body(dir, prefix, segment_number) {
            Ok(body) => body,
            Err(e) if is_newest && e.kind() == io::ErrorKind::UnexpectedEof => {
                // Crash between creating the file and syncing its header.
                let path = Segment::segment_path(dir, prefix, segment_number);
                let len = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                warn!(segment = segment_number, "Dropping segment with torn header");
                Segment::remove(dir, prefix, segment_number)
                    .map_err(|e| StoreError::io_context("removing torn segment", e))?;
                truncated_bytes += len;
                stop_reason = ReadStopReason::TornHeader { segment_number };
                segments.remove(index);
                continue;
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(StoreError::corruption(format!(
                    "{} segment {}: {}",
                    prefix, segment_number, e
                )));
            }
            Err(e) => return Err(StoreError::io_context("reading segment", e)),
        };

        let mut offset = 0usize;
        while offset < body.len() {
            match decode_frame(&body[offset..]) {
                Ok((frame, consumed)) => {
                    frames.push(ScannedFrame {
                        segment_number,
                        format_version: frame.format_version,
                        payload: frame.payload.to_vec(),
                    });
                    offset += consumed;
                }
                Err(err) => {
                    if !is_newest {
                        return Err(StoreError::corruption(format!(
                            "{} segment {} damaged at offset {}: {}",
                            prefix, segment_number, offset, err
                        )));
                    }
                    stop_reason = match err {
                        FrameError::ChecksumMismatch { .. } => ReadStopReason::ChecksumMismatch {
                            segment_number,
                            offset,
                        },
                        _ => ReadStopReason::PartialRecord {
                            segment_number,
                            offset,
                        },
                    };
                    let torn = (body.len() - offset) as u64;
                    warn!(
                        segment = segment_number,
                        offset,
                        bytes = torn,
                        "Truncating torn tail"
                    );
                    let mut segment = Segment::open_append(dir, prefix, segment_number)
                        .map_err(|e| StoreError::io_context("opening segment for repair", e))?;
                    let keep = segment.size() - torn;
                    segment
                        .truncate(keep)
                        .map_err(|e| StoreError::io_context("truncating torn tail", e))?;
                    truncated_bytes += torn;
                    break;
                }
            }
        }
        index += 1;
    }

    Ok(ScanOutcome {
        frames,
        segments,
        stop_reason,
        truncated_bytes,
    })
}
