//! Checksummed record framing.
//!
//! Every record written to a segment file is self-delimiting:
//!
//! ```text
//! ┌─────────────────┬──────────────────┬─────────────────────────┬──────────┐
//! │ Length (4 bytes)│ Format Ver (1)   │ Payload (variable)      │ CRC32 (4)│
//! └─────────────────┴──────────────────┴─────────────────────────┴──────────┘
//! ```
//!
//! The length field covers format version, payload and CRC. The CRC covers
//! format version and payload.

use crc32fast::Hasher;

/// Bytes of framing overhead around a payload
pub const FRAME_OVERHEAD: usize = 4 + 1 + 4;

/// Upper bound on a single frame, used to tell a torn length field from a
/// real record
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// A decoded frame borrowing its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Format version byte written with the payload
    pub format_version: u8,
    /// Payload bytes
    pub payload: &'a [u8],
}

/// Frame parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Not enough data to parse a frame
    #[error("Insufficient data to parse frame")]
    InsufficientData,

    /// Frame length field is invalid
    #[error("Invalid frame length {0}")]
    InvalidLength(usize),

    /// Payload does not fit in a single frame
    #[error("Payload of {0} bytes exceeds the frame size limit")]
    TooLarge(usize),

    /// Checksum verification failed
    #[error("Checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the frame
        expected: u32,
        /// Checksum computed over the frame body
        computed: u32,
    },
}

/// Encode `payload` into a frame.
///
/// Fails with [`FrameError::TooLarge`] when [`decode_frame`] would refuse
/// the result.
pub fn encode_frame(format_version: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_FRAME_LEN - 5 {
        return Err(FrameError::TooLarge(payload.len()));
    }
    let mut body = Vec::with_capacity(1 + payload.len());
    body.push(format_version);
    body.extend_from_slice(payload);
    let crc = compute_crc(&body);

    let total_len = body.len() + 4;
    let mut frame = Vec::with_capacity(4 + total_len);
    frame.extend_from_slice(&(total_len as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Decode the frame at the start of `bytes`.
///
/// Returns the frame and the number of bytes it occupies.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame<'_>, usize), FrameError> {
    if bytes.len() < 4 {
        return Err(FrameError::InsufficientData);
    }
    let length = read_u32(&bytes[0..4]) as usize;
    if length < 5 || length > MAX_FRAME_LEN {
        return Err(FrameError::InvalidLength(length));
    }
    if bytes.len() < 4 + length {
        return Err(FrameError::InsufficientData);
    }

    let body = &bytes[4..4 + length - 4];
    let stored_crc = read_u32(&bytes[4 + length - 4..4 + length]);
    let computed_crc = compute_crc(body);
    if stored_crc != computed_crc {
        return Err(FrameError::ChecksumMismatch {
            expected: stored_crc,
            computed: computed_crc,
        });
    }

    Ok((
        Frame {
            format_version: body[0],
            payload: &body[1..],
        },
        4 + length,
    ))
}

pub(crate) fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

pub(crate) fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

pub(crate) fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
