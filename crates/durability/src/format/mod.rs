//! On-disk byte formats shared by every log in the system.
//!
//! - `frame`: length-prefixed, checksummed records
//! - `segment`: numbered segment files holding frames

pub mod frame;
pub mod segment;

pub use frame::{decode_frame, encode_frame, Frame, FrameError, FRAME_OVERHEAD, MAX_FRAME_LEN};
pub use segment::{
    sync_dir, Segment, SegmentHeader, SEGMENT_FORMAT_VERSION, SEGMENT_HEADER_SIZE, SEGMENT_MAGIC,
};
