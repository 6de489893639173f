//! Segment corruption utilities
//!
//! Simulate what a crash or failing disk leaves in a segment directory so
//! recovery can be exercised against it.
//!
//! - Truncation: removes bytes from the newest segment (crash during write)
//! - Garbage: appends bytes that do not form a frame (partial write)
//! - Bit flip: damages one byte in place (storage degradation)
//!
//! # Example
//!
//! ```ignore
//! use replstore_storage::testing::SegmentCorruptor;
//!
//! let corruptor = SegmentCorruptor::new(store_dir.join("replog"), "replog");
//! corruptor.truncate_tail(5)?;
//! ```

use replstore_durability::Segment;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Corrupts the segments of one log
pub struct SegmentCorruptor {
    dir: PathBuf,
    prefix: String,
}

impl SegmentCorruptor {
    /// Corruptor for segments named `{prefix}-NNNNNN.seg` in `dir`
    pub fn new(dir: impl AsRef<Path>, prefix: &str) -> Self {
        SegmentCorruptor {
            dir: dir.as_ref().to_path_buf(),
            prefix: prefix.to_string(),
        }
    }

    /// Segment files in order
    pub fn list_segments(&self) -> io::Result<Vec<PathBuf>> {
        Ok(Segment::list(&self.dir, &self.prefix)?
            .into_iter()
            .map(|n| Segment::segment_path(&self.dir, &self.prefix, n))
            .collect())
    }

    /// Newest segment file
    pub fn latest_segment(&self) -> io::Result<Option<PathBuf>> {
        Ok(self.list_segments()?.pop())
    }

    /// Remove `bytes_to_remove` bytes from the end of the newest segment
    pub fn truncate_tail(&self, bytes_to_remove: u64) -> io::Result<TruncationResult> {
        let Some(segment) = self.latest_segment()? else {
            return Ok(TruncationResult::default());
        };
        let original_size = fs::metadata(&segment)?.len();
        let new_size = original_size.saturating_sub(bytes_to_remove);
        OpenOptions::new()
            .write(true)
            .open(&segment)?
            .set_len(new_size)?;
        Ok(TruncationResult {
            segment: Some(segment),
            original_size,
            new_size,
        })
    }

    /// Append raw bytes to the newest segment
    pub fn append_garbage(&self, garbage: &[u8]) -> io::Result<GarbageResult> {
        let Some(segment) = self.latest_segment()? else {
            return Ok(GarbageResult::default());
        };
        let mut file = OpenOptions::new().append(true).open(&segment)?;
        file.write_all(garbage)?;
        file.sync_all()?;
        Ok(GarbageResult {
            segment: Some(segment),
            bytes_appended: garbage.len(),
        })
    }

    /// Append the start of a frame whose body never arrived
    pub fn create_partial_frame(&self) -> io::Result<GarbageResult> {
        let partial = [
            0x40, 0x00, 0x00, 0x00, // length prefix promising 64 bytes
            0x01, // format version
            0x93, 0x01, 0x02, // start of a payload
        ];
        self.append_garbage(&partial)
    }

    /// XOR one byte of segment `index` (0 = oldest) at `offset` from its end
    pub fn flip_byte_from_end(&self, index: usize, offset: u64) -> io::Result<bool> {
        let Some(segment) = self.list_segments()?.into_iter().nth(index) else {
            return Ok(false);
        };
        let mut data = fs::read(&segment)?;
        let len = data.len() as u64;
        if offset == 0 || offset > len {
            return Ok(false);
        }
        let at = (len - offset) as usize;
        data[at] ^= 0xFF;
        fs::write(&segment, data)?;
        Ok(true)
    }
}

/// Outcome of [`SegmentCorruptor::truncate_tail`]
#[derive(Debug, Clone, Default)]
pub struct TruncationResult {
    /// Segment that was truncated
    pub segment: Option<PathBuf>,
    /// Size before truncation
    pub original_size: u64,
    /// Size after truncation
    pub new_size: u64,
}

impl TruncationResult {
    /// Bytes actually removed
    pub fn bytes_removed(&self) -> u64 {
        self.original_size - self.new_size
    }
}

/// Outcome of appending garbage
#[derive(Debug, Clone, Default)]
pub struct GarbageResult {
    /// Segment that received the bytes
    pub segment: Option<PathBuf>,
    /// Bytes appended
    pub bytes_appended: usize,
}
