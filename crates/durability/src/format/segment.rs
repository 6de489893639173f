//! Segment files.
//!
//! Both the replication log and the TStore operation log are sequences of
//! numbered segment files, each holding a fixed header followed by frames.
//!
//! # Header Format
//!
//! ```text
//! ┌───────────────┬──────────────────┬──────────────────────┐
//! │ Magic (4)     │ Format Ver (4)   │ Segment Number (8)   │
//! └───────────────┴──────────────────┴──────────────────────┘
//! ```
//!
//! File names are `{prefix}-NNNNNN.seg`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes identifying a segment file: "RSEG"
pub const SEGMENT_MAGIC: [u8; 4] = *b"RSEG";

/// Current segment header format version
pub const SEGMENT_FORMAT_VERSION: u32 = 1;

/// Size of the segment header in bytes
pub const SEGMENT_HEADER_SIZE: usize = 16;

/// Segment header (16 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Magic bytes
    pub magic: [u8; 4],
    /// Header format version
    pub format_version: u32,
    /// Segment number (monotonically increasing)
    pub segment_number: u64,
}

impl SegmentHeader {
    /// Header for a fresh segment
    pub fn new(segment_number: u64) -> Self {
        SegmentHeader {
            magic: SEGMENT_MAGIC,
            format_version: SEGMENT_FORMAT_VERSION,
            segment_number,
        }
    }

    /// Serialize header to bytes.
    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut bytes = [0u8; SEGMENT_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.segment_number.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes.
    pub fn from_bytes(bytes: &[u8; SEGMENT_HEADER_SIZE]) -> Self {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        SegmentHeader {
            magic,
            format_version: super::frame::read_u32(&bytes[4..8]),
            segment_number: super::frame::read_u64(&bytes[8..16]),
        }
    }

    fn check(&self, expected_number: u64) -> io::Result<()> {
        if self.magic != SEGMENT_MAGIC {
            return Err(invalid_data("Invalid segment magic bytes".to_string()));
        }
        if self.format_version != SEGMENT_FORMAT_VERSION {
            return Err(invalid_data(format!(
                "Unsupported segment format version {}",
                self.format_version
            )));
        }
        if self.segment_number != expected_number {
            return Err(invalid_data(format!(
                "Segment number mismatch: expected {}, got {}",
                expected_number, self.segment_number
            )));
        }
        Ok(())
    }
}

/// Segment file handle.
///
/// Only the active segment is written; older segments are read during
/// recovery and deleted once a checkpoint or truncation covers them.
pub struct Segment {
    file: File,
    segment_number: u64,
    write_position: u64,
    path: PathBuf,
}

impl Segment {
    /// Create a new segment and write its header.
    pub fn create(dir: &Path, prefix: &str, segment_number: u64) -> io::Result<Self> {
        let path = Self::segment_path(dir, prefix, segment_number);
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .read(true)
            .open(&path)?;

        file.write_all(&SegmentHeader::new(segment_number).to_bytes())?;
        file.sync_all()?;
        sync_dir(dir)?;

        Ok(Segment {
            file,
            segment_number,
            write_position: SEGMENT_HEADER_SIZE as u64,
            path,
        })
    }

    /// Open an existing segment for appending, positioned at its end.
    pub fn open_append(dir: &Path, prefix: &str, segment_number: u64) -> io::Result<Self> {
        let path = Self::segment_path(dir, prefix, segment_number);
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header_bytes = [0u8; SEGMENT_HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;
        SegmentHeader::from_bytes(&header_bytes).check(segment_number)?;

        let write_position = file.seek(SeekFrom::End(0))?;
        Ok(Segment {
            file,
            segment_number,
            write_position,
            path,
        })
    }

    /// Read the frame area of a segment (everything after the header).
    pub fn read_body(dir: &Path, prefix: &str, segment_number: u64) -> io::Result<Vec<u8>> {
        let path = Self::segment_path(dir, prefix, segment_number);
        let mut file = File::open(&path)?;

        let mut header_bytes = [0u8; SEGMENT_HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;
        SegmentHeader::from_bytes(&header_bytes).check(segment_number)?;

        let mut body = Vec::new();
        file.read_to_end(&mut body)?;
        Ok(body)
    }

    /// Segment file path.
    ///
    /// Format: `{prefix}-NNNNNN.seg` where NNNNNN is the zero-padded number.
    pub fn segment_path(dir: &Path, prefix: &str, segment_number: u64) -> PathBuf {
        dir.join(format!("{}-{:06}.seg", prefix, segment_number))
    }

    /// Segment numbers present in `dir` for `prefix`, ascending.
    pub fn list(dir: &Path, prefix: &str) -> io::Result<Vec<u64>> {
        let mut numbers = Vec::new();
        if !dir.exists() {
            return Ok(numbers);
        }
        let head = format!("{}-", prefix);
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(num) = name
                .strip_prefix(&head)
                .and_then(|rest| rest.strip_suffix(".seg"))
                .and_then(|digits| digits.parse::<u64>().ok())
            {
                numbers.push(num);
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    /// Remove a segment file.
    pub fn remove(dir: &Path, prefix: &str, segment_number: u64) -> io::Result<()> {
        match fs::remove_file(Self::segment_path(dir, prefix, segment_number)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Segment number.
    pub fn segment_number(&self) -> u64 {
        self.segment_number
    }

    /// Current size in bytes, header included.
    pub fn size(&self) -> u64 {
        self.write_position
    }

    /// File path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append bytes at the write position.
    ///
    /// On a failed write the file is cut back to the previous position so
    /// that no partial frame stays behind.
    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let start = self.write_position;
        if let Err(e) = self.file.write_all(data) {
            let _ = self.truncate(start);
            return Err(e);
        }
        self.write_position += data.len() as u64;
        Ok(())
    }

    /// Sync segment data to disk.
    pub fn sync(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }

    /// Truncate the segment at `position`.
    ///
    /// Used during recovery to drop a torn tail.
    pub fn truncate(&mut self, position: u64) -> io::Result<()> {
        self.file.set_len(position)?;
        self.write_position = position;
        self.file.seek(SeekFrom::Start(position))?;
        self.file.sync_all()
    }
}

/// Fsync a directory so that created, renamed or removed entries persist.
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
