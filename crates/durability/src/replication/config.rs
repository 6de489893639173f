//! Replication log configuration.

/// Replication log configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationLogConfig {
    /// Maximum segment size in bytes (default: 16MB).
    ///
    /// An append that would grow the active segment past this size goes to
    /// a new segment instead.
    pub segment_size: u64,

    /// Fsync after every append (default: true).
    pub sync_writes: bool,
}

impl Default for ReplicationLogConfig {
    fn default() -> Self {
        ReplicationLogConfig {
            segment_size: 16 * 1024 * 1024,
            sync_writes: true,
        }
    }
}

impl ReplicationLogConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set segment size (builder pattern).
    pub fn with_segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    /// Set per-append fsync (builder pattern).
    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), LogConfigError> {
        if self.segment_size < 1024 {
            return Err(LogConfigError::SegmentSizeTooSmall);
        }
        Ok(())
    }

    /// Small segments for faster rotation in tests.
    pub fn for_testing() -> Self {
        ReplicationLogConfig {
            segment_size: 4 * 1024,
            sync_writes: true,
        }
    }
}

/// Replication log configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogConfigError {
    /// Segment size is too small (minimum 1KB).
    #[error("Segment size must be at least 1KB")]
    SegmentSizeTooSmall,
}
