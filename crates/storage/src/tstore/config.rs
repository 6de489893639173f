//! TStore engine configuration.

/// TStore configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TStoreConfig {
    /// Fsync the operation log after every mutation (default: true).
    pub sync_writes: bool,

    /// Maximum operation log segment size in bytes (default: 16MB).
    pub segment_size: u64,

    /// Records fetched per lock acquisition while enumerating (default: 256).
    pub cursor_batch_size: usize,
}

impl Default for TStoreConfig {
    fn default() -> Self {
        TStoreConfig {
            sync_writes: true,
            segment_size: 16 * 1024 * 1024,
            cursor_batch_size: 256,
        }
    }
}

impl TStoreConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set per-mutation fsync (builder pattern).
    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Set segment size (builder pattern).
    pub fn with_segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    /// Set cursor batch size (builder pattern).
    pub fn with_cursor_batch_size(mut self, size: usize) -> Self {
        self.cursor_batch_size = size;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), TStoreConfigError> {
        if self.segment_size < 1024 {
            return Err(TStoreConfigError::SegmentSizeTooSmall);
        }
        if self.cursor_batch_size == 0 {
            return Err(TStoreConfigError::ZeroCursorBatch);
        }
        Ok(())
    }

    /// Small segments and batches for tests.
    pub fn for_testing() -> Self {
        TStoreConfig {
            sync_writes: true,
            segment_size: 4 * 1024,
            cursor_batch_size: 4,
        }
    }
}

/// TStore configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TStoreConfigError {
    /// Segment size is too small (minimum 1KB).
    #[error("Segment size must be at least 1KB")]
    SegmentSizeTooSmall,

    /// Cursor batch size of zero would never make progress.
    #[error("Cursor batch size must be at least 1")]
    ZeroCursorBatch,
}
