//! Store configuration via `replstore.toml`
//!
//! On create, the effective configuration is written into the store
//! directory. On open, it is read back; a missing file is replaced with
//! the commented defaults. To change settings, edit the file and reopen.

use replstore_core::{ProviderKind, StoreError, StoreResult};
use replstore_durability::ReplicationLogConfig;
use replstore_storage::TStoreConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file name placed in the store directory.
pub const CONFIG_FILE_NAME: &str = "replstore.toml";

/// Smallest accepted replication log segment size
const MIN_LOG_SEGMENT_SIZE: u64 = 1024;

/// Errors from loading or validating a [`StoreConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Provider name is not one of the known engines
    #[error("invalid provider '{0}': expected \"tstore\" or \"ese\"")]
    InvalidProvider(String),

    /// Idle transaction timeout of zero would reap everything
    #[error("idle_transaction_timeout_ms must be greater than zero")]
    ZeroIdleTimeout,

    /// Segment size below the minimum
    #[error("log_segment_size {0} is below the minimum of {MIN_LOG_SEGMENT_SIZE} bytes")]
    SegmentSizeTooSmall(u64),

    /// Cleanup batch of zero would never remove anything
    #[error("max_tombstones_per_cleanup must be greater than zero")]
    ZeroCleanupBatch,

    /// Config file could not be read or written
    #[error("config file '{path}': {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config file '{path}': {message}")]
    Parse {
        /// File involved
        path: PathBuf,
        /// Parser message
        message: String,
    },
}

impl From<ConfigError> for StoreError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Io { source, .. } => StoreError::io_context("store config", source),
            other => StoreError::Validation(other.to_string()),
        }
    }
}

/// Store configuration loaded from `replstore.toml`.
///
/// # Example
///
/// ```toml
/// provider = "tstore"
/// sync_writes = true
/// idle_transaction_timeout_ms = 30000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Engine for new stores: `"tstore"` or `"ese"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// fsync every log append and engine mutation.
    #[serde(default = "default_true")]
    pub sync_writes: bool,
    /// Transactions idle this long are reaped.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_transaction_timeout_ms: u64,
    /// Background reaper period; 0 disables the reaper thread.
    #[serde(default = "default_reaper_interval_ms")]
    pub reaper_interval_ms: u64,
    /// Tombstone count above which cleanup runs.
    #[serde(default = "default_cleanup_limit")]
    pub tombstone_cleanup_limit: usize,
    /// Upper bound on tombstones removed by one cleanup pass.
    #[serde(default = "default_cleanup_batch")]
    pub max_tombstones_per_cleanup: usize,
    /// Replication log segment size in bytes.
    #[serde(default = "default_log_segment_size")]
    pub log_segment_size: u64,
    /// Drop replication log segments covered by a completed checkpoint.
    #[serde(default = "default_true")]
    pub truncate_log_on_checkpoint: bool,
}

fn default_provider() -> String {
    ProviderKind::TStore.as_str().to_string()
}

fn default_true() -> bool {
    true
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

fn default_reaper_interval_ms() -> u64 {
    1_000
}

fn default_cleanup_limit() -> usize {
    10_000
}

fn default_cleanup_batch() -> usize {
    1_000
}

fn default_log_segment_size() -> u64 {
    16 * 1024 * 1024
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            provider: default_provider(),
            sync_writes: true,
            idle_transaction_timeout_ms: default_idle_timeout_ms(),
            reaper_interval_ms: default_reaper_interval_ms(),
            tombstone_cleanup_limit: default_cleanup_limit(),
            max_tombstones_per_cleanup: default_cleanup_batch(),
            log_segment_size: default_log_segment_size(),
            truncate_log_on_checkpoint: true,
        }
    }
}

impl StoreConfig {
    /// Defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Small segments, no reaper thread, no fsync
    pub fn for_testing() -> Self {
        StoreConfig {
            sync_writes: false,
            reaper_interval_ms: 0,
            log_segment_size: 4 * 1024,
            ..Self::default()
        }
    }

    /// Set the engine for new stores
    pub fn with_provider(mut self, kind: ProviderKind) -> Self {
        self.provider = kind.as_str().to_string();
        self
    }

    /// Set fsync behavior
    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Set the idle transaction timeout
    pub fn with_idle_transaction_timeout_ms(mut self, ms: u64) -> Self {
        self.idle_transaction_timeout_ms = ms;
        self
    }

    /// Set the reaper period (0 disables the thread)
    pub fn with_reaper_interval_ms(mut self, ms: u64) -> Self {
        self.reaper_interval_ms = ms;
        self
    }

    /// Set the cleanup threshold and batch bound
    pub fn with_tombstone_cleanup(mut self, limit: usize, max_per_cleanup: usize) -> Self {
        self.tombstone_cleanup_limit = limit;
        self.max_tombstones_per_cleanup = max_per_cleanup;
        self
    }

    /// Set the replication log segment size
    pub fn with_log_segment_size(mut self, size: u64) -> Self {
        self.log_segment_size = size;
        self
    }

    /// Set whether checkpoints truncate the replication log
    pub fn with_truncate_log_on_checkpoint(mut self, truncate: bool) -> Self {
        self.truncate_log_on_checkpoint = truncate;
        self
    }

    /// Requested engine kind
    ///
    /// `"unknown"` maps to [`ProviderKind::Unknown`] so that selection,
    /// not parsing, rejects it.
    pub fn provider_kind(&self) -> Result<ProviderKind, ConfigError> {
        match self.provider.to_ascii_lowercase().as_str() {
            "tstore" => Ok(ProviderKind::TStore),
            "ese" => Ok(ProviderKind::Ese),
            "unknown" => Ok(ProviderKind::Unknown),
            _ => Err(ConfigError::InvalidProvider(self.provider.clone())),
        }
    }

    /// Check every field
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.provider_kind()?;
        if self.idle_transaction_timeout_ms == 0 {
            return Err(ConfigError::ZeroIdleTimeout);
        }
        if self.log_segment_size < MIN_LOG_SEGMENT_SIZE {
            return Err(ConfigError::SegmentSizeTooSmall(self.log_segment_size));
        }
        if self.max_tombstones_per_cleanup == 0 {
            return Err(ConfigError::ZeroCleanupBatch);
        }
        Ok(())
    }

    /// Replication log settings derived from this config
    pub fn log_config(&self) -> ReplicationLogConfig {
        ReplicationLogConfig::new()
            .with_segment_size(self.log_segment_size)
            .with_sync_writes(self.sync_writes)
    }

    /// TStore engine settings derived from this config
    pub fn tstore_config(&self) -> TStoreConfig {
        TStoreConfig::default().with_sync_writes(self.sync_writes)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# replstore configuration
#
# Engine used when the store is created: "tstore" (default) or "ese".
# An existing store always reopens with the engine it was created with.
provider = "tstore"

# fsync every replication log append and engine mutation (default: true)
sync_writes = true

# Transactions idle longer than this are reaped and see a Timeout error.
idle_transaction_timeout_ms = 30000

# How often the background reaper runs, 0 disables it (default: 1000)
reaper_interval_ms = 1000

# Tombstone cleanup runs once more than this many tombstones exist and
# removes at most min(count / 2, max_tombstones_per_cleanup) per pass.
# Only active when every cluster node supports it.
tombstone_cleanup_limit = 10000
max_tombstones_per_cleanup = 1000

# Replication log segment size in bytes (default: 16 MiB)
log_segment_size = 16777216

# Drop replication log segments covered by a completed checkpoint.
truncate_log_on_checkpoint = true
"#
    }

    /// Read, parse and validate config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: StoreConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `replstore.toml` from a store directory, creating it if missing
    pub fn load_or_create(dir: &Path) -> StoreResult<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        Self::write_default_if_missing(&path)?;
        Ok(Self::from_file(&path)?)
    }
}
