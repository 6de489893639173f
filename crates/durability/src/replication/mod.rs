//! Replication log: one durable entry per committed transaction.

mod config;
mod entry;
mod log;

pub use config::{LogConfigError, ReplicationLogConfig};
pub use entry::{LogFormat, LogRecordError, ReplicationEntry};
pub use log::{LogRecovery, ReplicationLog, LOG_SEGMENT_PREFIX};
