//! Storage engines for replstore
//!
//! This crate implements the engines behind the [`ProviderBackend`]
//! contract and the selection logic binding a store to one of them:
//! - TStoreBackend: log-structured, checkpointed in-memory engine
//! - Table / TableCursor: ordered record table and batched enumeration
//! - ProviderSelector: kind validation for new stores, engine resolution
//!   for existing ones
//! - testing: volatile and fault-injecting engines, segment corruptors
//!
//! [`ProviderBackend`]: replstore_core::ProviderBackend

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cursor;
pub mod selector;
pub mod table;
pub mod testing;
pub mod tstore;

pub use cursor::TableCursor;
pub use selector::{BackendFactory, ProviderSelector, TStoreFactory};
pub use table::Table;
pub use tstore::{TStoreBackend, TStoreConfig, TStoreConfigError};
