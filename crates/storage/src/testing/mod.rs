//! Testing utilities for engines and recovery
//!
//! - **MemoryBackend**: volatile engine, also usable to plug in extra kinds
//! - **FaultyBackend**: wrapper failing mutations or recoveries on demand
//! - **SegmentCorruptor**: damages segment files the way crashes do
//!
//! # Example
//!
//! ```ignore
//! use replstore_storage::testing::{FaultInjector, FaultyFactory};
//!
//! let injector = FaultInjector::new();
//! selector.register(Arc::new(FaultyFactory::new(tstore_factory, injector.clone())));
//! injector.fail_mutation(1);
//! ```

mod corruption;
mod faulty;
mod memory;

pub use corruption::{GarbageResult, SegmentCorruptor, TruncationResult};
pub use faulty::{FaultInjector, FaultyBackend, FaultyFactory};
pub use memory::{MemoryBackend, MemoryFactory};
