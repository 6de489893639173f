//! Cluster version tracking for replstore
//!
//! During a rolling upgrade nodes run different software versions. This
//! crate tracks what each node reported and decides which version-sensitive
//! behaviors are safe cluster-wide:
//! - VersionRegistry: latest reported version per node
//! - CompatibilityGate: minimum cluster version and feature decisions
//! - Feature: the version-sensitive behaviors and the version each needs

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod feature;
pub mod gate;
pub mod registry;

pub use feature::Feature;
pub use gate::{CompatibilityDecision, CompatibilityGate};
pub use registry::{RegistryEntry, VersionRegistry};
