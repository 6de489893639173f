//! Store engine integration tests

#[path = "../common/mod.rs"]
mod common;

mod acid_properties;
mod change_feed;
mod store_lifecycle;
mod version_gating;
