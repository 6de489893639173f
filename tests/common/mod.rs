//! Shared test utilities for all integration test suites.
//!
//! Import via `mod common;` from any test's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::path::PathBuf;
use std::sync::{Arc, Once};

pub use replstore::{
    ClusterVersion, CommitResult, CompatibilityGate, Feature, HealthState, Key, ProviderKind,
    ReplicatedStore, StoreConfig, StoreError, Transaction, VersionRegistry, WriteOp,
};
use replstore_storage::testing::{FaultInjector, FaultyFactory};
use replstore_storage::{ProviderSelector, TStoreFactory};
use tempfile::TempDir;
use tracing_subscriber::filter::LevelFilter;

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route store logs through the test harness (visible with --nocapture)
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(LevelFilter::DEBUG)
            .try_init();
    });
}

/// Registry where every node reports `version`
pub fn registry_at(versions: &[(&str, &str)]) -> Arc<VersionRegistry> {
    let registry = Arc::new(VersionRegistry::new());
    for (node, version) in versions {
        registry.report_str(node, version).expect("valid version");
    }
    registry
}

/// Gate over a single-node cluster at `version`
pub fn gate_at(version: &str) -> CompatibilityGate {
    CompatibilityGate::new(registry_at(&[("self", version)]))
}

// ============================================================================
// TestStore - store in a temp directory
// ============================================================================

/// Store wrapper keeping its temp directory alive
pub struct TestStore {
    pub store: Arc<ReplicatedStore>,
    pub dir: TempDir,
    pub gate: CompatibilityGate,
}

impl TestStore {
    /// TStore-backed store on a fully upgraded cluster
    pub fn new() -> Self {
        Self::with_gate(gate_at("9.0.0.0"))
    }

    /// TStore-backed store consulting `gate`
    pub fn with_gate(gate: CompatibilityGate) -> Self {
        Self::with_config(StoreConfig::for_testing(), gate)
    }

    /// TStore-backed store with `config`
    pub fn with_config(config: StoreConfig, gate: CompatibilityGate) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = ReplicatedStore::builder()
            .path(dir.path().join("store"))
            .config(config)
            .gate(gate.clone())
            .create("test")
            .expect("Failed to create test store");
        TestStore { store, dir, gate }
    }

    /// Store directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("store")
    }

    /// Drop the store and open it again from disk
    pub fn reopen(self) -> Self {
        let TestStore { store, dir, gate } = self;
        store.shutdown();
        drop(store);
        let store = ReplicatedStore::builder()
            .path(dir.path().join("store"))
            .config(StoreConfig::for_testing())
            .gate(gate.clone())
            .open()
            .expect("Failed to reopen test store");
        TestStore { store, dir, gate }
    }

    pub fn put(&self, key: &str, value: &str) -> CommitResult {
        put(&self.store, key, value)
    }

    pub fn delete(&self, key: &str) -> CommitResult {
        delete(&self.store, key)
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        get(&self.store, key)
    }
}

/// TStore-backed store whose engine fails on command
pub struct FaultyStore {
    pub store: Arc<ReplicatedStore>,
    pub dir: TempDir,
    pub injector: Arc<FaultInjector>,
}

impl FaultyStore {
    pub fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let injector = FaultInjector::new();
        let store = ReplicatedStore::builder()
            .path(dir.path().join("store"))
            .config(StoreConfig::for_testing())
            .selector(faulty_selector(&injector))
            .gate(gate_at("9.0.0.0"))
            .create("test")
            .expect("Failed to create faulty store");
        FaultyStore {
            store,
            dir,
            injector,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join("store")
    }
}

/// Selector whose TStore engines are wrapped by `injector`
pub fn faulty_selector(injector: &Arc<FaultInjector>) -> ProviderSelector {
    let tstore = Arc::new(TStoreFactory::new(
        StoreConfig::for_testing().tstore_config(),
    ));
    let mut selector = ProviderSelector::new();
    selector.register(Arc::new(FaultyFactory::new(tstore, Arc::clone(injector))));
    selector
}

// ============================================================================
// One-shot transactions
// ============================================================================

pub fn put(store: &ReplicatedStore, key: &str, value: &str) -> CommitResult {
    let mut txn = store.begin_transaction().expect("begin");
    store
        .put(&mut txn, Key::from(key), value.as_bytes().to_vec())
        .expect("put");
    store.commit(&mut txn).expect("commit")
}

pub fn delete(store: &ReplicatedStore, key: &str) -> CommitResult {
    let mut txn = store.begin_transaction().expect("begin");
    store.delete(&mut txn, Key::from(key)).expect("delete");
    store.commit(&mut txn).expect("commit")
}

pub fn get(store: &ReplicatedStore, key: &str) -> Option<Vec<u8>> {
    let mut txn = store.begin_transaction().expect("begin");
    let value = store.read(&mut txn, &Key::from(key)).expect("read");
    store.abort(&mut txn).expect("abort");
    value
}
