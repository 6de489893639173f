//! Store creation, provider selection, reopen

use crate::common::*;
use replstore::{ProviderSelector, StoreIdentity, CONFIG_FILE_NAME, IDENTITY_FILE_NAME};
use replstore_storage::testing::MemoryFactory;
use std::sync::Arc;

#[test]
fn unknown_provider_rejected_before_allocation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store");

    let err = ReplicatedStore::create(&path, "orders", ProviderKind::Unknown, gate_at("2.0"))
        .err()
        .unwrap();
    assert!(matches!(err, StoreError::Validation(_)));
    assert!(!err.is_retryable());
    assert!(!path.exists());
}

#[test]
fn unknown_provider_in_config_rejected_before_allocation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store");
    let config = StoreConfig {
        provider: "unknown".to_string(),
        ..StoreConfig::for_testing()
    };

    let err = ReplicatedStore::builder()
        .path(&path)
        .config(config)
        .create("orders")
        .err()
        .unwrap();
    assert!(matches!(err, StoreError::Validation(_)));
    assert!(!path.exists());
}

#[test]
fn unregistered_engine_rejected_before_allocation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store");

    // this build ships TStore only
    let err = ReplicatedStore::create(&path, "orders", ProviderKind::Ese, gate_at("2.0"))
        .err()
        .unwrap();
    assert!(matches!(err, StoreError::Validation(_)));
    assert!(!path.exists());
}

#[test]
fn invalid_name_rejected_before_allocation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store");

    let err = ReplicatedStore::create(&path, "", ProviderKind::TStore, gate_at("2.0"))
        .err()
        .unwrap();
    assert!(matches!(err, StoreError::Validation(_)));
    assert!(!path.exists());
}

#[test]
fn create_writes_identity_and_config() {
    let test = TestStore::new();
    let identity = test.store.identity();
    assert_eq!(identity.name(), "test");
    assert_eq!(identity.provider_kind(), ProviderKind::TStore);

    let on_disk = StoreIdentity::read_from(&test.path().join(IDENTITY_FILE_NAME)).unwrap();
    assert_eq!(&on_disk, identity);
    assert!(test.path().join(CONFIG_FILE_NAME).exists());
}

#[test]
fn create_over_existing_store_fails() {
    let test = TestStore::new();
    let err = ReplicatedStore::create(test.path(), "again", ProviderKind::TStore, gate_at("2.0"))
        .err()
        .unwrap();
    assert!(matches!(err, StoreError::Validation(_)));
    // the original store is untouched
    assert_eq!(test.store.identity().name(), "test");
}

#[test]
fn open_missing_store_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = ReplicatedStore::open(dir.path().join("nothing"), gate_at("2.0"))
        .err()
        .unwrap();
    assert!(matches!(err, StoreError::IoFailure { .. }));
}

#[test]
fn committed_data_survives_reopen() {
    let test = TestStore::new();
    test.put("a", "1");
    test.put("b", "2");
    test.delete("a");
    let epoch = test.store.identity().creation_epoch();

    let test = test.reopen();
    assert_eq!(test.store.identity().creation_epoch(), epoch);
    assert_eq!(test.store.last_committed_sequence_number(), 3);
    assert_eq!(test.get("a"), None);
    assert_eq!(test.get("b"), Some(b"2".to_vec()));

    // sequence numbers keep increasing across restarts
    assert_eq!(test.put("c", "3").first_sequence_number(), 4);
}

#[test]
fn reopen_uses_stored_provider_not_config() {
    let test = TestStore::new();
    test.put("k", "v");
    let path = test.path();
    let TestStore { store, dir, .. } = test;
    drop(store);

    let mut selector = ProviderSelector::with_defaults(StoreConfig::for_testing().tstore_config());
    selector.register(Arc::new(MemoryFactory::new(ProviderKind::Ese)));
    let store = ReplicatedStore::builder()
        .path(&path)
        .config(StoreConfig::for_testing().with_provider(ProviderKind::Ese))
        .selector(selector)
        .open()
        .unwrap();
    assert_eq!(store.provider_kind(), ProviderKind::TStore);
    assert_eq!(get(&store, "k"), Some(b"v".to_vec()));
    drop(dir);
}

#[test]
fn registered_engine_serves_new_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut selector = ProviderSelector::new();
    selector.register(Arc::new(MemoryFactory::new(ProviderKind::Ese)));

    let store = ReplicatedStore::builder()
        .path(dir.path().join("store"))
        .config(StoreConfig::for_testing())
        .provider(ProviderKind::Ese)
        .selector(selector)
        .create("ese-store")
        .unwrap();
    assert_eq!(store.provider_kind(), ProviderKind::Ese);
    assert_eq!(store.status().provider_kind, ProviderKind::Ese);
    put(&store, "k", "v");
    assert_eq!(get(&store, "k"), Some(b"v".to_vec()));
}

#[test]
fn store_without_its_engine_cannot_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store");
    let mut selector = ProviderSelector::new();
    selector.register(Arc::new(MemoryFactory::new(ProviderKind::Ese)));
    let store = ReplicatedStore::builder()
        .path(&path)
        .config(StoreConfig::for_testing())
        .provider(ProviderKind::Ese)
        .selector(selector)
        .create("ese-store")
        .unwrap();
    drop(store);

    // default selector has no ESE engine
    let err = ReplicatedStore::builder()
        .path(&path)
        .config(StoreConfig::for_testing())
        .open()
        .err()
        .unwrap();
    assert!(err.is_fatal());
}

#[test]
fn corrupted_identity_header_refuses_open() {
    let test = TestStore::new();
    let path = test.path();
    let TestStore { store, dir, .. } = test;
    drop(store);

    let header = path.join(IDENTITY_FILE_NAME);
    let mut bytes = std::fs::read(&header).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    std::fs::write(&header, bytes).unwrap();

    let err = ReplicatedStore::open(&path, gate_at("2.0")).err().unwrap();
    assert!(matches!(err, StoreError::Corruption(_)));
    drop(dir);
}

#[test]
fn config_file_is_loaded_on_open() {
    let test = TestStore::new();
    let path = test.path();
    let TestStore { store, dir, gate } = test;
    drop(store);

    let custom = StoreConfig::for_testing()
        .with_idle_transaction_timeout_ms(1234)
        .with_tombstone_cleanup(7, 3);
    custom
        .write_to_file(&path.join(CONFIG_FILE_NAME))
        .unwrap();

    let store = ReplicatedStore::open(&path, gate).unwrap();
    assert_eq!(store.config().idle_transaction_timeout_ms, 1234);
    assert_eq!(store.config().tombstone_cleanup_limit, 7);
    assert_eq!(store.config().max_tombstones_per_cleanup, 3);
    drop(dir);
}

#[test]
fn empty_key_is_a_validation_error() {
    let test = TestStore::new();
    let mut txn = test.store.begin_transaction().unwrap();
    let err = test
        .store
        .put(&mut txn, Key::from(""), b"v".to_vec())
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    // the transaction is still usable
    test.store.put(&mut txn, Key::from("k"), b"v".to_vec()).unwrap();
    test.store.commit(&mut txn).unwrap();
}

#[test]
fn status_reflects_store_state() {
    let test = TestStore::new();
    test.put("a", "1");
    test.put("b", "22");
    test.delete("a");
    let _open = test.store.begin_transaction().unwrap();

    let status = test.store.status();
    assert_eq!(status.name, "test");
    assert_eq!(status.provider_kind, ProviderKind::TStore);
    assert_eq!(status.row_count_estimate, 1);
    assert_eq!(status.tombstone_count, 1);
    assert_eq!(status.last_committed_sequence_number, 3);
    assert_eq!(status.active_transactions, 1);
    assert!(status.logical_size_estimate > 0);
    assert!(status.log_segments >= 1);
    assert_eq!(status.health, HealthState::Serving);
    assert!(status.status_details.contains("'test'"));
}
