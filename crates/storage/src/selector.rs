//! Provider selection
//!
//! Maps a [`ProviderKind`] to the factory that builds its engine. New
//! stores go through [`ProviderSelector::select_for_new_store`], which
//! rejects `Unknown` and unregistered kinds before anything touches disk;
//! existing stores go through [`ProviderSelector::resolve_existing`] with
//! the kind read back from their identity header.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let selector = ProviderSelector::with_defaults(TStoreConfig::default());
//! let kind = selector.select_for_new_store(ProviderKind::TStore)?;
//! let backend = selector.resolve_existing(kind, &dir.join("backend"))?;
//! ```

use crate::tstore::{TStoreBackend, TStoreConfig};
use replstore_core::{ProviderBackend, ProviderKind, StoreError, StoreResult};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Builds engines of one kind
pub trait BackendFactory: Send + Sync {
    /// Kind of engine this factory builds
    fn kind(&self) -> ProviderKind;

    /// Bind an engine to `dir`; the caller runs `recover()` afterwards
    fn open(&self, dir: &Path) -> StoreResult<Box<dyn ProviderBackend>>;
}

/// Factory for [`TStoreBackend`]
#[derive(Debug, Clone, Default)]
pub struct TStoreFactory {
    config: TStoreConfig,
}

impl TStoreFactory {
    /// Factory producing engines with `config`
    pub fn new(config: TStoreConfig) -> Self {
        TStoreFactory { config }
    }
}

impl BackendFactory for TStoreFactory {
    fn kind(&self) -> ProviderKind {
        ProviderKind::TStore
    }

    fn open(&self, dir: &Path) -> StoreResult<Box<dyn ProviderBackend>> {
        Ok(Box::new(TStoreBackend::open(dir, self.config.clone())?))
    }
}

/// Registry of engine factories by kind
#[derive(Clone, Default)]
pub struct ProviderSelector {
    factories: HashMap<ProviderKind, Arc<dyn BackendFactory>>,
}

impl ProviderSelector {
    /// Selector with no engines registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Selector with every engine this build ships (TStore)
    pub fn with_defaults(tstore: TStoreConfig) -> Self {
        let mut selector = Self::new();
        selector.register(Arc::new(TStoreFactory::new(tstore)));
        selector
    }

    /// Register (or replace) the factory for its kind
    ///
    /// Factories claiming `Unknown` are ignored.
    pub fn register(&mut self, factory: Arc<dyn BackendFactory>) {
        let kind = factory.kind();
        if !kind.is_known() {
            return;
        }
        self.factories.insert(kind, factory);
    }

    /// Whether an engine is available for `kind`
    pub fn is_registered(&self, kind: ProviderKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Kinds with a registered engine, in tag order
    pub fn registered_kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = self.factories.keys().copied().collect();
        kinds.sort_by_key(|k| k.to_tag());
        kinds
    }

    /// Validate the kind requested for a new store
    ///
    /// Allocates nothing. `Unknown` and kinds without an engine fail with
    /// `Validation`.
    pub fn select_for_new_store(&self, requested: ProviderKind) -> StoreResult<ProviderKind> {
        let kind = requested.ensure_selectable()?;
        if !self.is_registered(kind) {
            return Err(StoreError::validation(format!(
                "no engine registered for provider kind {}",
                kind
            )));
        }
        debug!(provider = %kind, "Provider selected for new store");
        Ok(kind)
    }

    /// Build the engine for an existing store
    ///
    /// `stored` comes from the store's identity header; `Unknown` there
    /// means the metadata cannot be interpreted and fails with `Corruption`,
    /// as does a known kind this build has no engine for.
    pub fn resolve_existing(
        &self,
        stored: ProviderKind,
        dir: &Path,
    ) -> StoreResult<Box<dyn ProviderBackend>> {
        if !stored.is_known() {
            return Err(StoreError::corruption(
                "store metadata names provider kind Unknown",
            ));
        }
        let factory = self.factories.get(&stored).ok_or_else(|| {
            StoreError::corruption(format!(
                "store was created with provider kind {} which this build cannot open",
                stored
            ))
        })?;
        let backend = factory.open(dir)?;
        if backend.kind() != stored {
            return Err(StoreError::corruption(format!(
                "factory for {} produced a {} engine",
                stored,
                backend.kind()
            )));
        }
        Ok(backend)
    }
}
