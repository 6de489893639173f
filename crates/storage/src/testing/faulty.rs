//! Fault-injecting backend wrapper
//!
//! Wraps a real engine and fails mutations or recoveries on demand so the
//! store's recovery paths can be driven from tests. Once a mutation has
//! been failed the wrapper keeps failing every mutation until a
//! successful `recover()`, which is how a real engine behaves after losing
//! its log.

use crate::selector::BackendFactory;
use replstore_core::{
    BackendStats, CheckpointTicket, Key, ProviderBackend, ProviderKind, PurgeOutcome, Record,
    RecordCursor, RecoveryInfo, ResumeToken, SequenceNumber, StoreError, StoreResult,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared switchboard controlling one or more [`FaultyBackend`]s
#[derive(Debug, Default)]
pub struct FaultInjector {
    /// Mutations left before the next injected failure (0 = disarmed)
    countdown: AtomicU64,
    tripped: AtomicBool,
    recover_failures: AtomicUsize,
    injected: AtomicU64,
}

impl FaultInjector {
    /// Disarmed injector
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the `n`th mutation from now (1 = the next one)
    pub fn fail_mutation(&self, n: u64) {
        self.countdown.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` recoveries
    pub fn fail_recoveries(&self, n: usize) {
        self.recover_failures.store(n, Ordering::SeqCst);
    }

    /// Whether the wrapped engine is currently refusing mutations
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Failures injected so far
    pub fn injected(&self) -> u64 {
        self.injected.load(Ordering::SeqCst)
    }

    fn before_mutation(&self) -> StoreResult<()> {
        if self.is_tripped() {
            return Err(StoreError::io_failure("injected fault: engine needs recovery"));
        }
        let armed = self
            .countdown
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok();
        if armed == Some(1) {
            self.tripped.store(true, Ordering::SeqCst);
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::io_failure("injected fault: write failed"));
        }
        Ok(())
    }

    fn before_recover(&self) -> StoreResult<()> {
        let failing = self
            .recover_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::io_failure("injected fault: recovery failed"));
        }
        Ok(())
    }
}

/// Engine wrapper failing operations as its [`FaultInjector`] dictates
pub struct FaultyBackend {
    inner: Box<dyn ProviderBackend>,
    injector: Arc<FaultInjector>,
}

impl FaultyBackend {
    /// Wrap `inner`
    pub fn new(inner: Box<dyn ProviderBackend>, injector: Arc<FaultInjector>) -> Self {
        FaultyBackend { inner, injector }
    }
}

impl ProviderBackend for FaultyBackend {
    fn kind(&self) -> ProviderKind {
        self.inner.kind()
    }

    fn stats(&self) -> BackendStats {
        self.inner.stats()
    }

    fn get(&self, key: &Key) -> StoreResult<Option<Record>> {
        self.inner.get(key)
    }

    fn put(
        &self,
        key: Key,
        value: Vec<u8>,
        expected: Option<SequenceNumber>,
    ) -> StoreResult<SequenceNumber> {
        self.injector.before_mutation()?;
        self.inner.put(key, value, expected)
    }

    fn delete(&self, key: &Key, expected: Option<SequenceNumber>) -> StoreResult<()> {
        self.injector.before_mutation()?;
        self.inner.delete(key, expected)
    }

    fn enumerate<'a>(
        &'a self,
        prefix: &[u8],
        resume: Option<&ResumeToken>,
    ) -> StoreResult<Box<dyn RecordCursor + 'a>> {
        self.inner.enumerate(prefix, resume)
    }

    fn begin_checkpoint(&self) -> StoreResult<CheckpointTicket> {
        self.inner.begin_checkpoint()
    }

    fn complete_checkpoint(&self, ticket: CheckpointTicket) -> StoreResult<()> {
        self.inner.complete_checkpoint(ticket)
    }

    fn recover(&self) -> StoreResult<RecoveryInfo> {
        self.injector.before_recover()?;
        let info = self.inner.recover()?;
        self.injector.tripped.store(false, Ordering::SeqCst);
        Ok(info)
    }

    fn purge_tombstones(&self, below: SequenceNumber, limit: usize) -> StoreResult<PurgeOutcome> {
        self.injector.before_mutation()?;
        self.inner.purge_tombstones(below, limit)
    }
}

/// Factory wrapping another factory's engines in [`FaultyBackend`]
pub struct FaultyFactory {
    inner: Arc<dyn BackendFactory>,
    injector: Arc<FaultInjector>,
}

impl FaultyFactory {
    /// Wrap `inner`, sharing `injector` with every engine it opens
    pub fn new(inner: Arc<dyn BackendFactory>, injector: Arc<FaultInjector>) -> Self {
        FaultyFactory { inner, injector }
    }
}

impl BackendFactory for FaultyFactory {
    fn kind(&self) -> ProviderKind {
        self.inner.kind()
    }

    fn open(&self, dir: &Path) -> StoreResult<Box<dyn ProviderBackend>> {
        Ok(Box::new(FaultyBackend::new(
            self.inner.open(dir)?,
            Arc::clone(&self.injector),
        )))
    }
}
