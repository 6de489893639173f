//! Background maintenance thread
//!
//! Periodically reaps idle transactions and, when the tombstone count is
//! over its limit, runs a cleanup pass. Holds only a weak reference, so the
//! thread winds down on its own once the store is dropped.

use crate::store::ReplicatedStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Background maintenance task
///
/// # Example
///
/// ```ignore
/// let reaper = TransactionReaper::new(Arc::downgrade(&store), Duration::from_secs(1));
/// let handle = reaper.start();
/// // ...
/// reaper.shutdown();
/// handle.join().unwrap();
/// ```
pub struct TransactionReaper {
    store: Weak<ReplicatedStore>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl TransactionReaper {
    /// Reaper for `store` running every `interval`
    pub fn new(store: Weak<ReplicatedStore>, interval: Duration) -> Self {
        TransactionReaper {
            store,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background thread
    ///
    /// The thread runs until `shutdown()` is called or the store is gone.
    pub fn start(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        thread::spawn(move || {
            let slice = Duration::from_millis(50).min(interval);
            loop {
                let mut elapsed = Duration::ZERO;
                while elapsed < interval {
                    if shutdown.load(Ordering::Relaxed) {
                        return;
                    }
                    thread::sleep(slice);
                    elapsed += slice;
                }

                let Some(store) = store.upgrade() else {
                    return;
                };
                if !store.health().is_serving() {
                    continue;
                }
                let reaped = store.reap_idle_transactions();
                if !reaped.is_empty() {
                    debug!(count = reaped.len(), "Reaper retired idle transactions");
                }
                if let Err(e) = store.cleanup_tombstones() {
                    warn!(error = %e, "Background tombstone cleanup failed");
                }
            }
        })
    }

    /// Signal shutdown; the thread exits within one sleep slice
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}
