//! Change feed
//!
//! Every applied commit publishes one [`ChangeEvent`] per written key, in
//! commit order, to each live [`Subscription`]. Delivery is at-least-once:
//! batches re-published after a recovery are dropped by the subscription,
//! which remembers the highest sequence number it handed out.
//!
//! Subscriptions are lazy and cannot be rewound. A subscriber that needs
//! history reads it from the replication log first.
//!
//! Each subscription buffers at most the feed's capacity of undelivered
//! events. A subscriber that falls further behind is cut off: it keeps
//! what was already queued, then reports [`Subscription::is_lagged`] and
//! must resynchronize from the replication log.

use parking_lot::{Condvar, Mutex};
use replstore_core::{Key, Record, RecordState, SequenceNumber};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::warn;

/// Undelivered events a subscription may hold before it is cut off
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 65_536;

/// One committed write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Transaction that wrote the key
    pub txn_id: u64,
    /// Key written
    pub key: Key,
    /// Sequence number assigned to the write
    pub sequence_number: SequenceNumber,
    /// Resulting record state
    pub state: RecordState,
}

#[derive(Default)]
struct Listener {
    queue: Mutex<VecDeque<ChangeEvent>>,
    ready: Condvar,
    lagged: AtomicBool,
}

/// Fan-out point for committed writes
pub struct ChangeFeed {
    listeners: Mutex<Vec<Weak<Listener>>>,
    capacity: usize,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl ChangeFeed {
    /// Feed with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed whose subscriptions buffer at most `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        ChangeFeed {
            listeners: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscriber seeing every batch published from now on
    pub fn subscribe(&self) -> Subscription {
        let listener = Arc::new(Listener::default());
        self.listeners.lock().push(Arc::downgrade(&listener));
        Subscription {
            listener,
            last_seen: 0,
        }
    }

    /// Publish one committed batch
    pub fn publish(&self, txn_id: u64, records: &[Record]) {
        if records.is_empty() {
            return;
        }
        let capacity = self.capacity;
        let mut listeners = self.listeners.lock();
        listeners.retain(|weak| {
            let Some(listener) = weak.upgrade() else {
                return false;
            };
            let mut queue = listener.queue.lock();
            let keep = queue.len() + records.len() <= capacity;
            if keep {
                queue.extend(records.iter().map(|r| ChangeEvent {
                    txn_id,
                    key: r.key.clone(),
                    sequence_number: r.sequence_number,
                    state: r.state,
                }));
            } else {
                listener.lagged.store(true, Ordering::Release);
                warn!(
                    txn_id,
                    queued = queue.len(),
                    capacity,
                    "Change feed subscriber fell behind; dropping it"
                );
            }
            listener.ready.notify_all();
            keep
        });
    }

    /// Subscriptions still alive
    pub fn subscriber_count(&self) -> usize {
        self.listeners
            .lock()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

/// One subscriber's ordered view of the feed
pub struct Subscription {
    listener: Arc<Listener>,
    last_seen: SequenceNumber,
}

impl Subscription {
    /// Next event if one is queued
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        let mut queue = self.listener.queue.lock();
        pop_fresh(&mut self.last_seen, &mut queue)
    }

    /// Next event, waiting up to `timeout` for one to arrive
    ///
    /// Returns early with `None` once the subscription is lagged and its
    /// queue is empty.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<ChangeEvent> {
        let listener = Arc::clone(&self.listener);
        let mut queue = listener.queue.lock();
        loop {
            if let Some(event) = pop_fresh(&mut self.last_seen, &mut queue) {
                return Some(event);
            }
            if listener.lagged.load(Ordering::Acquire) {
                return None;
            }
            if listener.ready.wait_for(&mut queue, timeout).timed_out() {
                return pop_fresh(&mut self.last_seen, &mut queue);
            }
        }
    }

    /// Whether the feed cut this subscription off for falling behind
    ///
    /// Events queued before the cut are still delivered; nothing after it is.
    pub fn is_lagged(&self) -> bool {
        self.listener.lagged.load(Ordering::Acquire)
    }

    /// Every queued event
    pub fn drain(&mut self) -> Vec<ChangeEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Highest sequence number delivered so far
    pub fn last_seen(&self) -> SequenceNumber {
        self.last_seen
    }
}

/// Pop the next event not yet delivered, skipping re-published duplicates
fn pop_fresh(
    last_seen: &mut SequenceNumber,
    queue: &mut VecDeque<ChangeEvent>,
) -> Option<ChangeEvent> {
    while let Some(event) = queue.pop_front() {
        if event.sequence_number > *last_seen {
            *last_seen = event.sequence_number;
            return Some(event);
        }
    }
    None
}

impl Iterator for Subscription {
    type Item = ChangeEvent;

    /// Non-blocking: `None` means nothing is queued right now
    fn next(&mut self) -> Option<ChangeEvent> {
        self.try_next()
    }
}
