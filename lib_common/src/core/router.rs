//! # Event Router
//!
//! The `EventRouter` decouples the single producer (the upstream feed) from
//! an arbitrary number of independent consumers (WebSocket sessions, tests,
//! tools).
//!
//! ## Core Design Principles:
//!
//! 1.  **Zero-Copy Fan-out**: a record is published as an `Arc<EventRecord>`.
//!     Every subscriber receives a clone of the pointer, never of the record.
//!
//! 2.  **Publish Never Blocks**: each subscriber owns an unbounded MPSC queue.
//!     `publish` only performs non-blocking sends while holding the registry
//!     lock, so a subscriber that stops reading grows its own backlog and
//!     nothing else.
//!
//! 3.  **Per-Subscriber FIFO**: records are sent to all subscribers inside one
//!     critical section, in the order `publish` is called. Each queue is FIFO,
//!     so every subscriber observes the published order.
//!
//! 4.  **Registration Only**: the router stores the sending half and a label.
//!     The `Subscription` (receiving half) belongs to the consumer, and
//!     dropping it unregisters the consumer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;

use crate::core::event::EventRecord;

/// Opaque subscriber handle.
pub type SubscriberId = u64;

/// The router's view of one subscriber.
struct SubscriberEntry {
    id: SubscriberId,
    /// Human-readable origin, used in logs only (e.g. `ws-42`).
    label: String,
    sender: mpsc::UnboundedSender<Arc<EventRecord>>,
}

/// # Event Router
///
/// Registration, deregistration and in-order fan-out of event records.
pub struct EventRouter {
    subscribers: Mutex<Vec<SubscriberEntry>>,
    next_id: AtomicU64,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl EventRouter {
    /// Creates an empty router, ready to be shared.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn registry(&self) -> MutexGuard<'_, Vec<SubscriberEntry>> {
        // Entries stay consistent even if a holder panicked; keep serving.
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// # Subscribe
    ///
    /// Registers a new consumer. There is no replay: the returned queue only
    /// fills with records published after this call returns.
    pub fn subscribe(self: &Arc<Self>, label: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        self.registry().push(SubscriberEntry {
            id,
            label: label.to_string(),
            sender: tx,
        });
        log::debug!("Subscriber '{}' ({}) registered with router", label, id);

        Subscription {
            id,
            receiver: rx,
            router: Arc::downgrade(self),
            detached: false,
        }
    }

    /// # Publish
    ///
    /// Sends `record` to every registered subscriber and returns how many
    /// received it. Subscribers whose queue has been closed are pruned.
    pub fn publish(&self, record: Arc<EventRecord>) -> usize {
        let mut subscribers = self.registry();
        let mut delivered = 0;

        subscribers.retain(|entry| match entry.sender.send(Arc::clone(&record)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                log::info!(
                    "Subscriber '{}' ({}) went away. Removing from router.",
                    entry.label,
                    entry.id
                );
                false
            }
        });

        delivered
    }

    /// # Unsubscribe
    ///
    /// Removes a subscriber. Returns `false` if it was already gone, so the
    /// call is safe to repeat.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.registry();
        let before = subscribers.len();
        subscribers.retain(|entry| entry.id != id);
        let removed = subscribers.len() != before;
        if removed {
            log::debug!("Subscriber {} removed from router", id);
        }
        removed
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.registry().len()
    }
}

/// # Subscription
///
/// One consumer's registration: an id plus the receiving end of its queue.
/// Dropping the subscription unregisters it.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::UnboundedReceiver<Arc<EventRecord>>,
    router: Weak<EventRouter>,
    detached: bool,
}

impl Subscription {
    /// The handle under which the router knows this subscription.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next record. Returns `None` once the subscription has
    /// been removed from the router and its backlog is drained.
    pub async fn recv(&mut self) -> Option<Arc<EventRecord>> {
        self.receiver.recv().await
    }

    /// Takes the next queued record without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<EventRecord>> {
        self.receiver.try_recv().ok()
    }

    /// Number of records waiting in this subscription's queue.
    pub fn backlog(&self) -> usize {
        self.receiver.len()
    }

    /// Explicitly unregisters from the router. Idempotent.
    pub fn unsubscribe(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        if let Some(router) = self.router.upgrade() {
            router.unsubscribe(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
