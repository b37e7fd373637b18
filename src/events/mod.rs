//! In-process publish/subscribe for live import events.
//!
//! Subscriptions are keyed by job identifier, with a global channel that
//! receives everything. Each subscription owns a bounded queue; delivery is
//! non-blocking and drops events for subscribers whose queue is full (a slow
//! or gone consumer must not stall the worker's hot loop). The registry
//! mutex is only held to snapshot the target senders, never during delivery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::domain::event::ImportEvent;

/// Bounded per-subscriber queue depth.
pub const SUBSCRIPTION_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ChannelKey {
    Job(Uuid),
    All,
}

struct SubscriberSlot {
    id: u64,
    tx: mpsc::Sender<ImportEvent>,
}

#[derive(Default)]
struct Registry {
    subscribers: HashMap<ChannelKey, Vec<SubscriberSlot>>,
}

/// Process-local event bus. One instance lives in [`crate::domain::app_state::App`];
/// the worker publishes into it and every SSE connection subscribes to it.
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            registry: Arc::new(Mutex::new(Registry::default())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Creates a subscription for one job, or for all jobs when `job_id` is
    /// `None`. The subscription unregisters itself on drop.
    pub fn subscribe(&self, job_id: Option<Uuid>) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = job_id.map(ChannelKey::Job).unwrap_or(ChannelKey::All);

        let mut registry = self.lock_registry();
        registry
            .subscribers
            .entry(key)
            .or_default()
            .push(SubscriberSlot { id, tx });
        drop(registry);

        trace!(?job_id, id, "registered event subscription");
        Subscription {
            rx,
            guard: SubscriptionGuard {
                key,
                id,
                registry: Arc::downgrade(&self.registry),
            },
        }
    }

    /// Delivers an event to every subscription on the job's channel and on
    /// the global channel, in publish order per subscriber. Best-effort:
    /// full queues drop the event for that subscriber only.
    pub fn publish(&self, job_id: Uuid, event: ImportEvent) {
        let targets: Vec<mpsc::Sender<ImportEvent>> = {
            let registry = self.lock_registry();
            let job_slots = registry.subscribers.get(&ChannelKey::Job(job_id));
            let all_slots = registry.subscribers.get(&ChannelKey::All);
            job_slots
                .into_iter()
                .chain(all_slots)
                .flatten()
                .map(|slot| slot.tx.clone())
                .collect()
        };

        for tx in targets {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(%job_id, kind = %event.kind, "subscriber queue full, dropping event");
                }
                // A closed receiver is an unsubscribed consumer racing us;
                // its guard removes the slot.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Unregisters every subscription.
    pub fn close(&self) {
        self.lock_registry().subscribers.clear();
    }

    /// Number of live subscriptions, across all channels.
    pub fn subscriber_count(&self) -> usize {
        self.lock_registry()
            .subscribers
            .values()
            .map(Vec::len)
            .sum()
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the subscriber slot from the registry when dropped.
pub struct SubscriptionGuard {
    key: ChannelKey,
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = match registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(slots) = registry.subscribers.get_mut(&self.key) {
            slots.retain(|slot| slot.id != self.id);
            if slots.is_empty() {
                registry.subscribers.remove(&self.key);
            }
        }
    }
}

/// A live subscription: a bounded event queue plus its registry guard.
pub struct Subscription {
    rx: mpsc::Receiver<ImportEvent>,
    guard: SubscriptionGuard,
}

impl Subscription {
    /// Awaits the next event. `None` on timeout (the caller's heartbeat
    /// tick) or when the bus has been closed.
    pub async fn next(&mut self, timeout: Duration) -> Option<ImportEvent> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Explicitly unregisters the subscription.
    pub fn close(self) {}

    /// Splits the subscription for stream adapters: the receiver feeds the
    /// stream, the guard must be kept alive alongside it.
    pub fn into_parts(self) -> (mpsc::Receiver<ImportEvent>, SubscriptionGuard) {
        (self.rx, self.guard)
    }
}
