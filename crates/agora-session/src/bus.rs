//! Subscriber bus with per-event-class delivery.
//!
//! Two delivery modes: `deliver_now` for changes that must never be held
//! back (sign-in, sign-out), and `deliver_debounced` for chatty background
//! events (refresh ticks), coalesced to at most one notification per
//! window. Handlers run in registration order on every delivery.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use agora_core::Identity;

/// An identity change fanned out to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A user signed in through a direct action.
    SignedIn(Identity),
    /// The session ended, locally or backend-side.
    SignedOut,
    /// The session was refreshed; claims may have changed.
    Refreshed(Identity),
}

impl SessionEvent {
    /// The identity after this event, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::SignedIn(identity) | Self::Refreshed(identity) => Some(identity),
            Self::SignedOut => None,
        }
    }
}

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Keeps a subscription alive; dropping it unsubscribes.
#[must_use = "dropping the subscription immediately unsubscribes the handler"]
pub struct Subscription {
    bus: Weak<EventBus>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

pub(crate) struct EventBus {
    subscribers: Mutex<Vec<(u64, Handler)>>,
    next_id: AtomicU64,
    pending: Mutex<Option<SessionEvent>>,
    flush_scheduled: AtomicBool,
    window: Duration,
    /// Handed to subscriptions and flush tasks; they must not keep the
    /// bus alive on their own.
    weak_self: Weak<EventBus>,
}

impl EventBus {
    pub(crate) fn new(window: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            pending: Mutex::new(None),
            flush_scheduled: AtomicBool::new(false),
            window,
            weak_self: weak.clone(),
        })
    }

    pub(crate) fn subscribe(
        &self,
        handler: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.lock_subscribers().push((id, Arc::new(handler)));
        Subscription {
            bus: self.weak_self.clone(),
            id,
        }
    }

    /// Delivers immediately, discarding any pending debounced event — an
    /// urgent change supersedes whatever was queued behind it.
    pub(crate) fn deliver_now(&self, event: SessionEvent) {
        self.lock_pending().take();
        self.fan_out(&event);
    }

    /// Queues the event; at most one notification leaves per window, and a
    /// later event inside the window replaces an earlier one.
    pub(crate) fn deliver_debounced(&self, event: SessionEvent) {
        *self.lock_pending() = Some(event);

        if self.flush_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let bus = self.weak_self.clone();
        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let Some(bus) = bus.upgrade() else { return };
            bus.flush_scheduled.store(false, Ordering::SeqCst);
            let pending = bus.lock_pending().take();
            if let Some(event) = pending {
                bus.fan_out(&event);
            }
        });
    }

    fn fan_out(&self, event: &SessionEvent) {
        // Snapshot so handlers can subscribe/unsubscribe reentrantly.
        let handlers: Vec<Handler> = self
            .lock_subscribers()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        tracing::trace!(subscribers = handlers.len(), event = ?event, "notifying");
        for handler in handlers {
            handler(event);
        }
    }

    fn remove(&self, id: u64) {
        self.lock_subscribers().retain(|(sid, _)| *sid != id);
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<(u64, Handler)>> {
        // Handlers never run under this lock, so it cannot be poisoned by
        // a panicking subscriber.
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<SessionEvent>> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
