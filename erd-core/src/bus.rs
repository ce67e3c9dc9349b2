//! In-process action bus.
//!
//! ```text
//!  local edit ──┐                    ┌──► hook: identification  (filtered)
//!               ├──► ActionBus ──────┼──► hook: start marker    (filtered)
//!  replicated ──┘   (ordered)        ├──► hook: sort / anchor   (filtered)
//!                                    └──► UI / session manager  (all)
//! ```
//!
//! Every subscriber owns an unbounded queue, so a slow consumer never causes
//! another to miss an action and each one sees actions in publish order.
//! Subscribers whose receiver was dropped are pruned on the next publish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::action::{Action, ActionSet};

/// Identifies a subscription for [`ActionBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    filter: Option<ActionSet>,
    tx: mpsc::UnboundedSender<Action>,
}

/// Counters for monitoring bus traffic.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusStats {
    pub published: u64,
    pub subscribers: usize,
}

pub struct ActionBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    published: AtomicU64,
}

impl Default for ActionBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            published: AtomicU64::new(0),
        }
    }

    /// Receive every action.
    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<Action>) {
        self.register(None)
    }

    /// Receive only actions whose kind is in `pattern`.
    pub fn subscribe_filtered(
        &self,
        pattern: ActionSet,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<Action>) {
        self.register(Some(pattern))
    }

    fn register(&self, filter: Option<ActionSet>) -> (SubscriptionId, mpsc::UnboundedReceiver<Action>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Subscriber { id, filter, tx });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().retain(|s| s.id != id);
    }

    /// Deliver `action` to every matching subscriber.
    ///
    /// Returns how many subscribers received it.
    pub fn publish(&self, action: &Action) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        let kind = action.kind();
        let mut delivered = 0;
        self.lock().retain(|s| {
            if s.filter.is_some_and(|f| !f.contains(kind)) {
                return !s.tx.is_closed();
            }
            match s.tx.send(action.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    log::trace!("Pruning closed bus subscriber {:?}", s.id);
                    false
                }
            }
        });
        delivered
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            subscribers: self.lock().len(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
