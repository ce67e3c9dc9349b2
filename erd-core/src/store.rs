//! Document store: state, action bus and hook scheduler bundled together.
//!
//! `dispatch` holds the state write lock across apply + publish, so every
//! subscriber observes actions in exactly the order they were applied, no
//! matter how many producers (local UI, replication, hooks) are active.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::action::{Action, ActionSet};
use crate::bus::{ActionBus, BusStats, SubscriptionId};
use crate::error::StoreError;
use crate::hooks::{default_hooks, HookRuntime, HookSpec, TaskState};
use crate::reducer;
use crate::schema::SchemaState;

pub(crate) struct StoreInner {
    state: RwLock<SchemaState>,
    pub(crate) bus: ActionBus,
}

impl StoreInner {
    pub(crate) fn dispatch(&self, action: Action) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        reducer::apply(&mut state, &action);
        self.bus.publish(&action);
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&SchemaState) -> R) -> R {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }
}

/// One live document.
///
/// Dropping the store cancels its hook tasks.
pub struct Store {
    inner: Arc<StoreInner>,
    hooks: HookRuntime,
}

impl Store {
    /// Create a store running the built-in consistency hooks.
    pub fn new(state: SchemaState) -> Result<Self, StoreError> {
        Self::with_hooks(state, default_hooks())
    }

    /// Create a store running `hooks` instead of the built-in set.
    ///
    /// Must be called inside a Tokio runtime; hook tasks are spawned on it.
    pub fn with_hooks(state: SchemaState, hooks: Vec<HookSpec>) -> Result<Self, StoreError> {
        let runtime = Handle::try_current().map_err(|_| StoreError::NoRuntime)?;
        let inner = Arc::new(StoreInner {
            state: RwLock::new(state),
            bus: ActionBus::new(),
        });
        let hooks = HookRuntime::spawn(&runtime, &inner, hooks);
        Ok(Self { inner, hooks })
    }

    /// Apply an action and publish it to every subscriber.
    pub fn dispatch(&self, action: Action) {
        self.inner.dispatch(action);
    }

    pub fn dispatch_all(&self, actions: impl IntoIterator<Item = Action>) {
        for action in actions {
            self.inner.dispatch(action);
        }
    }

    /// Replace the whole document.
    pub fn load(&self, state: SchemaState) {
        self.dispatch(Action::LoadSchema {
            value: Box::new(state),
        });
    }

    /// Clone of the current state.
    pub fn state(&self) -> SchemaState {
        self.read(SchemaState::clone)
    }

    /// Borrow the current state without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&SchemaState) -> R) -> R {
        self.inner.read(f)
    }

    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<Action>) {
        self.inner.bus.subscribe()
    }

    pub fn subscribe_filtered(
        &self,
        pattern: ActionSet,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<Action>) {
        self.inner.bus.subscribe_filtered(pattern)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.bus.unsubscribe(id);
    }

    pub fn bus_stats(&self) -> BusStats {
        self.inner.bus.stats()
    }

    /// Name and lifecycle state of every hook task.
    pub fn hook_states(&self) -> Vec<(&'static str, TaskState)> {
        self.hooks.states()
    }

    /// Cancel every hook task. Idempotent; the store keeps accepting
    /// dispatches but derived fields are no longer maintained.
    pub fn destroy(&self) {
        self.hooks.cancel_all(&self.inner);
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.destroy();
    }
}
