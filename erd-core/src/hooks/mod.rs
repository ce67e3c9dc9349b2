//! Consistency hook scheduler.
//!
//! Each hook owns a filtered subscription to the [`ActionBus`](crate::bus::ActionBus)
//! and a long-lived task. When matching actions arrive the task reads the
//! latest state, runs a pure derivation routine, and dispatches whatever
//! corrective actions it returns back through the store.
//!
//! ```text
//!   bus ──filter(pattern)──► queue ──► [flow control] ──► routine(&state)
//!                                                              │
//!   store.dispatch ◄────────────── corrective actions ◄────────┘
//! ```
//!
//! Flow control is either one invocation per action, or a throttle window
//! that merges a burst into a single invocation against the state current
//! at the window's end. Routines only return actions whose values differ
//! from the state they were given, so re-running them is harmless.

pub mod relationship;
pub mod table;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::action::{Action, ActionSet};
use crate::bus::SubscriptionId;
use crate::schema::SchemaState;
use crate::store::StoreInner;

/// A derivation routine. Receives the current state and, for per-action
/// hooks, the action that triggered it.
pub type Routine = Arc<dyn Fn(&SchemaState, Option<&Action>) -> Vec<Action> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    /// Run once per matching action, in order.
    PerAction,
    /// Merge matching actions arriving within `window` into one invocation.
    Throttle {
        window: Duration,
        /// Fire on the first action of a window.
        leading: bool,
        /// Fire once after the window closes.
        trailing: bool,
    },
}

impl FlowControl {
    /// Trailing-edge throttle, the mode every built-in relationship hook uses.
    pub const fn trailing(millis: u64) -> Self {
        FlowControl::Throttle {
            window: Duration::from_millis(millis),
            leading: false,
            trailing: true,
        }
    }
}

/// Declaration of one hook.
#[derive(Clone)]
pub struct HookSpec {
    pub name: &'static str,
    pub pattern: ActionSet,
    pub flow: FlowControl,
    pub routine: Routine,
}

impl HookSpec {
    pub fn new<F>(name: &'static str, pattern: ActionSet, flow: FlowControl, routine: F) -> Self
    where
        F: Fn(&SchemaState, Option<&Action>) -> Vec<Action> + Send + Sync + 'static,
    {
        Self {
            name,
            pattern,
            flow,
            routine: Arc::new(routine),
        }
    }
}

impl std::fmt::Debug for HookSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSpec")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field("flow", &self.flow)
            .finish_non_exhaustive()
    }
}

/// Lifecycle of a hook task. `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Cancelled,
}

/// The built-in hooks that keep derived fields consistent.
pub fn default_hooks() -> Vec<HookSpec> {
    vec![
        HookSpec::new(
            "identification",
            relationship::IDENTIFICATION_PATTERN,
            FlowControl::trailing(10),
            |state, _| relationship::identification(state),
        ),
        HookSpec::new(
            "start-marker",
            relationship::START_MARKER_PATTERN,
            FlowControl::trailing(10),
            |state, _| relationship::start_marker(state),
        ),
        HookSpec::new(
            "relationship-sort",
            relationship::SORT_PATTERN,
            FlowControl::trailing(5),
            |state, _| relationship::sort(state),
        ),
        HookSpec::new(
            "table-size",
            table::SIZE_PATTERN,
            FlowControl::PerAction,
            table::resize,
        ),
    ]
}

struct HookTask {
    name: &'static str,
    subscription: SubscriptionId,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Running hook tasks of one store.
pub(crate) struct HookRuntime {
    tasks: Vec<HookTask>,
}

impl HookRuntime {
    pub(crate) fn spawn(runtime: &Handle, store: &Arc<StoreInner>, specs: Vec<HookSpec>) -> Self {
        let tasks = specs
            .into_iter()
            .map(|spec| {
                let (subscription, rx) = store.bus.subscribe_filtered(spec.pattern);
                let token = CancellationToken::new();
                let name = spec.name;
                let handle = runtime.spawn(run_hook(
                    Arc::downgrade(store),
                    spec,
                    rx,
                    token.clone(),
                ));
                log::debug!("Spawned hook task {name}");
                HookTask {
                    name,
                    subscription,
                    token,
                    handle,
                }
            })
            .collect();
        Self { tasks }
    }

    pub(crate) fn states(&self) -> Vec<(&'static str, TaskState)> {
        self.tasks
            .iter()
            .map(|t| {
                let state = if t.token.is_cancelled() || t.handle.is_finished() {
                    TaskState::Cancelled
                } else {
                    TaskState::Running
                };
                (t.name, state)
            })
            .collect()
    }

    /// Cancel every task and drop its bus subscription. Idempotent.
    pub(crate) fn cancel_all(&self, store: &StoreInner) {
        for task in &self.tasks {
            if !task.token.is_cancelled() {
                task.token.cancel();
                store.bus.unsubscribe(task.subscription);
                log::debug!("Cancelled hook task {}", task.name);
            }
        }
    }
}

async fn run_hook(
    store: Weak<StoreInner>,
    spec: HookSpec,
    mut rx: mpsc::UnboundedReceiver<Action>,
    token: CancellationToken,
) {
    match spec.flow {
        FlowControl::PerAction => loop {
            let action = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = rx.recv() => match next {
                    Some(action) => action,
                    None => break,
                },
            };
            if !invoke(&store, &spec, Some(&action)) {
                break;
            }
        },
        FlowControl::Throttle {
            window,
            leading,
            trailing,
        } => loop {
            let mut latest = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = rx.recv() => match next {
                    Some(action) => action,
                    None => break,
                },
            };

            let mut pending = true;
            if leading {
                if !invoke(&store, &spec, Some(&latest)) {
                    break;
                }
                pending = false;
            }

            let deadline = tokio::time::sleep(window);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    biased;
                    // The open window is abandoned without firing.
                    _ = token.cancelled() => return,
                    _ = &mut deadline => break,
                    next = rx.recv() => match next {
                        Some(action) => {
                            latest = action;
                            pending = true;
                        }
                        None => return,
                    },
                }
            }

            if trailing && pending && !invoke(&store, &spec, Some(&latest)) {
                break;
            }
        },
    }
    log::trace!("Hook task {} stopped", spec.name);
}

/// Run the routine once against the latest state and dispatch its output.
/// Returns `false` once the store is gone.
fn invoke(store: &Weak<StoreInner>, spec: &HookSpec, trigger: Option<&Action>) -> bool {
    let Some(store) = store.upgrade() else {
        return false;
    };

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        store.read(|state| (spec.routine)(state, trigger))
    }));

    match outcome {
        Ok(actions) => {
            if !actions.is_empty() {
                log::trace!("Hook {} produced {} action(s)", spec.name, actions.len());
            }
            for action in actions {
                store.dispatch(action);
            }
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("Hook {} panicked: {message}", spec.name);
        }
    }
    true
}
