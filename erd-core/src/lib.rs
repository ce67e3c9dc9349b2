//! # erd-core — Document model and consistency engine for the ERD editor
//!
//! ## Architecture
//!
//! ```text
//!  local edits ─┐
//!               ▼
//!  replicated ─► Store::dispatch ──► reducer::apply ──► SchemaState
//!                     │
//!                     ▼
//!                ActionBus ──┬──► hook: identification   (throttle 10ms)
//!                            ├──► hook: start marker     (throttle 10ms)
//!                            ├──► hook: relationship sort (throttle 5ms)
//!                            ├──► hook: table size       (per action)
//!                            └──► external subscribers
//! ```
//!
//! Hooks read the latest state and dispatch corrective actions back through
//! the same store, so derived fields converge identically on every peer that
//! receives the same action stream.
//!
//! ## Modules
//!
//! - [`schema`] — Document model and JSON snapshots
//! - [`action`] — Typed actions, kinds and patterns
//! - [`reducer`] — The only mutation path
//! - [`bus`] — Ordered in-process fan-out
//! - [`hooks`] — Scheduler and derivation routines
//! - [`store`] — State + bus + hooks for one document
//! - [`layout`] — Canvas constants and size estimation

pub mod action;
pub mod bus;
pub mod error;
pub mod hooks;
pub mod layout;
pub mod reducer;
pub mod schema;
pub mod store;

pub use action::{Action, ActionKind, ActionSet};
pub use bus::{ActionBus, BusStats, SubscriptionId};
pub use error::{SchemaError, StoreError};
pub use hooks::{default_hooks, FlowControl, HookSpec, TaskState};
pub use schema::{
    Anchor, Column, ColumnOption, Direction, Memo, Relationship, RelationshipPoint, SchemaState,
    Settings, Show, StartMarker, Table,
};
pub use store::Store;
