//! Typed state-mutation actions.
//!
//! Every change to a [`SchemaState`] is expressed as an [`Action`]. Actions
//! travel over the wire as `{"type": "<kind>", "payload": {...}}`, e.g.
//!
//! ```json
//! {"type": "table.rename", "payload": {"id": "t1", "name": "users"}}
//! ```
//!
//! Hooks subscribe with an [`ActionSet`] built from the closed [`ActionKind`]
//! enumeration, so pattern matching never compares strings.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::schema::{Anchor, Column, Memo, Relationship, SchemaState, Show, StartMarker, Table};

/// Discriminant of an [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ActionKind {
    LoadSchema,
    AddTable,
    RemoveTable,
    MoveTable,
    MoveToTable,
    ChangeTableName,
    ChangeTableComment,
    ResizeTable,
    SortTable,
    AddColumn,
    RemoveColumn,
    ChangeColumnName,
    ChangeColumnComment,
    ChangeColumnDataType,
    ChangeColumnDefault,
    ChangeColumnNotNull,
    ChangeColumnPrimaryKey,
    AddRelationship,
    RemoveRelationship,
    ChangeIdentification,
    ChangeStartMarker,
    AnchorRelationship,
    AddMemo,
    RemoveMemo,
    MoveMemo,
    ChangeShow,
    ChangeMaxWidthComment,
}

impl ActionKind {
    pub const ALL: [ActionKind; 27] = [
        ActionKind::LoadSchema,
        ActionKind::AddTable,
        ActionKind::RemoveTable,
        ActionKind::MoveTable,
        ActionKind::MoveToTable,
        ActionKind::ChangeTableName,
        ActionKind::ChangeTableComment,
        ActionKind::ResizeTable,
        ActionKind::SortTable,
        ActionKind::AddColumn,
        ActionKind::RemoveColumn,
        ActionKind::ChangeColumnName,
        ActionKind::ChangeColumnComment,
        ActionKind::ChangeColumnDataType,
        ActionKind::ChangeColumnDefault,
        ActionKind::ChangeColumnNotNull,
        ActionKind::ChangeColumnPrimaryKey,
        ActionKind::AddRelationship,
        ActionKind::RemoveRelationship,
        ActionKind::ChangeIdentification,
        ActionKind::ChangeStartMarker,
        ActionKind::AnchorRelationship,
        ActionKind::AddMemo,
        ActionKind::RemoveMemo,
        ActionKind::MoveMemo,
        ActionKind::ChangeShow,
        ActionKind::ChangeMaxWidthComment,
    ];

    /// Wire name of this kind (the `type` field).
    pub const fn as_str(self) -> &'static str {
        match self {
            ActionKind::LoadSchema => "editor.loadJson",
            ActionKind::AddTable => "table.add",
            ActionKind::RemoveTable => "table.remove",
            ActionKind::MoveTable => "table.move",
            ActionKind::MoveToTable => "table.moveTo",
            ActionKind::ChangeTableName => "table.rename",
            ActionKind::ChangeTableComment => "table.changeComment",
            ActionKind::ResizeTable => "table.resize",
            ActionKind::SortTable => "table.sort",
            ActionKind::AddColumn => "column.add",
            ActionKind::RemoveColumn => "column.remove",
            ActionKind::ChangeColumnName => "column.rename",
            ActionKind::ChangeColumnComment => "column.changeComment",
            ActionKind::ChangeColumnDataType => "column.changeDataType",
            ActionKind::ChangeColumnDefault => "column.changeDefault",
            ActionKind::ChangeColumnNotNull => "column.changeNotNull",
            ActionKind::ChangeColumnPrimaryKey => "column.changePrimaryKey",
            ActionKind::AddRelationship => "relationship.add",
            ActionKind::RemoveRelationship => "relationship.remove",
            ActionKind::ChangeIdentification => "relationship.changeIdentification",
            ActionKind::ChangeStartMarker => "relationship.changeStartMarker",
            ActionKind::AnchorRelationship => "relationship.anchor",
            ActionKind::AddMemo => "memo.add",
            ActionKind::RemoveMemo => "memo.remove",
            ActionKind::MoveMemo => "memo.move",
            ActionKind::ChangeShow => "settings.changeShow",
            ActionKind::ChangeMaxWidthComment => "settings.changeMaxWidthComment",
        }
    }

    const fn bit(self) -> u64 {
        1 << (self as u8)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A static set of action kinds, used as a hook's pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ActionSet(u64);

impl ActionSet {
    pub const EMPTY: ActionSet = ActionSet(0);

    /// High-frequency drag actions. Consumers recording history or
    /// persisting edits usually skip these.
    pub const STREAM: ActionSet = ActionSet::of(&[ActionKind::MoveTable, ActionKind::MoveMemo]);

    pub const fn of(kinds: &[ActionKind]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < kinds.len() {
            bits |= kinds[i].bit();
            i += 1;
        }
        ActionSet(bits)
    }

    pub const fn contains(self, kind: ActionKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Whether `action` matches this pattern.
    pub fn matches(self, action: &Action) -> bool {
        self.contains(action.kind())
    }

    pub const fn union(self, other: ActionSet) -> Self {
        ActionSet(self.0 | other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = ActionKind> {
        ActionKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

impl FromIterator<ActionKind> for ActionSet {
    fn from_iter<I: IntoIterator<Item = ActionKind>>(iter: I) -> Self {
        ActionSet(iter.into_iter().fold(0, |bits, kind| bits | kind.bit()))
    }
}

/// A state mutation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all_fields = "camelCase")]
pub enum Action {
    /// Replace the whole document with a snapshot.
    #[serde(rename = "editor.loadJson")]
    LoadSchema { value: Box<SchemaState> },

    #[serde(rename = "table.add")]
    AddTable { table: Table },
    #[serde(rename = "table.remove")]
    RemoveTable { id: String },
    /// Relative move (drag).
    #[serde(rename = "table.move")]
    MoveTable { id: String, move_x: f64, move_y: f64 },
    #[serde(rename = "table.moveTo")]
    MoveToTable { id: String, x: f64, y: f64 },
    #[serde(rename = "table.rename")]
    ChangeTableName { id: String, name: String },
    #[serde(rename = "table.changeComment")]
    ChangeTableComment { id: String, comment: String },
    #[serde(rename = "table.resize")]
    ResizeTable { id: String, width: f64, height: f64 },
    /// Arrange tables in a grid ordered by name.
    #[serde(rename = "table.sort")]
    SortTable,

    #[serde(rename = "column.add")]
    AddColumn { column: Column },
    #[serde(rename = "column.remove")]
    RemoveColumn { table_id: String, id: String },
    #[serde(rename = "column.rename")]
    ChangeColumnName { table_id: String, id: String, value: String },
    #[serde(rename = "column.changeComment")]
    ChangeColumnComment { table_id: String, id: String, value: String },
    #[serde(rename = "column.changeDataType")]
    ChangeColumnDataType { table_id: String, id: String, value: String },
    #[serde(rename = "column.changeDefault")]
    ChangeColumnDefault { table_id: String, id: String, value: String },
    #[serde(rename = "column.changeNotNull")]
    ChangeColumnNotNull { table_id: String, id: String, value: bool },
    #[serde(rename = "column.changePrimaryKey")]
    ChangeColumnPrimaryKey { table_id: String, id: String, value: bool },

    #[serde(rename = "relationship.add")]
    AddRelationship { relationship: Relationship },
    #[serde(rename = "relationship.remove")]
    RemoveRelationship { id: String },
    #[serde(rename = "relationship.changeIdentification")]
    ChangeIdentification { id: String, value: bool },
    #[serde(rename = "relationship.changeStartMarker")]
    ChangeStartMarker { id: String, value: StartMarker },
    #[serde(rename = "relationship.anchor")]
    AnchorRelationship { id: String, start: Anchor, end: Anchor },

    #[serde(rename = "memo.add")]
    AddMemo { memo: Memo },
    #[serde(rename = "memo.remove")]
    RemoveMemo { id: String },
    #[serde(rename = "memo.move")]
    MoveMemo { id: String, move_x: f64, move_y: f64 },

    #[serde(rename = "settings.changeShow")]
    ChangeShow { show: Show, value: bool },
    #[serde(rename = "settings.changeMaxWidthComment")]
    ChangeMaxWidthComment { value: u32 },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::LoadSchema { .. } => ActionKind::LoadSchema,
            Action::AddTable { .. } => ActionKind::AddTable,
            Action::RemoveTable { .. } => ActionKind::RemoveTable,
            Action::MoveTable { .. } => ActionKind::MoveTable,
            Action::MoveToTable { .. } => ActionKind::MoveToTable,
            Action::ChangeTableName { .. } => ActionKind::ChangeTableName,
            Action::ChangeTableComment { .. } => ActionKind::ChangeTableComment,
            Action::ResizeTable { .. } => ActionKind::ResizeTable,
            Action::SortTable => ActionKind::SortTable,
            Action::AddColumn { .. } => ActionKind::AddColumn,
            Action::RemoveColumn { .. } => ActionKind::RemoveColumn,
            Action::ChangeColumnName { .. } => ActionKind::ChangeColumnName,
            Action::ChangeColumnComment { .. } => ActionKind::ChangeColumnComment,
            Action::ChangeColumnDataType { .. } => ActionKind::ChangeColumnDataType,
            Action::ChangeColumnDefault { .. } => ActionKind::ChangeColumnDefault,
            Action::ChangeColumnNotNull { .. } => ActionKind::ChangeColumnNotNull,
            Action::ChangeColumnPrimaryKey { .. } => ActionKind::ChangeColumnPrimaryKey,
            Action::AddRelationship { .. } => ActionKind::AddRelationship,
            Action::RemoveRelationship { .. } => ActionKind::RemoveRelationship,
            Action::ChangeIdentification { .. } => ActionKind::ChangeIdentification,
            Action::ChangeStartMarker { .. } => ActionKind::ChangeStartMarker,
            Action::AnchorRelationship { .. } => ActionKind::AnchorRelationship,
            Action::AddMemo { .. } => ActionKind::AddMemo,
            Action::RemoveMemo { .. } => ActionKind::RemoveMemo,
            Action::MoveMemo { .. } => ActionKind::MoveMemo,
            Action::ChangeShow { .. } => ActionKind::ChangeShow,
            Action::ChangeMaxWidthComment { .. } => ActionKind::ChangeMaxWidthComment,
        }
    }

    /// The single table this action touches, if any.
    pub fn table_id(&self) -> Option<&str> {
        match self {
            Action::AddTable { table } => Some(&table.id),
            Action::AddColumn { column } => Some(&column.table_id),
            Action::RemoveTable { id }
            | Action::MoveTable { id, .. }
            | Action::MoveToTable { id, .. }
            | Action::ChangeTableName { id, .. }
            | Action::ChangeTableComment { id, .. }
            | Action::ResizeTable { id, .. } => Some(id),
            Action::RemoveColumn { table_id, .. }
            | Action::ChangeColumnName { table_id, .. }
            | Action::ChangeColumnComment { table_id, .. }
            | Action::ChangeColumnDataType { table_id, .. }
            | Action::ChangeColumnDefault { table_id, .. }
            | Action::ChangeColumnNotNull { table_id, .. }
            | Action::ChangeColumnPrimaryKey { table_id, .. } => Some(table_id),
            _ => None,
        }
    }
}
