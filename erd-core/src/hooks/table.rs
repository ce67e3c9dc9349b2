//! Derived table size.

use crate::action::{Action, ActionKind, ActionSet};
use crate::layout;
use crate::schema::{SchemaState, Table};

pub const SIZE_PATTERN: ActionSet = ActionSet::of(&[
    ActionKind::LoadSchema,
    ActionKind::AddTable,
    ActionKind::ChangeTableName,
    ActionKind::ChangeTableComment,
    ActionKind::AddColumn,
    ActionKind::RemoveColumn,
    ActionKind::ChangeColumnName,
    ActionKind::ChangeColumnDataType,
    ActionKind::ChangeColumnDefault,
    ActionKind::ChangeColumnComment,
    ActionKind::ChangeShow,
    ActionKind::ChangeMaxWidthComment,
]);

fn resize_one(state: &SchemaState, table: &Table) -> Option<Action> {
    let (width, height) = layout::table_size(state, table);
    (width != table.ui.width || height != table.ui.height).then(|| Action::ResizeTable {
        id: table.id.clone(),
        width,
        height,
    })
}

/// Resize the table touched by `trigger`, or every table when the trigger
/// affects all of them (document load, display settings) or is absent.
pub fn resize(state: &SchemaState, trigger: Option<&Action>) -> Vec<Action> {
    match trigger.and_then(Action::table_id) {
        Some(id) => state
            .table(id)
            .and_then(|table| resize_one(state, table))
            .into_iter()
            .collect(),
        None => state
            .ordered_tables()
            .filter_map(|table| resize_one(state, table))
            .collect(),
    }
}
