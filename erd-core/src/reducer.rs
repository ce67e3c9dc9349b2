//! The single mutation path for [`SchemaState`].
//!
//! Actions referencing entities that no longer exist are ignored. Under
//! concurrent editing a peer can easily receive `column.rename` for a column
//! another peer just removed, so a miss is routine, not an error.

use crate::action::Action;
use crate::layout;
use crate::schema::{ColumnOption, Column, SchemaState};

/// Apply `action` to `state`. Returns `false` when the action referenced a
/// missing entity and nothing changed.
pub fn apply(state: &mut SchemaState, action: &Action) -> bool {
    let applied = match action {
        Action::LoadSchema { value } => {
            *state = (**value).clone();
            true
        }

        Action::AddTable { table } => {
            if !state.tables.contains_key(&table.id) {
                state.doc.table_ids.push(table.id.clone());
            }
            state.tables.insert(table.id.clone(), table.clone());
            true
        }
        Action::RemoveTable { id } => match state.tables.remove(id) {
            Some(table) => {
                for column_id in &table.column_ids {
                    state.columns.remove(column_id);
                }
                state.doc.table_ids.retain(|t| t != id);
                true
            }
            None => false,
        },
        Action::MoveTable { id, move_x, move_y } => match state.tables.get_mut(id) {
            Some(table) => {
                table.ui.x += move_x;
                table.ui.y += move_y;
                true
            }
            None => false,
        },
        Action::MoveToTable { id, x, y } => match state.tables.get_mut(id) {
            Some(table) => {
                table.ui.x = *x;
                table.ui.y = *y;
                true
            }
            None => false,
        },
        Action::ChangeTableName { id, name } => match state.tables.get_mut(id) {
            Some(table) => {
                table.name.clone_from(name);
                true
            }
            None => false,
        },
        Action::ChangeTableComment { id, comment } => match state.tables.get_mut(id) {
            Some(table) => {
                table.comment.clone_from(comment);
                true
            }
            None => false,
        },
        Action::ResizeTable { id, width, height } => match state.tables.get_mut(id) {
            Some(table) => {
                table.ui.width = *width;
                table.ui.height = *height;
                true
            }
            None => false,
        },
        Action::SortTable => {
            sort_tables(state);
            true
        }

        Action::AddColumn { column } => {
            if !state.tables.contains_key(&column.table_id) {
                return false;
            }
            let previous = state
                .columns
                .get(&column.id)
                .map(|c| c.table_id.clone())
                .filter(|owner| owner != &column.table_id);
            if let Some(owner) = previous.and_then(|owner| state.tables.get_mut(&owner)) {
                owner.column_ids.retain(|c| c != &column.id);
            }
            if let Some(table) = state.tables.get_mut(&column.table_id) {
                if !table.has_column(&column.id) {
                    table.column_ids.push(column.id.clone());
                }
            }
            state.columns.insert(column.id.clone(), column.clone());
            true
        }
        Action::RemoveColumn { table_id, id } => {
            let owned = state
                .columns
                .get(id)
                .is_some_and(|c| &c.table_id == table_id);
            match state.tables.get_mut(table_id) {
                Some(table) if owned => {
                    table.column_ids.retain(|c| c != id);
                    state.columns.remove(id);
                    true
                }
                _ => false,
            }
        }
        Action::ChangeColumnName { table_id, id, value } => {
            edit_column(state, table_id, id, |c| c.name.clone_from(value))
        }
        Action::ChangeColumnComment { table_id, id, value } => {
            edit_column(state, table_id, id, |c| c.comment.clone_from(value))
        }
        Action::ChangeColumnDataType { table_id, id, value } => {
            edit_column(state, table_id, id, |c| c.data_type.clone_from(value))
        }
        Action::ChangeColumnDefault { table_id, id, value } => {
            edit_column(state, table_id, id, |c| c.default.clone_from(value))
        }
        Action::ChangeColumnNotNull { table_id, id, value } => {
            edit_column(state, table_id, id, |c| {
                c.options.set(ColumnOption::NOT_NULL, *value)
            })
        }
        Action::ChangeColumnPrimaryKey { table_id, id, value } => {
            edit_column(state, table_id, id, |c| {
                c.options.set(ColumnOption::PRIMARY_KEY, *value)
            })
        }

        Action::AddRelationship { relationship } => {
            if !state.relationships.contains_key(&relationship.id) {
                state.doc.relationship_ids.push(relationship.id.clone());
            }
            state
                .relationships
                .insert(relationship.id.clone(), relationship.clone());
            true
        }
        Action::RemoveRelationship { id } => {
            let removed = state.relationships.remove(id).is_some();
            state.doc.relationship_ids.retain(|r| r != id);
            removed
        }
        Action::ChangeIdentification { id, value } => match state.relationships.get_mut(id) {
            Some(rel) => {
                rel.identification = *value;
                true
            }
            None => false,
        },
        Action::ChangeStartMarker { id, value } => match state.relationships.get_mut(id) {
            Some(rel) => {
                rel.start_marker = *value;
                true
            }
            None => false,
        },
        Action::AnchorRelationship { id, start, end } => match state.relationships.get_mut(id) {
            Some(rel) => {
                rel.start.x = start.x;
                rel.start.y = start.y;
                rel.start.direction = start.direction;
                rel.end.x = end.x;
                rel.end.y = end.y;
                rel.end.direction = end.direction;
                true
            }
            None => false,
        },

        Action::AddMemo { memo } => {
            if !state.memos.contains_key(&memo.id) {
                state.doc.memo_ids.push(memo.id.clone());
            }
            state.memos.insert(memo.id.clone(), memo.clone());
            true
        }
        Action::RemoveMemo { id } => {
            let removed = state.memos.remove(id).is_some();
            state.doc.memo_ids.retain(|m| m != id);
            removed
        }
        Action::MoveMemo { id, move_x, move_y } => match state.memos.get_mut(id) {
            Some(memo) => {
                memo.ui.x += move_x;
                memo.ui.y += move_y;
                true
            }
            None => false,
        },

        Action::ChangeShow { show, value } => {
            state.settings.show.set(*show, *value);
            true
        }
        Action::ChangeMaxWidthComment { value } => {
            state.settings.max_width_comment = *value;
            true
        }
    };

    if !applied {
        log::debug!("Ignoring {} for missing entity", action.kind());
    }
    applied
}

fn edit_column(
    state: &mut SchemaState,
    table_id: &str,
    id: &str,
    edit: impl FnOnce(&mut Column),
) -> bool {
    if !state.tables.get(table_id).is_some_and(|t| t.has_column(id)) {
        return false;
    }
    match state.columns.get_mut(id) {
        Some(column) => {
            edit(column);
            true
        }
        None => false,
    }
}

/// Lay tables out on a grid, ordered by name.
fn sort_tables(state: &mut SchemaState) {
    let mut order: Vec<(String, String)> = state
        .ordered_tables()
        .map(|t| (t.name.to_lowercase(), t.id.clone()))
        .collect();
    order.sort();

    let (cell_width, cell_height) = state.tables.values().fold(
        (layout::COLUMN_MIN_WIDTH, layout::COLUMN_MIN_WIDTH),
        |(w, h), t| (w.max(t.ui.width), h.max(t.ui.height)),
    );

    for (index, (_, id)) in order.iter().enumerate() {
        if let Some(table) = state.tables.get_mut(id) {
            let (x, y) = layout::sort_position(index, cell_width, cell_height);
            table.ui.x = x;
            table.ui.y = y;
        }
    }
    state.doc.table_ids = order.into_iter().map(|(_, id)| id).collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Anchor, Direction, Relationship, RelationshipPoint, Show, Table};

    fn with_table() -> SchemaState {
        let mut state = SchemaState::new();
        apply(
            &mut state,
            &Action::AddTable {
                table: Table::new("t1", "orders"),
            },
        );
        apply(
            &mut state,
            &Action::AddColumn {
                column: Column::new("c1", "t1", "id"),
            },
        );
        state
    }

    #[test]
    fn test_add_and_rename_table() {
        let mut state = with_table();
        assert!(apply(
            &mut state,
            &Action::ChangeTableName {
                id: "t1".into(),
                name: "users".into()
            }
        ));
        assert_eq!(state.table("t1").unwrap().name, "users");
        assert_eq!(state.doc.table_ids, vec!["t1"]);
    }

    #[test]
    fn test_unknown_id_is_ignored() {
        let mut state = with_table();
        let before = state.clone();
        assert!(!apply(
            &mut state,
            &Action::ChangeColumnName {
                table_id: "t1".into(),
                id: "nope".into(),
                value: "x".into()
            }
        ));
        assert!(!apply(&mut state, &Action::RemoveTable { id: "zz".into() }));
        assert_eq!(state, before);
    }

    #[test]
    fn test_column_flags() {
        let mut state = with_table();
        apply(
            &mut state,
            &Action::ChangeColumnPrimaryKey {
                table_id: "t1".into(),
                id: "c1".into(),
                value: true,
            },
        );
        apply(
            &mut state,
            &Action::ChangeColumnNotNull {
                table_id: "t1".into(),
                id: "c1".into(),
                value: true,
            },
        );
        let column = state.column("c1").unwrap();
        assert!(column.is_primary_key() && column.is_not_null());

        apply(
            &mut state,
            &Action::ChangeColumnNotNull {
                table_id: "t1".into(),
                id: "c1".into(),
                value: false,
            },
        );
        assert!(!state.column("c1").unwrap().is_not_null());
    }

    #[test]
    fn test_remove_column_checks_owner() {
        let mut state = with_table();
        assert!(!apply(
            &mut state,
            &Action::RemoveColumn {
                table_id: "other".into(),
                id: "c1".into()
            }
        ));
        assert!(apply(
            &mut state,
            &Action::RemoveColumn {
                table_id: "t1".into(),
                id: "c1".into()
            }
        ));
        assert!(state.columns.is_empty());
        assert!(state.table("t1").unwrap().column_ids.is_empty());
    }

    #[test]
    fn test_add_column_moves_between_tables() {
        let mut state = with_table();
        apply(
            &mut state,
            &Action::AddTable {
                table: Table::new("t2", "users"),
            },
        );
        assert!(apply(
            &mut state,
            &Action::AddColumn {
                column: Column::new("c1", "t2", "id"),
            },
        ));
        assert!(state.table("t1").unwrap().column_ids.is_empty());
        assert_eq!(state.table("t2").unwrap().column_ids, vec!["c1".to_string()]);
        assert_eq!(state.column("c1").unwrap().table_id, "t2");

        // Unknown target table leaves the column where it was.
        assert!(!apply(
            &mut state,
            &Action::AddColumn {
                column: Column::new("c1", "missing", "id"),
            },
        ));
        assert_eq!(state.column("c1").unwrap().table_id, "t2");
    }

    #[test]
    fn test_remove_table_keeps_relationships() {
        let mut state = with_table();
        apply(
            &mut state,
            &Action::AddRelationship {
                relationship: Relationship::new(
                    "r1",
                    RelationshipPoint::new("t0", ["c0"]),
                    RelationshipPoint::new("t1", ["c1"]),
                ),
            },
        );
        apply(&mut state, &Action::RemoveTable { id: "t1".into() });
        assert!(state.columns.is_empty());
        assert!(state.relationship("r1").is_some());
        assert!(state.end_columns(state.relationship("r1").unwrap()).is_none());
    }

    #[test]
    fn test_move_is_relative() {
        let mut state = with_table();
        for _ in 0..3 {
            apply(
                &mut state,
                &Action::MoveTable {
                    id: "t1".into(),
                    move_x: 10.0,
                    move_y: -5.0,
                },
            );
        }
        let ui = &state.table("t1").unwrap().ui;
        assert_eq!((ui.x, ui.y), (30.0, -15.0));
    }

    #[test]
    fn test_anchor_sets_both_ends() {
        let mut state = with_table();
        apply(
            &mut state,
            &Action::AddRelationship {
                relationship: Relationship::new(
                    "r1",
                    RelationshipPoint::new("t1", ["c1"]),
                    RelationshipPoint::new("t1", ["c1"]),
                ),
            },
        );
        let start = Anchor {
            x: 1.0,
            y: 2.0,
            direction: Direction::Right,
        };
        let end = Anchor {
            x: 3.0,
            y: 4.0,
            direction: Direction::Bottom,
        };
        apply(
            &mut state,
            &Action::AnchorRelationship {
                id: "r1".into(),
                start,
                end,
            },
        );
        let rel = state.relationship("r1").unwrap();
        assert_eq!(rel.start.anchor(), start);
        assert_eq!(rel.end.anchor(), end);
    }

    #[test]
    fn test_sort_orders_by_name() {
        let mut state = SchemaState::new();
        for (id, name) in [("a", "zebra"), ("b", "apple"), ("c", "Mango")] {
            apply(
                &mut state,
                &Action::AddTable {
                    table: Table::new(id, name),
                },
            );
        }
        apply(&mut state, &Action::SortTable);
        assert_eq!(state.doc.table_ids, vec!["b", "c", "a"]);
        let first = &state.table("b").unwrap().ui;
        assert_eq!((first.x, first.y), (layout::START_X, layout::START_Y));
    }

    #[test]
    fn test_settings() {
        let mut state = SchemaState::new();
        apply(
            &mut state,
            &Action::ChangeShow {
                show: Show::COLUMN_UNIQUE,
                value: true,
            },
        );
        assert!(state.settings.show.contains(Show::COLUMN_UNIQUE));
        apply(&mut state, &Action::ChangeMaxWidthComment { value: 120 });
        assert_eq!(state.settings.max_width_comment, 120);
    }

    #[test]
    fn test_load_replaces_everything() {
        let mut state = with_table();
        apply(
            &mut state,
            &Action::LoadSchema {
                value: Box::new(SchemaState::new()),
            },
        );
        assert!(state.tables.is_empty());
    }
}
