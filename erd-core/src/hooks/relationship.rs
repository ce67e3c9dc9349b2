//! Derived relationship fields.
//!
//! - identification: every end column belongs to the end table's primary key.
//! - start marker: solid when every end column is NOT NULL, hollow otherwise.
//! - anchors: which side of each table a line attaches to, and where along
//!   that side.
//!
//! Relationships whose end table or columns are gone are skipped; a
//! relationship left dangling by a table removal is a normal transient state
//! during collaborative editing.

use std::collections::HashMap;

use crate::action::{Action, ActionKind, ActionSet};
use crate::schema::{Anchor, Direction, Relationship, SchemaState, StartMarker, Table};

pub const IDENTIFICATION_PATTERN: ActionSet =
    ActionSet::of(&[ActionKind::RemoveColumn, ActionKind::ChangeColumnPrimaryKey]);

pub const START_MARKER_PATTERN: ActionSet =
    ActionSet::of(&[ActionKind::RemoveColumn, ActionKind::ChangeColumnNotNull]);

pub const SORT_PATTERN: ActionSet = ActionSet::of(&[
    ActionKind::ChangeShow,
    ActionKind::ChangeMaxWidthComment,
    ActionKind::AddRelationship,
    ActionKind::MoveMemo,
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
    ActionKind::LoadSchema,
]);

pub fn identification(state: &SchemaState) -> Vec<Action> {
    state
        .ordered_relationships()
        .filter_map(|rel| {
            let columns = state.end_columns(rel)?;
            let value = columns.iter().all(|c| c.is_primary_key());
            (value != rel.identification).then(|| Action::ChangeIdentification {
                id: rel.id.clone(),
                value,
            })
        })
        .collect()
}

pub fn start_marker(state: &SchemaState) -> Vec<Action> {
    state
        .ordered_relationships()
        .filter_map(|rel| {
            let columns = state.end_columns(rel)?;
            let value = if columns.iter().all(|c| c.is_not_null()) {
                StartMarker::Solid
            } else {
                StartMarker::Hollow
            };
            (value != rel.start_marker).then(|| Action::ChangeStartMarker {
                id: rel.id.clone(),
                value,
            })
        })
        .collect()
}

/// Sides for the start and end of a line between two tables.
fn sides(start: &Table, end: &Table) -> (Direction, Direction) {
    if start.id == end.id {
        return (Direction::Right, Direction::Top);
    }
    let (sx, sy) = start.center();
    let (ex, ey) = end.center();
    let (dx, dy) = (ex - sx, ey - sy);
    if dx.abs() >= dy.abs() {
        if dx >= 0.0 {
            (Direction::Right, Direction::Left)
        } else {
            (Direction::Left, Direction::Right)
        }
    } else if dy >= 0.0 {
        (Direction::Bottom, Direction::Top)
    } else {
        (Direction::Top, Direction::Bottom)
    }
}

struct Endpoint<'a> {
    relationship: &'a str,
    is_start: bool,
    /// Position of the table at the other end, along this side's axis.
    order: f64,
}

fn along_axis(direction: Direction, other: &Table) -> f64 {
    let (x, y) = other.center();
    match direction {
        Direction::Left | Direction::Right => y,
        Direction::Top | Direction::Bottom => x,
    }
}

fn place(table: &Table, direction: Direction, index: usize, count: usize) -> Anchor {
    let ui = &table.ui;
    let t = (index + 1) as f64 / (count + 1) as f64;
    let (x, y) = match direction {
        Direction::Left => (ui.x, ui.y + ui.height * t),
        Direction::Right => (ui.x + ui.width, ui.y + ui.height * t),
        Direction::Top => (ui.x + ui.width * t, ui.y),
        Direction::Bottom => (ui.x + ui.width * t, ui.y + ui.height),
    };
    Anchor { x, y, direction }
}

/// Recompute both anchors of every relationship.
pub fn sort(state: &SchemaState) -> Vec<Action> {
    let mut sides_by_table: HashMap<(&str, Direction), Vec<Endpoint<'_>>> = HashMap::new();
    let mut live: Vec<&Relationship> = Vec::new();

    for rel in state.ordered_relationships() {
        let (Some(start), Some(end)) = (
            state.table(&rel.start.table_id),
            state.table(&rel.end.table_id),
        ) else {
            continue;
        };
        let (start_side, end_side) = sides(start, end);
        sides_by_table
            .entry((start.id.as_str(), start_side))
            .or_default()
            .push(Endpoint {
                relationship: &rel.id,
                is_start: true,
                order: along_axis(start_side, end),
            });
        sides_by_table
            .entry((end.id.as_str(), end_side))
            .or_default()
            .push(Endpoint {
                relationship: &rel.id,
                is_start: false,
                order: along_axis(end_side, start),
            });
        live.push(rel);
    }

    let mut anchors: HashMap<(&str, bool), Anchor> = HashMap::new();
    for ((table_id, direction), mut endpoints) in sides_by_table {
        let Some(table) = state.table(table_id) else {
            continue;
        };
        endpoints.sort_by(|a, b| {
            a.order
                .total_cmp(&b.order)
                .then_with(|| a.relationship.cmp(b.relationship))
                .then_with(|| a.is_start.cmp(&b.is_start))
        });
        let count = endpoints.len();
        for (index, endpoint) in endpoints.iter().enumerate() {
            anchors.insert(
                (endpoint.relationship, endpoint.is_start),
                place(table, direction, index, count),
            );
        }
    }

    live.into_iter()
        .filter_map(|rel| {
            let start = *anchors.get(&(rel.id.as_str(), true))?;
            let end = *anchors.get(&(rel.id.as_str(), false))?;
            (start != rel.start.anchor() || end != rel.end.anchor()).then(|| {
                Action::AnchorRelationship {
                    id: rel.id.clone(),
                    start,
                    end,
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::apply;
    use crate::schema::{Column, ColumnOption, RelationshipPoint};

    /// `parent(t1.c1)` ← `child(t2.c2)` with c2 as the referencing column.
    fn two_tables(child_options: ColumnOption) -> SchemaState {
        let mut state = SchemaState::new();
        let mut parent = Table::new("t1", "parent").at(0.0, 0.0);
        parent.ui.width = 100.0;
        parent.ui.height = 100.0;
        let mut child = Table::new("t2", "child").at(400.0, 0.0);
        child.ui.width = 100.0;
        child.ui.height = 100.0;
        for table in [parent, child] {
            apply(&mut state, &Action::AddTable { table });
        }
        apply(
            &mut state,
            &Action::AddColumn {
                column: Column::new("c1", "t1", "id").with_options(ColumnOption::PRIMARY_KEY),
            },
        );
        apply(
            &mut state,
            &Action::AddColumn {
                column: Column::new("c2", "t2", "parent_id").with_options(child_options),
            },
        );
        apply(
            &mut state,
            &Action::AddRelationship {
                relationship: Relationship::new(
                    "r1",
                    RelationshipPoint::new("t1", ["c1"]),
                    RelationshipPoint::new("t2", ["c2"]),
                ),
            },
        );
        state
    }

    fn settle(state: &mut SchemaState, routine: fn(&SchemaState) -> Vec<Action>) -> usize {
        let actions = routine(state);
        let n = actions.len();
        for action in &actions {
            apply(state, action);
        }
        n
    }

    #[test]
    fn test_identification_is_idempotent() {
        let mut state = two_tables(ColumnOption::PRIMARY_KEY);
        let actions = identification(&state);
        assert_eq!(
            actions,
            vec![Action::ChangeIdentification {
                id: "r1".into(),
                value: true
            }]
        );
        settle(&mut state, identification);
        assert!(identification(&state).is_empty());
    }

    #[test]
    fn test_identification_skips_removed_table() {
        let mut state = two_tables(ColumnOption::PRIMARY_KEY);
        apply(&mut state, &Action::RemoveTable { id: "t2".into() });
        assert!(identification(&state).is_empty());
        assert!(start_marker(&state).is_empty());
    }

    #[test]
    fn test_start_marker_solid_to_hollow() {
        let mut state = two_tables(ColumnOption::NOT_NULL);
        settle(&mut state, start_marker);
        assert_eq!(
            state.relationship("r1").unwrap().start_marker,
            StartMarker::Solid
        );

        apply(
            &mut state,
            &Action::ChangeColumnNotNull {
                table_id: "t2".into(),
                id: "c2".into(),
                value: false,
            },
        );
        assert_eq!(
            start_marker(&state),
            vec![Action::ChangeStartMarker {
                id: "r1".into(),
                value: StartMarker::Hollow
            }]
        );
    }

    #[test]
    fn test_sort_picks_facing_sides() {
        let mut state = two_tables(ColumnOption::empty());
        assert_eq!(settle(&mut state, sort), 1);
        let rel = state.relationship("r1").unwrap();
        assert_eq!(rel.start.direction, Direction::Right);
        assert_eq!(rel.end.direction, Direction::Left);
        assert_eq!((rel.start.x, rel.start.y), (100.0, 50.0));
        assert_eq!((rel.end.x, rel.end.y), (400.0, 50.0));
        assert_eq!(settle(&mut state, sort), 0);
    }

    #[test]
    fn test_sort_vertical_placement() {
        let mut state = two_tables(ColumnOption::empty());
        apply(
            &mut state,
            &Action::MoveToTable {
                id: "t2".into(),
                x: 0.0,
                y: 500.0,
            },
        );
        settle(&mut state, sort);
        let rel = state.relationship("r1").unwrap();
        assert_eq!(rel.start.direction, Direction::Bottom);
        assert_eq!(rel.end.direction, Direction::Top);
    }

    #[test]
    fn test_sort_spreads_shared_side() {
        let mut state = two_tables(ColumnOption::empty());
        let mut third = Table::new("t3", "other").at(400.0, 60.0);
        third.ui.width = 100.0;
        third.ui.height = 100.0;
        apply(&mut state, &Action::AddTable { table: third });
        apply(
            &mut state,
            &Action::AddColumn {
                column: Column::new("c3", "t3", "parent_id"),
            },
        );
        apply(
            &mut state,
            &Action::AddRelationship {
                relationship: Relationship::new(
                    "r2",
                    RelationshipPoint::new("t1", ["c1"]),
                    RelationshipPoint::new("t3", ["c3"]),
                ),
            },
        );
        settle(&mut state, sort);
        let r1 = state.relationship("r1").unwrap();
        let r2 = state.relationship("r2").unwrap();
        assert_eq!(r1.start.direction, Direction::Right);
        assert_eq!(r2.start.direction, Direction::Right);
        // t2 sits above t3, so r1 takes the upper slot.
        assert!(r1.start.y < r2.start.y);
        assert!((r1.start.y - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_sort_skips_dangling() {
        let mut state = two_tables(ColumnOption::empty());
        apply(&mut state, &Action::RemoveTable { id: "t1".into() });
        assert!(sort(&state).is_empty());
    }
}
