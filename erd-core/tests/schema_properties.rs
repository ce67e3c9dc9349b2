//! Property-based tests for document snapshots
//!
//! Snapshots travel between peers as JSON. A peer that loads one must end
//! up with exactly the same document, bit for bit, or its derivations
//! (sizes, anchors) drift from everyone else's.

use erd_core::reducer::apply;
use erd_core::{Action, Column, Memo, Relationship, RelationshipPoint, SchemaState, Table};
use proptest::prelude::*;

fn coordinate() -> impl Strategy<Value = f64> {
    prop_oneof![
        -1.0e6..1.0e6f64,
        0.0..1000.0f64,
        prop::num::f64::NORMAL,
        prop::num::f64::SUBNORMAL,
        Just(0.0),
    ]
}

fn document(coords: &[f64]) -> SchemaState {
    let mut state = SchemaState::new();
    for (i, pair) in coords.chunks(2).enumerate() {
        let id = format!("t{i}");
        let y = pair.get(1).copied().unwrap_or(0.0);
        apply(
            &mut state,
            &Action::AddTable {
                table: Table::new(&id, &id).at(pair[0], y),
            },
        );
        apply(
            &mut state,
            &Action::AddColumn {
                column: Column::new(format!("{id}_c"), &id, "id"),
            },
        );
        apply(
            &mut state,
            &Action::ResizeTable {
                id: id.clone(),
                width: y.abs(),
                height: pair[0].abs(),
            },
        );
    }
    if state.tables.len() >= 2 {
        let mut relationship = Relationship::new(
            "r1",
            RelationshipPoint::new("t0", ["t0_c"]),
            RelationshipPoint::new("t1", ["t1_c"]),
        );
        relationship.start.x = coords[0] / 3.0;
        relationship.start.y = coords[1] / 7.0;
        relationship.end.x = coords[2] * 0.1;
        relationship.end.y = coords.get(3).copied().unwrap_or(0.0) / 11.0;
        apply(&mut state, &Action::AddRelationship { relationship });
    }
    let mut memo = Memo {
        id: "m1".into(),
        ..Memo::default()
    };
    memo.ui.x = coords[0] / std::f64::consts::PI;
    memo.ui.y = -coords[0] / 9.0;
    apply(&mut state, &Action::AddMemo { memo });
    state
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_snapshot_json_is_exact(coords in prop::collection::vec(coordinate(), 4..16)) {
        let state = document(&coords);
        let json = state.to_json().unwrap();
        let back = SchemaState::from_json(&json).unwrap();
        prop_assert_eq!(&back, &state);
        prop_assert_eq!(back.to_json().unwrap(), json);
    }

    #[test]
    fn prop_every_coordinate_survives(x in coordinate(), y in coordinate()) {
        let state = document(&[x, y, y, x]);
        let back = SchemaState::from_json(&state.to_json().unwrap()).unwrap();
        let table = back.table("t0").unwrap();
        prop_assert_eq!(table.ui.x.to_bits(), x.to_bits());
        prop_assert_eq!(table.ui.y.to_bits(), y.to_bits());
    }
}

#[test]
fn test_known_drifting_value_round_trips() {
    let x = 985.6906946328695_f64;
    let state = document(&[x, x, 1.0, 2.0]);
    let back = SchemaState::from_json(&state.to_json().unwrap()).unwrap();
    assert_eq!(back.table("t0").unwrap().ui.x.to_bits(), x.to_bits());
}
