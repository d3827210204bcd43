//! Crate-wide invariants that don't belong to any single tracer module.

use epg_tracers::graph::{GraphMaterializer, GraphOp};
use epg_tracers::{CallId, DcfgId};

use crate::support::*;

#[test]
fn call_id_round_trips_through_its_display_and_from_str_forms() {
    let id = CallId::root().child(0).child(3).child(1);
    let round_tripped: CallId = id.to_string().parse().unwrap();
    assert_eq!(id, round_tripped);
}

#[test]
fn dcfg_id_round_trips_through_its_display_and_from_str_forms() {
    let id = DcfgId::new(CallId::root().child(2), 5, 1);
    let round_tripped: DcfgId = id.to_string().parse().unwrap();
    assert_eq!(id, round_tripped);
}

#[test]
fn call_id_ordering_follows_depth_first_left_to_right_traversal() {
    let root = CallId::root();
    let first_child = root.child(0);
    let second_child = root.child(1);
    let grandchild = first_child.child(0);
    assert!(root < first_child);
    assert!(first_child < second_child);
    assert!(first_child < grandchild);
    assert!(grandchild < second_child);
}

#[test]
fn replaying_the_same_trace_twice_produces_equal_call_trees() {
    let f = frame("CALL", ALICE, BOB, "0x64");
    let trace = exec(vec![step(0, "SSTORE", 1, &["0x0", "0x2a"]), step(1, "STOP", 1, &[])]);

    let first = emulator().execute_trace(&trace, &f, &header(), &config()).unwrap();
    let second = emulator().execute_trace(&trace, &f, &header(), &config()).unwrap();

    assert_eq!(first.traces().len(), second.traces().len());
    assert_eq!(first.traces()[0].id, second.traces()[0].id);
    assert_eq!(first.traces()[0].flows.len(), second.traces()[0].flows.len());
    assert_eq!(first.dcfg().dcfg_node_count(), second.dcfg().dcfg_node_count());
}

#[test]
fn every_created_node_id_is_unique_within_one_materialize_pass() {
    let mut root = frame("CALL", ALICE, BOB, "0x64");
    let child = frame("CALL", BOB, CAROL, "0x0");
    root.calls.push(child);

    let trace = exec(vec![
        step(0, "CALL", 1, &["0x0", "0x0", "0x0", "0x0", "0x0", CAROL, "0x0"]),
        step(1, "STOP", 2, &[]),
        step(1, "STOP", 1, &[]),
    ]);
    let result = emulator().execute_trace(&trace, &root, &header(), &config()).unwrap();

    let ops: Vec<GraphOp> = GraphMaterializer::new().materialize(&result);
    let mut ids: Vec<&str> = ops
        .iter()
        .filter_map(|op| match op {
            GraphOp::CreateNode { id, .. } => Some(id.as_str()),
            GraphOp::CreateEdge { .. } => None,
        })
        .collect();
    let before = ids.len();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), before);
}

#[test]
fn jumpi_condition_provenance_is_keyed_by_the_branching_block() {
    let f = frame("CALL", ALICE, BOB, "0x0");
    let trace = exec(vec![step(0, "JUMPI", 1, &["0x5", "0x1"]), step(1, "STOP", 1, &[])]);
    let result = emulator().execute_trace(&trace, &f, &header(), &config()).unwrap();
    assert_eq!(result.jumpi_data_sources().len(), 1);
}
