//! Unit tests for the IR Graph Builder.
//!
//! Tests are organized by builder trait:
//! - ArithmeticBuilder: constants, integer ops, comparisons
//! - ControlBuilder: branches, merges, loops, phis, snapshots
//! - ObjectBuilder: allocation, field and element access, monitors

use super::*;
use crate::ir::operators::{ArithOp, CmpOp, ControlOp, MemoryOp, MonitorOp, Operator, VirtualOp};
use crate::ir::types::{TypeRegistry, ValueKind};

// =============================================================================
// Basic Builder Tests
// =============================================================================

#[test]
fn test_builder_basic() {
    let mut builder = GraphBuilder::new(&[ValueKind::Int, ValueKind::Int]);

    let p0 = builder.parameter(0);
    let p1 = builder.parameter(1);
    let sum = builder.int_add(p0, p1);
    let ret = builder.return_value(Some(sum));

    let graph = builder.finish();
    assert_eq!(graph.op(sum), Operator::IntOp(ArithOp::Add));
    assert_eq!(graph.input(ret, 0), Some(graph.start));
    assert_eq!(graph.input(ret, 1), Some(sum));
    assert!(graph.verify().is_ok());
}

#[test]
fn test_builder_parameter_kinds() {
    let builder = GraphBuilder::new(&[ValueKind::Bool, ValueKind::Object]);
    assert_eq!(builder.graph().node(builder.parameter(0)).kind, ValueKind::Bool);
    assert_eq!(builder.graph().node(builder.parameter(1)).kind, ValueKind::Object);
}

#[test]
fn test_builder_comparisons() {
    let mut builder = GraphBuilder::new(&[]);
    let a = builder.const_int(1);
    let b = builder.const_int(2);
    let lt = builder.int_lt(a, b);
    let eq = builder.int_eq(a, b);

    assert_eq!(builder.graph().op(lt), Operator::IntCmp(CmpOp::Lt));
    assert_eq!(builder.graph().op(eq), Operator::IntCmp(CmpOp::Eq));
    assert_eq!(builder.graph().node(lt).kind, ValueKind::Bool);
}

// =============================================================================
// Control Flow Tests
// =============================================================================

#[test]
fn test_builder_diamond() {
    let mut builder = GraphBuilder::new(&[ValueKind::Bool]);
    let cond = builder.parameter(0);
    let (t, f) = builder.branch(cond);
    assert!(!builder.control().is_valid());

    builder.begin(t);
    let one = builder.const_int(1);
    let e1 = builder.end();
    builder.begin(f);
    let two = builder.const_int(2);
    let e2 = builder.end();
    let region = builder.merge(&[e1, e2]);
    let phi = builder.phi(&[one, two], ValueKind::Int);
    builder.return_value(Some(phi));

    let graph = builder.finish();
    assert_eq!(graph.op(region), Operator::Control(ControlOp::Region));
    assert_eq!(graph.phis(region), vec![phi]);
    assert_eq!(graph.input(phi, 0), Some(region));
    assert!(graph.verify().is_ok());
}

#[test]
fn test_builder_loop() {
    let mut builder = GraphBuilder::new(&[ValueKind::Int]);
    let n = builder.parameter(0);
    let zero = builder.const_int(0);
    let header = builder.loop_begin();
    let i = builder.loop_phi(zero, ValueKind::Int);
    let cond = builder.int_lt(i, n);
    let (body, exit) = builder.branch(cond);
    builder.begin(body);
    let one = builder.const_int(1);
    let next = builder.int_add(i, one);
    builder.set_loop_phi_back(i, next);
    let back = builder.loop_end(header);
    builder.begin(exit);
    let loop_exit = builder.loop_exit(header);
    let out = builder.proxy(i, loop_exit);
    builder.return_value(Some(out));

    let graph = builder.finish();
    assert_eq!(graph.node(header).inputs.len(), 2);
    assert_eq!(graph.input(header, 1), Some(back));
    assert_eq!(graph.node(i).inputs.to_vec(), vec![header, zero, next]);
    assert_eq!(graph.op(loop_exit), Operator::Control(ControlOp::LoopExit));
    assert_eq!(graph.node(out).kind, ValueKind::Int);
    assert!(graph.verify().is_ok());
}

#[test]
fn test_builder_deopt_snapshot() {
    let mut builder = GraphBuilder::new(&[ValueKind::Int]);
    let p = builder.parameter(0);
    let state = builder.frame_state(7, &[p]);
    let deopt = builder.deopt(state);

    let graph = builder.finish();
    assert_eq!(
        graph.op(state),
        Operator::Virtual(VirtualOp::FrameState { bci: 7, locals: 1 })
    );
    assert_eq!(graph.node(deopt).state_after, Some(state));
    assert_eq!(graph.uses(state), &[deopt]);
}

// =============================================================================
// Object Tests
// =============================================================================

#[test]
fn test_builder_object_chain() {
    let mut types = TypeRegistry::new();
    let point = types.add_class("Point", None);
    let x = types.add_field(point, "x", ValueKind::Int);

    let mut builder = GraphBuilder::new(&[]);
    let obj = builder.new_instance(point);
    let five = builder.const_int(5);
    let store = builder.store_field(obj, x, five);
    let enter = builder.monitor_enter(obj);
    let load = builder.load_field(obj, x, ValueKind::Int);
    builder.monitor_exit(obj);
    builder.return_value(Some(load));

    let graph = builder.finish();
    assert_eq!(graph.op(obj), Operator::Memory(MemoryOp::NewInstance(point)));
    assert_eq!(graph.input(store, 0), Some(obj));
    assert_eq!(graph.input(enter, 0), Some(store));
    assert_eq!(graph.op(enter), Operator::Monitor(MonitorOp::Enter));
    assert_eq!(graph.node(load).kind, ValueKind::Int);
    assert_eq!(graph.control_successor(obj), Some(store));
    assert!(graph.verify().is_ok());
}

#[test]
fn test_builder_floating_tests_are_unfixed() {
    let mut builder = GraphBuilder::new(&[ValueKind::Object]);
    let p = builder.parameter(0);
    let control = builder.control();
    let null = builder.is_null(p);
    let pi = builder.pi(p);

    assert_eq!(builder.control(), control);
    assert!(!builder.graph().node(null).is_fixed());
    assert!(!builder.graph().node(pi).is_fixed());
}
