//! Differential tests: original and optimized graphs must be
//! indistinguishable under the reference interpreter.
//!
//! Each program is built once, optimized on a copy (by the escape analysis
//! phase alone and by the full pipeline) and executed on a matrix of
//! inputs. Return values, thrown exceptions, deoptimization snapshots and
//! the log of opaque calls must agree for every input.
//!
//! Programs:
//! - Objects updated on both branches of a conditional
//! - An accumulator object carried around a loop
//! - Nested objects escaping on one path
//! - Locks on objects that never escape
//! - Type tests, null checks and reference comparisons
//! - Deoptimization with a virtual object in the snapshot

use std::sync::Arc;

use pea_jit::interp::{Interpreter, Outcome, Rendered, ThrowKind, Value};
use pea_jit::ir::{
    ArithmeticBuilder, ControlBuilder, FieldId, Graph, GraphBuilder, MemoryOp, ObjectBuilder,
    Operator, TypeId, TypeRegistry, ValueKind, VirtualOp,
};
use pea_jit::opt::{optimize_full, MetricsSink, PartialEscapePhase, PeaConfig};

// =============================================================================
// Test Infrastructure
// =============================================================================

struct Program {
    name: &'static str,
    graph: Graph,
    types: TypeRegistry,
    inputs: Vec<Vec<Value>>,
}

fn bools() -> Vec<Value> {
    vec![Value::Bool(true), Value::Bool(false)]
}

fn ints() -> Vec<Value> {
    vec![Value::Int(-3), Value::Int(0), Value::Int(1), Value::Int(6)]
}

/// Cartesian product of per-parameter value lists.
fn matrix(columns: &[Vec<Value>]) -> Vec<Vec<Value>> {
    columns.iter().fold(vec![Vec::new()], |rows, column| {
        rows.iter()
            .flat_map(|row| {
                column.iter().map(move |&value| {
                    let mut row = row.clone();
                    row.push(value);
                    row
                })
            })
            .collect()
    })
}

fn check(program: &Program, optimized: &Graph) {
    for args in &program.inputs {
        let expected = Interpreter::new(&program.graph, &program.types)
            .run(args)
            .unwrap();
        let actual = Interpreter::new(optimized, &program.types)
            .run(args)
            .unwrap();
        assert!(
            expected.observably_equal(&actual),
            "{}: inputs {:?}: expected {:?}, got {:?}",
            program.name,
            args,
            expected.outcome,
            actual.outcome
        );
        assert!(actual.allocations <= expected.allocations, "{}", program.name);
    }
}

fn check_phase(program: &Program) -> Graph {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut optimized = program.graph.clone();
    PartialEscapePhase::new(PeaConfig::for_testing())
        .with_metrics(Arc::new(MetricsSink::new()))
        .apply(&mut optimized, &program.types)
        .unwrap();
    check(program, &optimized);
    optimized
}

fn check_pipeline(program: &Program) {
    let mut optimized = program.graph.clone();
    optimize_full(&mut optimized, &program.types).unwrap();
    check(program, &optimized);
}

fn allocations(graph: &Graph) -> usize {
    graph.count(|op| {
        matches!(
            op,
            Operator::Memory(MemoryOp::NewInstance(_)) | Operator::Memory(MemoryOp::NewArray(_))
        )
    })
}

fn point(types: &mut TypeRegistry) -> (TypeId, FieldId, FieldId) {
    let ty = types.add_class("Point", None);
    let x = types.add_field(ty, "x", ValueKind::Int);
    let y = types.add_field(ty, "y", ValueKind::Int);
    (ty, x, y)
}

// =============================================================================
// Programs
// =============================================================================

/// `p.x` and `p.y` written on both branches, escaping on one of them.
fn branchy_updates() -> Program {
    let mut types = TypeRegistry::new();
    let (pt, x, y) = point(&mut types);
    let mut b = GraphBuilder::new(&[ValueKind::Bool, ValueKind::Bool, ValueKind::Int]);
    let (c1, c2, v) = (b.parameter(0), b.parameter(1), b.parameter(2));
    let p = b.new_instance(pt);
    b.store_field(p, x, v);
    let (t, f) = b.branch(c1);
    b.begin(t);
    let ten = b.const_int(10);
    b.store_field(p, y, ten);
    let (escape, keep) = b.branch(c2);
    b.begin(escape);
    b.call(0, &[p], ValueKind::Void);
    let e1 = b.end();
    b.begin(keep);
    let e2 = b.end();
    b.merge(&[e1, e2]);
    let e3 = b.end();
    b.begin(f);
    let doubled = b.int_add(v, v);
    b.store_field(p, x, doubled);
    let e4 = b.end();
    b.merge(&[e3, e4]);
    let px = b.load_field(p, x, ValueKind::Int);
    let py = b.load_field(p, y, ValueKind::Int);
    let sum = b.int_add(px, py);
    b.return_value(Some(sum));
    Program {
        name: "branchy_updates",
        graph: b.finish(),
        types,
        inputs: matrix(&[bools(), bools(), ints()]),
    }
}

/// `box.value += i` for `i` in `0..n`.
fn loop_accumulator() -> Program {
    let mut types = TypeRegistry::new();
    let boxed = types.add_class("Box", None);
    let value = types.add_field(boxed, "value", ValueKind::Int);
    let mut b = GraphBuilder::new(&[ValueKind::Int]);
    let n = b.parameter(0);
    let zero = b.const_int(0);
    let one = b.const_int(1);
    let acc = b.new_instance(boxed);
    let header = b.loop_begin();
    let i = b.loop_phi(zero, ValueKind::Int);
    let cond = b.int_lt(i, n);
    let (body, done) = b.branch(cond);
    b.begin(body);
    let current = b.load_field(acc, value, ValueKind::Int);
    let updated = b.int_add(current, i);
    b.store_field(acc, value, updated);
    let next = b.int_add(i, one);
    b.set_loop_phi_back(i, next);
    b.loop_end(header);
    b.begin(done);
    b.loop_exit(header);
    let result = b.load_field(acc, value, ValueKind::Int);
    b.return_value(Some(result));
    Program {
        name: "loop_accumulator",
        graph: b.finish(),
        types,
        inputs: matrix(&[ints()]),
    }
}

/// `outer.inner.v`, where `outer` escapes when `c` holds.
fn nested_objects() -> Program {
    let mut types = TypeRegistry::new();
    let inner_ty = types.add_class("Inner", None);
    let v_field = types.add_field(inner_ty, "v", ValueKind::Int);
    let outer_ty = types.add_class("Outer", None);
    let inner_field = types.add_field(outer_ty, "inner", ValueKind::Object);
    let mut b = GraphBuilder::new(&[ValueKind::Bool, ValueKind::Int]);
    let (c, v) = (b.parameter(0), b.parameter(1));
    let outer = b.new_instance(outer_ty);
    let inner = b.new_instance(inner_ty);
    b.store_field(inner, v_field, v);
    b.store_field(outer, inner_field, inner);
    let (t, f) = b.branch(c);
    b.begin(t);
    b.call(0, &[outer], ValueKind::Void);
    let e1 = b.end();
    b.begin(f);
    let e2 = b.end();
    b.merge(&[e1, e2]);
    let loaded = b.load_field(outer, inner_field, ValueKind::Object);
    let result = b.load_field(loaded, v_field, ValueKind::Int);
    b.return_value(Some(result));
    Program {
        name: "nested_objects",
        graph: b.finish(),
        types,
        inputs: matrix(&[bools(), ints()]),
    }
}

/// Balanced locking of an object that never escapes.
fn local_lock() -> Program {
    let mut types = TypeRegistry::new();
    let (pt, x, _) = point(&mut types);
    let mut b = GraphBuilder::new(&[ValueKind::Int]);
    let v = b.parameter(0);
    let p = b.new_instance(pt);
    b.monitor_enter(p);
    b.monitor_enter(p);
    b.store_field(p, x, v);
    b.monitor_exit(p);
    b.monitor_exit(p);
    let result = b.load_field(p, x, ValueKind::Int);
    b.return_value(Some(result));
    Program {
        name: "local_lock",
        graph: b.finish(),
        types,
        inputs: matrix(&[ints()]),
    }
}

/// Type tests and reference comparisons against virtual objects.
fn type_tests() -> Program {
    let mut types = TypeRegistry::new();
    let (pt, _, _) = point(&mut types);
    let other = types.add_class("Other", None);
    let mut b = GraphBuilder::new(&[ValueKind::Object, ValueKind::Bool]);
    let (param, c) = (b.parameter(0), b.parameter(1));
    let p = b.new_instance(pt);
    let q = b.new_instance(pt);
    let is_point = b.instance_of(p, pt);
    let is_object = b.instance_of(q, TypeId::OBJECT);
    let cast = b.check_cast(p, TypeId::OBJECT);
    let same = b.object_equals(cast, p);
    let different = b.object_equals(p, q);
    let vs_param = b.object_equals(q, param);
    let null = b.is_null(p);
    let hub = b.read_hub(q);
    b.call(
        0,
        &[is_point, is_object, same, different, vs_param, null, hub],
        ValueKind::Void,
    );
    let (t, f) = b.branch(c);
    b.begin(t);
    b.check_cast(q, other);
    b.return_value(None);
    b.begin(f);
    b.return_value(None);
    Program {
        name: "type_tests",
        graph: b.finish(),
        types,
        inputs: matrix(&[vec![Value::Null], bools()]),
    }
}

/// Deoptimization with a virtual object, and its lock, in the snapshot.
fn deopt_with_virtual_state() -> Program {
    let mut types = TypeRegistry::new();
    let (pt, x, y) = point(&mut types);
    let mut b = GraphBuilder::new(&[ValueKind::Int]);
    let v = b.parameter(0);
    let zero = b.const_int(0);
    let p = b.new_instance(pt);
    b.store_field(p, x, v);
    b.monitor_enter(p);
    let negative = b.int_lt(v, zero);
    let (bail, stay) = b.branch(negative);
    b.begin(bail);
    let frame = b.frame_state(3, &[v, p, p]);
    b.deopt(frame);
    b.begin(stay);
    b.monitor_exit(p);
    b.store_field(p, y, v);
    let px = b.load_field(p, x, ValueKind::Int);
    let py = b.load_field(p, y, ValueKind::Int);
    let product = b.int_mul(px, py);
    b.return_value(Some(product));
    Program {
        name: "deopt_with_virtual_state",
        graph: b.finish(),
        types,
        inputs: matrix(&[ints()]),
    }
}

fn programs() -> Vec<Program> {
    vec![
        branchy_updates(),
        loop_accumulator(),
        nested_objects(),
        local_lock(),
        type_tests(),
        deopt_with_virtual_state(),
    ]
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_phase_preserves_behavior() {
    for program in programs() {
        check_phase(&program);
    }
}

#[test]
fn test_pipeline_preserves_behavior() {
    for program in programs() {
        check_pipeline(&program);
    }
}

#[test]
fn test_loop_accumulator_stays_virtual() {
    let program = loop_accumulator();
    let optimized = check_phase(&program);
    assert_eq!(allocations(&optimized), 0);
    assert_eq!(optimized.count(|op| *op == Operator::LoopPhi), 2);
    assert_eq!(optimized.count(|op| *op == Operator::ValueProxy), 1);
}

#[test]
fn test_local_lock_is_eliminated() {
    let program = local_lock();
    let optimized = check_phase(&program);
    assert_eq!(allocations(&optimized), 0);
    let result = Interpreter::new(&optimized, &program.types)
        .run(&[Value::Int(5)])
        .unwrap();
    assert_eq!(result.allocations, 0);
}

#[test]
fn test_type_tests_fold_on_virtual_objects() {
    let program = type_tests();
    let optimized = check_phase(&program);
    assert_eq!(allocations(&optimized), 0);
    // Only the cast to an unrelated type needs a real object.
    assert_eq!(
        optimized.count(|op| *op == Operator::Virtual(VirtualOp::MaterializeObject)),
        1
    );
    let kept = Interpreter::new(&optimized, &program.types)
        .run(&[Value::Null, Value::Bool(false)])
        .unwrap();
    assert_eq!(kept.allocations, 0);
    let cast = Interpreter::new(&optimized, &program.types)
        .run(&[Value::Null, Value::Bool(true)])
        .unwrap();
    assert_eq!(cast.outcome, Outcome::Threw(ThrowKind::ClassCast));
}

#[test]
fn test_deopt_snapshot_shares_one_description() {
    let program = deopt_with_virtual_state();
    let optimized = check_phase(&program);
    assert_eq!(allocations(&optimized), 0);
    let result = Interpreter::new(&optimized, &program.types)
        .run(&[Value::Int(-3)])
        .unwrap();
    assert_eq!(result.allocations, 1);
    let locals = match result.outcome {
        Outcome::Deoptimized { locals, .. } => locals,
        other => panic!("expected deoptimization, got {:?}", other),
    };
    assert_eq!(locals[2], Rendered::Back(0));
}
