//! Reference interpreter for the Sea-of-Nodes IR.
//!
//! Executes a graph directly, following the control chain from `Start`.
//! It exists to check optimizations: a graph and its optimized form must
//! produce the same [`Execution`] for every input (return value, thrown
//! exception, deoptimization snapshot and the log of opaque calls), all
//! compared as identity-free [`Rendered`] values.
//!
//! # Evaluation Model
//!
//! - Fixed nodes run in control order and keep their result until they run
//!   again.
//! - Phis take the value of the incoming edge when control enters their
//!   merge; all phis of a merge switch at once.
//! - Floating nodes are evaluated on demand and cached until control enters
//!   the next merge.
//! - Monitors flagged `ELIMINATED` are skipped.
//! - `Deopt` rebuilds virtual objects from the mappings of its snapshot.

pub mod heap;

pub use heap::{Heap, HeapObject, ObjectRef, Rendered, Value};

use log::{debug, trace};
use rustc_hash::FxHashMap;

use crate::error::InterpError;
use crate::ir::graph::Graph;
use crate::ir::node::{NodeFlags, NodeId};
use crate::ir::operators::{ControlOp, MemoryOp, MonitorOp, Operator, VirtualOp};
use crate::ir::types::{FieldId, TypeRegistry};

/// Default number of fixed nodes one execution may run.
pub const DEFAULT_STEP_LIMIT: u64 = 100_000;

// =============================================================================
// Results
// =============================================================================

/// Exceptions the interpreted program can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrowKind {
    ClassCast,
    NullPointer,
    OutOfBounds,
    MissingField,
    IllegalMonitorState,
}

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Normal return with value.
    Returned(Option<Rendered>),
    /// Exception occurred.
    Threw(ThrowKind),
    /// Transfer to the unoptimized tier.
    Deoptimized {
        /// Bytecode index to resume at.
        bci: u32,
        /// Local values of the snapshot.
        locals: Vec<Rendered>,
    },
}

/// Observable side effect of an execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// An opaque call and its arguments.
    Call { target: u32, args: Vec<Rendered> },
    /// A finalizer registration.
    Finalizer(Rendered),
}

/// Result of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub outcome: Outcome,
    pub events: Vec<Event>,
    /// Fixed nodes run.
    pub steps: u64,
    /// Objects allocated.
    pub allocations: usize,
}

impl Execution {
    /// Whether two executions are indistinguishable to an observer.
    /// Step and allocation counts are not observable.
    pub fn observably_equal(&self, other: &Execution) -> bool {
        self.outcome == other.outcome && self.events == other.events
    }
}

// =============================================================================
// Interpreter
// =============================================================================

/// Runs graphs against a type registry.
pub struct Interpreter<'g> {
    graph: &'g Graph,
    types: &'g TypeRegistry,
    step_limit: u64,
}

impl<'g> Interpreter<'g> {
    pub fn new(graph: &'g Graph, types: &'g TypeRegistry) -> Self {
        Interpreter {
            graph,
            types,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    /// Set the number of fixed nodes an execution may run.
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    /// Execute the graph with the given parameter values.
    pub fn run(&self, args: &[Value]) -> Result<Execution, InterpError> {
        let mut frame = Frame {
            graph: self.graph,
            types: self.types,
            args,
            heap: Heap::new(),
            fixed: FxHashMap::default(),
            phis: FxHashMap::default(),
            floating: FxHashMap::default(),
            events: Vec::new(),
        };

        let mut current = self.graph.start;
        let mut steps = 0;
        let outcome = loop {
            steps += 1;
            if steps > self.step_limit {
                return Err(InterpError::StepLimit(self.step_limit));
            }
            let flow = match frame.step(current) {
                Ok(flow) => flow,
                Err(Fault::Throw(kind)) => break Outcome::Threw(kind),
                Err(Fault::Error(err)) => return Err(err),
            };
            current = match flow {
                ControlFlow::Continue => self
                    .graph
                    .control_successor(current)
                    .ok_or_else(|| InterpError::MalformedControl(describe(self.graph, current)))?,
                ControlFlow::Jump(target) => target,
                ControlFlow::Exit(outcome) => break outcome,
            };
        };

        debug!("interpreter finished after {} steps: {:?}", steps, outcome);
        Ok(Execution {
            outcome,
            events: frame.events,
            steps,
            allocations: frame.heap.len(),
        })
    }
}

/// What to do after a fixed node ran.
enum ControlFlow {
    /// Continue with the control successor.
    Continue,
    /// Transfer to a block begin.
    Jump(NodeId),
    /// Leave the graph.
    Exit(Outcome),
}

/// Why a node could not complete.
enum Fault {
    /// The program raised an exception.
    Throw(ThrowKind),
    /// The graph cannot be interpreted.
    Error(InterpError),
}

impl From<InterpError> for Fault {
    fn from(err: InterpError) -> Self {
        Fault::Error(err)
    }
}

type StepResult<T> = Result<T, Fault>;

fn describe(graph: &Graph, node: NodeId) -> String {
    match graph.get(node) {
        Some(n) => format!("{:?} {:?}", node, n.op),
        None => format!("{:?}", node),
    }
}

// =============================================================================
// Frame
// =============================================================================

struct Frame<'a> {
    graph: &'a Graph,
    types: &'a TypeRegistry,
    args: &'a [Value],
    heap: Heap,
    /// Results of fixed nodes.
    fixed: FxHashMap<NodeId, Value>,
    /// Current values of phis.
    phis: FxHashMap<NodeId, Value>,
    /// Cached floating values, dropped at every merge.
    floating: FxHashMap<NodeId, Value>,
    events: Vec<Event>,
}

impl Frame<'_> {
    fn input(&self, node: NodeId, index: usize) -> Result<NodeId, InterpError> {
        self.graph.input(node, index).ok_or_else(|| {
            InterpError::MalformedControl(format!(
                "{} has no input {}",
                describe(self.graph, node),
                index
            ))
        })
    }

    fn input_value(&mut self, node: NodeId, index: usize) -> Result<Value, InterpError> {
        let input = self.input(node, index)?;
        self.eval(input)
    }

    fn int_input(&mut self, node: NodeId, index: usize) -> Result<i64, InterpError> {
        match self.input_value(node, index)? {
            Value::Int(v) => Ok(v),
            _ => Err(self.confusion(node, "int")),
        }
    }

    fn bool_input(&mut self, node: NodeId, index: usize) -> Result<bool, InterpError> {
        match self.input_value(node, index)? {
            Value::Bool(v) => Ok(v),
            _ => Err(self.confusion(node, "bool")),
        }
    }

    /// The object at `index`, throwing on null.
    fn object_input(&mut self, node: NodeId, index: usize) -> StepResult<ObjectRef> {
        match self.input_value(node, index)? {
            Value::Ref(r) => Ok(r),
            Value::Null => Err(Fault::Throw(ThrowKind::NullPointer)),
            _ => Err(self.confusion(node, "object").into()),
        }
    }

    fn confusion(&self, node: NodeId, expected: &'static str) -> InterpError {
        InterpError::TypeConfusion {
            node: describe(self.graph, node),
            expected,
        }
    }

    /// Slot `index` of `object`, throwing when out of range.
    fn slot(&self, object: ObjectRef, index: i64) -> StepResult<usize> {
        let len = self.heap.get(object).slots.len();
        usize::try_from(index)
            .ok()
            .filter(|&i| i < len)
            .ok_or(Fault::Throw(ThrowKind::OutOfBounds))
    }

    // =========================================================================
    // Fixed Nodes
    // =========================================================================

    fn step(&mut self, id: NodeId) -> StepResult<ControlFlow> {
        let graph = self.graph;
        let node = graph.node(id);
        trace!("interp {:?} {:?}", id, node.op);

        let result = match node.op {
            Operator::Control(op) => return self.control(id, op),
            Operator::Memory(op) => self.memory(id, op)?,
            Operator::Monitor(op) => {
                if !node.flags.contains(NodeFlags::ELIMINATED) {
                    let object = self.object_input(id, 1)?;
                    let target = self.heap.get_mut(object);
                    match op {
                        MonitorOp::Enter => target.locks += 1,
                        MonitorOp::Exit if target.locks == 0 => {
                            return Err(Fault::Throw(ThrowKind::IllegalMonitorState))
                        }
                        MonitorOp::Exit => target.locks -= 1,
                    }
                }
                None
            }
            Operator::CheckCast(ty) => match self.input_value(id, 1)? {
                Value::Null => Some(Value::Null),
                Value::Ref(r) if self.types.is_subtype_of(self.heap.get(r).ty, ty) => {
                    Some(Value::Ref(r))
                }
                Value::Ref(_) => return Err(Fault::Throw(ThrowKind::ClassCast)),
                _ => return Err(self.confusion(id, "object").into()),
            },
            Operator::RegisterFinalizer => {
                let object = self.input_value(id, 1)?;
                let rendered = self.heap.render(object);
                self.events.push(Event::Finalizer(rendered));
                None
            }
            Operator::Call(target) => {
                let args = node
                    .inputs
                    .iter()
                    .skip(1)
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                let args = self.heap.render_all(&args);
                self.events.push(Event::Call { target, args });
                Some(Value::default_of(node.kind))
            }
            Operator::Virtual(VirtualOp::MaterializeObject) => {
                let ty = match self.graph.op(self.input(id, 1)?) {
                    Operator::Virtual(VirtualOp::VirtualObject { ty, .. }) => ty,
                    _ => return Err(self.confusion(id, "virtual object").into()),
                };
                let slots = node
                    .inputs
                    .iter()
                    .skip(2)
                    .map(|value| self.eval(value))
                    .collect::<Result<Vec<_>, _>>()?;
                Some(Value::Ref(self.heap.alloc(ty, slots)))
            }
            Operator::Virtual(VirtualOp::CyclicStore(slot)) => {
                let object = self.object_input(id, 1)?;
                let value = self.input_value(id, 2)?;
                let index = self.slot(object, i64::from(slot))?;
                self.heap.get_mut(object).slots[index] = value;
                None
            }
            op => return Err(InterpError::Unsupported(format!("{:?}", op)).into()),
        };

        if let Some(value) = result {
            self.fixed.insert(id, value);
        }
        Ok(ControlFlow::Continue)
    }

    fn control(&mut self, id: NodeId, op: ControlOp) -> StepResult<ControlFlow> {
        match op {
            ControlOp::Start
            | ControlOp::IfTrue
            | ControlOp::IfFalse
            | ControlOp::Region
            | ControlOp::Loop
            | ControlOp::LoopExit => Ok(ControlFlow::Continue),
            ControlOp::If => {
                let taken = if self.bool_input(id, 1)? {
                    ControlOp::IfTrue
                } else {
                    ControlOp::IfFalse
                };
                let projection = self
                    .graph
                    .users(id)
                    .into_iter()
                    .find(|&user| self.graph.op(user) == Operator::Control(taken))
                    .ok_or_else(|| InterpError::MalformedControl(describe(self.graph, id)))?;
                Ok(ControlFlow::Jump(projection))
            }
            ControlOp::End | ControlOp::LoopEnd => {
                let merge = self
                    .graph
                    .users(id)
                    .into_iter()
                    .find(|&user| {
                        matches!(
                            self.graph.op(user),
                            Operator::Control(ControlOp::Region | ControlOp::Loop)
                        )
                    })
                    .ok_or_else(|| InterpError::MalformedControl(describe(self.graph, id)))?;
                self.enter_merge(merge, id)?;
                Ok(ControlFlow::Jump(merge))
            }
            ControlOp::Return => {
                let value = match self.graph.input(id, 1) {
                    Some(value) => Some(self.eval(value)?),
                    None => None,
                };
                let rendered = value.map(|v| self.heap.render(v));
                Ok(ControlFlow::Exit(Outcome::Returned(rendered)))
            }
            ControlOp::Deopt => Ok(ControlFlow::Exit(self.deopt(id)?)),
        }
    }

    /// Switch the phis of `merge` to the values flowing in through `end`.
    fn enter_merge(&mut self, merge: NodeId, end: NodeId) -> Result<(), InterpError> {
        let index = self
            .graph
            .node(merge)
            .inputs
            .position(end)
            .ok_or_else(|| InterpError::MalformedControl(describe(self.graph, end)))?;

        let mut incoming = Vec::new();
        for phi in self.graph.phis(merge) {
            let value = self.input_value(phi, index + 1)?;
            incoming.push((phi, value));
        }
        self.phis.extend(incoming);
        self.floating.clear();
        Ok(())
    }

    fn memory(&mut self, id: NodeId, op: MemoryOp) -> StepResult<Option<Value>> {
        let value = match op {
            MemoryOp::NewInstance(ty) => Value::Ref(self.heap.alloc_instance(self.types, ty)),
            MemoryOp::NewArray(ty) => {
                let length = self.int_input(id, 1)?;
                let length = usize::try_from(length).map_err(|_| Fault::Throw(ThrowKind::OutOfBounds))?;
                let component = self
                    .types
                    .component(ty)
                    .ok_or_else(|| Fault::from(self.confusion(id, "array type")))?;
                let slots = vec![Value::default_of(component); length];
                Value::Ref(self.heap.alloc(ty, slots))
            }
            MemoryOp::LoadField(field) => {
                let object = self.object_input(id, 1)?;
                let slot = self.field_slot(object, field)?;
                self.heap.get(object).slots[slot]
            }
            MemoryOp::StoreField(field) => {
                let object = self.object_input(id, 1)?;
                let slot = self.field_slot(object, field)?;
                let value = self.input_value(id, 2)?;
                self.heap.get_mut(object).slots[slot] = value;
                return Ok(None);
            }
            MemoryOp::LoadIndexed | MemoryOp::UnsafeLoad => {
                let object = self.object_input(id, 1)?;
                let slot = self.int_input(id, 2)?;
                let slot = self.slot(object, slot)?;
                self.heap.get(object).slots[slot]
            }
            MemoryOp::StoreIndexed | MemoryOp::UnsafeStore => {
                let object = self.object_input(id, 1)?;
                let slot = self.int_input(id, 2)?;
                let slot = self.slot(object, slot)?;
                let value = self.input_value(id, 3)?;
                self.heap.get_mut(object).slots[slot] = value;
                return Ok(None);
            }
            MemoryOp::CompareAndSwap => {
                let object = self.object_input(id, 1)?;
                let slot = self.int_input(id, 2)?;
                let slot = self.slot(object, slot)?;
                let expected = self.input_value(id, 3)?;
                let new = self.input_value(id, 4)?;
                let target = self.heap.get_mut(object);
                let swapped = target.slots[slot] == expected;
                if swapped {
                    target.slots[slot] = new;
                }
                Value::Bool(swapped)
            }
            MemoryOp::ArrayLength => {
                let object = self.object_input(id, 1)?;
                let target = self.heap.get(object);
                if !self.types.is_array(target.ty) {
                    return Err(self.confusion(id, "array").into());
                }
                Value::Int(target.slots.len() as i64)
            }
            MemoryOp::ReadHub => {
                let object = self.object_input(id, 1)?;
                Value::Hub(self.heap.get(object).ty)
            }
        };
        Ok(Some(value))
    }

    fn field_slot(&self, object: ObjectRef, field: FieldId) -> StepResult<usize> {
        self.types
            .slot_of(self.heap.get(object).ty, field)
            .ok_or(Fault::Throw(ThrowKind::MissingField))
    }

    // =========================================================================
    // Deoptimization
    // =========================================================================

    fn deopt(&mut self, id: NodeId) -> Result<Outcome, InterpError> {
        let frame = self
            .graph
            .node(id)
            .state_after
            .ok_or_else(|| InterpError::MalformedControl(describe(self.graph, id)))?;
        let Operator::Virtual(VirtualOp::FrameState { bci, locals }) = self.graph.op(frame) else {
            return Err(self.confusion(frame, "frame state"));
        };
        let inputs = self.graph.node(frame).inputs.to_vec();
        let locals = usize::from(locals).min(inputs.len());

        let mut mappings = FxHashMap::default();
        for &mapping in &inputs[locals..] {
            mappings.insert(self.input(mapping, 0)?, mapping);
        }

        let mut rebuilt = FxHashMap::default();
        let mut values = Vec::with_capacity(locals);
        for &local in &inputs[..locals] {
            values.push(self.snapshot_value(local, &mappings, &mut rebuilt)?);
        }
        Ok(Outcome::Deoptimized {
            bci,
            locals: self.heap.render_all(&values),
        })
    }

    /// Value of a snapshot entry, allocating virtual objects on first use.
    fn snapshot_value(
        &mut self,
        value: NodeId,
        mappings: &FxHashMap<NodeId, NodeId>,
        rebuilt: &mut FxHashMap<NodeId, Value>,
    ) -> Result<Value, InterpError> {
        let Operator::Virtual(VirtualOp::VirtualObject { ty, .. }) = self.graph.op(value) else {
            return self.eval(value);
        };
        if let Some(&done) = rebuilt.get(&value) {
            return Ok(done);
        }
        let mapping = *mappings
            .get(&value)
            .ok_or_else(|| InterpError::MissingValue(describe(self.graph, value)))?;

        match self.graph.op(mapping) {
            Operator::Virtual(VirtualOp::MaterializedObjectState) => {
                let materialized = self.input_value(mapping, 1)?;
                rebuilt.insert(value, materialized);
                Ok(materialized)
            }
            Operator::Virtual(VirtualOp::VirtualObjectState { locks }) => {
                // Allocate before filling so cycles resolve to this object.
                let object = self.heap.alloc(ty, Vec::new());
                rebuilt.insert(value, Value::Ref(object));
                let fields = self.graph.node(mapping).inputs.to_vec();
                let mut slots = Vec::with_capacity(fields.len().saturating_sub(1));
                for &field in fields.iter().skip(1) {
                    slots.push(self.snapshot_value(field, mappings, rebuilt)?);
                }
                let target = self.heap.get_mut(object);
                target.slots = slots;
                target.locks = locks;
                Ok(Value::Ref(object))
            }
            _ => Err(self.confusion(mapping, "object mapping")),
        }
    }

    // =========================================================================
    // Floating Nodes
    // =========================================================================

    fn eval(&mut self, id: NodeId) -> Result<Value, InterpError> {
        let graph = self.graph;
        let node = graph
            .get(id)
            .ok_or_else(|| InterpError::MissingValue(format!("{:?}", id)))?;
        if node.is_fixed() {
            return self
                .fixed
                .get(&id)
                .copied()
                .ok_or_else(|| InterpError::MissingValue(describe(self.graph, id)));
        }
        if node.is_phi() {
            return self
                .phis
                .get(&id)
                .copied()
                .ok_or_else(|| InterpError::MissingValue(describe(self.graph, id)));
        }
        if let Some(&value) = self.floating.get(&id) {
            return Ok(value);
        }

        let value = match node.op {
            Operator::ConstInt(v) => Value::Int(v),
            Operator::ConstBool(v) => Value::Bool(v),
            Operator::ConstNull => Value::Null,
            Operator::ConstHub(ty) => Value::Hub(ty),
            Operator::Parameter(index) => *self
                .args
                .get(usize::from(index))
                .ok_or_else(|| InterpError::MissingValue(describe(self.graph, id)))?,
            Operator::IntOp(op) => {
                let lhs = self.int_input(id, 0)?;
                let rhs = self.int_input(id, 1)?;
                Value::Int(op.apply(lhs, rhs))
            }
            Operator::IntCmp(op) => {
                let lhs = self.int_input(id, 0)?;
                let rhs = self.int_input(id, 1)?;
                Value::Bool(op.apply(lhs, rhs))
            }
            Operator::ValueProxy | Operator::Pi => self.input_value(id, 0)?,
            Operator::InstanceOf(ty) => match self.input_value(id, 0)? {
                Value::Null => Value::Bool(false),
                Value::Ref(r) => Value::Bool(self.types.is_subtype_of(self.heap.get(r).ty, ty)),
                _ => return Err(self.confusion(id, "object")),
            },
            Operator::IsNull => Value::Bool(self.input_value(id, 0)? == Value::Null),
            Operator::ObjectEquals => {
                let lhs = self.input_value(id, 0)?;
                let rhs = self.input_value(id, 1)?;
                Value::Bool(lhs == rhs)
            }
            op => return Err(InterpError::Unsupported(format!("{:?}", op))),
        };
        self.floating.insert(id, value);
        Ok(value)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder, ObjectBuilder};
    use crate::ir::types::{TypeId, ValueKind};

    #[test]
    fn test_arithmetic_and_branches() {
        let mut builder = GraphBuilder::new(&[ValueKind::Int]);
        let n = builder.parameter(0);
        let ten = builder.const_int(10);
        let cond = builder.int_lt(n, ten);
        let (small, large) = builder.branch(cond);
        builder.begin(small);
        let doubled = builder.int_add(n, n);
        let e1 = builder.end();
        builder.begin(large);
        let e2 = builder.end();
        builder.merge(&[e1, e2]);
        let result = builder.phi(&[doubled, ten], ValueKind::Int);
        builder.return_value(Some(result));
        let graph = builder.finish();
        let types = TypeRegistry::new();

        let interp = Interpreter::new(&graph, &types);
        let small = interp.run(&[Value::Int(3)]).unwrap();
        assert_eq!(small.outcome, Outcome::Returned(Some(Rendered::Int(6))));
        let large = interp.run(&[Value::Int(30)]).unwrap();
        assert_eq!(large.outcome, Outcome::Returned(Some(Rendered::Int(10))));
    }

    #[test]
    fn test_loop_sums() {
        // i = 0; s = 0; while (i < n) { s += i; i += 1 } return s
        let mut builder = GraphBuilder::new(&[ValueKind::Int]);
        let n = builder.parameter(0);
        let zero = builder.const_int(0);
        let one = builder.const_int(1);
        let header = builder.loop_begin();
        let i = builder.loop_phi(zero, ValueKind::Int);
        let s = builder.loop_phi(zero, ValueKind::Int);
        let cond = builder.int_lt(i, n);
        let (body, done) = builder.branch(cond);
        builder.begin(body);
        let next_s = builder.int_add(s, i);
        let next_i = builder.int_add(i, one);
        builder.set_loop_phi_back(i, next_i);
        builder.set_loop_phi_back(s, next_s);
        builder.loop_end(header);
        builder.begin(done);
        let exit = builder.loop_exit(header);
        let result = builder.proxy(s, exit);
        builder.return_value(Some(result));
        let graph = builder.finish();
        let types = TypeRegistry::new();

        let run = Interpreter::new(&graph, &types).run(&[Value::Int(5)]).unwrap();
        assert_eq!(run.outcome, Outcome::Returned(Some(Rendered::Int(10))));

        let limited = Interpreter::new(&graph, &types)
            .with_step_limit(20)
            .run(&[Value::Int(1000)]);
        assert_eq!(limited, Err(InterpError::StepLimit(20)));
    }

    #[test]
    fn test_objects_and_exceptions() {
        let mut types = TypeRegistry::new();
        let point = types.add_class("Point", None);
        let x = types.add_field(point, "x", ValueKind::Int);
        let other = types.add_class("Other", None);

        let mut builder = GraphBuilder::new(&[]);
        let p = builder.new_instance(point);
        let seven = builder.const_int(7);
        builder.store_field(p, x, seven);
        builder.call(3, &[p, p], ValueKind::Void);
        builder.check_cast(p, other);
        builder.return_value(Some(p));
        let graph = builder.finish();

        let run = Interpreter::new(&graph, &types).run(&[]).unwrap();
        assert_eq!(run.outcome, Outcome::Threw(ThrowKind::ClassCast));
        assert_eq!(run.allocations, 1);
        let object = Rendered::Object {
            ty: point,
            slots: vec![Rendered::Int(7)],
            locks: 0,
        };
        assert_eq!(
            run.events,
            vec![Event::Call {
                target: 3,
                args: vec![object, Rendered::Back(0)],
            }]
        );
    }

    #[test]
    fn test_monitor_exit_without_enter_throws() {
        let types = TypeRegistry::new();
        let mut builder = GraphBuilder::new(&[]);
        let p = builder.new_instance(TypeId::OBJECT);
        builder.monitor_exit(p);
        builder.return_value(None);
        let graph = builder.finish();

        let run = Interpreter::new(&graph, &types).run(&[]).unwrap();
        assert_eq!(run.outcome, Outcome::Threw(ThrowKind::IllegalMonitorState));
    }

    #[test]
    fn test_deopt_rebuilds_virtual_objects() {
        let mut types = TypeRegistry::new();
        let node = types.add_class("Node", None);
        types.add_field(node, "next", ValueKind::Object);

        let mut builder = GraphBuilder::new(&[]);
        let frame = builder.frame_state(12, &[]);
        builder.deopt(frame);
        let mut graph = builder.finish();

        // A self-referencing virtual object held in a lock.
        let vo = graph.virtual_object(0, node);
        let mapping = graph.add_node(
            Operator::Virtual(VirtualOp::VirtualObjectState { locks: 1 }),
            crate::ir::node::InputList::two(vo, vo),
        );
        graph.add_input(frame, vo);
        graph.add_input(frame, mapping);
        if let Operator::Virtual(VirtualOp::FrameState { bci, .. }) = graph.op(frame) {
            graph.node_mut(frame).op =
                Operator::Virtual(VirtualOp::FrameState { bci, locals: 1 });
        }

        let run = Interpreter::new(&graph, &types).run(&[]).unwrap();
        assert_eq!(
            run.outcome,
            Outcome::Deoptimized {
                bci: 12,
                locals: vec![Rendered::Object {
                    ty: node,
                    slots: vec![Rendered::Back(0)],
                    locks: 1,
                }],
            }
        );
    }
}
