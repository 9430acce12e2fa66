//! Consumers of tracked objects, by kind.

use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{ControlOp, MemoryOp, MonitorOp, Operator, VirtualOp};
use crate::ir::types::{FieldId, TypeId};

/// How a node consumes its object operands.
///
/// Operand positions follow the input conventions of the operators: fixed
/// nodes carry control in input 0, so their object operand is input 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    /// Re-typed or proxied view of `value` (input 0).
    Passthrough { value: NodeId },
    /// Cast that throws on mismatch.
    CheckCast { object: NodeId, ty: TypeId },
    /// Type test.
    InstanceOf { object: NodeId, ty: TypeId },
    /// Null test.
    IsNull { object: NodeId },
    /// Monitor enter or exit.
    Monitor { object: NodeId, enter: bool },
    /// Field read.
    LoadField { object: NodeId, field: FieldId },
    /// Field write.
    StoreField {
        object: NodeId,
        field: FieldId,
        value: NodeId,
    },
    /// Element read.
    LoadIndexed { array: NodeId, index: NodeId },
    /// Element write.
    StoreIndexed {
        array: NodeId,
        index: NodeId,
        value: NodeId,
    },
    /// Slot patch left by an earlier materialization.
    CyclicStore {
        object: NodeId,
        slot: u32,
        value: NodeId,
    },
    /// Array length read.
    ArrayLength { array: NodeId },
    /// Type hub read.
    ReadHub { object: NodeId },
    /// Reference comparison.
    ObjectEquals { x: NodeId, y: NodeId },
    /// Every object operand escapes: returns, calls, finalizer
    /// registration, raw memory access.
    Escape,
    /// Not a recognized consumer. Every object operand escapes.
    Opaque,
}

impl Usage {
    /// Classify `node` as a consumer.
    pub fn classify(graph: &Graph, node: NodeId) -> Usage {
        let input = |index: usize| graph.input(node, index).unwrap_or(NodeId::INVALID);
        match graph.op(node) {
            Operator::Pi | Operator::ValueProxy => Usage::Passthrough { value: input(0) },
            Operator::CheckCast(ty) => Usage::CheckCast {
                object: input(1),
                ty,
            },
            Operator::InstanceOf(ty) => Usage::InstanceOf {
                object: input(0),
                ty,
            },
            Operator::IsNull => Usage::IsNull { object: input(0) },
            Operator::Monitor(op) => Usage::Monitor {
                object: input(1),
                enter: op == MonitorOp::Enter,
            },
            Operator::Memory(MemoryOp::LoadField(field)) => Usage::LoadField {
                object: input(1),
                field,
            },
            Operator::Memory(MemoryOp::StoreField(field)) => Usage::StoreField {
                object: input(1),
                field,
                value: input(2),
            },
            Operator::Memory(MemoryOp::LoadIndexed) => Usage::LoadIndexed {
                array: input(1),
                index: input(2),
            },
            Operator::Memory(MemoryOp::StoreIndexed) => Usage::StoreIndexed {
                array: input(1),
                index: input(2),
                value: input(3),
            },
            Operator::Memory(MemoryOp::ArrayLength) => Usage::ArrayLength { array: input(1) },
            Operator::Memory(MemoryOp::ReadHub) => Usage::ReadHub { object: input(1) },
            Operator::Memory(
                MemoryOp::UnsafeLoad | MemoryOp::UnsafeStore | MemoryOp::CompareAndSwap,
            ) => Usage::Escape,
            Operator::Virtual(VirtualOp::CyclicStore(slot)) => Usage::CyclicStore {
                object: input(1),
                slot,
                value: input(2),
            },
            Operator::ObjectEquals => Usage::ObjectEquals {
                x: input(0),
                y: input(1),
            },
            Operator::RegisterFinalizer | Operator::Call(_) => Usage::Escape,
            Operator::Control(ControlOp::Return) => Usage::Escape,
            _ => Usage::Opaque,
        }
    }
}
