use super::GraphBuilder;
use crate::ir::node::{InputList, NodeId};
use crate::ir::operators::{MemoryOp, MonitorOp, Operator};
use crate::ir::types::{FieldId, TypeId, ValueKind};

/// Builder trait for allocations, heap accesses and object tests.
pub trait ObjectBuilder {
    // Allocation
    fn new_instance(&mut self, ty: TypeId) -> NodeId;
    fn new_array(&mut self, ty: TypeId, length: NodeId) -> NodeId;

    // Fields and elements
    fn load_field(&mut self, obj: NodeId, field: FieldId, kind: ValueKind) -> NodeId;
    fn store_field(&mut self, obj: NodeId, field: FieldId, value: NodeId) -> NodeId;
    fn load_indexed(&mut self, array: NodeId, index: NodeId, kind: ValueKind) -> NodeId;
    fn store_indexed(&mut self, array: NodeId, index: NodeId, value: NodeId) -> NodeId;
    fn array_length(&mut self, array: NodeId) -> NodeId;
    fn read_hub(&mut self, obj: NodeId) -> NodeId;

    // Raw accesses
    fn unsafe_load(&mut self, obj: NodeId, offset: NodeId, kind: ValueKind) -> NodeId;
    fn unsafe_store(&mut self, obj: NodeId, offset: NodeId, value: NodeId) -> NodeId;
    fn compare_and_swap(
        &mut self,
        obj: NodeId,
        offset: NodeId,
        expected: NodeId,
        new: NodeId,
    ) -> NodeId;

    // Type tests
    fn check_cast(&mut self, obj: NodeId, ty: TypeId) -> NodeId;
    fn instance_of(&mut self, obj: NodeId, ty: TypeId) -> NodeId;
    fn is_null(&mut self, obj: NodeId) -> NodeId;
    fn object_equals(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn pi(&mut self, obj: NodeId) -> NodeId;

    // Effects
    fn monitor_enter(&mut self, obj: NodeId) -> NodeId;
    fn monitor_exit(&mut self, obj: NodeId) -> NodeId;
    fn register_finalizer(&mut self, obj: NodeId) -> NodeId;
    fn call(&mut self, target: u32, args: &[NodeId], kind: ValueKind) -> NodeId;
}

impl ObjectBuilder for GraphBuilder {
    fn new_instance(&mut self, ty: TypeId) -> NodeId {
        self.append(
            Operator::Memory(MemoryOp::NewInstance(ty)),
            &[],
            ValueKind::Object,
        )
    }

    fn new_array(&mut self, ty: TypeId, length: NodeId) -> NodeId {
        self.append(
            Operator::Memory(MemoryOp::NewArray(ty)),
            &[length],
            ValueKind::Object,
        )
    }

    fn load_field(&mut self, obj: NodeId, field: FieldId, kind: ValueKind) -> NodeId {
        self.append(Operator::Memory(MemoryOp::LoadField(field)), &[obj], kind)
    }

    fn store_field(&mut self, obj: NodeId, field: FieldId, value: NodeId) -> NodeId {
        self.append(
            Operator::Memory(MemoryOp::StoreField(field)),
            &[obj, value],
            ValueKind::Void,
        )
    }

    fn load_indexed(&mut self, array: NodeId, index: NodeId, kind: ValueKind) -> NodeId {
        self.append(Operator::Memory(MemoryOp::LoadIndexed), &[array, index], kind)
    }

    fn store_indexed(&mut self, array: NodeId, index: NodeId, value: NodeId) -> NodeId {
        self.append(
            Operator::Memory(MemoryOp::StoreIndexed),
            &[array, index, value],
            ValueKind::Void,
        )
    }

    fn array_length(&mut self, array: NodeId) -> NodeId {
        self.append(Operator::Memory(MemoryOp::ArrayLength), &[array], ValueKind::Int)
    }

    fn read_hub(&mut self, obj: NodeId) -> NodeId {
        self.append(Operator::Memory(MemoryOp::ReadHub), &[obj], ValueKind::Hub)
    }

    fn unsafe_load(&mut self, obj: NodeId, offset: NodeId, kind: ValueKind) -> NodeId {
        self.append(Operator::Memory(MemoryOp::UnsafeLoad), &[obj, offset], kind)
    }

    fn unsafe_store(&mut self, obj: NodeId, offset: NodeId, value: NodeId) -> NodeId {
        self.append(
            Operator::Memory(MemoryOp::UnsafeStore),
            &[obj, offset, value],
            ValueKind::Void,
        )
    }

    fn compare_and_swap(
        &mut self,
        obj: NodeId,
        offset: NodeId,
        expected: NodeId,
        new: NodeId,
    ) -> NodeId {
        self.append(
            Operator::Memory(MemoryOp::CompareAndSwap),
            &[obj, offset, expected, new],
            ValueKind::Bool,
        )
    }

    fn check_cast(&mut self, obj: NodeId, ty: TypeId) -> NodeId {
        self.append(Operator::CheckCast(ty), &[obj], ValueKind::Object)
    }

    fn instance_of(&mut self, obj: NodeId, ty: TypeId) -> NodeId {
        self.graph
            .add_node(Operator::InstanceOf(ty), InputList::one(obj))
    }

    fn is_null(&mut self, obj: NodeId) -> NodeId {
        self.graph.add_node(Operator::IsNull, InputList::one(obj))
    }

    fn object_equals(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.graph
            .add_node(Operator::ObjectEquals, InputList::two(lhs, rhs))
    }

    fn pi(&mut self, obj: NodeId) -> NodeId {
        self.graph.add_node(Operator::Pi, InputList::one(obj))
    }

    fn monitor_enter(&mut self, obj: NodeId) -> NodeId {
        self.append(Operator::Monitor(MonitorOp::Enter), &[obj], ValueKind::Void)
    }

    fn monitor_exit(&mut self, obj: NodeId) -> NodeId {
        self.append(Operator::Monitor(MonitorOp::Exit), &[obj], ValueKind::Void)
    }

    fn register_finalizer(&mut self, obj: NodeId) -> NodeId {
        self.append(Operator::RegisterFinalizer, &[obj], ValueKind::Void)
    }

    fn call(&mut self, target: u32, args: &[NodeId], kind: ValueKind) -> NodeId {
        self.append(Operator::Call(target), args, kind)
    }
}
