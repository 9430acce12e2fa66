use super::GraphBuilder;
use crate::ir::node::{InputList, NodeId};
use crate::ir::operators::{ArithOp, CmpOp, Operator};

/// Builder trait for constants, arithmetic and comparisons.
pub trait ArithmeticBuilder {
    // Constants
    fn const_int(&mut self, value: i64) -> NodeId;
    fn const_bool(&mut self, value: bool) -> NodeId;
    fn const_null(&mut self) -> NodeId;

    // Integer Arithmetic
    fn int_op(&mut self, op: ArithOp, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn int_add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn int_sub(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn int_mul(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;

    // Comparisons
    fn int_cmp(&mut self, op: CmpOp, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn int_lt(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn int_eq(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
}

impl ArithmeticBuilder for GraphBuilder {
    fn const_int(&mut self, value: i64) -> NodeId {
        self.graph.const_int(value)
    }

    fn const_bool(&mut self, value: bool) -> NodeId {
        self.graph.const_bool(value)
    }

    fn const_null(&mut self) -> NodeId {
        self.graph.const_null()
    }

    fn int_op(&mut self, op: ArithOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.graph
            .add_node(Operator::IntOp(op), InputList::two(lhs, rhs))
    }

    fn int_add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.int_op(ArithOp::Add, lhs, rhs)
    }

    fn int_sub(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.int_op(ArithOp::Sub, lhs, rhs)
    }

    fn int_mul(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.int_op(ArithOp::Mul, lhs, rhs)
    }

    fn int_cmp(&mut self, op: CmpOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.graph
            .add_node(Operator::IntCmp(op), InputList::two(lhs, rhs))
    }

    fn int_lt(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.int_cmp(CmpOp::Lt, lhs, rhs)
    }

    fn int_eq(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.int_cmp(CmpOp::Eq, lhs, rhs)
    }
}
