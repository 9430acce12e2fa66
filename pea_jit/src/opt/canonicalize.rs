//! Value-level canonicalization.
//!
//! This pass folds what escape analysis leaves behind:
//!
//! - **Constant folding**: integer arithmetic and comparisons on constants
//! - **Reference tests**: `x == x` → `true`, null checks of constants and
//!   allocations
//! - **Redundant phis**: a phi whose inputs, ignoring itself, are all one
//!   value is that value
//! - **Proxies of constants**: the constant itself
//!
//! Control flow is never rewritten. Replaced nodes lose their users and are
//! left to [`super::dce::Dce`].

use super::OptimizationPass;
use crate::error::PeaResult;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{MemoryOp, Operator, VirtualOp};
use crate::ir::types::TypeRegistry;

/// Sweeps over the graph before giving up on reaching a fixed point.
const MAX_SWEEPS: usize = 8;

// =============================================================================
// Canonicalize Pass
// =============================================================================

/// Canonicalization pass.
pub struct Canonicalize {
    /// Number of nodes replaced.
    replaced: usize,
}

/// What a node folds to.
enum Replacement {
    /// An existing node.
    Node(NodeId),
    /// An integer constant.
    Int(i64),
    /// A boolean constant.
    Bool(bool),
}

impl Canonicalize {
    /// Create a new canonicalization pass.
    pub fn new() -> Self {
        Canonicalize { replaced: 0 }
    }

    /// Get the number of replaced nodes.
    pub fn replaced(&self) -> usize {
        self.replaced
    }

    /// Fold until nothing changes.
    pub fn canonicalize(&mut self, graph: &mut Graph) -> bool {
        self.replaced = 0;
        for _ in 0..MAX_SWEEPS {
            let replacements: Vec<(NodeId, Replacement)> = graph
                .iter()
                .filter(|(_, node)| !node.is_dead())
                .filter_map(|(id, _)| Self::try_fold(graph, id).map(|r| (id, r)))
                .collect();

            let mut changed = false;
            for (old, replacement) in replacements {
                if !graph.is_alive(old) || graph.use_count(old) == 0 {
                    continue;
                }
                let new = match replacement {
                    Replacement::Node(id) => id,
                    Replacement::Int(v) => graph.const_int(v),
                    Replacement::Bool(v) => graph.const_bool(v),
                };
                if old != new {
                    graph.replace_at_usages(old, new);
                    self.replaced += 1;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        self.replaced > 0
    }

    fn try_fold(graph: &Graph, id: NodeId) -> Option<Replacement> {
        let node = graph.node(id);
        let int_input = |i: usize| node.input(i).and_then(|n| graph.get(n)?.as_int());

        match node.op {
            Operator::IntOp(op) => Some(Replacement::Int(op.apply(int_input(0)?, int_input(1)?))),
            Operator::IntCmp(op) => {
                Some(Replacement::Bool(op.apply(int_input(0)?, int_input(1)?)))
            }
            Operator::ObjectEquals if node.input(0) == node.input(1) => {
                Some(Replacement::Bool(true))
            }
            Operator::IsNull => {
                let object = graph.op(node.input(0)?);
                match object {
                    Operator::ConstNull => Some(Replacement::Bool(true)),
                    Operator::ConstInt(_) | Operator::ConstBool(_) | Operator::ConstHub(_) => {
                        Some(Replacement::Bool(false))
                    }
                    Operator::Memory(MemoryOp::NewInstance(_) | MemoryOp::NewArray(_))
                    | Operator::Virtual(VirtualOp::MaterializeObject) => {
                        Some(Replacement::Bool(false))
                    }
                    _ => None,
                }
            }
            Operator::ValueProxy => {
                let value = node.input(0)?;
                graph
                    .node(value)
                    .is_constant()
                    .then_some(Replacement::Node(value))
            }
            Operator::Phi | Operator::LoopPhi => Self::redundant_phi(graph, id),
            _ => None,
        }
    }

    /// The single value a phi merges, ignoring references to itself.
    fn redundant_phi(graph: &Graph, id: NodeId) -> Option<Replacement> {
        let mut values = graph
            .node(id)
            .inputs
            .iter()
            .skip(1)
            .filter(|&value| value != id);
        let first = values.next()?;
        values
            .all(|value| value == first)
            .then_some(Replacement::Node(first))
    }
}

impl Default for Canonicalize {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationPass for Canonicalize {
    fn name(&self) -> &'static str {
        "Canonicalize"
    }

    fn run(&mut self, graph: &mut Graph, _types: &TypeRegistry) -> PeaResult<bool> {
        Ok(self.canonicalize(graph))
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
    fn test_constant_folding_chains() {
        let mut builder = GraphBuilder::new(&[]);
        let two = builder.const_int(2);
        let three = builder.const_int(3);
        let sum = builder.int_add(two, three);
        let product = builder.int_mul(sum, two);
        let ret = builder.return_value(Some(product));
        let mut graph = builder.finish();

        let mut pass = Canonicalize::new();
        assert!(pass.canonicalize(&mut graph));
        let folded = graph.input(ret, 1).unwrap();
        assert_eq!(graph.node(folded).as_int(), Some(10));
    }

    #[test]
    fn test_reference_tests_fold() {
        let mut builder = GraphBuilder::new(&[ValueKind::Object]);
        let p = builder.parameter(0);
        let same = builder.object_equals(p, p);
        let obj = builder.new_instance(TypeId::OBJECT);
        let null_check = builder.is_null(obj);
        let call = builder.call(0, &[same, null_check], ValueKind::Void);
        builder.return_value(None);
        let mut graph = builder.finish();

        let mut pass = Canonicalize::new();
        pass.canonicalize(&mut graph);
        assert_eq!(pass.replaced(), 2);
        let t = graph.const_bool(true);
        let f = graph.const_bool(false);
        assert_eq!(graph.input(call, 1), Some(t));
        assert_eq!(graph.input(call, 2), Some(f));
    }

    #[test]
    fn test_redundant_loop_phi_collapses() {
        let mut builder = GraphBuilder::new(&[ValueKind::Int, ValueKind::Bool]);
        let x = builder.parameter(0);
        let cond = builder.parameter(1);
        let header = builder.loop_begin();
        let phi = builder.loop_phi(x, ValueKind::Int);
        let (stay, leave) = builder.branch(cond);
        builder.begin(stay);
        builder.set_loop_phi_back(phi, phi);
        builder.loop_end(header);
        builder.begin(leave);
        let exit = builder.loop_exit(header);
        let proxy = builder.proxy(phi, exit);
        let ret = builder.return_value(Some(proxy));
        let mut graph = builder.finish();

        let mut pass = Canonicalize::new();
        assert!(pass.canonicalize(&mut graph));
        assert_eq!(graph.input(proxy, 0), Some(x));
        assert_eq!(graph.input(ret, 1), Some(proxy));
    }
}
