//! IR Graph Builder module.
//!
//! Structured construction of well-formed graphs: the builder tracks the
//! current control tail and the innermost merge so that callers only name
//! values, never control edges.

use crate::ir::graph::Graph;
use crate::ir::node::{InputList, NodeId};
use crate::ir::operators::Operator;
use crate::ir::types::ValueKind;

pub mod arithmetic;
pub mod control;
pub mod objects;

#[cfg(test)]
mod tests;

pub use arithmetic::ArithmeticBuilder;
pub use control::ControlBuilder;
pub use objects::ObjectBuilder;

// =============================================================================
// Graph Builder
// =============================================================================

/// Builder for constructing IR graphs.
pub struct GraphBuilder {
    /// The graph being built.
    pub(crate) graph: Graph,

    /// Current control tail, invalid after a block end.
    pub(crate) control: NodeId,

    /// Region or loop that `phi` attaches to.
    pub(crate) merge: NodeId,

    /// Loops opened by `loop_begin`, innermost last.
    pub(crate) loops: Vec<NodeId>,

    /// Parameter nodes.
    parameters: Vec<NodeId>,
}

impl GraphBuilder {
    /// Create a new graph builder with one parameter per kind.
    pub fn new(parameter_kinds: &[ValueKind]) -> Self {
        let mut graph = Graph::new();
        let start = graph.start;

        let parameters = parameter_kinds
            .iter()
            .enumerate()
            .map(|(i, &kind)| {
                graph.add_node_with_kind(Operator::Parameter(i as u16), InputList::empty(), kind)
            })
            .collect();

        GraphBuilder {
            graph,
            control: start,
            merge: NodeId::INVALID,
            loops: Vec::new(),
            parameters,
        }
    }

    /// Get the constructed graph.
    pub fn finish(self) -> Graph {
        debug_assert!(
            !self.control.is_valid(),
            "graph finished with an open block at {:?}",
            self.control
        );
        self.graph
    }

    /// Get a reference to the graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Get a mutable reference to the graph.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    // =========================================================================
    // State Management
    // =========================================================================

    /// Get a parameter node.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn parameter(&self, index: usize) -> NodeId {
        self.parameters[index]
    }

    /// Get the current control node.
    pub fn control(&self) -> NodeId {
        self.control
    }

    /// Append a fixed node with inputs `[control, rest...]` and make it the
    /// new control tail.
    pub(crate) fn append(&mut self, op: Operator, rest: &[NodeId], kind: ValueKind) -> NodeId {
        debug_assert!(self.control.is_valid(), "no open block for {:?}", op);
        let mut inputs = InputList::one(self.control);
        for &input in rest {
            inputs.push(input);
        }
        let node = self.graph.add_node_with_kind(op, inputs, kind);
        self.control = node;
        node
    }

    /// Append a block end and close the current block.
    pub(crate) fn terminate(&mut self, op: Operator, rest: &[NodeId]) -> NodeId {
        let node = self.append(op, rest, ValueKind::Control);
        self.control = NodeId::INVALID;
        node
    }

    /// Attach a deoptimization snapshot to a node.
    pub fn with_state(&mut self, node: NodeId, state: NodeId) -> NodeId {
        self.graph.set_state_after(node, Some(state));
        node
    }

    /// Kind of an existing node.
    pub(crate) fn kind_of(&self, node: NodeId) -> ValueKind {
        self.graph.node(node).kind
    }
}
