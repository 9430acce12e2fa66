//! Dead Code Elimination (DCE) optimization pass.
//!
//! A node is live if:
//!
//! 1. It is a fixed node reachable along control from Start
//! 2. It is an input or the snapshot of a live node
//!
//! # Algorithm
//!
//! 1. Mark the fixed nodes of every reachable block as live
//! 2. Propagate liveness backwards through inputs and snapshot edges
//! 3. Kill every node that is not live, then remove it from the arena
//!
//! Killing first drops all edges between dead nodes, so removal never sees
//! a dead node that is still used.

use super::OptimizationPass;
use crate::error::PeaResult;
use crate::ir::arena::BitSet;
use crate::ir::cfg::Cfg;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::types::TypeRegistry;

// =============================================================================
// DCE Pass
// =============================================================================

/// Dead Code Elimination pass.
pub struct Dce {
    /// Number of nodes removed.
    removed: usize,
}

impl Dce {
    /// Create a new DCE pass.
    pub fn new() -> Self {
        Dce { removed: 0 }
    }

    /// Get the number of removed nodes.
    pub fn removed(&self) -> usize {
        self.removed
    }

    /// Remove everything unreachable from the control flow of `graph`.
    pub fn sweep(&mut self, graph: &mut Graph) -> bool {
        self.removed = 0;

        // Phase 1: Fixed nodes of reachable blocks are live
        let cfg = Cfg::build(graph);
        let mut live = BitSet::with_capacity(graph.len());
        let mut worklist: Vec<NodeId> = Vec::new();
        live.insert(graph.start.as_usize());
        worklist.push(graph.start);
        for (_, block) in cfg.iter() {
            for &fixed in &block.fixed {
                if live.insert(fixed.as_usize()) {
                    worklist.push(fixed);
                }
            }
        }

        // Phase 2: Propagate liveness backwards through inputs
        while let Some(id) = worklist.pop() {
            let node = graph.node(id);
            for input in node.inputs.iter().chain(node.state_after) {
                if input.is_valid() && live.insert(input.as_usize()) {
                    worklist.push(input);
                }
            }
        }

        // Phase 3: Collect dead nodes
        let dead_nodes: Vec<NodeId> = graph
            .iter()
            .filter(|(id, _)| !live.contains(id.as_usize()))
            .map(|(id, _)| id)
            .collect();

        // Phase 4: Kill, then remove
        for &id in &dead_nodes {
            graph.kill(id);
        }
        for &id in &dead_nodes {
            graph.remove(id);
        }
        self.removed = dead_nodes.len();
        self.removed > 0
    }
}

impl Default for Dce {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationPass for Dce {
    fn name(&self) -> &'static str {
        "DCE"
    }

    fn run(&mut self, graph: &mut Graph, _types: &TypeRegistry) -> PeaResult<bool> {
        Ok(self.sweep(graph))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder};
    use crate::ir::types::ValueKind;

    #[test]
    fn test_dce_removes_unused() {
        let mut builder = GraphBuilder::new(&[ValueKind::Int, ValueKind::Int]);
        let p0 = builder.parameter(0);
        let p1 = builder.parameter(1);

        // Used computation
        let sum = builder.int_add(p0, p1);
        builder.return_value(Some(sum));

        // Unused computation (should be removed)
        let unused = builder.int_sub(p0, p1);

        let mut graph = builder.finish();
        let mut dce = Dce::new();
        assert!(dce.sweep(&mut graph));
        assert_eq!(dce.removed(), 1);
        assert!(graph.get(unused).is_none());
        assert!(graph.get(sum).is_some());
        assert!(graph.verify().is_ok());
    }

    #[test]
    fn test_dce_preserves_used() {
        let mut builder = GraphBuilder::new(&[ValueKind::Int, ValueKind::Int]);
        let p0 = builder.parameter(0);
        let p1 = builder.parameter(1);
        let sum = builder.int_add(p0, p1);
        let product = builder.int_mul(sum, p1);
        builder.return_value(Some(product));

        let mut graph = builder.finish();
        let mut dce = Dce::new();
        assert!(!dce.sweep(&mut graph));
        assert_eq!(dce.removed(), 0);
    }

    #[test]
    fn test_dce_removes_killed_chains() {
        let mut builder = GraphBuilder::new(&[ValueKind::Int]);
        let p0 = builder.parameter(0);
        let one = builder.const_int(1);
        let a = builder.int_add(p0, one);
        let b = builder.int_add(a, one);
        let ret = builder.return_value(Some(b));

        let mut graph = builder.finish();
        graph.replace_input(ret, 1, p0);
        graph.kill(b);

        let mut dce = Dce::new();
        assert!(dce.sweep(&mut graph));
        assert!(graph.get(a).is_none());
        assert!(graph.get(b).is_none());
        assert!(graph.get(one).is_none());
        assert!(graph.verify().is_ok());
    }
}
