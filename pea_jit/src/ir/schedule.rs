//! Block scheduling of floating nodes.
//!
//! Fixed nodes keep their control order. Every floating node reachable from
//! a fixed node, a phi or a snapshot is placed in the deepest dominator-tree
//! block among the blocks of its inputs (earliest legal placement) and
//! ordered after its inputs, before the first fixed node of that block that
//! uses it. Floating nodes nothing in the block consumes are placed right
//! before the block's terminator.
//!
//! Phis, snapshot states and virtual objects are never scheduled.

use rustc_hash::{FxHashMap, FxHashSet};

use super::arena::SecondaryMap;
use super::cfg::{BasicBlock, BlockId, Cfg, DominatorTree};
use super::graph::Graph;
use super::node::NodeId;

/// Per-block execution order of a graph.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// Scheduled nodes of each block, begin first and terminator last.
    blocks: SecondaryMap<BasicBlock, Vec<NodeId>>,

    /// Block of every scheduled node.
    node_to_block: FxHashMap<NodeId, BlockId>,
}

impl Schedule {
    /// Schedule all nodes reachable from the control flow of `cfg`.
    pub fn compute(graph: &Graph, cfg: &Cfg) -> Self {
        let dom = DominatorTree::build(cfg);
        let mut schedule = Schedule {
            blocks: SecondaryMap::with_capacity(cfg.len()),
            node_to_block: FxHashMap::default(),
        };

        for (id, block) in cfg.iter() {
            for &node in &block.fixed {
                schedule.node_to_block.insert(node, id);
            }
        }

        let roots = Self::collect_roots(graph, cfg);
        let mut floating: SecondaryMap<BasicBlock, Vec<NodeId>> = SecondaryMap::new();
        for root in roots {
            schedule.place(graph, cfg, &dom, root, &mut floating);
        }

        for (id, block) in cfg.iter() {
            let mut pending = floating.get(id).cloned().unwrap_or_default();
            pending.sort();
            let mut emitted = FxHashSet::default();
            let mut order = Vec::with_capacity(block.fixed.len() + pending.len());
            let last = block.fixed.len() - 1;
            for (index, &fixed) in block.fixed.iter().enumerate() {
                if index == last {
                    for &node in &pending {
                        schedule.emit(graph, id, node, &mut emitted, &mut order);
                    }
                }
                let inputs: Vec<NodeId> = graph
                    .node(fixed)
                    .inputs
                    .iter()
                    .chain(graph.node(fixed).state_after)
                    .collect();
                for input in inputs {
                    schedule.emit(graph, id, input, &mut emitted, &mut order);
                }
                order.push(fixed);
            }
            schedule.blocks.set(id, order);
        }
        schedule
    }

    /// Scheduled nodes of a block in execution order.
    pub fn nodes(&self, block: BlockId) -> &[NodeId] {
        self.blocks.get(block).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Block a node is scheduled in.
    pub fn block_of(&self, node: NodeId) -> Option<BlockId> {
        self.node_to_block.get(&node).copied()
    }

    /// Total number of scheduled nodes.
    pub fn len(&self) -> usize {
        self.node_to_block.len()
    }

    /// Check if nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.node_to_block.is_empty()
    }

    /// Values referenced by fixed nodes, by the phis of merge blocks and by
    /// the snapshots hanging off fixed nodes.
    fn collect_roots(graph: &Graph, cfg: &Cfg) -> Vec<NodeId> {
        let mut roots = Vec::new();
        let mut seen_states = FxHashSet::default();
        let mut states = Vec::new();
        for (_, block) in cfg.iter() {
            for &fixed in &block.fixed {
                let node = graph.node(fixed);
                roots.extend(node.inputs.iter());
                states.extend(node.state_after);
            }
            for phi in graph.phis(block.begin) {
                roots.extend(graph.node(phi).inputs.iter().skip(1));
            }
        }
        while let Some(state) = states.pop() {
            if !seen_states.insert(state) {
                continue;
            }
            for input in graph.node(state).inputs.iter() {
                if graph.op(input).is_virtual_state() {
                    states.push(input);
                } else {
                    roots.push(input);
                }
            }
        }
        roots
    }

    /// Place a floating node and all its floating inputs. Returns the block
    /// a node contributes to its users' placement.
    fn place(
        &mut self,
        graph: &Graph,
        cfg: &Cfg,
        dom: &DominatorTree,
        root: NodeId,
        floating: &mut SecondaryMap<BasicBlock, Vec<NodeId>>,
    ) -> Option<BlockId> {
        let mut stack = vec![(root, false)];
        while let Some((node, expanded)) = stack.pop() {
            if !node.is_valid() || self.node_to_block.contains_key(&node) {
                continue;
            }
            let op = graph.op(node);
            if op.is_fixed() || op.is_unscheduled() {
                continue;
            }
            let inputs = graph.node(node).inputs.to_vec();
            if !expanded {
                stack.push((node, true));
                for input in inputs {
                    stack.push((input, false));
                }
                continue;
            }
            let mut block = cfg.entry;
            for input in inputs {
                if let Some(candidate) = self.anchor_block(graph, cfg, input) {
                    if dom.depth(candidate) > dom.depth(block) {
                        block = candidate;
                    }
                }
            }
            self.node_to_block.insert(node, block);
            floating.entry(block).push(node);
        }
        self.anchor_block(graph, cfg, root)
    }

    /// Block that a value pins its users below.
    fn anchor_block(&self, graph: &Graph, cfg: &Cfg, value: NodeId) -> Option<BlockId> {
        if !value.is_valid() {
            return None;
        }
        if graph.op(value).is_phi() {
            return graph.input(value, 0).and_then(|merge| cfg.block_of(merge));
        }
        self.node_to_block.get(&value).copied()
    }

    /// Append `root` and its not yet emitted floating inputs of `block` in
    /// dependency order.
    fn emit(
        &self,
        graph: &Graph,
        block: BlockId,
        root: NodeId,
        emitted: &mut FxHashSet<NodeId>,
        order: &mut Vec<NodeId>,
    ) {
        let mut stack = vec![(root, false)];
        while let Some((node, expanded)) = stack.pop() {
            if !node.is_valid()
                || emitted.contains(&node)
                || self.block_of(node) != Some(block)
                || graph.op(node).is_fixed()
            {
                continue;
            }
            if expanded {
                if emitted.insert(node) {
                    order.push(node);
                }
                continue;
            }
            stack.push((node, true));
            for input in graph.node(node).inputs.iter() {
                stack.push((input, false));
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder, ObjectBuilder};
    use crate::ir::types::{TypeRegistry, ValueKind};

    fn position(schedule: &Schedule, block: BlockId, node: NodeId) -> usize {
        schedule
            .nodes(block)
            .iter()
            .position(|&n| n == node)
            .expect("node is scheduled in block")
    }

    #[test]
    fn test_floating_nodes_follow_inputs() {
        let mut types = TypeRegistry::new();
        let cell = types.add_class("Cell", None);
        let value = types.add_field(cell, "value", ValueKind::Int);

        let mut b = GraphBuilder::new(&[ValueKind::Int]);
        let p = b.parameter(0);
        let obj = b.new_instance(cell);
        let load = b.load_field(obj, value, ValueKind::Int);
        let sum = b.int_add(load, p);
        let ret = b.return_value(Some(sum));
        let g = b.finish();

        let cfg = Cfg::build(&g);
        let schedule = Schedule::compute(&g, &cfg);
        let entry = cfg.entry;
        assert!(position(&schedule, entry, load) < position(&schedule, entry, sum));
        assert!(position(&schedule, entry, sum) < position(&schedule, entry, ret));
        assert!(position(&schedule, entry, p) < position(&schedule, entry, sum));
        assert_eq!(schedule.nodes(entry)[0], g.start);
        assert_eq!(*schedule.nodes(entry).last().unwrap(), ret);
    }

    #[test]
    fn test_loop_values_are_placed_in_header() {
        let mut b = GraphBuilder::new(&[ValueKind::Int]);
        let n = b.parameter(0);
        let zero = b.const_int(0);
        let header = b.loop_begin();
        let i = b.loop_phi(zero, ValueKind::Int);
        let cond = b.int_lt(i, n);
        let (body, exit) = b.branch(cond);
        b.begin(body);
        let one = b.const_int(1);
        let next = b.int_add(i, one);
        b.set_loop_phi_back(i, next);
        b.loop_end(header);
        b.begin(exit);
        b.loop_exit(header);
        b.return_value(Some(i));
        let g = b.finish();

        let cfg = Cfg::build(&g);
        let schedule = Schedule::compute(&g, &cfg);
        let header_block = cfg.block_of(header).unwrap();
        let body_block = cfg.block_of(body).unwrap();
        assert_eq!(schedule.block_of(cond), Some(header_block));
        assert_eq!(schedule.block_of(next), Some(header_block));
        assert_eq!(schedule.block_of(zero), Some(cfg.entry));
        assert!(schedule.block_of(i).is_none());
        assert!(!schedule.nodes(body_block).contains(&next));
    }
}
