//! Control Flow Graph (CFG) analysis.
//!
//! Blocks are recovered from the control chain of the graph:
//! - a block starts at a block-begin node (`Start`, `Region`, `Loop`,
//!   `IfTrue`, `IfFalse`),
//! - follows control successors through the fixed nodes of its body,
//! - and ends at a terminator (`If`, `End`, `LoopEnd`, `Return`, `Deopt`).
//!
//! Predecessor order is significant: for a `Region` it is the order of the
//! region's end inputs (the order of its phi values); for a `Loop` the
//! forward predecessor comes first, followed by the back edges in loop-end
//! order.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::arena::{BitSet, Id, SecondaryMap};
use super::graph::Graph;
use super::node::NodeId;
use super::operators::{ControlOp, Operator};

use std::collections::VecDeque;

// =============================================================================
// Basic Block
// =============================================================================

/// A basic block in the CFG.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// The node that begins this block.
    pub begin: NodeId,

    /// The terminator node.
    pub end: NodeId,

    /// Fixed nodes from `begin` to `end`, inclusive, in control order.
    pub fixed: Vec<NodeId>,

    /// Predecessor blocks, in merge input order.
    pub predecessors: SmallVec<[BlockId; 2]>,

    /// Successor blocks. For an `If`: the true block, then the false block.
    pub successors: SmallVec<[BlockId; 2]>,
}

/// Block identifier.
pub type BlockId = Id<BasicBlock>;

// =============================================================================
// CFG
// =============================================================================

/// Control Flow Graph extracted from the control chain.
#[derive(Debug, Clone)]
pub struct Cfg {
    /// All basic blocks.
    blocks: Vec<BasicBlock>,

    /// Mapping from fixed nodes to their block.
    node_to_block: FxHashMap<NodeId, BlockId>,

    /// Entry block (begins with Start).
    pub entry: BlockId,

    /// Reverse postorder traversal.
    pub rpo: Vec<BlockId>,

    /// Postorder numbers for dominance computation.
    pub postorder: SecondaryMap<BasicBlock, u32>,
}

impl Cfg {
    /// Build the CFG of all blocks reachable from Start.
    pub fn build(graph: &Graph) -> Self {
        let mut cfg = Cfg {
            blocks: Vec::new(),
            node_to_block: FxHashMap::default(),
            entry: BlockId::INVALID,
            rpo: Vec::new(),
            postorder: SecondaryMap::new(),
        };

        // Discover blocks by walking from each begin to its terminator.
        let mut worklist = vec![graph.start];
        while let Some(begin) = worklist.pop() {
            if cfg.node_to_block.contains_key(&begin) {
                continue;
            }
            let block = cfg.add_block(graph, begin);
            let end = cfg.blocks[block.as_usize()].end;
            worklist.extend(Self::successor_begins(graph, end).into_iter().rev());
        }
        cfg.entry = cfg.node_to_block[&graph.start];

        // Edges, with predecessors ordered by merge inputs.
        for index in 0..cfg.blocks.len() {
            let end = cfg.blocks[index].end;
            let successors: SmallVec<[BlockId; 2]> = Self::successor_begins(graph, end)
                .into_iter()
                .filter_map(|begin| cfg.node_to_block.get(&begin).copied())
                .collect();
            cfg.blocks[index].successors = successors;

            let begin = cfg.blocks[index].begin;
            let predecessors: SmallVec<[BlockId; 2]> = match graph.op(begin) {
                Operator::Control(ControlOp::Region) | Operator::Control(ControlOp::Loop) => graph
                    .node(begin)
                    .inputs
                    .iter()
                    .filter_map(|end| cfg.node_to_block.get(&end).copied())
                    .collect(),
                Operator::Control(ControlOp::IfTrue) | Operator::Control(ControlOp::IfFalse) => graph
                    .input(begin, 0)
                    .and_then(|branch| cfg.node_to_block.get(&branch).copied())
                    .into_iter()
                    .collect(),
                _ => SmallVec::new(),
            };
            cfg.blocks[index].predecessors = predecessors;
        }

        cfg.compute_rpo();
        cfg
    }

    /// Begin nodes of the blocks a terminator transfers control to.
    fn successor_begins(graph: &Graph, end: NodeId) -> SmallVec<[NodeId; 2]> {
        match graph.op(end) {
            Operator::Control(ControlOp::If) => {
                let mut on_true = None;
                let mut on_false = None;
                for user in graph.users(end) {
                    match graph.op(user) {
                        Operator::Control(ControlOp::IfTrue) => on_true = Some(user),
                        Operator::Control(ControlOp::IfFalse) => on_false = Some(user),
                        _ => {}
                    }
                }
                on_true.into_iter().chain(on_false).collect()
            }
            Operator::Control(ControlOp::End) | Operator::Control(ControlOp::LoopEnd) => graph
                .users(end)
                .into_iter()
                .filter(|&user| {
                    matches!(
                        graph.op(user),
                        Operator::Control(ControlOp::Region) | Operator::Control(ControlOp::Loop)
                    )
                })
                .collect(),
            _ => SmallVec::new(),
        }
    }

    /// Add a block by walking control successors from `begin`.
    fn add_block(&mut self, graph: &Graph, begin: NodeId) -> BlockId {
        let id = BlockId::new(self.blocks.len() as u32);
        let mut fixed = vec![begin];
        let mut current = begin;
        while let Some(next) = graph.control_successor(current) {
            fixed.push(next);
            current = next;
        }
        for &node in &fixed {
            self.node_to_block.insert(node, id);
        }
        self.blocks.push(BasicBlock {
            begin,
            end: current,
            fixed,
            predecessors: SmallVec::new(),
            successors: SmallVec::new(),
        });
        id
    }

    /// Compute reverse postorder traversal.
    fn compute_rpo(&mut self) {
        let mut visited = BitSet::with_capacity(self.blocks.len());
        let mut postorder = Vec::with_capacity(self.blocks.len());

        // Iterative DFS: (block, next successor index).
        let mut stack = vec![(self.entry, 0usize)];
        visited.insert(self.entry.as_usize());
        while let Some(&mut (block, ref mut next)) = stack.last_mut() {
            let successors = &self.blocks[block.as_usize()].successors;
            if *next < successors.len() {
                let succ = successors[*next];
                *next += 1;
                if visited.insert(succ.as_usize()) {
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(block);
                stack.pop();
            }
        }

        for (i, &block) in postorder.iter().enumerate() {
            self.postorder.set(block, i as u32);
        }
        postorder.reverse();
        self.rpo = postorder;
    }

    /// Get a block by ID.
    #[inline]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.as_usize()]
    }

    /// Block containing a fixed node.
    pub fn block_of(&self, node: NodeId) -> Option<BlockId> {
        self.node_to_block.get(&node).copied()
    }

    /// Check whether a block begins with a `Loop`.
    pub fn is_loop_header(&self, graph: &Graph, block: BlockId) -> bool {
        graph.op(self.block(block).begin) == Operator::Control(ControlOp::Loop)
    }

    /// Check whether a block begins with a `Region`.
    pub fn is_merge(&self, graph: &Graph, block: BlockId) -> bool {
        graph.op(self.block(block).begin) == Operator::Control(ControlOp::Region)
    }

    /// Get the number of blocks.
    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Check if empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Iterate over blocks in reverse postorder.
    pub fn iter_rpo(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> {
        self.rpo
            .iter()
            .copied()
            .map(move |id| (id, &self.blocks[id.as_usize()]))
    }

    /// Iterate over all blocks.
    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (BlockId::new(i as u32), b))
    }
}

// =============================================================================
// Dominator Tree
// =============================================================================

/// Dominator tree for the CFG.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// Immediate dominator for each block (the entry maps to itself).
    idom: SecondaryMap<BasicBlock, BlockId>,

    /// Dominator tree depth.
    depth: SecondaryMap<BasicBlock, u32>,
}

impl DominatorTree {
    /// Build the dominator tree (Cooper-Harvey-Kennedy).
    pub fn build(cfg: &Cfg) -> Self {
        let n = cfg.len();
        let mut dom = DominatorTree {
            idom: SecondaryMap::with_capacity(n),
            depth: SecondaryMap::with_capacity(n),
        };
        if n == 0 {
            return dom;
        }

        for i in 0..n {
            dom.idom.set(BlockId::new(i as u32), BlockId::INVALID);
        }
        dom.idom.set(cfg.entry, cfg.entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in &cfg.rpo {
                if block == cfg.entry {
                    continue;
                }
                let mut new_idom = BlockId::INVALID;
                for &pred in &cfg.block(block).predecessors {
                    if !dom.idom[pred].is_valid() {
                        continue;
                    }
                    new_idom = if new_idom.is_valid() {
                        dom.intersect(pred, new_idom, cfg)
                    } else {
                        pred
                    };
                }
                if new_idom.is_valid() && dom.idom[block] != new_idom {
                    dom.idom.set(block, new_idom);
                    changed = true;
                }
            }
        }

        for &block in &cfg.rpo {
            let depth = match dom.idom(block) {
                Some(idom) => dom.depth[idom] + 1,
                None => 0,
            };
            dom.depth.set(block, depth);
        }
        dom
    }

    /// Intersect for dominator computation.
    fn intersect(&self, mut b1: BlockId, mut b2: BlockId, cfg: &Cfg) -> BlockId {
        let po = |b: BlockId| cfg.postorder.get(b).copied().unwrap_or(0);
        while b1 != b2 {
            while po(b1) < po(b2) {
                b1 = self.idom[b1];
            }
            while po(b2) < po(b1) {
                b2 = self.idom[b2];
            }
        }
        b1
    }

    /// Get immediate dominator.
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        let idom = self.idom.get(block).copied().unwrap_or(BlockId::INVALID);
        if idom.is_valid() && idom != block {
            Some(idom)
        } else {
            None
        }
    }

    /// Get dominator depth.
    pub fn depth(&self, block: BlockId) -> u32 {
        self.depth.get(block).copied().unwrap_or(0)
    }

    /// Check if `a` dominates `b`.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = b;
        while self.depth(current) > self.depth(a) {
            match self.idom(current) {
                Some(idom) => current = idom,
                None => return false,
            }
        }
        current == a
    }
}

// =============================================================================
// Loop Analysis
// =============================================================================

/// A natural loop in the CFG.
#[derive(Debug, Clone)]
pub struct Loop {
    /// The loop header block.
    pub header: BlockId,

    /// Back edge sources, in the order of the header's loop-end inputs.
    pub back_edges: Vec<BlockId>,

    /// All blocks in the loop body, header included.
    pub body: BitSet,

    /// Blocks outside the loop entered from inside it.
    pub exits: Vec<BlockId>,
}

/// Loop analysis results.
#[derive(Debug, Clone, Default)]
pub struct LoopAnalysis {
    /// All detected loops.
    pub loops: Vec<Loop>,

    /// Map from header block to loop index.
    pub header_to_loop: FxHashMap<BlockId, usize>,
}

impl LoopAnalysis {
    /// Compute loop analysis from the `Loop` headers of the graph.
    pub fn compute(graph: &Graph, cfg: &Cfg) -> Self {
        let mut analysis = LoopAnalysis::default();

        for &header in &cfg.rpo {
            if !cfg.is_loop_header(graph, header) {
                continue;
            }
            // Predecessor 0 is the forward entry.
            let back_edges: Vec<BlockId> = cfg.block(header).predecessors[1..].to_vec();

            let mut body = BitSet::with_capacity(cfg.len());
            body.insert(header.as_usize());
            let mut worklist: VecDeque<BlockId> = back_edges.iter().copied().collect();
            while let Some(block) = worklist.pop_front() {
                if body.insert(block.as_usize()) {
                    worklist.extend(cfg.block(block).predecessors.iter().copied());
                }
            }

            let mut exits = Vec::new();
            for index in body.iter() {
                for &succ in &cfg.block(BlockId::new(index as u32)).successors {
                    if !body.contains(succ.as_usize()) && !exits.contains(&succ) {
                        exits.push(succ);
                    }
                }
            }

            analysis.header_to_loop.insert(header, analysis.loops.len());
            analysis.loops.push(Loop {
                header,
                back_edges,
                body,
                exits,
            });
        }
        analysis
    }

    /// Get the loop with the given header.
    pub fn loop_at(&self, header: BlockId) -> Option<&Loop> {
        self.header_to_loop.get(&header).map(|&idx| &self.loops[idx])
    }

    /// Loop depth of a block (0 if not in a loop).
    pub fn loop_depth(&self, block: BlockId) -> u32 {
        self.loops
            .iter()
            .filter(|l| l.body.contains(block.as_usize()))
            .count() as u32
    }
}

// =============================================================================
// Tests
// =============================================================================
