//! IR node definitions.
//!
//! A node is an operator applied to an ordered list of inputs. Data flow and
//! control flow are both input edges:
//! - **Fixed nodes** (control, memory, monitors, calls) carry their control
//!   predecessor as input 0 and form per-block chains.
//! - **Floating nodes** (constants, arithmetic, phis, type tests) are placed
//!   only by their data inputs.
//!
//! A fixed node may also carry a deoptimization snapshot in `state_after`.
//! That edge is tracked in use lists like an ordinary input.

use smallvec::SmallVec;

use super::arena::Id;
use super::operators::Operator;
use super::types::ValueKind;

// =============================================================================
// Node ID Type Alias
// =============================================================================

/// Unique identifier for a node in the graph.
pub type NodeId = Id<Node>;

// =============================================================================
// Input List
// =============================================================================

/// Ordered inputs of a node. Up to four are stored inline.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct InputList(SmallVec<[NodeId; 4]>);

impl InputList {
    pub fn empty() -> Self {
        InputList(SmallVec::new())
    }

    pub fn one(a: NodeId) -> Self {
        let mut list = Self::empty();
        list.0.push(a);
        list
    }

    pub fn two(a: NodeId, b: NodeId) -> Self {
        InputList::from_slice(&[a, b])
    }

    pub fn from_slice(inputs: &[NodeId]) -> Self {
        InputList(SmallVec::from_slice(inputs))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.0.get(index).copied()
    }

    /// Replace input `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn set(&mut self, index: usize, value: NodeId) {
        self.0[index] = value;
    }

    pub fn push(&mut self, value: NodeId) {
        self.0.push(value);
    }

    /// Remove input `index`, shifting later inputs down.
    pub fn remove(&mut self, index: usize) -> NodeId {
        self.0.remove(index)
    }

    pub fn position(&self, value: NodeId) -> Option<usize> {
        self.0.iter().position(|&id| id == value)
    }

    pub fn contains(&self, value: NodeId) -> bool {
        self.0.contains(&value)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = NodeId> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[NodeId] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<NodeId> {
        self.0.to_vec()
    }
}

impl std::fmt::Debug for InputList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

// =============================================================================
// Node
// =============================================================================

/// A node in the IR graph.
#[derive(Clone)]
pub struct Node {
    /// The operation this node performs.
    pub op: Operator,

    /// Input nodes (dependencies).
    pub inputs: InputList,

    /// Deoptimization snapshot taken after this node executes.
    pub state_after: Option<NodeId>,

    /// Result kind.
    pub kind: ValueKind,

    /// Flags for various node properties.
    pub flags: NodeFlags,
}

impl Node {
    /// Create a new node with operator, inputs, and kind.
    pub fn new(op: Operator, inputs: InputList, kind: ValueKind) -> Self {
        Node {
            op,
            inputs,
            state_after: None,
            kind,
            flags: NodeFlags::empty(),
        }
    }

    /// Get the control input of a fixed node.
    pub fn control_input(&self) -> Option<NodeId> {
        if self.op.is_fixed() {
            self.inputs.get(0)
        } else {
            None
        }
    }

    /// Get an input.
    #[inline]
    pub fn input(&self, index: usize) -> Option<NodeId> {
        self.inputs.get(index)
    }

    /// Check if this node is a constant.
    pub fn is_constant(&self) -> bool {
        self.op.is_constant()
    }

    /// Check if this node is fixed.
    pub fn is_fixed(&self) -> bool {
        self.op.is_fixed()
    }

    /// Check if this node is a Phi or LoopPhi.
    pub fn is_phi(&self) -> bool {
        self.op.is_phi()
    }

    /// Check if this node has been marked dead.
    pub fn is_dead(&self) -> bool {
        self.flags.contains(NodeFlags::DEAD)
    }

    /// Mark this node as dead.
    pub fn mark_dead(&mut self) {
        self.flags.insert(NodeFlags::DEAD);
    }

    /// Get as integer constant if this is one.
    pub fn as_int(&self) -> Option<i64> {
        match self.op {
            Operator::ConstInt(v) => Some(v),
            _ => None,
        }
    }

    /// Get as bool constant if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self.op {
            Operator::ConstBool(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.op)?;
        if !self.inputs.is_empty() {
            write!(f, " {:?}", self.inputs)?;
        }
        if let Some(state) = self.state_after {
            write!(f, " @{:?}", state)?;
        }
        write!(f, " : {}", self.kind)?;
        if !self.flags.is_empty() {
            write!(f, " {:?}", self.flags)?;
        }
        Ok(())
    }
}

// =============================================================================
// Node Flags
// =============================================================================

bitflags::bitflags! {
    /// Flags for node properties.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        /// Node has been marked dead (will be removed).
        const DEAD = 0b0000_0001;
        /// Monitor operation on an object that was never materialized.
        const ELIMINATED = 0b0000_0010;
    }
}

impl Default for NodeFlags {
    fn default() -> Self {
        NodeFlags::empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
