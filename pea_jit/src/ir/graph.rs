//! Graph structure.
//!
//! The graph provides:
//! - **Arena-based storage**: generation-checked handles, slot reuse
//! - **Use-def chains**: fast lookup of node users, including snapshot edges
//! - **Fixed-node splicing**: insert, unlink and replace nodes of the
//!   control chain
//! - **Constant deduplication**: one node per constant value
//!
//! # Design Principles
//!
//! - **Explicit kinds**: each node has a known result kind
//! - **Minimal pointers**: uses indices (NodeId) instead of Rc/Arc
//! - **Edits keep use lists exact**: every input edge and every
//!   `state_after` edge has exactly one entry in the use list of its target

use rustc_hash::FxHashMap;

use super::arena::{Arena, SecondaryMap};
use super::node::{InputList, Node, NodeFlags, NodeId};
use super::operators::{ControlOp, Operator, VirtualOp};
use super::types::{TypeId, ValueKind};

// =============================================================================
// Graph Structure
// =============================================================================

/// An IR graph.
///
/// The graph owns all nodes and maintains use-def chains for the
/// optimization passes.
#[derive(Clone)]
pub struct Graph {
    /// Arena for node storage.
    nodes: Arena<Node>,

    /// Use chains: for each node, which nodes use its output.
    uses: SecondaryMap<Node, Vec<NodeId>>,

    /// Deduplicated constants.
    constants: FxHashMap<Operator, NodeId>,

    /// The start node (control entry).
    pub start: NodeId,
}

impl Graph {
    /// Create a new graph holding only the start node.
    pub fn new() -> Self {
        let mut nodes = Arena::with_capacity(256);
        let start = nodes.alloc(Node::new(
            Operator::Control(ControlOp::Start),
            InputList::empty(),
            ValueKind::Control,
        ));
        Graph {
            nodes,
            uses: SecondaryMap::new(),
            constants: FxHashMap::default(),
            start,
        }
    }

    // =========================================================================
    // Node Access
    // =========================================================================

    /// Get a reference to a node.
    ///
    /// # Panics
    ///
    /// Panics if `id` is stale.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Get a mutable reference to a node.
    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Get a node by ID (optional).
    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Operator of a node.
    #[inline]
    pub fn op(&self, id: NodeId) -> Operator {
        self.nodes[id].op
    }

    /// Input `index` of a node.
    #[inline]
    pub fn input(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.nodes[id].inputs.get(index)
    }

    /// Check if a handle refers to a node that is present and not dead.
    #[inline]
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.nodes.get(id).map_or(false, |node| !node.is_dead())
    }

    /// Get the number of nodes in the graph.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph holds only the start node.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    // =========================================================================
    // Node Creation
    // =========================================================================

    /// Add a node whose kind follows from its operator.
    pub fn add_node(&mut self, op: Operator, inputs: InputList) -> NodeId {
        let kind = op.result_kind().unwrap_or(ValueKind::Void);
        self.add_node_with_kind(op, inputs, kind)
    }

    /// Add a node with an explicit kind.
    pub fn add_node_with_kind(&mut self, op: Operator, inputs: InputList, kind: ValueKind) -> NodeId {
        let id = self.nodes.alloc(Node::new(op, inputs.clone(), kind));
        for input in inputs.iter() {
            self.add_use(input, id);
        }
        id
    }

    /// Add a fixed node that is not yet linked into the control chain.
    ///
    /// Input 0 is left unset until [`Graph::insert_before`] links it.
    pub fn add_detached(&mut self, op: Operator, rest: &[NodeId], kind: ValueKind) -> NodeId {
        debug_assert!(op.is_fixed());
        let mut inputs = InputList::one(NodeId::INVALID);
        for &input in rest {
            inputs.push(input);
        }
        self.add_node_with_kind(op, inputs, kind)
    }

    /// Duplicate a node with the same operator and inputs.
    pub fn duplicate(&mut self, id: NodeId) -> NodeId {
        let node = &self.nodes[id];
        let (op, inputs, kind) = (node.op, node.inputs.clone(), node.kind);
        self.add_node_with_kind(op, inputs, kind)
    }

    // =========================================================================
    // Use-Def Chains
    // =========================================================================

    /// Get all use edges of a node. A user appears once per edge.
    pub fn uses(&self, id: NodeId) -> &[NodeId] {
        self.uses.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Get the distinct users of a node, in first-use order.
    pub fn users(&self, id: NodeId) -> Vec<NodeId> {
        let mut users: Vec<NodeId> = Vec::with_capacity(self.uses(id).len());
        for &user in self.uses(id) {
            if !users.contains(&user) {
                users.push(user);
            }
        }
        users
    }

    /// Get the number of use edges.
    pub fn use_count(&self, id: NodeId) -> usize {
        self.uses(id).len()
    }

    /// Add a use relationship: `user` uses `def`.
    fn add_use(&mut self, def: NodeId, user: NodeId) {
        if def.is_valid() {
            self.uses.entry(def).push(user);
        }
    }

    /// Remove one use relationship.
    fn remove_use(&mut self, def: NodeId, user: NodeId) {
        if !def.is_valid() {
            return;
        }
        let uses = self.uses.entry(def);
        if let Some(pos) = uses.iter().position(|&u| u == user) {
            uses.swap_remove(pos);
        }
    }

    // =========================================================================
    // Edge Editing
    // =========================================================================

    /// Replace a node's input at the given index.
    pub fn replace_input(&mut self, node: NodeId, index: usize, new_input: NodeId) {
        let old_input = self.nodes[node].inputs.get(index);
        if old_input == Some(new_input) {
            return;
        }
        if let Some(old) = old_input {
            self.remove_use(old, node);
        }
        self.nodes[node].inputs.set(index, new_input);
        self.add_use(new_input, node);
    }

    /// Replace the first occurrence of `old` among a node's inputs.
    ///
    /// Returns `false` if `old` is not an input.
    pub fn replace_first_input(&mut self, node: NodeId, old: NodeId, new: NodeId) -> bool {
        match self.nodes[node].inputs.position(old) {
            Some(index) => {
                self.replace_input(node, index, new);
                true
            }
            None => false,
        }
    }

    /// Append an input.
    pub fn add_input(&mut self, node: NodeId, value: NodeId) {
        self.nodes[node].inputs.push(value);
        self.add_use(value, node);
    }

    /// Remove the input at `index`, shifting later inputs down.
    pub fn remove_input(&mut self, node: NodeId, index: usize) {
        let removed = self.nodes[node].inputs.remove(index);
        self.remove_use(removed, node);
    }

    /// Set or clear a node's snapshot edge.
    pub fn set_state_after(&mut self, node: NodeId, state: Option<NodeId>) {
        if let Some(old) = self.nodes[node].state_after {
            self.remove_use(old, node);
        }
        self.nodes[node].state_after = state;
        if let Some(new) = state {
            self.add_use(new, node);
        }
    }

    /// Redirect every value use of `old` (inputs and snapshot edges) to
    /// `new`. Control edges stay: when `old` is fixed, its successor keeps
    /// it as input 0 until `old` is unlinked.
    pub fn replace_at_usages(&mut self, old: NodeId, new: NodeId) {
        if old == new {
            return;
        }
        for user in self.users(old) {
            let first = usize::from(self.nodes[user].is_fixed());
            for index in first..self.nodes[user].inputs.len() {
                if self.nodes[user].inputs.get(index) == Some(old) {
                    self.replace_input(user, index, new);
                }
            }
            if self.nodes[user].state_after == Some(old) {
                self.set_state_after(user, Some(new));
            }
        }
    }

    /// Whether `user` consumes `def` as a value. A fixed node that only
    /// follows `def` in the control chain does not.
    pub fn uses_value(&self, user: NodeId, def: NodeId) -> bool {
        let node = &self.nodes[user];
        let first = usize::from(node.is_fixed());
        node.state_after == Some(def) || node.inputs.iter().skip(first).any(|input| input == def)
    }

    /// Distinct users consuming `def` as a value, in first-use order.
    pub fn value_users(&self, def: NodeId) -> Vec<NodeId> {
        let mut users = self.users(def);
        users.retain(|&user| self.uses_value(user, def));
        users
    }

    // =========================================================================
    // Fixed Nodes
    // =========================================================================

    /// The fixed node that follows `id` in its block, if `id` does not end
    /// the block.
    pub fn control_successor(&self, id: NodeId) -> Option<NodeId> {
        if self.nodes[id].op.is_block_end() {
            return None;
        }
        self.uses(id).iter().copied().find(|&user| {
            let node = &self.nodes[user];
            node.is_fixed() && node.inputs.get(0) == Some(id)
        })
    }

    /// Link a detached fixed node into the control chain right before
    /// `anchor`.
    pub fn insert_before(&mut self, anchor: NodeId, node: NodeId) {
        debug_assert!(self.nodes[node].is_fixed());
        debug_assert!(!self.nodes[anchor].op.is_block_begin());
        let pred = self.nodes[anchor].inputs.get(0).unwrap_or(NodeId::INVALID);
        self.replace_input(node, 0, pred);
        self.replace_input(anchor, 0, node);
    }

    /// Create a fixed node and link it right before `anchor`.
    pub fn add_fixed_before(
        &mut self,
        anchor: NodeId,
        op: Operator,
        rest: &[NodeId],
        kind: ValueKind,
    ) -> NodeId {
        let node = self.add_detached(op, rest, kind);
        self.insert_before(anchor, node);
        node
    }

    /// Unlink a non-terminating fixed node from the control chain and remove
    /// it from the graph.
    ///
    /// The node must have no remaining value users.
    pub fn remove_fixed(&mut self, id: NodeId) {
        self.unlink_fixed(id);
        self.remove(id);
    }

    /// Replace a fixed node by a floating value and remove it.
    pub fn replace_fixed_with_floating(&mut self, id: NodeId, value: NodeId) {
        self.unlink_fixed(id);
        self.replace_at_usages(id, value);
        self.remove(id);
    }

    /// Unlink a fixed node from the control chain and mark it dead. Users
    /// it still has are left to dead code elimination.
    pub fn delete_fixed(&mut self, id: NodeId) {
        self.unlink_fixed(id);
        self.kill(id);
    }

    fn unlink_fixed(&mut self, id: NodeId) {
        let pred = self.nodes[id].inputs.get(0).unwrap_or(NodeId::INVALID);
        if let Some(next) = self.control_successor(id) {
            self.replace_input(next, 0, pred);
        }
    }

    // =========================================================================
    // Node Lifetime
    // =========================================================================

    /// Mark a node as dead and drop its outgoing edges.
    pub fn kill(&mut self, id: NodeId) {
        self.nodes[id].mark_dead();
        self.drop_edges(id);
    }

    /// Remove a node from the arena. Its handle becomes stale.
    pub fn remove(&mut self, id: NodeId) {
        debug_assert!(
            self.uses(id).is_empty(),
            "removing {:?} with users {:?}",
            id,
            self.uses(id)
        );
        self.drop_edges(id);
        self.uses.reset(id);
        if let Some(node) = self.nodes.remove(id) {
            if node.is_constant() && self.constants.get(&node.op) == Some(&id) {
                self.constants.remove(&node.op);
            }
        }
    }

    fn drop_edges(&mut self, id: NodeId) {
        let node = &mut self.nodes[id];
        let inputs = std::mem::take(&mut node.inputs);
        let state = node.state_after.take();
        for input in inputs.iter() {
            self.remove_use(input, id);
        }
        if let Some(state) = state {
            self.remove_use(state, id);
        }
    }

    // =========================================================================
    // Constants
    // =========================================================================

    fn constant(&mut self, op: Operator) -> NodeId {
        if let Some(&id) = self.constants.get(&op) {
            if self.is_alive(id) {
                return id;
            }
        }
        let id = self.add_node(op, InputList::empty());
        self.constants.insert(op, id);
        id
    }

    /// Create an integer constant.
    pub fn const_int(&mut self, value: i64) -> NodeId {
        self.constant(Operator::ConstInt(value))
    }

    /// Create a boolean constant.
    pub fn const_bool(&mut self, value: bool) -> NodeId {
        self.constant(Operator::ConstBool(value))
    }

    /// Create the null constant.
    pub fn const_null(&mut self) -> NodeId {
        self.constant(Operator::ConstNull)
    }

    /// Create a type hub constant.
    pub fn const_hub(&mut self, ty: TypeId) -> NodeId {
        self.constant(Operator::ConstHub(ty))
    }

    /// The value a freshly allocated slot of `kind` holds.
    pub fn default_value(&mut self, kind: ValueKind) -> NodeId {
        match kind {
            ValueKind::Int => self.const_int(0),
            ValueKind::Bool => self.const_bool(false),
            _ => self.const_null(),
        }
    }

    // =========================================================================
    // SSA Helpers
    // =========================================================================

    /// Create a region (control merge) node.
    pub fn region(&mut self, ends: &[NodeId]) -> NodeId {
        self.add_node(Operator::Control(ControlOp::Region), InputList::from_slice(ends))
    }

    /// Create a Phi node for value merging.
    pub fn phi(&mut self, region: NodeId, values: &[NodeId], kind: ValueKind) -> NodeId {
        let mut inputs = InputList::one(region);
        for &value in values {
            inputs.push(value);
        }
        self.add_node_with_kind(Operator::Phi, inputs, kind)
    }

    /// Create a LoopPhi with its forward value. Back values are added with
    /// [`Graph::add_input`].
    pub fn loop_phi(&mut self, loop_begin: NodeId, forward: NodeId, kind: ValueKind) -> NodeId {
        self.add_node_with_kind(Operator::LoopPhi, InputList::two(loop_begin, forward), kind)
    }

    /// Phis attached to a region or loop, in creation order.
    pub fn phis(&self, merge: NodeId) -> Vec<NodeId> {
        let mut phis: Vec<NodeId> = self
            .users(merge)
            .into_iter()
            .filter(|&user| {
                let node = &self.nodes[user];
                node.is_phi() && node.inputs.get(0) == Some(merge)
            })
            .collect();
        phis.sort();
        phis
    }

    /// Create a VirtualObject placeholder.
    pub fn virtual_object(&mut self, id: u32, ty: TypeId) -> NodeId {
        self.add_node(
            Operator::Virtual(VirtualOp::VirtualObject { id, ty }),
            InputList::empty(),
        )
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Iterate over all nodes with their IDs.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    /// Snapshot of all node IDs.
    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.ids()
    }

    /// Live nodes whose operator satisfies `pred`.
    pub fn find(&self, pred: impl Fn(&Operator) -> bool) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, node)| !node.is_dead() && pred(&node.op))
            .map(|(id, _)| id)
            .collect()
    }

    /// Number of live nodes whose operator satisfies `pred`.
    pub fn count(&self, pred: impl Fn(&Operator) -> bool) -> usize {
        self.find(pred).len()
    }

    /// Check whether a flag is set on a node.
    pub fn has_flag(&self, id: NodeId, flag: NodeFlags) -> bool {
        self.nodes[id].flags.contains(flag)
    }

    // =========================================================================
    // Utilities
    // =========================================================================

    /// Verify graph consistency.
    pub fn verify(&self) -> Result<(), String> {
        let mut edges: FxHashMap<(NodeId, NodeId), isize> = FxHashMap::default();
        for (id, node) in self.iter() {
            if node.is_dead() {
                continue;
            }
            let targets = node.inputs.iter().chain(node.state_after);
            for input in targets {
                if !self.is_alive(input) {
                    return Err(format!("{:?} ({:?}) has dead input {:?}", id, node.op, input));
                }
                *edges.entry((input, id)).or_default() += 1;
            }
            if node.is_fixed() && !node.op.is_block_begin() {
                let control = node.inputs.get(0).and_then(|c| self.get(c));
                if !control.map_or(false, |c| c.is_fixed() && !c.op.is_block_end()) {
                    return Err(format!("{:?} ({:?}) has no control predecessor", id, node.op));
                }
            }
            if node.op == Operator::Phi {
                let region = node.inputs.get(0).map(|r| self.nodes[r].inputs.len());
                if region != Some(node.inputs.len() - 1) {
                    return Err(format!("phi {:?} does not match its region arity", id));
                }
            }
        }
        for (id, node) in self.iter() {
            if node.is_dead() {
                continue;
            }
            for &user in self.uses(id) {
                *edges.entry((id, user)).or_default() -= 1;
            }
        }
        if let Some(((def, user), _)) = edges.iter().find(|(_, &count)| count != 0) {
            return Err(format!("use list of {:?} disagrees with inputs of {:?}", def, user));
        }
        if !self.nodes[self.start].inputs.is_empty() {
            return Err("Start node should have no inputs".into());
        }
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Graph ({} nodes):", self.nodes.len())?;
        for (id, node) in self.iter() {
            writeln!(f, "  {:?}: {:?}", id, node)?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
