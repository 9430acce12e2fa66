//! The mutation capability of an escape analysis iteration.
//!
//! Discovery and rewriting run the same algorithm. They differ only in the
//! sink they are instantiated with:
//! - [`DiscoverySink`] reads the graph and drops every edit, handing out
//!   [`NodeId::INVALID`] for nodes it would have created,
//! - [`MutatingSink`] performs the edits.

use crate::ir::graph::Graph;
use crate::ir::node::{InputList, NodeFlags, NodeId};
use crate::ir::operators::{Operator, VirtualOp};
use crate::ir::types::{TypeId, ValueKind};

/// Graph edits requested by the escape analysis.
pub trait GraphSink {
    /// Whether edits reach the graph.
    const MUTATES: bool;

    /// The graph being analyzed.
    fn graph(&self) -> &Graph;

    /// Mutable graph access, only for sinks that mutate.
    fn graph_mut(&mut self) -> Option<&mut Graph>;

    /// Placeholder node for a new tracked allocation.
    fn virtual_object(&mut self, id: u32, ty: TypeId) -> NodeId;

    /// Detached `MaterializeObject` of `vo` with its values still unset.
    fn new_materialize(&mut self, vo: NodeId) -> NodeId;

    /// Set the slot values of a detached materialization.
    fn set_materialize_values(&mut self, materialize: NodeId, values: &[NodeId]);

    /// Detached store patching slot `slot` of `object` with `value`.
    fn cyclic_store(&mut self, object: NodeId, slot: u32, value: NodeId) -> NodeId;

    /// Link a detached fixed node before `anchor`.
    fn insert_before(&mut self, anchor: NodeId, node: NodeId);

    /// Default value of a fresh slot.
    fn default_value(&mut self, kind: ValueKind) -> NodeId;

    /// Integer constant.
    fn const_int(&mut self, value: i64) -> NodeId;

    /// Boolean constant.
    fn const_bool(&mut self, value: bool) -> NodeId;

    /// Type hub constant.
    fn const_hub(&mut self, ty: TypeId) -> NodeId;

    /// Value phi at a region.
    fn phi(&mut self, region: NodeId, values: &[NodeId], kind: ValueKind) -> NodeId;

    /// Loop phi with its forward value. The discovery sink answers with the
    /// forward value itself.
    fn loop_phi(&mut self, header: NodeId, forward: NodeId, kind: ValueKind) -> NodeId;

    /// Add a back-edge value to a loop phi.
    fn add_phi_input(&mut self, phi: NodeId, value: NodeId);

    /// Replace input `index` of `node`.
    fn replace_input(&mut self, node: NodeId, index: usize, value: NodeId);

    /// Redirect all uses of `old` to `new`.
    fn replace_at_usages(&mut self, old: NodeId, new: NodeId);

    /// Point a monitor operation at `vo` and flag it as eliminated.
    fn eliminate_monitor(&mut self, monitor: NodeId, vo: NodeId);

    /// Wrap `value` for use after a loop exit. The discovery sink answers
    /// with `value` itself.
    fn proxy(&mut self, value: NodeId, exit: NodeId) -> NodeId;
}

// =============================================================================
// Discovery Sink
// =============================================================================

/// Read-only sink of the discovery pass.
pub struct DiscoverySink<'g> {
    graph: &'g Graph,
}

impl<'g> DiscoverySink<'g> {
    /// Create a sink over a graph that stays untouched.
    pub fn new(graph: &'g Graph) -> Self {
        DiscoverySink { graph }
    }
}

impl GraphSink for DiscoverySink<'_> {
    const MUTATES: bool = false;

    fn graph(&self) -> &Graph {
        self.graph
    }

    fn graph_mut(&mut self) -> Option<&mut Graph> {
        None
    }

    fn virtual_object(&mut self, _id: u32, _ty: TypeId) -> NodeId {
        NodeId::INVALID
    }

    fn new_materialize(&mut self, _vo: NodeId) -> NodeId {
        NodeId::INVALID
    }

    fn set_materialize_values(&mut self, _materialize: NodeId, _values: &[NodeId]) {}

    fn cyclic_store(&mut self, _object: NodeId, _slot: u32, _value: NodeId) -> NodeId {
        NodeId::INVALID
    }

    fn insert_before(&mut self, _anchor: NodeId, _node: NodeId) {}

    fn default_value(&mut self, _kind: ValueKind) -> NodeId {
        NodeId::INVALID
    }

    fn const_int(&mut self, _value: i64) -> NodeId {
        NodeId::INVALID
    }

    fn const_bool(&mut self, _value: bool) -> NodeId {
        NodeId::INVALID
    }

    fn const_hub(&mut self, _ty: TypeId) -> NodeId {
        NodeId::INVALID
    }

    fn phi(&mut self, _region: NodeId, _values: &[NodeId], _kind: ValueKind) -> NodeId {
        NodeId::INVALID
    }

    fn loop_phi(&mut self, _header: NodeId, forward: NodeId, _kind: ValueKind) -> NodeId {
        forward
    }

    fn add_phi_input(&mut self, _phi: NodeId, _value: NodeId) {}

    fn replace_input(&mut self, _node: NodeId, _index: usize, _value: NodeId) {}

    fn replace_at_usages(&mut self, _old: NodeId, _new: NodeId) {}

    fn eliminate_monitor(&mut self, _monitor: NodeId, _vo: NodeId) {}

    fn proxy(&mut self, value: NodeId, _exit: NodeId) -> NodeId {
        value
    }
}

// =============================================================================
// Mutating Sink
// =============================================================================

/// Sink of the rewriting pass.
pub struct MutatingSink<'g> {
    graph: &'g mut Graph,
}

impl<'g> MutatingSink<'g> {
    /// Create a sink that edits `graph`.
    pub fn new(graph: &'g mut Graph) -> Self {
        MutatingSink { graph }
    }
}

impl GraphSink for MutatingSink<'_> {
    const MUTATES: bool = true;

    fn graph(&self) -> &Graph {
        self.graph
    }

    fn graph_mut(&mut self) -> Option<&mut Graph> {
        Some(self.graph)
    }

    fn virtual_object(&mut self, id: u32, ty: TypeId) -> NodeId {
        self.graph.virtual_object(id, ty)
    }

    fn new_materialize(&mut self, vo: NodeId) -> NodeId {
        self.graph.add_detached(
            Operator::Virtual(VirtualOp::MaterializeObject),
            &[vo],
            ValueKind::Object,
        )
    }

    fn set_materialize_values(&mut self, materialize: NodeId, values: &[NodeId]) {
        for &value in values {
            self.graph.add_input(materialize, value);
        }
    }

    fn cyclic_store(&mut self, object: NodeId, slot: u32, value: NodeId) -> NodeId {
        self.graph.add_detached(
            Operator::Virtual(VirtualOp::CyclicStore(slot)),
            &[object, value],
            ValueKind::Void,
        )
    }

    fn insert_before(&mut self, anchor: NodeId, node: NodeId) {
        self.graph.insert_before(anchor, node);
    }

    fn default_value(&mut self, kind: ValueKind) -> NodeId {
        self.graph.default_value(kind)
    }

    fn const_int(&mut self, value: i64) -> NodeId {
        self.graph.const_int(value)
    }

    fn const_bool(&mut self, value: bool) -> NodeId {
        self.graph.const_bool(value)
    }

    fn const_hub(&mut self, ty: TypeId) -> NodeId {
        self.graph.const_hub(ty)
    }

    fn phi(&mut self, region: NodeId, values: &[NodeId], kind: ValueKind) -> NodeId {
        self.graph.phi(region, values, kind)
    }

    fn loop_phi(&mut self, header: NodeId, forward: NodeId, kind: ValueKind) -> NodeId {
        self.graph.loop_phi(header, forward, kind)
    }

    fn add_phi_input(&mut self, phi: NodeId, value: NodeId) {
        self.graph.add_input(phi, value);
    }

    fn replace_input(&mut self, node: NodeId, index: usize, value: NodeId) {
        self.graph.replace_input(node, index, value);
    }

    fn replace_at_usages(&mut self, old: NodeId, new: NodeId) {
        self.graph.replace_at_usages(old, new);
    }

    fn eliminate_monitor(&mut self, monitor: NodeId, vo: NodeId) {
        self.graph.replace_input(monitor, 1, vo);
        self.graph.node_mut(monitor).flags.insert(NodeFlags::ELIMINATED);
    }

    fn proxy(&mut self, value: NodeId, exit: NodeId) -> NodeId {
        let kind = self.graph.node(value).kind;
        self.graph.add_node_with_kind(
            Operator::ValueProxy,
            InputList::two(value, exit),
            kind,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{ControlBuilder, GraphBuilder, ObjectBuilder};

    #[test]
    fn test_discovery_sink_leaves_graph_untouched() {
        let mut builder = GraphBuilder::new(&[ValueKind::Object]);
        let p = builder.parameter(0);
        let ret = builder.return_value(Some(p));
        let graph = builder.finish();
        let before = graph.len();

        let mut sink = DiscoverySink::new(&graph);
        let vo = sink.virtual_object(0, TypeId::OBJECT);
        let mat = sink.new_materialize(vo);
        sink.insert_before(ret, mat);
        sink.replace_input(ret, 1, mat);
        assert!(!mat.is_valid());
        assert_eq!(sink.loop_phi(graph.start, p, ValueKind::Object), p);
        assert!(sink.graph_mut().is_none());
        assert_eq!(graph.len(), before);
        assert_eq!(graph.input(ret, 1), Some(p));
    }

    #[test]
    fn test_mutating_sink_materializes_before_anchor() {
        let mut builder = GraphBuilder::new(&[ValueKind::Int]);
        let p = builder.parameter(0);
        let ret = builder.return_value(Some(p));
        let mut graph = builder.finish();

        let mut sink = MutatingSink::new(&mut graph);
        let vo = sink.virtual_object(0, TypeId::OBJECT);
        let mat = sink.new_materialize(vo);
        sink.set_materialize_values(mat, &[p]);
        sink.insert_before(ret, mat);

        assert_eq!(graph.input(ret, 0), Some(mat));
        assert_eq!(graph.node(mat).inputs.to_vec(), vec![graph.start, vo, p]);
        assert!(graph.verify().is_ok());
    }

    #[test]
    fn test_eliminate_monitor_flags_node() {
        let mut builder = GraphBuilder::new(&[]);
        let obj = builder.new_instance(TypeId::OBJECT);
        let enter = builder.monitor_enter(obj);
        builder.return_value(None);
        let mut graph = builder.finish();

        let mut sink = MutatingSink::new(&mut graph);
        let vo = sink.virtual_object(1, TypeId::OBJECT);
        sink.eliminate_monitor(enter, vo);
        assert!(graph.has_flag(enter, NodeFlags::ELIMINATED));
        assert_eq!(graph.input(enter, 1), Some(vo));
    }
}
