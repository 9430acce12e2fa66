use super::GraphBuilder;
use crate::ir::node::{InputList, NodeId};
use crate::ir::operators::{ControlOp, Operator, VirtualOp};
use crate::ir::types::ValueKind;

/// Builder trait for control flow operations.
pub trait ControlBuilder {
    // Basic Control Flow
    fn branch(&mut self, condition: NodeId) -> (NodeId, NodeId);
    fn begin(&mut self, block_begin: NodeId);
    fn end(&mut self) -> NodeId;
    fn merge(&mut self, ends: &[NodeId]) -> NodeId;
    fn return_value(&mut self, value: Option<NodeId>) -> NodeId;
    fn deopt(&mut self, state: NodeId) -> NodeId;

    // Loops
    fn loop_begin(&mut self) -> NodeId;
    fn loop_end(&mut self, header: NodeId) -> NodeId;
    fn loop_exit(&mut self, header: NodeId) -> NodeId;
    fn proxy(&mut self, value: NodeId, exit: NodeId) -> NodeId;

    // Phi Nodes
    fn phi(&mut self, values: &[NodeId], kind: ValueKind) -> NodeId;
    fn loop_phi(&mut self, initial: NodeId, kind: ValueKind) -> NodeId;
    fn set_loop_phi_back(&mut self, phi: NodeId, back_value: NodeId);

    // Snapshots
    fn frame_state(&mut self, bci: u32, locals: &[NodeId]) -> NodeId;
}

impl ControlBuilder for GraphBuilder {
    /// Returns the `(IfTrue, IfFalse)` projections. Neither is opened.
    fn branch(&mut self, condition: NodeId) -> (NodeId, NodeId) {
        let if_node = self.terminate(Operator::Control(ControlOp::If), &[condition]);
        let on_true = self.graph.add_node(
            Operator::Control(ControlOp::IfTrue),
            InputList::one(if_node),
        );
        let on_false = self.graph.add_node(
            Operator::Control(ControlOp::IfFalse),
            InputList::one(if_node),
        );
        (on_true, on_false)
    }

    fn begin(&mut self, block_begin: NodeId) {
        debug_assert!(self.graph.op(block_begin).is_block_begin());
        self.control = block_begin;
    }

    fn end(&mut self) -> NodeId {
        self.terminate(Operator::Control(ControlOp::End), &[])
    }

    fn merge(&mut self, ends: &[NodeId]) -> NodeId {
        let region = self.graph.region(ends);
        self.control = region;
        self.merge = region;
        region
    }

    fn return_value(&mut self, value: Option<NodeId>) -> NodeId {
        match value {
            Some(value) => self.terminate(Operator::Control(ControlOp::Return), &[value]),
            None => self.terminate(Operator::Control(ControlOp::Return), &[]),
        }
    }

    fn deopt(&mut self, state: NodeId) -> NodeId {
        let deopt = self.terminate(Operator::Control(ControlOp::Deopt), &[]);
        self.graph.set_state_after(deopt, Some(state));
        deopt
    }

    /// Close the current block with the forward end and open the header.
    fn loop_begin(&mut self) -> NodeId {
        let forward = self.end();
        let header = self.graph.add_node(
            Operator::Control(ControlOp::Loop),
            InputList::one(forward),
        );
        self.control = header;
        self.merge = header;
        self.loops.push(header);
        header
    }

    fn loop_end(&mut self, header: NodeId) -> NodeId {
        let end = self.terminate(Operator::Control(ControlOp::LoopEnd), &[]);
        self.graph.add_input(header, end);
        end
    }

    fn loop_exit(&mut self, header: NodeId) -> NodeId {
        if self.loops.last() == Some(&header) {
            self.loops.pop();
        }
        self.append(
            Operator::Control(ControlOp::LoopExit),
            &[header],
            ValueKind::Control,
        )
    }

    fn proxy(&mut self, value: NodeId, exit: NodeId) -> NodeId {
        let kind = self.kind_of(value);
        self.graph
            .add_node_with_kind(Operator::ValueProxy, InputList::two(value, exit), kind)
    }

    fn phi(&mut self, values: &[NodeId], kind: ValueKind) -> NodeId {
        self.graph.phi(self.merge, values, kind)
    }

    fn loop_phi(&mut self, initial: NodeId, kind: ValueKind) -> NodeId {
        let header = self.loops.last().copied().unwrap_or(self.merge);
        self.graph.loop_phi(header, initial, kind)
    }

    fn set_loop_phi_back(&mut self, phi: NodeId, back_value: NodeId) {
        self.graph.add_input(phi, back_value);
    }

    fn frame_state(&mut self, bci: u32, locals: &[NodeId]) -> NodeId {
        self.graph.add_node(
            Operator::Virtual(VirtualOp::FrameState {
                bci,
                locals: locals.len() as u16,
            }),
            InputList::from_slice(locals),
        )
    }
}
