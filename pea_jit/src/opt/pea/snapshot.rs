//! Deoptimization snapshots of tracked objects.
//!
//! After every node carrying a `FrameState` the snapshot is rewritten so the
//! unoptimized tier can rebuild the heap at that point:
//! - locals denoting a tracked object refer to its `VirtualObject`,
//! - every such object, every locked object and every virtual object
//!   reachable from their slots gets one mapping: `VirtualObjectState`
//!   (slot values and lock count) while virtual, `MaterializedObjectState`
//!   once real.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{PeaError, PeaResult};
use crate::ir::arena::Arena;
use crate::ir::graph::Graph;
use crate::ir::node::{InputList, NodeId};
use crate::ir::operators::{Operator, VirtualOp};

use super::block_state::BlockState;
use super::object_state::{Entry, Repr};
use super::record::{EscapeRecord, RecordId};

/// Rewrite the snapshot of `node` for the objects tracked in `state`.
pub fn augment(
    graph: &mut Graph,
    records: &Arena<EscapeRecord>,
    state: &BlockState,
    node: NodeId,
) -> PeaResult<()> {
    let Some(frame) = graph.node(node).state_after else {
        return Ok(());
    };
    let Operator::Virtual(VirtualOp::FrameState { locals, .. }) = graph.op(frame) else {
        return Err(PeaError::Internal(format!(
            "snapshot of {:?} is not a frame state",
            node
        )));
    };
    let locals = locals as usize;

    let placeholders: FxHashMap<NodeId, RecordId> = state
        .records()
        .into_iter()
        .map(|record| (records[record].virtual_object, record))
        .collect();
    let denoted = |value: NodeId| {
        state
            .alias(value)
            .or_else(|| placeholders.get(&value).copied())
    };

    let inputs = graph.node(frame).inputs.to_vec();
    let mut required: Vec<RecordId> = Vec::new();
    let mut seen: FxHashSet<RecordId> = FxHashSet::default();
    let mut require = |record: RecordId, required: &mut Vec<RecordId>| {
        if seen.insert(record) {
            required.push(record);
        }
    };

    let mut new_locals = Vec::new();
    for (index, &value) in inputs.iter().take(locals).enumerate() {
        if let Some(record) = denoted(value) {
            require(record, &mut required);
            let placeholder = records[record].virtual_object;
            if placeholder != value {
                new_locals.push((index, placeholder));
            }
        }
    }
    for record in state.records() {
        if state.object(record).map_or(false, |o| o.lock_count > 0) {
            require(record, &mut required);
        }
    }

    // Mappings of objects tracked here are rebuilt; the others keep their
    // description with tracked slot values resolved.
    let mut kept: Vec<(NodeId, Option<Vec<NodeId>>)> = Vec::new();
    let mut dropped = 0;
    for &mapping in &inputs[locals..] {
        let mapped = graph.input(mapping, 0).unwrap_or(NodeId::INVALID);
        if placeholders.contains_key(&mapped) {
            dropped += 1;
            continue;
        }
        let values = graph.node(mapping).inputs.to_vec();
        let mut rewritten = values.clone();
        for value in rewritten.iter_mut().skip(1) {
            if let Some(record) = denoted(*value) {
                require(record, &mut required);
                *value = state.resolve(records, Entry::Object(record));
            }
        }
        kept.push((mapping, (rewritten != values).then_some(rewritten)));
    }

    // Close over objects reachable from virtual slots.
    let mut queue = required.clone();
    while let Some(record) = queue.pop() {
        let Some(object) = state.object(record) else {
            continue;
        };
        for target in object.referenced_records() {
            if state.object(target).map_or(false, |o| o.is_virtual()) && seen.insert(target) {
                required.push(target);
                queue.push(target);
            }
        }
    }

    let rewrites = kept.iter().any(|(_, rewritten)| rewritten.is_some());
    if required.is_empty() && new_locals.is_empty() && dropped == 0 && !rewrites {
        return Ok(());
    }

    let frame = if graph.use_count(frame) > 1 {
        let copy = graph.duplicate(frame);
        graph.set_state_after(node, Some(copy));
        copy
    } else {
        frame
    };

    for (index, value) in new_locals {
        graph.replace_input(frame, index, value);
    }
    for index in (locals..inputs.len()).rev() {
        graph.remove_input(frame, index);
    }

    let mut mappings = Vec::with_capacity(kept.len() + required.len());
    for (mapping, rewritten) in kept {
        match rewritten {
            Some(values) => {
                let op = graph.op(mapping);
                let kind = graph.node(mapping).kind;
                mappings.push(graph.add_node_with_kind(op, InputList::from_slice(&values), kind));
            }
            None => mappings.push(mapping),
        }
    }
    required.sort();
    for record in required {
        let Some(object) = state.object(record) else {
            continue;
        };
        let placeholder = records[record].virtual_object;
        let mapping = match object.repr() {
            Repr::Virtual(entries) => {
                let mut values = Vec::with_capacity(entries.len() + 1);
                values.push(placeholder);
                values.extend(entries.iter().map(|&entry| state.resolve(records, entry)));
                graph.add_node(
                    Operator::Virtual(VirtualOp::VirtualObjectState {
                        locks: object.lock_count,
                    }),
                    InputList::from_slice(&values),
                )
            }
            Repr::Materialized(value) => graph.add_node(
                Operator::Virtual(VirtualOp::MaterializedObjectState),
                InputList::two(placeholder, *value),
            ),
        };
        mappings.push(mapping);
    }

    let mut described = FxHashSet::default();
    for &mapping in &mappings {
        let mapped = graph.input(mapping, 0).unwrap_or(NodeId::INVALID);
        if !described.insert(mapped) {
            return Err(PeaError::Internal(format!(
                "duplicate mapping of {:?} in snapshot of {:?}",
                mapped, node
            )));
        }
        graph.add_input(frame, mapping);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder, ObjectBuilder};
    use crate::ir::types::{TypeId, ValueKind};
    use crate::opt::pea::object_state::ObjectState;
    use crate::opt::pea::record::{EscapeField, FieldKey};
    use smallvec::smallvec;

    fn record(graph: &mut Graph, id: u32, allocation: NodeId) -> EscapeRecord {
        EscapeRecord {
            ty: TypeId::OBJECT,
            type_name: "Box".into(),
            fields: smallvec![EscapeField {
                key: FieldKey::Index(0),
                kind: ValueKind::Object,
            }],
            virtual_object: graph.virtual_object(id, TypeId::OBJECT),
            allocation,
            id,
            array: false,
        }
    }

    #[test]
    fn test_virtual_local_gets_mapping() {
        let mut builder = GraphBuilder::new(&[ValueKind::Object]);
        let alloc = builder.parameter(0);
        let one = builder.const_int(1);
        let frame = builder.frame_state(3, &[alloc, one]);
        let deopt = builder.deopt(frame);
        let mut graph = builder.finish();

        let mut records = Arena::new();
        let outer = records.alloc(record(&mut graph, 0, alloc));
        let inner = records.alloc(record(&mut graph, 1, NodeId::INVALID));
        let mut state = BlockState::new();
        state.add_object(outer, ObjectState::new_virtual(smallvec![Entry::Object(inner)], 0));
        state.add_object(inner, ObjectState::new_virtual(smallvec![Entry::Value(one)], 2));
        state.add_alias(alloc, outer);

        augment(&mut graph, &records, &state, deopt).unwrap();

        let vo_outer = records[outer].virtual_object;
        let vo_inner = records[inner].virtual_object;
        assert_eq!(graph.input(frame, 0), Some(vo_outer));
        assert_eq!(graph.node(frame).inputs.len(), 4);
        let first = graph.input(frame, 2).unwrap();
        assert_eq!(
            graph.op(first),
            Operator::Virtual(VirtualOp::VirtualObjectState { locks: 0 })
        );
        assert_eq!(graph.input(first, 1), Some(vo_inner));
        let second = graph.input(frame, 3).unwrap();
        assert_eq!(
            graph.op(second),
            Operator::Virtual(VirtualOp::VirtualObjectState { locks: 2 })
        );
        assert_eq!(graph.input(second, 0), Some(vo_inner));
        assert!(graph.verify().is_ok());
    }

    #[test]
    fn test_shared_frame_is_copied() {
        let mut builder = GraphBuilder::new(&[ValueKind::Object]);
        let alloc = builder.parameter(0);
        let frame = builder.frame_state(0, &[alloc]);
        let two = builder.const_int(2);
        let call = builder.call(1, &[], ValueKind::Void);
        builder.with_state(call, frame);
        let ret = builder.return_value(Some(two));
        builder.with_state(ret, frame);
        let mut graph = builder.finish();

        let mut records = Arena::new();
        let r = records.alloc(record(&mut graph, 0, alloc));
        let mut state = BlockState::new();
        state.add_object(r, ObjectState::new_materialized(two, 0));
        state.add_alias(alloc, r);

        augment(&mut graph, &records, &state, call).unwrap();

        let copy = graph.node(call).state_after.unwrap();
        assert_eq!(graph.node(ret).state_after, Some(frame));
        assert_ne!(copy, frame);
        assert_eq!(graph.input(frame, 0), Some(alloc));
        assert_eq!(graph.input(copy, 0), Some(records[r].virtual_object));
        let mapping = graph.input(copy, 1).unwrap();
        assert_eq!(graph.op(mapping), Operator::Virtual(VirtualOp::MaterializedObjectState));
        assert_eq!(graph.input(mapping, 1), Some(two));
    }

    #[test]
    fn test_untracked_snapshot_is_left_alone() {
        let mut builder = GraphBuilder::new(&[ValueKind::Int]);
        let p = builder.parameter(0);
        let frame = builder.frame_state(0, &[p]);
        let deopt = builder.deopt(frame);
        let mut graph = builder.finish();
        let before = graph.len();

        let records: Arena<EscapeRecord> = Arena::new();
        let state = BlockState::new();
        augment(&mut graph, &records, &state, deopt).unwrap();
        assert_eq!(graph.len(), before);
        assert_eq!(graph.node(frame).inputs.to_vec(), vec![p]);
    }
}
