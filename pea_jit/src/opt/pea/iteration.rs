//! One iteration of the partial escape analysis.
//!
//! The iteration walks the scheduled graph block by block with a
//! [`BlockState`] per control-flow path. Allocations become virtual objects,
//! their consumers are folded against the abstract state, and objects are
//! materialized only on the paths where they escape.
//!
//! The same code runs twice per round, once with a discovery sink that only
//! answers whether anything would change, then with a mutating sink that
//! rewrites the graph. The discovery run fills the set of allocations the
//! mutating run may track.

use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::error::{Bailout, PeaError, PeaResult};
use crate::ir::arena::Arena;
use crate::ir::block_iterator::{BlockClosure, BlockIterator};
use crate::ir::cfg::{BlockId, Cfg};
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{ControlOp, Operator, VirtualOp};
use crate::ir::schedule::Schedule;
use crate::ir::types::{TypeRegistry, ValueKind};

use super::block_state::BlockState;
use super::config::PeaConfig;
use super::object_state::{Entry, ObjectState, Repr};
use super::record::{escape_op, EscapeOp, EscapeRecord, RecordId};
use super::sink::GraphSink;
use super::snapshot;
use super::stats::EscapeStats;
use super::usage::Usage;

/// Result of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationOutcome {
    /// At least one new allocation was made virtual.
    pub changed: bool,
    /// Counters of the iteration.
    pub stats: EscapeStats,
}

/// Partial escape analysis over one scheduled graph.
pub struct EscapeAnalysisIteration<'a, S: GraphSink> {
    sink: S,
    types: &'a TypeRegistry,
    config: &'a PeaConfig,
    cfg: &'a Cfg,
    schedule: &'a Schedule,

    /// Allocations the discovery pass tracked. Discovery fills the set, the
    /// mutating pass only tracks its members.
    allocations: &'a mut FxHashSet<NodeId>,

    /// Nodes consuming a value that denotes a tracked object.
    usages: FxHashSet<NodeId>,

    records: Arena<EscapeRecord>,

    /// Nodes replaced by the abstract state, deleted once the walk is done.
    obsolete: Vec<NodeId>,

    stats: EscapeStats,
    changed: bool,
    next_virtual_id: u32,

    /// Fixed node before which materializations for a scheduled node go.
    anchors: FxHashMap<NodeId, NodeId>,
}

impl<'a, S: GraphSink> EscapeAnalysisIteration<'a, S> {
    /// Prepare an iteration over the graph of `sink`. `cfg` and `schedule`
    /// must describe that graph.
    pub fn new(
        sink: S,
        types: &'a TypeRegistry,
        config: &'a PeaConfig,
        cfg: &'a Cfg,
        schedule: &'a Schedule,
        allocations: &'a mut FxHashSet<NodeId>,
    ) -> Self {
        let graph = sink.graph();
        let next_virtual_id = graph
            .iter()
            .filter(|(_, node)| !node.is_dead())
            .filter_map(|(_, node)| match node.op {
                Operator::Virtual(VirtualOp::VirtualObject { id, .. }) => Some(id + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        let anchors = compute_anchors(graph, cfg, schedule);

        EscapeAnalysisIteration {
            sink,
            types,
            config,
            cfg,
            schedule,
            allocations,
            usages: FxHashSet::default(),
            records: Arena::new(),
            obsolete: Vec::new(),
            stats: EscapeStats::default(),
            changed: false,
            next_virtual_id,
            anchors,
        }
    }

    /// Walk the graph. A mutating iteration deletes the nodes it made
    /// obsolete before returning.
    pub fn run(mut self) -> PeaResult<IterationOutcome> {
        let iterator = BlockIterator::new(self.sink.graph(), self.cfg);
        iterator.apply(&mut self, BlockState::new())?;
        self.delete_obsolete();
        Ok(IterationOutcome {
            changed: self.changed,
            stats: self.stats,
        })
    }

    fn delete_obsolete(&mut self) {
        let obsolete = std::mem::take(&mut self.obsolete);
        let Some(graph) = self.sink.graph_mut() else {
            return;
        };
        let mut deleted = FxHashSet::default();
        for node in obsolete {
            if !deleted.insert(node) || !graph.is_alive(node) {
                continue;
            }
            if graph.node(node).is_fixed() {
                graph.delete_fixed(node);
            } else {
                graph.kill(node);
            }
        }
    }

    // =========================================================================
    // Tracking
    // =========================================================================

    /// Allocation capability of `node`, if this iteration may track it.
    fn analyzable(&mut self, node: NodeId) -> Option<EscapeOp> {
        if S::MUTATES && !self.allocations.contains(&node) {
            return None;
        }
        let op = escape_op(self.sink.graph(), self.types, self.config, node)?;
        if !S::MUTATES {
            self.allocations.insert(node);
        }
        Some(op)
    }

    fn track(&mut self, node: NodeId, op: EscapeOp, state: &mut BlockState) {
        let fresh = op.virtual_object.is_none();
        let (virtual_object, id) = match op.virtual_object {
            Some(existing) => existing,
            None => {
                let id = self.next_virtual_id;
                self.next_virtual_id += 1;
                (self.sink.virtual_object(id, op.ty), id)
            }
        };
        let entries: SmallVec<[Entry; 4]> = match &op.values {
            Some(values) => values.iter().map(|&value| state.entry_for(value)).collect(),
            None => op
                .fields
                .iter()
                .map(|field| Entry::Value(self.sink.default_value(field.kind)))
                .collect(),
        };
        let slots = op.fields.len() as u64;
        let record = self.records.alloc(EscapeRecord {
            ty: op.ty,
            type_name: self.types.name(op.ty).to_string(),
            fields: op.fields,
            virtual_object,
            allocation: node,
            id,
            array: op.array,
        });
        debug!("tracking {} allocated by {:?}", self.records[record], node);

        state.add_object(record, ObjectState::new_virtual(entries, 0));
        self.add_alias(state, node, record);
        self.obsolete.push(node);
        if fresh {
            self.changed = true;
            self.stats.allocations_removed += 1;
            self.stats.allocation_fields_removed += slots;
        }
    }

    /// Bind `value` to `record` and mark everything consuming it as a value,
    /// looking through snapshot states.
    fn add_alias(&mut self, state: &mut BlockState, value: NodeId, record: RecordId) {
        state.add_alias(value, record);
        let graph = self.sink.graph();
        let mut pending = graph.value_users(value);
        while let Some(user) = pending.pop() {
            if self.usages.insert(user) && graph.op(user).is_virtual_state() {
                pending.extend(graph.users(user));
            }
        }
    }

    fn materialize(
        &mut self,
        state: &mut BlockState,
        anchor: NodeId,
        record: RecordId,
    ) -> Result<NodeId, Bailout> {
        state.materialize_before(&mut self.sink, &self.records, &mut self.stats, anchor, record)
    }

    fn anchor(&self, node: NodeId) -> PeaResult<NodeId> {
        self.anchors
            .get(&node)
            .copied()
            .filter(|anchor| anchor.is_valid())
            .ok_or_else(|| {
                PeaError::Internal(format!("no fixed node to materialize before {:?}", node))
            })
    }

    /// Make input `index` of `node` real if it denotes a tracked object.
    fn materialize_input(
        &mut self,
        state: &mut BlockState,
        node: NodeId,
        index: usize,
    ) -> PeaResult<()> {
        let Some(value) = self.sink.graph().input(node, index) else {
            return Ok(());
        };
        let Some(record) = state.alias(value) else {
            return Ok(());
        };
        let anchor = self.anchor(node)?;
        let materialized = self.materialize(state, anchor, record)?;
        self.sink.replace_input(node, index, materialized);
        Ok(())
    }

    /// Wrap slot values and materialized objects for use after a loop exit.
    fn proxy_at_exit(&mut self, exit: NodeId, state: &mut BlockState) {
        for record in state.records() {
            match state.state_of(record).repr().clone() {
                Repr::Virtual(entries) => {
                    for (slot, entry) in entries.into_iter().enumerate() {
                        let Entry::Value(value) = entry else {
                            continue;
                        };
                        if !value.is_valid() || self.sink.graph().node(value).is_constant() {
                            continue;
                        }
                        let proxy = self.sink.proxy(value, exit);
                        state.state_of_mut(record).set_entry(slot, Entry::Value(proxy));
                    }
                }
                Repr::Materialized(value) => {
                    if value.is_valid() {
                        let proxy = self.sink.proxy(value, exit);
                        state.state_of_mut(record).set_materialized(proxy);
                    }
                }
            }
        }
    }

    // =========================================================================
    // Usages
    // =========================================================================

    /// Virtual record denoted by `object` and the slot `slot_of` picks in it.
    fn virtual_slot(
        &self,
        state: &BlockState,
        object: NodeId,
        slot_of: impl FnOnce(&EscapeRecord) -> Option<usize>,
    ) -> Option<(RecordId, usize)> {
        let (record, object) = state.tracked(object)?;
        if !object.is_virtual() {
            return None;
        }
        Some((record, slot_of(&self.records[record])?))
    }

    fn load_slot(&mut self, state: &mut BlockState, node: NodeId, record: RecordId, slot: usize) {
        let Some(entry) = state.state_of(record).entry(slot) else {
            return;
        };
        match entry {
            Entry::Object(target) if state.state_of(target).is_virtual() => {
                self.add_alias(state, node, target);
            }
            entry => {
                let value = state.resolve(&self.records, entry);
                self.sink.replace_at_usages(node, value);
            }
        }
        self.obsolete.push(node);
        self.stats.loads_removed += 1;
    }

    fn store_slot(
        &mut self,
        state: &mut BlockState,
        node: NodeId,
        record: RecordId,
        slot: usize,
        value: NodeId,
    ) {
        let entry = state.entry_for(value);
        state.state_of_mut(record).set_entry(slot, entry);
        self.obsolete.push(node);
        self.stats.stores_removed += 1;
    }

    /// Replace `node` by a constant.
    fn fold(&mut self, node: NodeId, constant: NodeId) {
        self.sink.replace_at_usages(node, constant);
        self.obsolete.push(node);
        self.stats.others_removed += 1;
    }

    fn dispatch(&mut self, node: NodeId, state: &mut BlockState) -> PeaResult<()> {
        let usage = Usage::classify(self.sink.graph(), node);
        match usage {
            Usage::Passthrough { value } => match virtual_record(state, value) {
                Some(record) => {
                    self.add_alias(state, node, record);
                    self.obsolete.push(node);
                }
                None => self.materialize_input(state, node, 0)?,
            },
            Usage::CheckCast { object, ty } => match virtual_record(state, object) {
                Some(record) if self.types.is_subtype_of(self.records[record].ty, ty) => {
                    self.add_alias(state, node, record);
                    self.obsolete.push(node);
                    self.stats.others_removed += 1;
                }
                _ => self.materialize_input(state, node, 1)?,
            },
            Usage::InstanceOf { object, ty } => match virtual_record(state, object) {
                Some(record) if self.types.is_subtype_of(self.records[record].ty, ty) => {
                    let constant = self.sink.const_bool(true);
                    self.fold(node, constant);
                }
                _ => self.materialize_input(state, node, 0)?,
            },
            Usage::IsNull { object } => {
                if state.alias(object).is_some() {
                    let constant = self.sink.const_bool(false);
                    self.fold(node, constant);
                }
            }
            Usage::Monitor { object, enter } => match virtual_record(state, object) {
                Some(record) if enter || state.state_of(record).lock_count > 0 => {
                    let object_state = state.state_of_mut(record);
                    if enter {
                        object_state.lock_count += 1;
                    } else {
                        object_state.lock_count -= 1;
                    }
                    self.sink
                        .eliminate_monitor(node, self.records[record].virtual_object);
                    self.stats.locks_removed += 1;
                }
                _ => self.materialize_input(state, node, 1)?,
            },
            Usage::LoadField { object, field } => {
                match self.virtual_slot(state, object, |r| r.field_index(field)) {
                    Some((record, slot)) => self.load_slot(state, node, record, slot),
                    None => self.materialize_input(state, node, 1)?,
                }
            }
            Usage::StoreField { object, field, value } => {
                match self.virtual_slot(state, object, |r| r.field_index(field)) {
                    Some((record, slot)) => self.store_slot(state, node, record, slot, value),
                    None => {
                        self.materialize_input(state, node, 1)?;
                        self.materialize_input(state, node, 2)?;
                    }
                }
            }
            Usage::LoadIndexed { array, index } => {
                let constant = self.sink.graph().get(index).and_then(|n| n.as_int());
                let slot = constant
                    .and_then(|i| self.virtual_slot(state, array, |r| r.element_index(i)));
                match slot {
                    Some((record, slot)) => self.load_slot(state, node, record, slot),
                    None => self.materialize_input(state, node, 1)?,
                }
            }
            Usage::StoreIndexed {
                array,
                index,
                value,
            } => {
                let constant = self.sink.graph().get(index).and_then(|n| n.as_int());
                let slot = constant
                    .and_then(|i| self.virtual_slot(state, array, |r| r.element_index(i)));
                match slot {
                    Some((record, slot)) => self.store_slot(state, node, record, slot, value),
                    None => {
                        self.materialize_input(state, node, 1)?;
                        self.materialize_input(state, node, 3)?;
                    }
                }
            }
            Usage::CyclicStore {
                object,
                slot,
                value,
            } => {
                let slot = slot as usize;
                match self.virtual_slot(state, object, |r| (slot < r.len()).then_some(slot)) {
                    Some((record, slot)) => self.store_slot(state, node, record, slot, value),
                    None => {
                        self.materialize_input(state, node, 1)?;
                        self.materialize_input(state, node, 2)?;
                    }
                }
            }
            Usage::ArrayLength { array } => match state.alias(array) {
                Some(record) if self.records[record].is_array() => {
                    let length = self.records[record].len() as i64;
                    let constant = self.sink.const_int(length);
                    self.fold(node, constant);
                }
                _ => self.materialize_input(state, node, 1)?,
            },
            Usage::ReadHub { object } => {
                if let Some(record) = state.alias(object) {
                    let constant = self.sink.const_hub(self.records[record].ty);
                    self.fold(node, constant);
                }
            }
            Usage::ObjectEquals { x, y } => {
                let known = match (virtual_record(state, x), virtual_record(state, y)) {
                    (Some(a), Some(b)) => Some(a == b),
                    (Some(_), None) | (None, Some(_)) => Some(false),
                    (None, None) => None,
                };
                match known {
                    Some(equal) => {
                        let constant = self.sink.const_bool(equal);
                        self.fold(node, constant);
                    }
                    None => {
                        self.materialize_input(state, node, 0)?;
                        self.materialize_input(state, node, 1)?;
                    }
                }
            }
            Usage::Escape | Usage::Opaque => {
                if usage == Usage::Opaque {
                    debug!(
                        "{:?} ({:?}) has no rule for tracked operands",
                        node,
                        self.sink.graph().op(node)
                    );
                }
                self.materialize_operands(state, node)?;
            }
        }
        Ok(())
    }

    /// Make every tracked value operand of `node` real. Input 0 of a fixed
    /// node is its control predecessor and is left alone.
    fn materialize_operands(&mut self, state: &mut BlockState, node: NodeId) -> PeaResult<()> {
        let node_ref = self.sink.graph().node(node);
        let first = usize::from(node_ref.is_fixed());
        for index in first..node_ref.inputs.len() {
            self.materialize_input(state, node, index)?;
        }
        Ok(())
    }

    // =========================================================================
    // Merges
    // =========================================================================

    /// Record every input of `phi` denotes, if it is the same on all paths
    /// and virtual on all of them.
    fn phi_record(&self, states: &[BlockState], phi: NodeId) -> Option<RecordId> {
        let graph = self.sink.graph();
        let mut common = None;
        for (index, state) in states.iter().enumerate() {
            let record = virtual_record(state, graph.input(phi, index + 1)?)?;
            if common.map_or(false, |c| c != record) {
                return None;
            }
            common = Some(record);
        }
        common
    }

    /// Records that survive a merge: those every path agrees a value
    /// denotes, those a phi unifies, and those identical slots refer to.
    fn merge_candidates(
        &self,
        states: &[BlockState],
        aliases: &FxHashMap<NodeId, RecordId>,
        phis: &[NodeId],
    ) -> Vec<RecordId> {
        let Some(first) = states.first() else {
            return Vec::new();
        };
        let mut pending: Vec<RecordId> = aliases.values().copied().collect();
        pending.extend(phis.iter().filter_map(|&phi| self.phi_record(states, phi)));

        let mut found = FxHashSet::default();
        while let Some(record) = pending.pop() {
            if !found.insert(record) {
                continue;
            }
            let Some(entries) = first.state_of(record).entries() else {
                continue;
            };
            for (slot, &entry) in entries.iter().enumerate() {
                let Entry::Object(target) = entry else {
                    continue;
                };
                if states
                    .iter()
                    .all(|s| s.state_of(record).entry(slot) == Some(entry))
                {
                    pending.push(target);
                }
            }
        }
        let mut records: Vec<RecordId> = found.into_iter().collect();
        records.sort();
        records
    }

    /// Materialize `record` where the paths cannot share one virtual
    /// description of it. Returns whether anything was materialized.
    fn unify_record(
        &mut self,
        states: &mut [BlockState],
        anchors: &[NodeId],
        record: RecordId,
    ) -> PeaResult<bool> {
        let mut materialized = false;
        if states.iter().any(|s| !s.state_of(record).is_virtual()) {
            for (state, &anchor) in states.iter_mut().zip(anchors) {
                if state.state_of(record).is_virtual() {
                    self.materialize(state, anchor, record)?;
                    materialized = true;
                }
            }
            return Ok(materialized);
        }

        // Differing slots become phis, so objects they refer to must be real.
        for slot in 0..self.records[record].len() {
            if states.iter().any(|s| !s.state_of(record).is_virtual()) {
                return Ok(true);
            }
            let first = states[0].state_of(record).entry(slot);
            if states.iter().all(|s| s.state_of(record).entry(slot) == first) {
                continue;
            }
            for (state, &anchor) in states.iter_mut().zip(anchors) {
                let Some(Entry::Object(target)) = state.state_of(record).entry(slot) else {
                    continue;
                };
                if state.state_of(target).is_virtual() {
                    self.materialize(state, anchor, target)?;
                    materialized = true;
                }
            }
        }
        Ok(materialized)
    }

    /// Materialize the tracked inputs of a phi that cannot stand for a
    /// single virtual object.
    fn unify_phi_inputs(
        &mut self,
        states: &mut [BlockState],
        anchors: &[NodeId],
        phi: NodeId,
    ) -> PeaResult<bool> {
        if self.phi_record(states, phi).is_some() {
            return Ok(false);
        }
        let mut materialized = false;
        for (index, (state, &anchor)) in states.iter_mut().zip(anchors).enumerate() {
            let Some(value) = self.sink.graph().input(phi, index + 1) else {
                continue;
            };
            if let Some(record) = virtual_record(state, value) {
                self.materialize(state, anchor, record)?;
                materialized = true;
            }
        }
        Ok(materialized)
    }

    fn build_merged(
        &mut self,
        merge: NodeId,
        states: &[BlockState],
        aliases: FxHashMap<NodeId, RecordId>,
        records: &[RecordId],
        phis: &[NodeId],
    ) -> BlockState {
        let mut merged = BlockState::new();
        for &record in records {
            let first = states[0].state_of(record);
            debug_assert!(
                states
                    .iter()
                    .all(|s| s.state_of(record).lock_count == first.lock_count),
                "lock count of {} differs between predecessors",
                self.records[record]
            );
            let lock_count = first.lock_count;

            let object = match first.entries() {
                Some(entries) => {
                    let mut entries: SmallVec<[Entry; 4]> = SmallVec::from_slice(entries);
                    for (slot, entry) in entries.iter_mut().enumerate() {
                        if states
                            .iter()
                            .all(|s| s.state_of(record).entry(slot) == Some(*entry))
                        {
                            continue;
                        }
                        let values: Vec<NodeId> = states
                            .iter()
                            .map(|s| {
                                let entry = s
                                    .state_of(record)
                                    .entry(slot)
                                    .unwrap_or(Entry::Value(NodeId::INVALID));
                                s.resolve(&self.records, entry)
                            })
                            .collect();
                        let kind = self.records[record].fields[slot].kind;
                        *entry = Entry::Value(self.sink.phi(merge, &values, kind));
                    }
                    ObjectState::new_virtual(entries, lock_count)
                }
                None => {
                    let values: Vec<NodeId> = states
                        .iter()
                        .map(|s| {
                            s.state_of(record)
                                .materialized_value()
                                .unwrap_or(NodeId::INVALID)
                        })
                        .collect();
                    let value = if values.iter().all(|&v| v == values[0]) {
                        values[0]
                    } else {
                        self.sink.phi(merge, &values, ValueKind::Object)
                    };
                    ObjectState::new_materialized(value, lock_count)
                }
            };
            merged.add_object(record, object);
        }

        let mut aliases: Vec<(NodeId, RecordId)> = aliases.into_iter().collect();
        aliases.sort();
        for (value, record) in aliases {
            merged.add_alias(value, record);
        }

        for &phi in phis {
            if let Some(record) = self.phi_record(states, phi) {
                self.add_alias(&mut merged, phi, record);
                self.obsolete.push(phi);
                continue;
            }
            for (index, state) in states.iter().enumerate() {
                let Some(value) = self.sink.graph().input(phi, index + 1) else {
                    continue;
                };
                if let Some(record) = state.alias(value) {
                    let materialized = state.resolve(&self.records, Entry::Object(record));
                    self.sink.replace_input(phi, index + 1, materialized);
                }
            }
        }
        merged
    }
}

impl<S: GraphSink> BlockClosure for EscapeAnalysisIteration<'_, S> {
    type State = BlockState;
    type Error = PeaError;

    fn process_block(&mut self, block: BlockId, state: &mut BlockState) -> PeaResult<()> {
        let schedule = self.schedule;
        for &node in schedule.nodes(block) {
            if !self.sink.graph().is_alive(node) {
                continue;
            }
            if self.config.trace {
                trace!("{:?}: {:?}", node, self.sink.graph().op(node));
            }

            if let Some(op) = self.analyzable(node) {
                self.track(node, op, state);
            } else {
                if self.sink.graph().op(node) == Operator::Control(ControlOp::LoopExit) {
                    self.proxy_at_exit(node, state);
                }
                if self.usages.contains(&node) {
                    self.dispatch(node, state)?;
                }
            }

            if S::MUTATES && self.sink.graph().node(node).state_after.is_some() {
                if let Some(graph) = self.sink.graph_mut() {
                    snapshot::augment(graph, &self.records, state, node)?;
                }
            }
        }
        if self.config.trace {
            trace!("state at end of {:?}: {:?}", block, state);
        }
        Ok(())
    }

    fn merge(&mut self, merge: BlockId, states: Vec<BlockState>) -> PeaResult<BlockState> {
        let cfg = self.cfg;
        let block = cfg.block(merge);
        let anchors: Vec<NodeId> = block
            .predecessors
            .iter()
            .map(|&pred| cfg.block(pred).end)
            .collect();
        let phis: Vec<NodeId> = self
            .sink
            .graph()
            .phis(block.begin)
            .into_iter()
            .filter(|phi| self.usages.contains(phi))
            .collect();

        // Materializing one object can force others, so sweep until no
        // path changes.
        let mut states = states;
        let (aliases, records) = loop {
            let aliases = BlockState::intersect_aliases(&states);
            let records = self.merge_candidates(&states, &aliases, &phis);
            let mut materialized = false;
            for &record in &records {
                materialized |= self.unify_record(&mut states, &anchors, record)?;
            }
            for &phi in &phis {
                materialized |= self.unify_phi_inputs(&mut states, &anchors, phi)?;
            }
            if !materialized {
                break (aliases, records);
            }
        };

        let merged = self.build_merged(block.begin, &states, aliases, &records, &phis);
        if self.config.trace {
            trace!("merged state at {:?}: {:?}", merge, merged);
        }
        Ok(merged)
    }

    fn loop_begin(&mut self, header: BlockId, state: BlockState) -> PeaResult<BlockState> {
        let cfg = self.cfg;
        let block = cfg.block(header);
        let forward_end = cfg.block(block.predecessors[0]).end;
        let mut state = state;

        // Slots of objects kept virtual through the loop must hold values a
        // loop phi can carry.
        let referenced: Vec<RecordId> = state
            .virtual_records()
            .into_iter()
            .flat_map(|record| state.state_of(record).referenced_records().collect::<Vec<_>>())
            .collect();
        for target in referenced {
            if state.state_of(target).is_virtual() {
                self.materialize(&mut state, forward_end, target)?;
            }
        }

        let phis = self.sink.graph().phis(block.begin);
        for phi in phis {
            if self.sink.graph().op(phi) != Operator::LoopPhi {
                continue;
            }
            let Some(forward) = self.sink.graph().input(phi, 1) else {
                continue;
            };
            if let Some(record) = state.alias(forward) {
                let materialized = self.materialize(&mut state, forward_end, record)?;
                self.sink.replace_input(phi, 1, materialized);
            }
        }

        for record in state.virtual_records() {
            let entries: Vec<Entry> = state
                .state_of(record)
                .entries()
                .map(<[Entry]>::to_vec)
                .unwrap_or_default();
            for (slot, entry) in entries.into_iter().enumerate() {
                let forward = state.resolve(&self.records, entry);
                let kind = self.records[record].fields[slot].kind;
                let phi = self.sink.loop_phi(block.begin, forward, kind);
                state.state_of_mut(record).set_entry(slot, Entry::Value(phi));
            }
        }
        Ok(state)
    }

    fn loop_ends(
        &mut self,
        header: BlockId,
        header_state: &BlockState,
        end_states: Vec<BlockState>,
    ) -> PeaResult<()> {
        let cfg = self.cfg;
        let block = cfg.block(header);
        let tracked = header_state.virtual_records();
        let phis: Vec<NodeId> = {
            let graph = self.sink.graph();
            graph
                .phis(block.begin)
                .into_iter()
                .filter(|&phi| graph.op(phi) == Operator::LoopPhi)
                .collect()
        };

        let mut end_states = end_states;
        for (edge, state) in end_states.iter_mut().enumerate() {
            let anchor = cfg.block(block.predecessors[edge + 1]).end;
            let referenced: Vec<RecordId> = tracked
                .iter()
                .filter_map(|&record| state.object(record))
                .flat_map(|object| object.referenced_records().collect::<Vec<_>>())
                .collect();
            for target in referenced {
                if state.object(target).map_or(false, ObjectState::is_virtual) {
                    self.materialize(state, anchor, target)?;
                }
            }
            for &phi in &phis {
                let Some(value) = self.sink.graph().input(phi, edge + 2) else {
                    continue;
                };
                if let Some(record) = state.alias(value) {
                    let materialized = self.materialize(state, anchor, record)?;
                    self.sink.replace_input(phi, edge + 2, materialized);
                }
            }
        }

        for &record in &tracked {
            let locks = header_state.state_of(record).lock_count;
            let stays_virtual = end_states.iter().all(|state| {
                state
                    .object(record)
                    .map_or(false, |o| o.is_virtual() && o.lock_count == locks)
            });
            if !stays_virtual {
                let desc = self.records[record].to_string();
                debug!("{} does not stay virtual around {:?}", desc, block.begin);
                return Err(Bailout::MaterializedInLoop(desc).into());
            }
        }

        for &record in &tracked {
            let entries = header_state.state_of(record).entries().unwrap_or(&[]);
            for (slot, &entry) in entries.iter().enumerate() {
                let Entry::Value(phi) = entry else {
                    return Err(PeaError::Internal(format!(
                        "slot {} of {} entered {:?} without a loop phi",
                        slot, self.records[record], block.begin
                    )));
                };
                for state in &end_states {
                    let value = state
                        .state_of(record)
                        .entry(slot)
                        .map_or(NodeId::INVALID, |entry| state.resolve(&self.records, entry));
                    self.sink.add_phi_input(phi, value);
                }
            }
        }
        Ok(())
    }
}

/// Record `value` denotes, if it is still virtual on this path.
fn virtual_record(state: &BlockState, value: NodeId) -> Option<RecordId> {
    match state.tracked(value) {
        Some((record, object)) if object.is_virtual() => Some(record),
        _ => None,
    }
}

/// For every scheduled node, the first fixed node at or after it in its
/// block.
fn compute_anchors(graph: &Graph, cfg: &Cfg, schedule: &Schedule) -> FxHashMap<NodeId, NodeId> {
    let mut anchors = FxHashMap::default();
    for (block, _) in cfg.iter() {
        let mut next = NodeId::INVALID;
        for &node in schedule.nodes(block).iter().rev() {
            if graph.node(node).is_fixed() {
                next = node;
            }
            anchors.insert(node, next);
        }
    }
    anchors
}

// =============================================================================
// Tests
// =============================================================================
