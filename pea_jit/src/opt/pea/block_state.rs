//! Abstract state carried along one control-flow path.
//!
//! A [`BlockState`] maps every tracked record to its [`ObjectState`] and
//! every graph value known to denote a tracked object to its record. It also
//! owns the materialization protocol, the only way a virtual object becomes
//! real.

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::error::Bailout;
use crate::ir::arena::Arena;
use crate::ir::node::NodeId;

use super::object_state::{Entry, ObjectState, Repr};
use super::record::{EscapeRecord, RecordId};
use super::sink::GraphSink;
use super::stats::EscapeStats;

/// Tracked objects and value aliases on one path.
#[derive(Debug, Clone, Default)]
pub struct BlockState {
    objects: FxHashMap<RecordId, ObjectState>,
    aliases: FxHashMap<NodeId, RecordId>,
}

impl BlockState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// State of a record, if tracked on this path.
    #[inline]
    pub fn object(&self, record: RecordId) -> Option<&ObjectState> {
        self.objects.get(&record)
    }

    /// Start tracking a record.
    pub fn add_object(&mut self, record: RecordId, state: ObjectState) {
        self.objects.insert(record, state);
    }

    /// Tracked records in creation order.
    pub fn records(&self) -> Vec<RecordId> {
        let mut records: Vec<RecordId> = self.objects.keys().copied().collect();
        records.sort();
        records
    }

    /// Records still virtual on this path, in creation order.
    pub fn virtual_records(&self) -> Vec<RecordId> {
        let mut records: Vec<RecordId> = self
            .objects
            .iter()
            .filter(|(_, state)| state.is_virtual())
            .map(|(&record, _)| record)
            .collect();
        records.sort();
        records
    }

    /// State of a record that must be tracked on this path.
    ///
    /// # Panics
    ///
    /// Panics if the record is not tracked.
    pub fn state_of(&self, record: RecordId) -> &ObjectState {
        match self.objects.get(&record) {
            Some(state) => state,
            None => panic!("record {:?} is aliased but not tracked", record),
        }
    }

    /// Mutable state of a record that must be tracked on this path.
    pub fn state_of_mut(&mut self, record: RecordId) -> &mut ObjectState {
        match self.objects.get_mut(&record) {
            Some(state) => state,
            None => panic!("record {:?} is aliased but not tracked", record),
        }
    }

    // =========================================================================
    // Aliases
    // =========================================================================

    /// Record a value denotes, if any.
    #[inline]
    pub fn alias(&self, value: NodeId) -> Option<RecordId> {
        self.aliases.get(&value).copied()
    }

    /// Record and state a value denotes.
    pub fn tracked(&self, value: NodeId) -> Option<(RecordId, &ObjectState)> {
        let record = self.alias(value)?;
        Some((record, self.state_of(record)))
    }

    /// Bind a value to a record.
    pub fn add_alias(&mut self, value: NodeId, record: RecordId) {
        debug_assert!(self.objects.contains_key(&record));
        self.aliases.insert(value, record);
    }

    /// Aliases every state agrees on.
    pub fn intersect_aliases(states: &[BlockState]) -> FxHashMap<NodeId, RecordId> {
        let Some((first, rest)) = states.split_first() else {
            return FxHashMap::default();
        };
        first
            .aliases
            .iter()
            .filter(|(value, record)| rest.iter().all(|s| s.aliases.get(value) == Some(record)))
            .map(|(&value, &record)| (value, record))
            .collect()
    }

    /// Entry describing `value` when it is stored into a virtual object.
    pub fn entry_for(&self, value: NodeId) -> Entry {
        match self.alias(value) {
            Some(record) => Entry::Object(record),
            None => Entry::Value(value),
        }
    }

    /// Graph value standing for an entry: the placeholder of a virtual
    /// object, the allocation of a materialized one, or the plain value.
    pub fn resolve(&self, records: &Arena<EscapeRecord>, entry: Entry) -> NodeId {
        match entry {
            Entry::Value(value) => value,
            Entry::Object(record) => match self.state_of(record).repr() {
                Repr::Virtual(_) => records[record].virtual_object,
                Repr::Materialized(value) => *value,
            },
        }
    }

    // =========================================================================
    // Materialization
    // =========================================================================

    /// Make `record` real right before the fixed node `anchor` and return
    /// the value that allocates it.
    ///
    /// Objects referenced from its slots are materialized with it. Slots
    /// referring back into the group being materialized start out at their
    /// default and are patched by stores placed after the whole group.
    /// Calling this on a materialized record returns the existing value.
    pub fn materialize_before<S: GraphSink>(
        &mut self,
        sink: &mut S,
        records: &Arena<EscapeRecord>,
        stats: &mut EscapeStats,
        anchor: NodeId,
        record: RecordId,
    ) -> Result<NodeId, Bailout> {
        if let Some(value) = self.state_of(record).materialized_value() {
            return Ok(value);
        }
        let mut deferred = FxHashSet::default();
        let mut stores = Vec::new();
        let value =
            self.materialize_group(sink, records, stats, anchor, record, &mut deferred, &mut stores)?;
        for store in stores {
            sink.insert_before(anchor, store);
        }
        Ok(value)
    }

    #[allow(clippy::too_many_arguments)]
    fn materialize_group<S: GraphSink>(
        &mut self,
        sink: &mut S,
        records: &Arena<EscapeRecord>,
        stats: &mut EscapeStats,
        anchor: NodeId,
        record: RecordId,
        deferred: &mut FxHashSet<RecordId>,
        stores: &mut Vec<NodeId>,
    ) -> Result<NodeId, Bailout> {
        let desc = &records[record];
        let state = self.state_of(record);
        if state.lock_count > 0 {
            return Err(Bailout::MaterializedWithLock(desc.to_string()));
        }
        let entries: SmallVec<[Entry; 4]> = match state.repr() {
            Repr::Virtual(entries) => entries.clone(),
            Repr::Materialized(value) => return Ok(*value),
        };
        debug!("materializing {} before {:?}", desc, anchor);

        let materialize = sink.new_materialize(desc.virtual_object);
        self.state_of_mut(record).set_materialized(materialize);
        stats.materializations += 1;
        stats.materialization_fields += entries.len() as u64;
        deferred.insert(record);

        let mut values = Vec::with_capacity(entries.len());
        for (slot, entry) in entries.into_iter().enumerate() {
            let Entry::Object(target) = entry else {
                values.push(self.resolve(records, entry));
                continue;
            };
            let target_value = match self.state_of(target).materialized_value() {
                Some(value) => value,
                None => self
                    .materialize_group(sink, records, stats, anchor, target, deferred, stores)?,
            };
            if deferred.contains(&target) {
                stores.push(sink.cyclic_store(materialize, slot as u32, target_value));
                values.push(sink.default_value(desc.fields[slot].kind));
            } else {
                values.push(target_value);
            }
        }

        sink.set_materialize_values(materialize, &values);
        sink.insert_before(anchor, materialize);
        deferred.remove(&record);
        Ok(materialize)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder};
    use crate::ir::operators::{Operator, VirtualOp};
    use crate::ir::types::{TypeId, ValueKind};
    use crate::opt::pea::record::{EscapeField, FieldKey};
    use crate::opt::pea::sink::{DiscoverySink, MutatingSink};
    use smallvec::smallvec;

    fn record(graph: &mut crate::ir::graph::Graph, id: u32, slots: usize) -> EscapeRecord {
        EscapeRecord {
            ty: TypeId::OBJECT,
            type_name: "Node".into(),
            fields: (0..slots as u32)
                .map(|i| EscapeField {
                    key: FieldKey::Index(i),
                    kind: ValueKind::Object,
                })
                .collect(),
            virtual_object: graph.virtual_object(id, TypeId::OBJECT),
            allocation: NodeId::INVALID,
            id,
            array: false,
        }
    }

    fn materializations(graph: &crate::ir::graph::Graph) -> usize {
        graph.count(|op| *op == Operator::Virtual(VirtualOp::MaterializeObject))
    }

    #[test]
    fn test_intersect_aliases_keeps_agreement() {
        let mut records = Arena::new();
        let r = records.alloc(EscapeRecord {
            ty: TypeId::OBJECT,
            type_name: "A".into(),
            fields: SmallVec::new(),
            virtual_object: NodeId::INVALID,
            allocation: NodeId::INVALID,
            id: 0,
            array: false,
        });
        let (a, b) = (NodeId::new(1), NodeId::new(2));
        let mut left = BlockState::new();
        left.add_object(r, ObjectState::new_virtual(SmallVec::new(), 0));
        left.add_alias(a, r);
        left.add_alias(b, r);
        let mut right = left.clone();
        right.aliases.remove(&b);

        let merged = BlockState::intersect_aliases(&[left, right]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.get(&a), Some(&r));
    }

    #[test]
    fn test_materialize_is_idempotent() {
        let mut builder = GraphBuilder::new(&[]);
        let one = builder.const_int(1);
        let ret = builder.return_value(Some(one));
        let mut graph = builder.finish();

        let mut records = Arena::new();
        let r = records.alloc(record(&mut graph, 0, 1));
        let mut state = BlockState::new();
        state.add_object(r, ObjectState::new_virtual(smallvec![Entry::Value(one)], 0));

        let mut stats = EscapeStats::default();
        let mut sink = MutatingSink::new(&mut graph);
        let first = state.materialize_before(&mut sink, &records, &mut stats, ret, r).unwrap();
        let second = state.materialize_before(&mut sink, &records, &mut stats, ret, r).unwrap();

        assert_eq!(first, second);
        assert_eq!(stats.materializations, 1);
        assert_eq!(materializations(&graph), 1);
        assert_eq!(graph.input(first, 2), Some(one));
        assert!(state.object(r).unwrap().initialized);
    }

    #[test]
    fn test_locked_object_bails_out() {
        let mut graph = crate::ir::graph::Graph::new();
        let mut records = Arena::new();
        let r = records.alloc(record(&mut graph, 3, 0));
        let mut state = BlockState::new();
        state.add_object(r, ObjectState::new_virtual(SmallVec::new(), 1));

        let mut stats = EscapeStats::default();
        let mut sink = DiscoverySink::new(&graph);
        let result = state.materialize_before(&mut sink, &records, &mut stats, graph.start, r);
        assert_eq!(result, Err(Bailout::MaterializedWithLock("Node#3".into())));
        assert!(state.object(r).unwrap().is_virtual());
    }

    #[test]
    fn test_cycle_is_patched_with_deferred_stores() {
        let mut builder = GraphBuilder::new(&[]);
        let ret = builder.return_value(None);
        let mut graph = builder.finish();

        let mut records = Arena::new();
        let a = records.alloc(record(&mut graph, 0, 1));
        let b = records.alloc(record(&mut graph, 1, 1));
        let mut state = BlockState::new();
        state.add_object(a, ObjectState::new_virtual(smallvec![Entry::Object(b)], 0));
        state.add_object(b, ObjectState::new_virtual(smallvec![Entry::Object(a)], 0));

        let mut stats = EscapeStats::default();
        let mut sink = MutatingSink::new(&mut graph);
        let mat_a = state.materialize_before(&mut sink, &records, &mut stats, ret, a).unwrap();
        let mat_b = state.object(b).unwrap().materialized_value().unwrap();

        assert_eq!(stats.materializations, 2);
        // b is built first; its slot pointing back at a is patched afterwards.
        assert_eq!(graph.input(mat_a, 2), Some(mat_b));
        assert_eq!(graph.op(graph.input(mat_b, 2).unwrap()), Operator::ConstNull);
        let store = graph.input(ret, 0).unwrap();
        assert_eq!(graph.op(store), Operator::Virtual(VirtualOp::CyclicStore(0)));
        assert_eq!(graph.input(store, 1), Some(mat_b));
        assert_eq!(graph.input(store, 2), Some(mat_a));
        assert_eq!(graph.input(store, 0), Some(mat_a));
        assert_eq!(graph.input(mat_a, 0), Some(mat_b));
        assert!(graph.verify().is_ok());
    }

    #[test]
    fn test_discovery_materialization_leaves_graph() {
        let mut graph = crate::ir::graph::Graph::new();
        let mut records = Arena::new();
        let a = records.alloc(record(&mut graph, 0, 1));
        let b = records.alloc(record(&mut graph, 1, 0));
        let before = graph.len();
        let mut state = BlockState::new();
        state.add_object(a, ObjectState::new_virtual(smallvec![Entry::Object(b)], 0));
        state.add_object(b, ObjectState::new_virtual(SmallVec::new(), 0));

        let mut stats = EscapeStats::default();
        let mut sink = DiscoverySink::new(&graph);
        state
            .materialize_before(&mut sink, &records, &mut stats, graph.start, a)
            .unwrap();
        assert!(!state.object(b).unwrap().is_virtual());
        assert_eq!(graph.len(), before);
        assert_eq!(stats.materializations, 2);
    }
}
