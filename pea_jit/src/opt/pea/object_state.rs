//! Per-path state of one tracked object.

use smallvec::SmallVec;

use crate::ir::node::NodeId;

use super::record::RecordId;

/// Content of one slot of a virtual object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entry {
    /// A plain value.
    Value(NodeId),
    /// A reference to another tracked object.
    Object(RecordId),
}

/// Virtual slots or the materialized value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Repr {
    /// The object exists only in the compiler.
    Virtual(SmallVec<[Entry; 4]>),
    /// The object has been allocated by this value.
    Materialized(NodeId),
}

/// State of a tracked object on one control-flow path.
///
/// Materialization is one-way: a materialized state never becomes virtual
/// again on the same path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectState {
    repr: Repr,
    /// Monitors held on the object.
    pub lock_count: u32,
    /// Set once the object has been materialized.
    pub initialized: bool,
}

impl ObjectState {
    /// A virtual object with the given slots.
    pub fn new_virtual(entries: SmallVec<[Entry; 4]>, lock_count: u32) -> Self {
        ObjectState {
            repr: Repr::Virtual(entries),
            lock_count,
            initialized: false,
        }
    }

    /// An object already allocated by `value`.
    pub fn new_materialized(value: NodeId, lock_count: u32) -> Self {
        ObjectState {
            repr: Repr::Materialized(value),
            lock_count,
            initialized: true,
        }
    }

    /// Representation.
    #[inline]
    pub fn repr(&self) -> &Repr {
        &self.repr
    }

    /// Check if the object is still virtual.
    #[inline]
    pub fn is_virtual(&self) -> bool {
        matches!(self.repr, Repr::Virtual(_))
    }

    /// The materialized value, if any.
    #[inline]
    pub fn materialized_value(&self) -> Option<NodeId> {
        match self.repr {
            Repr::Materialized(value) => Some(value),
            Repr::Virtual(_) => None,
        }
    }

    /// Slots of a virtual object.
    #[inline]
    pub fn entries(&self) -> Option<&[Entry]> {
        match &self.repr {
            Repr::Virtual(entries) => Some(entries),
            Repr::Materialized(_) => None,
        }
    }

    /// One slot of a virtual object.
    pub fn entry(&self, index: usize) -> Option<Entry> {
        self.entries().and_then(|entries| entries.get(index).copied())
    }

    /// Overwrite one slot of a virtual object.
    ///
    /// # Panics
    ///
    /// Panics if the object is materialized.
    pub fn set_entry(&mut self, index: usize, entry: Entry) {
        match &mut self.repr {
            Repr::Virtual(entries) => entries[index] = entry,
            Repr::Materialized(_) => panic!("store into the slots of a materialized object"),
        }
    }

    /// Record that the object is now allocated by `value`.
    pub fn set_materialized(&mut self, value: NodeId) {
        self.repr = Repr::Materialized(value);
        self.initialized = true;
    }

    /// Records referenced from the slots.
    pub fn referenced_records(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.entries().into_iter().flatten().filter_map(|entry| match entry {
            Entry::Object(record) => Some(*record),
            Entry::Value(_) => None,
        })
    }
}
