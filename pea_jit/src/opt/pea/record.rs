//! Escape records and the allocation capability.
//!
//! An [`EscapeRecord`] is the immutable identity of one tracked allocation:
//! its type, its field layout and the `VirtualObject` node standing for it
//! in snapshots. Records live in an arena owned by one iteration; per-path
//! facts about them live in [`super::object_state::ObjectState`].

use std::fmt;

use smallvec::SmallVec;

use crate::ir::arena::Id;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{MemoryOp, Operator, VirtualOp};
use crate::ir::types::{FieldId, TypeId, TypeRegistry, ValueKind};

use super::config::PeaConfig;

/// Handle of an [`EscapeRecord`].
pub type RecordId = Id<EscapeRecord>;

/// Slot of a tracked object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKey {
    /// A declared instance field.
    Field(FieldId),
    /// An array element.
    Index(u32),
}

/// One slot of a tracked object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscapeField {
    /// Which field or element.
    pub key: FieldKey,
    /// Kind of the values stored in it.
    pub kind: ValueKind,
}

/// Identity and layout of a tracked allocation.
#[derive(Debug, Clone)]
pub struct EscapeRecord {
    /// Allocated type.
    pub ty: TypeId,
    /// Type name, for logs.
    pub type_name: String,
    /// Slots, in layout order.
    pub fields: SmallVec<[EscapeField; 4]>,
    /// Placeholder node used in snapshots and eliminated monitors.
    pub virtual_object: NodeId,
    /// The allocation node the record was created for.
    pub allocation: NodeId,
    /// Virtual object id, unique within the graph.
    pub id: u32,
    /// Whether the slots are array elements.
    pub array: bool,
}

impl EscapeRecord {
    /// Number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the object has no slots.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check if the record describes an array.
    pub fn is_array(&self) -> bool {
        self.array
    }

    /// Slot of a declared field.
    pub fn field_index(&self, field: FieldId) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.key == FieldKey::Field(field))
    }

    /// Slot of an array element, if `index` is in bounds.
    pub fn element_index(&self, index: i64) -> Option<usize> {
        let index = usize::try_from(index).ok()?;
        match self.fields.get(index) {
            Some(EscapeField {
                key: FieldKey::Index(_),
                ..
            }) => Some(index),
            _ => None,
        }
    }
}

impl fmt::Display for EscapeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_name, self.id)
    }
}

// =============================================================================
// Allocation Capability
// =============================================================================

/// What an escape-analyzable allocation node exposes.
#[derive(Debug, Clone)]
pub struct EscapeOp {
    /// Allocated type.
    pub ty: TypeId,
    /// Slots of the new object.
    pub fields: SmallVec<[EscapeField; 4]>,
    /// Existing placeholder, when re-analyzing an earlier materialization.
    pub virtual_object: Option<(NodeId, u32)>,
    /// Initial slot values. `None` means every slot starts at its default.
    pub values: Option<Vec<NodeId>>,
    /// Whether the allocation is an array.
    pub array: bool,
}

/// Describe `node` as an escape-analyzable allocation.
///
/// Instances are always analyzable. Arrays need a constant length of at most
/// `config.max_array_length`. A `MaterializeObject` left by an earlier round
/// is analyzable again, with its values as initial slot values.
pub fn escape_op(
    graph: &Graph,
    types: &TypeRegistry,
    config: &PeaConfig,
    node: NodeId,
) -> Option<EscapeOp> {
    match graph.op(node) {
        Operator::Memory(MemoryOp::NewInstance(ty)) => {
            if types.is_array(ty) {
                return None;
            }
            let fields = types
                .layout(ty)
                .into_iter()
                .map(|field| EscapeField {
                    key: FieldKey::Field(field),
                    kind: types.field(field).kind,
                })
                .collect();
            Some(EscapeOp {
                ty,
                fields,
                virtual_object: None,
                values: None,
                array: false,
            })
        }
        Operator::Memory(MemoryOp::NewArray(ty)) => {
            let component = types.component(ty)?;
            let length = graph.node(graph.input(node, 1)?).as_int()?;
            if length < 0 || length as usize > config.max_array_length {
                return None;
            }
            Some(EscapeOp {
                ty,
                fields: array_fields(length as usize, component),
                virtual_object: None,
                values: None,
                array: true,
            })
        }
        Operator::Virtual(VirtualOp::MaterializeObject) => {
            let vo = graph.input(node, 1)?;
            let Operator::Virtual(VirtualOp::VirtualObject { id, ty }) = graph.op(vo) else {
                return None;
            };
            let values: Vec<NodeId> = graph.node(node).inputs.iter().skip(2).collect();
            let fields = match types.component(ty) {
                Some(component) => array_fields(values.len(), component),
                None => types
                    .layout(ty)
                    .into_iter()
                    .map(|field| EscapeField {
                        key: FieldKey::Field(field),
                        kind: types.field(field).kind,
                    })
                    .collect(),
            };
            if fields.len() != values.len() {
                return None;
            }
            Some(EscapeOp {
                ty,
                fields,
                virtual_object: Some((vo, id)),
                values: Some(values),
                array: types.is_array(ty),
            })
        }
        _ => None,
    }
}

fn array_fields(length: usize, component: ValueKind) -> SmallVec<[EscapeField; 4]> {
    (0..length as u32)
        .map(|i| EscapeField {
            key: FieldKey::Index(i),
            kind: component,
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{ArithmeticBuilder, GraphBuilder, ObjectBuilder};

    #[test]
    fn test_instance_fields_follow_layout() {
        let mut types = TypeRegistry::new();
        let base = types.add_class("Base", None);
        let a = types.add_field(base, "a", ValueKind::Int);
        let point = types.add_class("Point", Some(base));
        types.add_field(point, "b", ValueKind::Object);

        let mut builder = GraphBuilder::new(&[]);
        let alloc = builder.new_instance(point);
        let graph = builder.graph();

        let op = escape_op(graph, &types, &PeaConfig::default(), alloc).unwrap();
        assert_eq!(op.ty, point);
        assert_eq!(op.fields.len(), 2);
        assert_eq!(op.fields[0].key, FieldKey::Field(a));
        assert_eq!(op.fields[1].kind, ValueKind::Object);
        assert!(op.values.is_none());
        assert!(op.virtual_object.is_none());
        assert!(!op.array);
    }

    #[test]
    fn test_array_needs_small_constant_length() {
        let mut types = TypeRegistry::new();
        let ints = types.add_array("int[]", ValueKind::Int);
        let config = PeaConfig::default();

        let mut builder = GraphBuilder::new(&[ValueKind::Int]);
        let n = builder.parameter(0);
        let three = builder.const_int(3);
        let huge = builder.const_int(config.max_array_length as i64 + 1);
        let small = builder.new_array(ints, three);
        let unknown = builder.new_array(ints, n);
        let large = builder.new_array(ints, huge);
        let graph = builder.graph();

        let op = escape_op(graph, &types, &config, small).unwrap();
        assert_eq!(op.fields.len(), 3);
        assert_eq!(op.fields[2].key, FieldKey::Index(2));
        assert!(escape_op(graph, &types, &config, unknown).is_none());
        assert!(escape_op(graph, &types, &config, large).is_none());
    }

    #[test]
    fn test_element_index_bounds() {
        let record = EscapeRecord {
            ty: TypeId(1),
            type_name: "int[]".into(),
            fields: array_fields(2, ValueKind::Int),
            virtual_object: NodeId::INVALID,
            allocation: NodeId::INVALID,
            id: 4,
            array: true,
        };
        assert_eq!(record.element_index(1), Some(1));
        assert_eq!(record.element_index(2), None);
        assert_eq!(record.element_index(-1), None);
        assert!(record.is_array());
        assert_eq!(record.to_string(), "int[]#4");
    }
}
