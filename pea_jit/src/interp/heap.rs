//! Heap of the reference interpreter.
//!
//! Objects never move and are never freed; a reference is an index. The
//! heap also renders values *deeply*: object identity is replaced by
//! structure, with back references for sharing and cycles. Renderings of
//! an original and an optimized graph can therefore be compared although
//! the optimized one allocates fewer (or differently ordered) objects.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::ir::types::{TypeId, TypeRegistry, ValueKind};

// =============================================================================
// Values
// =============================================================================

/// Reference to a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef(u32);

impl ObjectRef {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A runtime value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Null,
    Hub(TypeId),
    Ref(ObjectRef),
}

impl Value {
    /// The default of a field or array element of `kind`.
    pub fn default_of(kind: ValueKind) -> Value {
        match kind {
            ValueKind::Int => Value::Int(0),
            ValueKind::Bool => Value::Bool(false),
            _ => Value::Null,
        }
    }
}

// =============================================================================
// Objects
// =============================================================================

/// A heap object. Arrays and instances share the representation: instance
/// slots follow the type's field layout.
#[derive(Debug, Clone)]
pub struct HeapObject {
    pub ty: TypeId,
    pub slots: Vec<Value>,
    pub locks: u32,
}

/// All objects allocated by one execution.
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<HeapObject>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an object with the given slot values.
    pub fn alloc(&mut self, ty: TypeId, slots: Vec<Value>) -> ObjectRef {
        let r = ObjectRef(self.objects.len() as u32);
        self.objects.push(HeapObject { ty, slots, locks: 0 });
        r
    }

    /// Allocate an instance of `ty` with every field at its default.
    pub fn alloc_instance(&mut self, types: &TypeRegistry, ty: TypeId) -> ObjectRef {
        let slots = types
            .layout(ty)
            .into_iter()
            .map(|field| Value::default_of(types.field(field).kind))
            .collect();
        self.alloc(ty, slots)
    }

    #[inline]
    pub fn get(&self, r: ObjectRef) -> &HeapObject {
        &self.objects[r.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, r: ObjectRef) -> &mut HeapObject {
        &mut self.objects[r.index()]
    }

    /// Number of allocated objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Render one value.
    pub fn render(&self, value: Value) -> Rendered {
        self.render_all(&[value]).pop().unwrap_or(Rendered::Null)
    }

    /// Render several values in one pass, so an object reachable from more
    /// than one of them is expanded once and referenced afterwards.
    pub fn render_all(&self, values: &[Value]) -> Vec<Rendered> {
        let mut seen = FxHashMap::default();
        values
            .iter()
            .map(|&value| self.render_value(value, &mut seen))
            .collect()
    }

    fn render_value(&self, value: Value, seen: &mut FxHashMap<ObjectRef, usize>) -> Rendered {
        match value {
            Value::Int(v) => Rendered::Int(v),
            Value::Bool(v) => Rendered::Bool(v),
            Value::Null => Rendered::Null,
            Value::Hub(ty) => Rendered::Hub(ty),
            Value::Ref(r) => {
                if let Some(&index) = seen.get(&r) {
                    return Rendered::Back(index);
                }
                let index = seen.len();
                seen.insert(r, index);
                let object = self.get(r);
                let slots = object
                    .slots
                    .iter()
                    .map(|&slot| self.render_value(slot, seen))
                    .collect();
                Rendered::Object {
                    ty: object.ty,
                    slots,
                    locks: object.locks,
                }
            }
        }
    }
}

// =============================================================================
// Rendering
// =============================================================================

/// Identity-free description of a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Int(i64),
    Bool(bool),
    Null,
    Hub(TypeId),
    Object {
        ty: TypeId,
        slots: Vec<Rendered>,
        locks: u32,
    },
    /// The `n`th object expanded earlier in the same rendering.
    Back(usize),
}

impl fmt::Display for Rendered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rendered::Int(v) => write!(f, "{}", v),
            Rendered::Bool(v) => write!(f, "{}", v),
            Rendered::Null => f.write_str("null"),
            Rendered::Hub(ty) => write!(f, "hub({})", ty.0),
            Rendered::Object { ty, slots, locks } => {
                write!(f, "T{}{{", ty.0)?;
                for (i, slot) in slots.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", slot)?;
                }
                f.write_str("}")?;
                if *locks > 0 {
                    write!(f, " locked x{}", locks)?;
                }
                Ok(())
            }
            Rendered::Back(index) => write!(f, "@{}", index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_defaults_follow_layout() {
        let mut types = TypeRegistry::new();
        let base = types.add_class("Base", None);
        types.add_field(base, "flag", ValueKind::Bool);
        let derived = types.add_class("Derived", Some(base));
        types.add_field(derived, "n", ValueKind::Int);
        types.add_field(derived, "next", ValueKind::Object);

        let mut heap = Heap::new();
        let r = heap.alloc_instance(&types, derived);
        assert_eq!(
            heap.get(r).slots,
            vec![Value::Bool(false), Value::Int(0), Value::Null]
        );
    }

    #[test]
    fn test_render_shares_and_cycles() {
        let mut heap = Heap::new();
        let a = heap.alloc(TypeId(1), vec![Value::Null]);
        let b = heap.alloc(TypeId(1), vec![Value::Ref(a)]);
        heap.get_mut(a).slots[0] = Value::Ref(b);

        let rendered = heap.render_all(&[Value::Ref(a), Value::Ref(b), Value::Int(4)]);
        let expected_a = Rendered::Object {
            ty: TypeId(1),
            slots: vec![Rendered::Object {
                ty: TypeId(1),
                slots: vec![Rendered::Back(0)],
                locks: 0,
            }],
            locks: 0,
        };
        assert_eq!(rendered, vec![expected_a, Rendered::Back(1), Rendered::Int(4)]);
        assert_eq!(rendered[0].to_string(), "T1{T1{@0}}");
    }

    #[test]
    fn test_distinct_objects_render_equal() {
        let mut heap = Heap::new();
        let a = heap.alloc(TypeId(2), vec![Value::Int(1)]);
        let b = heap.alloc(TypeId(2), vec![Value::Int(1)]);
        assert_eq!(heap.render(Value::Ref(a)), heap.render(Value::Ref(b)));
        assert_ne!(
            heap.render_all(&[Value::Ref(a), Value::Ref(a)]),
            heap.render_all(&[Value::Ref(a), Value::Ref(b)])
        );
    }
}
