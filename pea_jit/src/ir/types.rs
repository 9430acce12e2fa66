//! Value kinds and the type registry.
//!
//! Two layers:
//! - [`ValueKind`]: the machine-level kind of an IR value (what a phi of it
//!   holds, what its default is).
//! - [`TypeRegistry`]: class and array types with their field layouts. It is
//!   the metadata provider the escape analysis asks for a type's fields, for
//!   subtype checks and for array component kinds.

use std::fmt;

// =============================================================================
// Value Kinds
// =============================================================================

/// Kind of value produced by an IR node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// 64-bit signed integer.
    Int,
    /// Boolean.
    Bool,
    /// Object reference (possibly null).
    Object,
    /// Type hub (the class pointer of an object).
    Hub,
    /// Control token, not a value.
    Control,
    /// No result.
    Void,
}

impl ValueKind {
    /// Whether nodes of this kind produce a data value.
    #[inline]
    pub const fn is_value(self) -> bool {
        !matches!(self, ValueKind::Control | ValueKind::Void)
    }

    /// Meet of two kinds at a phi. Mismatching value kinds collapse to Object
    /// which the verifier reports.
    pub fn meet(self, other: ValueKind) -> ValueKind {
        if self == other {
            self
        } else {
            ValueKind::Object
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Int => "int",
            ValueKind::Bool => "bool",
            ValueKind::Object => "object",
            ValueKind::Hub => "hub",
            ValueKind::Control => "control",
            ValueKind::Void => "void",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Type and Field Handles
// =============================================================================

/// Handle of a class or array type in a [`TypeRegistry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(pub u32);

/// Handle of a declared instance field in a [`TypeRegistry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldId(pub u32);

impl TypeId {
    /// The root class every other type derives from.
    pub const OBJECT: TypeId = TypeId(0);
}

/// A declared instance field.
#[derive(Clone, Debug)]
pub struct FieldDesc {
    /// Field name, used in logs and renderings.
    pub name: String,
    /// Value kind stored in the field.
    pub kind: ValueKind,
    /// Declaring class.
    pub holder: TypeId,
}

/// Shape of a registered type.
#[derive(Clone, Debug)]
pub enum TypeShape {
    /// A class with an optional supertype and its own declared fields.
    Class {
        super_type: Option<TypeId>,
        declared: Vec<FieldId>,
    },
    /// An array whose elements have the given kind.
    Array { component: ValueKind },
}

/// A registered type.
#[derive(Clone, Debug)]
pub struct TypeDesc {
    /// Type name.
    pub name: String,
    /// Class or array shape.
    pub shape: TypeShape,
}

// =============================================================================
// Type Registry
// =============================================================================

/// Class and array metadata shared by the IR, the passes and the interpreter.
///
/// Instance layouts place inherited fields first, in declaration order, so a
/// field keeps its slot in every subclass.
#[derive(Clone, Debug)]
pub struct TypeRegistry {
    types: Vec<TypeDesc>,
    fields: Vec<FieldDesc>,
}

impl TypeRegistry {
    /// Create a registry holding only the root `Object` class.
    pub fn new() -> Self {
        TypeRegistry {
            types: vec![TypeDesc {
                name: "Object".to_string(),
                shape: TypeShape::Class {
                    super_type: None,
                    declared: Vec::new(),
                },
            }],
            fields: Vec::new(),
        }
    }

    /// Register a class. `super_type` defaults to `Object`.
    pub fn add_class(&mut self, name: &str, super_type: Option<TypeId>) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeDesc {
            name: name.to_string(),
            shape: TypeShape::Class {
                super_type: Some(super_type.unwrap_or(TypeId::OBJECT)),
                declared: Vec::new(),
            },
        });
        id
    }

    /// Declare an instance field on a class.
    ///
    /// # Panics
    ///
    /// Panics if `holder` is an array type.
    pub fn add_field(&mut self, holder: TypeId, name: &str, kind: ValueKind) -> FieldId {
        let id = FieldId(self.fields.len() as u32);
        match &mut self.types[holder.0 as usize].shape {
            TypeShape::Class { declared, .. } => declared.push(id),
            TypeShape::Array { .. } => panic!("cannot declare field {name} on an array type"),
        }
        self.fields.push(FieldDesc {
            name: name.to_string(),
            kind,
            holder,
        });
        id
    }

    /// Register an array type with the given component kind.
    pub fn add_array(&mut self, name: &str, component: ValueKind) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeDesc {
            name: name.to_string(),
            shape: TypeShape::Array { component },
        });
        id
    }

    /// Look up a type.
    #[inline]
    pub fn ty(&self, id: TypeId) -> &TypeDesc {
        &self.types[id.0 as usize]
    }

    /// Look up a field.
    #[inline]
    pub fn field(&self, id: FieldId) -> &FieldDesc {
        &self.fields[id.0 as usize]
    }

    /// Type name.
    pub fn name(&self, id: TypeId) -> &str {
        &self.ty(id).name
    }

    /// Whether `id` is an array type.
    pub fn is_array(&self, id: TypeId) -> bool {
        matches!(self.ty(id).shape, TypeShape::Array { .. })
    }

    /// Component kind of an array type.
    pub fn component(&self, id: TypeId) -> Option<ValueKind> {
        match self.ty(id).shape {
            TypeShape::Array { component } => Some(component),
            TypeShape::Class { .. } => None,
        }
    }

    /// Direct supertype. Arrays derive from `Object`.
    pub fn super_type(&self, id: TypeId) -> Option<TypeId> {
        match self.ty(id).shape {
            TypeShape::Class { super_type, .. } => super_type,
            TypeShape::Array { .. } => Some(TypeId::OBJECT),
        }
    }

    /// Whether `sub` is `sup` or derives from it.
    pub fn is_subtype_of(&self, sub: TypeId, sup: TypeId) -> bool {
        let mut current = Some(sub);
        while let Some(ty) = current {
            if ty == sup {
                return true;
            }
            current = self.super_type(ty);
        }
        false
    }

    /// All instance fields of a class, inherited first. Empty for arrays.
    pub fn layout(&self, id: TypeId) -> Vec<FieldId> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(ty) = current {
            if let TypeShape::Class { declared, .. } = &self.ty(ty).shape {
                chain.push(declared.as_slice());
            }
            current = match self.ty(ty).shape {
                TypeShape::Class { super_type, .. } => super_type,
                TypeShape::Array { .. } => None,
            };
        }
        chain.iter().rev().flat_map(|fields| fields.iter().copied()).collect()
    }

    /// Slot of `field` in instances of `ty`, if `ty` has that field.
    pub fn slot_of(&self, ty: TypeId, field: FieldId) -> Option<usize> {
        self.layout(ty).iter().position(|&f| f == field)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
