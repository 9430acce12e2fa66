//! IR operator definitions.
//!
//! Operators are organized by category:
//! - **Constants**: integers, booleans, null, type hubs, parameters
//! - **Arithmetic / comparison**: integer math and relational tests
//! - **Control**: blocks, branches, merges, loops, returns, deoptimization
//! - **Memory**: allocation, field and element access, raw memory
//! - **Virtual**: nodes created by escape analysis and deopt snapshots
//!
//! An operator is either *fixed* (part of the control chain, control
//! predecessor in input 0) or *floating* (placed only by its data inputs).
//!
//! # Input Conventions
//!
//! | Operator | Inputs |
//! |---|---|
//! | `If` | control, condition |
//! | `IfTrue` / `IfFalse` | if |
//! | `End` / `LoopEnd` | control |
//! | `Region` | ends... |
//! | `Loop` | forward end, loop ends... |
//! | `LoopExit` | control, loop |
//! | `Return` | control, value? |
//! | `Deopt` | control (snapshot in `state_after`) |
//! | `Phi` | region, values... |
//! | `LoopPhi` | loop, forward value, back values... |
//! | `ValueProxy` | value, loop exit |
//! | `NewInstance` | control |
//! | `NewArray` | control, length |
//! | `LoadField` / `StoreField` | control, object (, value) |
//! | `LoadIndexed` / `StoreIndexed` | control, array, index (, value) |
//! | `MaterializeObject` | control, virtual object, values... |
//! | `CyclicStore` | control, object, value |
//! | `FrameState` | locals..., object mappings... |
//! | `VirtualObjectState` | virtual object, field values... |
//! | `MaterializedObjectState` | virtual object, materialized value |

use super::types::{FieldId, TypeId, ValueKind};

// =============================================================================
// Arithmetic Operators
// =============================================================================

/// Integer arithmetic operator kind. All operations wrap on overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArithOp {
    /// Addition: a + b
    Add = 0,
    /// Subtraction: a - b
    Sub = 1,
    /// Multiplication: a * b
    Mul = 2,
    /// Bitwise and: a & b
    And = 3,
    /// Bitwise or: a | b
    Or = 4,
    /// Bitwise xor: a ^ b
    Xor = 5,
}

impl ArithOp {
    /// Check if this operation is commutative.
    #[inline]
    pub const fn is_commutative(self) -> bool {
        !matches!(self, ArithOp::Sub)
    }

    /// Evaluate on two integers.
    #[inline]
    pub const fn apply(self, a: i64, b: i64) -> i64 {
        match self {
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul => a.wrapping_mul(b),
            ArithOp::And => a & b,
            ArithOp::Or => a | b,
            ArithOp::Xor => a ^ b,
        }
    }
}

// =============================================================================
// Comparison Operators
// =============================================================================

/// Integer comparison operator kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CmpOp {
    /// Less than: a < b
    Lt = 0,
    /// Less than or equal: a <= b
    Le = 1,
    /// Equal: a == b
    Eq = 2,
    /// Not equal: a != b
    Ne = 3,
    /// Greater than: a > b
    Gt = 4,
    /// Greater than or equal: a >= b
    Ge = 5,
}

impl CmpOp {
    /// Get the inverse of this comparison.
    #[inline]
    pub const fn inverse(self) -> Self {
        match self {
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
        }
    }

    /// Check if this comparison is commutative.
    #[inline]
    pub const fn is_commutative(self) -> bool {
        matches!(self, CmpOp::Eq | CmpOp::Ne)
    }

    /// Evaluate on two integers.
    #[inline]
    pub const fn apply(self, a: i64, b: i64) -> bool {
        match self {
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        }
    }
}

// =============================================================================
// Control Operators
// =============================================================================

/// Control flow operator kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlOp {
    /// Method entry.
    Start = 0,
    /// Two-way branch on a boolean.
    If = 1,
    /// Taken branch of an `If`.
    IfTrue = 2,
    /// Not-taken branch of an `If`.
    IfFalse = 3,
    /// Control merge.
    Region = 4,
    /// Forward jump into a `Region` or `Loop`.
    End = 5,
    /// Loop header.
    Loop = 6,
    /// Back edge into a `Loop`.
    LoopEnd = 7,
    /// Marks control leaving a loop.
    LoopExit = 8,
    /// Method return.
    Return = 9,
    /// Transfer to the unoptimized tier using the attached snapshot.
    Deopt = 10,
}

impl ControlOp {
    /// Whether this operator begins a basic block.
    #[inline]
    pub const fn is_block_begin(self) -> bool {
        matches!(
            self,
            ControlOp::Start
                | ControlOp::Region
                | ControlOp::Loop
                | ControlOp::IfTrue
                | ControlOp::IfFalse
        )
    }

    /// Whether this operator ends a basic block.
    #[inline]
    pub const fn is_block_end(self) -> bool {
        matches!(
            self,
            ControlOp::If
                | ControlOp::End
                | ControlOp::LoopEnd
                | ControlOp::Return
                | ControlOp::Deopt
        )
    }
}

// =============================================================================
// Memory Operators
// =============================================================================

/// Heap operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOp {
    /// Allocate an instance with all fields at their default.
    NewInstance(TypeId),
    /// Allocate an array of the given type.
    NewArray(TypeId),
    /// Read an instance field.
    LoadField(FieldId),
    /// Write an instance field.
    StoreField(FieldId),
    /// Read an array element.
    LoadIndexed,
    /// Write an array element.
    StoreIndexed,
    /// Read an array's length.
    ArrayLength,
    /// Read an object's type hub.
    ReadHub,
    /// Raw read of slot `offset`.
    UnsafeLoad,
    /// Raw write of slot `offset`.
    UnsafeStore,
    /// Raw compare-and-swap of slot `offset`.
    CompareAndSwap,
}

/// Monitor operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorOp {
    /// Acquire an object's monitor.
    Enter,
    /// Release an object's monitor.
    Exit,
}

// =============================================================================
// Virtual Operators
// =============================================================================

/// Escape-analysis and snapshot operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VirtualOp {
    /// Placeholder identity of an allocation that exists only in the
    /// compiler. Never scheduled and never evaluated.
    VirtualObject { id: u32, ty: TypeId },
    /// Allocation of a previously virtual object with all its values.
    MaterializeObject,
    /// Patch of a slot of a just-materialized object that refers back into
    /// its own materialization group.
    CyclicStore(u32),
    /// Deoptimization snapshot: `locals` local values followed by mappings.
    FrameState { bci: u32, locals: u16 },
    /// Describes a virtual object in a snapshot by its field values.
    VirtualObjectState { locks: u32 },
    /// Describes a virtual object in a snapshot by its materialized value.
    MaterializedObjectState,
}

// =============================================================================
// Operator (Unified)
// =============================================================================

/// Unified operator representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    // Constants
    /// Integer constant.
    ConstInt(i64),
    /// Boolean constant.
    ConstBool(bool),
    /// Null reference.
    ConstNull,
    /// Type hub constant.
    ConstHub(TypeId),
    /// Method parameter.
    Parameter(u16),

    // Arithmetic
    /// Integer arithmetic.
    IntOp(ArithOp),
    /// Integer comparison.
    IntCmp(CmpOp),

    // Control flow
    /// Control operation.
    Control(ControlOp),

    // SSA
    /// Value merge at a `Region`.
    Phi,
    /// Value merge at a `Loop`.
    LoopPhi,
    /// Value defined inside a loop observed after one of its exits.
    ValueProxy,
    /// Re-typed view of an object value.
    Pi,

    // Heap
    /// Memory operation.
    Memory(MemoryOp),
    /// Monitor operation.
    Monitor(MonitorOp),

    // Type tests
    /// Cast that throws on a type mismatch; null passes.
    CheckCast(TypeId),
    /// Type test; false for null.
    InstanceOf(TypeId),
    /// Null test.
    IsNull,
    /// Reference equality.
    ObjectEquals,

    // Effects
    /// Register an object for finalization.
    RegisterFinalizer,
    /// Opaque call; arguments are inputs 1...
    Call(u32),

    // Escape analysis
    /// Virtual or snapshot operator.
    Virtual(VirtualOp),
}

impl Operator {
    /// Check if this operator is part of the control chain.
    pub const fn is_fixed(&self) -> bool {
        match self {
            Operator::Control(_)
            | Operator::Memory(_)
            | Operator::Monitor(_)
            | Operator::CheckCast(_)
            | Operator::RegisterFinalizer
            | Operator::Call(_) => true,
            Operator::Virtual(op) => matches!(
                op,
                VirtualOp::MaterializeObject | VirtualOp::CyclicStore(_)
            ),
            _ => false,
        }
    }

    /// Check if this operator begins a basic block.
    pub const fn is_block_begin(&self) -> bool {
        match self {
            Operator::Control(op) => op.is_block_begin(),
            _ => false,
        }
    }

    /// Check if this operator ends a basic block.
    pub const fn is_block_end(&self) -> bool {
        match self {
            Operator::Control(op) => op.is_block_end(),
            _ => false,
        }
    }

    /// Check if this operator is a constant.
    pub const fn is_constant(&self) -> bool {
        matches!(
            self,
            Operator::ConstInt(_) | Operator::ConstBool(_) | Operator::ConstNull | Operator::ConstHub(_)
        )
    }

    /// Check if this operator is a phi of either kind.
    pub const fn is_phi(&self) -> bool {
        matches!(self, Operator::Phi | Operator::LoopPhi)
    }

    /// Check if this is a snapshot operator (frame state or one of its
    /// object mappings).
    pub const fn is_virtual_state(&self) -> bool {
        matches!(
            self,
            Operator::Virtual(
                VirtualOp::FrameState { .. }
                    | VirtualOp::VirtualObjectState { .. }
                    | VirtualOp::MaterializedObjectState
            )
        )
    }

    /// Check if this operator is excluded from block schedules.
    pub const fn is_unscheduled(&self) -> bool {
        self.is_phi()
            || self.is_virtual_state()
            || matches!(self, Operator::Virtual(VirtualOp::VirtualObject { .. }))
    }

    /// Check if this operator is pure (no side effects, cannot trap).
    pub const fn is_pure(&self) -> bool {
        !self.is_fixed()
    }

    /// Result kind, where the operator alone determines it.
    ///
    /// Parameters, phis, proxies, loads and calls take their kind from the
    /// builder.
    pub const fn result_kind(&self) -> Option<ValueKind> {
        let kind = match self {
            Operator::ConstInt(_) => ValueKind::Int,
            Operator::ConstBool(_) => ValueKind::Bool,
            Operator::ConstNull => ValueKind::Object,
            Operator::ConstHub(_) => ValueKind::Hub,
            Operator::IntOp(_) => ValueKind::Int,
            Operator::IntCmp(_) => ValueKind::Bool,
            Operator::Control(_) => ValueKind::Control,
            Operator::Pi | Operator::CheckCast(_) => ValueKind::Object,
            Operator::InstanceOf(_) | Operator::IsNull | Operator::ObjectEquals => ValueKind::Bool,
            Operator::Monitor(_) | Operator::RegisterFinalizer => ValueKind::Void,
            Operator::Memory(op) => match op {
                MemoryOp::NewInstance(_) | MemoryOp::NewArray(_) => ValueKind::Object,
                MemoryOp::StoreField(_) | MemoryOp::StoreIndexed | MemoryOp::UnsafeStore => {
                    ValueKind::Void
                }
                MemoryOp::ArrayLength => ValueKind::Int,
                MemoryOp::ReadHub => ValueKind::Hub,
                MemoryOp::CompareAndSwap => ValueKind::Bool,
                MemoryOp::LoadField(_) | MemoryOp::LoadIndexed | MemoryOp::UnsafeLoad => {
                    return None
                }
            },
            Operator::Virtual(op) => match op {
                VirtualOp::VirtualObject { .. } | VirtualOp::MaterializeObject => ValueKind::Object,
                _ => ValueKind::Void,
            },
            Operator::Parameter(_)
            | Operator::Phi
            | Operator::LoopPhi
            | Operator::ValueProxy
            | Operator::Call(_) => return None,
        };
        Some(kind)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arith_op_apply() {
        assert_eq!(ArithOp::Add.apply(2, 3), 5);
        assert_eq!(ArithOp::Sub.apply(2, 3), -1);
        assert_eq!(ArithOp::Mul.apply(i64::MAX, 2), -2);
        assert!(ArithOp::Add.is_commutative());
        assert!(!ArithOp::Sub.is_commutative());
    }

    #[test]
    fn test_cmp_op_inverse() {
        assert_eq!(CmpOp::Lt.inverse(), CmpOp::Ge);
        assert_eq!(CmpOp::Eq.inverse(), CmpOp::Ne);
        for op in [CmpOp::Lt, CmpOp::Le, CmpOp::Eq, CmpOp::Ne, CmpOp::Gt, CmpOp::Ge] {
            assert_eq!(op.apply(1, 2), !op.inverse().apply(1, 2));
        }
    }

    #[test]
    fn test_fixed_and_floating() {
        assert!(Operator::Memory(MemoryOp::LoadIndexed).is_fixed());
        assert!(Operator::Call(0).is_fixed());
        assert!(Operator::Virtual(VirtualOp::MaterializeObject).is_fixed());
        assert!(!Operator::ObjectEquals.is_fixed());
        assert!(!Operator::Virtual(VirtualOp::VirtualObject { id: 0, ty: TypeId::OBJECT }).is_fixed());
        assert!(Operator::Control(ControlOp::If).is_block_end());
        assert!(Operator::Control(ControlOp::IfTrue).is_block_begin());
        assert!(!Operator::Control(ControlOp::LoopExit).is_block_begin());
    }

    #[test]
    fn test_unscheduled() {
        assert!(Operator::Phi.is_unscheduled());
        assert!(Operator::Virtual(VirtualOp::FrameState { bci: 0, locals: 0 }).is_unscheduled());
        assert!(!Operator::ValueProxy.is_unscheduled());
        assert!(!Operator::ConstInt(1).is_unscheduled());
    }

    #[test]
    fn test_result_kind() {
        assert_eq!(Operator::ConstNull.result_kind(), Some(ValueKind::Object));
        assert_eq!(
            Operator::Memory(MemoryOp::ArrayLength).result_kind(),
            Some(ValueKind::Int)
        );
        assert_eq!(Operator::Memory(MemoryOp::LoadIndexed).result_kind(), None);
        assert_eq!(Operator::Phi.result_kind(), None);
    }
}
