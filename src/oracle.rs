//! The runtime oracle contract (§6): method/field/type resolution, class
//! hierarchy queries, profile data, and constant reflection. Implemented by
//! the host; this crate only consumes it. Oracles are read-only after
//! initialization and must be safe to share across compilation threads, so
//! the trait requires `Send + Sync` and the driver holds it behind an `Arc`.

use std::sync::Arc;

use crate::stamp::{Stamp, TypeHierarchy};

/// An opaque handle to a resolved class/type, as produced by the oracle.
/// The compiler never interprets the bits; it only passes them back to the
/// oracle for further queries or compares them for identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TypeRef(pub u32);

/// An opaque handle to a resolved method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MethodRef(pub u32);

/// An opaque handle to a resolved field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldRef(pub u32);

/// A literal value as seen by constant reflection: either it fits in the
/// stamp lattice directly (ints/floats/object references) or it's a class
/// hub identity used by type guards.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConstantValue {
    /// A signed integer of the given bit width.
    Int { bits: u8, value: i64 },
    /// A 32 or 64-bit float.
    Float { bits: u8, value: f64 },
    /// The null reference.
    Null,
    /// A non-null object reference of known (possibly approximate) type.
    Object { ty: TypeRef, exact: bool },
    /// The runtime's constant identity for a type's hub/vtable, used by
    /// type-guard comparisons (`objectHub`).
    Hub(TypeRef),
}

/// Per-bytecode-index profiling data: how often each successor of a branch
/// was taken, and which concrete receiver types were observed at a
/// polymorphic call site.
#[derive(Clone, Debug, Default)]
pub struct ProfileAtBci {
    /// Observed taken-probability for each successor edge, in the order the
    /// bytecode defines them (e.g. `[not-taken, taken]` for a two-way branch).
    pub branch_probabilities: Vec<f64>,
    /// Receiver type histogram: `(type, fraction of calls)`, sorted by
    /// descending fraction. Empty when no profile was collected.
    pub receiver_histogram: Vec<(TypeRef, f64)>,
}

impl ProfileAtBci {
    /// Is a single receiver type responsible for (approximately) all calls
    /// observed at this site? `threshold` is typically 1.0 minus some
    /// epsilon for profile noise.
    pub fn monomorphic_receiver(&self, threshold: f64) -> Option<TypeRef> {
        match self.receiver_histogram.first() {
            Some(&(ty, frac)) if frac >= threshold => Some(ty),
            _ => None,
        }
    }
}

/// Bytecode plus the exception table and local-variable table needed to
/// build frame states, as returned by `methodCode`.
#[derive(Clone, Debug, Default)]
pub struct MethodCode {
    /// Raw bytecode.
    pub bytecode: Vec<u8>,
    /// `(start_bci, end_bci, handler_bci, catch_type)` tuples.
    pub exception_table: Vec<(u32, u32, u32, Option<TypeRef>)>,
    /// Number of local-variable slots live across the method.
    pub max_locals: u32,
}

/// The contract a host runtime must implement so this crate can resolve
/// names, query the class hierarchy, and read profiling data. Read-only
/// after construction; implementations must be thread-safe since a single
/// oracle is shared by every worker in the driver's pool.
pub trait RuntimeOracle: Send + Sync {
    /// Resolve a class/type name to a `TypeRef`, or `None` if unresolvable
    /// (callers fall back to an unresolved-reference deopt node, §7
    /// `LinkageError`).
    fn lookup_type(&self, class_name: &str) -> Option<TypeRef>;

    /// Resolve a method reference.
    fn lookup_method(&self, holder: TypeRef, name: &str, descriptor: &str) -> Option<MethodRef>;

    /// Resolve a field reference.
    fn lookup_field(&self, holder: TypeRef, name: &str) -> Option<FieldRef>;

    /// Reflect a constant pool entry into a `ConstantValue`.
    fn lookup_constant(&self, index: u32) -> Option<ConstantValue>;

    /// Is every instance of `a` also an instance of `b`?
    fn assignable_from(&self, sub: TypeRef, sup: TypeRef) -> bool;

    /// The least common ancestor of two types in the class hierarchy, or
    /// `None` if they share none (can only happen for unrelated interfaces).
    fn least_common_ancestor(&self, a: TypeRef, b: TypeRef) -> Option<TypeRef>;

    /// Is `t` an abstract class or interface (no instances of exactly `t`)?
    fn is_abstract(&self, t: TypeRef) -> bool;

    /// Is `t` an array type?
    fn is_array(&self, t: TypeRef) -> bool;

    /// Is `t` an interface?
    fn is_interface(&self, t: TypeRef) -> bool;

    /// Fetch a method's bytecode and side tables.
    fn method_code(&self, m: MethodRef) -> Option<MethodCode>;

    /// Fetch profiling data for a method, keyed by bytecode index.
    fn profile(&self, m: MethodRef, bci: u32) -> ProfileAtBci;

    /// The constant identity used by type guards to compare a receiver's
    /// hub against an expected type.
    fn object_hub(&self, t: TypeRef) -> ConstantValue;

    /// The narrowest stamp for a resolved type, used by `Stamp::constant`
    /// and by object-stamp declared-type construction.
    fn stamp_for_type(&self, t: TypeRef) -> Stamp;
}

/// A shared, thread-safe handle to a `RuntimeOracle` implementation.
pub type OracleHandle = Arc<dyn RuntimeOracle>;

/// An `OracleHandle` is itself a `TypeHierarchy` (forwarding through the
/// `Arc`), so a driver holding only the type-erased handle can still pass
/// it anywhere a pass wants `&dyn TypeHierarchy` without re-threading the
/// concrete oracle type through.
impl TypeHierarchy for OracleHandle {
    fn assignable_from(&self, sub: TypeRef, sup: TypeRef) -> bool {
        RuntimeOracle::assignable_from(self.as_ref(), sub, sup)
    }

    fn least_common_ancestor(&self, a: TypeRef, b: TypeRef) -> Option<TypeRef> {
        RuntimeOracle::least_common_ancestor(self.as_ref(), a, b)
    }

    fn is_interface(&self, t: TypeRef) -> bool {
        RuntimeOracle::is_interface(self.as_ref(), t)
    }

    fn is_concrete(&self, t: TypeRef) -> bool {
        !RuntimeOracle::is_abstract(self.as_ref(), t) && !RuntimeOracle::is_interface(self.as_ref(), t)
    }
}

/// Every oracle is automatically a `TypeHierarchy`: the stamp lattice only
/// ever needs this read-only slice of the full contract.
impl<T: RuntimeOracle + ?Sized> TypeHierarchy for T {
    fn assignable_from(&self, sub: TypeRef, sup: TypeRef) -> bool {
        RuntimeOracle::assignable_from(self, sub, sup)
    }

    fn least_common_ancestor(&self, a: TypeRef, b: TypeRef) -> Option<TypeRef> {
        RuntimeOracle::least_common_ancestor(self, a, b)
    }

    fn is_interface(&self, t: TypeRef) -> bool {
        RuntimeOracle::is_interface(self, t)
    }

    fn is_concrete(&self, t: TypeRef) -> bool {
        !RuntimeOracle::is_abstract(self, t) && !RuntimeOracle::is_interface(self, t)
    }
}
