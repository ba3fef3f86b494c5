//! The stamp lattice: the abstract value domain every graph value carries.
//!
//! A stamp is an immutable, pure value; `meet`/`join`/`improveWith` never
//! mutate their operands and always return a fresh `Stamp`. Object-kind
//! operations need the class hierarchy, so they take a `&dyn TypeHierarchy`
//! — the minimal read-only slice of the runtime oracle (§6) this module
//! needs, kept separate from the full `RuntimeOracle` trait so this module
//! has no dependency on method/field/profile lookups it doesn't use.

use crate::oracle::{ConstantValue, TypeRef};

/// The read-only class-hierarchy queries object-stamp meet/join need.
/// `crate::oracle::RuntimeOracle` implements this for free (see the blanket
/// impl in `oracle.rs`).
pub trait TypeHierarchy {
    /// Is every instance of `sub` also an instance of `sup`?
    fn assignable_from(&self, sub: TypeRef, sup: TypeRef) -> bool;
    /// Least common ancestor, or `None` if the types share none.
    fn least_common_ancestor(&self, a: TypeRef, b: TypeRef) -> Option<TypeRef>;
    /// Is `t` an interface?
    fn is_interface(&self, t: TypeRef) -> bool;
    /// Is `t` a concrete (non-abstract, non-interface) class?
    fn is_concrete(&self, t: TypeRef) -> bool;
}

/// A lattice kind tag, used to remember which lattice an `Illegal`/empty
/// stamp belongs to (so `join` over incompatible kinds can still report an
/// illegal stamp "of the expected kind" rather than an untyped bottom).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StampKind {
    /// Integer of the given bit width.
    Integer(u8),
    /// Float of the given bit width (32 or 64).
    Float(u8),
    /// Object/pointer reference.
    Object,
    /// The void (no value) stamp.
    Void,
    /// A raw, untyped machine pointer.
    RawPointer,
}

/// An integer stamp: bit-width, signed/unsigned bounds, and known-bit
/// masks. Bounds and masks are always kept mutually consistent by
/// `normalize` after every operation that could desynchronize them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IntegerStamp {
    bits: u8,
    signed_min: i64,
    signed_max: i64,
    unsigned_min: u64,
    unsigned_max: u64,
    /// Bits that are known to be zero in every possible value.
    known_zero: u64,
    /// Bits that are known to be one in every possible value.
    known_one: u64,
}

impl IntegerStamp {
    fn mask(bits: u8) -> u64 {
        if bits >= 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        }
    }

    /// The full-range (unrestricted) stamp for this bit width.
    pub fn unrestricted(bits: u8) -> Self {
        let m = Self::mask(bits);
        let smin = if bits >= 64 {
            i64::MIN
        } else {
            -(1i64 << (bits - 1))
        };
        let smax = if bits >= 64 {
            i64::MAX
        } else {
            (1i64 << (bits - 1)) - 1
        };
        Self {
            bits,
            signed_min: smin,
            signed_max: smax,
            unsigned_min: 0,
            unsigned_max: m,
            known_zero: 0,
            known_one: 0,
        }
    }

    /// A single-value stamp for `value`, narrowed as far as the masks allow.
    pub fn constant(bits: u8, value: i64) -> Self {
        let m = Self::mask(bits);
        let bits_of_value = (value as u64) & m;
        Self {
            bits,
            signed_min: value,
            signed_max: value,
            unsigned_min: bits_of_value,
            unsigned_max: bits_of_value,
            known_zero: (!bits_of_value) & m,
            known_one: bits_of_value,
        }
    }

    /// Bit width.
    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Is this stamp a single known value?
    pub fn as_constant(&self) -> Option<i64> {
        (self.signed_min == self.signed_max).then_some(self.signed_min)
    }

    fn normalize(mut self) -> Self {
        let m = Self::mask(self.bits);
        self.known_zero &= m;
        self.known_one &= m;
        // Known-bit masks further constrain the unsigned range: any bit
        // known one raises the minimum, any bit known zero lowers the
        // maximum actually reachable within [unsigned_min, unsigned_max].
        if self.unsigned_min | self.known_one != self.unsigned_min {
            self.unsigned_min |= self.known_one;
        }
        self.unsigned_max &= !self.known_zero;
        self
    }

    /// Least upper bound: the narrowest stamp containing every value either
    /// operand could hold.
    pub fn meet(&self, other: &Self) -> Self {
        debug_assert_eq!(self.bits, other.bits);
        Self {
            bits: self.bits,
            signed_min: self.signed_min.min(other.signed_min),
            signed_max: self.signed_max.max(other.signed_max),
            unsigned_min: self.unsigned_min.min(other.unsigned_min),
            unsigned_max: self.unsigned_max.max(other.unsigned_max),
            known_zero: self.known_zero & other.known_zero,
            known_one: self.known_one & other.known_one,
        }
        .normalize()
    }

    /// Greatest lower bound, empty (represented by an inverted range) when
    /// the two ranges share no value and no bit pattern could satisfy both
    /// masks.
    pub fn join(&self, other: &Self) -> Option<Self> {
        debug_assert_eq!(self.bits, other.bits);
        let known_zero = self.known_zero | other.known_zero;
        let known_one = self.known_one | other.known_one;
        if known_zero & known_one != 0 {
            return None; // a bit required both zero and one: contradiction
        }
        let joined = Self {
            bits: self.bits,
            signed_min: self.signed_min.max(other.signed_min),
            signed_max: self.signed_max.min(other.signed_max),
            unsigned_min: self.unsigned_min.max(other.unsigned_min),
            unsigned_max: self.unsigned_max.min(other.unsigned_max),
            known_zero,
            known_one,
        };
        if joined.signed_min > joined.signed_max || joined.unsigned_min > joined.unsigned_max {
            None
        } else {
            Some(joined.normalize())
        }
    }
}

/// A float stamp: bit width, whether NaN is a possible value, and a bound
/// on the finite part of the range.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FloatStamp {
    bits: u8,
    may_be_nan: bool,
    lower: f64,
    upper: f64,
}

impl FloatStamp {
    /// The full-range stamp (may be NaN, `-inf..=inf`).
    pub fn unrestricted(bits: u8) -> Self {
        Self {
            bits,
            may_be_nan: true,
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        }
    }

    /// A single known float value.
    pub fn constant(bits: u8, value: f64) -> Self {
        Self {
            bits,
            may_be_nan: value.is_nan(),
            lower: value,
            upper: value,
        }
    }

    /// Bit width.
    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn meet(&self, other: &Self) -> Self {
        debug_assert_eq!(self.bits, other.bits);
        Self {
            bits: self.bits,
            may_be_nan: self.may_be_nan || other.may_be_nan,
            lower: self.lower.min(other.lower),
            upper: self.upper.max(other.upper),
        }
    }

    /// `None` when the two ranges are disjoint and neither admits NaN.
    pub fn join(&self, other: &Self) -> Option<Self> {
        debug_assert_eq!(self.bits, other.bits);
        let may_be_nan = self.may_be_nan && other.may_be_nan;
        let lower = self.lower.max(other.lower);
        let upper = self.upper.min(other.upper);
        if lower > upper && !may_be_nan {
            None
        } else {
            Some(Self {
                bits: self.bits,
                may_be_nan,
                lower,
                upper,
            })
        }
    }
}

/// An object/pointer stamp: declared type, exactness, and a tri-state
/// nullness. See spec §3 for the precise meet/join rule tables this
/// implements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectStamp {
    ty: Option<TypeRef>,
    exact_type: bool,
    non_null: bool,
    always_null: bool,
}

impl ObjectStamp {
    /// The unrestricted object stamp: any type, may or may not be null.
    pub fn unrestricted() -> Self {
        Self {
            ty: None,
            exact_type: false,
            non_null: false,
            always_null: false,
        }
    }

    /// The stamp for the null constant.
    pub fn always_null() -> Self {
        Self {
            ty: None,
            exact_type: false,
            non_null: false,
            always_null: true,
        }
    }

    /// A declared-type stamp.
    pub fn declared(ty: TypeRef, exact_type: bool, non_null: bool) -> Self {
        Self {
            ty: Some(ty),
            exact_type,
            non_null,
            always_null: false,
        }
    }

    /// The declared type, if any.
    pub fn ty(&self) -> Option<TypeRef> {
        self.ty
    }

    /// Is the runtime type known to be exactly `ty()` (no subclass)?
    pub fn is_exact_type(&self) -> bool {
        self.exact_type
    }

    /// Is the value known never to be null?
    pub fn is_non_null(&self) -> bool {
        self.non_null
    }

    /// Is the value known always to be null?
    pub fn is_always_null(&self) -> bool {
        self.always_null
    }

    fn is_illegal(&self) -> bool {
        self.always_null && self.non_null
    }

    /// Least upper bound. Rule numbers below match spec §3's object-stamp
    /// meet rules exactly.
    pub fn meet(&self, other: &Self, types: &dyn TypeHierarchy) -> Self {
        // Rule 2: alwaysNull on one side only.
        if self.always_null && !other.always_null {
            return Self {
                ty: other.ty,
                exact_type: false,
                non_null: false,
                always_null: false,
            };
        }
        if other.always_null && !self.always_null {
            return Self {
                ty: self.ty,
                exact_type: false,
                non_null: false,
                always_null: false,
            };
        }
        if self.always_null && other.always_null {
            return Self::always_null();
        }

        // Rule 3: least common ancestor, with exactness/nonNull combined.
        let ty = match (self.ty, other.ty) {
            (Some(a), Some(b)) => types.least_common_ancestor(a, b),
            _ => None,
        };
        let meet_equals_both = ty == self.ty && ty == other.ty;
        let exact_type = self.exact_type && other.exact_type && meet_equals_both;
        let non_null = self.non_null && other.non_null;
        Self {
            ty,
            exact_type,
            non_null,
            always_null: false,
        }
    }

    /// Greatest lower bound. `improve` selects the open-type tie-break bias
    /// described in spec §9's open question: when both types are unrelated
    /// and not otherwise orderable, `improve = true` biases to `self`'s
    /// type rather than falling back to a null-only stamp.
    pub fn join(&self, other: &Self, types: &dyn TypeHierarchy, improve: bool) -> Self {
        // Rule 1: illegal absorbs.
        if self.is_illegal() {
            return *self;
        }
        if other.is_illegal() {
            return *other;
        }

        let (resulting_ty, became_always_null) = match (self.ty, other.ty) {
            (Some(a), Some(b)) if a == b => (Some(a), false),
            (Some(a), Some(b)) => {
                let b_sub_a = types.assignable_from(b, a); // every b is an a
                let a_sub_b = types.assignable_from(a, b); // every a is a b
                if b_sub_a && !a_sub_b {
                    // b is more specific (a is the general supertype).
                    let general_was_exact = self.exact_type;
                    (Some(b), general_was_exact)
                } else if a_sub_b && !b_sub_a {
                    let general_was_exact = other.exact_type;
                    (Some(a), general_was_exact)
                } else if improve {
                    (Some(a), false)
                } else if types.is_interface(a) || types.is_interface(b) {
                    (None, false)
                } else {
                    (None, true)
                }
            }
            (Some(a), None) => (Some(a), false),
            (None, Some(b)) => (Some(b), false),
            (None, None) => (None, false),
        };
        let join_always_null = self.always_null || other.always_null || became_always_null;
        let join_non_null = self.non_null || other.non_null;
        let join_exact_type = self.exact_type || other.exact_type;

        if join_always_null && join_non_null {
            return Self {
                ty: None,
                exact_type: false,
                non_null: true,
                always_null: true,
            }; // illegal: normalized below by caller via is_illegal()
        }
        if join_exact_type && resulting_ty.map(|t| !types.is_concrete(t)).unwrap_or(true) {
            return Self {
                ty: None,
                exact_type: true,
                non_null: true,
                always_null: true,
            }; // illegal: no concrete inhabitant
        }

        Self {
            ty: resulting_ty,
            exact_type: join_exact_type,
            non_null: join_non_null,
            always_null: join_always_null,
        }
    }
}

/// The abstract value every graph node carries. See spec §3/§4.1.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Stamp {
    /// Uninhabited: either the empty element of some lattice, or the
    /// (always-empty) second slot of a wide value.
    Illegal(StampKind),
    /// Integer of some bit width.
    Integer(IntegerStamp),
    /// Float of some bit width.
    Float(FloatStamp),
    /// Object/pointer reference.
    Object(ObjectStamp),
    /// No value (e.g. a call with a void return).
    Void,
    /// An untyped raw machine pointer.
    RawPointer,
}

impl Stamp {
    /// This stamp's lattice kind tag.
    pub fn kind(&self) -> StampKind {
        match self {
            Self::Illegal(k) => *k,
            Self::Integer(i) => StampKind::Integer(i.bits()),
            Self::Float(f) => StampKind::Float(f.bits()),
            Self::Object(_) => StampKind::Object,
            Self::Void => StampKind::Void,
            Self::RawPointer => StampKind::RawPointer,
        }
    }

    /// Do `self` and `other` belong to the same lattice (same kind/shape),
    /// so `meet`/`join` are meaningful without falling back to `Illegal`?
    pub fn is_compatible(&self, other: &Stamp) -> bool {
        self.kind() == other.kind()
    }

    /// The bottom element of the lattice `self` belongs to.
    pub fn empty(&self) -> Stamp {
        Stamp::Illegal(self.kind())
    }

    /// The top element of the lattice `self` belongs to.
    pub fn unrestricted(&self) -> Stamp {
        match self.kind() {
            StampKind::Integer(bits) => Stamp::Integer(IntegerStamp::unrestricted(bits)),
            StampKind::Float(bits) => Stamp::Float(FloatStamp::unrestricted(bits)),
            StampKind::Object => Stamp::Object(ObjectStamp::unrestricted()),
            StampKind::Void => Stamp::Void,
            StampKind::RawPointer => Stamp::RawPointer,
        }
    }

    /// The narrowest stamp for a literal, as reflected by the oracle.
    pub fn constant(value: &ConstantValue, types: &dyn TypeHierarchy) -> Stamp {
        let _ = types;
        match value {
            ConstantValue::Int { bits, value } => {
                Stamp::Integer(IntegerStamp::constant(*bits, *value))
            }
            ConstantValue::Float { bits, value } => {
                Stamp::Float(FloatStamp::constant(*bits, *value))
            }
            ConstantValue::Null => Stamp::Object(ObjectStamp::always_null()),
            ConstantValue::Object { ty, exact } => {
                Stamp::Object(ObjectStamp::declared(*ty, *exact, true))
            }
            // A hub is a raw vtable/class identity, not a typed reference:
            // it compares by pointer equality against `LoadHub`, never
            // participates in object-stamp type narrowing.
            ConstantValue::Hub(_) => Stamp::RawPointer,
        }
    }

    /// Least upper bound. Incompatible kinds degrade to an illegal stamp of
    /// `self`'s kind rather than panicking — §4.1's specified failure mode.
    pub fn meet(&self, other: &Stamp, types: &dyn TypeHierarchy) -> Stamp {
        // Illegal on either side: meet(a, empty) == a (§3 rule, and the
        // universal invariant `s.meet(s.empty()) == s`).
        if let Stamp::Illegal(k) = self {
            if *k == other.kind() {
                return *other;
            }
        }
        if let Stamp::Illegal(k) = other {
            if *k == self.kind() {
                return *self;
            }
        }
        match (self, other) {
            (Stamp::Integer(a), Stamp::Integer(b)) if a.bits() == b.bits() => {
                Stamp::Integer(a.meet(b))
            }
            (Stamp::Float(a), Stamp::Float(b)) if a.bits() == b.bits() => Stamp::Float(a.meet(b)),
            (Stamp::Object(a), Stamp::Object(b)) => Stamp::Object(a.meet(b, types)),
            (Stamp::Void, Stamp::Void) => Stamp::Void,
            (Stamp::RawPointer, Stamp::RawPointer) => Stamp::RawPointer,
            _ => Stamp::Illegal(self.kind()),
        }
    }

    /// Greatest lower bound, biased toward `other` when the two object
    /// types are unrelated (spec's `improveWith`/join distinction: `join`
    /// uses `improve = false`, `improve_with` uses `improve = true`).
    fn join_impl(&self, other: &Stamp, types: &dyn TypeHierarchy, improve: bool) -> Stamp {
        if let Stamp::Illegal(_) = self {
            return *self;
        }
        if let Stamp::Illegal(_) = other {
            return *other;
        }
        match (self, other) {
            (Stamp::Integer(a), Stamp::Integer(b)) if a.bits() == b.bits() => a
                .join(b)
                .map(Stamp::Integer)
                .unwrap_or(Stamp::Illegal(StampKind::Integer(a.bits()))),
            (Stamp::Float(a), Stamp::Float(b)) if a.bits() == b.bits() => a
                .join(b)
                .map(Stamp::Float)
                .unwrap_or(Stamp::Illegal(StampKind::Float(a.bits()))),
            (Stamp::Object(a), Stamp::Object(b)) => {
                let j = a.join(b, types, improve);
                if j.is_illegal() {
                    Stamp::Illegal(StampKind::Object)
                } else {
                    Stamp::Object(j)
                }
            }
            (Stamp::Void, Stamp::Void) => Stamp::Void,
            (Stamp::RawPointer, Stamp::RawPointer) => Stamp::RawPointer,
            _ => Stamp::Illegal(self.kind()),
        }
    }

    /// Greatest lower bound — the stamp assuming both `self` and `other`
    /// hold. Empty when contradictory.
    pub fn join(&self, other: &Stamp, types: &dyn TypeHierarchy) -> Stamp {
        self.join_impl(other, types, false)
    }

    /// Like `join`, but biased toward `other` when an intersection isn't
    /// expressible (two unrelated interface types, say) instead of
    /// collapsing straight to a null-only stamp.
    pub fn improve_with(&self, other: &Stamp, types: &dyn TypeHierarchy) -> Stamp {
        self.join_impl(other, types, true)
    }

    /// Is this an uninhabited (empty) stamp?
    pub fn is_empty(&self) -> bool {
        matches!(self, Stamp::Illegal(_))
    }
}


#[cfg(test)]
mod tests {
    use super::test_types::*;
    use super::*;
    use proptest::prelude::*;

    fn small_int(bits: u8, v: i64) -> Stamp {
        Stamp::Integer(IntegerStamp::constant(bits, v))
    }

    #[test]
    fn meet_empty_is_identity() {
        let t = ToyHierarchy;
        let a = small_int(32, 42);
        assert_eq!(a.meet(&a.empty(), &t), a);
    }

    #[test]
    fn meet_unrestricted_is_unrestricted() {
        let t = ToyHierarchy;
        let a = small_int(32, 42);
        assert_eq!(a.meet(&a.unrestricted(), &t), a.unrestricted());
    }

    #[test]
    fn join_unrestricted_is_identity() {
        let t = ToyHierarchy;
        let a = small_int(32, 42);
        assert_eq!(a.join(&a.unrestricted(), &t), a);
    }

    #[test]
    fn join_is_idempotent_combined_with_itself() {
        let t = ToyHierarchy;
        let a = Stamp::Integer(IntegerStamp::unrestricted(32));
        let b = small_int(32, 7);
        let once = a.join(&b, &t);
        let twice = a.join(&once, &t);
        assert_eq!(twice, once);
    }

    #[test]
    fn object_meet_rule_2_always_null_absorbs() {
        let t = ToyHierarchy;
        let null = Stamp::Object(ObjectStamp::always_null());
        let dog = Stamp::Object(ObjectStamp::declared(DOG, true, true));
        let m = null.meet(&dog, &t);
        match m {
            Stamp::Object(o) => {
                assert_eq!(o.ty(), Some(DOG));
                assert!(!o.is_exact_type());
                assert!(!o.is_non_null());
                assert!(!o.is_always_null());
            }
            other => panic!("expected object stamp, got {other:?}"),
        }
    }

    #[test]
    fn object_meet_rule_3_lca_and_exactness() {
        let t = ToyHierarchy;
        let dog = Stamp::Object(ObjectStamp::declared(DOG, true, true));
        let cat = Stamp::Object(ObjectStamp::declared(CAT, true, true));
        let m = dog.meet(&cat, &t);
        match m {
            Stamp::Object(o) => {
                assert_eq!(o.ty(), Some(ANIMAL));
                assert!(!o.is_exact_type(), "LCA is broader than either exact input");
                assert!(o.is_non_null());
            }
            other => panic!("expected object stamp, got {other:?}"),
        }
    }

    #[test]
    fn object_meet_preserves_exactness_when_both_sides_already_equal_lca() {
        let t = ToyHierarchy;
        let animal_a = Stamp::Object(ObjectStamp::declared(ANIMAL, true, true));
        let animal_b = Stamp::Object(ObjectStamp::declared(ANIMAL, true, false));
        let m = animal_a.meet(&animal_b, &t);
        match m {
            Stamp::Object(o) => {
                assert_eq!(o.ty(), Some(ANIMAL));
                assert!(o.is_exact_type());
                assert!(!o.is_non_null()); // nonNull requires both
            }
            other => panic!("expected object stamp, got {other:?}"),
        }
    }

    #[test]
    fn object_join_same_type_keeps_it() {
        let t = ToyHierarchy;
        let a = Stamp::Object(ObjectStamp::declared(DOG, false, true));
        let b = Stamp::Object(ObjectStamp::declared(DOG, true, true));
        let j = a.join(&b, &t);
        match j {
            Stamp::Object(o) => {
                assert_eq!(o.ty(), Some(DOG));
                assert!(o.is_exact_type()); // exactType = a.exact || b.exact
            }
            other => panic!("expected object stamp, got {other:?}"),
        }
    }

    #[test]
    fn object_join_exact_general_type_becomes_always_null() {
        // Joining an *exact* Animal with a Dog: no inhabitant can be both
        // "exactly Animal" and "a Dog", so the only shared value is null.
        let t = ToyHierarchy;
        let exact_animal = Stamp::Object(ObjectStamp::declared(ANIMAL, true, false));
        let dog = Stamp::Object(ObjectStamp::declared(DOG, false, false));
        let j = exact_animal.join(&dog, &t);
        match j {
            Stamp::Object(o) => assert!(o.is_always_null()),
            Stamp::Illegal(_) => {} // also acceptable: nonNull+alwaysNull normalized to illegal
            other => panic!("unexpected stamp {other:?}"),
        }
    }

    #[test]
    fn object_join_unrelated_interfaces_improve_biases_left() {
        let t = ToyHierarchy;
        let circle = Stamp::Object(ObjectStamp::declared(CIRCLE, false, false));
        let square = Stamp::Object(ObjectStamp::declared(SQUARE, false, false));
        let improved = circle.improve_with(&square, &t);
        match improved {
            Stamp::Object(o) => assert_eq!(o.ty(), Some(CIRCLE)),
            other => panic!("expected object stamp, got {other:?}"),
        }
    }

    #[test]
    fn object_join_unrelated_concrete_types_without_improve_is_always_null() {
        let t = ToyHierarchy;
        let dog = Stamp::Object(ObjectStamp::declared(DOG, false, false));
        let cat = Stamp::Object(ObjectStamp::declared(CAT, false, false));
        let j = dog.join(&cat, &t);
        match j {
            Stamp::Object(o) => assert!(o.is_always_null()),
            other => panic!("expected object stamp, got {other:?}"),
        }
    }

    #[test]
    fn normalize_alwaysnull_and_nonnull_is_illegal() {
        let t = ToyHierarchy;
        let null = Stamp::Object(ObjectStamp::always_null());
        let nonnull_dog = Stamp::Object(ObjectStamp::declared(DOG, false, true));
        let j = null.join(&nonnull_dog, &t);
        assert!(matches!(j, Stamp::Illegal(StampKind::Object)));
    }

    #[test]
    fn join_incompatible_kinds_is_illegal_of_self_kind() {
        let t = ToyHierarchy;
        let i = small_int(32, 1);
        let f = Stamp::Float(FloatStamp::constant(64, 1.0));
        assert_eq!(i.join(&f, &t), Stamp::Illegal(StampKind::Integer(32)));
        assert_eq!(f.join(&i, &t), Stamp::Illegal(StampKind::Float(64)));
    }

    #[test]
    fn constant_join_contains_itself() {
        let t = ToyHierarchy;
        let c = small_int(32, 101);
        assert!(!c.join(&c, &t).is_empty());
    }

    proptest! {
        #[test]
        fn integer_meet_is_commutative(a in any::<i32>(), b in any::<i32>()) {
            let t = ToyHierarchy;
            let sa = small_int(32, a as i64);
            let sb = small_int(32, b as i64);
            prop_assert_eq!(sa.meet(&sb, &t), sb.meet(&sa, &t));
        }

        #[test]
        fn integer_meet_is_idempotent(a in any::<i32>()) {
            let t = ToyHierarchy;
            let sa = small_int(32, a as i64);
            prop_assert_eq!(sa.meet(&sa, &t), sa);
        }

        #[test]
        fn integer_join_of_disjoint_constants_is_empty(a in any::<i32>(), b in any::<i32>()) {
            prop_assume!(a != b);
            let t = ToyHierarchy;
            let sa = small_int(32, a as i64);
            let sb = small_int(32, b as i64);
            prop_assert!(sa.join(&sb, &t).is_empty());
        }

        #[test]
        fn integer_constant_join_self_is_non_empty(a in any::<i32>()) {
            let t = ToyHierarchy;
            let sa = small_int(32, a as i64);
            prop_assert!(!sa.join(&sa, &t).is_empty());
        }
    }
}
