//! Node kinds and their edge shape. Mirrors cranelift-codegen's split
//! between `InstructionData` (the enum carrying per-opcode payload) and the
//! instruction's operand list (stored separately, on `DataFlowGraph`): here
//! `NodeKind` carries only scalar payload, while a node's data/memory/guard
//! inputs and control successors live on `Node` itself (`graph.rs`), stored
//! as `SmallVec`s exactly as cranelift stores instruction arguments.

use smallvec::SmallVec;

use crate::ir::condcodes::{FloatCC, IntCC};
use crate::ir::sourceloc::BciLoc;
use crate::oracle::{ConstantValue, MethodRef, TypeRef};
use crate::stamp::Stamp;

use super::entities::NodeId;

/// Identifies an abstract memory location for the floating-read memory-SSA
/// phase (§4.8): two reads/writes may alias only if they share (or either
/// is) `ANY`. Field/array-element identities are assigned by the frontend;
/// this crate treats them as opaque.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemoryLocation(pub u32);

impl MemoryLocation {
    /// The location representing "may alias everything" — used for raw
    /// memory accesses with no known field/element identity.
    pub const ANY: MemoryLocation = MemoryLocation(u32::MAX);

    /// Could a write to `self` be observed by a read of `other`?
    pub fn may_alias(self, other: MemoryLocation) -> bool {
        self == Self::ANY || other == Self::ANY || self == other
    }
}

/// Unary arithmetic/logic operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UnaryOpKind {
    Neg,
    Not,
    IntToFloat,
    FloatToInt,
    FloatConvert,
    IntTruncate,
    IntExtendSigned,
    IntExtendUnsigned,
}

/// Binary arithmetic/logic operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinaryOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    ShrSigned,
    ShrUnsigned,
}

/// How an `Invoke` resolves its callee.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DispatchKind {
    /// Target fixed at compile time.
    Static,
    /// Non-virtual instance call (constructors, private/final methods).
    Special,
    /// Single-dispatch virtual call through the receiver's vtable.
    Virtual,
    /// Interface dispatch (itable lookup).
    Interface,
}

/// Why a `Guard` or deoptimizing node would bail to the interpreter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeoptReason {
    NullCheckException,
    ClassCastException,
    ArrayBoundsException,
    DivisionByZero,
    /// A monomorphic-by-profile inline target turned out wrong at runtime.
    TypeCheckedInliningViolated,
    /// The oracle could not resolve a symbolic reference (§7 `LinkageError`).
    UnresolvedReference,
    /// Control reached a point profiling said was never taken.
    Unreached,
}

/// A node's kind: its opcode plus scalar payload. Edge lists (data, memory,
/// guard, association inputs; control successors) live on the owning `Node`,
/// not here — see module docs.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeKind {
    /// The graph's unique entry; has no inputs, one control successor.
    Start,
    /// A normal return to the caller.
    Return,
    /// An exceptional return (unwind).
    Throw,
    /// Control reached a point proven unreachable; deoptimizes.
    Unreachable,

    /// A fixed basic-block entry marker. Exactly one node may begin a block.
    Begin,
    /// A two-way control split. Data input 0 is the condition.
    If { negated: bool },
    /// A control join. `is_loop_header` marks back-edges converging here.
    Merge { is_loop_header: bool },
    /// Marks a control edge leaving a loop, so guard proxies (§4.5) and the
    /// scheduler's LATEST_OUT_OF_LOOPS strategy have an anchor to wrap.
    LoopExit,

    /// A compile-time literal.
    Constant(ConstantValue),
    /// The `index`-th incoming argument to the current method.
    Parameter { index: u32 },
    /// A value-merging phi at a `Merge`. Input count equals the merge's
    /// forward-predecessor count (§3 invariant).
    Phi,
    /// A memory-state phi for `location`, introduced by the floating-read
    /// phase (§4.8) — distinct from `Phi` so ordinary value canonicalization
    /// never has to reason about memory identities.
    MemoryPhi { location: MemoryLocation },

    /// A unary operator over data input 0.
    UnaryOp(UnaryOpKind),
    /// A binary operator over data inputs 0 and 1.
    BinaryOp(BinaryOpKind),
    /// A comparison; exactly one of `int_cc`/`float_cc` is set, matching
    /// the input stamps' kind.
    Compare {
        int_cc: Option<IntCC>,
        float_cc: Option<FloatCC>,
    },

    /// A floating memory read from `location`. Data input 0 is the base
    /// pointer/object; memory input 0 is the memory state it reads through.
    Load { location: MemoryLocation },
    /// A memory write to `location`. Data input 0 is the base, input 1 the
    /// stored value; memory input 0 is the memory state it extends.
    Store { location: MemoryLocation },
    /// Reads an object's class identity (hub/vtable pointer), used by type
    /// guards ahead of a `Compare` against `ConstantValue::Hub`.
    LoadHub,

    /// A (possibly virtual-)dispatch call.
    Invoke {
        method: MethodRef,
        dispatch: DispatchKind,
    },
    /// A condition that must hold; deoptimizes with `reason` if
    /// `negated != (condition is true)`. Guard input 0 is the boolean
    /// condition to check.
    Guard { reason: DeoptReason, negated: bool },
    /// A deoptimization snapshot: locals/stack values needed to reconstruct
    /// an interpreter frame. Association inputs are laid out as
    /// `locals ++ stack [++ outer]`; `num_locals`/`num_stack` mark the
    /// split and `has_outer` marks whether a trailing input is the caller's
    /// `FrameState` node (present only inside an inlined callee, §4.7).
    FrameState {
        bci: u32,
        num_locals: u32,
        num_stack: u32,
        has_outer: bool,
    },

    MonitorEnter,
    MonitorExit,

    /// Allocates a fresh instance of `ty`; a candidate for scalar
    /// replacement until it escapes (§4.6).
    NewInstance { ty: TypeRef },
    /// Allocates a fresh array of `ty` with `length` elements (data input 0).
    NewArray { ty: TypeRef },
    /// Materializes a virtual object that escaped: association inputs are
    /// its field/element values in declaration order (§4.6 invariant).
    CommitAllocation { ty: TypeRef, field_count: u32 },

    /// An anchored-receiver pi-node: forwards data input 0 under a narrower
    /// stamp proven valid only downstream of the guard that produced it.
    Pi,
    /// Wraps a guard's boolean input when it must cross a loop exit, one
    /// proxy per exit traversed (§4.5).
    Proxy,
}

impl NodeKind {
    /// Fixed nodes are pinned to a block by construction (control-flow
    /// skeleton, framestates, calls, guards); floating nodes are placed by
    /// the scheduler (§4.4).
    pub fn is_fixed(&self) -> bool {
        matches!(
            self,
            NodeKind::Start
                | NodeKind::Return
                | NodeKind::Throw
                | NodeKind::Unreachable
                | NodeKind::Begin
                | NodeKind::If { .. }
                | NodeKind::Merge { .. }
                | NodeKind::LoopExit
                | NodeKind::Invoke { .. }
                | NodeKind::Guard { .. }
                | NodeKind::FrameState { .. }
                | NodeKind::MonitorEnter
                | NodeKind::MonitorExit
                | NodeKind::NewInstance { .. }
                | NodeKind::NewArray { .. }
                | NodeKind::CommitAllocation { .. }
        )
    }

    /// Is this node schedulable by the floating scheduler (the complement of
    /// `is_fixed`)?
    pub fn is_floating(&self) -> bool {
        !self.is_fixed()
    }

    /// Number of control successors this node's kind fixes structurally
    /// (`If` always has two, `Return`/`Throw`/`Unreachable` have zero, all
    /// other fixed nodes have exactly one, floating nodes have none).
    pub fn fixed_successor_count(&self) -> usize {
        match self {
            NodeKind::If { .. } => 2,
            NodeKind::Return | NodeKind::Throw | NodeKind::Unreachable => 0,
            k if k.is_fixed() => 1,
            _ => 0,
        }
    }

    /// Does the graph deduplicate nodes of this kind by structural identity
    /// (same kind + same inputs)? Only pure, floating, side-effect-free
    /// nodes are value-numberable (§4.2 `add`).
    pub fn is_value_numberable(&self) -> bool {
        matches!(
            self,
            NodeKind::Constant(_)
                | NodeKind::Parameter { .. }
                | NodeKind::UnaryOp(_)
                | NodeKind::BinaryOp(_)
                | NodeKind::Compare { .. }
                | NodeKind::LoadHub
        )
    }

    /// Does this node read memory (participates in the floating-read
    /// memory-SSA phase)?
    pub fn memory_read_location(&self) -> Option<MemoryLocation> {
        match self {
            NodeKind::Load { location } => Some(*location),
            _ => None,
        }
    }

    /// Does this node write memory, and to which location?
    pub fn memory_write_location(&self) -> Option<MemoryLocation> {
        match self {
            NodeKind::Store { location } => Some(*location),
            NodeKind::CommitAllocation { .. } => Some(MemoryLocation::ANY),
            _ => None,
        }
    }

    /// Can this node deoptimize (bail out to the interpreter)? These always
    /// carry (or require) an associated frame state.
    pub fn can_deoptimize(&self) -> bool {
        matches!(
            self,
            NodeKind::Guard { .. } | NodeKind::Invoke { .. } | NodeKind::Unreachable
        )
    }

    /// A short, stable mnemonic for dumps/diagnostics.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::Return => "return",
            NodeKind::Throw => "throw",
            NodeKind::Unreachable => "unreachable",
            NodeKind::Begin => "begin",
            NodeKind::If { .. } => "if",
            NodeKind::Merge { .. } => "merge",
            NodeKind::LoopExit => "loop_exit",
            NodeKind::Constant(_) => "const",
            NodeKind::Parameter { .. } => "param",
            NodeKind::Phi => "phi",
            NodeKind::MemoryPhi { .. } => "memphi",
            NodeKind::UnaryOp(_) => "unary",
            NodeKind::BinaryOp(_) => "binary",
            NodeKind::Compare { .. } => "compare",
            NodeKind::Load { .. } => "load",
            NodeKind::Store { .. } => "store",
            NodeKind::LoadHub => "load_hub",
            NodeKind::Invoke { .. } => "invoke",
            NodeKind::Guard { .. } => "guard",
            NodeKind::FrameState { .. } => "framestate",
            NodeKind::MonitorEnter => "monitor_enter",
            NodeKind::MonitorExit => "monitor_exit",
            NodeKind::NewInstance { .. } => "new_instance",
            NodeKind::NewArray { .. } => "new_array",
            NodeKind::CommitAllocation { .. } => "commit_allocation",
            NodeKind::Pi => "pi",
            NodeKind::Proxy => "proxy",
        }
    }
}

/// An edge list, small-vector backed exactly as cranelift backs instruction
/// argument lists — most nodes have only a handful of inputs.
pub type NodeList = SmallVec<[NodeId; 4]>;

/// A node in the graph: its kind, edges, and attributes. See module docs
/// and spec §3 for the field-by-field invariants.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    pub kind: NodeKind,
    /// Data, memory, guard, and association inputs, in the order the kind's
    /// contract (this module's doc comments) defines them. Distinguishing
    /// data/memory/guard/association is a convention the passes follow, not
    /// a type-level split — a single flat list keeps `replaceAtUsages` and
    /// usage-list maintenance uniform across node kinds.
    pub inputs: NodeList,
    /// Control successors; empty for floating nodes, structurally sized per
    /// `NodeKind::fixed_successor_count` for fixed ones.
    pub successors: NodeList,
    /// Current abstract value. `Stamp::Void` for nodes with no value
    /// (control-only, stores, monitor ops).
    pub stamp: Stamp,
    pub loc: BciLoc,
    /// Set when a rewrite touches this node; drives the canonicalizer and
    /// conditional-elimination work-lists (§4.5) instead of a full rescan.
    pub dirty: bool,
    /// `true` once `safeDelete` has run; deleted nodes are skipped by
    /// `iterate`/`usages`/`inputs` and must not be re-added to a work-list.
    pub deleted: bool,
}

impl Node {
    pub fn new(kind: NodeKind, inputs: NodeList, loc: BciLoc) -> Self {
        let successors = NodeList::new();
        Self {
            kind,
            inputs,
            successors,
            stamp: Stamp::Void,
            loc,
            dirty: true,
            deleted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn if_is_fixed_with_two_successors() {
        let k = NodeKind::If { negated: false };
        assert!(k.is_fixed());
        assert_eq!(k.fixed_successor_count(), 2);
    }

    #[test]
    fn binary_op_is_floating_and_value_numberable() {
        let k = NodeKind::BinaryOp(BinaryOpKind::Add);
        assert!(k.is_floating());
        assert!(k.is_value_numberable());
    }

    #[test]
    fn invoke_can_deoptimize_and_is_fixed() {
        let k = NodeKind::Invoke {
            method: MethodRef(0),
            dispatch: DispatchKind::Virtual,
        };
        assert!(k.is_fixed());
        assert!(k.can_deoptimize());
    }

    #[test]
    fn memory_location_any_aliases_everything() {
        let specific = MemoryLocation(7);
        assert!(specific.may_alias(MemoryLocation::ANY));
        assert!(MemoryLocation::ANY.may_alias(specific));
        assert!(!specific.may_alias(MemoryLocation(8)));
    }

    #[test]
    fn commit_allocation_writes_any_location() {
        let k = NodeKind::CommitAllocation {
            ty: TypeRef(0),
            field_count: 2,
        };
        assert_eq!(k.memory_write_location(), Some(MemoryLocation::ANY));
    }
}
