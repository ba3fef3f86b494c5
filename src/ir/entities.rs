//! Opaque entity references into a `Graph`'s arenas. Each is a thin newtype
//! over `u32` generated by `cranelift_entity::entity_impl!`, matching
//! cranelift-codegen's own `ir::entities` — `Block`/`Value`/`Inst` there,
//! `NodeId`/`BlockId`/`LirInstId` here.

use core::fmt;

use cranelift_entity::entity_impl;

/// A node in the sea-of-nodes graph: control, data, or memory. Every
/// operation in the graph (including phis, guards, and control splits) is a
/// `NodeId`; whether a given node is "floating" (schedulable anywhere
/// dominance allows) or "fixed" (pinned to a block by construction) is a
/// property of its `NodeKind`, not of the id itself.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);
entity_impl!(NodeId, "node");

/// A scheduled basic block, produced by the scheduler and populated by
/// `compute_cfg`. Blocks do not exist prior to scheduling; before that point
/// control dependencies are just edges between `NodeKind::Begin`/`If`/`Merge`
/// nodes.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(u32);
entity_impl!(BlockId, "block");

/// A loop header identity, assigned during loop-nesting analysis. Distinct
/// from `BlockId` because a loop's identity (for LICM-style hoisting limits,
/// frequency estimates) outlives any single scheduling of its body.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoopId(u32);
entity_impl!(LoopId, "loop");

/// A virtual object created by escape analysis to represent a potentially
/// scalar-replaceable allocation. Distinct from `NodeId` so virtual-object
/// bookkeeping (field maps, alias sets) can live in its own dense arena
/// rather than threading `Option<VirtualObjectId>` through every node.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualObjectId(u32);
entity_impl!(VirtualObjectId, "vobj");

/// A frame-state snapshot, referenced by deoptimizing nodes (guards, calls,
/// division) so the runtime can reconstruct an interpreter frame on bailout.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameStateId(u32);
entity_impl!(FrameStateId, "fs");

/// An instruction in the block-scheduled LIR, post lowering.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LirInstId(u32);
entity_impl!(LirInstId, "lir");

/// A register-allocator virtual register, one per LIR value definition
/// before coloring.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualRegId(u32);
entity_impl!(VirtualRegId, "vreg");

/// Any one of this crate's entity kinds, erased for diagnostics that need to
/// name "the thing that's wrong" without being generic over which arena it
/// lives in (verifier errors, debug dumps).
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub enum AnyEntity {
    Node(NodeId),
    Block(BlockId),
    Loop(LoopId),
    VirtualObject(VirtualObjectId),
    FrameState(FrameStateId),
    LirInst(LirInstId),
    VirtualReg(VirtualRegId),
}

impl fmt::Display for AnyEntity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Node(e) => write!(f, "{e}"),
            Self::Block(e) => write!(f, "{e}"),
            Self::Loop(e) => write!(f, "{e}"),
            Self::VirtualObject(e) => write!(f, "{e}"),
            Self::FrameState(e) => write!(f, "{e}"),
            Self::LirInst(e) => write!(f, "{e}"),
            Self::VirtualReg(e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Debug for AnyEntity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

macro_rules! any_entity_from {
    ($variant:ident, $ty:ty) => {
        impl From<$ty> for AnyEntity {
            fn from(e: $ty) -> Self {
                Self::$variant(e)
            }
        }
    };
}

any_entity_from!(Node, NodeId);
any_entity_from!(Block, BlockId);
any_entity_from!(Loop, LoopId);
any_entity_from!(VirtualObject, VirtualObjectId);
any_entity_from!(FrameState, FrameStateId);
any_entity_from!(LirInst, LirInstId);
any_entity_from!(VirtualReg, VirtualRegId);
