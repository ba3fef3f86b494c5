//! The graph intermediate representation: entities, node kinds, the graph
//! arena, condition codes, bytecode locations, and frame-state snapshots.

pub mod condcodes;
pub mod entities;
pub mod framestate;
pub mod graph;
pub mod node;
pub mod sourceloc;

pub use condcodes::{CondCode, FloatCC, IntCC};
pub use entities::{
    AnyEntity, BlockId, FrameStateId, LirInstId, LoopId, NodeId, VirtualObjectId, VirtualRegId,
};
pub use framestate::FrameState;
pub use graph::Graph;
pub use node::{
    BinaryOpKind, DeoptReason, DispatchKind, MemoryLocation, Node, NodeKind, NodeList, UnaryOpKind,
};
pub use sourceloc::BciLoc;
