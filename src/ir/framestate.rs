//! Decoding view over a `NodeKind::FrameState` node's association inputs.
//!
//! A frame state is stored as an ordinary graph node so it participates in
//! usage tracking and `replaceAtUsages` like any other value; this module
//! is just the typed accessor over its `locals ++ stack [++ outer]` input
//! layout (§3: "Framestates, if present, reference only currently-live
//! value nodes").

use crate::ir::entities::NodeId;
use crate::ir::graph::Graph;
use crate::ir::node::NodeKind;

/// A read-only view decoding one `FrameState` node's inputs.
pub struct FrameState<'a> {
    bci: u32,
    num_locals: u32,
    num_stack: u32,
    has_outer: bool,
    inputs: &'a [NodeId],
}

impl<'a> FrameState<'a> {
    /// Build a view over `node`, panicking if it is not a `FrameState`
    /// node — callers are expected to have matched the kind already.
    pub fn of(graph: &'a Graph, node: NodeId) -> Self {
        let n = graph.node(node);
        let &NodeKind::FrameState {
            bci,
            num_locals,
            num_stack,
            has_outer,
        } = &n.kind
        else {
            panic!("FrameState::of called on a non-framestate node {node}");
        };
        Self {
            bci,
            num_locals,
            num_stack,
            has_outer,
            inputs: &n.inputs,
        }
    }

    /// The bytecode index this snapshot was taken at.
    pub fn bci(&self) -> u32 {
        self.bci
    }

    /// Local-variable slot values, in declaration order.
    pub fn locals(&self) -> &'a [NodeId] {
        &self.inputs[..self.num_locals as usize]
    }

    /// Operand-stack values, bottom to top.
    pub fn stack(&self) -> &'a [NodeId] {
        let start = self.num_locals as usize;
        &self.inputs[start..start + self.num_stack as usize]
    }

    /// The caller's frame state, if this snapshot is inside an inlined
    /// callee (§4.7: nested frame states during inlining).
    pub fn outer(&self) -> Option<NodeId> {
        self.has_outer
            .then(|| self.inputs[(self.num_locals + self.num_stack) as usize])
    }

    /// Total association-input count this layout expects — used by
    /// `Graph::add`/the builder to size the input list before construction.
    pub fn expected_input_count(num_locals: u32, num_stack: u32, has_outer: bool) -> usize {
        num_locals as usize + num_stack as usize + usize::from(has_outer)
    }
}
