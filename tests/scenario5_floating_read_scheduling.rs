//! End-to-end: floating-read scheduling under `MemorySchedule::Optimal`.
//!
//! A `Load` from location `A` is used only inside one arm of a diamond;
//! ordinary schedule-late would sink it straight into that arm. But that
//! arm also commits an escaped allocation (a fixed `CommitAllocation`,
//! which aliases every location), so `MemorySchedule::Optimal` must stop
//! the sink at the start block instead. Under `MemorySchedule::None` the
//! aliasing check never runs, so the read sinks into the arm regardless.

use meridian_jit::analysis::Analysis;
use meridian_jit::ir::graph::Graph;
use meridian_jit::ir::node::{MemoryLocation, NodeKind, NodeList, UnaryOpKind};
use meridian_jit::ir::sourceloc::BciLoc;
use meridian_jit::oracle::TypeRef;
use meridian_jit::scheduler::{schedule, MemorySchedule, ScheduleStrategy};

fn diamond_with_aliasing_commit_in_then_arm() -> (Graph, meridian_jit::ir::entities::NodeId, meridian_jit::ir::entities::NodeId) {
    let mut g = Graph::new();
    let start = g.add(NodeKind::Start, NodeList::new(), BciLoc::default()).unwrap();
    let begin = g.add(NodeKind::Begin, NodeList::new(), BciLoc::default()).unwrap();
    g.node_mut(start).successors.push(begin);

    let cond = g.add(NodeKind::Parameter { index: 0 }, NodeList::new(), BciLoc::default()).unwrap();
    let mut if_inputs = NodeList::new();
    if_inputs.push(cond);
    let if_node = g.add(NodeKind::If { negated: false }, if_inputs, BciLoc::default()).unwrap();
    g.node_mut(begin).successors.push(if_node);

    let then_begin = g.add(NodeKind::Begin, NodeList::new(), BciLoc::default()).unwrap();
    let else_begin = g.add(NodeKind::Begin, NodeList::new(), BciLoc::default()).unwrap();
    g.node_mut(if_node).successors.push(then_begin);
    g.node_mut(if_node).successors.push(else_begin);

    // then arm: commit an escaped allocation (aliases everything), then
    // return the negation of a read from location A.
    let commit = g
        .add(NodeKind::CommitAllocation { ty: TypeRef(0), field_count: 0 }, NodeList::new(), BciLoc::default())
        .unwrap();
    g.node_mut(then_begin).successors.push(commit);

    let x = g.add(NodeKind::Parameter { index: 1 }, NodeList::new(), BciLoc::default()).unwrap();
    let mut load_inputs = NodeList::new();
    load_inputs.push(x);
    load_inputs.push(start);
    let load = g.add(NodeKind::Load { location: MemoryLocation(1) }, load_inputs, BciLoc::default()).unwrap();

    let mut user_inputs = NodeList::new();
    user_inputs.push(load);
    let user = g.add(NodeKind::UnaryOp(UnaryOpKind::Neg), user_inputs, BciLoc::default()).unwrap();

    let mut ret_then_inputs = NodeList::new();
    ret_then_inputs.push(user);
    let ret_then = g.add(NodeKind::Return, ret_then_inputs, BciLoc::default()).unwrap();
    g.node_mut(commit).successors.push(ret_then);

    let ret_else = g.add(NodeKind::Return, NodeList::new(), BciLoc::default()).unwrap();
    g.node_mut(else_begin).successors.push(ret_else);

    (g, load, then_begin)
}

#[test]
fn optimal_mode_pins_the_read_back_at_entry_when_an_intervening_block_aliases_it() {
    let (g, load, _then_begin) = diamond_with_aliasing_commit_in_then_arm();
    let analysis = Analysis::compute(&g).unwrap();
    let sched = schedule(&g, &analysis, ScheduleStrategy::LatestOutOfLoops, MemorySchedule::Optimal).unwrap();

    assert_eq!(sched.block_of(load), Some(analysis.cfg.entry()));
}

#[test]
fn none_mode_sinks_the_read_into_the_arm_regardless_of_the_aliasing_write() {
    let (g, load, then_begin) = diamond_with_aliasing_commit_in_then_arm();
    let analysis = Analysis::compute(&g).unwrap();
    let sched = schedule(&g, &analysis, ScheduleStrategy::LatestOutOfLoops, MemorySchedule::None).unwrap();

    assert_eq!(sched.block_of(load), analysis.cfg.block_of(then_begin));
    assert_ne!(sched.block_of(load), Some(analysis.cfg.entry()));
}
