//! Frame-state and floating-read phases (§4.8).
//!
//! In this graph, `Load`/`Store` are floating from the start (see
//! `NodeKind::is_fixed`) rather than "fixed until this phase floats them" —
//! so `build_memory_graph` is reinterpreted accordingly: instead of turning
//! fixed reads into floating ones, it builds the per-location memory-state
//! phi graph at control merges and rewires every floating memory node's
//! producer edge to the correctly merged state, exactly as the spec's
//! memory-state phi graph describes downstream of that difference (see
//! DESIGN.md).
//!
//! `lower_guards` turns `Guard` nodes into explicit `If` + deopt control
//! flow; `assign_frame_states` then propagates the reaching `FrameState` to
//! every node that can deoptimize and unchains frame-state nodes from the
//! fixed control skeleton. Ordering constraint (§4.8): floating reads must
//! not be introduced after frame-state assignment, and conditional
//! elimination must run before guard lowering — `run` only orders the three
//! phases in this module; callers are responsible for canonicalizing and
//! running conditional elimination first.

use std::cell::Cell;

use crate::analysis::Analysis;
use crate::fx::FxHashMap;
use crate::ir::entities::{BlockId, NodeId};
use crate::ir::graph::Graph;
use crate::ir::node::{MemoryLocation, NodeKind, NodeList};
use crate::result::CompileResult;

thread_local! {
    // Flipped once `assign_frame_states` runs on this thread; checked (not
    // just documented) by `build_memory_graph`, mirroring `debug.rs`'s own
    // thread-local compilation state. Reset at the top of `run` so a worker
    // thread compiling a second method doesn't inherit the first one's flag.
    static FRAME_STATES_ASSIGNED: Cell<bool> = const { Cell::new(false) };
}

/// Run the floating-read, guard-lowering, and frame-state phases in the
/// order §4.8's ordering constraint requires, recomputing analyses between
/// phases that mutate the fixed control skeleton (the same "recompute once,
/// assert staleness" discipline as elsewhere in this crate).
pub fn run(graph: &mut Graph) -> CompileResult<()> {
    FRAME_STATES_ASSIGNED.with(|f| f.set(false));

    let analysis = Analysis::compute(graph)?;
    build_memory_graph(graph, &analysis)?;

    lower_guards(graph)?;

    let analysis = Analysis::compute(graph)?;
    assign_frame_states(graph, &analysis)?;
    Ok(())
}

fn is_memory_producer(graph: &Graph, n: NodeId) -> bool {
    let kind = &graph.node(n).kind;
    kind.memory_write_location().is_some() || matches!(kind, NodeKind::MemoryPhi { .. }) || matches!(kind, NodeKind::Start)
}

fn memory_producer_of(graph: &Graph, n: NodeId) -> Option<NodeId> {
    graph.inputs(n).iter().copied().find(|&i| is_memory_producer(graph, i))
}

/// Memoized chain depth, used only to order a block's memory nodes among
/// themselves — same convention as `escape_analysis.rs`'s `mem_depth` and
/// `scheduler.rs`'s own memory-producer scan.
fn mem_chain_depth(graph: &Graph, n: NodeId, memo: &mut FxHashMap<NodeId, u32>) -> u32 {
    if let Some(&d) = memo.get(&n) {
        return d;
    }
    let d = match memory_producer_of(graph, n) {
        Some(p) => mem_chain_depth(graph, p, memo) + 1,
        None => 0,
    };
    memo.insert(n, d);
    d
}

/// The block a floating memory node belongs to for this pass's purposes:
/// the block of the nearest fixed node reachable by walking its own
/// memory-producer chain (`Start` always terminates the walk and is
/// charged to the CFG's entry block, since `compute_cfg` does not assign
/// `Start` itself a block).
fn home_block(graph: &Graph, analysis: &Analysis, n: NodeId) -> BlockId {
    let mut cur = n;
    loop {
        if let Some(b) = analysis.cfg.block_of(cur) {
            return b;
        }
        if matches!(graph.node(cur).kind, NodeKind::Start) {
            return analysis.cfg.entry();
        }
        match memory_producer_of(graph, cur) {
            Some(p) => cur = p,
            None => return analysis.cfg.entry(),
        }
    }
}

/// Rewire `n`'s existing memory-producer input edge (found by kind, not
/// position) to `new_producer`. A no-op if `n` carries no such edge (e.g.
/// `CommitAllocation`, whose association inputs are field values only).
fn rewire_memory_input(graph: &mut Graph, n: NodeId, new_producer: NodeId) {
    if let Some(old) = graph.inputs(n).iter().copied().find(|&i| is_memory_producer(graph, i)) {
        if old != new_producer {
            graph.replace_at_predecessor(n, old, new_producer);
        }
    }
}

/// Build the per-location memory-state phi graph and rewire every
/// `Load`/`Store`/`CommitAllocation` node's producer edge to it.
///
/// Ordinary (non-loop) merges are resolved exactly: every predecessor has
/// already been visited in reverse-postorder, so a `MemoryPhi` is created
/// wherever predecessors disagree on a location's reaching value. Loop
/// headers are a documented simplification: the back edge's reaching value
/// isn't known yet when the header is visited, so every predecessor slot
/// (including the back edge) is seeded with the single forward
/// predecessor's value. A load inside the loop body therefore sees the
/// pre-loop state of a location written earlier in the same iteration, not
/// a prior iteration's write — a conservative loss of loop-carried memory
/// precision, not a soundness bug in the values this pass does track
/// (see DESIGN.md).
pub fn build_memory_graph(graph: &mut Graph, analysis: &Analysis) -> CompileResult<()> {
    debug_assert!(
        !FRAME_STATES_ASSIGNED.with(|f| f.get()),
        "floating reads must not be introduced after frame-state assignment"
    );
    analysis.assert_fresh(graph);
    let start = match graph.start() {
        Some(s) => s,
        None => return Ok(()),
    };

    let writes: Vec<NodeId> = graph.iterate(|k| k.memory_write_location().is_some());
    let reads: Vec<NodeId> = graph.iterate(|k| k.memory_read_location().is_some());
    if writes.is_empty() && reads.is_empty() {
        return Ok(());
    }

    let mut memo: FxHashMap<NodeId, u32> = FxHashMap::default();
    let mut by_block: FxHashMap<BlockId, Vec<NodeId>> = FxHashMap::default();
    for &n in writes.iter().chain(reads.iter()) {
        let b = home_block(graph, analysis, n);
        by_block.entry(b).or_default().push(n);
    }
    for list in by_block.values_mut() {
        list.sort_by_key(|&n| mem_chain_depth(graph, n, &mut memo));
    }

    let mut out_state: FxHashMap<BlockId, FxHashMap<MemoryLocation, NodeId>> = FxHashMap::default();

    for b in analysis.cfg.blocks_in_rpo() {
        let mut state: FxHashMap<MemoryLocation, NodeId> = FxHashMap::default();
        if b == analysis.cfg.entry() {
            state.insert(MemoryLocation::ANY, start);
        } else {
            let preds = analysis.cfg.block(b).predecessors.clone();
            let is_loop_header = analysis.loops.is_loop_header(b);
            if preds.len() <= 1 || is_loop_header {
                if let Some(&p) = preds.first() {
                    state = out_state.get(&p).cloned().unwrap_or_default();
                }
            } else {
                let mut locations: Vec<MemoryLocation> = Vec::new();
                for &p in &preds {
                    if let Some(m) = out_state.get(&p) {
                        for &loc in m.keys() {
                            if !locations.contains(&loc) {
                                locations.push(loc);
                            }
                        }
                    }
                }
                for loc in locations {
                    let values: Vec<NodeId> = preds
                        .iter()
                        .map(|p| {
                            out_state
                                .get(p)
                                .and_then(|m| m.get(&loc).copied().or_else(|| m.get(&MemoryLocation::ANY).copied()))
                                .unwrap_or(start)
                        })
                        .collect();
                    let resolved = if values.windows(2).all(|w| w[0] == w[1]) {
                        values[0]
                    } else {
                        let mut inputs = NodeList::new();
                        inputs.extend(values);
                        let phi = graph.add(
                            NodeKind::MemoryPhi { location: loc },
                            inputs,
                            graph.node(analysis.cfg.block(b).header).loc,
                        )?;
                        log::debug!("memory_phase: new memory phi for location {:?} at block {:?}: {:?}", loc, b, phi);
                        phi
                    };
                    state.insert(loc, resolved);
                }
            }
        }

        if let Some(nodes) = by_block.get(&b) {
            for &n in nodes {
                let node_kind = graph.node(n).kind.clone();
                if let Some(loc) = node_kind.memory_read_location() {
                    let resolved = state.get(&loc).copied().or_else(|| state.get(&MemoryLocation::ANY).copied()).unwrap_or(start);
                    rewire_memory_input(graph, n, resolved);
                } else if let Some(loc) = node_kind.memory_write_location() {
                    let resolved = state.get(&loc).copied().or_else(|| state.get(&MemoryLocation::ANY).copied()).unwrap_or(start);
                    rewire_memory_input(graph, n, resolved);
                    state.insert(loc, n);
                    if loc == MemoryLocation::ANY {
                        for v in state.values_mut() {
                            *v = n;
                        }
                    }
                }
            }
        }

        out_state.insert(b, state);
    }

    Ok(())
}

/// Turn every `Guard` into explicit control flow: an `If` on the guard's
/// condition, a `Begin` continuing the original chain on the
/// check-succeeded edge, and a `Begin -> Unreachable` on the
/// check-failed edge. Any value usage of the old guard node (a `Pi`'s
/// anchor, a dominated guard's proof target) is rewired to the
/// continuation `Begin`, since that marker now plays the same "reachable
/// only once the condition has been proved" role the guard node used to.
///
/// The guard's `DeoptReason` has no home on `Unreachable` (no payload is
/// carried there) and is discarded here — reconstructing a real
/// interpreter-reentry deopt path is out of scope (Non-goals: OSR/dynamic
/// code patching/interpreters), so `Unreachable` is only ever a placeholder
/// for where that path would begin.
pub fn lower_guards(graph: &mut Graph) -> CompileResult<()> {
    let guards: Vec<NodeId> = graph.iterate(|k| matches!(k, NodeKind::Guard { .. }));
    for g in guards {
        lower_one_guard(graph, g)?;
    }
    Ok(())
}

fn lower_one_guard(graph: &mut Graph, g: NodeId) -> CompileResult<()> {
    let negated = match &graph.node(g).kind {
        NodeKind::Guard { negated, .. } => *negated,
        _ => return Ok(()),
    };
    let loc = graph.node(g).loc;
    let cond = graph.inputs(g)[0];
    let old_succ = graph.node(g).successors.first().copied();

    let mut if_inputs = NodeList::new();
    if_inputs.push(cond);
    let if_node = graph.add(NodeKind::If { negated }, if_inputs, loc)?;

    let continue_begin = graph.add(NodeKind::Begin, NodeList::new(), loc)?;
    let deopt_begin = graph.add(NodeKind::Begin, NodeList::new(), loc)?;
    graph.node_mut(if_node).successors.push(continue_begin);
    graph.node_mut(if_node).successors.push(deopt_begin);

    let unreachable = graph.add(NodeKind::Unreachable, NodeList::new(), loc)?;
    graph.node_mut(deopt_begin).successors.push(unreachable);
    if let Some(succ) = old_succ {
        graph.node_mut(continue_begin).successors.push(succ);
    }

    splice_in_place(graph, g, if_node);
    graph.replace_at_usages(g, continue_begin);
    graph.node_mut(g).successors.clear();
    graph.safe_delete(g)?;
    Ok(())
}

/// Repoint every predecessor of `old` (any live node whose successors list
/// names it) to `new` instead.
fn splice_in_place(graph: &mut Graph, old: NodeId, new: NodeId) {
    let preds: Vec<NodeId> = graph
        .all_live_nodes()
        .into_iter()
        .filter(|&p| p != old && graph.node(p).successors.iter().any(|&s| s == old))
        .collect();
    for p in preds {
        for s in graph.node_mut(p).successors.iter_mut() {
            if *s == old {
                *s = new;
            }
        }
    }
}

/// Unchain a fixed node from the control skeleton without deleting it:
/// its predecessor is repointed to its own successor, and its own
/// successor list is cleared. Used once a `FrameState` node's consumers
/// hold a direct reference to it and it no longer needs to occupy a slot
/// in program order.
fn unchain_from_control(graph: &mut Graph, n: NodeId) {
    if let Some(&succ) = graph.node(n).successors.first() {
        splice_in_place(graph, n, succ);
    }
    graph.node_mut(n).successors.clear();
}

/// The `FrameState` node attached to a deoptimizing node, if frame-state
/// assignment has run — found by scanning `n`'s inputs for a `FrameState`
/// kind, the same by-kind-not-position convention `memory_producer_of`
/// uses for memory edges, since the attachment is an appended input rather
/// than a dedicated field.
pub fn attached_frame_state(graph: &Graph, n: NodeId) -> Option<NodeId> {
    graph.inputs(n).iter().copied().find(|&i| matches!(graph.node(i).kind, NodeKind::FrameState { .. }))
}

/// Propagate the reaching `FrameState` to every node that can deoptimize,
/// then unchain every `FrameState` node from the fixed control skeleton.
///
/// Reaching state is tracked per block in program order; across a control
/// merge it is only carried forward when every predecessor agrees on the
/// same `FrameState` node (a documented simplification — reconciling
/// genuinely different incoming frame states would need a frame-state phi
/// this pass does not build, so a disagreeing merge simply starts the
/// block with no reaching state rather than guessing).
pub fn assign_frame_states(graph: &mut Graph, analysis: &Analysis) -> CompileResult<()> {
    analysis.assert_fresh(graph);
    let mut out_state: FxHashMap<BlockId, Option<NodeId>> = FxHashMap::default();

    for b in analysis.cfg.blocks_in_rpo() {
        let mut reaching = if b == analysis.cfg.entry() {
            None
        } else {
            let preds = &analysis.cfg.block(b).predecessors;
            let first = preds.first().and_then(|p| out_state.get(p).copied().flatten());
            let all_same = preds.iter().all(|p| out_state.get(p).copied().flatten() == first);
            if all_same {
                first
            } else {
                None
            }
        };

        for &n in &analysis.cfg.block(b).fixed_nodes {
            if matches!(graph.node(n).kind, NodeKind::FrameState { .. }) {
                reaching = Some(n);
                continue;
            }
            if graph.node(n).kind.can_deoptimize() {
                if let Some(fs) = reaching {
                    graph.add_input(n, fs);
                }
            }
        }

        out_state.insert(b, reaching);
    }

    let framestates: Vec<NodeId> = graph.iterate(|k| matches!(k, NodeKind::FrameState { .. }));
    for fs in framestates {
        unchain_from_control(graph, fs);
    }
    FRAME_STATES_ASSIGNED.with(|f| f.set(true));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::graph::Graph;
    use crate::ir::node::{DeoptReason, NodeList};
    use crate::ir::sourceloc::BciLoc;
    use crate::oracle::ConstantValue;

    fn int_const(g: &mut Graph, v: i64) -> NodeId {
        g.add(NodeKind::Constant(ConstantValue::Int { bits: 32, value: v }), NodeList::new(), BciLoc::default())
            .unwrap()
    }

    /// `start -> begin -> if -> {then: store loc=1; else: store loc=1} ->
    /// merge -> load loc=1 -> return`: the load after the merge should
    /// resolve through a freshly built `MemoryPhi` over both stores.
    #[test]
    fn diverging_stores_merge_into_a_memory_phi() {
        let mut g = Graph::new();
        let start = g.add(NodeKind::Start, NodeList::new(), BciLoc::default()).unwrap();
        let entry = g.add(NodeKind::Begin, NodeList::new(), BciLoc::default()).unwrap();
        g.node_mut(start).successors.push(entry);

        let cond = int_const(&mut g, 1);
        let mut if_inputs = NodeList::new();
        if_inputs.push(cond);
        let if_node = g.add(NodeKind::If { negated: false }, if_inputs, BciLoc::default()).unwrap();
        g.node_mut(entry).successors.push(if_node);

        let then_begin = g.add(NodeKind::Begin, NodeList::new(), BciLoc::default()).unwrap();
        let else_begin = g.add(NodeKind::Begin, NodeList::new(), BciLoc::default()).unwrap();
        g.node_mut(if_node).successors.push(then_begin);
        g.node_mut(if_node).successors.push(else_begin);

        let base = int_const(&mut g, 0);
        let v1 = int_const(&mut g, 10);
        let v2 = int_const(&mut g, 20);

        let mut store1_inputs = NodeList::new();
        store1_inputs.push(base);
        store1_inputs.push(v1);
        store1_inputs.push(start);
        let store1 = g
            .add(NodeKind::Store { location: MemoryLocation(1) }, store1_inputs, BciLoc::default())
            .unwrap();

        let mut store2_inputs = NodeList::new();
        store2_inputs.push(base);
        store2_inputs.push(v2);
        store2_inputs.push(start);
        let store2 = g
            .add(NodeKind::Store { location: MemoryLocation(1) }, store2_inputs, BciLoc::default())
            .unwrap();

        let merge = g.add(NodeKind::Merge { is_loop_header: false }, NodeList::new(), BciLoc::default()).unwrap();
        g.node_mut(then_begin).successors.push(merge);
        g.node_mut(else_begin).successors.push(merge);

        let mut load_inputs = NodeList::new();
        load_inputs.push(base);
        load_inputs.push(store1); // naive single-sided wiring the pass must fix
        let load = g.add(NodeKind::Load { location: MemoryLocation(1) }, load_inputs, BciLoc::default()).unwrap();

        let ret = g.add(NodeKind::Return, NodeList::new(), BciLoc::default()).unwrap();
        g.node_mut(merge).successors.push(ret);

        let analysis = Analysis::compute(&g).unwrap();
        build_memory_graph(&mut g, &analysis).unwrap();

        let mem_input = g
            .inputs(load)
            .iter()
            .copied()
            .find(|&i| matches!(g.node(i).kind, NodeKind::MemoryPhi { .. }))
            .expect("load should now depend on a memory phi");
        let phi_inputs = g.inputs(mem_input);
        assert_eq!(phi_inputs.len(), 2);
        assert!(phi_inputs.contains(&store1));
        assert!(phi_inputs.contains(&store2));
    }

    fn graph_with_guard() -> (Graph, NodeId, NodeId) {
        let mut g = Graph::new();
        let start = g.add(NodeKind::Start, NodeList::new(), BciLoc::default()).unwrap();
        let begin = g.add(NodeKind::Begin, NodeList::new(), BciLoc::default()).unwrap();
        g.node_mut(start).successors.push(begin);

        let cond = int_const(&mut g, 1);
        let mut guard_inputs = NodeList::new();
        guard_inputs.push(cond);
        let guard = g
            .add(
                NodeKind::Guard { reason: DeoptReason::NullCheckException, negated: false },
                guard_inputs,
                BciLoc::default(),
            )
            .unwrap();
        g.node_mut(begin).successors.push(guard);

        let ret = g.add(NodeKind::Return, NodeList::new(), BciLoc::default()).unwrap();
        g.node_mut(guard).successors.push(ret);

        (g, guard, ret)
    }

    #[test]
    fn lowering_a_guard_replaces_it_with_if_and_unreachable() {
        let (mut g, guard, ret) = graph_with_guard();
        lower_guards(&mut g).unwrap();

        assert!(!g.is_live(guard));
        let ifs = g.iterate(|k| matches!(k, NodeKind::If { .. }));
        assert_eq!(ifs.len(), 1);
        let if_node = ifs[0];
        assert_eq!(g.node(if_node).successors.len(), 2);

        let continue_begin = g.node(if_node).successors[0];
        assert_eq!(g.node(continue_begin).successors[0], ret);

        let deopt_begin = g.node(if_node).successors[1];
        let unreachables = g.iterate(|k| matches!(k, NodeKind::Unreachable));
        assert_eq!(unreachables.len(), 1);
        assert_eq!(g.node(deopt_begin).successors[0], unreachables[0]);
    }

    #[test]
    fn frame_state_is_attached_to_a_deoptimizing_node_and_unchained() {
        let mut g = Graph::new();
        let start = g.add(NodeKind::Start, NodeList::new(), BciLoc::default()).unwrap();
        let begin = g.add(NodeKind::Begin, NodeList::new(), BciLoc::default()).unwrap();
        g.node_mut(start).successors.push(begin);

        let fs = g
            .add(
                NodeKind::FrameState { bci: 3, num_locals: 0, num_stack: 0, has_outer: false },
                NodeList::new(),
                BciLoc::default(),
            )
            .unwrap();
        g.node_mut(begin).successors.push(fs);

        let cond = int_const(&mut g, 1);
        let mut guard_inputs = NodeList::new();
        guard_inputs.push(cond);
        let guard = g
            .add(
                NodeKind::Guard { reason: DeoptReason::NullCheckException, negated: false },
                guard_inputs,
                BciLoc::default(),
            )
            .unwrap();
        g.node_mut(fs).successors.push(guard);

        let ret = g.add(NodeKind::Return, NodeList::new(), BciLoc::default()).unwrap();
        g.node_mut(guard).successors.push(ret);

        let analysis = Analysis::compute(&g).unwrap();
        assign_frame_states(&mut g, &analysis).unwrap();

        assert_eq!(attached_frame_state(&g, guard), Some(fs));
        assert!(g.is_live(fs));
        assert!(g.node(fs).successors.is_empty());
        assert_eq!(g.node(begin).successors[0], guard);
    }
}
