//! Partial escape analysis / scalar replacement (§4.6). Tracks each
//! still-virtual allocation's field values in a side table instead of
//! materializing memory: field loads/stores against it are folded directly
//! against that table and spliced out of the graph. The object is
//! materialized — a `CommitAllocation` node is inserted, and every
//! remaining reference to the allocation is rewired to it — the moment it
//! escapes through a use that isn't a field access, or when a load/store
//! reaches it through a `MemoryPhi` (a control merge whose incoming field
//! values can't be resolved without per-field phis, a case this pass
//! handles conservatively rather than by building them; see DESIGN.md).
//!
//! Because this pass runs before scheduling, `Load`/`Store` nodes have no
//! block assignment yet, so ordering comes from the memory-dependency graph
//! rather than the dominator tree: each node's single memory-class input
//! (found by kind, not position, matching `scheduler.rs`'s own scan) points
//! to the `Store`/`CommitAllocation`/`MemoryPhi`/`Start` node whose effect
//! it depends on, and a node is processed only once its producer has been.

use crate::fx::FxHashMap;
use crate::ir::entities::NodeId;
use crate::ir::graph::Graph;
use crate::ir::node::{MemoryLocation, NodeKind};
use crate::oracle::TypeRef;
use crate::result::CompileResult;

#[derive(Default)]
struct VirtualState {
    ty: Option<TypeRef>,
    fields: FxHashMap<MemoryLocation, NodeId>,
    /// Net `MonitorEnter`/`MonitorExit` count folded away while still
    /// virtual; re-emitted against the real object if it materializes.
    lock_depth: u32,
}

fn is_memory_producer(graph: &Graph, n: NodeId) -> bool {
    let kind = &graph.node(n).kind;
    kind.memory_write_location().is_some() || matches!(kind, NodeKind::MemoryPhi { .. }) || matches!(kind, NodeKind::Start)
}

/// The node whose effect `n`'s access depends on, if any input names one.
fn memory_producer_of(graph: &Graph, n: NodeId) -> Option<NodeId> {
    graph.inputs(n).iter().copied().find(|&i| is_memory_producer(graph, i))
}

/// Memoized chain depth used purely to linearize processing order; ties
/// (multiple inputs into a `MemoryPhi`) take the deepest, i.e. assume the
/// merge is reached only after every incoming path's last write.
fn mem_depth(graph: &Graph, n: NodeId, memo: &mut FxHashMap<NodeId, u32>) -> u32 {
    if let Some(&d) = memo.get(&n) {
        return d;
    }
    let d = if matches!(&graph.node(n).kind, NodeKind::MemoryPhi { .. }) {
        graph
            .inputs(n)
            .iter()
            .map(|&i| mem_depth(graph, i, memo))
            .max()
            .unwrap_or(0)
            + 1
    } else {
        match memory_producer_of(graph, n) {
            Some(p) => mem_depth(graph, p, memo) + 1,
            None => 0,
        }
    };
    memo.insert(n, d);
    d
}

/// Run partial escape analysis over every allocation site in `graph`.
pub fn run(graph: &mut Graph) -> CompileResult<()> {
    let allocs = graph.iterate(|k| matches!(k, NodeKind::NewInstance { .. } | NodeKind::NewArray { .. }));
    if allocs.is_empty() {
        return Ok(());
    }

    let mut memo: FxHashMap<NodeId, u32> = FxHashMap::default();
    for &alloc in &allocs {
        process_allocation(graph, alloc, &mut memo)?;
    }
    Ok(())
}

fn alloc_type(graph: &Graph, alloc: NodeId) -> TypeRef {
    match &graph.node(alloc).kind {
        NodeKind::NewInstance { ty } | NodeKind::NewArray { ty } => *ty,
        _ => unreachable!("process_allocation only called on allocation nodes"),
    }
}

fn process_allocation(graph: &mut Graph, alloc: NodeId, memo: &mut FxHashMap<NodeId, u32>) -> CompileResult<()> {
    let mut state = VirtualState {
        ty: Some(alloc_type(graph, alloc)),
        ..Default::default()
    };
    let mut escaped = false;

    loop {
        if escaped {
            break;
        }
        // Re-snapshot usages every round: folding a load/store changes the
        // usage set, and a forced materialization must see the update.
        let mut accesses: Vec<NodeId> = graph
            .usages(alloc)
            .into_iter()
            .filter(|&u| {
                matches!(
                    graph.node(u).kind,
                    NodeKind::Load { .. } | NodeKind::Store { .. } | NodeKind::MonitorEnter | NodeKind::MonitorExit
                ) && graph.inputs(u)[0] == alloc
            })
            .collect();
        if accesses.is_empty() {
            break;
        }
        accesses.sort_by_key(|&n| mem_depth(graph, n, memo));
        let next = accesses[0];

        if let Some(producer) = memory_producer_of(graph, next) {
            if matches!(&graph.node(producer).kind, NodeKind::MemoryPhi { .. }) {
                materialize(graph, alloc, &mut state)?;
                escaped = true;
                continue;
            }
        }

        match graph.node(next).kind.clone() {
            NodeKind::Store { location } => {
                let value = graph.inputs(next)[1];
                state.fields.insert(location, value);
                splice_out_memory_node(graph, next)?;
            }
            NodeKind::Load { location } => {
                if let Some(&value) = state.fields.get(&location) {
                    graph.replace_at_usages(next, value);
                    splice_out_memory_node(graph, next)?;
                } else {
                    // Read of a field this pass never saw written (e.g. a
                    // loop-carried read, or one reached before any store on
                    // this path): give up precision rather than guess.
                    materialize(graph, alloc, &mut state)?;
                    escaped = true;
                }
            }
            NodeKind::MonitorEnter => {
                state.lock_depth += 1;
                splice_out_control_node(graph, next)?;
                graph.safe_delete(next)?;
            }
            NodeKind::MonitorExit => {
                state.lock_depth = state.lock_depth.saturating_sub(1);
                splice_out_control_node(graph, next)?;
                graph.safe_delete(next)?;
            }
            _ => unreachable!("filtered to Load/Store/MonitorEnter/MonitorExit above"),
        }
    }

    // Any remaining usage of `alloc` itself (an argument, a returned value,
    // a field of another escaping object) is an escape. Monitor ops were
    // already folded into `state.lock_depth` above and never reach here.
    let remaining = graph.usages(alloc);
    if !remaining.is_empty() {
        if !escaped {
            materialize(graph, alloc, &mut state)?;
        }
        return Ok(());
    }

    if !escaped {
        // Never escaped, every access folded: the allocation itself is now
        // dead weight in the control chain.
        splice_out_control_node(graph, alloc)?;
        graph.safe_delete(alloc)?;
    }
    Ok(())
}

/// Materialize `alloc`: emit a `CommitAllocation` carrying the tracked
/// field values (declaration order isn't recoverable from a bare
/// `MemoryLocation`, so fields are committed in ascending location order —
/// a documented simplification) and rewire every remaining reference.
fn materialize(graph: &mut Graph, alloc: NodeId, state: &mut VirtualState) -> CompileResult<()> {
    let mut locations: Vec<MemoryLocation> = state.fields.keys().copied().collect();
    locations.sort_by_key(|l| l.0);
    let mut assoc = crate::ir::node::NodeList::new();
    for loc in &locations {
        assoc.push(state.fields[loc]);
    }
    let field_count = assoc.len() as u32;
    let ty = state.ty.expect("state.ty set at process_allocation entry");
    let loc = graph.node(alloc).loc;
    let commit = graph.add(NodeKind::CommitAllocation { ty, field_count }, assoc, loc)?;

    // `alloc` is fixed; splice the commit in as its immediate successor so
    // the commit's effect lands at the point the allocation actually
    // escapes, not retroactively at its original site. Any lock depth
    // folded away while `alloc` was still virtual is re-acquired here
    // against the real object, since it now needs genuine monitor state.
    let old_succ = graph.node(alloc).successors.get(0).copied();
    graph.node_mut(commit).successors.clear();
    let mut tail = commit;
    for _ in 0..state.lock_depth {
        let mut enter_inputs = crate::ir::node::NodeList::new();
        enter_inputs.push(commit);
        let reenter = graph.add(NodeKind::MonitorEnter, enter_inputs, loc)?;
        graph.node_mut(tail).successors.push(reenter);
        tail = reenter;
    }
    if let Some(succ) = old_succ {
        graph.node_mut(tail).successors.push(succ);
        graph.node_mut(alloc).successors[0] = commit;
    }
    graph.replace_at_usages(alloc, commit);
    Ok(())
}

/// Splice a floating `Load`/`Store` out of the memory-dependency graph,
/// rewiring anything that depended on it as a memory producer to its own
/// producer instead, then delete it.
fn splice_out_memory_node(graph: &mut Graph, n: NodeId) -> CompileResult<()> {
    if let Some(producer) = memory_producer_of(graph, n) {
        graph.replace_at_usages(n, producer);
    }
    graph.safe_delete(n)
}

/// Splice a fixed control node with exactly one successor out of the
/// control chain (used for dead allocations once fully scalar-replaced).
fn splice_out_control_node(graph: &mut Graph, n: NodeId) -> CompileResult<()> {
    if let Some(&succ) = graph.node(n).successors.first() {
        let preds: Vec<NodeId> = graph
            .all_live_nodes()
            .into_iter()
            .filter(|&p| graph.node(p).successors.iter().any(|&s| s == n))
            .collect();
        for pred in preds {
            for s in graph.node_mut(pred).successors.iter_mut() {
                if *s == n {
                    *s = succ;
                }
            }
        }
    }
    graph.node_mut(n).successors.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::graph::Graph;
    use crate::ir::node::NodeList;
    use crate::ir::sourceloc::BciLoc;
    use crate::oracle::ConstantValue;

    fn int_const(g: &mut Graph, v: i64) -> NodeId {
        g.add(
            NodeKind::Constant(ConstantValue::Int { bits: 32, value: v }),
            NodeList::new(),
            BciLoc::default(),
        )
        .unwrap()
    }

    /// `new T; store f=7; x = load f; return x` with no escape: the
    /// allocation and its field accesses should all fold away.
    #[test]
    fn store_then_load_folds_to_the_stored_value() {
        let mut g = Graph::new();
        let start = g.add(NodeKind::Start, NodeList::new(), BciLoc::default()).unwrap();
        let alloc = g
            .add(NodeKind::NewInstance { ty: TypeRef(0) }, NodeList::new(), BciLoc::default())
            .unwrap();
        g.node_mut(start).successors.push(alloc);
        let ret = g.add(NodeKind::Return, NodeList::new(), BciLoc::default()).unwrap();
        g.node_mut(alloc).successors.push(ret);

        let seven = int_const(&mut g, 7);
        let mut store_inputs = NodeList::new();
        store_inputs.push(alloc);
        store_inputs.push(seven);
        store_inputs.push(start);
        let store = g
            .add(
                NodeKind::Store {
                    location: MemoryLocation(1),
                },
                store_inputs,
                BciLoc::default(),
            )
            .unwrap();

        let mut load_inputs = NodeList::new();
        load_inputs.push(alloc);
        load_inputs.push(store);
        let load = g
            .add(
                NodeKind::Load {
                    location: MemoryLocation(1),
                },
                load_inputs,
                BciLoc::default(),
            )
            .unwrap();

        let mut user_inputs = NodeList::new();
        user_inputs.push(load);
        let user = g
            .add(NodeKind::UnaryOp(crate::ir::node::UnaryOpKind::Neg), user_inputs, BciLoc::default())
            .unwrap();
        g.node_mut(ret).successors.push(user);

        run(&mut g).unwrap();

        assert!(!g.is_live(load));
        assert!(!g.is_live(store));
        assert!(!g.is_live(alloc));
        assert_eq!(g.inputs(user)[0], seven);
    }

    /// An allocation passed to another node (simulated by making it an
    /// input of an unrelated unary op) must materialize.
    #[test]
    fn escaping_allocation_materializes() {
        let mut g = Graph::new();
        let start = g.add(NodeKind::Start, NodeList::new(), BciLoc::default()).unwrap();
        let alloc = g
            .add(NodeKind::NewInstance { ty: TypeRef(0) }, NodeList::new(), BciLoc::default())
            .unwrap();
        g.node_mut(start).successors.push(alloc);
        let ret = g.add(NodeKind::Return, NodeList::new(), BciLoc::default()).unwrap();
        g.node_mut(alloc).successors.push(ret);

        let mut user_inputs = NodeList::new();
        user_inputs.push(alloc);
        let user = g
            .add(NodeKind::UnaryOp(crate::ir::node::UnaryOpKind::Neg), user_inputs, BciLoc::default())
            .unwrap();
        g.node_mut(ret).successors.push(user);

        run(&mut g).unwrap();

        assert!(!matches!(g.node(g.inputs(user)[0]).kind, NodeKind::NewInstance { .. }));
        assert!(matches!(g.node(g.inputs(user)[0]).kind, NodeKind::CommitAllocation { .. }));
    }

    /// A balanced `monitorenter`/`monitorexit` pair on a non-escaping
    /// allocation folds into the lock depth instead of forcing materialization.
    #[test]
    fn balanced_monitor_ops_fold_away_without_materializing() {
        let mut g = Graph::new();
        let start = g.add(NodeKind::Start, NodeList::new(), BciLoc::default()).unwrap();
        let alloc = g
            .add(NodeKind::NewInstance { ty: TypeRef(0) }, NodeList::new(), BciLoc::default())
            .unwrap();
        g.node_mut(start).successors.push(alloc);

        let mut enter_inputs = NodeList::new();
        enter_inputs.push(alloc);
        let enter = g.add(NodeKind::MonitorEnter, enter_inputs, BciLoc::default()).unwrap();
        g.node_mut(alloc).successors.push(enter);

        let mut exit_inputs = NodeList::new();
        exit_inputs.push(alloc);
        let exit = g.add(NodeKind::MonitorExit, exit_inputs, BciLoc::default()).unwrap();
        g.node_mut(enter).successors.push(exit);

        let ret = g.add(NodeKind::Return, NodeList::new(), BciLoc::default()).unwrap();
        g.node_mut(exit).successors.push(ret);

        run(&mut g).unwrap();

        assert!(!g.is_live(alloc));
        assert!(!g.is_live(enter));
        assert!(!g.is_live(exit));
    }

    /// An allocation that escapes while still holding an unreleased lock
    /// re-acquires that lock against the real, materialized object.
    #[test]
    fn escaping_allocation_reacquires_its_folded_lock_depth() {
        let mut g = Graph::new();
        let start = g.add(NodeKind::Start, NodeList::new(), BciLoc::default()).unwrap();
        let alloc = g
            .add(NodeKind::NewInstance { ty: TypeRef(0) }, NodeList::new(), BciLoc::default())
            .unwrap();
        g.node_mut(start).successors.push(alloc);

        let mut enter_inputs = NodeList::new();
        enter_inputs.push(alloc);
        let enter = g.add(NodeKind::MonitorEnter, enter_inputs, BciLoc::default()).unwrap();
        g.node_mut(alloc).successors.push(enter);

        let ret = g.add(NodeKind::Return, NodeList::new(), BciLoc::default()).unwrap();
        g.node_mut(enter).successors.push(ret);

        let mut user_inputs = NodeList::new();
        user_inputs.push(alloc);
        let user = g
            .add(NodeKind::UnaryOp(crate::ir::node::UnaryOpKind::Neg), user_inputs, BciLoc::default())
            .unwrap();
        g.node_mut(ret).successors.push(user);

        run(&mut g).unwrap();

        let commit = g.inputs(user)[0];
        assert!(matches!(g.node(commit).kind, NodeKind::CommitAllocation { .. }));
        assert!(!g.is_live(enter));

        let reacquired = g.node(commit).successors[0];
        assert!(matches!(g.node(reacquired).kind, NodeKind::MonitorEnter));
        assert_eq!(g.inputs(reacquired)[0], commit);
    }
}
