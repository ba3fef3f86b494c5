//! Dominator-stamp conditional elimination (§4.5 second half). Walks the
//! dominator tree maintaining a stack-scoped *info map* from value node to
//! `(stamp, guarding node)`; at every guarding construct it either proves
//! the condition redundant against accumulated info, or registers the
//! implied stamp and schedules an undo for when the block is left.
//! Grounded on the same dominator-tree-walk shape as `dominator_tree.rs`'s
//! own consumers, adapted from a block-scoped renaming pass into a
//! fact-propagation one.

use crate::analysis::Analysis;
use crate::fx::FxHashMap;
use crate::ir::entities::{BlockId, NodeId};
use crate::ir::graph::Graph;
use crate::ir::node::NodeKind;
use crate::result::CompileResult;
use crate::stamp::{IntegerStamp, Stamp, TypeHierarchy};

#[derive(Clone, Copy)]
struct InfoEntry {
    stamp: Stamp,
    guard: NodeId,
}

enum Undo {
    Remove(NodeId),
    Restore(NodeId, InfoEntry),
}

fn bool_stamp(truth: bool) -> Stamp {
    Stamp::Integer(IntegerStamp::constant(1, truth as i64))
}

fn as_known_bool(stamp: &Stamp) -> Option<bool> {
    match stamp {
        Stamp::Integer(i) => i.as_constant().map(|v| v != 0),
        _ => None,
    }
}

/// Run conditional elimination over the whole graph, using `analysis`'s
/// dominator tree for the walk order and `types` for stamp joins.
pub fn eliminate(graph: &mut Graph, analysis: &Analysis, types: &dyn TypeHierarchy) -> CompileResult<()> {
    analysis.assert_fresh(graph);
    let mut info: FxHashMap<NodeId, InfoEntry> = FxHashMap::default();
    visit_block(graph, analysis, analysis.domtree.root(), &mut info, types)?;
    Ok(())
}

fn children_of(analysis: &Analysis, b: BlockId) -> Vec<BlockId> {
    analysis
        .cfg
        .blocks_in_rpo()
        .into_iter()
        .filter(|&c| analysis.domtree.idom(c) == Some(b))
        .collect()
}

fn visit_block(
    graph: &mut Graph,
    analysis: &Analysis,
    block: BlockId,
    info: &mut FxHashMap<NodeId, InfoEntry>,
    types: &dyn TypeHierarchy,
) -> CompileResult<()> {
    let mut undo: Vec<Undo> = Vec::new();
    let fixed_nodes = analysis.cfg.block(block).fixed_nodes.clone();

    for &n in &fixed_nodes {
        match &graph.node(n).kind {
            NodeKind::Guard { negated, .. } => {
                let negated = *negated;
                let cond = graph.inputs(n)[0];
                if let Some(existing) = info.get(&cond).copied() {
                    // The condition's truth at this point is already
                    // pinned by a dominating guard/branch on the same
                    // value: this guard proves nothing new, so every
                    // consumer of it can be rewired to the surviving
                    // guarding node instead.
                    if as_known_bool(&existing.stamp) == Some(!negated) {
                        graph.replace_at_usages(n, existing.guard);
                        continue;
                    }
                }
                record(info, &mut undo, cond, bool_stamp(!negated), n);
            }
            NodeKind::If { .. } => {
                // Branch-implied facts are registered per-successor inside
                // that successor's own block visit (the fact only holds on
                // one edge out of the `If`), not here.
            }
            _ => {}
        }
    }

    for child in children_of(analysis, block) {
        let mark = undo.len();
        apply_branch_fact_if_any(graph, analysis, block, child, info, &mut undo);
        visit_block(graph, analysis, child, info, types)?;
        drain_undo_from(info, &mut undo, mark);
    }

    drain_undo_from(info, &mut undo, 0);
    Ok(())
}

/// If `child` is reached from `block` via exactly one `If`'s branch,
/// register the implied boolean fact for that edge.
fn apply_branch_fact_if_any(
    graph: &Graph,
    analysis: &Analysis,
    block: BlockId,
    child: BlockId,
    info: &mut FxHashMap<NodeId, InfoEntry>,
    undo: &mut Vec<Undo>,
) {
    let Some(&last) = analysis.cfg.block(block).fixed_nodes.last() else {
        return;
    };
    let &NodeKind::If { negated } = &graph.node(last).kind else {
        return;
    };
    let successors = &graph.node(last).successors;
    let Some(edge) = successors.iter().position(|&s| analysis.cfg.block_of(s) == Some(child)) else {
        return;
    };
    let cond = graph.inputs(last)[0];
    // edge 0 is the "then" (condition true unless negated), edge 1 the
    // "else" branch, per `NodeKind::If`'s doc comment.
    let branch_true = edge == 0;
    let truth = branch_true != negated;
    record(info, undo, cond, bool_stamp(truth), last);
}

fn record(info: &mut FxHashMap<NodeId, InfoEntry>, undo: &mut Vec<Undo>, key: NodeId, stamp: Stamp, guard: NodeId) {
    match info.insert(key, InfoEntry { stamp, guard }) {
        Some(prev) => undo.push(Undo::Restore(key, prev)),
        None => undo.push(Undo::Remove(key)),
    }
}

/// Drain every undo action pushed since `mark`, in reverse order — "so
/// siblings do not see each other's facts" (§4.5).
fn drain_undo_from(info: &mut FxHashMap<NodeId, InfoEntry>, undo: &mut Vec<Undo>, mark: usize) {
    while undo.len() > mark {
        match undo.pop().unwrap() {
            Undo::Remove(k) => {
                info.remove(&k);
            }
            Undo::Restore(k, prev) => {
                info.insert(k, prev);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::graph::Graph;
    use crate::ir::node::{DeoptReason, NodeList};
    use crate::ir::sourceloc::BciLoc;
    use crate::oracle::ConstantValue;
    use crate::stamp::test_types::ToyHierarchy;

    /// `begin -> guard(cond) -> guard(cond) -> return`: the second guard on
    /// the same already-proved condition is redundant.
    fn graph_with_redundant_guard() -> (Graph, NodeId, NodeId) {
        let mut g = Graph::new();
        let start = g.add(NodeKind::Start, NodeList::new(), BciLoc::default()).unwrap();
        let begin = g.add(NodeKind::Begin, NodeList::new(), BciLoc::default()).unwrap();
        g.node_mut(start).successors.push(begin);

        let cond = g
            .add(
                NodeKind::Constant(ConstantValue::Int { bits: 32, value: 1 }),
                NodeList::new(),
                BciLoc::default(),
            )
            .unwrap();
        let mut inputs1 = NodeList::new();
        inputs1.push(cond);
        let guard1 = g
            .add(
                NodeKind::Guard {
                    reason: DeoptReason::NullCheckException,
                    negated: false,
                },
                inputs1,
                BciLoc::default(),
            )
            .unwrap();
        g.node_mut(begin).successors.push(guard1);

        let mut inputs2 = NodeList::new();
        inputs2.push(cond);
        let guard2 = g
            .add(
                NodeKind::Guard {
                    reason: DeoptReason::NullCheckException,
                    negated: false,
                },
                inputs2,
                BciLoc::default(),
            )
            .unwrap();
        g.node_mut(guard1).successors.push(guard2);

        let ret = g.add(NodeKind::Return, NodeList::new(), BciLoc::default()).unwrap();
        g.node_mut(guard2).successors.push(ret);

        (g, guard1, guard2)
    }

    #[test]
    fn second_identical_guard_is_rewired_to_the_first() {
        let (mut g, guard1, guard2) = graph_with_redundant_guard();
        let analysis = Analysis::compute(&g).unwrap();
        let types = ToyHierarchy;
        eliminate(&mut g, &analysis, &types).unwrap();
        assert!(g.usages(guard2).is_empty());
        let _ = guard1;
    }
}
