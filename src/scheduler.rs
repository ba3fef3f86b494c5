//! Floating-node scheduling (§4.4): fixes every floating node into one of
//! the blocks `analysis::compute_cfg` already built for the graph's fixed
//! skeleton. Grounded on the classic sea-of-nodes "schedule early / late"
//! algorithm (as used by `cranelift-codegen`'s own instruction scheduler
//! and by the broader Hotspot-C2/V8-Turbofan lineage this spec's language
//! is drawn from): a node's earliest legal block is the deepest (in
//! dominator-tree terms) block its inputs force it into; its latest legal
//! block is the shallowest block still dominating every one of its uses.

use crate::analysis::Analysis;
use crate::fx::{FxHashMap, FxHashSet};
use crate::ir::entities::{BlockId, NodeId};
use crate::ir::graph::Graph;
use crate::ir::node::{MemoryLocation, NodeKind};
use crate::result::CompileResult;

/// Where floating nodes end up placed, and their order inside each block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleStrategy {
    /// Every floating node sits in the deepest block its inputs force.
    Earliest,
    /// Every floating node sinks as close to its uses as possible, but no
    /// deeper into loop nesting than its earliest placement requires.
    LatestOutOfLoops,
}

/// How floating memory reads are placed relative to writes that might
/// alias them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemorySchedule {
    /// Reads are pinned at their earliest legal block; no sinking.
    None,
    /// Reads may sink toward their latest legal block as long as no
    /// intervening block contains a write that may alias their location.
    Optimal,
}

pub struct Schedule {
    block_of: FxHashMap<NodeId, BlockId>,
    order: FxHashMap<BlockId, Vec<NodeId>>,
}

impl Schedule {
    pub fn block_of(&self, n: NodeId) -> Option<BlockId> {
        self.block_of.get(&n).copied()
    }

    pub fn order_in(&self, b: BlockId) -> &[NodeId] {
        self.order.get(&b).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

fn dom_tree_depths(analysis: &Analysis) -> FxHashMap<BlockId, u32> {
    let mut depth: FxHashMap<BlockId, u32> = FxHashMap::default();
    for b in analysis.cfg.blocks_in_rpo() {
        let mut d = 0;
        let mut cur = b;
        while let Some(p) = analysis.domtree.idom(cur) {
            d += 1;
            cur = p;
        }
        depth.insert(b, d);
    }
    depth
}

/// The block a use of `n` effectively occupies for scheduling purposes:
/// ordinary uses occupy their own block, but a `Phi` input is only live
/// along the corresponding incoming edge, so it's charged to that
/// predecessor block instead (§4.4 edge-case policy).
fn use_block(graph: &Graph, analysis: &Analysis, user: NodeId, producer: NodeId) -> Option<BlockId> {
    let user_node = graph.node(user);
    if matches!(user_node.kind, NodeKind::Phi) {
        if let Some(slot) = user_node.inputs.iter().position(|&i| i == producer) {
            let merge = analysis
                .cfg
                .block_of(user)
                .expect("phi must be scheduled in a block headed by its merge");
            return analysis.cfg.block(merge).predecessors.get(slot).copied();
        }
    }
    analysis.cfg.block_of(user)
}

struct Scheduler<'a> {
    graph: &'a Graph,
    analysis: &'a Analysis,
    depths: FxHashMap<BlockId, u32>,
    earliest: FxHashMap<NodeId, BlockId>,
    in_progress: FxHashSet<NodeId>,
}

impl<'a> Scheduler<'a> {
    fn earliest_block(&mut self, n: NodeId) -> BlockId {
        if let Some(&b) = self.earliest.get(&n) {
            return b;
        }
        if let Some(b) = self.analysis.cfg.block_of(n) {
            // Fixed node: already placed.
            self.earliest.insert(n, b);
            return b;
        }
        let root = self.analysis.cfg.entry();
        let mut best = root;
        let mut best_depth = 0u32;
        for &input in &self.graph.node(n).inputs.clone() {
            let input_block = self.earliest_block(input);
            let d = self.depths.get(&input_block).copied().unwrap_or(0);
            if d > best_depth {
                best_depth = d;
                best = input_block;
            }
        }
        self.earliest.insert(n, best);
        best
    }

    /// The common dominator of every block a floating node `n` is used
    /// from, i.e. its latest legal block — `None` if `n` has no uses at
    /// all (dead, or only used by other not-yet-placed floating nodes
    /// that themselves reduce to no live block).
    fn latest_block(&mut self, n: NodeId) -> Option<BlockId> {
        let mut lca: Option<BlockId> = None;
        for user in self.graph.usages(n) {
            let user_block = if self.analysis.cfg.block_of(user).is_some() {
                use_block(self.graph, self.analysis, user, n)
            } else {
                // The user is itself floating: its own scheduled block
                // constrains `n`, once that user is placed.
                Some(self.resolve(user))
            };
            if let Some(ub) = user_block {
                lca = Some(match lca {
                    None => ub,
                    Some(cur) => self.analysis.domtree.common_dominator(cur, ub),
                });
            }
        }
        lca
    }

    /// Resolve `n`'s final block under the active strategy, memoizing in
    /// `earliest` (reused as the "placed" map once a node is resolved —
    /// after this call `earliest[n]` holds the *final* placement, not
    /// necessarily the literal earliest block).
    fn resolve(&mut self, n: NodeId) -> BlockId {
        if let Some(b) = self.analysis.cfg.block_of(n) {
            return b;
        }
        if !self.in_progress.insert(n) {
            // Cycle through floating nodes only reachable via other
            // floating nodes (shouldn't happen in an acyclic data graph);
            // fall back to the earliest block computed so far.
            return *self.earliest.get(&n).unwrap_or(&self.analysis.cfg.entry());
        }
        let early = self.earliest_block(n);
        self.in_progress.remove(&n);
        early
    }
}

/// Schedule every floating node in `graph` into the blocks of `analysis`'s
/// CFG, under the given strategy and memory-scheduling mode.
pub fn schedule(
    graph: &Graph,
    analysis: &Analysis,
    strategy: ScheduleStrategy,
    memory_mode: MemorySchedule,
) -> CompileResult<Schedule> {
    analysis.assert_fresh(graph);
    let depths = dom_tree_depths(analysis);
    let mut sched = Scheduler {
        graph,
        analysis,
        depths,
        earliest: FxHashMap::default(),
        in_progress: FxHashSet::default(),
    };

    // Phis are pinned to their merge's block by construction; they never
    // go through schedule-early/late.
    let floating: Vec<NodeId> = graph.iterate(|k| k.is_floating() && !matches!(k, NodeKind::Phi));

    let mut block_of: FxHashMap<NodeId, BlockId> = FxHashMap::default();
    for &n in &floating {
        let early = sched.earliest_block(n);
        let placed = match strategy {
            ScheduleStrategy::Earliest => early,
            ScheduleStrategy::LatestOutOfLoops => {
                let late = sched.latest_block(n).unwrap_or(early);
                pick_shallowest_loop_depth(analysis, early, late)
            }
        };
        block_of.insert(n, placed);
    }

    if matches!(memory_mode, MemorySchedule::Optimal) {
        sink_reads_past_non_aliasing_writes(graph, analysis, &mut block_of);
    }

    for p in graph.iterate(|k| matches!(k, NodeKind::Phi)) {
        if let Some(b) = analysis.cfg.block_of(p) {
            block_of.insert(p, b);
        }
    }

    let order = order_within_blocks(graph, analysis, &block_of);

    Ok(Schedule { block_of, order })
}

/// Walk from `late` up toward `early` along the dominator tree, returning
/// the block with the smallest loop nesting depth seen (ties keep the
/// deepest/latest candidate, i.e. hoist only as far out of loops as
/// necessary).
fn pick_shallowest_loop_depth(analysis: &Analysis, early: BlockId, late: BlockId) -> BlockId {
    let mut best = late;
    let mut best_depth = analysis.loops.loop_depth(late);
    let mut cur = late;
    while cur != early {
        let Some(parent) = analysis.domtree.idom(cur) else {
            break;
        };
        cur = parent;
        let d = analysis.loops.loop_depth(cur);
        if d < best_depth {
            best_depth = d;
            best = cur;
        }
        if cur == early {
            break;
        }
    }
    best
}

fn sink_reads_past_non_aliasing_writes(
    graph: &Graph,
    analysis: &Analysis,
    block_of: &mut FxHashMap<NodeId, BlockId>,
) {
    let reads: Vec<(NodeId, MemoryLocation)> = graph
        .iterate(|k| k.memory_read_location().is_some())
        .into_iter()
        .map(|n| (n, graph.node(n).kind.memory_read_location().unwrap()))
        .collect();

    for (read, location) in reads {
        let Some(&current) = block_of.get(&read) else {
            continue;
        };
        // The read's memory-state input already anchors it no earlier
        // than the write it was built against; only consider sinking
        // *later* along the same dominator chain toward its latest legal
        // block, stopping at the first aliasing write.
        let Some(memory_input) = graph
            .inputs(read)
            .iter()
            .copied()
            .find(|&i| graph.node(i).kind.memory_write_location().is_some() || matches!(graph.node(i).kind, NodeKind::MemoryPhi { .. }))
        else {
            continue;
        };
        let anchor_block = analysis
            .cfg
            .block_of(memory_input)
            .or_else(|| block_of.get(&memory_input).copied())
            .unwrap_or(current);

        // Candidate sink target: the read's own resolved block is already
        // the furthest the base scheduler placed it; we only need to
        // verify no aliasing write lies strictly between `anchor_block`
        // and `current` along the dominator chain (inclusive of
        // `current`, exclusive of `anchor_block`).
        let mut cur = current;
        let mut blocked = false;
        while cur != anchor_block {
            if block_has_aliasing_write(graph, analysis, cur, location) {
                blocked = true;
                break;
            }
            match analysis.domtree.idom(cur) {
                Some(p) => cur = p,
                None => break,
            }
        }
        if blocked {
            // Conservative fallback: pin the read at the anchor block,
            // the one place it's definitely safe.
            block_of.insert(read, anchor_block);
        }
    }
}

fn block_has_aliasing_write(
    graph: &Graph,
    analysis: &Analysis,
    b: BlockId,
    location: MemoryLocation,
) -> bool {
    analysis.cfg.block(b).fixed_nodes.iter().any(|&n| {
        graph
            .node(n)
            .kind
            .memory_write_location()
            .map(|w| w.may_alias(location))
            .unwrap_or(false)
    })
}

fn order_within_blocks(
    graph: &Graph,
    analysis: &Analysis,
    block_of: &FxHashMap<NodeId, BlockId>,
) -> FxHashMap<BlockId, Vec<NodeId>> {
    let mut members: FxHashMap<BlockId, Vec<NodeId>> = FxHashMap::default();
    for b in analysis.cfg.blocks_in_rpo() {
        members.entry(b).or_default().extend(analysis.cfg.block(b).fixed_nodes.iter().copied());
    }
    for (&n, &b) in block_of {
        if analysis.cfg.block_of(n).is_none() {
            members.entry(b).or_default().push(n);
        }
    }

    let mut order = FxHashMap::default();
    for (b, nodes) in members {
        order.insert(b, topo_sort_block(graph, nodes));
    }
    order
}

/// Kahn's algorithm over the intra-block input/use edges, tie-broken by
/// node id for reproducibility (§5 "deterministic work-list order seeded
/// by node id").
fn topo_sort_block(graph: &Graph, nodes: Vec<NodeId>) -> Vec<NodeId> {
    let in_block: FxHashSet<NodeId> = nodes.iter().copied().collect();
    let mut indegree: FxHashMap<NodeId, usize> = FxHashMap::default();
    for &n in &nodes {
        let deg = graph
            .inputs(n)
            .iter()
            .filter(|i| in_block.contains(i))
            .count();
        indegree.insert(n, deg);
    }
    let mut ready: Vec<NodeId> = nodes
        .iter()
        .copied()
        .filter(|n| indegree[n] == 0)
        .collect();
    ready.sort();
    let mut result = Vec::with_capacity(nodes.len());
    let mut heap = ready;
    while !heap.is_empty() {
        heap.sort();
        let n = heap.remove(0);
        result.push(n);
        for &user in &graph.usages(n) {
            if let Some(deg) = indegree.get_mut(&user) {
                if in_block.contains(&user) {
                    *deg -= 1;
                    if *deg == 0 {
                        heap.push(user);
                    }
                }
            }
        }
    }
    if result.len() != nodes.len() {
        // A cycle within a block is only possible through a bug upstream;
        // fall back to node-id order rather than dropping nodes.
        let mut rest: Vec<NodeId> = nodes.into_iter().filter(|n| !result.contains(n)).collect();
        rest.sort();
        result.extend(rest);
    }
    result
}
