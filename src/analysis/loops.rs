//! Loop nesting analysis (§4.3): natural loops from back edges, and the
//! nesting depth used by the scheduler's LATEST_OUT_OF_LOOPS strategy and
//! by profile-independent frequency estimates. Grounded on
//! cranelift-codegen's `loop_analysis.rs` pattern (back edges detected from
//! a dominator tree, loop body grown by walking predecessors).

use cranelift_entity::PrimaryMap;

use crate::analysis::cfg::ControlFlowGraph;
use crate::analysis::domtree::DominatorTree;
use crate::fx::FxHashMap;
use crate::ir::entities::{BlockId, LoopId};

#[derive(Clone, Debug)]
struct LoopData {
    header: BlockId,
    parent: Option<LoopId>,
    depth: u32,
}

/// The forest of natural loops found in a CFG, plus each block's innermost
/// containing loop.
pub struct LoopForest {
    loops: PrimaryMap<LoopId, LoopData>,
    block_loop: FxHashMap<BlockId, LoopId>,
}

impl LoopForest {
    pub fn num_loops(&self) -> usize {
        self.loops.len()
    }

    pub fn header(&self, l: LoopId) -> BlockId {
        self.loops[l].header
    }

    /// The loop immediately enclosing `l`, if any (nested loops).
    pub fn parent(&self, l: LoopId) -> Option<LoopId> {
        self.loops[l].parent
    }

    /// Nesting depth of loop `l`: `0` for an outermost loop.
    pub fn depth_of_loop(&self, l: LoopId) -> u32 {
        self.loops[l].depth
    }

    /// `b`'s innermost containing loop, if it is in one at all.
    pub fn innermost(&self, b: BlockId) -> Option<LoopId> {
        self.block_loop.get(&b).copied()
    }

    /// Loop nesting depth of `b`: `0` if not in any loop.
    pub fn loop_depth(&self, b: BlockId) -> u32 {
        self.innermost(b)
            .map(|l| self.loops[l].depth + 1)
            .unwrap_or(0)
    }

    /// Is `b` the header of the loop it is innermost to?
    pub fn is_loop_header(&self, b: BlockId) -> bool {
        self.innermost(b).map(|l| self.header(l) == b).unwrap_or(false)
    }
}

/// Find natural loops in `cfg` using `domtree`, and assign nesting depth.
pub fn compute_loops(cfg: &ControlFlowGraph, domtree: &DominatorTree) -> LoopForest {
    // A back edge is a CFG edge `tail -> header` where `header` dominates
    // `tail`. Its natural loop is `header` plus every block that can reach
    // `tail` without going through `header`.
    let mut back_edges: Vec<(BlockId, BlockId)> = Vec::new();
    for b in cfg.blocks_in_rpo() {
        for &succ in &cfg.block(b).successors {
            if domtree.dominates(succ, b) {
                back_edges.push((b, succ));
            }
        }
    }

    // Group back edges by header: a header may have multiple back edges
    // (e.g. several `continue`s), all contributing to the same loop body.
    let mut by_header: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
    for (tail, header) in back_edges {
        by_header.entry(header).or_default().push(tail);
    }

    let mut loops: PrimaryMap<LoopId, LoopData> = PrimaryMap::new();
    let mut header_to_loop: FxHashMap<BlockId, LoopId> = FxHashMap::default();
    let mut loop_body: FxHashMap<LoopId, Vec<BlockId>> = FxHashMap::default();

    // Process headers in RPO order so an outer loop's header is assigned
    // before any loop nested inside it.
    let mut headers: Vec<BlockId> = by_header.keys().copied().collect();
    headers.sort_by_key(|&b| cfg.block(b).rpo_number);

    for header in headers {
        let tails = by_header[&header].clone();
        let mut body: FxHashMap<BlockId, ()> = FxHashMap::default();
        body.insert(header, ());
        let mut stack = tails;
        while let Some(b) = stack.pop() {
            if body.insert(b, ()).is_some() {
                continue;
            }
            for &p in &cfg.block(b).predecessors {
                if !body.contains_key(&p) {
                    stack.push(p);
                }
            }
        }
        let id = loops.push(LoopData {
            header,
            parent: None,
            depth: 0,
        });
        header_to_loop.insert(header, id);
        loop_body.insert(id, body.keys().copied().collect());
    }

    // Nesting: loop A is the parent of loop B if A's body strictly
    // contains B's header (and A != B), taking the smallest such A.
    let loop_ids: Vec<LoopId> = loops.keys().collect();
    for &inner in &loop_ids {
        let inner_header = loops[inner].header;
        let mut best: Option<(LoopId, usize)> = None;
        for &outer in &loop_ids {
            if outer == inner {
                continue;
            }
            let body = &loop_body[&outer];
            if body.contains(&inner_header) {
                let size = body.len();
                if best.map(|(_, s)| size < s).unwrap_or(true) {
                    best = Some((outer, size));
                }
            }
        }
        loops[inner].parent = best.map(|(l, _)| l);
    }
    // Depths, outer loops (no parent) first.
    let mut changed = true;
    while changed {
        changed = false;
        for &id in &loop_ids {
            let want = match loops[id].parent {
                None => 0,
                Some(p) => loops[p].depth + 1,
            };
            if loops[id].depth != want {
                loops[id].depth = want;
                changed = true;
            }
        }
    }

    // Each block's innermost loop: among loops whose body contains it,
    // the one with the smallest body (deepest nesting).
    let mut block_loop: FxHashMap<BlockId, LoopId> = FxHashMap::default();
    for b in cfg.blocks_in_rpo() {
        let mut best: Option<(LoopId, usize)> = None;
        for &id in &loop_ids {
            let body = &loop_body[&id];
            if body.contains(&b) {
                let size = body.len();
                if best.map(|(_, s)| size < s).unwrap_or(true) {
                    best = Some((id, size));
                }
            }
        }
        if let Some((id, _)) = best {
            block_loop.insert(b, id);
        }
    }

    LoopForest { loops, block_loop }
}
