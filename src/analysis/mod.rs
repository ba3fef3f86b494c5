//! Global analyses over a built graph (§4.3): control-flow graph,
//! dominator/post-dominator trees, and loop nesting. Each is computed
//! fresh from the graph's current fixed-node skeleton; none mutate the
//! graph. Downstream passes that also need a CFG (the scheduler,
//! conditional elimination, escape analysis) take `&Analysis` rather than
//! recomputing their own.

pub mod cfg;
pub mod domtree;
pub mod loops;

pub use cfg::{BlockData, ControlFlowGraph};
pub use domtree::{DominatorTree, PostDominatorTree};
pub use loops::LoopForest;

use crate::ir::graph::Graph;
use crate::result::CompileResult;

/// The bundle of global analyses a single compilation pipeline keeps
/// alive between passes. Recomputed once after the graph stabilizes
/// structurally (post-canonicalization, post-inlining) rather than kept
/// continuously up to date, matching `cranelift-codegen`'s own
/// once-per-compilation cfg/domtree lifecycle.
pub struct Analysis {
    pub cfg: ControlFlowGraph,
    pub domtree: DominatorTree,
    pub post_domtree: PostDominatorTree,
    pub loops: LoopForest,
}

impl Analysis {
    /// Compute every global analysis over `graph`'s current state.
    pub fn compute(graph: &Graph) -> CompileResult<Self> {
        let cfg = cfg::compute_cfg(graph)?;
        let domtree = DominatorTree::compute(&cfg);
        let post_domtree = PostDominatorTree::compute(&cfg);
        let loops = loops::compute_loops(&cfg, &domtree);
        Ok(Self {
            cfg,
            domtree,
            post_domtree,
            loops,
        })
    }

    /// Panics in debug builds if `graph` has mutated since this analysis
    /// bundle was computed.
    pub fn assert_fresh(&self, graph: &Graph) {
        self.cfg.assert_fresh(graph);
    }
}
