//! Dominator (and post-dominator) tree computation (§4.3). Grounded on
//! cranelift-codegen's `dominator_tree.rs`: immediate dominators are found
//! by iterating a reverse-postorder "intersect" walk up two blocks'
//! dominator chains until they meet, repeated to a fixpoint. We skip that
//! file's `rpo_number`-spacing micro-optimization (STRIDE) — not needed at
//! the block counts this crate schedules — but the core algorithm,
//! including the post-dominator tree built the same way over reversed
//! edges, is the same one.

use crate::analysis::cfg::ControlFlowGraph;
use crate::fx::FxHashMap;
use crate::ir::entities::BlockId;

/// Immediate-dominance relation over a `ControlFlowGraph`'s blocks.
pub struct DominatorTree {
    idom: FxHashMap<BlockId, BlockId>,
    rpo_number: FxHashMap<BlockId, u32>,
    root: BlockId,
}

/// Immediate-post-dominance relation, computed over the same CFG with every
/// edge conceptually reversed and a single virtual root joining all exits.
pub struct PostDominatorTree {
    ipdom: FxHashMap<BlockId, BlockId>,
    exits: Vec<BlockId>,
}

fn intersect(
    idom: &FxHashMap<BlockId, BlockId>,
    rpo: &FxHashMap<BlockId, u32>,
    mut a: BlockId,
    mut b: BlockId,
) -> BlockId {
    while a != b {
        while rpo[&a] > rpo[&b] {
            a = idom[&a];
        }
        while rpo[&b] > rpo[&a] {
            b = idom[&b];
        }
    }
    a
}

impl DominatorTree {
    /// Compute the dominator tree of `cfg`, rooted at its entry block.
    pub fn compute(cfg: &ControlFlowGraph) -> Self {
        let root = cfg.entry();
        let order = cfg.blocks_in_rpo();
        let rpo_number: FxHashMap<BlockId, u32> = order
            .iter()
            .map(|&b| (b, cfg.block(b).rpo_number))
            .collect();

        let mut idom: FxHashMap<BlockId, BlockId> = FxHashMap::default();
        idom.insert(root, root);

        let mut changed = true;
        while changed {
            changed = false;
            for &b in order.iter().skip(1) {
                let preds = &cfg.block(b).predecessors;
                let mut new_idom: Option<BlockId> = None;
                for &p in preds {
                    if !idom.contains_key(&p) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => intersect(&idom, &rpo_number, cur, p),
                    });
                }
                if let Some(computed) = new_idom {
                    if idom.get(&b) != Some(&computed) {
                        idom.insert(b, computed);
                        changed = true;
                    }
                }
            }
        }

        Self {
            idom,
            rpo_number,
            root,
        }
    }

    pub fn root(&self) -> BlockId {
        self.root
    }

    /// `b`'s immediate dominator, or `None` for the root or an unreachable block.
    pub fn idom(&self, b: BlockId) -> Option<BlockId> {
        match self.idom.get(&b) {
            Some(&d) if d == b && b == self.root => None,
            Some(&d) => Some(d),
            None => None,
        }
    }

    /// Does `a` dominate `b` (reflexively — every block dominates itself)?
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.idom.contains_key(&a) || !self.idom.contains_key(&b) {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            if cur == self.root {
                return cur == a;
            }
            cur = self.idom[&cur];
        }
    }

    /// The nearest common dominator of `a` and `b`.
    pub fn common_dominator(&self, a: BlockId, b: BlockId) -> BlockId {
        intersect(&self.idom, &self.rpo_number, a, b)
    }
}

impl PostDominatorTree {
    /// Compute the post-dominator tree of `cfg`: the dual computation over
    /// reversed edges, with every exit block (`BlockData::is_exit`) treated
    /// as a predecessor of a shared virtual root.
    pub fn compute(cfg: &ControlFlowGraph) -> Self {
        let all_blocks = cfg.blocks_in_rpo();
        let exits: Vec<BlockId> = all_blocks
            .iter()
            .copied()
            .filter(|&b| cfg.block(b).is_exit())
            .collect();

        // Reverse postorder of the reversed graph, computed by a DFS over
        // predecessor edges starting from every exit (in original rpo
        // order, for determinism when there are multiple exits).
        let mut visited: FxHashMap<BlockId, ()> = FxHashMap::default();
        let mut postorder = Vec::new();
        for &exit in &exits {
            if visited.contains_key(&exit) {
                continue;
            }
            let mut stack = vec![(exit, false)];
            while let Some((b, expanded)) = stack.pop() {
                if expanded {
                    postorder.push(b);
                    continue;
                }
                if visited.contains_key(&b) {
                    continue;
                }
                visited.insert(b, ());
                stack.push((b, true));
                for &p in &cfg.block(b).predecessors {
                    if !visited.contains_key(&p) {
                        stack.push((p, false));
                    }
                }
            }
        }
        let n = postorder.len();
        let mut rpo: FxHashMap<BlockId, u32> = FxHashMap::default();
        for (i, b) in postorder.into_iter().enumerate() {
            rpo.insert(b, (n - 1 - i) as u32);
        }

        // A virtual root dominates every exit; model it by seeding `ipdom`
        // for each exit as itself and treating exits as mutually
        // unordered roots (fine for our single-exit-dominant use: escape
        // analysis and guard-lowering only query post-domination among
        // blocks that do reach a common exit).
        let mut ipdom: FxHashMap<BlockId, BlockId> = FxHashMap::default();
        for &exit in &exits {
            ipdom.insert(exit, exit);
        }

        let order: Vec<BlockId> = {
            let mut ids: Vec<BlockId> = rpo.keys().copied().collect();
            ids.sort_by_key(|b| rpo[b]);
            ids
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &b in &order {
                if exits.contains(&b) {
                    continue;
                }
                let succs = &cfg.block(b).successors;
                let mut new_ipdom: Option<BlockId> = None;
                for &s in succs {
                    if !ipdom.contains_key(&s) {
                        continue;
                    }
                    new_ipdom = Some(match new_ipdom {
                        None => s,
                        Some(cur) => intersect(&ipdom, &rpo, cur, s),
                    });
                }
                if let Some(computed) = new_ipdom {
                    if ipdom.get(&b) != Some(&computed) {
                        ipdom.insert(b, computed);
                        changed = true;
                    }
                }
            }
        }

        Self { ipdom, exits }
    }

    /// `b`'s immediate post-dominator, or `None` if `b` is itself an exit
    /// or cannot reach one.
    pub fn ipdom(&self, b: BlockId) -> Option<BlockId> {
        match self.ipdom.get(&b) {
            Some(&d) if d == b && self.exits.contains(&b) => None,
            Some(&d) => Some(d),
            None => None,
        }
    }

    /// Does `a` post-dominate `b` (every path from `b` to an exit passes
    /// through `a`)?
    pub fn post_dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.ipdom.contains_key(&a) || !self.ipdom.contains_key(&b) {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            if self.exits.contains(&cur) {
                return cur == a;
            }
            match self.ipdom.get(&cur) {
                Some(&next) if next != cur => cur = next,
                _ => return cur == a,
            }
        }
    }
}
