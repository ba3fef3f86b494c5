//! Live-interval construction over renumbered LIR positions (§4.10).
//!
//! This keeps to the classical Poletto & Sarkar linear-scan model — one
//! contiguous `[start, end]` range per virtual register, rather than the
//! per-block live ranges (with holes) a full SSA-aware allocator like
//! `regalloc2` tracks — the same C1/Turbofan-era lineage `scheduler.rs`
//! already cites. Phi resolution (`lir::build::emit_phi_resolution`) can
//! define the same vreg from more than one predecessor block; a single
//! interval spanning every one of those defs through the furthest use is a
//! conservative, documented simplification (see DESIGN.md) rather than a
//! precise hole-punched range.

use crate::fx::FxHashMap;
use crate::ir::entities::VirtualRegId;
use crate::lir::{Lir, OperandMode};

/// One virtual register's live range, plus every position it's used at
/// (sorted ascending) so the spill heuristic can find the farthest future
/// use.
#[derive(Clone, Debug)]
pub struct LiveInterval {
    pub vreg: VirtualRegId,
    pub start: i64,
    pub end: i64,
    pub uses: Vec<i64>,
}

impl LiveInterval {
    /// The next position at or after `from` this interval is used, or its
    /// `end` if none remain — the distance `spill_at_interval` compares.
    pub fn next_use_at_or_after(&self, from: i64) -> i64 {
        self.uses
            .iter()
            .copied()
            .find(|&u| u >= from)
            .unwrap_or(self.end)
    }
}

/// Build one interval per virtual register referenced anywhere in `lir`.
/// Requires `lir`'s instructions to already have been renumbered
/// (`regalloc::renumber`); panics in debug builds otherwise.
pub fn compute_intervals(lir: &Lir) -> Vec<LiveInterval> {
    let mut starts: FxHashMap<VirtualRegId, i64> = FxHashMap::default();
    let mut ends: FxHashMap<VirtualRegId, i64> = FxHashMap::default();
    let mut uses: FxHashMap<VirtualRegId, Vec<i64>> = FxHashMap::default();

    for &block in &lir.blocks_in_order {
        for &id in lir.block_insts(block) {
            let inst = lir.inst(id);
            debug_assert!(inst.alloc_id >= 0, "interval construction requires renumbered LIR");
            let pos = inst.alloc_id;
            for op in &inst.operands {
                let Some(v) = op.vreg else { continue };
                starts.entry(v).and_modify(|s| *s = (*s).min(pos)).or_insert(pos);
                ends.entry(v).and_modify(|e| *e = (*e).max(pos)).or_insert(pos);
                if op.mode != OperandMode::Def {
                    uses.entry(v).or_default().push(pos);
                }
            }
        }
    }

    starts
        .keys()
        .map(|&v| {
            let mut u = uses.get(&v).cloned().unwrap_or_default();
            u.sort_unstable();
            LiveInterval {
                vreg: v,
                start: starts[&v],
                end: ends[&v],
                uses: u,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analysis;
    use crate::ir::graph::Graph;
    use crate::ir::node::{BinaryOpKind, NodeKind, NodeList};
    use crate::ir::sourceloc::BciLoc;
    use crate::lir;
    use crate::oracle::ConstantValue;
    use crate::scheduler::{self, MemorySchedule, ScheduleStrategy};

    #[test]
    fn an_add_chain_produces_one_interval_per_value() {
        let mut g = Graph::new();
        let start = g.add(NodeKind::Start, NodeList::new(), BciLoc::default()).unwrap();
        let begin = g.add(NodeKind::Begin, NodeList::new(), BciLoc::default()).unwrap();
        g.node_mut(start).successors.push(begin);
        let a = g
            .add(NodeKind::Constant(ConstantValue::Int { bits: 32, value: 1 }), NodeList::new(), BciLoc::default())
            .unwrap();
        let b = g
            .add(NodeKind::Constant(ConstantValue::Int { bits: 32, value: 2 }), NodeList::new(), BciLoc::default())
            .unwrap();
        let mut inputs = NodeList::new();
        inputs.push(a);
        inputs.push(b);
        let add = g.add(NodeKind::BinaryOp(BinaryOpKind::Add), inputs, BciLoc::default()).unwrap();
        let mut ret_inputs = NodeList::new();
        ret_inputs.push(add);
        let ret = g.add(NodeKind::Return, ret_inputs, BciLoc::default()).unwrap();
        g.node_mut(begin).successors.push(ret);

        let analysis = Analysis::compute(&g).unwrap();
        let sched = scheduler::schedule(&g, &analysis, ScheduleStrategy::Earliest, MemorySchedule::None).unwrap();
        let mut generated = lir::generate(&g, &analysis, &sched).unwrap();
        crate::regalloc::renumber(&mut generated);

        let intervals = compute_intervals(&generated);
        assert_eq!(intervals.len(), 3);
        for iv in &intervals {
            assert!(iv.start <= iv.end);
        }
    }
}
