//! Linear-scan register allocation over block-scheduled LIR (§4.10).
//!
//! Follows the classical Poletto & Sarkar algorithm rather than an
//! SSA-aware allocator (`regalloc2`'s lineage): renumber instructions,
//! compute one `[start, end]` live interval per virtual register
//! (`interval.rs`), then walk intervals in increasing-start order handing
//! out free physical registers and spilling the interval whose farthest
//! use is furthest away when none remain. Real target register files and
//! encodings are out of scope (target machine encoding is a non-goal); the
//! `NUM_PHYSICAL_REGISTERS`/`config.regalloc_callee_saved_budget()` split
//! below stands in for a real target's register file the same way
//! `lir::abi::ARG_REGISTERS` stands in for its calling convention.

pub mod interval;

use crate::config::Config;
use crate::debug::MetricRegistry;
use crate::fx::{FxHashMap, FxHashSet};
use crate::ir::entities::VirtualRegId;
use crate::lir::{Lir, LirOpcode};
use crate::result::{CompileError, CompileResult, InternalErrorKind};

pub use interval::{compute_intervals, LiveInterval};

/// Total physical registers this abstract target is assumed to offer. A
/// placeholder constant (target encoding is a non-goal); the fraction of
/// these that survive a call is `config.regalloc_callee_saved_budget()`.
const NUM_PHYSICAL_REGISTERS: u32 = 8;

/// Where a virtual register ended up living after allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    Register(u32),
    /// An index into the spill area, not a byte offset — the frame layout
    /// that turns this into a real offset is a target-specific concern
    /// (non-goal).
    Spill(u32),
}

/// The allocator's output: where every virtual register lives, plus the
/// statistics §4.10 asks to have recorded (distinct registers used,
/// register-to-register moves, spill moves).
pub struct AllocationResult {
    pub locations: FxHashMap<VirtualRegId, Location>,
    pub distinct_registers_used: u32,
    pub reg_to_reg_moves: u32,
    pub spill_moves: u32,
}

impl AllocationResult {
    pub fn location_of(&self, vreg: VirtualRegId) -> Option<Location> {
        self.locations.get(&vreg).copied()
    }
}

/// Assign each instruction in `lir` a dense, increasing position in
/// code-emission order (`lir.blocks_in_order`), overwriting the `-1`
/// pre-allocation sentinel (§4.9). Must run before `compute_intervals` or
/// `allocate`.
pub fn renumber(lir: &mut Lir) {
    let mut pos = 0i64;
    let ids: Vec<_> = lir
        .blocks_in_order
        .clone()
        .into_iter()
        .flat_map(|b| lir.block_insts(b).to_vec())
        .collect();
    for id in ids {
        lir.inst_mut(id).alloc_id = pos;
        pos += 1;
    }
}

/// One slot in the active set: the interval currently occupying a
/// register, kept sorted by increasing `end` so the tail is always the
/// best spill candidate.
struct ActiveSlot {
    interval: LiveInterval,
    reg: u32,
}

struct Allocator<'a> {
    config: &'a Config,
    active: Vec<ActiveSlot>,
    free: Vec<u32>,
    locations: FxHashMap<VirtualRegId, Location>,
    next_spill_slot: u32,
    spill_moves: u32,
    registers_used: FxHashSet<u32>,
}

impl<'a> Allocator<'a> {
    fn new(config: &'a Config) -> Self {
        Self {
            config,
            active: Vec::new(),
            free: (0..NUM_PHYSICAL_REGISTERS).rev().collect(),
            locations: FxHashMap::default(),
            next_spill_slot: 0,
            spill_moves: 0,
            registers_used: FxHashSet::default(),
        }
    }

    fn expire_old_intervals(&mut self, start: i64) {
        let mut still_active = Vec::with_capacity(self.active.len());
        for slot in self.active.drain(..) {
            if slot.interval.end < start {
                self.free.push(slot.reg);
            } else {
                still_active.push(slot);
            }
        }
        still_active.sort_by_key(|s| s.interval.end);
        self.active = still_active;
    }

    fn insert_active(&mut self, interval: LiveInterval, reg: u32) {
        let pos = self.active.partition_point(|s| s.interval.end <= interval.end);
        self.active.insert(pos, ActiveSlot { interval, reg });
    }

    /// Allocate a fresh spill slot for a spilled interval.
    fn fresh_spill_slot(&mut self) -> u32 {
        let s = self.next_spill_slot;
        self.next_spill_slot += 1;
        s
    }

    fn spill_at_interval(&mut self, current: LiveInterval) {
        // The active interval with the farthest-away end is the worst use
        // of a register among everything currently holding one; §4.10:
        // "spill the interval whose next use is farthest".
        match self.active.last() {
            Some(worst) if worst.interval.end > current.end => {
                let reg = worst.reg;
                let evicted = self.active.pop().unwrap();
                self.locations.insert(evicted.interval.vreg, Location::Spill(self.fresh_spill_slot()));
                self.spill_moves += 1;
                self.locations.insert(current.vreg, Location::Register(reg));
                self.registers_used.insert(reg);
                self.insert_active(current, reg);
            }
            _ => {
                self.locations.insert(current.vreg, Location::Spill(self.fresh_spill_slot()));
                self.spill_moves += 1;
            }
        }
    }

    fn allocate_one(&mut self, interval: LiveInterval) {
        self.expire_old_intervals(interval.start);
        if let Some(reg) = self.free.pop() {
            self.registers_used.insert(reg);
            self.locations.insert(interval.vreg, Location::Register(reg));
            self.insert_active(interval, reg);
        } else {
            self.spill_at_interval(interval);
        }
    }
}

/// Count how many of `live.locations` occupy a *register* and are live
/// across `pos` (strictly before and after, not merely touching it) — the
/// set a safepoint at `pos` would need to preserve across a call.
fn registers_live_across(intervals: &[LiveInterval], locations: &FxHashMap<VirtualRegId, Location>, pos: i64) -> u32 {
    intervals
        .iter()
        .filter(|iv| iv.start < pos && iv.end > pos)
        .filter(|iv| matches!(locations.get(&iv.vreg), Some(Location::Register(_))))
        .count() as u32
}

/// Run linear-scan allocation over `lir`, which must already be renumbered
/// (`renumber`). Records statistics into `metrics` under the `"regalloc"`
/// scope and returns a fatal `InsufficientRegisters` error if any
/// safepoint's live-across set can't fit within
/// `config.regalloc_callee_saved_budget()` (§4.10).
pub fn allocate(lir: &Lir, config: &Config, metrics: &MetricRegistry) -> CompileResult<AllocationResult> {
    let mut intervals = compute_intervals(lir);
    intervals.sort_by_key(|iv| iv.start);

    let mut allocator = Allocator::new(config);
    for interval in intervals.iter().cloned() {
        allocator.allocate_one(interval);
    }

    check_safepoints(lir, &intervals, &allocator.locations, config)?;

    let reg_to_reg_moves = count_reg_to_reg_moves(lir, &allocator.locations);

    metrics.add("regalloc", "distinct_registers", allocator.registers_used.len() as u64);
    metrics.add("regalloc", "reg_moves", reg_to_reg_moves as u64);
    metrics.add("regalloc", "spill_moves", allocator.spill_moves as u64);

    Ok(AllocationResult {
        locations: allocator.locations,
        distinct_registers_used: allocator.registers_used.len() as u32,
        reg_to_reg_moves,
        spill_moves: allocator.spill_moves,
    })
}

/// §4.10 failure mode: at every safepoint instruction, the values held in
/// registers and live across it must fit within the target's callee-saved
/// budget, since a caller-saved register cannot survive the call it
/// straddles without itself being spilled around the call.
fn check_safepoints(
    lir: &Lir,
    intervals: &[LiveInterval],
    locations: &FxHashMap<VirtualRegId, Location>,
    config: &Config,
) -> CompileResult<()> {
    let budget = config.regalloc_callee_saved_budget().max(0) as u32;
    for &block in &lir.blocks_in_order {
        for &id in lir.block_insts(block) {
            let inst = lir.inst(id);
            if !inst.opcode.is_safepoint() {
                continue;
            }
            let live = registers_live_across(intervals, locations, inst.alloc_id);
            if live > budget {
                return Err(CompileError::internal(
                    InternalErrorKind::InsufficientRegisters,
                    format!(
                        "{} live register(s) cross safepoint {} but only {} callee-saved register(s) are available",
                        live, inst.id, budget
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// A `MoveRegReg` whose source and destination both ended up in registers
/// (as opposed to one or both being spilled, which a real backend would
/// lower to a reload/spill-store pair instead — synthesizing those
/// instructions into the block stream is left to that future target-specific
/// lowering stage; this allocator only reports the count).
fn count_reg_to_reg_moves(lir: &Lir, locations: &FxHashMap<VirtualRegId, Location>) -> u32 {
    let mut count = 0u32;
    for &block in &lir.blocks_in_order {
        for &id in lir.block_insts(block) {
            let inst = lir.inst(id);
            if !matches!(inst.opcode, LirOpcode::MoveRegReg) {
                continue;
            }
            let both_registers = inst
                .operands
                .iter()
                .filter_map(|op| op.vreg)
                .all(|v| matches!(locations.get(&v), Some(Location::Register(_))));
            if both_registers {
                count += 1;
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analysis;
    use crate::config::Config;
    use crate::ir::graph::Graph;
    use crate::ir::node::{BinaryOpKind, NodeKind, NodeList};
    use crate::ir::sourceloc::BciLoc;
    use crate::lir;
    use crate::oracle::ConstantValue;
    use crate::scheduler::{self, MemorySchedule, ScheduleStrategy};

    fn chain_of_adds(depth: u32) -> Graph {
        let mut g = Graph::new();
        let start = g.add(NodeKind::Start, NodeList::new(), BciLoc::default()).unwrap();
        let begin = g.add(NodeKind::Begin, NodeList::new(), BciLoc::default()).unwrap();
        g.node_mut(start).successors.push(begin);

        let mut acc = g
            .add(NodeKind::Constant(ConstantValue::Int { bits: 32, value: 0 }), NodeList::new(), BciLoc::default())
            .unwrap();
        for i in 0..depth {
            let k = g
                .add(NodeKind::Constant(ConstantValue::Int { bits: 32, value: i as i64 }), NodeList::new(), BciLoc::default())
                .unwrap();
            let mut inputs = NodeList::new();
            inputs.push(acc);
            inputs.push(k);
            acc = g.add(NodeKind::BinaryOp(BinaryOpKind::Add), inputs, BciLoc::default()).unwrap();
        }
        let mut ret_inputs = NodeList::new();
        ret_inputs.push(acc);
        let ret = g.add(NodeKind::Return, ret_inputs, BciLoc::default()).unwrap();
        g.node_mut(begin).successors.push(ret);
        g
    }

    fn build_lir(g: &Graph) -> Lir {
        let analysis = Analysis::compute(g).unwrap();
        let sched = scheduler::schedule(g, &analysis, ScheduleStrategy::Earliest, MemorySchedule::None).unwrap();
        lir::generate(g, &analysis, &sched).unwrap()
    }

    #[test]
    fn renumber_assigns_dense_increasing_positions() {
        let g = chain_of_adds(3);
        let mut l = build_lir(&g);
        renumber(&mut l);
        let mut seen = Vec::new();
        for &b in &l.blocks_in_order {
            for &id in l.block_insts(b) {
                seen.push(l.inst(id).alloc_id);
            }
        }
        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(seen, sorted);
        assert_eq!(seen.first().copied(), Some(0));
        assert_eq!(seen.last().copied(), Some(seen.len() as i64 - 1));
    }

    #[test]
    fn a_small_chain_fits_entirely_in_registers() {
        let g = chain_of_adds(3);
        let mut l = build_lir(&g);
        renumber(&mut l);
        let config = Config::defaults();
        let metrics = MetricRegistry::new();
        let result = allocate(&l, &config, &metrics).unwrap();
        assert_eq!(result.spill_moves, 0);
        assert!(metrics.get("regalloc", "distinct_registers") > 0);
    }

    #[test]
    fn pressure_beyond_the_register_file_forces_a_spill() {
        // More simultaneously-live values than NUM_PHYSICAL_REGISTERS forces
        // at least one spill: a long run of independent constants all kept
        // alive by a single wide addition chain at the end.
        let mut g = Graph::new();
        let start = g.add(NodeKind::Start, NodeList::new(), BciLoc::default()).unwrap();
        let begin = g.add(NodeKind::Begin, NodeList::new(), BciLoc::default()).unwrap();
        g.node_mut(start).successors.push(begin);

        let mut consts = Vec::new();
        for i in 0..(NUM_PHYSICAL_REGISTERS as i64 + 4) {
            consts.push(
                g.add(NodeKind::Constant(ConstantValue::Int { bits: 32, value: i }), NodeList::new(), BciLoc::default())
                    .unwrap(),
            );
        }
        let mut acc = consts[0];
        for &c in &consts[1..] {
            let mut inputs = NodeList::new();
            inputs.push(acc);
            inputs.push(c);
            acc = g.add(NodeKind::BinaryOp(BinaryOpKind::Add), inputs, BciLoc::default()).unwrap();
        }
        let mut ret_inputs = NodeList::new();
        ret_inputs.push(acc);
        let ret = g.add(NodeKind::Return, ret_inputs, BciLoc::default()).unwrap();
        g.node_mut(begin).successors.push(ret);

        let mut l = build_lir(&g);
        renumber(&mut l);
        let config = Config::defaults();
        let metrics = MetricRegistry::new();
        let result = allocate(&l, &config, &metrics).unwrap();
        assert!(result.spill_moves > 0);
        assert_eq!(metrics.get("regalloc", "spill_moves") as u32, result.spill_moves);
    }
}
