//! Lowers a scheduled graph to block-scheduled LIR (§4.9). Walks blocks in
//! code-emission (RPO) order exactly as `scheduler.rs` orders them, and
//! lowers each scheduled node via the shared contracts in `operand.rs`/
//! `inst.rs`/`abi.rs`.

use cranelift_entity::PrimaryMap;

use crate::analysis::Analysis;
use crate::fx::FxHashMap;
use crate::ir::entities::{BlockId, LirInstId, NodeId, VirtualRegId};
use crate::ir::graph::Graph;
use crate::ir::node::NodeKind;
use crate::ir::sourceloc::BciLoc;
use crate::result::{CompileError, CompileResult, InternalErrorKind};
use crate::scheduler::Schedule;
use crate::stamp::Stamp;

use super::abi::foreign_call_abi;
use super::inst::{LirInst, LirOpcode};
use super::operand::{Operand, OperandMode};

/// The block-scheduled LIR for one compiled method.
pub struct Lir {
    insts: PrimaryMap<LirInstId, LirInst>,
    block_order: FxHashMap<BlockId, Vec<LirInstId>>,
    /// Blocks in the same RPO the generator walked them in — the order
    /// `regalloc::renumber` assigns instruction positions in.
    pub blocks_in_order: Vec<BlockId>,
    entry: BlockId,
    vreg_count: u32,
}

impl Lir {
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn inst(&self, id: LirInstId) -> &LirInst {
        &self.insts[id]
    }

    pub fn inst_mut(&mut self, id: LirInstId) -> &mut LirInst {
        &mut self.insts[id]
    }

    pub fn block_insts(&self, b: BlockId) -> &[LirInstId] {
        self.block_order.get(&b).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }

    pub fn vreg_count(&self) -> u32 {
        self.vreg_count
    }
}

struct Builder<'a> {
    graph: &'a Graph,
    analysis: &'a Analysis,
    schedule: &'a Schedule,
    insts: PrimaryMap<LirInstId, LirInst>,
    block_order: FxHashMap<BlockId, Vec<LirInstId>>,
    node_to_vreg: FxHashMap<NodeId, VirtualRegId>,
    next_vreg: u32,
}

impl<'a> Builder<'a> {
    fn fresh_vreg(&mut self) -> VirtualRegId {
        let v = VirtualRegId::from_u32(self.next_vreg);
        self.next_vreg += 1;
        v
    }

    /// The vreg already assigned to `n`'s value, or a fatal error if `n`
    /// hasn't been lowered yet — a dominance violation upstream, since
    /// blocks are walked in RPO.
    fn vreg_of(&self, n: NodeId) -> CompileResult<VirtualRegId> {
        self.node_to_vreg.get(&n).copied().ok_or_else(|| {
            CompileError::internal(
                InternalErrorKind::SchedulingInvariant,
                format!("{n} used in LIR generation before its value was defined"),
            )
        })
    }

    /// `vreg_of`, but creates the slot if absent. Used for `Phi` values,
    /// whose vreg may legitimately be needed by a predecessor block's
    /// phi-resolution moves before the merge block itself (later in RPO
    /// for a forward join, earlier for a loop's back edge) has lowered the
    /// phi node.
    fn vreg_of_or_alloc(&mut self, n: NodeId) -> VirtualRegId {
        if let Some(&v) = self.node_to_vreg.get(&n) {
            return v;
        }
        let v = self.fresh_vreg();
        self.node_to_vreg.insert(n, v);
        v
    }

    fn push(&mut self, block: BlockId, opcode: LirOpcode, operands: Vec<Operand>, loc: BciLoc) -> LirInstId {
        let placeholder = LirInst::new(LirInstId::from_u32(0), opcode, operands, loc);
        let id = self.insts.push(placeholder);
        self.insts[id].id = id;
        self.block_order.entry(block).or_default().push(id);
        id
    }

    fn lower_block(&mut self, block: BlockId) -> CompileResult<()> {
        let term = *self
            .analysis
            .cfg
            .block(block)
            .fixed_nodes
            .last()
            .expect("every block has at least its header as a fixed node");

        let mut order: Vec<NodeId> = self.schedule.order_in(block).to_vec();
        order.retain(|&n| n != term);

        for n in order {
            self.lower_node(block, n)?;
        }
        self.emit_phi_resolution(block)?;
        self.lower_terminator(block, term)?;
        Ok(())
    }

    fn lower_node(&mut self, block: BlockId, n: NodeId) -> CompileResult<()> {
        let kind = self.graph.node(n).kind.clone();
        let loc = self.graph.node(n).loc;
        match kind {
            NodeKind::Start
            | NodeKind::Begin
            | NodeKind::LoopExit
            | NodeKind::Merge { .. }
            | NodeKind::FrameState { .. }
            | NodeKind::MemoryPhi { .. } => {}

            // Pure forwarding nodes: alias the producer's vreg, no move.
            NodeKind::Pi | NodeKind::Proxy => {
                let src = self.graph.inputs(n)[0];
                let v = self.vreg_of(src)?;
                self.node_to_vreg.insert(n, v);
            }

            NodeKind::Constant(c) => {
                let dst = self.fresh_vreg();
                self.push(block, LirOpcode::LoadConstant(c), vec![Operand::def_reg(dst)], loc);
                self.node_to_vreg.insert(n, dst);
            }
            NodeKind::Parameter { index } => {
                let dst = self.fresh_vreg();
                self.push(block, LirOpcode::LoadParam { index }, vec![Operand::def_reg(dst)], loc);
                self.node_to_vreg.insert(n, dst);
            }
            NodeKind::Phi => {
                self.vreg_of_or_alloc(n);
            }
            NodeKind::UnaryOp(op) => {
                let src = self.vreg_of(self.graph.inputs(n)[0])?;
                let dst = self.fresh_vreg();
                self.push(block, LirOpcode::Unary(op), vec![Operand::use_reg(src), Operand::def_reg(dst)], loc);
                self.node_to_vreg.insert(n, dst);
            }
            NodeKind::BinaryOp(op) => {
                let inputs = self.graph.inputs(n);
                let (lhs, rhs) = (self.vreg_of(inputs[0])?, self.vreg_of(inputs[1])?);
                let dst = self.fresh_vreg();
                self.push(
                    block,
                    LirOpcode::Binary(op),
                    vec![Operand::use_reg(lhs), Operand::use_reg(rhs), Operand::def_reg(dst)],
                    loc,
                );
                self.node_to_vreg.insert(n, dst);
            }
            NodeKind::Compare { int_cc, float_cc } => {
                let inputs = self.graph.inputs(n);
                let (lhs, rhs) = (self.vreg_of(inputs[0])?, self.vreg_of(inputs[1])?);
                let dst = self.fresh_vreg();
                self.push(
                    block,
                    LirOpcode::Compare { int_cc, float_cc },
                    vec![Operand::use_reg(lhs), Operand::use_reg(rhs), Operand::def_reg(dst)],
                    loc,
                );
                self.node_to_vreg.insert(n, dst);
            }
            NodeKind::Load { location } => {
                let base = self.vreg_of(self.graph.inputs(n)[0])?;
                let dst = self.fresh_vreg();
                self.push(block, LirOpcode::LoadMem { location }, vec![Operand::use_reg(base), Operand::def_reg(dst)], loc);
                self.node_to_vreg.insert(n, dst);
            }
            NodeKind::Store { location } => {
                let inputs = self.graph.inputs(n);
                let (base, value) = (self.vreg_of(inputs[0])?, self.vreg_of(inputs[1])?);
                self.push(block, LirOpcode::StoreMem { location }, vec![Operand::use_reg(base), Operand::use_reg(value)], loc);
            }
            NodeKind::LoadHub => {
                let obj = self.vreg_of(self.graph.inputs(n)[0])?;
                let dst = self.fresh_vreg();
                self.push(block, LirOpcode::LoadHub, vec![Operand::use_reg(obj), Operand::def_reg(dst)], loc);
                self.node_to_vreg.insert(n, dst);
            }
            NodeKind::Invoke { method, dispatch } => {
                let args: Vec<NodeId> = self.graph.inputs(n).to_vec();
                let abi = foreign_call_abi(args.len() as u32);
                let mut operands = Vec::with_capacity(args.len() + 1);
                for (&arg, arg_loc) in args.iter().zip(&abi.arg_locations) {
                    let v = self.vreg_of(arg)?;
                    operands.push(Operand::new(Some(v), OperandMode::Alive, arg_loc.operand_flag())?);
                }
                let has_result = !matches!(self.graph.node(n).stamp, Stamp::Void);
                let dst = has_result.then(|| self.fresh_vreg());
                if let Some(v) = dst {
                    operands.push(Operand::def_reg(v));
                }
                self.push(block, LirOpcode::Call { method, dispatch }, operands, loc);
                if let Some(v) = dst {
                    self.node_to_vreg.insert(n, v);
                }
            }
            NodeKind::NewInstance { ty } => {
                let dst = self.fresh_vreg();
                self.push(block, LirOpcode::AllocObject { ty }, vec![Operand::def_reg(dst)], loc);
                self.node_to_vreg.insert(n, dst);
            }
            NodeKind::NewArray { ty } => {
                let len = self.vreg_of(self.graph.inputs(n)[0])?;
                let dst = self.fresh_vreg();
                self.push(block, LirOpcode::AllocArray { ty }, vec![Operand::use_reg(len), Operand::def_reg(dst)], loc);
                self.node_to_vreg.insert(n, dst);
            }
            NodeKind::CommitAllocation { ty, field_count } => {
                let fields: Vec<NodeId> = self.graph.inputs(n).to_vec();
                let mut operands = Vec::with_capacity(fields.len() + 1);
                for &f in &fields {
                    operands.push(Operand::use_reg(self.vreg_of(f)?));
                }
                let dst = self.fresh_vreg();
                operands.push(Operand::def_reg(dst));
                self.push(block, LirOpcode::CommitAllocation { ty, field_count }, operands, loc);
                self.node_to_vreg.insert(n, dst);
            }
            NodeKind::MonitorEnter => {
                let obj = self.vreg_of(self.graph.inputs(n)[0])?;
                self.push(block, LirOpcode::MonitorEnter, vec![Operand::use_reg(obj)], loc);
            }
            NodeKind::MonitorExit => {
                let obj = self.vreg_of(self.graph.inputs(n)[0])?;
                self.push(block, LirOpcode::MonitorExit, vec![Operand::use_reg(obj)], loc);
            }
            NodeKind::Guard { .. } => {
                return Err(CompileError::internal(
                    InternalErrorKind::GraphInvariant,
                    format!("{n} guard reached LIR generation unlowered"),
                ));
            }
            NodeKind::If { .. } | NodeKind::Return | NodeKind::Throw | NodeKind::Unreachable => {
                return Err(CompileError::internal(
                    InternalErrorKind::GraphInvariant,
                    format!("{n} terminator kind scheduled as a non-terminator block member"),
                ));
            }
        }
        Ok(())
    }

    /// Emit the parallel-copy moves an SSA-deconstructing backend inserts
    /// at the end of each predecessor block for every phi its successor
    /// merges (§4.9).
    fn emit_phi_resolution(&mut self, block: BlockId) -> CompileResult<()> {
        let successors = self.analysis.cfg.block(block).successors.clone();
        for succ in successors {
            let Some(pred_index) = self
                .analysis
                .cfg
                .block(succ)
                .predecessors
                .iter()
                .position(|&p| p == block)
            else {
                continue;
            };
            let phis: Vec<NodeId> = self
                .graph
                .iterate(|k| matches!(k, NodeKind::Phi))
                .into_iter()
                .filter(|&p| self.schedule.block_of(p) == Some(succ))
                .collect();
            for phi in phis {
                let inputs = self.graph.inputs(phi);
                let Some(&src_node) = inputs.get(pred_index) else {
                    continue;
                };
                let src = self.vreg_of(src_node)?;
                let dst = self.vreg_of_or_alloc(phi);
                let loc = self.graph.node(phi).loc;
                self.push(block, LirOpcode::MoveRegReg, vec![Operand::use_reg(src), Operand::def_reg(dst)], loc);
            }
        }
        Ok(())
    }

    fn lower_terminator(&mut self, block: BlockId, term: NodeId) -> CompileResult<()> {
        let kind = self.graph.node(term).kind.clone();
        let loc = self.graph.node(term).loc;
        match kind {
            NodeKind::If { negated } => {
                let cond = self.vreg_of(self.graph.inputs(term)[0])?;
                let successors = self.analysis.cfg.block(block).successors.clone();
                let then_block = successors[0];
                let else_block = successors[1];
                self.push(
                    block,
                    LirOpcode::Branch { negated, then_block, else_block },
                    vec![Operand::use_reg(cond)],
                    loc,
                );
            }
            NodeKind::Return => {
                let operands = match self.graph.inputs(term).first() {
                    Some(&v) => vec![Operand::use_reg(self.vreg_of(v)?)],
                    None => Vec::new(),
                };
                self.push(block, LirOpcode::Return, operands, loc);
            }
            NodeKind::Throw => {
                let operands = match self.graph.inputs(term).first() {
                    Some(&v) => vec![Operand::use_reg(self.vreg_of(v)?)],
                    None => Vec::new(),
                };
                self.push(block, LirOpcode::Throw, operands, loc);
            }
            NodeKind::Unreachable => {
                self.push(block, LirOpcode::Trap, Vec::new(), loc);
            }
            NodeKind::Begin | NodeKind::Merge { .. } => {
                // This block has no terminator of its own: it falls
                // straight through to its single successor.
                if let Some(&succ) = self.analysis.cfg.block(block).successors.first() {
                    self.push(block, LirOpcode::Jump { target: succ }, Vec::new(), loc);
                }
            }
            other => {
                return Err(CompileError::internal(
                    InternalErrorKind::GraphInvariant,
                    format!("{term} unexpected terminator kind {other:?}"),
                ));
            }
        }
        Ok(())
    }
}

/// Generate block-scheduled LIR for `graph` under `schedule` (§4.9).
pub fn generate(graph: &Graph, analysis: &Analysis, schedule: &Schedule) -> CompileResult<Lir> {
    analysis.assert_fresh(graph);
    let blocks = analysis.cfg.blocks_in_rpo();
    let mut b = Builder {
        graph,
        analysis,
        schedule,
        insts: PrimaryMap::new(),
        block_order: FxHashMap::default(),
        node_to_vreg: FxHashMap::default(),
        next_vreg: 0,
    };
    for &block in &blocks {
        b.lower_block(block)?;
    }
    Ok(Lir {
        insts: b.insts,
        block_order: b.block_order,
        blocks_in_order: blocks,
        entry: analysis.cfg.entry(),
        vreg_count: b.next_vreg,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::graph::Graph;
    use crate::ir::node::{BinaryOpKind, NodeList};
    use crate::ir::sourceloc::BciLoc;
    use crate::oracle::ConstantValue;
    use crate::scheduler::{self, MemorySchedule, ScheduleStrategy};

    fn linear_add_graph() -> Graph {
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
        let mut add_inputs = NodeList::new();
        add_inputs.push(a);
        add_inputs.push(b);
        let add = g.add(NodeKind::BinaryOp(BinaryOpKind::Add), add_inputs, BciLoc::default()).unwrap();

        let mut ret_inputs = NodeList::new();
        ret_inputs.push(add);
        let ret = g.add(NodeKind::Return, ret_inputs, BciLoc::default()).unwrap();
        g.node_mut(begin).successors.push(ret);
        g
    }

    #[test]
    fn lowers_a_constant_add_into_three_instructions() {
        let g = linear_add_graph();
        let analysis = Analysis::compute(&g).unwrap();
        let sched = scheduler::schedule(&g, &analysis, ScheduleStrategy::Earliest, MemorySchedule::None).unwrap();
        let lir = generate(&g, &analysis, &sched).unwrap();

        let only_block = analysis.cfg.entry();
        let insts: Vec<&LirInst> = lir.block_insts(only_block).iter().map(|&id| lir.inst(id)).collect();
        let opcodes: Vec<&str> = insts
            .iter()
            .map(|i| match &i.opcode {
                LirOpcode::LoadConstant(_) => "const",
                LirOpcode::Binary(_) => "add",
                LirOpcode::Return => "return",
                _ => "other",
            })
            .collect();
        assert_eq!(opcodes, vec!["const", "const", "add", "return"]);
        assert!(insts.iter().all(|i| i.alloc_id == -1));
    }

    #[test]
    fn diamond_merge_resolves_its_phi_via_predecessor_moves() {
        let mut g = Graph::new();
        let start = g.add(NodeKind::Start, NodeList::new(), BciLoc::default()).unwrap();
        let entry = g.add(NodeKind::Begin, NodeList::new(), BciLoc::default()).unwrap();
        g.node_mut(start).successors.push(entry);

        let cond = g
            .add(NodeKind::Constant(ConstantValue::Int { bits: 32, value: 1 }), NodeList::new(), BciLoc::default())
            .unwrap();
        let mut if_inputs = NodeList::new();
        if_inputs.push(cond);
        let if_node = g.add(NodeKind::If { negated: false }, if_inputs, BciLoc::default()).unwrap();
        g.node_mut(entry).successors.push(if_node);

        let then_begin = g.add(NodeKind::Begin, NodeList::new(), BciLoc::default()).unwrap();
        let else_begin = g.add(NodeKind::Begin, NodeList::new(), BciLoc::default()).unwrap();
        g.node_mut(if_node).successors.push(then_begin);
        g.node_mut(if_node).successors.push(else_begin);

        let then_val = g
            .add(NodeKind::Constant(ConstantValue::Int { bits: 32, value: 10 }), NodeList::new(), BciLoc::default())
            .unwrap();
        let else_val = g
            .add(NodeKind::Constant(ConstantValue::Int { bits: 32, value: 20 }), NodeList::new(), BciLoc::default())
            .unwrap();

        let merge = g
            .add(NodeKind::Merge { is_loop_header: false }, NodeList::new(), BciLoc::default())
            .unwrap();
        g.node_mut(then_begin).successors.push(merge);
        g.node_mut(else_begin).successors.push(merge);

        let mut phi_inputs = NodeList::new();
        phi_inputs.push(then_val);
        phi_inputs.push(else_val);
        let phi = g.add(NodeKind::Phi, phi_inputs, BciLoc::default()).unwrap();

        let mut ret_inputs = NodeList::new();
        ret_inputs.push(phi);
        let ret = g.add(NodeKind::Return, ret_inputs, BciLoc::default()).unwrap();
        g.node_mut(merge).successors.push(ret);

        let analysis = Analysis::compute(&g).unwrap();
        let sched = scheduler::schedule(&g, &analysis, ScheduleStrategy::Earliest, MemorySchedule::None).unwrap();
        let lir = generate(&g, &analysis, &sched).unwrap();

        let then_block = analysis.cfg.block_of(then_begin).unwrap();
        let else_block = analysis.cfg.block_of(else_begin).unwrap();
        let then_has_move = lir.block_insts(then_block).iter().any(|&id| matches!(lir.inst(id).opcode, LirOpcode::MoveRegReg));
        let else_has_move = lir.block_insts(else_block).iter().any(|&id| matches!(lir.inst(id).opcode, LirOpcode::MoveRegReg));
        assert!(then_has_move);
        assert!(else_has_move);
    }
}
