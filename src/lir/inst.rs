//! LIR instructions: one opcode plus scalar payload per node, exactly the
//! `NodeKind`/payload split `ir::node` uses for the graph (module docs
//! there) — here `LirOpcode` carries the payload and `LirInst::operands`
//! carries the operand list, each validated against `operand::is_valid`.

use crate::ir::condcodes::{FloatCC, IntCC};
use crate::ir::entities::{BlockId, LirInstId};
use crate::ir::node::{BinaryOpKind, DispatchKind, MemoryLocation, UnaryOpKind};
use crate::ir::sourceloc::BciLoc;
use crate::oracle::{MethodRef, TypeRef};

use super::operand::Operand;

/// An LIR opcode. Target machine encoding is out of scope (a non-goal);
/// this is the last IR level this crate produces — an architecture backend
/// would consume it to emit real instructions.
#[derive(Clone, Debug, PartialEq)]
pub enum LirOpcode {
    LoadConstant(crate::oracle::ConstantValue),
    LoadParam { index: u32 },
    Unary(UnaryOpKind),
    Binary(BinaryOpKind),
    Compare { int_cc: Option<IntCC>, float_cc: Option<FloatCC> },
    LoadMem { location: MemoryLocation },
    StoreMem { location: MemoryLocation },
    LoadHub,
    /// A direct or dispatched call, lowered with `abi::foreign_call_abi`.
    Call { method: MethodRef, dispatch: DispatchKind },
    AllocObject { ty: TypeRef },
    AllocArray { ty: TypeRef },
    CommitAllocation { ty: TypeRef, field_count: u32 },
    MonitorEnter,
    MonitorExit,
    /// Resolves a block-local `Phi`'s incoming value; emitted at the end of
    /// a predecessor block rather than at the phi's own site (§4.9 parallel
    /// copy on SSA deconstruction).
    MoveRegReg,
    Jump { target: BlockId },
    Branch { negated: bool, then_block: BlockId, else_block: BlockId },
    /// Lowered from a bytecode `switch`; `table` records which strategy
    /// `switch::choose_strategy` picked, both for testability and because a
    /// real backend needs to know which encoding to emit.
    Switch {
        table: bool,
        cases: Vec<(i64, BlockId)>,
        default: BlockId,
    },
    Return,
    Throw,
    /// Control reached a point proven unreachable, or a lowered guard's
    /// failure edge (§4.5/§4.8): always deoptimizes.
    Trap,
}

impl LirOpcode {
    /// Does this opcode reach into the runtime in a way that can trigger a
    /// GC/safepoint poll (placeholder only — safepoint *implementation* is a
    /// non-goal), and so must have its live-in set checked against the
    /// allocator's callee-saved budget (§4.10 failure mode)?
    pub fn is_safepoint(&self) -> bool {
        matches!(self, LirOpcode::Call { .. } | LirOpcode::AllocObject { .. } | LirOpcode::AllocArray { .. })
    }
}

/// One LIR instruction. `alloc_id` is the allocator's own dense instruction
/// numbering (distinct from `id`, this instruction's arena identity) — it
/// starts at the sentinel `-1` and is assigned a real, unique, increasing
/// value only once `regalloc::renumber` has run over the whole method
/// (§4.9: "the pre-allocation value is −1").
#[derive(Clone, Debug)]
pub struct LirInst {
    pub id: LirInstId,
    pub opcode: LirOpcode,
    pub operands: Vec<Operand>,
    pub loc: BciLoc,
    pub alloc_id: i64,
}

impl LirInst {
    pub fn new(id: LirInstId, opcode: LirOpcode, operands: Vec<Operand>, loc: BciLoc) -> Self {
        Self {
            id,
            opcode,
            operands,
            loc,
            alloc_id: -1,
        }
    }

    pub fn uses(&self) -> impl Iterator<Item = &Operand> {
        self.operands.iter().filter(|o| o.is_use_like())
    }

    pub fn defs(&self) -> impl Iterator<Item = &Operand> {
        self.operands
            .iter()
            .filter(|o| matches!(o.mode, super::operand::OperandMode::Def))
    }

    pub fn temps(&self) -> impl Iterator<Item = &Operand> {
        self.operands
            .iter()
            .filter(|o| matches!(o.mode, super::operand::OperandMode::Temp))
    }
}
