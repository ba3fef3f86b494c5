//! LIR operand modes/flags and the validity table that constrains their
//! combination (§4.9). Grounded on the same "narrow enum plus a pure
//! validity predicate" shape `stamp.rs` uses for its lattice kinds.

use crate::ir::entities::VirtualRegId;
use crate::result::{CompileError, CompileResult, InternalErrorKind};

/// How an operand participates in an instruction's data flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperandMode {
    /// Read before the instruction executes.
    Use,
    /// Read, and must remain live through the instruction (e.g. a call
    /// argument the callee may read back via the frame).
    Alive,
    /// Scratch storage private to this instruction; never crosses it.
    Temp,
    /// Written by the instruction.
    Def,
}

/// Where an operand's value currently lives (or will, once allocated).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperandFlag {
    Reg,
    Stack,
    Composite,
    Const,
    Illegal,
    Hint,
    Unused,
    Uninitialized,
}

/// Is `(mode, flag)` a legal combination? (§4.9 operand validity table).
pub fn is_valid(mode: OperandMode, flag: OperandFlag) -> bool {
    use OperandFlag::*;
    use OperandMode::*;
    match mode {
        Use | Alive => matches!(
            flag,
            Reg | Stack | Composite | Const | Illegal | Hint | Unused | Uninitialized
        ),
        Temp => matches!(flag, Reg | Composite | Const | Illegal | Unused | Hint),
        Def => matches!(flag, Reg | Stack | Composite | Illegal | Unused | Hint),
    }
}

/// One operand of a `LirInst`: a virtual register under a mode/flag pair,
/// or `None` for `Unused`/`Illegal`/`Uninitialized` slots that don't name a
/// value at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Operand {
    pub vreg: Option<VirtualRegId>,
    pub mode: OperandMode,
    pub flag: OperandFlag,
}

impl Operand {
    /// Build an operand, rejecting a mode/flag pair the validity table
    /// disallows.
    pub fn new(vreg: Option<VirtualRegId>, mode: OperandMode, flag: OperandFlag) -> CompileResult<Self> {
        if !is_valid(mode, flag) {
            return Err(CompileError::internal(
                InternalErrorKind::InvalidOperand,
                format!("{mode:?}/{flag:?} is not a valid LIR operand combination"),
            ));
        }
        Ok(Self { vreg, mode, flag })
    }

    /// A plain register use.
    pub fn use_reg(vreg: VirtualRegId) -> Self {
        Self {
            vreg: Some(vreg),
            mode: OperandMode::Use,
            flag: OperandFlag::Reg,
        }
    }

    /// A use that must stay live across the instruction (call arguments).
    pub fn alive_reg(vreg: VirtualRegId) -> Self {
        Self {
            vreg: Some(vreg),
            mode: OperandMode::Alive,
            flag: OperandFlag::Reg,
        }
    }

    /// A plain register definition.
    pub fn def_reg(vreg: VirtualRegId) -> Self {
        Self {
            vreg: Some(vreg),
            mode: OperandMode::Def,
            flag: OperandFlag::Reg,
        }
    }

    pub fn is_use_like(&self) -> bool {
        matches!(self.mode, OperandMode::Use | OperandMode::Alive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn use_allows_every_flag() {
        for flag in [
            OperandFlag::Reg,
            OperandFlag::Stack,
            OperandFlag::Composite,
            OperandFlag::Const,
            OperandFlag::Illegal,
            OperandFlag::Hint,
            OperandFlag::Unused,
            OperandFlag::Uninitialized,
        ] {
            assert!(is_valid(OperandMode::Use, flag), "{flag:?}");
        }
    }

    #[test]
    fn temp_rejects_stack_and_uninitialized() {
        assert!(!is_valid(OperandMode::Temp, OperandFlag::Stack));
        assert!(!is_valid(OperandMode::Temp, OperandFlag::Uninitialized));
        assert!(is_valid(OperandMode::Temp, OperandFlag::Reg));
    }

    #[test]
    fn def_rejects_const_and_uninitialized() {
        assert!(!is_valid(OperandMode::Def, OperandFlag::Const));
        assert!(!is_valid(OperandMode::Def, OperandFlag::Uninitialized));
        assert!(is_valid(OperandMode::Def, OperandFlag::Stack));
    }

    #[test]
    fn operand_new_rejects_invalid_combination() {
        let err = Operand::new(None, OperandMode::Def, OperandFlag::Const);
        assert!(err.is_err());
    }
}
