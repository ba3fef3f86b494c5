//! Foreign-call ABI handling (§4.9): where call arguments and results land.
//! Target-specific register/stack assignment is out of scope (target
//! machine encoding is a non-goal); what this crate owns is the *shape* of
//! the convention — a fixed register budget, overflow to the outgoing
//! stack area, and the frame bookkeeping that an outgoing call needs.

use super::operand::OperandFlag;

/// How many argument registers a call convention is assumed to offer before
/// spilling to the outgoing-stack area. A placeholder constant standing in
/// for a real target's calling convention (target encoding is a non-goal).
const ARG_REGISTERS: u32 = 6;

/// Where one argument (or the result) of a foreign call lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgLocation {
    Register(u32),
    /// Byte offset into the outgoing-argument area of the caller's frame.
    Stack(u32),
}

impl ArgLocation {
    pub fn operand_flag(self) -> OperandFlag {
        match self {
            ArgLocation::Register(_) => OperandFlag::Reg,
            ArgLocation::Stack(_) => OperandFlag::Stack,
        }
    }
}

/// The resolved ABI shape for one call site: where each argument goes,
/// where the result is read back from, and how much outgoing-stack space
/// the frame must reserve.
#[derive(Clone, Debug)]
pub struct ForeignCallAbi {
    pub arg_locations: Vec<ArgLocation>,
    pub result_location: ArgLocation,
    /// Bytes of outgoing-argument stack space this call needs; the frame
    /// reserves the max over every call site in the method.
    pub outgoing_stack_bytes: u32,
}

/// Classify `arg_count` call arguments into register/stack slots, and
/// place the call's result in the first result register (§4.9: "Foreign
/// calls move arguments to ABI-defined locations; the result is copied back
/// to a fresh variable; the call site records that the frame uses outgoing
/// space").
pub fn foreign_call_abi(arg_count: u32) -> ForeignCallAbi {
    let mut arg_locations = Vec::with_capacity(arg_count as usize);
    let mut stack_offset = 0u32;
    for i in 0..arg_count {
        if i < ARG_REGISTERS {
            arg_locations.push(ArgLocation::Register(i));
        } else {
            arg_locations.push(ArgLocation::Stack(stack_offset));
            stack_offset += 8;
        }
    }
    ForeignCallAbi {
        arg_locations,
        result_location: ArgLocation::Register(0),
        outgoing_stack_bytes: stack_offset,
    }
}
