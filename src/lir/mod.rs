//! Block-scheduled LIR generation (§4.9): the last IR level this crate
//! owns. A scheduled `Graph` (see `scheduler.rs`) is lowered block by block
//! into `LirInst`s built from the shared operand-mode/flag contract, ready
//! for `regalloc` to walk.

pub mod abi;
pub mod build;
pub mod inst;
pub mod operand;
pub mod switch;

pub use abi::{foreign_call_abi, ArgLocation, ForeignCallAbi};
pub use build::{generate, Lir};
pub use inst::{LirInst, LirOpcode};
pub use operand::{Operand, OperandFlag, OperandMode};
pub use switch::{choose_strategy, SwitchStrategy};
