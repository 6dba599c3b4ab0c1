mod code;
mod global_data;
mod instruction;
mod operand;
mod reg;

pub mod outputter;

pub use code::{bb_label, fn_end_label, ld_pc_label, ArmCode, Function, LD_PC_PREFIX};
pub use global_data::GlobalData;
pub use instruction::{instr, ConditionCode, Inst, OpCode};
pub use operand::{Mem, MemOffset, MemoryAccessKind, MemoryOperand, Operand2, RegisterOperand, ShiftKind};
pub use outputter::{ArmOutputConfig, ArmOutputter};
pub use reg::{Reg, RegisterKind};
