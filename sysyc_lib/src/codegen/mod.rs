mod bb_rearrange;
mod codegen;
mod instruction_schedule;
mod math_opt;
mod reg_alloc;

pub use bb_rearrange::BasicBlkRearrange;
pub use codegen::Codegen;
pub use instruction_schedule::InstructionSchedule;
pub use math_opt::MathOptimization;
pub use reg_alloc::RegAllocatePass;
