mod block;
mod function;
mod instruction;
mod package;
mod ty;
mod value;

pub use block::{BasicBlk, Jump, COMMON_EXIT};
pub use function::{MirFunction, Variable};
pub use instruction::{Inst, Op, RefTarget};
pub use package::{GlobalValue, MirPackage};
pub use ty::{FnTy, Ty};
pub use value::{Value, VarId};
