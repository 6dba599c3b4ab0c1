//! Small builders for MIR fixtures used across the test modules.

pub use mir::{Inst, Jump, MirFunction, MirPackage, Op, RefTarget, Value, VarId};

use mir::{BasicBlk, FnTy, Ty, Variable};

/// A function with `nparams` int parameters returning int. Parameter `i`
/// is variable `%i`, 1-based. Predecessor sets are derived from the jumps.
pub fn function(name: &str, nparams: usize, blocks: Vec<BasicBlk>) -> MirFunction {
    let mut func = MirFunction::new(name, FnTy::new(vec![Ty::Int; nparams], Ty::Int));
    for i in 0..nparams {
        func.variables
            .insert(VarId(i as u32 + 1), Variable::new(Ty::Int));
    }
    for blk in blocks {
        func.basic_blks.insert(blk.id, blk);
    }
    func.rebuild_predecessors();
    func
}

pub fn block(id: u32, inst: Vec<Inst>, jump: Jump) -> BasicBlk {
    let mut blk = BasicBlk::new(id, jump);
    blk.inst = inst;
    blk
}

/// Wraps a single function into a package under its own name.
pub fn package_of(func: MirFunction) -> MirPackage {
    let mut package = MirPackage::default();
    package.functions.insert(func.name.clone(), func);
    package
}
