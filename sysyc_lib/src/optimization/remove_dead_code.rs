use crate::backend::{ExtraData, MirOptimizePass};
use crate::error::Result;
use mir::{Jump, MirFunction, MirPackage, VarId};
use std::collections::HashSet;

/// Drops blocks unreachable from the entry and pure instructions whose
/// destinations are never read. Running it twice is the same as running it
/// once.
pub struct RemoveDeadCode;

impl MirOptimizePass for RemoveDeadCode {
    fn pass_name(&self) -> &'static str {
        "RemoveDeadCode"
    }

    fn optimize_mir(&mut self, package: &mut MirPackage, _extra: &mut ExtraData) -> Result<()> {
        for func in package.functions.values_mut() {
            if func.ty.is_extern {
                continue;
            }
            purge_function(func);
        }
        Ok(())
    }
}

pub fn purge_function(func: &mut MirFunction) {
    remove_unreachable_blocks(func);

    // Unused pure definitions; removing one can strand another, so loop to
    // a fixed point.
    loop {
        let used = used_vars(func);
        let mut changed = false;
        for blk in func.basic_blks.values_mut() {
            let before = blk.inst.len();
            blk.inst.retain(|inst| {
                inst.has_side_effects() || inst.dest().map_or(true, |d| used.contains(&d))
            });
            changed |= blk.inst.len() != before;
        }
        if !changed {
            break;
        }
    }
}

fn used_vars(func: &MirFunction) -> HashSet<VarId> {
    let mut used = HashSet::new();
    for blk in func.basic_blks.values() {
        for inst in &blk.inst {
            used.extend(inst.uses());
        }
        match blk.jump {
            Jump::BrCond(cond, _, _) => {
                used.insert(cond);
            }
            Jump::Return(Some(var)) => {
                used.insert(var);
            }
            _ => {}
        }
    }
    used
}

fn remove_unreachable_blocks(func: &mut MirFunction) {
    let Some(entry) = func.entry_block_id() else {
        return;
    };
    let mut reachable = HashSet::new();
    let mut stack = vec![entry];
    while let Some(id) = stack.pop() {
        if !reachable.insert(id) {
            continue;
        }
        if let Some(blk) = func.basic_blks.get(&id) {
            stack.extend(blk.jump.targets());
        }
    }
    let before = func.basic_blks.len();
    func.basic_blks.retain(|id, _| reachable.contains(id));
    if func.basic_blks.len() != before {
        func.rebuild_predecessors();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use mir::{Inst, Op, Value};

    fn count_insts(func: &MirFunction) -> usize {
        func.basic_blks.values().map(|b| b.inst.len()).sum()
    }

    #[test]
    fn removes_unused_pure_chain_but_keeps_effects() {
        let mut func = function(
            "f",
            1,
            vec![block(
                0,
                vec![
                    // %2 feeds only %3, which is never used.
                    Inst::Op {
                        dest: VarId(2),
                        op: Op::Add,
                        lhs: Value::Var(VarId(1)),
                        rhs: Value::Imm(1),
                    },
                    Inst::Op {
                        dest: VarId(3),
                        op: Op::Mul,
                        lhs: Value::Var(VarId(2)),
                        rhs: Value::Imm(2),
                    },
                    // Call results are effects even when unused.
                    Inst::Call {
                        dest: VarId(4),
                        func: "f".to_string(),
                        args: vec![Value::Var(VarId(1))],
                    },
                ],
                Jump::Return(Some(VarId(1))),
            )],
        );
        purge_function(&mut func);
        assert_eq!(count_insts(&func), 1);
        assert!(matches!(
            func.basic_blks[&0].inst[0],
            Inst::Call { .. }
        ));
    }

    #[test]
    fn removes_unreachable_blocks() {
        let mut func = function(
            "f",
            0,
            vec![
                block(0, vec![], Jump::Return(None)),
                block(7, vec![], Jump::Br(0)),
            ],
        );
        purge_function(&mut func);
        assert!(func.basic_blks.contains_key(&0));
        assert!(!func.basic_blks.contains_key(&7));
        assert!(func.basic_blks[&0].preceding.is_empty());
    }

    #[test]
    fn running_twice_equals_running_once() {
        let mut func = function(
            "f",
            1,
            vec![block(
                0,
                vec![
                    Inst::Op {
                        dest: VarId(2),
                        op: Op::Add,
                        lhs: Value::Var(VarId(1)),
                        rhs: Value::Imm(1),
                    },
                    Inst::Op {
                        dest: VarId(3),
                        op: Op::Add,
                        lhs: Value::Var(VarId(2)),
                        rhs: Value::Imm(1),
                    },
                ],
                Jump::Return(Some(VarId(3))),
            )],
        );
        purge_function(&mut func);
        let once = format!("{func}");
        purge_function(&mut func);
        assert_eq!(once, format!("{func}"));
        // The live chain is untouched.
        assert_eq!(count_insts(&func), 2);
    }
}
