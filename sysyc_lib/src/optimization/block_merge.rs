use crate::backend::{ExtraData, MirOptimizePass};
use crate::error::Result;
use mir::{Inst, Jump, MirFunction, MirPackage, Value};

/// Fuses a block into its predecessor when the predecessor jumps only to
/// it and it has no other way in.
pub struct MergeBlock;

impl MirOptimizePass for MergeBlock {
    fn pass_name(&self) -> &'static str {
        "MergeBlock"
    }

    fn optimize_mir(&mut self, package: &mut MirPackage, _extra: &mut ExtraData) -> Result<()> {
        for func in package.functions.values_mut() {
            if func.ty.is_extern {
                continue;
            }
            merge_blocks(func);
        }
        Ok(())
    }
}

pub fn merge_blocks(func: &mut MirFunction) {
    while let Some((pred, succ)) = find_mergeable(func) {
        let mut succ_blk = func.basic_blks.remove(&succ).unwrap();
        // A single predecessor degrades every phi to a plain copy.
        for inst in &mut succ_blk.inst {
            if let Inst::Phi { dest, vars } = inst {
                if let Some(&var) = vars.first() {
                    *inst = Inst::Assign {
                        dest: *dest,
                        src: Value::Var(var),
                    };
                }
            }
        }
        let pred_blk = func.basic_blks.get_mut(&pred).unwrap();
        pred_blk.inst.append(&mut succ_blk.inst);
        pred_blk.jump = succ_blk.jump;
        func.rebuild_predecessors();
    }
}

fn find_mergeable(func: &MirFunction) -> Option<(u32, u32)> {
    let entry = func.entry_block_id();
    for blk in func.basic_blks.values() {
        let Jump::Br(target) = blk.jump else {
            continue;
        };
        if target == blk.id || Some(target) == entry {
            continue;
        }
        let Some(succ) = func.basic_blks.get(&target) else {
            continue;
        };
        if succ.preceding.len() == 1 && succ.preceding.contains(&blk.id) {
            return Some((blk.id, target));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    #[test]
    fn merges_straight_line_chain_into_one_block() {
        let mut func = function(
            "f",
            1,
            vec![
                block(
                    0,
                    vec![Inst::Assign {
                        dest: VarId(2),
                        src: Value::Imm(1),
                    }],
                    Jump::Br(1),
                ),
                block(
                    1,
                    vec![Inst::Op {
                        dest: VarId(3),
                        op: Op::Add,
                        lhs: Value::Var(VarId(2)),
                        rhs: Value::Var(VarId(1)),
                    }],
                    Jump::Br(2),
                ),
                block(2, vec![], Jump::Return(Some(VarId(3)))),
            ],
        );
        merge_blocks(&mut func);
        assert_eq!(func.basic_blks.len(), 1);
        let entry = &func.basic_blks[&0];
        assert_eq!(entry.inst.len(), 2);
        assert_eq!(entry.jump, Jump::Return(Some(VarId(3))));
    }

    #[test]
    fn join_points_are_not_merged() {
        let mut func = function(
            "f",
            1,
            vec![
                block(0, vec![], Jump::BrCond(VarId(1), 1, 2)),
                block(1, vec![], Jump::Br(3)),
                block(2, vec![], Jump::Br(3)),
                block(3, vec![], Jump::Return(None)),
            ],
        );
        merge_blocks(&mut func);
        // Block 3 keeps two predecessors and must survive.
        assert!(func.basic_blks.contains_key(&3));
        assert_eq!(func.basic_blks.len(), 4);
    }

    #[test]
    fn single_operand_phi_becomes_assign() {
        let mut func = function(
            "f",
            1,
            vec![
                block(0, vec![], Jump::Br(1)),
                block(
                    1,
                    vec![Inst::Phi {
                        dest: VarId(2),
                        vars: vec![VarId(1)],
                    }],
                    Jump::Return(Some(VarId(2))),
                ),
            ],
        );
        merge_blocks(&mut func);
        let entry = &func.basic_blks[&0];
        assert_eq!(
            entry.inst[0],
            Inst::Assign {
                dest: VarId(2),
                src: Value::Var(VarId(1)),
            }
        );
    }
}
