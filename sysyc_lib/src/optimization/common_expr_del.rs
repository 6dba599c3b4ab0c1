use crate::backend::{ExtraData, MirOptimizePass};
use crate::error::Result;
use mir::{Inst, MirFunction, MirPackage, Op, Value, VarId};
use std::collections::HashMap;

/// Block-local common-subexpression elimination over pure binary ops.
/// Operands of commutative operators are put in a canonical order first.
pub struct CommonExprDel;

impl MirOptimizePass for CommonExprDel {
    fn pass_name(&self) -> &'static str {
        "CommonExprDel"
    }

    fn optimize_mir(&mut self, package: &mut MirPackage, _extra: &mut ExtraData) -> Result<()> {
        for func in package.functions.values_mut() {
            if func.ty.is_extern {
                continue;
            }
            delete_common_exprs(func);
        }
        Ok(())
    }
}

pub fn delete_common_exprs(func: &mut MirFunction) {
    for blk in func.basic_blks.values_mut() {
        let mut seen: HashMap<(Op, Value, Value), VarId> = HashMap::new();
        for inst in &mut blk.inst {
            let Inst::Op { dest, op, lhs, rhs } = inst else {
                continue;
            };
            let (a, b) = if op.is_commutative() && rhs < lhs {
                (*rhs, *lhs)
            } else {
                (*lhs, *rhs)
            };
            match seen.get(&(*op, a, b)) {
                Some(&prev) => {
                    *inst = Inst::Assign {
                        dest: *dest,
                        src: Value::Var(prev),
                    };
                }
                None => {
                    seen.insert((*op, a, b), *dest);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    #[test]
    fn duplicate_expression_becomes_a_copy() {
        let mut func = function(
            "f",
            2,
            vec![block(
                0,
                vec![
                    Inst::Op {
                        dest: VarId(3),
                        op: Op::Add,
                        lhs: Value::Var(VarId(1)),
                        rhs: Value::Var(VarId(2)),
                    },
                    // Same operands, swapped: add is commutative.
                    Inst::Op {
                        dest: VarId(4),
                        op: Op::Add,
                        lhs: Value::Var(VarId(2)),
                        rhs: Value::Var(VarId(1)),
                    },
                ],
                Jump::Return(Some(VarId(4))),
            )],
        );
        delete_common_exprs(&mut func);
        assert_eq!(
            func.basic_blks[&0].inst[1],
            Inst::Assign {
                dest: VarId(4),
                src: Value::Var(VarId(3)),
            }
        );
    }

    #[test]
    fn non_commutative_swap_is_not_an_alias() {
        let mut func = function(
            "f",
            2,
            vec![block(
                0,
                vec![
                    Inst::Op {
                        dest: VarId(3),
                        op: Op::Sub,
                        lhs: Value::Var(VarId(1)),
                        rhs: Value::Var(VarId(2)),
                    },
                    Inst::Op {
                        dest: VarId(4),
                        op: Op::Sub,
                        lhs: Value::Var(VarId(2)),
                        rhs: Value::Var(VarId(1)),
                    },
                ],
                Jump::Return(Some(VarId(4))),
            )],
        );
        delete_common_exprs(&mut func);
        assert!(matches!(func.basic_blks[&0].inst[1], Inst::Op { .. }));
    }
}
