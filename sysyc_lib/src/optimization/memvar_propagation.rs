use crate::backend::{ExtraData, MirOptimizePass};
use crate::error::Result;
use mir::{Inst, Jump, MirFunction, MirPackage, Value, VarId};
use std::collections::HashMap;

/// Store-to-load forwarding for memory variables.
///
/// Within a block, a load from an address that was stored to since the
/// last call (or other store) is replaced by the stored value. Because
/// addresses reached through different variables may alias, every store
/// and every call invalidates the whole forwarding window; only the most
/// recent store survives as a forwarding source.
pub struct MemoryVarPropagation;

impl MirOptimizePass for MemoryVarPropagation {
    fn pass_name(&self) -> &'static str {
        "MemoryVarPropagation"
    }

    fn optimize_mir(&mut self, package: &mut MirPackage, _extra: &mut ExtraData) -> Result<()> {
        for func in package.functions.values_mut() {
            if func.ty.is_extern {
                continue;
            }
            propagate(func);
        }
        Ok(())
    }
}

pub fn propagate(func: &mut MirFunction) {
    let mut replace: HashMap<VarId, Value> = HashMap::new();
    let mut dead_loads: Vec<(u32, usize)> = Vec::new();

    for blk in func.basic_blks.values() {
        let mut forwarded: HashMap<VarId, Value> = HashMap::new();
        for (idx, inst) in blk.inst.iter().enumerate() {
            match inst {
                Inst::Call { .. } => forwarded.clear(),
                Inst::Store { dest, val } => {
                    forwarded.clear();
                    if let Value::Var(addr) = dest {
                        forwarded.insert(*addr, *val);
                    }
                }
                Inst::Load {
                    dest,
                    src: Value::Var(addr),
                } => {
                    if let Some(&value) = forwarded.get(addr) {
                        replace.insert(*dest, value);
                        // Immediates can't stand in for a variable in a phi
                        // or branch, so only variable-valued loads go away.
                        if matches!(value, Value::Var(_)) {
                            dead_loads.push((blk.id, idx));
                        }
                    }
                }
                _ => {}
            }
        }
    }

    if replace.is_empty() {
        return;
    }

    // Forwarded values may themselves be forwarded loads.
    let resolved: HashMap<VarId, Value> = replace
        .keys()
        .map(|&var| (var, resolve(&replace, var)))
        .collect();

    for blk in func.basic_blks.values_mut() {
        for inst in &mut blk.inst {
            inst.replace_uses(&|var| resolved.get(&var).copied());
        }
        match &mut blk.jump {
            Jump::BrCond(cond, _, _) => {
                if let Some(Value::Var(new)) = resolved.get(cond) {
                    *cond = *new;
                }
            }
            Jump::Return(Some(var)) => {
                if let Some(Value::Var(new)) = resolved.get(var) {
                    *var = *new;
                }
            }
            _ => {}
        }
    }

    dead_loads.sort();
    for &(blk_id, idx) in dead_loads.iter().rev() {
        func.basic_blks.get_mut(&blk_id).unwrap().inst.remove(idx);
    }
}

fn resolve(replace: &HashMap<VarId, Value>, var: VarId) -> Value {
    let mut value = replace[&var];
    for _ in 0..replace.len() {
        match value {
            Value::Var(next) => match replace.get(&next) {
                Some(&deeper) => value = deeper,
                None => break,
            },
            Value::Imm(_) => break,
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    fn store(addr: u32, val: Value) -> Inst {
        Inst::Store {
            dest: Value::Var(VarId(addr)),
            val,
        }
    }

    fn load(dest: u32, addr: u32) -> Inst {
        Inst::Load {
            dest: VarId(dest),
            src: Value::Var(VarId(addr)),
        }
    }

    #[test]
    fn forwards_stored_variable_and_deletes_the_load() {
        let mut func = function(
            "f",
            1,
            vec![block(
                0,
                vec![
                    store(2, Value::Var(VarId(1))),
                    load(3, 2),
                    Inst::Op {
                        dest: VarId(4),
                        op: Op::Add,
                        lhs: Value::Var(VarId(3)),
                        rhs: Value::Imm(1),
                    },
                ],
                Jump::Return(Some(VarId(4))),
            )],
        );
        propagate(&mut func);
        let insts = &func.basic_blks[&0].inst;
        assert_eq!(insts.len(), 2, "the forwarded load is deleted");
        assert_eq!(
            insts[1],
            Inst::Op {
                dest: VarId(4),
                op: Op::Add,
                lhs: Value::Var(VarId(1)),
                rhs: Value::Imm(1),
            }
        );
    }

    #[test]
    fn forwards_stored_immediate_but_keeps_the_load() {
        let mut func = function(
            "f",
            0,
            vec![block(
                0,
                vec![
                    store(1, Value::Imm(7)),
                    load(2, 1),
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
        propagate(&mut func);
        let insts = &func.basic_blks[&0].inst;
        assert_eq!(insts.len(), 3);
        assert_eq!(
            insts[2],
            Inst::Op {
                dest: VarId(3),
                op: Op::Add,
                lhs: Value::Imm(7),
                rhs: Value::Imm(1),
            }
        );
    }

    #[test]
    fn calls_invalidate_the_forwarding_window() {
        let mut func = function(
            "f",
            1,
            vec![block(
                0,
                vec![
                    store(2, Value::Var(VarId(1))),
                    Inst::Call {
                        dest: VarId(5),
                        func: "g".to_string(),
                        args: vec![],
                    },
                    load(3, 2),
                ],
                Jump::Return(Some(VarId(3))),
            )],
        );
        propagate(&mut func);
        // The call may have written through the pointer.
        assert_eq!(func.basic_blks[&0].inst.len(), 3);
        assert_eq!(func.basic_blks[&0].jump, Jump::Return(Some(VarId(3))));
    }

    #[test]
    fn an_intervening_store_invalidates_other_addresses() {
        let mut func = function(
            "f",
            2,
            vec![block(
                0,
                vec![
                    store(3, Value::Var(VarId(1))),
                    // Possibly aliasing store through another pointer.
                    store(4, Value::Var(VarId(2))),
                    load(5, 3),
                ],
                Jump::Return(Some(VarId(5))),
            )],
        );
        propagate(&mut func);
        assert_eq!(func.basic_blks[&0].inst.len(), 3);
    }
}
