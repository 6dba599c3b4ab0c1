use crate::backend::{ExtraData, MirOptimizePass};
use crate::error::Result;
use mir::{Inst, Jump, MirFunction, MirPackage, RefTarget, Value, VarId};
use std::collections::HashMap;

/// Upper bound on the body size of an inlining candidate.
const INLINE_INST_LIMIT: usize = 16;

/// Splices small single-block functions into their call sites: parameter
/// copies, the remapped body, then a copy of the return value.
pub struct InlineFunc;

impl MirOptimizePass for InlineFunc {
    fn pass_name(&self) -> &'static str {
        "InlineFunc"
    }

    fn optimize_mir(&mut self, package: &mut MirPackage, _extra: &mut ExtraData) -> Result<()> {
        let candidates: HashMap<String, MirFunction> = package
            .functions
            .iter()
            .filter(|(_, func)| is_candidate(func))
            .map(|(name, func)| (name.clone(), func.clone()))
            .collect();
        if candidates.is_empty() {
            return Ok(());
        }
        for func in package.functions.values_mut() {
            if func.ty.is_extern {
                continue;
            }
            inline_calls(func, &candidates);
        }
        Ok(())
    }
}

fn is_candidate(func: &MirFunction) -> bool {
    if func.ty.is_extern || func.ty.is_variadic() || func.basic_blks.len() != 1 {
        return false;
    }
    let Some(blk) = func.basic_blks.values().next() else {
        return false;
    };
    matches!(blk.jump, Jump::Return(_))
        && blk.inst.len() <= INLINE_INST_LIMIT
        && blk.inst.iter().all(|inst| match inst {
            // Self-recursion can't be spliced away.
            Inst::Call { func: callee, .. } => callee != &func.name,
            Inst::Phi { .. } => false,
            _ => true,
        })
}

fn inline_calls(func: &mut MirFunction, candidates: &HashMap<String, MirFunction>) {
    let block_ids: Vec<u32> = func.basic_blks.keys().copied().collect();
    for id in block_ids {
        loop {
            let pos = func.basic_blks[&id].inst.iter().position(|inst| {
                matches!(
                    inst,
                    Inst::Call { func: callee, .. }
                    if callee != &func.name && candidates.contains_key(callee)
                )
            });
            let Some(pos) = pos else {
                break;
            };
            let Inst::Call { dest, func: callee, args } = func.basic_blks[&id].inst[pos].clone()
            else {
                unreachable!();
            };
            let callee = &candidates[&callee];
            let offset = max_var_id(func) + 1;

            let mut spliced = Vec::new();
            for (i, arg) in args.iter().enumerate() {
                spliced.push(Inst::Assign {
                    dest: VarId(i as u32 + 1 + offset),
                    src: *arg,
                });
            }
            let body = callee.basic_blks.values().next().unwrap();
            for inst in &body.inst {
                spliced.push(offset_vars(inst.clone(), offset));
            }
            if let Jump::Return(Some(ret)) = &body.jump {
                spliced.push(Inst::Assign {
                    dest,
                    src: Value::Var(VarId(ret.0 + offset)),
                });
            }

            for (&var, descriptor) in &callee.variables {
                func.variables
                    .insert(VarId(var.0 + offset), descriptor.clone());
            }
            func.basic_blks
                .get_mut(&id)
                .unwrap()
                .inst
                .splice(pos..=pos, spliced);
        }
    }
}

fn max_var_id(func: &MirFunction) -> u32 {
    let mut max = func.variables.keys().map(|v| v.0).max().unwrap_or(0);
    let mut see = |var: VarId| max = max.max(var.0);
    for blk in func.basic_blks.values() {
        for inst in &blk.inst {
            if let Some(dest) = inst.dest() {
                see(dest);
            }
            for used in inst.uses() {
                see(used);
            }
        }
        match blk.jump {
            Jump::BrCond(cond, _, _) => see(cond),
            Jump::Return(Some(var)) => see(var),
            _ => {}
        }
    }
    max
}

fn offset_vars(mut inst: Inst, offset: u32) -> Inst {
    let shift = |var: &mut VarId| var.0 += offset;
    let shift_value = |value: &mut Value| {
        if let Value::Var(var) = value {
            var.0 += offset;
        }
    };
    match &mut inst {
        Inst::Assign { dest, src } => {
            shift(dest);
            shift_value(src);
        }
        Inst::Op { dest, lhs, rhs, .. } => {
            shift(dest);
            shift_value(lhs);
            shift_value(rhs);
        }
        Inst::Call { dest, args, .. } => {
            shift(dest);
            args.iter_mut().for_each(shift_value);
        }
        Inst::Load { dest, src } => {
            shift(dest);
            shift_value(src);
        }
        Inst::Store { dest, val } => {
            shift_value(dest);
            shift_value(val);
        }
        Inst::Ref { dest, target } => {
            shift(dest);
            if let RefTarget::Var(var) = target {
                shift(var);
            }
        }
        Inst::PtrOffset { dest, ptr, offset: off } => {
            shift(dest);
            shift(ptr);
            shift_value(off);
        }
        Inst::Phi { dest, vars } => {
            shift(dest);
            vars.iter_mut().for_each(shift);
        }
    }
    inst
}
