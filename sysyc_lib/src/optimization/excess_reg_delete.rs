use crate::backend::{ArmOptimizePass, ExtraData};
use crate::error::Result;
use arm_ir::{instr, ArmCode, ConditionCode, Inst, Mem, OpCode, Operand2};

/// Cleans up after register allocation: self-moves, reloads of a value
/// that is still in a register, and branches to the directly following
/// label.
pub struct ExcessRegDelete;

impl ArmOptimizePass for ExcessRegDelete {
    fn pass_name(&self) -> &'static str {
        "ExcessRegDelete"
    }

    fn optimize_arm(&mut self, code: &mut ArmCode, _extra: &mut ExtraData) -> Result<()> {
        for func in &mut code.functions {
            delete_excess(&mut func.inst);
        }
        Ok(())
    }
}

pub fn delete_excess(insts: &mut Vec<Inst>) {
    let old = std::mem::take(insts);
    let mut out: Vec<Inst> = Vec::with_capacity(old.len());
    for (i, inst) in old.iter().enumerate() {
        match inst {
            // mov rX, rX
            Inst::Arith2 {
                op: OpCode::Mov,
                r1,
                r2: Operand2::Reg(rop),
                cond: ConditionCode::Always,
            } if !rop.is_shifted() && rop.reg == *r1 => continue,
            // b .L followed directly by .L:
            Inst::Br {
                op: OpCode::B,
                label,
                cond: ConditionCode::Always,
            } if matches!(old.get(i + 1), Some(Inst::Label(next)) if next == label) => continue,
            // ldr from a slot that was just stored: reuse the register.
            Inst::LoadStore {
                op: OpCode::LdR,
                rd,
                mem: Mem::Operand(mem),
                cond: ConditionCode::Always,
            } => {
                let stored = match out.last() {
                    Some(Inst::LoadStore {
                        op: OpCode::StR,
                        rd: stored,
                        mem: Mem::Operand(stored_mem),
                        cond: ConditionCode::Always,
                    }) if stored_mem == mem => Some(*stored),
                    _ => None,
                };
                match stored {
                    Some(stored) if stored == *rd => continue,
                    Some(stored) => {
                        out.push(instr::mov(*rd, stored));
                        continue;
                    }
                    None => out.push(inst.clone()),
                }
            }
            _ => out.push(inst.clone()),
        }
    }
    *insts = out;
}
