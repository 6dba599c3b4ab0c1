use crate::backend::{ArmOptimizePass, ExtraData};
use crate::error::Result;
use arm_ir::{instr, ArmCode, ConditionCode, Inst, Mem, MemOffset, OpCode, Operand2, Reg};

/// Arithmetic rewrites on the virtual-register stream: eliminates the
/// remainder pseudo-op and strength-reduces multiplication by powers of
/// two. Must run before register allocation, since the expansions mint
/// fresh virtual registers.
pub struct MathOptimization;

impl ArmOptimizePass for MathOptimization {
    fn pass_name(&self) -> &'static str {
        "MathOptimization"
    }

    fn optimize_arm(&mut self, code: &mut ArmCode, _extra: &mut ExtraData) -> Result<()> {
        for func in &mut code.functions {
            optimize_func(func);
        }
        Ok(())
    }
}

fn optimize_func(func: &mut arm_ir::Function) {
    let mut counter = next_virtual(&func.inst);
    let mut fresh = || {
        let reg = Reg::Virtual(counter);
        counter += 1;
        reg
    };

    let old = std::mem::take(&mut func.inst);
    let mut out: Vec<Inst> = Vec::with_capacity(old.len());
    for (i, inst) in old.iter().enumerate() {
        match inst {
            // rd = r1 % r2  ==>  q = r1 / r2; p = q * r2; rd = r1 - p
            Inst::Arith3 {
                op: OpCode::Mod,
                rd,
                r1,
                r2,
                cond: ConditionCode::Always,
            } => {
                let divisor = match r2 {
                    Operand2::Reg(rop) if !rop.is_shifted() => rop.reg,
                    _ => {
                        // Divisors must live in a plain register.
                        let tmp = fresh();
                        out.push(Inst::Arith2 {
                            op: OpCode::Mov,
                            r1: tmp,
                            r2: *r2,
                            cond: ConditionCode::Always,
                        });
                        tmp
                    }
                };
                let quotient = fresh();
                let product = fresh();
                out.push(instr::sdiv(quotient, *r1, divisor));
                out.push(instr::mul(product, quotient, divisor));
                out.push(instr::sub(*rd, *r1, product));
            }
            // mov t, #2^k ; mul rd, x, t  ==>  lsl rd, x, #k
            Inst::Arith3 {
                op: OpCode::Mul,
                rd,
                r1,
                r2: Operand2::Reg(rop),
                cond: ConditionCode::Always,
            } if !rop.is_shifted() => {
                let pattern = match out.last() {
                    Some(Inst::Arith2 {
                        op: OpCode::Mov,
                        r1: t,
                        r2: Operand2::Imm(c),
                        cond: ConditionCode::Always,
                    }) if (*t == rop.reg || *t == *r1) && c.is_power_of_two() => {
                        let factor_reg = *t;
                        let other = if factor_reg == rop.reg { *r1 } else { rop.reg };
                        Some((factor_reg, other, c.trailing_zeros()))
                    }
                    _ => None,
                };
                match pattern {
                    Some((factor_reg, other, shift)) if other != factor_reg => {
                        if !reg_used_after(&old[i + 1..], factor_reg) {
                            out.pop();
                        }
                        out.push(instr::lsl_imm(*rd, other, shift));
                    }
                    _ => out.push(inst.clone()),
                }
            }
            _ => out.push(inst.clone()),
        }
    }
    func.inst = out;
}

fn next_virtual(insts: &[Inst]) -> u32 {
    let mut max = 0;
    let mut see = |reg: Reg| {
        if let Reg::Virtual(n) = reg {
            max = max.max(n + 1);
        }
    };
    for inst in insts {
        match inst {
            Inst::Arith2 { r1, r2, .. } => {
                see(*r1);
                if let Some(reg) = r2.reg() {
                    see(reg);
                }
            }
            Inst::Arith3 { rd, r1, r2, .. } => {
                see(*rd);
                see(*r1);
                if let Some(reg) = r2.reg() {
                    see(reg);
                }
            }
            Inst::LoadStore { rd, mem, .. } => {
                see(*rd);
                if let Mem::Operand(mem) = mem {
                    see(mem.base);
                    if let MemOffset::Reg(rop) = mem.offset {
                        see(rop.reg);
                    }
                }
            }
            Inst::MultLoadStore { rn, regs, .. } => {
                see(*rn);
                regs.iter().copied().for_each(&mut see);
            }
            Inst::PushPop { regs, .. } => regs.iter().copied().for_each(&mut see),
            Inst::Br { .. } | Inst::Label(_) | Inst::Pure(_) => {}
        }
    }
    max
}

fn reg_used_after(rest: &[Inst], reg: Reg) -> bool {
    rest.iter().any(|inst| uses_reg(inst, reg))
}

fn uses_reg(inst: &Inst, reg: Reg) -> bool {
    let op2_uses = |op2: &Operand2| op2.reg() == Some(reg);
    match inst {
        Inst::Arith2 { r1, r2, .. } => *r1 == reg || op2_uses(r2),
        Inst::Arith3 { rd, r1, r2, .. } => *rd == reg || *r1 == reg || op2_uses(r2),
        Inst::LoadStore { rd, mem, .. } => {
            *rd == reg
                || match mem {
                    Mem::Operand(mem) => {
                        mem.base == reg
                            || matches!(mem.offset, MemOffset::Reg(rop) if rop.reg == reg)
                    }
                    Mem::Label(_) => false,
                }
        }
        Inst::MultLoadStore { rn, regs, .. } => *rn == reg || regs.contains(&reg),
        Inst::PushPop { regs, .. } => regs.contains(&reg),
        Inst::Br { .. } | Inst::Label(_) | Inst::Pure(_) => false,
    }
}
