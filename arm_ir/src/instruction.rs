use crate::{Mem, MemoryOperand, Operand2, Reg};
use std::collections::BTreeSet;

/// Constructor helpers, so call sites read like the mnemonics they emit.
pub mod instr {
    use super::*;

    pub fn mov(rd: Reg, src: impl Into<Operand2>) -> Inst {
        Inst::Arith2 {
            op: OpCode::Mov,
            r1: rd,
            r2: src.into(),
            cond: ConditionCode::Always,
        }
    }

    pub fn mov_cond(rd: Reg, src: impl Into<Operand2>, cond: ConditionCode) -> Inst {
        Inst::Arith2 {
            op: OpCode::Mov,
            r1: rd,
            r2: src.into(),
            cond,
        }
    }

    /// Sets the high half of `rd`, leaving the low half alone. `imm` is the
    /// already-shifted top 16 bits.
    pub fn movt(rd: Reg, imm: u32) -> Inst {
        Inst::Arith2 {
            op: OpCode::MovT,
            r1: rd,
            r2: Operand2::Imm(imm),
            cond: ConditionCode::Always,
        }
    }

    pub fn cmp(r1: Reg, r2: impl Into<Operand2>) -> Inst {
        Inst::Arith2 {
            op: OpCode::Cmp,
            r1,
            r2: r2.into(),
            cond: ConditionCode::Always,
        }
    }

    pub fn cmn(r1: Reg, r2: impl Into<Operand2>) -> Inst {
        Inst::Arith2 {
            op: OpCode::Cmn,
            r1,
            r2: r2.into(),
            cond: ConditionCode::Always,
        }
    }

    pub fn arith3(op: OpCode, rd: Reg, r1: Reg, r2: impl Into<Operand2>) -> Inst {
        Inst::Arith3 {
            op,
            rd,
            r1,
            r2: r2.into(),
            cond: ConditionCode::Always,
        }
    }

    pub fn add(rd: Reg, r1: Reg, r2: impl Into<Operand2>) -> Inst {
        arith3(OpCode::Add, rd, r1, r2)
    }

    pub fn sub(rd: Reg, r1: Reg, r2: impl Into<Operand2>) -> Inst {
        arith3(OpCode::Sub, rd, r1, r2)
    }

    pub fn rsb(rd: Reg, r1: Reg, r2: impl Into<Operand2>) -> Inst {
        arith3(OpCode::Rsb, rd, r1, r2)
    }

    pub fn mul(rd: Reg, r1: Reg, r2: Reg) -> Inst {
        arith3(OpCode::Mul, rd, r1, r2)
    }

    pub fn sdiv(rd: Reg, r1: Reg, r2: Reg) -> Inst {
        arith3(OpCode::SDiv, rd, r1, r2)
    }

    pub fn lsl_imm(rd: Reg, r1: Reg, amount: u32) -> Inst {
        arith3(OpCode::Lsl, rd, r1, Operand2::Imm(amount))
    }

    pub fn ldr(rd: Reg, mem: impl Into<Mem>) -> Inst {
        Inst::LoadStore {
            op: OpCode::LdR,
            rd,
            mem: mem.into(),
            cond: ConditionCode::Always,
        }
    }

    pub fn str(rd: Reg, mem: impl Into<Mem>) -> Inst {
        Inst::LoadStore {
            op: OpCode::StR,
            rd,
            mem: mem.into(),
            cond: ConditionCode::Always,
        }
    }

    pub fn ldr_at(rd: Reg, base: Reg, offset: i16) -> Inst {
        ldr(rd, MemoryOperand::offset(base, offset))
    }

    pub fn str_at(rd: Reg, base: Reg, offset: i16) -> Inst {
        str(rd, MemoryOperand::offset(base, offset))
    }

    pub fn push(regs: impl IntoIterator<Item = Reg>) -> Inst {
        Inst::PushPop {
            op: OpCode::Push,
            regs: regs.into_iter().collect(),
            cond: ConditionCode::Always,
        }
    }

    pub fn pop(regs: impl IntoIterator<Item = Reg>) -> Inst {
        Inst::PushPop {
            op: OpCode::Pop,
            regs: regs.into_iter().collect(),
            cond: ConditionCode::Always,
        }
    }

    pub fn b(label: impl Into<String>) -> Inst {
        Inst::Br {
            op: OpCode::B,
            label: label.into(),
            cond: ConditionCode::Always,
        }
    }

    pub fn b_cond(label: impl Into<String>, cond: ConditionCode) -> Inst {
        Inst::Br {
            op: OpCode::B,
            label: label.into(),
            cond,
        }
    }

    pub fn bl(label: impl Into<String>) -> Inst {
        Inst::Br {
            op: OpCode::Bl,
            label: label.into(),
            cond: ConditionCode::Always,
        }
    }

    pub fn label(name: impl Into<String>) -> Inst {
        Inst::Label(name.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Mov,
    MovT,
    Mvn,
    Cmp,
    Cmn,
    Add,
    Sub,
    Rsb,
    And,
    Orr,
    Eor,
    Bic,
    Lsl,
    Lsr,
    Asr,
    Mul,
    SMMul,
    SDiv,
    /// Pseudo remainder. Must not survive `MathOptimization`.
    Mod,
    LdR,
    StR,
    LdM,
    StM,
    Push,
    Pop,
    B,
    Bl,
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OpCode::Mov => "mov",
            OpCode::MovT => "movt",
            OpCode::Mvn => "mvn",
            OpCode::Cmp => "cmp",
            OpCode::Cmn => "cmn",
            OpCode::Add => "add",
            OpCode::Sub => "sub",
            OpCode::Rsb => "rsb",
            OpCode::And => "and",
            OpCode::Orr => "orr",
            OpCode::Eor => "eor",
            OpCode::Bic => "bic",
            OpCode::Lsl => "lsl",
            OpCode::Lsr => "lsr",
            OpCode::Asr => "asr",
            OpCode::Mul => "mul",
            OpCode::SMMul => "smmul",
            OpCode::SDiv => "sdiv",
            OpCode::Mod => "_mod",
            OpCode::LdR => "ldr",
            OpCode::StR => "str",
            OpCode::LdM => "ldm",
            OpCode::StM => "stm",
            OpCode::Push => "push",
            OpCode::Pop => "pop",
            OpCode::B => "b",
            OpCode::Bl => "bl",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConditionCode {
    #[default]
    Always,
    Gt,
    Lt,
    Ge,
    Le,
    Equal,
    NotEqual,
}

impl ConditionCode {
    pub fn inverse(self) -> Self {
        match self {
            ConditionCode::Always => ConditionCode::Always,
            ConditionCode::Gt => ConditionCode::Le,
            ConditionCode::Lt => ConditionCode::Ge,
            ConditionCode::Ge => ConditionCode::Lt,
            ConditionCode::Le => ConditionCode::Gt,
            ConditionCode::Equal => ConditionCode::NotEqual,
            ConditionCode::NotEqual => ConditionCode::Equal,
        }
    }

    /// Condition with the comparison operands swapped (`a < b` ⇔ `b > a`).
    pub fn mirrored(self) -> Self {
        match self {
            ConditionCode::Gt => ConditionCode::Lt,
            ConditionCode::Lt => ConditionCode::Gt,
            ConditionCode::Ge => ConditionCode::Le,
            ConditionCode::Le => ConditionCode::Ge,
            cond => cond,
        }
    }
}

impl std::fmt::Display for ConditionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConditionCode::Always => "",
            ConditionCode::Gt => "gt",
            ConditionCode::Lt => "lt",
            ConditionCode::Ge => "ge",
            ConditionCode::Le => "le",
            ConditionCode::Equal => "eq",
            ConditionCode::NotEqual => "ne",
        })
    }
}

/// One ARM instruction of the emitted stream.
///
/// `Label` and `Pure` carry no machine semantics; they exist so a function
/// body can stay a single flat vector all the way to the outputter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inst {
    /// Two-operand form: `mov`/`movt`/`mvn` write `r1`, `cmp`/`cmn` read it.
    Arith2 {
        op: OpCode,
        r1: Reg,
        r2: Operand2,
        cond: ConditionCode,
    },
    Arith3 {
        op: OpCode,
        rd: Reg,
        r1: Reg,
        r2: Operand2,
        cond: ConditionCode,
    },
    LoadStore {
        op: OpCode,
        rd: Reg,
        mem: Mem,
        cond: ConditionCode,
    },
    MultLoadStore {
        op: OpCode,
        rn: Reg,
        regs: Vec<Reg>,
    },
    PushPop {
        op: OpCode,
        regs: BTreeSet<Reg>,
        cond: ConditionCode,
    },
    Br {
        op: OpCode,
        label: String,
        cond: ConditionCode,
    },
    Label(String),
    /// Verbatim line (directives, comments).
    Pure(String),
}

impl Inst {
    /// `true` if any operand is still a virtual register.
    pub fn has_virtual(&self) -> bool {
        let op2_virtual = |op2: &Operand2| op2.reg().is_some_and(|r| r.is_virtual());
        match self {
            Inst::Arith2 { r1, r2, .. } => r1.is_virtual() || op2_virtual(r2),
            Inst::Arith3 { rd, r1, r2, .. } => {
                rd.is_virtual() || r1.is_virtual() || op2_virtual(r2)
            }
            Inst::LoadStore { rd, mem, .. } => {
                rd.is_virtual()
                    || match mem {
                        Mem::Operand(m) => {
                            m.base.is_virtual()
                                || matches!(m.offset, crate::MemOffset::Reg(rop) if rop.reg.is_virtual())
                        }
                        Mem::Label(_) => false,
                    }
            }
            Inst::MultLoadStore { rn, regs, .. } => {
                rn.is_virtual() || regs.iter().any(Reg::is_virtual)
            }
            Inst::PushPop { regs, .. } => regs.iter().any(Reg::is_virtual),
            Inst::Br { .. } | Inst::Label(_) | Inst::Pure(_) => false,
        }
    }
}

impl std::fmt::Display for Inst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Inst::Arith2 { op, r1, r2, cond } => write!(f, "{op}{cond}\t{r1}, {r2}"),
            Inst::Arith3 {
                op,
                rd,
                r1,
                r2,
                cond,
            } => write!(f, "{op}{cond}\t{rd}, {r1}, {r2}"),
            Inst::LoadStore { op, rd, mem, cond } => write!(f, "{op}{cond}\t{rd}, {mem}"),
            Inst::MultLoadStore { op, rn, regs } => {
                write!(f, "{op}\t{rn}, {{")?;
                for (i, reg) in regs.iter().enumerate() {
                    if i != 0 {
                        f.write_str(", ")?;
                    }
                    reg.fmt(f)?;
                }
                f.write_str("}")
            }
            Inst::PushPop { op, regs, cond } => {
                write!(f, "{op}{cond}\t{{")?;
                for (i, reg) in regs.iter().enumerate() {
                    if i != 0 {
                        f.write_str(", ")?;
                    }
                    reg.fmt(f)?;
                }
                f.write_str("}")
            }
            Inst::Br { op, label, cond } => write!(f, "{op}{cond}\t{label}"),
            Inst::Label(name) => write!(f, "{name}:"),
            Inst::Pure(text) => f.write_str(text),
        }
    }
}
