use crate::{Inst, VarId};
use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Conventional label of the common exit block. When present it
/// post-dominates every return.
pub const COMMON_EXIT: u32 = 1048576;

/// Block terminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Jump {
    Br(u32),
    BrCond(VarId, u32, u32),
    Return(Option<VarId>),
    Unreachable,
    /// Invalid terminator. Encountering one during lowering is fatal.
    Undefined,
}

impl Jump {
    pub fn targets(&self) -> impl Iterator<Item = u32> {
        let mut arr = ArrayVec::<u32, 2>::new();
        match self {
            Jump::Br(target) => arr.push(*target),
            Jump::BrCond(_, bb_true, bb_false) => {
                arr.push(*bb_true);
                arr.push(*bb_false);
            }
            Jump::Return(_) | Jump::Unreachable | Jump::Undefined => {}
        }
        arr.into_iter()
    }

    pub fn replace_target(&mut self, from: u32, to: u32) {
        match self {
            Jump::Br(target) => {
                if *target == from {
                    *target = to;
                }
            }
            Jump::BrCond(_, bb_true, bb_false) => {
                if *bb_true == from {
                    *bb_true = to;
                }
                if *bb_false == from {
                    *bb_false = to;
                }
            }
            Jump::Return(_) | Jump::Unreachable | Jump::Undefined => {}
        }
    }
}

impl std::fmt::Display for Jump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Jump::Br(target) => write!(f, "br bb{target}"),
            Jump::BrCond(cond, bb_true, bb_false) => {
                write!(f, "br {cond}, bb{bb_true}, bb{bb_false}")
            }
            Jump::Return(Some(var)) => write!(f, "ret {var}"),
            Jump::Return(None) => f.write_str("ret"),
            Jump::Unreachable => f.write_str("unreachable"),
            Jump::Undefined => f.write_str("undefined"),
        }
    }
}

/// A basic block: straight-line instructions ended by a single [`Jump`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicBlk {
    pub id: u32,
    pub inst: Vec<Inst>,
    pub jump: Jump,
    /// Labels of the predecessor blocks.
    pub preceding: BTreeSet<u32>,
}

impl BasicBlk {
    pub fn new(id: u32, jump: Jump) -> Self {
        Self {
            id,
            inst: Vec::new(),
            jump,
            preceding: BTreeSet::new(),
        }
    }
}

impl std::fmt::Display for BasicBlk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "bb{}:", self.id)?;
        for inst in &self.inst {
            writeln!(f, "  {inst}")?;
        }
        writeln!(f, "  {}", self.jump)
    }
}
