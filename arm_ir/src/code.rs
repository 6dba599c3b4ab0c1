use crate::{ArmOutputConfig, ArmOutputter, GlobalData, Inst};
use std::collections::BTreeMap;

/// Prefix of labels that mark a PC-relative literal load. The register
/// allocator keys on this prefix to keep spill stores from splitting the
/// load off its marker.
pub const LD_PC_PREFIX: &str = "_$ld_pc";

pub fn bb_label(func: &str, id: u32) -> String {
    format!(".L{func}_bb{id}")
}

pub fn fn_end_label(func: &str) -> String {
    format!(".L{func}_end")
}

pub fn ld_pc_label(n: u32) -> String {
    format!("{LD_PC_PREFIX}_{n}")
}

/// A lowered function: a flat instruction stream plus its frame size and
/// local literal pool.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub inst: Vec<Inst>,
    pub consts: BTreeMap<String, GlobalData>,
    pub stack_size: u32,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inst: Vec::new(),
            consts: BTreeMap::new(),
            stack_size: 0,
        }
    }

    /// `true` if any instruction references the literal pool.
    pub fn uses_literal_pool(&self) -> bool {
        self.inst
            .iter()
            .any(|inst| matches!(inst, Inst::LoadStore { mem: crate::Mem::Label(_), .. }))
    }
}

impl std::fmt::Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        ArmOutputter::new(f)
            .with_config(ArmOutputConfig {
                allow_virtuals: true,
            })
            .write_function(self)
    }
}

/// The whole emitted program.
#[derive(Debug, Clone, Default)]
pub struct ArmCode {
    pub functions: Vec<Function>,
    pub consts: BTreeMap<String, GlobalData>,
}

impl std::fmt::Display for ArmCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        ArmOutputter::new(f)
            .with_config(ArmOutputConfig {
                allow_virtuals: true,
            })
            .write_code(self)
    }
}
