use crate::MirFunction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Constant initializer of a global.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GlobalValue {
    Word(i32),
    Words(Vec<i32>),
    /// Zero-initialized region of the given byte size.
    Zeroed(u32),
}

/// The whole program as handed over by the frontend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirPackage {
    pub functions: BTreeMap<String, MirFunction>,
    pub global_values: BTreeMap<String, GlobalValue>,
}

impl std::fmt::Display for MirPackage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (name, value) in &self.global_values {
            writeln!(f, "global @{name} = {value:?}")?;
        }
        for func in self.functions.values() {
            if func.ty.is_extern {
                continue;
            }
            func.fmt(f)?;
        }
        Ok(())
    }
}
