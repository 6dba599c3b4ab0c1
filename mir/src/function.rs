use crate::{BasicBlk, FnTy, Ty, VarId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Descriptor of a MIR variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub ty: Ty,
    /// Address-taken variables live on the stack and are only accessed
    /// through `Ref`/`Load`/`Store`.
    pub is_memory_var: bool,
}

impl Variable {
    pub fn new(ty: Ty) -> Self {
        Self {
            ty,
            is_memory_var: false,
        }
    }

    pub fn memory(ty: Ty) -> Self {
        Self {
            ty,
            is_memory_var: true,
        }
    }

    pub fn size(&self) -> u32 {
        self.ty.size()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirFunction {
    pub name: String,
    pub ty: FnTy,
    pub variables: BTreeMap<VarId, Variable>,
    pub basic_blks: BTreeMap<u32, BasicBlk>,
}

impl MirFunction {
    pub fn new(name: impl Into<String>, ty: FnTy) -> Self {
        Self {
            name: name.into(),
            ty,
            variables: BTreeMap::new(),
            basic_blks: BTreeMap::new(),
        }
    }

    /// The entry block is the block with the lowest label.
    pub fn entry_block_id(&self) -> Option<u32> {
        self.basic_blks.keys().next().copied()
    }

    pub fn param_count(&self) -> usize {
        self.ty.params.len()
    }

    /// First id above every variable id currently in use.
    pub fn next_var_id(&self) -> u32 {
        self.variables.keys().map(|v| v.0 + 1).max().unwrap_or(1)
    }

    /// Recomputes each block's `preceding` set from the jump targets.
    pub fn rebuild_predecessors(&mut self) {
        let edges: Vec<(u32, u32)> = self
            .basic_blks
            .values()
            .flat_map(|blk| blk.jump.targets().map(move |t| (blk.id, t)))
            .collect();
        for blk in self.basic_blks.values_mut() {
            blk.preceding.clear();
        }
        for (from, to) in edges {
            if let Some(blk) = self.basic_blks.get_mut(&to) {
                blk.preceding.insert(from);
            }
        }
    }
}

impl std::fmt::Display for MirFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fn {}(", self.name)?;
        for (i, param) in self.ty.params.iter().enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            write!(f, "%{}: {param}", i + 1)?;
        }
        writeln!(f, ") -> {} {{", self.ty.ret)?;
        for blk in self.basic_blks.values() {
            blk.fmt(f)?;
        }
        writeln!(f, "}}")
    }
}
