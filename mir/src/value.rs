use serde::{Deserialize, Serialize};

/// Identifier of a MIR variable. Unique within a function.
///
/// By convention id 0 is the function's self/return slot and ids 1..=n are
/// its n parameters.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct VarId(pub u32);

impl From<u32> for VarId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for VarId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Either an immediate or a variable reference.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Value {
    Imm(i32),
    Var(VarId),
}

impl Value {
    pub fn is_imm(&self) -> bool {
        matches!(self, Value::Imm(_))
    }

    pub fn as_imm(&self) -> Option<i32> {
        match self {
            Value::Imm(i) => Some(*i),
            Value::Var(_) => None,
        }
    }

    pub fn as_var(&self) -> Option<VarId> {
        match self {
            Value::Imm(_) => None,
            Value::Var(v) => Some(*v),
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Imm(value)
    }
}

impl From<VarId> for Value {
    fn from(value: VarId) -> Self {
        Self::Var(value)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Imm(i) => i.fmt(f),
            Value::Var(v) => v.fmt(f),
        }
    }
}
