pub mod backend;
pub mod codegen;
pub mod compile;
pub mod error;
pub mod optimization;

#[cfg(test)]
pub(crate) mod test_util;

pub use backend::{ArmOptimizePass, Backend, ColorMap, ExtraData, MirOptimizePass, Options};
pub use error::{BackendError, Result};
