mod block_merge;
mod common_expr_del;
mod excess_reg_delete;
mod graph_color;
mod inline;
mod memvar_propagation;
mod remove_dead_code;

pub use block_merge::MergeBlock;
pub use common_expr_del::CommonExprDel;
pub use excess_reg_delete::ExcessRegDelete;
pub use graph_color::GraphColor;
pub use inline::InlineFunc;
pub use memvar_propagation::MemoryVarPropagation;
pub use remove_dead_code::RemoveDeadCode;
