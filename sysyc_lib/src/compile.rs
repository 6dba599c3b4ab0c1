use crate::backend::{Backend, Options};
use crate::codegen::{BasicBlkRearrange, InstructionSchedule, MathOptimization, RegAllocatePass};
use crate::error::{BackendError, Result};
use crate::optimization::{
    CommonExprDel, ExcessRegDelete, GraphColor, InlineFunc, MemoryVarPropagation, MergeBlock,
    RemoveDeadCode,
};
use arm_ir::{ArmOutputConfig, ArmOutputter};
use mir::MirPackage;
use std::collections::BTreeSet;

/// Number of callee-saved registers the coloring pass may hand out
/// (r4..r10).
const GRAPH_COLORS: usize = 7;

#[derive(Debug, Clone, Default)]
pub struct CompileOpts {
    pub verbose: bool,
    pub pass_diff: bool,
    pub run_pass: Option<BTreeSet<String>>,
    pub skip_pass: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct CompileOptsBuilder {
    opts: CompileOpts,
}

impl CompileOptsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.opts.verbose = verbose;
        self
    }

    pub fn pass_diff(mut self, pass_diff: bool) -> Self {
        self.opts.pass_diff = pass_diff;
        self
    }

    /// Restricts the pipeline to the named passes. An empty list means
    /// "run everything".
    pub fn run_pass(mut self, passes: impl IntoIterator<Item = String>) -> Self {
        let set: BTreeSet<String> = passes.into_iter().collect();
        self.opts.run_pass = (!set.is_empty()).then_some(set);
        self
    }

    pub fn skip_pass(mut self, passes: impl IntoIterator<Item = String>) -> Self {
        self.opts.skip_pass = passes.into_iter().collect();
        self
    }

    pub fn build(self) -> CompileOpts {
        self.opts
    }
}

/// Runs the whole backend over a package and renders the assembly.
pub fn compile(package: MirPackage, opts: &CompileOpts) -> Result<Vec<u8>> {
    let options = Options {
        verbose: opts.verbose,
        show_code_after_each_pass: opts.pass_diff,
        run_pass: opts.run_pass.clone(),
        skip_pass: opts.skip_pass.clone(),
    };
    let mut backend = Backend::new(package, options);
    backend.add_mir_pass(Box::new(RemoveDeadCode));
    backend.add_mir_pass(Box::new(InlineFunc));
    backend.add_mir_pass(Box::new(MergeBlock));
    backend.add_mir_pass(Box::new(MemoryVarPropagation));
    backend.add_mir_pass(Box::new(CommonExprDel));
    backend.add_mir_pass(Box::new(BasicBlkRearrange));
    backend.add_mir_pass(Box::new(GraphColor::new(GRAPH_COLORS)));
    backend.add_arm_pass(Box::new(MathOptimization));
    backend.add_arm_pass(Box::new(RegAllocatePass));
    backend.add_arm_pass(Box::new(ExcessRegDelete));
    backend.add_arm_pass(Box::new(InstructionSchedule));

    let code = backend.generate_code()?;

    let mut out = String::new();
    ArmOutputter::new(&mut out)
        .with_config(ArmOutputConfig {
            allow_virtuals: false,
        })
        .write_code(&code)
        .map_err(|_| BackendError::Unreachable("assembly rendering failed"))?;
    Ok(out.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    /// int s(int n) { int i = 0, s = 0; while (i < n) { s += i; i += 1; } return s; }
    fn loop_function() -> MirPackage {
        let func = function(
            "s",
            1,
            vec![
                block(
                    0,
                    vec![
                        Inst::Assign {
                            dest: VarId(2),
                            src: Value::Imm(0),
                        },
                        Inst::Assign {
                            dest: VarId(3),
                            src: Value::Imm(0),
                        },
                    ],
                    Jump::Br(1),
                ),
                block(
                    1,
                    vec![
                        Inst::Phi {
                            dest: VarId(4),
                            vars: vec![VarId(2), VarId(6)],
                        },
                        Inst::Phi {
                            dest: VarId(5),
                            vars: vec![VarId(3), VarId(7)],
                        },
                        Inst::Op {
                            dest: VarId(8),
                            op: Op::Lt,
                            lhs: Value::Var(VarId(4)),
                            rhs: Value::Var(VarId(1)),
                        },
                    ],
                    Jump::BrCond(VarId(8), 2, 3),
                ),
                block(
                    2,
                    vec![
                        Inst::Op {
                            dest: VarId(7),
                            op: Op::Add,
                            lhs: Value::Var(VarId(5)),
                            rhs: Value::Var(VarId(4)),
                        },
                        Inst::Op {
                            dest: VarId(6),
                            op: Op::Add,
                            lhs: Value::Var(VarId(4)),
                            rhs: Value::Imm(1),
                        },
                    ],
                    Jump::Br(1),
                ),
                block(3, vec![], Jump::Return(Some(VarId(5)))),
            ],
        );
        package_of(func)
    }

    #[test]
    fn compiles_a_loop_to_assembly_without_virtual_registers() {
        let out = compile(loop_function(), &CompileOpts::default()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\t.global\ts\n"));
        assert!(text.contains("s:\n"));
        assert!(text.contains(".Ls_bb1:"));
        assert!(text.contains("push"));
        assert!(text.contains("pop"));
        // The outputter panics on surviving virtual registers, so reaching
        // this point already proves the allocation finished the job.
        assert!(!text.contains('@'));
    }

    #[test]
    fn skip_set_disables_a_pass() {
        let opts = CompileOptsBuilder::new()
            .skip_pass(["InstructionSchedule".to_string()])
            .build();
        let out = compile(loop_function(), &opts).unwrap();
        assert!(!out.is_empty());
    }

    #[test]
    fn run_set_restricts_to_named_passes() {
        // Only the passes codegen depends on; everything else is gated off.
        let opts = CompileOptsBuilder::new()
            .run_pass([
                "BasicBlkRearrange".to_string(),
                "GraphColor".to_string(),
                "MathOptimization".to_string(),
                "RegAllocatePass".to_string(),
            ])
            .build();
        let out = compile(loop_function(), &opts).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains('@'));
    }
}
