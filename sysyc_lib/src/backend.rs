use crate::codegen::Codegen;
use crate::error::Result;
use arm_ir::{ArmCode, Reg};
use mir::{MirPackage, VarId};
use std::collections::{BTreeSet, HashMap};

/// Per-variable color decided by the graph-coloring pass. `-1` means the
/// variable is spilled to the stack.
pub type ColorMap = HashMap<VarId, i32>;

/// Data passed between passes, keyed per function name.
///
/// Every well-known entry is a named field, so a producer and its
/// consumers can't disagree about the payload type.
#[derive(Debug, Default)]
pub struct ExtraData {
    /// Emission order of basic blocks, produced by `BasicBlkRearrange`.
    pub block_ordering: HashMap<String, Vec<u32>>,
    /// Loop headers (targets of back-edges), produced by `BasicBlkRearrange`.
    pub cycle_starts: HashMap<String, BTreeSet<u32>>,
    /// MIR variable to ARM virtual register, produced by codegen.
    pub var_reg_map: HashMap<String, HashMap<VarId, Reg>>,
    /// Coloring decision, produced by `GraphColor`.
    pub graph_color: HashMap<String, ColorMap>,
}

/// A pass over the MIR package.
pub trait MirOptimizePass {
    fn pass_name(&self) -> &'static str;
    fn optimize_mir(&mut self, package: &mut MirPackage, extra: &mut ExtraData) -> Result<()>;
}

/// A pass over the lowered ARM code.
pub trait ArmOptimizePass {
    fn pass_name(&self) -> &'static str;
    fn optimize_arm(&mut self, code: &mut ArmCode, extra: &mut ExtraData) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub verbose: bool,
    pub show_code_after_each_pass: bool,
    /// If set, only passes named here run.
    pub run_pass: Option<BTreeSet<String>>,
    pub skip_pass: BTreeSet<String>,
}

impl Options {
    /// A pass runs iff the run set is empty or names it, and the skip set
    /// doesn't.
    pub fn should_run_pass(&self, pass_name: &str) -> bool {
        if let Some(run_pass) = &self.run_pass {
            if !run_pass.contains(pass_name) {
                return false;
            }
        }
        !self.skip_pass.contains(pass_name)
    }
}

/// The pipeline driver: runs the MIR passes, the MIR→ARM translation and
/// the ARM passes, in that order, owning all intermediate state.
pub struct Backend {
    package: MirPackage,
    options: Options,
    mir_passes: Vec<Box<dyn MirOptimizePass>>,
    arm_passes: Vec<Box<dyn ArmOptimizePass>>,
    extra_data: ExtraData,
    arm_code: Option<ArmCode>,
}

impl Backend {
    pub fn new(package: MirPackage, options: Options) -> Self {
        Self {
            package,
            options,
            mir_passes: Vec::new(),
            arm_passes: Vec::new(),
            extra_data: ExtraData::default(),
            arm_code: None,
        }
    }

    pub fn add_mir_pass(&mut self, pass: Box<dyn MirOptimizePass>) {
        self.mir_passes.push(pass);
    }

    pub fn add_arm_pass(&mut self, pass: Box<dyn ArmOptimizePass>) {
        self.arm_passes.push(pass);
    }

    fn do_mir_optimization(&mut self) -> Result<()> {
        for pass in &mut self.mir_passes {
            if !self.options.should_run_pass(pass.pass_name()) {
                log::info!("Skipping MIR pass: {}", pass.pass_name());
                continue;
            }
            log::info!("Running MIR pass: {}", pass.pass_name());
            pass.optimize_mir(&mut self.package, &mut self.extra_data)?;
            if self.options.show_code_after_each_pass {
                log::info!("Code after pass: {}", pass.pass_name());
                println!("{}", self.package);
            }
        }
        Ok(())
    }

    fn do_mir_to_arm_transform(&mut self) -> Result<()> {
        log::info!("Doing mir->arm transform");
        let mut code = ArmCode::default();
        for func in self.package.functions.values() {
            if func.ty.is_extern {
                continue;
            }
            let ordering = self
                .extra_data
                .block_ordering
                .get(&func.name)
                .map(|o| o.as_slice());
            let cg = Codegen::new(func, &self.package, ordering);
            let (arm_func, reg_map) = cg.translate_function()?;
            self.extra_data
                .var_reg_map
                .insert(func.name.clone(), reg_map);
            code.functions.push(arm_func);
        }
        for (name, value) in &self.package.global_values {
            code.consts.insert(name.clone(), convert_global(value));
        }
        if self.options.show_code_after_each_pass {
            log::info!("Code after transformation");
            println!("{code}");
        }
        self.arm_code = Some(code);
        Ok(())
    }

    fn do_arm_optimization(&mut self) -> Result<()> {
        let code = self
            .arm_code
            .as_mut()
            .expect("arm passes must run after the mir->arm transform");
        for pass in &mut self.arm_passes {
            if !self.options.should_run_pass(pass.pass_name()) {
                log::info!("Skipping ARM pass: {}", pass.pass_name());
                continue;
            }
            log::info!("Running ARM pass: {}", pass.pass_name());
            pass.optimize_arm(code, &mut self.extra_data)?;
            if self.options.show_code_after_each_pass {
                log::info!("Code after pass: {}", pass.pass_name());
                println!("{code}");
            }
        }
        Ok(())
    }

    pub fn generate_code(mut self) -> Result<ArmCode> {
        self.do_mir_optimization()?;
        self.do_mir_to_arm_transform()?;
        self.do_arm_optimization()?;
        Ok(self.arm_code.expect("transform ran"))
    }
}

fn convert_global(value: &mir::GlobalValue) -> arm_ir::GlobalData {
    match value {
        mir::GlobalValue::Word(x) => arm_ir::GlobalData::Word(*x),
        mir::GlobalValue::Words(xs) => match vec1::Vec1::try_from_vec(xs.clone()) {
            Ok(words) => arm_ir::GlobalData::Words(words),
            Err(_) => arm_ir::GlobalData::Space(0),
        },
        mir::GlobalValue::Zeroed(size) => arm_ir::GlobalData::Space(*size),
    }
}
