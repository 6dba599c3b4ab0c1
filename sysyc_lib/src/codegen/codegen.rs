use crate::error::{BackendError, Result};
use arm_ir::{
    bb_label, fn_end_label, instr, ld_pc_label, ConditionCode, Function, GlobalData, Inst, Mem,
    OpCode, Operand2, Reg,
};
use mir::{BasicBlk, Inst as MirInst, Jump, MirFunction, MirPackage, Op, RefTarget, Value, VarId};
use std::collections::{BTreeMap, HashMap};

/// Per-function instruction selector. Lowers three-address MIR into a flat
/// ARM instruction stream over an unbounded pool of virtual registers.
///
/// The emitted stream still contains virtual registers and the `Mod`
/// pseudo-op; `MathOptimization` and `RegAllocatePass` finish the job.
pub struct Codegen<'a> {
    func: &'a MirFunction,
    package: &'a MirPackage,
    /// Block emission order decided by `BasicBlkRearrange`, when it ran.
    ordering: Option<&'a [u32]>,
    inst: Vec<Inst>,
    /// MIR variable → ARM register. Parameters 1..=4 and the self/return
    /// slot map to physical r0..r3; everything else gets virtual registers.
    reg_map: HashMap<VarId, Reg>,
    /// Union-find style redirects produced by phi collapsing.
    var_collapse: HashMap<VarId, VarId>,
    /// Stack offsets of address-taken variables.
    stack_space_allocation: HashMap<VarId, u32>,
    consts: BTreeMap<String, GlobalData>,
    stack_size: u32,
    vreg_counter: u32,
    ld_pc_counter: u32,
    param_count: usize,
}

impl<'a> Codegen<'a> {
    pub fn new(func: &'a MirFunction, package: &'a MirPackage, ordering: Option<&'a [u32]>) -> Self {
        Self {
            func,
            package,
            ordering,
            inst: Vec::new(),
            reg_map: HashMap::new(),
            var_collapse: HashMap::new(),
            stack_space_allocation: HashMap::new(),
            consts: BTreeMap::new(),
            stack_size: 0,
            vreg_counter: 0,
            ld_pc_counter: 0,
            param_count: func.param_count(),
        }
    }

    pub fn translate_function(mut self) -> Result<(Function, HashMap<VarId, Reg>)> {
        self.init_reg_map();
        self.scan_stack();
        self.scan();
        self.generate_startup();

        let func = self.func;
        let blocks: Vec<&BasicBlk> = match self.ordering {
            Some(ordering) => ordering
                .iter()
                .filter_map(|id| func.basic_blks.get(id))
                .collect(),
            None => func.basic_blks.values().collect(),
        };
        for blk in blocks {
            self.translate_basic_block(blk)?;
        }

        self.generate_return_and_cleanup();

        let function = Function {
            name: self.func.name.clone(),
            inst: self.inst,
            consts: self.consts,
            stack_size: self.stack_size,
        };
        Ok((function, self.reg_map))
    }

    fn init_reg_map(&mut self) {
        self.reg_map.insert(VarId(0), Reg::R0);
        for i in 0..self.param_count.min(4) {
            self.reg_map.insert(VarId(i as u32 + 1), Reg::R(i as u8));
        }
    }

    fn scan_stack(&mut self) {
        let func = self.func;
        for (&id, var) in &func.variables {
            if var.is_memory_var {
                self.stack_space_allocation.insert(id, self.stack_size);
                self.stack_size += var.size();
            }
        }
    }

    /// Pre-pass over all phis: collapse the destination and every operand
    /// onto the smallest id of the set.
    fn scan(&mut self) {
        let func = self.func;
        for blk in func.basic_blks.values() {
            for inst in &blk.inst {
                if let MirInst::Phi { dest, vars } = inst {
                    self.deal_phi(*dest, vars);
                }
            }
        }
    }

    fn deal_phi(&mut self, dest: VarId, vars: &[VarId]) {
        let mut min = dest;
        let mut members = vec![dest];
        for &var in vars {
            let collapsed = self.get_collapsed_var(var);
            if collapsed < min {
                min = collapsed;
            }
            members.push(collapsed);
        }
        for member in members {
            self.var_collapse.insert(member, min);
        }
    }

    /// Chases the collapse chain to its fixed point. A cycle in the map
    /// means an earlier phi already converged on this id; the guard turns
    /// that into a fixed point instead of an endless walk.
    fn get_collapsed_var(&self, var: VarId) -> VarId {
        let mut cur = var;
        for _ in 0..=self.var_collapse.len() {
            match self.var_collapse.get(&cur) {
                Some(&next) if next != cur => cur = next,
                _ => break,
            }
        }
        cur
    }

    fn generate_startup(&mut self) {
        self.inst.push(instr::push([Reg::FP, Reg::LR]));
        self.inst.push(instr::mov(Reg::FP, Reg::SP));
        // Stack growth is patched in by the register allocator once the
        // final frame size is known.
    }

    fn generate_return_and_cleanup(&mut self) {
        self.inst.push(instr::label(fn_end_label(&self.func.name)));
        self.inst.push(instr::mov(Reg::SP, Reg::FP));
        // The final pop sets pc and returns the function.
        self.inst.push(instr::pop([Reg::FP, Reg::PC]));
    }

    fn translate_basic_block(&mut self, blk: &BasicBlk) -> Result<()> {
        self.inst
            .push(instr::label(bb_label(&self.func.name, blk.id)));
        for inst in &blk.inst {
            self.translate_inst(inst)?;
        }
        self.translate_branch(blk)
    }

    fn translate_inst(&mut self, inst: &MirInst) -> Result<()> {
        match inst {
            MirInst::Assign { dest, src } => {
                match src {
                    Value::Imm(imm) => {
                        let rd = self.translate_var_reg(*dest);
                        self.emit_load_imm(rd, *imm as u32);
                    }
                    Value::Var(_) => {
                        let src = self.translate_value_to_operand2(src);
                        let rd = self.translate_var_reg(*dest);
                        self.inst.push(instr::mov(rd, src));
                    }
                }
                Ok(())
            }
            MirInst::Op { dest, op, lhs, rhs } => self.translate_op(*dest, *op, lhs, rhs),
            MirInst::Call { dest, func, args } => self.translate_call(*dest, func, args),
            MirInst::Load { dest, src } => {
                let base = self.translate_value_to_reg(src);
                let rd = self.translate_var_reg(*dest);
                self.inst.push(instr::ldr_at(rd, base, 0));
                Ok(())
            }
            MirInst::Store { dest, val } => {
                let value = self.translate_value_to_reg(val);
                let base = self.translate_value_to_reg(dest);
                self.inst.push(instr::str_at(value, base, 0));
                Ok(())
            }
            MirInst::Ref { dest, target } => self.translate_ref(*dest, target),
            MirInst::PtrOffset { dest, ptr, offset } => {
                let base = self.translate_var_reg(*ptr);
                let offset = self.translate_value_to_operand2(offset);
                let rd = self.translate_var_reg(*dest);
                self.inst.push(instr::add(rd, base, offset));
                Ok(())
            }
            // Collapsed away during `scan`.
            MirInst::Phi { .. } => Ok(()),
        }
    }

    fn translate_op(&mut self, dest: VarId, op: Op, lhs: &Value, rhs: &Value) -> Result<()> {
        match op {
            Op::Add => self.emit_commutative(OpCode::Add, dest, lhs, rhs),
            Op::And => self.emit_commutative(OpCode::And, dest, lhs, rhs),
            Op::Or => self.emit_commutative(OpCode::Orr, dest, lhs, rhs),
            Op::Sub => {
                // An immediate on the left reverses the subtraction.
                if lhs.is_imm() && !rhs.is_imm() {
                    let r1 = self.translate_value_to_reg(rhs);
                    let imm = self.translate_value_to_operand2(lhs);
                    let rd = self.translate_var_reg(dest);
                    self.inst.push(instr::rsb(rd, r1, imm));
                } else {
                    let r1 = self.translate_value_to_reg(lhs);
                    let r2 = self.translate_value_to_operand2(rhs);
                    let rd = self.translate_var_reg(dest);
                    self.inst.push(instr::sub(rd, r1, r2));
                }
                Ok(())
            }
            Op::Mul => {
                // No immediate form exists for mul; force both registers.
                let r1 = self.translate_value_to_reg(lhs);
                let r2 = self.translate_value_to_reg(rhs);
                let rd = self.translate_var_reg(dest);
                self.inst.push(instr::mul(rd, r1, r2));
                Ok(())
            }
            Op::Div => {
                let r1 = self.translate_value_to_reg(lhs);
                let r2 = self.translate_value_to_reg(rhs);
                let rd = self.translate_var_reg(dest);
                self.inst.push(instr::sdiv(rd, r1, r2));
                Ok(())
            }
            Op::Rem => {
                // Pseudo-instruction; MathOptimization expands it.
                let r1 = self.translate_value_to_reg(lhs);
                let r2 = self.translate_value_to_reg(rhs);
                let rd = self.translate_var_reg(dest);
                self.inst.push(instr::arith3(OpCode::Mod, rd, r1, r2));
                Ok(())
            }
            Op::Gt => self.emit_compare(dest, lhs, rhs, ConditionCode::Gt),
            Op::Lt => self.emit_compare(dest, lhs, rhs, ConditionCode::Lt),
            Op::Gte => self.emit_compare(dest, lhs, rhs, ConditionCode::Ge),
            Op::Lte => self.emit_compare(dest, lhs, rhs, ConditionCode::Le),
            Op::Eq => self.emit_compare(dest, lhs, rhs, ConditionCode::Equal),
            Op::Neq => self.emit_compare(dest, lhs, rhs, ConditionCode::NotEqual),
        }
    }

    fn emit_commutative(&mut self, op: OpCode, dest: VarId, lhs: &Value, rhs: &Value) -> Result<()> {
        let (lhs, rhs) = if lhs.is_imm() && !rhs.is_imm() {
            (rhs, lhs)
        } else {
            (lhs, rhs)
        };
        let r1 = self.translate_value_to_reg(lhs);
        let r2 = self.translate_value_to_operand2(rhs);
        let rd = self.translate_var_reg(dest);
        self.inst.push(instr::arith3(op, rd, r1, r2));
        Ok(())
    }

    /// `cmp`/`cmn` followed by the 0/1 materialization pair. The branch
    /// lowering may erase the pair again and fuse the condition into a
    /// conditional branch.
    fn emit_compare(
        &mut self,
        dest: VarId,
        lhs: &Value,
        rhs: &Value,
        cond: ConditionCode,
    ) -> Result<()> {
        // An immediate on the left swaps the operands and mirrors the
        // condition.
        let (lhs, rhs, cond) = if lhs.is_imm() && !rhs.is_imm() {
            (rhs, lhs, cond.mirrored())
        } else {
            (lhs, rhs, cond)
        };

        let r1 = self.translate_value_to_reg(lhs);
        match rhs.as_imm() {
            Some(imm)
                if !Operand2::encodable(imm as u32)
                    && Operand2::encodable(imm.wrapping_neg() as u32) =>
            {
                self.inst
                    .push(instr::cmn(r1, imm.wrapping_neg() as u32));
            }
            _ => {
                let r2 = self.translate_value_to_operand2(rhs);
                self.inst.push(instr::cmp(r1, r2));
            }
        }

        let rd = self.translate_var_reg(dest);
        self.inst.push(instr::mov(rd, 0u32));
        self.inst.push(instr::mov_cond(rd, 1u32, cond));
        Ok(())
    }

    fn translate_call(&mut self, dest: VarId, callee: &str, args: &[Value]) -> Result<()> {
        let func = self
            .package
            .functions
            .get(callee)
            .ok_or_else(|| BackendError::UnknownFunction(callee.to_string()))?;

        let mut param_count = func.ty.params.len();
        if func.ty.is_variadic() {
            // Variadic tails are sized from the call site.
            param_count = args.len();
        }
        let stack_count = param_count.saturating_sub(4) as u32;

        if stack_count > 0 {
            self.inst.push(instr::sub(Reg::SP, Reg::SP, stack_count));
        }
        for (idx, arg) in args.iter().enumerate() {
            if idx < 4 {
                let value = self.translate_value_to_operand2(arg);
                self.inst.push(instr::mov(Reg::R(idx as u8), value));
            } else {
                let value = self.translate_value_to_reg(arg);
                self.inst
                    .push(instr::str_at(value, Reg::SP, -((idx as i16 - 3) * 4)));
            }
        }
        self.inst.push(instr::bl(func.name.clone()));
        if stack_count > 0 {
            self.inst.push(instr::add(Reg::SP, Reg::SP, stack_count));
        }

        if !func.ty.ret.is_void() {
            let rd = self.translate_var_reg(dest);
            self.inst.push(instr::mov(rd, Reg::R0));
        }
        Ok(())
    }

    fn translate_ref(&mut self, dest: VarId, target: &RefTarget) -> Result<()> {
        match target {
            RefTarget::Var(var) => {
                let var = self.get_collapsed_var(*var);
                let Some(&offset) = self.stack_space_allocation.get(&var) else {
                    return Err(BackendError::Unreachable(
                        "ref of a variable that is not on the stack",
                    ));
                };
                let size = self
                    .func
                    .variables
                    .get(&var)
                    .map(|v| v.size())
                    .unwrap_or(4);
                let total = self.imm_operand2(offset + size);
                let rd = self.translate_var_reg(dest);
                self.inst.push(instr::sub(rd, Reg::FP, total));
                Ok(())
            }
            RefTarget::Global(name) => {
                if !self.package.global_values.contains_key(name) {
                    return Err(BackendError::Unreachable("ref of unknown global"));
                }
                let rd = self.translate_var_reg(dest);
                self.inst.push(instr::ldr(rd, Mem::Label(name.clone())));
                // Marker for the register allocator's store sequencing.
                self.inst.push(instr::label(ld_pc_label(self.ld_pc_counter)));
                self.ld_pc_counter += 1;
                Ok(())
            }
        }
    }

    fn translate_branch(&mut self, blk: &BasicBlk) -> Result<()> {
        let func_name = self.func.name.clone();
        match &blk.jump {
            Jump::Br(target) => {
                self.inst.push(instr::b(bb_label(&func_name, *target)));
                Ok(())
            }
            Jump::BrCond(cond, bb_true, bb_false) => {
                let collapsed = self.get_collapsed_var(*cond);
                let fused = self
                    .reg_map
                    .get(&collapsed)
                    .copied()
                    .and_then(|cond_reg| self.find_compare_pair(cond_reg));
                match fused {
                    Some(cond_code) => {
                        // Erase the 0/1 materialization and branch on the
                        // condition flags directly.
                        self.inst.truncate(self.inst.len() - 2);
                        self.inst
                            .push(instr::b_cond(bb_label(&func_name, *bb_true), cond_code));
                        self.inst.push(instr::b(bb_label(&func_name, *bb_false)));
                    }
                    None => {
                        let reg = self.translate_var_reg(*cond);
                        self.inst.push(instr::cmp(reg, 0u32));
                        self.inst.push(instr::b_cond(
                            bb_label(&func_name, *bb_true),
                            ConditionCode::NotEqual,
                        ));
                        self.inst.push(instr::b(bb_label(&func_name, *bb_false)));
                    }
                }
                Ok(())
            }
            Jump::Return(value) => {
                if let Some(var) = value {
                    let reg = self.translate_var_reg(*var);
                    self.inst.push(instr::mov(Reg::R0, reg));
                }
                self.inst.push(instr::b(fn_end_label(&func_name)));
                Ok(())
            }
            Jump::Undefined => Err(BackendError::UndefinedTerminator {
                function: func_name,
                block: blk.id,
            }),
            // Discarded; nothing can reach it.
            Jump::Unreachable => Ok(()),
        }
    }

    /// Looks for the `mov rd, #0` / `mov<cond> rd, #1` pair a comparison
    /// leaves at the end of the stream.
    fn find_compare_pair(&self, cond_reg: Reg) -> Option<ConditionCode> {
        let n = self.inst.len();
        if n < 2 {
            return None;
        }
        match (&self.inst[n - 2], &self.inst[n - 1]) {
            (
                Inst::Arith2 {
                    op: OpCode::Mov,
                    r1: zero_rd,
                    r2: Operand2::Imm(0),
                    cond: ConditionCode::Always,
                },
                Inst::Arith2 {
                    op: OpCode::Mov,
                    r1: one_rd,
                    r2: Operand2::Imm(1),
                    cond,
                },
            ) if zero_rd == one_rd && *zero_rd == cond_reg && *cond != ConditionCode::Always => {
                Some(*cond)
            }
            _ => None,
        }
    }

    fn translate_var_reg(&mut self, var: VarId) -> Reg {
        self.get_or_alloc_vgp(var)
    }

    fn get_or_alloc_vgp(&mut self, var: VarId) -> Reg {
        let var = self.get_collapsed_var(var);
        // Parameters 5 and up live in the caller's frame; reload before use.
        if var.0 > 4 && var.0 <= self.param_count as u32 {
            let reg = self.alloc_vgp();
            self.inst
                .push(instr::ldr_at(reg, Reg::FP, -(((var.0 - 4) * 4) as i16)));
            return reg;
        }
        // Variables spilled to the stack during selection.
        if let Some(&offset) = self.stack_space_allocation.get(&var) {
            let reg = self.alloc_vgp();
            self.inst
                .push(instr::ldr_at(reg, Reg::SP, -(offset as i16)));
            return reg;
        }
        match self.reg_map.get(&var) {
            Some(&reg) => reg,
            None => {
                let reg = self.alloc_vgp();
                self.reg_map.insert(var, reg);
                reg
            }
        }
    }

    fn alloc_vgp(&mut self) -> Reg {
        let reg = Reg::Virtual(self.vreg_counter);
        self.vreg_counter += 1;
        reg
    }

    fn translate_value_to_operand2(&mut self, value: &Value) -> Operand2 {
        match value {
            Value::Imm(imm) => self.imm_operand2(*imm as u32),
            Value::Var(var) => self.get_or_alloc_vgp(*var).into(),
        }
    }

    fn translate_value_to_reg(&mut self, value: &Value) -> Reg {
        match value {
            Value::Imm(imm) => {
                let reg = self.alloc_vgp();
                self.emit_load_imm(reg, *imm as u32);
                reg
            }
            Value::Var(var) => self.get_or_alloc_vgp(*var),
        }
    }

    /// Immediates that pass the Operand2 test fold in place; everything
    /// else is materialized into a fresh virtual register.
    fn imm_operand2(&mut self, value: u32) -> Operand2 {
        if Operand2::encodable(value) {
            Operand2::Imm(value)
        } else {
            let reg = self.alloc_vgp();
            self.emit_load_imm(reg, value);
            reg.into()
        }
    }

    fn emit_load_imm(&mut self, rd: Reg, value: u32) {
        if Operand2::encodable(value) {
            self.inst.push(instr::mov(rd, value));
            return;
        }
        self.inst.push(instr::mov(rd, value & 0xffff));
        if value > 0xffff {
            self.inst.push(instr::movt(rd, value >> 16));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use mir::{GlobalValue, Inst, Ty, Variable};

    fn lower(func: MirFunction) -> Function {
        let mut package = MirPackage::default();
        let name = func.name.clone();
        package.functions.insert(name.clone(), func);
        lower_in(package, &name)
    }

    fn lower_in(package: MirPackage, name: &str) -> Function {
        let func = &package.functions[name];
        let (arm, _) = Codegen::new(func, &package, None)
            .translate_function()
            .unwrap();
        arm
    }

    fn text(f: &Function) -> Vec<String> {
        f.inst.iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn identity_function_returns_r0_unchanged() {
        let func = function("id", 1, vec![block(0, vec![], Jump::Return(Some(VarId(1))))]);
        let arm = lower(func);
        assert_eq!(
            text(&arm),
            vec![
                "push\t{fp, lr}",
                "mov\tfp, sp",
                ".Lid_bb0:",
                "mov\tr0, r0",
                "b\t.Lid_end",
                ".Lid_end:",
                "mov\tsp, fp",
                "pop\t{fp, pc}",
            ]
        );
        assert_eq!(arm.stack_size, 0);
    }

    #[test]
    fn large_constant_materializes_with_mov_movt() {
        let func = function(
            "c",
            0,
            vec![block(
                0,
                vec![Inst::Assign {
                    dest: VarId(1),
                    src: Value::Imm(65537),
                }],
                Jump::Return(Some(VarId(1))),
            )],
        );
        let arm = lower(func);
        assert_eq!(
            text(&arm)[2..5],
            [
                ".Lc_bb0:".to_string(),
                "mov\t@0, #1".to_string(),
                "movt\t@0, #1".to_string(),
            ]
        );
    }

    #[test]
    fn brcond_fuses_comparison_into_conditional_branch() {
        // if (a < b) return a; else return b;
        let func = function(
            "m",
            2,
            vec![
                block(
                    0,
                    vec![Inst::Op {
                        dest: VarId(3),
                        op: Op::Lt,
                        lhs: Value::Var(VarId(1)),
                        rhs: Value::Var(VarId(2)),
                    }],
                    Jump::BrCond(VarId(3), 1, 2),
                ),
                block(1, vec![], Jump::Return(Some(VarId(1)))),
                block(2, vec![], Jump::Return(Some(VarId(2)))),
            ],
        );
        let arm = lower(func);
        let lines = text(&arm);
        assert!(lines.contains(&"cmp\tr0, r1".to_string()));
        assert!(lines.contains(&"blt\t.Lm_bb1".to_string()));
        assert!(lines.contains(&"b\t.Lm_bb2".to_string()));
        // The 0/1 materialization must be gone.
        assert!(!lines.iter().any(|l| l.starts_with("movlt")));
        assert!(!lines.iter().any(|l| l.contains(", #0") && l.starts_with("mov\t")));
    }

    #[test]
    fn memory_var_reserves_stack_and_addresses_through_fp() {
        // int a[4]; a[2] = 7; return a[2];
        let mut func = function(
            "f",
            0,
            vec![block(
                0,
                vec![
                    Inst::Ref {
                        dest: VarId(2),
                        target: RefTarget::Var(VarId(1)),
                    },
                    Inst::PtrOffset {
                        dest: VarId(3),
                        ptr: VarId(2),
                        offset: Value::Imm(8),
                    },
                    Inst::Store {
                        dest: Value::Var(VarId(3)),
                        val: Value::Imm(7),
                    },
                    Inst::Load {
                        dest: VarId(4),
                        src: Value::Var(VarId(3)),
                    },
                ],
                Jump::Return(Some(VarId(4))),
            )],
        );
        func.variables
            .insert(VarId(1), Variable::memory(Ty::array_of(Ty::Int, 4)));
        let arm = lower(func);
        assert_eq!(arm.stack_size, 16);
        let lines = text(&arm);
        assert!(lines.contains(&"sub\t@0, fp, #16".to_string()));
        assert!(lines.contains(&"add\t@1, @0, #8".to_string()));
    }

    #[test]
    fn six_argument_call_spills_to_the_stack() {
        let mut package = MirPackage::default();
        package.functions.insert(
            "f".to_string(),
            function("f", 6, vec![block(0, vec![], Jump::Return(None))]),
        );
        let caller = function(
            "g",
            0,
            vec![block(
                0,
                vec![Inst::Call {
                    dest: VarId(1),
                    func: "f".to_string(),
                    args: (1..=6).map(Value::Imm).collect(),
                }],
                Jump::Return(None),
            )],
        );
        package.functions.insert("g".to_string(), caller);
        let arm = lower_in(package, "g");
        let lines = text(&arm);
        assert!(lines.contains(&"sub\tsp, sp, #2".to_string()));
        for (reg, val) in ["r0", "r1", "r2", "r3"].iter().zip(1..=4) {
            assert!(lines.contains(&format!("mov\t{reg}, #{val}")));
        }
        assert!(lines.contains(&"str\t@0, [sp, #-4]".to_string()));
        assert!(lines.contains(&"str\t@1, [sp, #-8]".to_string()));
        let bl = lines.iter().position(|l| l == "bl\tf").unwrap();
        assert_eq!(lines[bl + 1], "add\tsp, sp, #2");
    }

    #[test]
    fn phi_collapses_to_the_minimum_id() {
        // Loop-shaped phi: %2 and %4 collapse with %2 as representative.
        let func = function(
            "p",
            0,
            vec![
                block(
                    0,
                    vec![Inst::Assign {
                        dest: VarId(2),
                        src: Value::Imm(0),
                    }],
                    Jump::Br(1),
                ),
                block(
                    1,
                    vec![
                        Inst::Phi {
                            dest: VarId(3),
                            vars: vec![VarId(2), VarId(4)],
                        },
                        Inst::Op {
                            dest: VarId(4),
                            op: Op::Add,
                            lhs: Value::Var(VarId(3)),
                            rhs: Value::Imm(1),
                        },
                    ],
                    Jump::Br(1),
                ),
            ],
        );
        let mut package = MirPackage::default();
        package.functions.insert("p".to_string(), func);
        let func = &package.functions["p"];
        let (arm, reg_map) = Codegen::new(func, &package, None)
            .translate_function()
            .unwrap();
        // All three variables share one register.
        let r2 = reg_map.get(&VarId(2));
        assert!(r2.is_some());
        assert_eq!(reg_map.get(&VarId(3)), None);
        assert_eq!(reg_map.get(&VarId(4)), None);
        let lines = text(&arm);
        // add collapses onto the same register: add @n, @n, #1
        assert!(lines
            .iter()
            .any(|l| l == &format!("add\t{r}, {r}, #1", r = r2.unwrap())));
    }

    #[test]
    fn global_ref_loads_from_literal_pool_with_marker() {
        let mut package = MirPackage::default();
        package
            .global_values
            .insert("tbl".to_string(), GlobalValue::Zeroed(16));
        let func = function(
            "f",
            0,
            vec![block(
                0,
                vec![Inst::Ref {
                    dest: VarId(1),
                    target: RefTarget::Global("tbl".to_string()),
                }],
                Jump::Return(None),
            )],
        );
        package.functions.insert("f".to_string(), func);
        let arm = lower_in(package, "f");
        let lines = text(&arm);
        let ldr = lines.iter().position(|l| l == "ldr\t@0, =tbl").unwrap();
        assert_eq!(lines[ldr + 1], "_$ld_pc_0:");
    }

    #[test]
    fn undefined_terminator_is_fatal() {
        let func = function("f", 0, vec![block(0, vec![], Jump::Undefined)]);
        let mut package = MirPackage::default();
        package.functions.insert("f".to_string(), func);
        let func = &package.functions["f"];
        let err = Codegen::new(func, &package, None)
            .translate_function()
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::UndefinedTerminator {
                function: "f".to_string(),
                block: 0
            }
        );
    }

    #[test]
    fn unknown_callee_is_fatal() {
        let func = function(
            "f",
            0,
            vec![block(
                0,
                vec![Inst::Call {
                    dest: VarId(1),
                    func: "missing".to_string(),
                    args: vec![],
                }],
                Jump::Return(None),
            )],
        );
        let mut package = MirPackage::default();
        package.functions.insert("f".to_string(), func);
        let func = &package.functions["f"];
        let err = Codegen::new(func, &package, None)
            .translate_function()
            .unwrap_err();
        assert_eq!(err, BackendError::UnknownFunction("missing".to_string()));
    }

    #[test]
    fn no_mir_variable_survives_lowering() {
        let func = function(
            "f",
            2,
            vec![block(
                0,
                vec![Inst::Op {
                    dest: VarId(3),
                    op: Op::Add,
                    lhs: Value::Var(VarId(1)),
                    rhs: Value::Var(VarId(2)),
                }],
                Jump::Return(Some(VarId(3))),
            )],
        );
        let arm = lower(func);
        // Every operand is an ARM register or immediate; a MIR var id can
        // only leak through as a panic in Display, so rendering suffices.
        for inst in &arm.inst {
            let _ = inst.to_string();
        }
    }
}
