use crate::backend::{ArmOptimizePass, ColorMap, ExtraData};
use crate::error::{BackendError, Result};
use arm_ir::{
    instr, ArmCode, Inst, Mem, MemOffset, MemoryOperand, OpCode, Operand2, Reg, LD_PC_PREFIX,
};
use mir::VarId;
use std::collections::{BTreeSet, HashMap};

/// Pool for on-the-fly transient registers.
const TEMP_REGS: [Reg; 5] = Reg::CALLER_SAVED;

/// Semi-open interval `[start, end)`: first written at `start`, last read
/// at `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interval {
    start: usize,
    end: usize,
}

impl Interval {
    fn point(at: usize) -> Self {
        Self { start: at, end: at }
    }

    fn add_starting_point(&mut self, start: usize) {
        if start < self.start {
            self.start = start;
        }
    }

    fn add_ending_point(&mut self, end: usize) {
        if end > self.end {
            self.end = end;
        }
    }

    fn contains(&self, at: usize) -> bool {
        self.start <= at && at <= self.end
    }
}

/// Replaces every virtual register with a physical one, materializing
/// spills, and patches the prologue/epilogue with the final frame size and
/// callee-save set.
pub struct RegAllocatePass;

impl ArmOptimizePass for RegAllocatePass {
    fn pass_name(&self) -> &'static str {
        "RegAllocatePass"
    }

    fn optimize_arm(&mut self, code: &mut ArmCode, extra: &mut ExtraData) -> Result<()> {
        let empty_colors = ColorMap::new();
        let empty_map = HashMap::new();
        for func in &mut code.functions {
            let colors = extra.graph_color.get(&func.name).unwrap_or(&empty_colors);
            let mir_to_arm = extra.var_reg_map.get(&func.name).unwrap_or(&empty_map);
            RegAllocator::new(func, colors, mir_to_arm).alloc_regs()?;
        }
        Ok(())
    }
}

struct RegAllocator<'a> {
    f: &'a mut arm_ir::Function,
    color_map: &'a ColorMap,
    mir_to_arm: &'a HashMap<VarId, Reg>,
    live_intervals: HashMap<Reg, Interval>,
    /// Colored virtual register → callee-saved physical register.
    reg_map: HashMap<Reg, Reg>,
    /// Transient virtual register → its caller-saved physical register.
    transient_map: HashMap<Reg, Reg>,
    /// Physical register → the interval currently occupying it.
    active: HashMap<Reg, Interval>,
    /// Spilled virtual register → slot offset from sp.
    spill_positions: HashMap<Reg, u32>,
    used_regs: BTreeSet<Reg>,
    inst_sink: Vec<Inst>,
    pending_stores: Vec<Inst>,
    delayed_store: Option<(Reg, Reg)>,
    /// Total frame size; starts at the stack-scan size from codegen.
    stack_size: u32,
    /// Next free spill slot offset.
    spill_top: u32,
}

impl<'a> RegAllocator<'a> {
    fn new(
        f: &'a mut arm_ir::Function,
        color_map: &'a ColorMap,
        mir_to_arm: &'a HashMap<VarId, Reg>,
    ) -> Self {
        let stack_size = f.stack_size;
        Self {
            f,
            color_map,
            mir_to_arm,
            live_intervals: HashMap::new(),
            reg_map: HashMap::new(),
            transient_map: HashMap::new(),
            active: HashMap::new(),
            spill_positions: HashMap::new(),
            used_regs: BTreeSet::new(),
            inst_sink: Vec::new(),
            pending_stores: Vec::new(),
            delayed_store: None,
            stack_size,
            spill_top: 0,
        }
    }

    fn alloc_regs(mut self) -> Result<()> {
        self.calc_live_intervals();
        self.construct_reg_map();

        log::trace!("color map for {}:", self.f.name);
        for (var, color) in self.color_map {
            log::trace!("  {var} -> {:?}: {color}", self.mir_to_arm.get(var));
        }

        self.perform_load_stores()?;
        self.f.inst = std::mem::take(&mut self.inst_sink);
        self.patch_prologue_epilogue()?;
        self.f.stack_size = self.stack_size;

        if self.f.inst.iter().any(|inst| inst.has_virtual()) {
            return Err(BackendError::Unreachable(
                "virtual register survived allocation",
            ));
        }
        Ok(())
    }

    fn calc_live_intervals(&mut self) {
        let insts = std::mem::take(&mut self.f.inst);
        for (i, inst) in insts.iter().enumerate() {
            match inst {
                Inst::Arith3 { rd, r1, r2, .. } => {
                    self.add_read(*r1, i);
                    self.add_op2_read(r2, i);
                    self.add_write(*rd, i);
                }
                Inst::Arith2 { op, r1, r2, .. } => {
                    match op {
                        OpCode::Mov | OpCode::MovT | OpCode::Mvn => self.add_write(*r1, i),
                        _ => self.add_read(*r1, i),
                    }
                    self.add_op2_read(r2, i);
                }
                Inst::LoadStore { op, rd, mem, .. } => {
                    match op {
                        OpCode::LdR => self.add_write(*rd, i),
                        _ => self.add_read(*rd, i),
                    }
                    if let Mem::Operand(mem) = mem {
                        self.add_mem_read(mem, i);
                    }
                }
                Inst::MultLoadStore { op, rn, regs } => {
                    for &reg in regs {
                        match op {
                            OpCode::LdM => self.add_write(reg, i),
                            _ => self.add_read(reg, i),
                        }
                    }
                    self.add_read(*rn, i);
                }
                Inst::PushPop { op, regs, .. } => {
                    for &reg in regs {
                        match op {
                            OpCode::Push => self.add_read(reg, i),
                            _ => self.add_write(reg, i),
                        }
                    }
                }
                Inst::Br { .. } | Inst::Label(_) | Inst::Pure(_) => {}
            }
        }
        self.f.inst = insts;
    }

    fn add_read(&mut self, reg: Reg, at: usize) {
        self.live_intervals
            .entry(reg)
            .and_modify(|iv| iv.add_ending_point(at))
            .or_insert_with(|| Interval::point(at));
    }

    fn add_write(&mut self, reg: Reg, at: usize) {
        self.live_intervals
            .entry(reg)
            .and_modify(|iv| iv.add_starting_point(at))
            .or_insert_with(|| Interval::point(at));
    }

    fn add_op2_read(&mut self, op2: &Operand2, at: usize) {
        if let Some(reg) = op2.reg() {
            self.add_read(reg, at);
        }
    }

    fn add_mem_read(&mut self, mem: &MemoryOperand, at: usize) {
        self.add_read(mem.base, at);
        if let MemOffset::Reg(rop) = mem.offset {
            self.add_read(rop.reg, at);
        }
    }

    /// Turns the color map into physical assignments: color `c` becomes
    /// callee-save `r(c+4)`, color −1 becomes a spill slot. Variables the
    /// coloring never saw stay for the transient pool.
    fn construct_reg_map(&mut self) {
        for (var, vreg) in self.mir_to_arm {
            if !vreg.is_virtual() {
                continue;
            }
            match self.color_map.get(var) {
                Some(&color) if color >= 0 => {
                    let Some(&reg) = Reg::CALLEE_SAVED.get(color as usize) else {
                        continue;
                    };
                    self.reg_map.insert(*vreg, reg);
                    self.used_regs.insert(reg);
                }
                Some(_) => {
                    self.spill_positions.insert(*vreg, self.spill_top);
                    self.spill_top += 4;
                    self.stack_size += 4;
                }
                None => {}
            }
        }
    }

    fn invalidate_read(&mut self, pos: usize) {
        // The register is no longer read from, thus is freed.
        self.active.retain(|_, interval| interval.end > pos);
    }

    fn alloc_transient_reg(&mut self, interval: Interval, at: usize) -> Result<Reg> {
        for reg in TEMP_REGS {
            if self.active.contains_key(&reg) {
                continue;
            }
            // A physical register busy with call arguments or parameters
            // is off limits while its own uses surround this point.
            if self
                .live_intervals
                .get(&reg)
                .is_some_and(|iv| iv.contains(at))
            {
                continue;
            }
            self.active.insert(reg, interval);
            return Ok(reg);
        }
        Err(BackendError::NotImplemented(
            "transient register pressure exceeds the caller-save pool",
        ))
    }

    /// Stable transient assignment for an uncolored virtual register.
    fn transient_for(&mut self, vreg: Reg, at: usize) -> Result<Reg> {
        if let Some(&phys) = self.transient_map.get(&vreg) {
            return Ok(phys);
        }
        let interval = self
            .live_intervals
            .get(&vreg)
            .copied()
            .unwrap_or_else(|| Interval::point(at));
        let phys = self.alloc_transient_reg(interval, at)?;
        self.transient_map.insert(vreg, phys);
        Ok(phys)
    }

    fn spill_slot(&self, vreg: Reg) -> Option<u32> {
        self.spill_positions.get(&vreg).copied()
    }

    /// Replaces a read of a virtual register in place, loading from the
    /// spill slot first when necessary.
    fn replace_read(&mut self, r: &mut Reg, at: usize) -> Result<()> {
        if !r.is_virtual() {
            return Ok(());
        }
        if let Some(&phys) = self.reg_map.get(r) {
            *r = phys;
            return Ok(());
        }
        if let Some(pos) = self.spill_slot(*r) {
            let vreg = *r;
            let rt = self.alloc_transient_reg(Interval::point(at), at)?;
            let matching_store = matches!(
                self.inst_sink.last(),
                Some(Inst::LoadStore {
                    op: OpCode::StR,
                    rd,
                    mem: Mem::Operand(mem),
                    ..
                }) if *rd == rt && *mem == MemoryOperand::offset(Reg::SP, pos as i16)
            );
            if matching_store {
                // The value is still in rt; drop the store and re-emit it
                // after the current instruction.
                self.inst_sink.pop();
                self.delayed_store = Some((vreg, rt));
            } else {
                self.inst_sink.push(instr::ldr_at(rt, Reg::SP, pos as i16));
            }
            *r = rt;
            return Ok(());
        }
        let rt = self.transient_for(*r, at)?;
        *r = rt;
        Ok(())
    }

    fn replace_op2_read(&mut self, op2: &mut Operand2, at: usize) -> Result<()> {
        if let Some(reg) = op2.reg_mut() {
            let mut r = *reg;
            self.replace_read(&mut r, at)?;
            *reg = r;
        }
        Ok(())
    }

    fn replace_mem_read(&mut self, mem: &mut Mem, at: usize) -> Result<()> {
        if let Mem::Operand(mem) = mem {
            let mut base = mem.base;
            self.replace_read(&mut base, at)?;
            mem.base = base;
            if let MemOffset::Reg(rop) = &mut mem.offset {
                let mut r = rop.reg;
                self.replace_read(&mut r, at)?;
                rop.reg = r;
            }
        }
        Ok(())
    }

    /// Replaces a write of a virtual register in place, queueing the spill
    /// store to be emitted after the current instruction.
    fn replace_write(&mut self, r: &mut Reg, at: usize) -> Result<()> {
        if !r.is_virtual() {
            return Ok(());
        }
        if let Some(&phys) = self.reg_map.get(r) {
            *r = phys;
            return Ok(());
        }
        if let Some(pos) = self.spill_slot(*r) {
            let rt = self.alloc_transient_reg(Interval::point(at), at)?;
            self.pending_stores
                .push(instr::str_at(rt, Reg::SP, pos as i16));
            *r = rt;
            return Ok(());
        }
        let rt = self.transient_for(*r, at)?;
        *r = rt;
        Ok(())
    }

    fn perform_load_stores(&mut self) -> Result<()> {
        let insts = std::mem::take(&mut self.f.inst);
        for (i, mut inst) in insts.into_iter().enumerate() {
            self.invalidate_read(i);
            match &mut inst {
                Inst::Arith3 { rd, r1, r2, .. } => {
                    self.replace_read(r1, i)?;
                    self.replace_op2_read(r2, i)?;
                    self.replace_write(rd, i)?;
                }
                Inst::Arith2 { op, r1, r2, .. } => match op {
                    OpCode::Mov | OpCode::Mvn => {
                        self.replace_op2_read(r2, i)?;
                        self.replace_write(r1, i)?;
                    }
                    OpCode::MovT => {
                        // movt reads and writes its register.
                        let orig = *r1;
                        self.replace_op2_read(r2, i)?;
                        self.replace_read(r1, i)?;
                        if let Some(pos) = self.spill_slot(orig) {
                            self.pending_stores
                                .push(instr::str_at(*r1, Reg::SP, pos as i16));
                        }
                    }
                    _ => {
                        self.replace_read(r1, i)?;
                        self.replace_op2_read(r2, i)?;
                    }
                },
                Inst::LoadStore { op, rd, mem, .. } => {
                    self.replace_mem_read(mem, i)?;
                    match op {
                        OpCode::LdR => self.replace_write(rd, i)?,
                        _ => self.replace_read(rd, i)?,
                    }
                }
                Inst::MultLoadStore { .. } => {
                    return Err(BackendError::NotImplemented("MultLoadStore rewrite"));
                }
                Inst::PushPop { .. } | Inst::Br { .. } | Inst::Pure(_) => {}
                Inst::Label(name) => {
                    let is_ld_pc = name.starts_with(LD_PC_PREFIX);
                    self.inst_sink.push(inst);
                    // Literal-pool sequencing: the marker label must stay
                    // glued to its load; delay the preceding store past it.
                    let n = self.inst_sink.len();
                    if is_ld_pc
                        && n >= 2
                        && matches!(self.inst_sink[n - 2], Inst::LoadStore { .. })
                    {
                        self.inst_sink.swap(n - 2, n - 1);
                    }
                    self.flush_stores(i)?;
                    continue;
                }
            }
            self.inst_sink.push(inst);
            self.flush_stores(i)?;
        }
        Ok(())
    }

    fn flush_stores(&mut self, _at: usize) -> Result<()> {
        self.inst_sink.append(&mut self.pending_stores);
        if let Some((vreg, rt)) = self.delayed_store.take() {
            let pos = self
                .spill_slot(vreg)
                .ok_or(BackendError::Unreachable("delayed store lost its slot"))?;
            self.inst_sink.push(instr::str_at(rt, Reg::SP, pos as i16));
        }
        Ok(())
    }

    /// Extends the prologue push / epilogue pop with every callee-save in
    /// use, and expands the stack right after `mov fp, sp`.
    fn patch_prologue_epilogue(&mut self) -> Result<()> {
        let used: Vec<Reg> = self.used_regs.iter().copied().collect();
        match self.f.inst.first_mut() {
            Some(Inst::PushPop {
                op: OpCode::Push,
                regs,
                ..
            }) => regs.extend(used.iter().copied()),
            _ => {
                return Err(BackendError::Unreachable(
                    "function does not start with a prologue push",
                ))
            }
        }
        match self.f.inst.last_mut() {
            Some(Inst::PushPop {
                op: OpCode::Pop,
                regs,
                ..
            }) => regs.extend(used.iter().copied()),
            _ => {
                return Err(BackendError::Unreachable(
                    "function does not end with an epilogue pop",
                ))
            }
        }
        if self.stack_size > 0 {
            if Operand2::encodable(self.stack_size) {
                self.f
                    .inst
                    .insert(2, instr::sub(Reg::SP, Reg::SP, self.stack_size));
            } else {
                // Too big for an immediate; materialize through ip.
                self.f.inst.insert(2, instr::mov(Reg::R12, self.stack_size & 0xffff));
                self.f.inst.insert(3, instr::movt(Reg::R12, self.stack_size >> 16));
                self.f.inst.insert(4, instr::sub(Reg::SP, Reg::SP, Reg::R12));
            }
        }
        Ok(())
    }
}
