use crate::backend::{ArmOptimizePass, ExtraData};
use crate::error::Result;
use arm_ir::{ArmCode, Inst, Mem, MemOffset, OpCode, Operand2, Reg};
use std::collections::{BTreeSet, HashMap};

/// Scheduling class of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstKind {
    Branch,
    Call,
    Integer,
    /// Multi-cycle integer: multiplies, divides, and ALU ops whose second
    /// operand carries a real shift.
    IntegerM,
    Load,
    Store,
}

fn shift_by_immed(op2: &Operand2) -> bool {
    matches!(op2, Operand2::Reg(rop) if rop.is_shifted())
}

/// `None` marks instructions the scheduler refuses to move (labels,
/// push/pop, pseudo ops); they act as barriers between regions.
fn inst_kind(inst: &Inst) -> Option<InstKind> {
    match inst {
        Inst::Arith2 { op, r2, .. } => match op {
            OpCode::Mov | OpCode::MovT | OpCode::Mvn => Some(InstKind::Integer),
            OpCode::Cmp | OpCode::Cmn => Some(if shift_by_immed(r2) {
                InstKind::IntegerM
            } else {
                InstKind::Integer
            }),
            _ => None,
        },
        Inst::Arith3 { op, r2, .. } => match op {
            OpCode::Lsl | OpCode::Lsr | OpCode::Asr => Some(InstKind::Integer),
            OpCode::Add
            | OpCode::Sub
            | OpCode::Rsb
            | OpCode::And
            | OpCode::Orr
            | OpCode::Eor
            | OpCode::Bic => Some(if shift_by_immed(r2) {
                InstKind::IntegerM
            } else {
                InstKind::Integer
            }),
            OpCode::Mul | OpCode::SMMul | OpCode::SDiv => Some(InstKind::IntegerM),
            _ => None,
        },
        Inst::LoadStore { op, .. } => match op {
            OpCode::LdR => Some(InstKind::Load),
            OpCode::StR => Some(InstKind::Store),
            _ => None,
        },
        Inst::Br { op, .. } => match op {
            OpCode::B => Some(InstKind::Branch),
            OpCode::Bl => Some(InstKind::Call),
            _ => None,
        },
        Inst::MultLoadStore { .. } | Inst::PushPop { .. } | Inst::Label(_) | Inst::Pure(_) => None,
    }
}

fn inst_latency(inst: &Inst, kind: InstKind) -> u32 {
    match kind {
        InstKind::Branch | InstKind::Call | InstKind::Store => 1,
        InstKind::Load => 4,
        InstKind::Integer => 1,
        InstKind::IntegerM => match inst {
            Inst::Arith3 {
                op: OpCode::Mul | OpCode::SMMul | OpCode::SDiv,
                ..
            } => 3,
            _ => 2,
        },
    }
}

/// Intra-region dependency DAG. Nodes are instruction indices; every edge
/// points from a lower to a higher index, so index order is already a
/// topological order.
struct DependencyDag {
    succs: Vec<BTreeSet<usize>>,
    in_degree: Vec<u32>,
    latency: Vec<u32>,
    reg_def: HashMap<Reg, usize>,
    /// Readers since the last definition, for anti dependencies.
    reg_reads: HashMap<Reg, Vec<usize>>,
    last_mem: Option<usize>,
    last_call: Option<usize>,
    last_cmp: Option<usize>,
}

impl DependencyDag {
    fn build(region: &[Inst]) -> Self {
        let n = region.len();
        let mut dag = Self {
            succs: vec![BTreeSet::new(); n],
            in_degree: vec![0; n],
            latency: Vec::with_capacity(n),
            reg_def: HashMap::new(),
            reg_reads: HashMap::new(),
            last_mem: None,
            last_call: None,
            last_cmp: None,
        };
        for (i, inst) in region.iter().enumerate() {
            let kind = inst_kind(inst).expect("barriers are filtered before DAG construction");
            dag.latency.push(inst_latency(inst, kind));
            dag.add_inst_edges(region, i, inst);
        }
        dag
    }

    fn add_successor(&mut self, father: usize, successor: usize) {
        if father != successor && self.succs[father].insert(successor) {
            self.in_degree[successor] += 1;
        }
    }

    /// True dependency: the read waits for the last writer.
    fn add_reg_read(&mut self, reg: Reg, successor: usize) {
        if let Some(&def) = self.reg_def.get(&reg) {
            self.add_successor(def, successor);
        }
        self.reg_reads.entry(reg).or_default().push(successor);
    }

    /// Output and anti dependencies: the new writer waits for the previous
    /// writer and for everything that read the previous value.
    fn define_reg(&mut self, reg: Reg, at: usize) {
        if let Some(&def) = self.reg_def.get(&reg) {
            self.add_successor(def, at);
        }
        if let Some(readers) = self.reg_reads.remove(&reg) {
            for reader in readers {
                self.add_successor(reader, at);
            }
        }
        self.reg_def.insert(reg, at);
    }

    fn add_op2_read(&mut self, op2: &Operand2, successor: usize) {
        if let Operand2::Reg(rop) = op2 {
            self.add_reg_read(rop.reg, successor);
        }
    }

    fn add_mem_read(&mut self, mem: &Mem, successor: usize) {
        if let Mem::Operand(mem) = mem {
            self.add_reg_read(mem.base, successor);
            if let MemOffset::Reg(rop) = mem.offset {
                self.add_reg_read(rop.reg, successor);
            }
        }
    }

    fn add_inst_edges(&mut self, _region: &[Inst], i: usize, inst: &Inst) {
        use arm_ir::ConditionCode;
        match inst {
            Inst::Br { op: OpCode::B, .. } => {
                // A branch terminates the region; everything stays before it.
                for j in 0..i {
                    self.add_successor(j, i);
                }
            }
            Inst::Br { op: OpCode::Bl, .. } => {
                // Argument setup, plus the memory and call chains.
                for reg in [Reg::R0, Reg::R1, Reg::R2, Reg::R3] {
                    self.add_reg_read(reg, i);
                }
                if let Some(last_mem) = self.last_mem {
                    self.add_successor(last_mem, i);
                }
                if let Some(last_call) = self.last_call {
                    self.add_successor(last_call, i);
                }
                self.last_mem = Some(i);
                self.last_call = Some(i);
                // The call clobbers the caller-saved set.
                for reg in Reg::CALLER_SAVED {
                    self.define_reg(reg, i);
                }
            }
            Inst::Arith2 {
                op: OpCode::Mov | OpCode::Mvn,
                r1,
                r2,
                cond,
            } => {
                if *cond != ConditionCode::Always {
                    // Conditional moves live on the flags set by the last
                    // comparison, and keep their old value when the
                    // condition fails.
                    if let Some(last_cmp) = self.last_cmp {
                        self.add_successor(last_cmp, i);
                    }
                    self.last_cmp = Some(i);
                    self.add_reg_read(*r1, i);
                }
                self.add_op2_read(r2, i);
                self.define_reg(*r1, i);
            }
            Inst::Arith2 {
                op: OpCode::MovT,
                r1,
                r2,
                ..
            } => {
                // movt only replaces the top half; it reads its register.
                self.add_reg_read(*r1, i);
                self.add_op2_read(r2, i);
                self.define_reg(*r1, i);
            }
            Inst::Arith2 {
                op: OpCode::Cmp | OpCode::Cmn,
                r1,
                r2,
                ..
            } => {
                if let Some(last_cmp) = self.last_cmp {
                    self.add_successor(last_cmp, i);
                }
                self.last_cmp = Some(i);
                self.add_reg_read(*r1, i);
                self.add_op2_read(r2, i);
            }
            Inst::Arith3 { op, rd, r1, r2, .. } => {
                if *rd == Reg::SP && matches!(op, OpCode::Add | OpCode::Sub) {
                    // Stack adjustments act as call boundaries.
                    if let Some(last_call) = self.last_call {
                        self.add_successor(last_call, i);
                    }
                    self.last_call = Some(i);
                }
                self.add_reg_read(*r1, i);
                self.add_op2_read(r2, i);
                self.define_reg(*rd, i);
            }
            Inst::LoadStore {
                op: OpCode::LdR,
                rd,
                mem,
                ..
            } => {
                if let Some(last_mem) = self.last_mem {
                    self.add_successor(last_mem, i);
                }
                self.last_mem = Some(i);
                self.add_mem_read(mem, i);
                self.define_reg(*rd, i);
            }
            Inst::LoadStore {
                op: OpCode::StR,
                rd,
                mem,
                ..
            } => {
                if let Some(last_mem) = self.last_mem {
                    self.add_successor(last_mem, i);
                }
                self.last_mem = Some(i);
                self.add_mem_read(mem, i);
                self.add_reg_read(*rd, i);
            }
            _ => {}
        }
    }

    /// Critical-path length of every node, counting its own latency.
    fn critical_paths(&self) -> Vec<u32> {
        let n = self.succs.len();
        let mut cp = vec![0u32; n];
        for i in (0..n).rev() {
            let tail = self.succs[i].iter().map(|&s| cp[s]).max().unwrap_or(0);
            cp[i] = self.latency[i] + tail;
        }
        cp
    }
}

/// Greedy list scheduler over the dependency DAG: at each cycle, issue the
/// ready instruction with the longest critical path, falling back to the
/// original order on ties.
fn schedule_region(region: &[Inst]) -> Vec<Inst> {
    if region.len() < 2 {
        return region.to_vec();
    }
    let dag = DependencyDag::build(region);
    let cp = dag.critical_paths();
    let n = region.len();

    let mut in_degree = dag.in_degree.clone();
    let mut earliest = vec![0u32; n];
    let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    let mut clock = 0u32;

    while order.len() < n {
        let pick = ready
            .iter()
            .copied()
            .filter(|&i| earliest[i] <= clock)
            .max_by_key(|&i| (cp[i], std::cmp::Reverse(i)));
        match pick {
            Some(pick) => {
                ready.retain(|&i| i != pick);
                order.push(pick);
                let finish = clock + dag.latency[pick];
                for &succ in &dag.succs[pick] {
                    earliest[succ] = earliest[succ].max(finish);
                    in_degree[succ] -= 1;
                    if in_degree[succ] == 0 {
                        ready.push(succ);
                    }
                }
                clock += 1;
            }
            None => {
                let next = ready.iter().map(|&i| earliest[i]).min().unwrap_or(clock + 1);
                clock = next.max(clock + 1);
            }
        }
    }

    order.into_iter().map(|i| region[i].clone()).collect()
}

/// Reorders instructions within label/branch-delimited regions to hide
/// load and multiply latencies. All dependency edges are honored, so the
/// observable semantics of each region are unchanged.
pub struct InstructionSchedule;

impl ArmOptimizePass for InstructionSchedule {
    fn pass_name(&self) -> &'static str {
        "InstructionSchedule"
    }

    fn optimize_arm(&mut self, code: &mut ArmCode, _extra: &mut ExtraData) -> Result<()> {
        for func in &mut code.functions {
            let insts = std::mem::take(&mut func.inst);
            let mut out = Vec::with_capacity(insts.len());
            let mut region = Vec::new();
            for inst in insts {
                match inst_kind(&inst) {
                    Some(kind) => {
                        let ends_region = kind == InstKind::Branch;
                        region.push(inst);
                        if ends_region {
                            out.extend(schedule_region(&region));
                            region.clear();
                        }
                    }
                    None => {
                        out.extend(schedule_region(&region));
                        region.clear();
                        out.push(inst);
                    }
                }
            }
            out.extend(schedule_region(&region));
            func.inst = out;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arm_ir::{instr, MemoryOperand};

    fn run(insts: Vec<Inst>) -> Vec<String> {
        let mut code = ArmCode {
            functions: vec![arm_ir::Function {
                name: "f".to_string(),
                inst: insts,
                consts: Default::default(),
                stack_size: 0,
            }],
            consts: Default::default(),
        };
        InstructionSchedule
            .optimize_arm(&mut code, &mut ExtraData::default())
            .unwrap();
        code.functions[0].inst.iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn data_dependencies_keep_their_order() {
        let out = run(vec![
            instr::mov(Reg::R0, 1u32),
            instr::add(Reg::R1, Reg::R0, 2u32),
        ]);
        assert_eq!(out, vec!["mov\tr0, #1", "add\tr1, r0, #2"]);
    }

    #[test]
    fn independent_work_hides_load_latency() {
        let out = run(vec![
            instr::ldr(Reg::R0, MemoryOperand::offset(Reg::R(4), 0)),
            instr::add(Reg::R1, Reg::R0, 1u32),
            instr::mov(Reg::R2, 5u32),
        ]);
        // The unrelated mov fills a load delay slot.
        assert_eq!(out, vec!["ldr\tr0, [r4]", "mov\tr2, #5", "add\tr1, r0, #1"]);
    }

    #[test]
    fn branch_stays_last_and_labels_are_barriers() {
        let out = run(vec![
            instr::label(".Lf_bb0"),
            instr::mov(Reg::R0, 1u32),
            instr::b(".Lf_end"),
            instr::label(".Lf_end"),
        ]);
        assert_eq!(
            out,
            vec![".Lf_bb0:", "mov\tr0, #1", "b\t.Lf_end", ".Lf_end:"]
        );
    }

    #[test]
    fn loads_and_stores_stay_chained() {
        let out = run(vec![
            instr::str_at(Reg::R0, Reg::SP, 0),
            instr::ldr_at(Reg::R1, Reg::SP, 0),
        ]);
        assert_eq!(out, vec!["str\tr0, [sp]", "ldr\tr1, [sp]"]);
    }

    #[test]
    fn comparison_and_conditional_move_stay_ordered() {
        let out = run(vec![
            instr::cmp(Reg::R0, 0u32),
            instr::mov(Reg::R1, 0u32),
            instr::mov_cond(Reg::R1, 1u32, arm_ir::ConditionCode::Lt),
        ]);
        let cmp = out.iter().position(|l| l.starts_with("cmp")).unwrap();
        let movlt = out.iter().position(|l| l.starts_with("movlt")).unwrap();
        assert!(cmp < movlt);
    }
}
