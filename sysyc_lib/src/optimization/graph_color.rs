use crate::backend::{ColorMap, ExtraData, MirOptimizePass};
use crate::error::Result;
use mir::{Jump, MirFunction, MirPackage, VarId};
use std::collections::{BTreeMap, BTreeSet};

/// Chaitin-style graph coloring over MIR variables that live across block
/// boundaries. Colored variables later land in callee-saves r4..r10;
/// color −1 means the variable is spilled. Block-local temporaries are
/// left to the allocator's transient pool, memory variables stay on the
/// stack.
pub struct GraphColor {
    colors: usize,
}

impl GraphColor {
    pub fn new(colors: usize) -> Self {
        Self { colors }
    }
}

impl MirOptimizePass for GraphColor {
    fn pass_name(&self) -> &'static str {
        "GraphColor"
    }

    fn optimize_mir(&mut self, package: &mut MirPackage, extra: &mut ExtraData) -> Result<()> {
        for (name, func) in &package.functions {
            if func.ty.is_extern {
                continue;
            }
            let map = color_function(func, self.colors);
            log::trace!("graph color for {name}: {map:?}");
            extra.graph_color.insert(name.clone(), map);
        }
        Ok(())
    }
}

fn jump_use(jump: &Jump) -> Option<VarId> {
    match jump {
        Jump::BrCond(cond, _, _) => Some(*cond),
        Jump::Return(value) => *value,
        Jump::Br(_) | Jump::Unreachable | Jump::Undefined => None,
    }
}

pub fn color_function(func: &MirFunction, colors: usize) -> ColorMap {
    let (live_in, live_out) = block_liveness(func);

    let memory_vars: BTreeSet<VarId> = func
        .variables
        .iter()
        .filter(|(_, var)| var.is_memory_var)
        .map(|(&id, _)| id)
        .collect();
    // The self/return slot and register parameters are pinned to r0..r3.
    let pinned = |var: VarId| var.0 <= func.param_count() as u32;

    let candidates: BTreeSet<VarId> = live_in
        .values()
        .chain(live_out.values())
        .flatten()
        .copied()
        .filter(|&var| !pinned(var) && !memory_vars.contains(&var))
        .collect();
    if candidates.is_empty() {
        return ColorMap::new();
    }

    // Interference: a definition conflicts with everything live across it.
    let mut adjacency: BTreeMap<VarId, BTreeSet<VarId>> = candidates
        .iter()
        .map(|&var| (var, BTreeSet::new()))
        .collect();
    for blk in func.basic_blks.values() {
        let mut live = live_out.get(&blk.id).cloned().unwrap_or_default();
        if let Some(var) = jump_use(&blk.jump) {
            live.insert(var);
        }
        for inst in blk.inst.iter().rev() {
            if let Some(dest) = inst.dest() {
                if candidates.contains(&dest) {
                    for &other in &live {
                        if other != dest && candidates.contains(&other) {
                            adjacency.get_mut(&dest).unwrap().insert(other);
                            adjacency.get_mut(&other).unwrap().insert(dest);
                        }
                    }
                }
                live.remove(&dest);
            }
            live.extend(inst.uses());
        }
    }

    // Simplify: keep removing low-degree nodes; when stuck, spill the
    // highest-degree one.
    let mut degrees: BTreeMap<VarId, usize> =
        adjacency.iter().map(|(&v, adj)| (v, adj.len())).collect();
    let mut stack = Vec::new();
    let mut removed = BTreeSet::new();
    let mut spilled = BTreeSet::new();
    while removed.len() < candidates.len() {
        let pick = degrees
            .iter()
            .find(|(v, &deg)| !removed.contains(*v) && deg < colors)
            .map(|(&v, _)| v);
        let (var, spill) = match pick {
            Some(var) => (var, false),
            None => {
                let var = degrees
                    .iter()
                    .filter(|(v, _)| !removed.contains(*v))
                    .max_by_key(|(_, &deg)| deg)
                    .map(|(&v, _)| v)
                    .unwrap();
                (var, true)
            }
        };
        removed.insert(var);
        if spill {
            spilled.insert(var);
        } else {
            stack.push(var);
        }
        for &neighbor in &adjacency[&var] {
            if let Some(deg) = degrees.get_mut(&neighbor) {
                *deg = deg.saturating_sub(1);
            }
        }
    }

    let mut map = ColorMap::new();
    for &var in &spilled {
        map.insert(var, -1);
    }
    for &var in stack.iter().rev() {
        let taken: BTreeSet<i32> = adjacency[&var]
            .iter()
            .filter_map(|n| map.get(n).copied())
            .collect();
        let color = (0..colors as i32)
            .find(|c| !taken.contains(c))
            .expect("simplification guarantees a free color");
        map.insert(var, color);
    }
    map
}

/// Classic backward block liveness to a fixed point.
fn block_liveness(
    func: &MirFunction,
) -> (
    BTreeMap<u32, BTreeSet<VarId>>,
    BTreeMap<u32, BTreeSet<VarId>>,
) {
    let mut gen: BTreeMap<u32, BTreeSet<VarId>> = BTreeMap::new();
    let mut def: BTreeMap<u32, BTreeSet<VarId>> = BTreeMap::new();
    for blk in func.basic_blks.values() {
        let mut g = BTreeSet::new();
        let mut d = BTreeSet::new();
        for inst in &blk.inst {
            for used in inst.uses() {
                if !d.contains(&used) {
                    g.insert(used);
                }
            }
            if let Some(dest) = inst.dest() {
                d.insert(dest);
            }
        }
        if let Some(used) = jump_use(&blk.jump) {
            if !d.contains(&used) {
                g.insert(used);
            }
        }
        gen.insert(blk.id, g);
        def.insert(blk.id, d);
    }

    let mut live_in: BTreeMap<u32, BTreeSet<VarId>> = BTreeMap::new();
    let mut live_out: BTreeMap<u32, BTreeSet<VarId>> = BTreeMap::new();
    loop {
        let mut changed = false;
        for blk in func.basic_blks.values().rev() {
            let out: BTreeSet<VarId> = blk
                .jump
                .targets()
                .filter_map(|t| live_in.get(&t))
                .flatten()
                .copied()
                .collect();
            let mut input = gen[&blk.id].clone();
            input.extend(out.difference(&def[&blk.id]));
            if live_out.get(&blk.id) != Some(&out) || live_in.get(&blk.id) != Some(&input) {
                changed = true;
                live_out.insert(blk.id, out);
                live_in.insert(blk.id, input);
            }
        }
        if !changed {
            break;
        }
    }
    (live_in, live_out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use mir::{Inst, Op, Ty, Value, Variable};

    /// Two variables defined in block 0 and both read in block 1 must not
    /// share a color.
    #[test]
    fn interfering_cross_block_variables_get_distinct_colors() {
        let func = function(
            "f",
            0,
            vec![
                block(
                    0,
                    vec![
                        Inst::Assign {
                            dest: VarId(1),
                            src: Value::Imm(1),
                        },
                        Inst::Assign {
                            dest: VarId(2),
                            src: Value::Imm(2),
                        },
                    ],
                    Jump::Br(1),
                ),
                block(
                    1,
                    vec![Inst::Op {
                        dest: VarId(3),
                        op: Op::Add,
                        lhs: Value::Var(VarId(1)),
                        rhs: Value::Var(VarId(2)),
                    }],
                    Jump::Return(Some(VarId(3))),
                ),
            ],
        );
        let map = color_function(&func, 7);
        let a = map[&VarId(1)];
        let b = map[&VarId(2)];
        assert!(a >= 0 && b >= 0);
        assert_ne!(a, b);
        // %3 is block-local; the transient pool takes care of it.
        assert!(!map.contains_key(&VarId(3)));
    }

    #[test]
    fn pressure_beyond_k_spills_something() {
        // Nine variables all live into block 1.
        let defs: Vec<Inst> = (1..=9)
            .map(|i| Inst::Assign {
                dest: VarId(i),
                src: Value::Imm(i as i32),
            })
            .collect();
        let mut sums = Vec::new();
        let mut prev = 1u32;
        for i in 2..=9 {
            let dest = 9 + i;
            sums.push(Inst::Op {
                dest: VarId(dest),
                op: Op::Add,
                lhs: Value::Var(VarId(prev)),
                rhs: Value::Var(VarId(i)),
            });
            prev = dest;
        }
        let func = function(
            "f",
            0,
            vec![
                block(0, defs, Jump::Br(1)),
                block(1, sums, Jump::Return(Some(VarId(prev)))),
            ],
        );
        let map = color_function(&func, 7);
        assert!(map.values().any(|&c| c == -1), "nine lives can't fit in 7 colors");
        // Everything else still gets a valid color.
        assert!(map.values().all(|&c| (-1..7).contains(&c)));
    }

    #[test]
    fn memory_variables_are_never_colored() {
        let mut func = function(
            "f",
            0,
            vec![
                block(
                    0,
                    vec![Inst::Ref {
                        dest: VarId(2),
                        target: RefTarget::Var(VarId(1)),
                    }],
                    Jump::Br(1),
                ),
                block(
                    1,
                    vec![Inst::Load {
                        dest: VarId(3),
                        src: Value::Var(VarId(2)),
                    }],
                    Jump::Return(Some(VarId(3))),
                ),
            ],
        );
        func.variables
            .insert(VarId(1), Variable::memory(Ty::array_of(Ty::Int, 4)));
        let map = color_function(&func, 7);
        assert!(!map.contains_key(&VarId(1)));
        // The pointer itself is an ordinary cross-block value.
        assert!(map.contains_key(&VarId(2)));
    }
}
