use crate::backend::{ExtraData, MirOptimizePass};
use crate::error::Result;
use mir::{Jump, MirFunction, COMMON_EXIT};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Chooses an intra-function emission order that keeps loop bodies
/// contiguous, and collects the set of loop headers.
pub struct BasicBlkRearrange;

impl MirOptimizePass for BasicBlkRearrange {
    fn pass_name(&self) -> &'static str {
        "BasicBlkRearrange"
    }

    fn optimize_mir(&mut self, package: &mut mir::MirPackage, extra: &mut ExtraData) -> Result<()> {
        for func in package.functions.values() {
            if func.ty.is_extern {
                continue;
            }
            let (arrangement, cycle_starts) = arrange_function(func);
            log::trace!(
                "bb arrangement for {} is: {:?}, cycle starts: {:?}",
                func.name,
                arrangement,
                cycle_starts
            );
            extra
                .block_ordering
                .insert(func.name.clone(), arrangement);
            extra
                .cycle_starts
                .insert(func.name.clone(), cycle_starts);
        }
        Ok(())
    }
}

/// DFS back-edge counter. A block on the current DFS path that gets
/// revisited is a loop header; its counter records how many back-edges
/// enter it.
struct CycleSolver<'f> {
    func: &'f MirFunction,
    counter: HashMap<u32, u32>,
    visited: HashSet<u32>,
    path: HashSet<u32>,
}

impl<'f> CycleSolver<'f> {
    fn new(func: &'f MirFunction) -> Self {
        Self {
            func,
            counter: HashMap::new(),
            visited: HashSet::new(),
            path: HashSet::new(),
        }
    }

    fn solve(mut self) -> HashMap<u32, u32> {
        if let Some(entry) = self.func.entry_block_id() {
            self.dfs(entry);
        }
        self.counter
    }

    fn dfs(&mut self, id: u32) {
        if self.path.contains(&id) {
            *self.counter.entry(id).or_insert(0) += 1;
        } else if self.visited.contains(&id) {
            // forward or cross edge
        } else {
            self.path.insert(id);
            self.visited.insert(id);
            if let Some(blk) = self.func.basic_blks.get(&id) {
                match blk.jump {
                    Jump::Br(target) => self.dfs(target),
                    Jump::BrCond(_, bb_true, bb_false) => {
                        self.dfs(bb_true);
                        self.dfs(bb_false);
                    }
                    Jump::Return(_) | Jump::Unreachable | Jump::Undefined => {}
                }
            }
            self.path.remove(&id);
        }
    }
}

/// Worklist linearization. A block is emitted once the number of its
/// not-yet-satisfied predecessors drops to its back-edge count; successors
/// of an emitted block join the queue, with returns feeding the common
/// exit block when one exists.
pub fn arrange_function(func: &MirFunction) -> (Vec<u32>, BTreeSet<u32>) {
    let cycles = CycleSolver::new(func).solve();
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    let mut arrangement = Vec::new();

    let has_common_exit = func.basic_blks.contains_key(&COMMON_EXIT);

    let mut input_count: HashMap<u32, u32> = func
        .basic_blks
        .values()
        .map(|blk| (blk.id, blk.preceding.len() as u32))
        .collect();
    let Some(entry) = func.entry_block_id() else {
        return (arrangement, BTreeSet::new());
    };
    input_count.insert(entry, 1);

    queue.push_back(entry);
    while let Some(id) = queue.pop_front() {
        let cnt = input_count.entry(id).or_insert(0);
        if *cnt > 0 {
            *cnt -= 1;
        }
        let slack = cycles.get(&id).copied().unwrap_or(0);
        if *cnt > slack {
            continue;
        }
        if !visited.insert(id) {
            continue;
        }
        arrangement.push(id);

        let Some(blk) = func.basic_blks.get(&id) else {
            continue;
        };
        match blk.jump {
            Jump::Br(target) => queue.push_back(target),
            Jump::BrCond(_, bb_true, bb_false) => {
                queue.push_back(bb_true);
                queue.push_back(bb_false);
            }
            Jump::Return(_) if has_common_exit => queue.push_back(COMMON_EXIT),
            Jump::Return(_) | Jump::Unreachable | Jump::Undefined => {}
        }
    }

    let cycle_starts = cycles
        .iter()
        .filter(|(_, &count)| count != 0)
        .map(|(&id, _)| id)
        .collect();
    (arrangement, cycle_starts)
}
