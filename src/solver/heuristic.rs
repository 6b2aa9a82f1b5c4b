use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Result;
use crate::model::id::VmId;
use crate::solver::backend::{DomainView, SearchStrategy, SolverBackend, VarId};
use crate::solver::objective::MinMttr;

/// One VM the placement search can still schedule: its hoster variable, its
/// start variable and the index of the node it currently occupies (`None`
/// for a VM with no host yet).
#[derive(Debug)]
pub struct VmStartEntry {
    pub vm: VmId,
    pub hoster: VarId,
    pub start: VarId,
    pub origin: Option<usize>,
}

/// Derived view over the hoster variables: who stays, who moves where.
/// Valid for exactly one domain generation.
struct PlacementCache {
    stays: Vec<usize>,
    moves: Vec<usize>,
    /// Per node index: the entries whose instantiated hoster points there.
    ins: Vec<Vec<usize>>,
    /// Per node index: how many hosted VMs may still leave it.
    outs: Vec<usize>,
}

/// A variable-selection policy that biases the search toward actions on
/// stable nodes first, then toward VMs whose destination is already fixed,
/// to shrink the search tree and the plan completion time.
///
/// The policy, at every choice point:
/// 1. collect the start variables of VMs moving onto nodes no VM may still
///    leave (those actions can begin at 0);
/// 2. otherwise pick the smallest-lower-bound start among the VMs already
///    known to move, handing the objective its cue to post the
///    completion-time bounds;
/// 3. otherwise the smallest-lower-bound start among the staying VMs, then
///    among everything still open;
/// 4. with no start variable left, signal the objective: the search moves
///    from placement to scheduling.
pub struct OnStableNodeFirst {
    entries: Vec<VmStartEntry>,
    node_count: usize,
    objective: Rc<RefCell<MinMttr>>,
    cache: Option<PlacementCache>,
    cache_generation: u64,
}

impl OnStableNodeFirst {
    pub fn new(entries: Vec<VmStartEntry>, node_count: usize, objective: Rc<RefCell<MinMttr>>) -> Self {
        OnStableNodeFirst { entries, node_count, objective, cache: None, cache_generation: 0 }
    }

    /// Recomputes the stays/moves view when any hoster was instantiated
    /// since the last call. Keyed on the domain generation counter, so no
    /// explicit invalidation call can be forgotten.
    fn refresh(&mut self, view: &dyn SolverBackend) {
        let generation = view.generation();
        if self.cache.is_some() && self.cache_generation == generation {
            return;
        }

        let mut cache = PlacementCache {
            stays: Vec::new(),
            moves: Vec::new(),
            ins: vec![Vec::new(); self.node_count],
            outs: vec![0; self.node_count],
        };
        for (i, entry) in self.entries.iter().enumerate() {
            let fixed = view.is_instantiated(entry.hoster);
            let pos = fixed.then(|| view.lower_bound(entry.hoster) as usize);
            if let Some(origin) = entry.origin {
                match pos {
                    Some(p) if p == origin => cache.stays.push(i),
                    Some(p) => {
                        cache.moves.push(i);
                        if p < self.node_count {
                            cache.ins[p].push(i);
                        }
                        cache.outs[origin] += 1;
                    }
                    None => cache.outs[origin] += 1,
                }
            }
        }
        self.cache = Some(cache);
        self.cache_generation = generation;
    }

    fn min_lb(view: &dyn SolverBackend, entries: &[VmStartEntry], pool: impl IntoIterator<Item = usize>) -> Option<VarId> {
        let mut best: Option<(i64, VarId)> = None;
        for i in pool {
            let start = entries[i].start;
            if view.is_instantiated(start) {
                continue;
            }
            let lb = view.lower_bound(start);
            if best.is_none_or(|(b, _)| lb < b) {
                best = Some((lb, start));
            }
        }
        best.map(|(_, v)| v)
    }
}

impl SearchStrategy for OnStableNodeFirst {
    fn select(&mut self, solver: &mut dyn SolverBackend) -> Result<Option<VarId>> {
        self.refresh(solver);
        let cache = self.cache.as_ref().unwrap();

        // VMs arriving on nodes nothing may still leave: they can be fixed
        // to start at 0 with no risk. Collected only; the moving pool below
        // decides, with these first.
        let mut stable_in: Vec<usize> = Vec::new();
        for (x, outs) in cache.outs.iter().enumerate() {
            if *outs == 0 {
                stable_in.extend(cache.ins[x].iter().copied());
            }
        }

        let moving = Self::min_lb(solver, &self.entries, stable_in)
            .or_else(|| Self::min_lb(solver, &self.entries, cache.moves.iter().copied()));
        if let Some(var) = moving {
            // The placement is settling: the completion-time bounds become
            // worth propagating.
            self.objective.borrow_mut().post_cost_constraints(solver)?;
            return Ok(Some(var));
        }

        let staying = Self::min_lb(solver, &self.entries, cache.stays.iter().copied())
            .or_else(|| Self::min_lb(solver, &self.entries, 0..self.entries.len()));
        match staying {
            Some(var) => Ok(Some(var)),
            None => {
                // Placement exhausted: hand over to the scheduling phase.
                self.objective.borrow_mut().post_cost_constraints(solver)?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::backend::VarId;
    use crate::solver::solver_mock::MockSolver;

    fn entry(solver: &mut MockSolver, vm: &str, origin: Option<usize>, node_count: usize) -> VmStartEntry {
        let hoster = solver.declare_int(&format!("relocatable({}).hoster", vm), 0, node_count as i64 - 1);
        let start = solver.declare_int(&format!("relocatable({}).start", vm), 0, 100);
        VmStartEntry { vm: VmId::new(vm), hoster, start, origin }
    }

    #[test]
    fn test_cache_recomputed_on_instantiation() {
        let mut solver = MockSolver::new();
        let objective = {
            let cost = solver.declare_int("globalCost", 0, 100);
            Rc::new(RefCell::new(MinMttr::new(cost)))
        };
        let e = entry(&mut solver, "vm1", Some(0), 2);
        let hoster = e.hoster;
        let mut h = OnStableNodeFirst::new(vec![e], 2, objective);

        h.refresh(&solver);
        assert!(h.cache.as_ref().unwrap().moves.is_empty());

        solver.instantiate(hoster, 1);
        h.refresh(&solver);
        assert_eq!(h.cache.as_ref().unwrap().moves, vec![0], "Instantiating a hoster must refresh the stays/moves view");
    }

    #[test]
    fn test_unknown_vars_do_not_crash_selection() {
        let mut solver = MockSolver::new();
        let objective = {
            let cost = solver.declare_int("globalCost", 0, 100);
            Rc::new(RefCell::new(MinMttr::new(cost)))
        };
        let mut h = OnStableNodeFirst::new(Vec::new(), 0, objective);
        let picked: Option<VarId> = h.select(&mut solver).unwrap();
        assert!(picked.is_none());
    }
}
