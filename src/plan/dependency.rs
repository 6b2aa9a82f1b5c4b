use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{Error, Result};
use crate::model::id::{NodeId, ResourceId, VmId};
use crate::model::model::Model;
use crate::plan::action::Action;
use crate::plan::plan::ReconfigurationPlan;

/// The precedence DAG over the actions of one solved plan.
///
/// An edge states "must fully complete before". The graph is built once per
/// plan, owns a copy of the action set, and is immutable afterwards, so an
/// executor may keep it after the plan itself is gone and run mutually
/// non-dependent actions concurrently.
#[derive(Debug)]
pub struct DependencyGraph {
    actions: Vec<Action>,
    index: HashMap<Action, usize>,
    preds: Vec<BTreeSet<usize>>,
    succs: Vec<BTreeSet<usize>>,
}

impl DependencyGraph {
    /// Extracts the precedence graph of `plan`.
    ///
    /// Every action must carry its concrete, solver-assigned moments. A
    /// cycle among the inferred edges is a [`Error::CycleDetected`]: it
    /// means the formulation admitted a temporally inconsistent plan.
    pub fn build(plan: &ReconfigurationPlan) -> Result<Self> {
        DependencyExtractor::new(plan.source()).extract(plan.actions())
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// The actions that must fully complete before `action` may begin.
    ///
    /// An action that is not part of the plan has no dependencies.
    pub fn dependencies_of(&self, action: &Action) -> HashSet<&Action> {
        match self.index.get(action) {
            Some(i) => self.preds[*i].iter().map(|p| &self.actions[*p]).collect(),
            None => HashSet::new(),
        }
    }

    /// Predecessor indexes of the `idx`-th action of [`Self::actions`].
    pub fn predecessors(&self, idx: usize) -> &BTreeSet<usize> {
        &self.preds[idx]
    }

    fn with_actions(actions: Vec<Action>) -> Self {
        let index = actions.iter().enumerate().map(|(i, a)| (a.clone(), i)).collect();
        let n = actions.len();
        DependencyGraph { actions, index, preds: vec![BTreeSet::new(); n], succs: vec![BTreeSet::new(); n] }
    }

    /// Adds `pred -> succ`, rejecting the insertion when it would close a
    /// cycle.
    fn insert_edge(&mut self, pred: usize, succ: usize) -> Result<()> {
        if pred == succ || self.reaches(succ, pred) {
            return Err(Error::CycleDetected {
                first: self.actions[pred].to_string(),
                second: self.actions[succ].to_string(),
            });
        }
        self.preds[succ].insert(pred);
        self.succs[pred].insert(succ);
        Ok(())
    }

    /// Whether `to` is reachable from `from` through existing edges.
    fn reaches(&self, from: usize, to: usize) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(a) = stack.pop() {
            if a == to {
                return true;
            }
            if seen.insert(a) {
                stack.extend(self.succs[a].iter().copied());
            }
        }
        false
    }
}

/// An action that removes a VM from a node. `at` is the moment the
/// capacity is released, `end` the moment the action completes.
#[derive(Debug)]
struct Vacate {
    idx: usize,
    vm: VmId,
    at: i64,
    end: i64,
}

/// An action that places a VM on a node at moment `at`.
#[derive(Debug)]
struct Arrival {
    idx: usize,
    vm: VmId,
    at: i64,
}

/// Derives, for each action of a concrete plan, the set of actions that
/// must complete first.
///
/// The actions are visited once to build per-node and per-dimension index
/// maps of who vacates, arrives on, enables, or releases what; each action
/// then queries those indexes for conflicting predecessors at its demand
/// moment. Only actions whose subjects intersect are ever compared.
pub struct DependencyExtractor<'a> {
    model: &'a Model,
    vacatings: HashMap<NodeId, Vec<Vacate>>,
    arrivals: HashMap<NodeId, Vec<Arrival>>,
    enablings: HashMap<NodeId, Vec<(usize, i64)>>,
    releases: HashMap<(NodeId, ResourceId), Vec<(usize, i64)>>,
}

impl<'a> DependencyExtractor<'a> {
    pub fn new(model: &'a Model) -> Self {
        DependencyExtractor {
            model,
            vacatings: HashMap::new(),
            arrivals: HashMap::new(),
            enablings: HashMap::new(),
            releases: HashMap::new(),
        }
    }

    pub fn extract(mut self, actions: &[Action]) -> Result<DependencyGraph> {
        for (idx, action) in actions.iter().enumerate() {
            self.visit(idx, action);
        }

        let mut graph = DependencyGraph::with_actions(actions.to_vec());
        for (idx, action) in actions.iter().enumerate() {
            for pred in self.predecessors_of(idx, action) {
                graph.insert_edge(pred, idx)?;
            }
        }
        log::debug!("Extracted {} precedence edges over {} actions", graph.preds.iter().map(BTreeSet::len).sum::<usize>(), actions.len());
        Ok(graph)
    }

    /// First pass: index the action's effect on its node(s).
    fn visit(&mut self, idx: usize, action: &Action) {
        match action {
            Action::BootNode { node, end, .. } => {
                self.enablings.entry(node.clone()).or_default().push((idx, *end));
            }
            Action::ShutdownNode { .. } => {}
            Action::BootVm { vm, node, start, .. } => {
                self.arrivals.entry(node.clone()).or_default().push(Arrival { idx, vm: vm.clone(), at: *start });
            }
            Action::MigrateVm { vm, from, to, start, end } => {
                self.vacatings.entry(from.clone()).or_default().push(Vacate { idx, vm: vm.clone(), at: *end, end: *end });
                self.arrivals.entry(to.clone()).or_default().push(Arrival { idx, vm: vm.clone(), at: *start });
            }
            Action::SuspendVm { .. } | Action::ResumeVm { .. } => {
                // The VM keeps its host in both cases; nothing is freed or
                // claimed.
            }
            Action::KillVm { vm, node, start, end } => {
                self.vacatings.entry(node.clone()).or_default().push(Vacate { idx, vm: vm.clone(), at: *start, end: *end });
            }
            Action::Allocate { vm: _, node, resource, old_qty, new_qty, end, .. } => {
                if new_qty < old_qty {
                    self.releases.entry((node.clone(), resource.clone())).or_default().push((idx, *end));
                }
            }
        }
    }

    /// Second pass: query the indexes for the predecessors of one action.
    fn predecessors_of(&self, idx: usize, action: &Action) -> Vec<usize> {
        match action {
            Action::BootNode { .. } => Vec::new(),
            Action::ShutdownNode { node, end, .. } => self.vacancy_predecessors(node, *end),
            Action::BootVm { vm, node, start, .. } => {
                let mut preds = self.hosting_predecessors(vm, node, *start);
                preds.extend(self.contention_predecessors(idx, vm, node, *start));
                preds
            }
            Action::MigrateVm { vm, to, start, .. } => {
                let mut preds = self.hosting_predecessors(vm, to, *start);
                preds.extend(self.contention_predecessors(idx, vm, to, *start));
                preds
            }
            Action::ResumeVm { vm, node, start, .. } => self.hosting_predecessors(vm, node, *start),
            Action::SuspendVm { .. } | Action::KillVm { .. } => Vec::new(),
            Action::Allocate { node, resource, old_qty, new_qty, start, .. } => {
                if new_qty > old_qty && !self.increase_fits(node, resource, *old_qty, *new_qty) {
                    self.releases
                        .get(&(node.clone(), resource.clone()))
                        .into_iter()
                        .flatten()
                        .filter(|(ridx, at)| *ridx != idx && *at <= *start)
                        .map(|(ridx, _)| *ridx)
                        .collect()
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// BootNode(n) precedes any arrival on n, exactly when the VM was not
    /// already hosted at n and the boot completes no later than the arrival
    /// starts; never the reverse.
    fn hosting_predecessors(&self, vm: &VmId, node: &NodeId, start: i64) -> Vec<usize> {
        if self.model.mapping().host_of(vm) == Some(node) {
            return Vec::new();
        }
        self.enablings.get(node).into_iter().flatten().filter(|(_, at)| *at <= start).map(|(idx, _)| *idx).collect()
    }

    /// ShutdownNode(n) waits for every action removing, by the shutdown's
    /// end, a VM that was hosted on n in the source model.
    fn vacancy_predecessors(&self, node: &NodeId, end: i64) -> Vec<usize> {
        self.vacatings
            .get(node)
            .into_iter()
            .flatten()
            .filter(|v| v.end <= end && self.model.mapping().host_of(&v.vm) == Some(node))
            .map(|v| v.idx)
            .collect()
    }

    /// A VM arriving on n after another VM vacated it relies on the vacated
    /// capacity, unless the attached resource dimensions prove the arrival
    /// fits without it. With no dimension attached nothing can be proven
    /// and the edges are kept.
    fn contention_predecessors(&self, idx: usize, vm: &VmId, node: &NodeId, start: i64) -> Vec<usize> {
        let candidates: Vec<usize> = self
            .vacatings
            .get(node)
            .into_iter()
            .flatten()
            .filter(|v| v.idx != idx && v.at <= start && self.model.mapping().host_of(&v.vm) == Some(node))
            .map(|v| v.idx)
            .collect();
        if candidates.is_empty() || self.arrival_fits(idx, vm, node, start) {
            return Vec::new();
        }
        candidates
    }

    /// Whether `vm` fits on `node` at moment `start` on every dimension,
    /// counting every VM of the source model as still present and every
    /// earlier arrival as already placed.
    fn arrival_fits(&self, idx: usize, vm: &VmId, node: &NodeId, start: i64) -> bool {
        let mut provable = false;
        for rc in self.model.resources() {
            provable = true;
            let mut load: i64 = self.model.mapping().hosted_vms(node).map(|v| rc.demand(v)).sum();
            load += self
                .arrivals
                .get(node)
                .into_iter()
                .flatten()
                .filter(|a| a.idx != idx && a.at <= start)
                .map(|a| rc.demand(&a.vm))
                .sum::<i64>();
            load += rc.demand(vm);
            if load > rc.capacity(node) {
                return false;
            }
        }
        provable
    }

    /// Whether raising the reservation is possible against the node's
    /// capacity with every current reservation still in place.
    fn increase_fits(&self, node: &NodeId, resource: &ResourceId, old_qty: i64, new_qty: i64) -> bool {
        let Some(rc) = self.model.resource(resource) else {
            return false;
        };
        let current: i64 = self.model.mapping().hosted_vms(node).map(|v| rc.demand(v)).sum();
        current - old_qty + new_qty <= rc.capacity(node)
    }
}
