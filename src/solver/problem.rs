use bimap::BiMap;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::id::{NodeId, ResourceId, VmId};
use crate::model::mapping::VmState;
use crate::model::model::Model;
use crate::model::resource::ShareableResource;
use crate::plan::action::{Action, ActionKind};
use crate::plan::plan::ReconfigurationPlan;
use crate::solver::backend::{Constraint, SolveOutcome, Solution, SolverBackend, VarId};
use crate::solver::constraint::{ConstraintRegistry, SatConstraint};
use crate::solver::duration::{DurationEvaluators, Subject};
use crate::solver::heuristic::{OnStableNodeFirst, VmStartEntry};
use crate::solver::objective::MinMttr;
use crate::solver::packing::Packing;
use crate::solver::slice::Slice;
use crate::solver::transition::node::{BootableNode, NodeTransition, ShutdownableNode};
use crate::solver::transition::vm::{
    BootVmTransition, KillVmTransition, RelocatableVm, ResumeVmTransition, SleepingVm, SuspendVmTransition, VmTransition,
};

/// Tuning knobs of one formulation.
pub struct Parameters {
    /// Upper bound on every moment of the plan.
    pub horizon: i64,
    /// Wall-clock budget of the solve call. Exceeding it yields
    /// [`Error::Timeout`], never a partial plan.
    pub time_limit: Option<Duration>,
    pub durations: DurationEvaluators,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters { horizon: 3_600, time_limit: None, durations: DurationEvaluators::defaults() }
    }
}

/// The requested destination state of the VMs. A VM in none of the sets
/// keeps its current state.
#[derive(Debug, Clone, Default)]
pub struct NextStates {
    pub running: HashSet<VmId>,
    pub sleeping: HashSet<VmId>,
    pub killed: HashSet<VmId>,
    pub ready: HashSet<VmId>,
}

impl NextStates {
    pub fn new() -> Self {
        NextStates::default()
    }

    pub fn run(mut self, vm: VmId) -> Self {
        self.running.insert(vm);
        self
    }

    pub fn sleep(mut self, vm: VmId) -> Self {
        self.sleeping.insert(vm);
        self
    }

    pub fn kill(mut self, vm: VmId) -> Self {
        self.killed.insert(vm);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Running,
    Sleeping,
    Killed,
    Ready,
}

/// The temporal-resource formulation of one reconfiguration: every node and
/// VM lifecycle as integer variables and constraints posted to the external
/// solver, plus the machinery to turn a solution back into a
/// [`ReconfigurationPlan`].
///
/// One instance supports exactly one solve call; formulation state is owned
/// by that call and never shared.
pub struct ReconfigurationProblem<'a> {
    model: &'a Model,
    solver: &'a mut dyn SolverBackend,
    params: Parameters,
    registry: ConstraintRegistry,
    nodes: BiMap<NodeId, usize>,
    cost: VarId,
    node_transitions: Vec<NodeTransition>,
    vm_transitions: Vec<VmTransition>,
    vm_index: HashMap<VmId, usize>,
    allocations: HashMap<(VmId, ResourceId), VarId>,
    packing: Option<Packing>,
    objective: Rc<RefCell<MinMttr>>,
}

impl<'a> ReconfigurationProblem<'a> {
    /// Builds every variable and constraint of the formulation. All
    /// durations are evaluated here, so a missing evaluator aborts before
    /// any solving starts.
    pub fn new(
        model: &'a Model,
        next: &NextStates,
        params: Parameters,
        registry: ConstraintRegistry,
        solver: &'a mut dyn SolverBackend,
    ) -> Result<Self> {
        let mapping = model.mapping();

        for vm in next.running.iter().chain(&next.sleeping).chain(&next.killed).chain(&next.ready) {
            if mapping.vm_state(vm).is_none() {
                return Err(Error::formulation(vm, "target state for a VM absent from the model"));
            }
        }

        // Deterministic orders keep variable names and indexes stable.
        let mut node_ids: Vec<NodeId> = mapping.all_nodes().cloned().collect();
        node_ids.sort();
        let mut vm_ids: Vec<VmId> = mapping.all_vms().cloned().collect();
        vm_ids.sort();

        if node_ids.is_empty() && !vm_ids.is_empty() {
            return Err(Error::formulation(&vm_ids[0], "no node can host any VM"));
        }

        let mut nodes = BiMap::new();
        for (i, n) in node_ids.iter().enumerate() {
            nodes.insert(n.clone(), i);
        }

        let plan_start = solver.declare_int("globalStart", 0, 0);
        let cost = solver.declare_int("globalCost", 0, params.horizon);
        let objective = Rc::new(RefCell::new(MinMttr::new(cost)));

        let hosted_counts: Vec<VarId> =
            node_ids.iter().map(|n| solver.declare_int(&format!("hostedCount({})", n), 0, vm_ids.len() as i64)).collect();

        let mut node_transitions = Vec::with_capacity(node_ids.len());
        for (i, n) in node_ids.iter().enumerate() {
            let t = if mapping.is_online(n) {
                let d = params.durations.evaluate(model, ActionKind::ShutdownNode, &Subject::Node(n.clone()))?;
                NodeTransition::Shutdownable(ShutdownableNode::build(solver, n, d, params.horizon, plan_start, cost, hosted_counts[i])?)
            } else {
                let d = params.durations.evaluate(model, ActionKind::BootNode, &Subject::Node(n.clone()))?;
                NodeTransition::Bootable(BootableNode::build(solver, n, d, params.horizon, cost, hosted_counts[i])?)
            };
            objective.borrow_mut().track_end(t.end_var());
            node_transitions.push(t);
        }
        let hosting_starts: Vec<VarId> = node_transitions.iter().map(NodeTransition::hosting_start).collect();
        let hosting_ends: Vec<VarId> = node_transitions.iter().map(NodeTransition::hosting_end).collect();

        let mut vm_transitions = Vec::new();
        let mut vm_index = HashMap::new();
        for vm in &vm_ids {
            let Some(current) = mapping.vm_state(vm) else {
                continue;
            };
            let target = resolve_target(next, vm, current)?;
            let transition = build_vm_transition(
                model,
                &params,
                solver,
                &nodes,
                vm,
                current,
                target,
                node_ids.len(),
                &hosting_starts,
                &hosting_ends,
            )?;
            if let Some(t) = transition {
                if let Some(end) = t.end_var() {
                    objective.borrow_mut().track_end(end);
                }
                vm_index.insert(vm.clone(), vm_transitions.len());
                vm_transitions.push(t);
            }
        }

        // Whatever is hosted somewhere in the destination state is counted
        // there; an offline node must count zero.
        let occupiers: Vec<(VmId, VarId)> =
            vm_transitions.iter().filter_map(|t| t.occupying_hoster().map(|h| (t.vm().clone(), h))).collect();
        let occupier_hosters: Vec<VarId> = occupiers.iter().map(|(_, h)| *h).collect();
        for (i, n) in node_ids.iter().enumerate() {
            solver
                .post(Constraint::Count { result: hosted_counts[i], vars: occupier_hosters.clone(), value: i as i64 })
                .map_err(|e| Error::formulation(n, e))?;
        }

        // One packing declaration per attached dimension, over the same
        // VM order for sizes and bins.
        let mut dims: Vec<&ShareableResource> = model.resources().collect();
        dims.sort_by(|a, b| a.id().cmp(b.id()));
        let mut packing = Packing::new();
        let mut allocations = HashMap::new();
        for rc in dims {
            let max_cap = node_ids.iter().map(|n| rc.capacity(n)).max().unwrap_or(0);
            let loads: Vec<VarId> =
                node_ids.iter().map(|n| solver.declare_int(&format!("load({}, {})", rc.id(), n), 0, rc.capacity(n))).collect();
            let mut sizes = Vec::with_capacity(occupiers.len());
            let mut bins = Vec::with_capacity(occupiers.len());
            for (vm, hoster) in &occupiers {
                let demand = rc.demand(vm);
                let alloc = solver.declare_int(&format!("allocation({}, {})", vm, rc.id()), demand, demand.max(max_cap));
                allocations.insert((vm.clone(), rc.id().clone()), alloc);
                sizes.push(alloc);
                bins.push(*hoster);
            }
            packing.add_dim(rc.id().clone(), loads, sizes, bins);
        }

        Ok(ReconfigurationProblem {
            model,
            solver,
            params,
            registry,
            nodes,
            cost,
            node_transitions,
            vm_transitions,
            vm_index,
            allocations,
            packing: Some(packing),
            objective,
        })
    }

    /// Applies placement side constraints through the injected registry.
    pub fn apply_constraints(&mut self, cstrs: &[SatConstraint]) -> Result<()> {
        for c in cstrs {
            let builder = self.registry.builder_for(c.kind()).ok_or_else(|| Error::MissingConstraintBuilder(c.kind().to_string()))?;
            builder(self, c)?;
        }
        Ok(())
    }

    /// Issues the single solve request this formulation supports and maps
    /// the outcome: a plan, [`Error::Infeasible`], or [`Error::Timeout`].
    pub fn solve(&mut self) -> Result<ReconfigurationPlan> {
        let packing = self
            .packing
            .take()
            .ok_or_else(|| Error::formulation("problem", "a formulation supports exactly one solve call"))?;
        packing.commit(self.solver)?;

        let entries: Vec<VmStartEntry> = self
            .vm_transitions
            .iter()
            .filter_map(|t| t.search_slice().map(|(s, origin)| VmStartEntry { vm: s.vm.clone(), hoster: s.hoster, start: s.start, origin }))
            .collect();
        let mut strategy = OnStableNodeFirst::new(entries, self.nodes.len(), self.objective.clone());

        log::info!(
            "Solving: {} node transitions, {} VM transitions, horizon {}",
            self.node_transitions.len(),
            self.vm_transitions.len(),
            self.params.horizon
        );
        match self.solver.solve(&mut strategy, Some(self.cost), self.params.time_limit)? {
            SolveOutcome::Sat(sol) => self.build_plan(&sol),
            SolveOutcome::Infeasible => {
                log::info!("The solver proved the instance infeasible");
                Err(Error::Infeasible)
            }
            SolveOutcome::Timeout => {
                log::info!("No solution within the time limit");
                Err(Error::Timeout)
            }
        }
    }

    fn build_plan(&self, sol: &Solution) -> Result<ReconfigurationPlan> {
        let mut plan = ReconfigurationPlan::new(self.model.clone());
        for t in &self.node_transitions {
            t.insert_actions(sol, &mut plan)?;
        }
        for t in &self.vm_transitions {
            t.insert_actions(sol, &self.nodes, &mut plan)?;
        }
        self.insert_allocations(sol, &mut plan)?;

        // A failed replay is a formulation defect; never hand such a plan
        // to a caller.
        plan.destination_model()?;
        log::info!("Computed a plan: {} actions, duration {}", plan.len(), plan.duration());
        Ok(plan)
    }

    /// Emits one `Allocate` per VM whose solved reservation differs from
    /// its current one, applied once the VM sits on its destination host.
    fn insert_allocations(&self, sol: &Solution, plan: &mut ReconfigurationPlan) -> Result<()> {
        let mut entries: Vec<(&(VmId, ResourceId), &VarId)> = self.allocations.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        for ((vm, rc_id), var) in entries {
            let new_qty = sol.require(*var, vm)?;
            let rc = self.model.resource(rc_id).ok_or_else(|| Error::formulation(rc_id, "allocation for a detached dimension"))?;
            let old_qty = rc.demand(vm);
            if new_qty == old_qty {
                continue;
            }
            let idx = self.vm_index.get(vm).ok_or_else(|| Error::formulation(vm, "allocation for an unmodeled VM"))?;
            let transition = &self.vm_transitions[*idx];
            let hoster =
                transition.occupying_hoster().ok_or_else(|| Error::formulation(vm, "allocation for a VM without a destination host"))?;
            let host_idx = sol.require(hoster, vm)? as usize;
            let node =
                self.nodes.get_by_right(&host_idx).ok_or_else(|| Error::formulation(vm, format!("no node at index {}", host_idx)))?;

            let start = match transition {
                VmTransition::Relocatable(r) if sol.require(r.slice.hoster, vm)? as usize != r.origin_idx => {
                    sol.require(r.slice.end, vm)?
                }
                VmTransition::Boot(b) => sol.require(b.slice.end, vm)?,
                VmTransition::Resume(r) => sol.require(r.slice.end, vm)?,
                _ => 0,
            };
            let d = self.params.durations.evaluate(self.model, ActionKind::Allocate, &Subject::Vm(vm.clone()))?;
            plan.add(Action::Allocate {
                vm: vm.clone(),
                node: node.clone(),
                resource: rc_id.clone(),
                old_qty,
                new_qty,
                start,
                end: start + d,
            });
        }
        Ok(())
    }

    /// Posts a constraint, reporting failures against `subject`.
    pub fn post_for(&mut self, subject: impl std::fmt::Display, c: Constraint) -> Result<()> {
        self.solver.post(c).map_err(|e| Error::formulation(subject, e))
    }

    pub fn node_index_of(&self, node: &NodeId) -> Option<usize> {
        self.nodes.get_by_left(node).copied()
    }

    pub fn node_online_var(&self, node: &NodeId) -> Option<VarId> {
        let idx = self.nodes.get_by_left(node)?;
        Some(self.node_transitions[*idx].online_var())
    }

    /// The demand slice of a VM that may be (re)placed by the solver.
    pub fn slice_of(&self, vm: &VmId) -> Option<&Slice> {
        let idx = self.vm_index.get(vm)?;
        self.vm_transitions[*idx].search_slice().map(|(s, _)| s)
    }

    pub fn allocation_var(&self, vm: &VmId, resource: &ResourceId) -> Option<VarId> {
        self.allocations.get(&(vm.clone(), resource.clone())).copied()
    }

    pub fn cost(&self) -> VarId {
        self.cost
    }

    pub fn solver_mut(&mut self) -> &mut dyn SolverBackend {
        &mut *self.solver
    }
}

fn resolve_target(next: &NextStates, vm: &VmId, current: VmState) -> Result<Target> {
    let mut targets = Vec::new();
    if next.running.contains(vm) {
        targets.push(Target::Running);
    }
    if next.sleeping.contains(vm) {
        targets.push(Target::Sleeping);
    }
    if next.killed.contains(vm) {
        targets.push(Target::Killed);
    }
    if next.ready.contains(vm) {
        targets.push(Target::Ready);
    }
    if targets.len() > 1 {
        return Err(Error::formulation(vm, "conflicting target states"));
    }
    Ok(targets.pop().unwrap_or(match current {
        VmState::Running => Target::Running,
        VmState::Sleeping => Target::Sleeping,
        VmState::Ready => Target::Ready,
    }))
}

#[allow(clippy::too_many_arguments)]
fn build_vm_transition(
    model: &Model,
    params: &Parameters,
    solver: &mut dyn SolverBackend,
    nodes: &BiMap<NodeId, usize>,
    vm: &VmId,
    current: VmState,
    target: Target,
    node_count: usize,
    hosting_starts: &[VarId],
    hosting_ends: &[VarId],
) -> Result<Option<VmTransition>> {
    let host_and_index = |vm: &VmId| -> Result<(NodeId, usize)> {
        let host = model.mapping().host_of(vm).ok_or_else(|| Error::formulation(vm, "a hosted VM without a host"))?;
        let idx = nodes.get_by_left(host).ok_or_else(|| Error::formulation(host, "host absent from the node index"))?;
        Ok((host.clone(), *idx))
    };

    let t = match (current, target) {
        (VmState::Running, Target::Running) => {
            let (origin, origin_idx) = host_and_index(vm)?;
            let d = params.durations.evaluate(model, ActionKind::MigrateVm, &Subject::Vm(vm.clone()))?;
            Some(VmTransition::Relocatable(RelocatableVm::build(
                solver,
                vm,
                &origin,
                origin_idx,
                node_count,
                d,
                params.horizon,
                hosting_starts,
                hosting_ends,
            )?))
        }
        (VmState::Ready, Target::Running) => {
            let d = params.durations.evaluate(model, ActionKind::BootVm, &Subject::Vm(vm.clone()))?;
            Some(VmTransition::Boot(BootVmTransition::build(solver, vm, node_count, d, params.horizon, hosting_starts, hosting_ends)?))
        }
        (VmState::Sleeping, Target::Running) => {
            let (node, idx) = host_and_index(vm)?;
            let d = params.durations.evaluate(model, ActionKind::ResumeVm, &Subject::Vm(vm.clone()))?;
            Some(VmTransition::Resume(ResumeVmTransition::build(
                solver,
                vm,
                &node,
                idx,
                d,
                params.horizon,
                hosting_starts,
                hosting_ends,
            )?))
        }
        (VmState::Running, Target::Sleeping) => {
            let (node, idx) = host_and_index(vm)?;
            let d = params.durations.evaluate(model, ActionKind::SuspendVm, &Subject::Vm(vm.clone()))?;
            Some(VmTransition::Suspend(SuspendVmTransition::build(solver, vm, &node, idx, d, params.horizon, hosting_ends)?))
        }
        (VmState::Sleeping, Target::Sleeping) => {
            let (node, idx) = host_and_index(vm)?;
            Some(VmTransition::StaySleeping(SleepingVm::build(solver, vm, &node, idx)))
        }
        (VmState::Running | VmState::Sleeping, Target::Killed) => {
            let (node, _) = host_and_index(vm)?;
            let d = params.durations.evaluate(model, ActionKind::KillVm, &Subject::Vm(vm.clone()))?;
            Some(VmTransition::Kill(KillVmTransition::build(solver, vm, &node, d, params.horizon)?))
        }
        (VmState::Ready, Target::Ready) => None,
        (VmState::Running | VmState::Sleeping, Target::Ready) => {
            return Err(Error::formulation(vm, "the action set cannot send a hosted VM back to ready"));
        }
        (VmState::Ready, Target::Sleeping) => {
            return Err(Error::formulation(vm, "a ready VM cannot be put to sleep in one step"));
        }
        (VmState::Ready, Target::Killed) => {
            return Err(Error::formulation(vm, "a ready VM occupies no node to be killed on"));
        }
    };
    Ok(t)
}
