use bimap::BiMap;

use crate::error::{Error, Result};
use crate::model::id::{NodeId, VmId};
use crate::plan::action::Action;
use crate::plan::plan::ReconfigurationPlan;
use crate::solver::backend::{Constraint, SolverBackend, Solution, VarId};
use crate::solver::slice::Slice;

/// The modeled lifecycle of one VM over the plan horizon, one variant per
/// (current state, target state) pair the action set can express.
#[derive(Debug)]
pub enum VmTransition {
    /// running -> running, on the same or another node.
    Relocatable(RelocatableVm),
    /// ready -> running.
    Boot(BootVmTransition),
    /// sleeping -> running, same node.
    Resume(ResumeVmTransition),
    /// running -> sleeping, same node.
    Suspend(SuspendVmTransition),
    /// running or sleeping -> destroyed.
    Kill(KillVmTransition),
    /// sleeping -> sleeping; no action, but the VM keeps occupying its
    /// host.
    StaySleeping(SleepingVm),
}

impl VmTransition {
    pub fn vm(&self) -> &VmId {
        match self {
            VmTransition::Relocatable(t) => &t.vm,
            VmTransition::Boot(t) => &t.vm,
            VmTransition::Resume(t) => &t.vm,
            VmTransition::Suspend(t) => &t.vm,
            VmTransition::Kill(t) => &t.vm,
            VmTransition::StaySleeping(t) => &t.vm,
        }
    }

    /// The hoster variable of every transition whose VM occupies a node in
    /// the destination state; feeds the per-node counting and packing.
    pub fn occupying_hoster(&self) -> Option<VarId> {
        match self {
            VmTransition::Relocatable(t) => Some(t.slice.hoster),
            VmTransition::Boot(t) => Some(t.slice.hoster),
            VmTransition::Resume(t) => Some(t.slice.hoster),
            VmTransition::Suspend(t) => Some(t.slice.hoster),
            VmTransition::StaySleeping(t) => Some(t.hoster),
            VmTransition::Kill(_) => None,
        }
    }

    /// The demand slice driving the placement search, with the index of the
    /// node the VM comes from (`None` for a VM with no current host).
    pub fn search_slice(&self) -> Option<(&Slice, Option<usize>)> {
        match self {
            VmTransition::Relocatable(t) => Some((&t.slice, Some(t.origin_idx))),
            VmTransition::Boot(t) => Some((&t.slice, None)),
            VmTransition::Resume(t) => Some((&t.slice, Some(t.node_idx))),
            VmTransition::Suspend(_) | VmTransition::Kill(_) | VmTransition::StaySleeping(_) => None,
        }
    }

    pub fn end_var(&self) -> Option<VarId> {
        match self {
            VmTransition::Relocatable(t) => Some(t.slice.end),
            VmTransition::Boot(t) => Some(t.slice.end),
            VmTransition::Resume(t) => Some(t.slice.end),
            VmTransition::Suspend(t) => Some(t.slice.end),
            VmTransition::Kill(t) => Some(t.end),
            VmTransition::StaySleeping(_) => None,
        }
    }

    pub fn insert_actions(&self, sol: &Solution, nodes: &BiMap<NodeId, usize>, plan: &mut ReconfigurationPlan) -> Result<()> {
        match self {
            VmTransition::Relocatable(t) => t.insert_actions(sol, nodes, plan),
            VmTransition::Boot(t) => t.insert_actions(sol, nodes, plan),
            VmTransition::Resume(t) => t.insert_actions(sol, plan),
            VmTransition::Suspend(t) => t.insert_actions(sol, plan),
            VmTransition::Kill(t) => t.insert_actions(sol, plan),
            VmTransition::StaySleeping(_) => Ok(()),
        }
    }
}

/// Ties a free slice to the hosting window of whatever node its hoster
/// variable selects, through element constraints over the window tables.
fn couple_hosting_window(
    solver: &mut dyn SolverBackend,
    vm: &VmId,
    slice: &Slice,
    hosting_starts: &[VarId],
    hosting_ends: &[VarId],
    horizon: i64,
) -> Result<()> {
    let post = |solver: &mut dyn SolverBackend, c: Constraint| solver.post(c).map_err(|e| Error::formulation(vm, e));

    let dst_start = solver.declare_int(&format!("slice({}).hostingStart", vm), 0, horizon);
    post(solver, Constraint::Element { result: dst_start, table: hosting_starts.to_vec(), index: slice.hoster })?;
    post(solver, Constraint::Leq(dst_start, slice.start))?;

    let dst_end = solver.declare_int(&format!("slice({}).hostingEnd", vm), 0, horizon);
    post(solver, Constraint::Element { result: dst_end, table: hosting_ends.to_vec(), index: slice.hoster })?;
    post(solver, Constraint::Leq(slice.end, dst_end))?;
    Ok(())
}

/// A running VM that may stay where it is or be migrated. The migration
/// duration applies exactly when the chosen host differs from the origin.
#[derive(Debug)]
pub struct RelocatableVm {
    pub vm: VmId,
    pub origin: NodeId,
    pub origin_idx: usize,
    pub slice: Slice,
    pub duration: VarId,
    pub stay: VarId,
}

impl RelocatableVm {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        solver: &mut dyn SolverBackend,
        vm: &VmId,
        origin: &NodeId,
        origin_idx: usize,
        node_count: usize,
        duration_estimate: i64,
        horizon: i64,
        hosting_starts: &[VarId],
        hosting_ends: &[VarId],
    ) -> Result<Self> {
        let hoster = solver.declare_int(&format!("relocatable({}).hoster", vm), 0, node_count as i64 - 1);
        let start = solver.declare_int(&format!("relocatable({}).start", vm), 0, horizon);
        let end = solver.declare_int(&format!("relocatable({}).end", vm), 0, horizon);
        let duration = solver.declare_sparse(&format!("relocatable({}).duration", vm), &[0, duration_estimate]);
        let stay = solver.declare_bool(&format!("relocatable({}).stay", vm));

        let post = |solver: &mut dyn SolverBackend, c: Constraint| solver.post(c).map_err(|e| Error::formulation(vm, e));

        post(solver, Constraint::IffEq { guard: stay, var: hoster, value: origin_idx as i64 })?;
        if duration_estimate > 0 {
            post(solver, Constraint::IffEq { guard: stay, var: duration, value: 0 })?;
        }
        post(solver, Constraint::SumEq { a: start, b: duration, result: end })?;

        let slice = Slice { vm: vm.clone(), start, end, hoster };
        couple_hosting_window(solver, vm, &slice, hosting_starts, hosting_ends, horizon)?;

        Ok(RelocatableVm { vm: vm.clone(), origin: origin.clone(), origin_idx, slice, duration, stay })
    }

    pub fn insert_actions(&self, sol: &Solution, nodes: &BiMap<NodeId, usize>, plan: &mut ReconfigurationPlan) -> Result<()> {
        let chosen = sol.require(self.slice.hoster, &self.vm)? as usize;
        if chosen == self.origin_idx {
            return Ok(());
        }
        let to = nodes.get_by_right(&chosen).ok_or_else(|| Error::formulation(&self.vm, format!("no node at index {}", chosen)))?;
        plan.add(Action::MigrateVm {
            vm: self.vm.clone(),
            from: self.origin.clone(),
            to: to.clone(),
            start: sol.require(self.slice.start, &self.vm)?,
            end: sol.require(self.slice.end, &self.vm)?,
        });
        Ok(())
    }
}

/// A ready VM that must be running in the destination state.
#[derive(Debug)]
pub struct BootVmTransition {
    pub vm: VmId,
    pub slice: Slice,
    pub duration: VarId,
}

impl BootVmTransition {
    pub fn build(
        solver: &mut dyn SolverBackend,
        vm: &VmId,
        node_count: usize,
        duration_estimate: i64,
        horizon: i64,
        hosting_starts: &[VarId],
        hosting_ends: &[VarId],
    ) -> Result<Self> {
        let hoster = solver.declare_int(&format!("bootVm({}).hoster", vm), 0, node_count as i64 - 1);
        let start = solver.declare_int(&format!("bootVm({}).start", vm), 0, horizon);
        let end = solver.declare_int(&format!("bootVm({}).end", vm), 0, horizon);
        let duration = solver.declare_int(&format!("bootVm({}).duration", vm), duration_estimate, duration_estimate);

        solver
            .post(Constraint::SumEq { a: start, b: duration, result: end })
            .map_err(|e| Error::formulation(vm, e))?;

        let slice = Slice { vm: vm.clone(), start, end, hoster };
        couple_hosting_window(solver, vm, &slice, hosting_starts, hosting_ends, horizon)?;

        Ok(BootVmTransition { vm: vm.clone(), slice, duration })
    }

    pub fn insert_actions(&self, sol: &Solution, nodes: &BiMap<NodeId, usize>, plan: &mut ReconfigurationPlan) -> Result<()> {
        let chosen = sol.require(self.slice.hoster, &self.vm)? as usize;
        let node = nodes.get_by_right(&chosen).ok_or_else(|| Error::formulation(&self.vm, format!("no node at index {}", chosen)))?;
        plan.add(Action::BootVm {
            vm: self.vm.clone(),
            node: node.clone(),
            start: sol.require(self.slice.start, &self.vm)?,
            end: sol.require(self.slice.end, &self.vm)?,
        });
        Ok(())
    }
}

/// A sleeping VM that must be running again, necessarily on its current
/// host.
#[derive(Debug)]
pub struct ResumeVmTransition {
    pub vm: VmId,
    pub node: NodeId,
    pub node_idx: usize,
    pub slice: Slice,
    pub duration: VarId,
}

impl ResumeVmTransition {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        solver: &mut dyn SolverBackend,
        vm: &VmId,
        node: &NodeId,
        node_idx: usize,
        duration_estimate: i64,
        horizon: i64,
        hosting_starts: &[VarId],
        hosting_ends: &[VarId],
    ) -> Result<Self> {
        let hoster = solver.declare_int(&format!("resume({}).hoster", vm), node_idx as i64, node_idx as i64);
        let start = solver.declare_int(&format!("resume({}).start", vm), 0, horizon);
        let end = solver.declare_int(&format!("resume({}).end", vm), 0, horizon);
        let duration = solver.declare_int(&format!("resume({}).duration", vm), duration_estimate, duration_estimate);

        let post = |solver: &mut dyn SolverBackend, c: Constraint| solver.post(c).map_err(|e| Error::formulation(vm, e));

        post(solver, Constraint::SumEq { a: start, b: duration, result: end })?;
        // The host is known: couple the window directly.
        post(solver, Constraint::Leq(hosting_starts[node_idx], start))?;
        post(solver, Constraint::Leq(end, hosting_ends[node_idx]))?;

        Ok(ResumeVmTransition { vm: vm.clone(), node: node.clone(), node_idx, slice: Slice { vm: vm.clone(), start, end, hoster }, duration })
    }

    pub fn insert_actions(&self, sol: &Solution, plan: &mut ReconfigurationPlan) -> Result<()> {
        plan.add(Action::ResumeVm {
            vm: self.vm.clone(),
            node: self.node.clone(),
            start: sol.require(self.slice.start, &self.vm)?,
            end: sol.require(self.slice.end, &self.vm)?,
        });
        Ok(())
    }
}

/// A running VM that must be sleeping, on its current host.
#[derive(Debug)]
pub struct SuspendVmTransition {
    pub vm: VmId,
    pub node: NodeId,
    pub node_idx: usize,
    pub slice: Slice,
    pub duration: VarId,
}

impl SuspendVmTransition {
    pub fn build(
        solver: &mut dyn SolverBackend,
        vm: &VmId,
        node: &NodeId,
        node_idx: usize,
        duration_estimate: i64,
        horizon: i64,
        hosting_ends: &[VarId],
    ) -> Result<Self> {
        let hoster = solver.declare_int(&format!("suspend({}).hoster", vm), node_idx as i64, node_idx as i64);
        let start = solver.declare_int(&format!("suspend({}).start", vm), 0, horizon);
        let end = solver.declare_int(&format!("suspend({}).end", vm), 0, horizon);
        let duration = solver.declare_int(&format!("suspend({}).duration", vm), duration_estimate, duration_estimate);

        let post = |solver: &mut dyn SolverBackend, c: Constraint| solver.post(c).map_err(|e| Error::formulation(vm, e));

        post(solver, Constraint::SumEq { a: start, b: duration, result: end })?;
        // The sleeping VM keeps its host busy after the action.
        post(solver, Constraint::Leq(end, hosting_ends[node_idx]))?;

        Ok(SuspendVmTransition { vm: vm.clone(), node: node.clone(), node_idx, slice: Slice { vm: vm.clone(), start, end, hoster }, duration })
    }

    pub fn insert_actions(&self, sol: &Solution, plan: &mut ReconfigurationPlan) -> Result<()> {
        plan.add(Action::SuspendVm {
            vm: self.vm.clone(),
            node: self.node.clone(),
            start: sol.require(self.slice.start, &self.vm)?,
            end: sol.require(self.slice.end, &self.vm)?,
        });
        Ok(())
    }
}

/// A hosted VM that must be destroyed. Its resources are freed at the
/// action start.
#[derive(Debug)]
pub struct KillVmTransition {
    pub vm: VmId,
    pub node: NodeId,
    pub start: VarId,
    pub end: VarId,
    pub duration: VarId,
}

impl KillVmTransition {
    pub fn build(solver: &mut dyn SolverBackend, vm: &VmId, node: &NodeId, duration_estimate: i64, horizon: i64) -> Result<Self> {
        let start = solver.declare_int(&format!("kill({}).start", vm), 0, horizon);
        let end = solver.declare_int(&format!("kill({}).end", vm), 0, horizon);
        let duration = solver.declare_int(&format!("kill({}).duration", vm), duration_estimate, duration_estimate);

        solver
            .post(Constraint::SumEq { a: start, b: duration, result: end })
            .map_err(|e| Error::formulation(vm, e))?;

        Ok(KillVmTransition { vm: vm.clone(), node: node.clone(), start, end, duration })
    }

    pub fn insert_actions(&self, sol: &Solution, plan: &mut ReconfigurationPlan) -> Result<()> {
        plan.add(Action::KillVm {
            vm: self.vm.clone(),
            node: self.node.clone(),
            start: sol.require(self.start, &self.vm)?,
            end: sol.require(self.end, &self.vm)?,
        });
        Ok(())
    }
}

/// A sleeping VM that stays sleeping: no action, but its host must keep it.
#[derive(Debug)]
pub struct SleepingVm {
    pub vm: VmId,
    pub node: NodeId,
    pub hoster: VarId,
}

impl SleepingVm {
    pub fn build(solver: &mut dyn SolverBackend, vm: &VmId, node: &NodeId, node_idx: usize) -> Self {
        let hoster = solver.declare_int(&format!("sleeping({}).hoster", vm), node_idx as i64, node_idx as i64);
        SleepingVm { vm: vm.clone(), node: node.clone(), hoster }
    }
}
