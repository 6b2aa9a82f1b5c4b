use crate::error::{Error, Result};
use crate::model::id::NodeId;
use crate::plan::action::Action;
use crate::plan::plan::ReconfigurationPlan;
use crate::solver::backend::{Constraint, SolverBackend, Solution, VarId};

/// The modeled lifecycle of one node over the plan horizon.
#[derive(Debug)]
pub enum NodeTransition {
    Shutdownable(ShutdownableNode),
    Bootable(BootableNode),
}

impl NodeTransition {
    pub fn node(&self) -> &NodeId {
        match self {
            NodeTransition::Shutdownable(t) => &t.node,
            NodeTransition::Bootable(t) => &t.node,
        }
    }

    pub fn online_var(&self) -> VarId {
        match self {
            NodeTransition::Shutdownable(t) => t.is_online,
            NodeTransition::Bootable(t) => t.is_online,
        }
    }

    pub fn end_var(&self) -> VarId {
        match self {
            NodeTransition::Shutdownable(t) => t.end,
            NodeTransition::Bootable(t) => t.end,
        }
    }

    /// The moment from which the node can host VMs.
    pub fn hosting_start(&self) -> VarId {
        match self {
            NodeTransition::Shutdownable(t) => t.hosting_start,
            NodeTransition::Bootable(t) => t.hosting_start,
        }
    }

    /// The moment until which the node can host VMs.
    pub fn hosting_end(&self) -> VarId {
        match self {
            NodeTransition::Shutdownable(t) => t.hosting_end,
            NodeTransition::Bootable(t) => t.hosting_end,
        }
    }

    pub fn insert_actions(&self, sol: &Solution, plan: &mut ReconfigurationPlan) -> Result<()> {
        match self {
            NodeTransition::Shutdownable(t) => t.insert_actions(sol, plan),
            NodeTransition::Bootable(t) => t.insert_actions(sol, plan),
        }
    }
}

/// An online node that may stay online or go offline.
///
/// `is_online = 0` forces the hosted-VM count to 0 at the end of the
/// transition. The duration is 0 exactly when the node keeps its state.
/// The node can host VMs from the global start until the action start if it
/// shuts down, or until the global end if it stays online; the choice is an
/// element constraint over `{start, global_end}` indexed by `is_online`.
#[derive(Debug)]
pub struct ShutdownableNode {
    pub node: NodeId,
    pub is_online: VarId,
    pub duration: VarId,
    pub start: VarId,
    pub end: VarId,
    pub hosting_start: VarId,
    pub hosting_end: VarId,
}

impl ShutdownableNode {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        solver: &mut dyn SolverBackend,
        node: &NodeId,
        duration_estimate: i64,
        horizon: i64,
        plan_start: VarId,
        global_end: VarId,
        hosted_count: VarId,
    ) -> Result<Self> {
        let is_online = solver.declare_bool(&format!("shutdownable({}).online", node));
        let duration = solver.declare_sparse(&format!("shutdownable({}).duration", node), &[0, duration_estimate]);
        let start = solver.declare_int(&format!("shutdownable({}).start", node), 0, horizon);
        let end = solver.declare_int(&format!("shutdownable({}).end", node), 0, horizon);
        let hosting_end = solver.declare_int(&format!("shutdownable({}).hostingEnd", node), 0, horizon);

        let post = |solver: &mut dyn SolverBackend, c: Constraint| {
            solver.post(c).map_err(|e| Error::formulation(node, e))
        };

        // Offline at the end of the transition means nothing hosted anymore.
        post(solver, Constraint::ImpliesEq { guard: is_online, guard_value: 0, var: hosted_count, value: 0 })?;
        if duration_estimate > 0 {
            post(solver, Constraint::IffEq { guard: is_online, var: duration, value: 0 })?;
        }
        post(solver, Constraint::SumEq { a: start, b: duration, result: end })?;
        post(solver, Constraint::Element { result: hosting_end, table: vec![start, global_end], index: is_online })?;

        Ok(ShutdownableNode { node: node.clone(), is_online, duration, start, end, hosting_start: plan_start, hosting_end })
    }

    pub fn insert_actions(&self, sol: &Solution, plan: &mut ReconfigurationPlan) -> Result<()> {
        if sol.require(self.is_online, &self.node)? == 0 {
            let start = sol.require(self.hosting_end, &self.node)?;
            let end = sol.require(self.end, &self.node)?;
            plan.add(Action::ShutdownNode { node: self.node.clone(), start, end });
        }
        Ok(())
    }
}

/// An offline node that may stay offline or come online.
///
/// Symmetric to [`ShutdownableNode`]: the duration is 0 exactly when the
/// node stays offline, and the node can host VMs from the transition end
/// (never, if it stays offline) until the global end.
#[derive(Debug)]
pub struct BootableNode {
    pub node: NodeId,
    pub is_online: VarId,
    pub duration: VarId,
    pub start: VarId,
    pub end: VarId,
    pub hosting_start: VarId,
    pub hosting_end: VarId,
}

impl BootableNode {
    pub fn build(
        solver: &mut dyn SolverBackend,
        node: &NodeId,
        duration_estimate: i64,
        horizon: i64,
        global_end: VarId,
        hosted_count: VarId,
    ) -> Result<Self> {
        let is_online = solver.declare_bool(&format!("bootable({}).online", node));
        let duration = solver.declare_sparse(&format!("bootable({}).duration", node), &[0, duration_estimate]);
        let start = solver.declare_int(&format!("bootable({}).start", node), 0, horizon);
        let end = solver.declare_int(&format!("bootable({}).end", node), 0, horizon);
        let hosting_start = solver.declare_int(&format!("bootable({}).hostingStart", node), 0, horizon);

        let post = |solver: &mut dyn SolverBackend, c: Constraint| {
            solver.post(c).map_err(|e| Error::formulation(node, e))
        };

        post(solver, Constraint::ImpliesEq { guard: is_online, guard_value: 0, var: hosted_count, value: 0 })?;
        if duration_estimate > 0 {
            post(solver, Constraint::IffEq { guard: is_online, var: duration, value: duration_estimate })?;
        }
        post(solver, Constraint::SumEq { a: start, b: duration, result: end })?;
        // Staying offline pushes the hosting window start to the global
        // end, leaving it empty.
        post(solver, Constraint::Element { result: hosting_start, table: vec![global_end, end], index: is_online })?;

        Ok(BootableNode { node: node.clone(), is_online, duration, start, end, hosting_start, hosting_end: global_end })
    }

    pub fn insert_actions(&self, sol: &Solution, plan: &mut ReconfigurationPlan) -> Result<()> {
        if sol.require(self.is_online, &self.node)? == 1 {
            let start = sol.require(self.start, &self.node)?;
            let end = sol.require(self.end, &self.node)?;
            plan.add(Action::BootNode { node: self.node.clone(), start, end });
        }
        Ok(())
    }
}
