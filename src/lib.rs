use crate::error::Result;
use crate::model::Model;
use crate::plan::ReconfigurationPlan;
use crate::solver::backend::SolverBackend;
use crate::solver::constraint::{ConstraintRegistry, SatConstraint};
use crate::solver::problem::{NextStates, Parameters, ReconfigurationProblem};

pub mod error;
pub mod logger;
pub mod model;
pub mod plan;
pub mod solver;

/// Computes a reconfiguration plan moving `model` into a state where every
/// VM is in the state requested by `next` and every constraint in `cstrs`
/// holds, using `backend` as the constraint solver.
///
/// This is the all-defaults entry point: the default constraint registry and
/// the default duration evaluators. Callers needing custom builders or
/// durations assemble a [`ReconfigurationProblem`] themselves.
pub fn plan_reconfiguration(
    model: &Model,
    next: &NextStates,
    cstrs: &[SatConstraint],
    params: Parameters,
    backend: &mut dyn SolverBackend,
) -> Result<ReconfigurationPlan> {
    let registry = ConstraintRegistry::defaults();
    let mut problem = ReconfigurationProblem::new(model, next, params, registry, backend)?;
    problem.apply_constraints(cstrs)?;
    problem.solve()
}
