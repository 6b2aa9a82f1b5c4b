use crate::error::Result;
use crate::solver::backend::{Constraint, SolverBackend, VarId};

/// The completion-time objective: minimize the maximum end time over all
/// actions.
///
/// The bounds tying every action end to the cost variable are deliberately
/// not posted while the search still assigns placements; the heuristic
/// signals the hand-off to the scheduling phase through
/// [`MinMttr::post_cost_constraints`]. Posting is idempotent.
pub struct MinMttr {
    cost: VarId,
    ends: Vec<VarId>,
    posted: bool,
}

impl MinMttr {
    pub fn new(cost: VarId) -> Self {
        MinMttr { cost, ends: Vec::new(), posted: false }
    }

    pub fn cost(&self) -> VarId {
        self.cost
    }

    /// Registers the end moment of one transition.
    pub fn track_end(&mut self, end: VarId) {
        self.ends.push(end);
    }

    pub fn post_cost_constraints(&mut self, solver: &mut dyn SolverBackend) -> Result<()> {
        if self.posted {
            return Ok(());
        }
        for end in &self.ends {
            solver.post(Constraint::Leq(*end, self.cost))?;
        }
        self.posted = true;
        log::debug!("Posted completion-time bounds over {} transition ends", self.ends.len());
        Ok(())
    }
}
