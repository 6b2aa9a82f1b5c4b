use serde::Serialize;
use std::fmt;

use crate::error::Result;
use crate::model::model::Model;
use crate::plan::action::Action;

/// A time-annotated reconfiguration: the source model plus the actions that
/// transform it.
///
/// The insertion order of actions carries no meaning; the temporal order is
/// derived from their start and end times.
#[derive(Debug, Clone, Serialize)]
pub struct ReconfigurationPlan {
    source: Model,
    actions: Vec<Action>,
}

impl ReconfigurationPlan {
    pub fn new(source: Model) -> Self {
        ReconfigurationPlan { source, actions: Vec::new() }
    }

    pub fn source(&self) -> &Model {
        &self.source
    }

    /// Appends an action.
    ///
    /// # Returns
    /// `false` if the action is structurally malformed (negative moment,
    /// `start > end`, migration onto its own source); the plan is left
    /// untouched.
    pub fn add(&mut self, action: Action) -> bool {
        if !action.is_well_formed() {
            log::warn!("Rejecting malformed action '{}'", action);
            return false;
        }
        self.actions.push(action);
        true
    }

    /// The actions in insertion order.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// The completion time of the plan: the maximum action end, 0 when the
    /// plan is empty.
    pub fn duration(&self) -> i64 {
        self.actions.iter().map(Action::end).max().unwrap_or(0)
    }

    /// Replays every action's terminal effect against a copy of the source
    /// model, in non-decreasing start-time order (ties in insertion order:
    /// same-instant actions touch disjoint subjects by construction).
    ///
    /// Fails fast on the first precondition violation, which indicates a
    /// defect in whatever formulated the plan.
    pub fn destination_model(&self) -> Result<Model> {
        let mut order: Vec<usize> = (0..self.actions.len()).collect();
        order.sort_by_key(|i| self.actions[*i].start());

        let mut result = self.source.clone();
        for i in order {
            self.actions[i].apply(&mut result)?;
        }
        Ok(result)
    }
}

impl fmt::Display for ReconfigurationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut order: Vec<&Action> = self.actions.iter().collect();
        order.sort_by_key(|a| (a.start(), a.end()));
        for a in order {
            writeln!(f, "{}:{} {}", a.start(), a.end(), a)?;
        }
        Ok(())
    }
}
