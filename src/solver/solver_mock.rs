use slotmap::SlotMap;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::solver::backend::{Constraint, DomainView, SearchStrategy, SolveOutcome, Solution, SolverBackend, VarId};

#[derive(Debug, Clone)]
struct VarState {
    name: String,
    lb: i64,
    ub: i64,
    assigned: Option<i64>,
}

/// The outcome a [`MockSolver`] is scripted to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedOutcome {
    Sat,
    Infeasible,
    Timeout,
}

/// A scriptable stand-in for the external constraint solver.
///
/// It records every declared variable and posted constraint so tests can
/// assert on the formulation, and "solves" by driving the given strategy to
/// exhaustion, assigning each selected variable its lower bound, then
/// assigning every remaining variable its scripted value or lower bound.
/// It does not propagate anything beyond the bound updates of `EqConst` and
/// `GeqConst`; tests that care about constraint semantics assert on the
/// posted constraints instead.
pub struct MockSolver {
    vars: SlotMap<VarId, VarState>,
    by_name: HashMap<String, VarId>,
    posted: Vec<Constraint>,
    scripted: HashMap<String, i64>,
    outcome: ScriptedOutcome,
    fail_posts_for: Option<String>,
    generation: u64,
}

impl MockSolver {
    pub fn new() -> Self {
        MockSolver {
            vars: SlotMap::with_key(),
            by_name: HashMap::new(),
            posted: Vec::new(),
            scripted: HashMap::new(),
            outcome: ScriptedOutcome::Sat,
            fail_posts_for: None,
            generation: 0,
        }
    }

    /// Pre-assigns the variable that will be declared under `name`.
    pub fn script_value(&mut self, name: impl Into<String>, value: i64) -> &mut Self {
        self.scripted.insert(name.into(), value);
        self
    }

    pub fn will_return(&mut self, outcome: ScriptedOutcome) -> &mut Self {
        self.outcome = outcome;
        self
    }

    /// Makes every `post` touching a variable whose name contains `needle`
    /// fail with a numeric contradiction.
    pub fn fail_posts_containing(&mut self, needle: impl Into<String>) -> &mut Self {
        self.fail_posts_for = Some(needle.into());
        self
    }

    pub fn var(&self, name: &str) -> Option<VarId> {
        self.by_name.get(name).copied()
    }

    pub fn posted(&self) -> &[Constraint] {
        &self.posted
    }

    pub fn has_var(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn name_of(&self, var: VarId) -> Option<&str> {
        self.vars.get(var).map(|v| v.name.as_str())
    }

    /// Assigns a value, as a search decision would.
    pub fn instantiate(&mut self, var: VarId, value: i64) {
        if let Some(state) = self.vars.get_mut(var) {
            state.assigned = Some(value);
            self.generation += 1;
        }
    }

    fn declare(&mut self, name: &str, lb: i64, ub: i64) -> VarId {
        let id = self.vars.insert(VarState { name: name.to_string(), lb, ub, assigned: None });
        if self.by_name.insert(name.to_string(), id).is_some() {
            log::warn!("Redeclared variable '{}'", name);
        }
        if let Some(v) = self.scripted.get(name).copied() {
            self.instantiate(id, v);
        }
        id
    }

    fn vars_of(c: &Constraint) -> Vec<VarId> {
        match c {
            Constraint::EqConst(v, _) | Constraint::GeqConst(v, _) | Constraint::NeqConst(v, _) | Constraint::Member(v, _) => vec![*v],
            Constraint::Leq(a, b) => vec![*a, *b],
            Constraint::SumEq { a, b, result } => vec![*a, *b, *result],
            Constraint::ImpliesEq { guard, var, .. } => vec![*guard, *var],
            Constraint::IffEq { guard, var, .. } => vec![*guard, *var],
            Constraint::Element { result, table, index } => {
                let mut vs = vec![*result, *index];
                vs.extend(table.iter().copied());
                vs
            }
            Constraint::Count { result, vars, .. } => {
                let mut vs = vec![*result];
                vs.extend(vars.iter().copied());
                vs
            }
            Constraint::Pack { loads, bins, .. } => loads.iter().chain(bins.iter()).copied().collect(),
        }
    }
}

impl Default for MockSolver {
    fn default() -> Self {
        MockSolver::new()
    }
}

impl DomainView for MockSolver {
    fn lower_bound(&self, var: VarId) -> i64 {
        let state = &self.vars[var];
        state.assigned.unwrap_or(state.lb)
    }

    fn upper_bound(&self, var: VarId) -> i64 {
        let state = &self.vars[var];
        state.assigned.unwrap_or(state.ub)
    }

    fn is_instantiated(&self, var: VarId) -> bool {
        let state = &self.vars[var];
        state.assigned.is_some() || state.lb == state.ub
    }

    fn generation(&self) -> u64 {
        self.generation
    }
}

impl SolverBackend for MockSolver {
    fn declare_int(&mut self, name: &str, lb: i64, ub: i64) -> VarId {
        self.declare(name, lb, ub)
    }

    fn declare_sparse(&mut self, name: &str, values: &[i64]) -> VarId {
        let lb = values.iter().copied().min().unwrap_or(0);
        let ub = values.iter().copied().max().unwrap_or(0);
        self.declare(name, lb, ub)
    }

    fn declare_bool(&mut self, name: &str) -> VarId {
        self.declare(name, 0, 1)
    }

    fn post(&mut self, constraint: Constraint) -> Result<()> {
        if let Some(needle) = &self.fail_posts_for {
            for v in Self::vars_of(&constraint) {
                if self.vars[v].name.contains(needle.as_str()) {
                    let name = self.vars[v].name.clone();
                    return Err(Error::formulation(name, "numeric contradiction"));
                }
            }
        }
        // Minimal bound handling, enough for sizes fixed to their lower
        // bound and lower bounds raised before packing commits.
        match &constraint {
            Constraint::EqConst(v, value) => {
                let state = &mut self.vars[*v];
                state.lb = *value;
                state.ub = *value;
            }
            Constraint::GeqConst(v, value) => {
                let state = &mut self.vars[*v];
                state.lb = state.lb.max(*value);
            }
            _ => {}
        }
        self.posted.push(constraint);
        Ok(())
    }

    fn solve(&mut self, strategy: &mut dyn SearchStrategy, _objective: Option<VarId>, _time_limit: Option<Duration>) -> Result<SolveOutcome> {
        match self.outcome {
            ScriptedOutcome::Infeasible => return Ok(SolveOutcome::Infeasible),
            ScriptedOutcome::Timeout => return Ok(SolveOutcome::Timeout),
            ScriptedOutcome::Sat => {}
        }

        loop {
            match strategy.select(self)? {
                Some(var) => {
                    if self.is_instantiated(var) {
                        // A strategy looping on an instantiated variable
                        // would never terminate; treat it as done.
                        break;
                    }
                    let lb = self.lower_bound(var);
                    self.instantiate(var, lb);
                }
                None => break,
            }
        }

        let mut solution = Solution::new();
        let pending: Vec<(VarId, i64)> = self
            .vars
            .iter()
            .map(|(id, state)| (id, state.assigned.unwrap_or(state.lb)))
            .collect();
        for (id, value) in pending {
            solution.set(id, value);
        }
        Ok(SolveOutcome::Sat(solution))
    }
}
