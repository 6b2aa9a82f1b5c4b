use slotmap::{SecondaryMap, new_key_type};
use std::fmt;
use std::time::Duration;

use crate::error::Result;

new_key_type! {
    /// Opaque handle on an integer decision variable owned by the solver.
    pub struct VarId;
}

/// The constraint vocabulary the formulation relies on. Anything a backend
/// accepts through [`SolverBackend::post`] must be enforced in every
/// solution it returns; how it propagates them is its own business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// `var = value`
    EqConst(VarId, i64),
    /// `var >= value`
    GeqConst(VarId, i64),
    /// `var != value`
    NeqConst(VarId, i64),
    /// `a <= b`
    Leq(VarId, VarId),
    /// `a + b = result`
    SumEq { a: VarId, b: VarId, result: VarId },
    /// `guard = guard_value  =>  var = value`
    ImpliesEq { guard: VarId, guard_value: i64, var: VarId, value: i64 },
    /// `guard = 1  <=>  var = value`
    IffEq { guard: VarId, var: VarId, value: i64 },
    /// `result = table[index]`
    Element { result: VarId, table: Vec<VarId>, index: VarId },
    /// `var` takes one of `values`
    Member(VarId, Vec<i64>),
    /// `result` = how many of `vars` equal `value`
    Count { result: VarId, vars: Vec<VarId>, value: i64 },
    /// Bin-packing over one dimension: `bins[i]` selects the bin receiving
    /// the fixed `sizes[i]`; `loads[b]` accumulates the sizes placed in bin
    /// `b` and is capped by its own domain.
    Pack { loads: Vec<VarId>, sizes: Vec<i64>, bins: Vec<VarId> },
}

/// A complete assignment returned by a backend.
#[derive(Debug, Default)]
pub struct Solution {
    values: SecondaryMap<VarId, i64>,
}

impl Solution {
    pub fn new() -> Self {
        Solution::default()
    }

    pub fn set(&mut self, var: VarId, value: i64) {
        self.values.insert(var, value);
    }

    pub fn value_of(&self, var: VarId) -> Option<i64> {
        self.values.get(var).copied()
    }

    /// Like [`Self::value_of`], but a gap in the assignment is reported as
    /// a formulation defect for `subject`: a backend must assign every
    /// declared variable.
    pub fn require(&self, var: VarId, subject: &dyn fmt::Display) -> Result<i64> {
        self.value_of(var).ok_or_else(|| crate::error::Error::formulation(subject, "unassigned variable in solution"))
    }

    pub fn bool_of(&self, var: VarId) -> Option<bool> {
        self.value_of(var).map(|v| v != 0)
    }
}

/// Outcome of one solve request. `Timeout` means the time budget ran out
/// without a proof either way; it is distinct from `Infeasible`.
#[derive(Debug)]
pub enum SolveOutcome {
    Sat(Solution),
    Infeasible,
    Timeout,
}

/// Read access to the current variable domains, handed to a
/// [`SearchStrategy`] at every choice point.
pub trait DomainView {
    fn lower_bound(&self, var: VarId) -> i64;
    fn upper_bound(&self, var: VarId) -> i64;
    fn is_instantiated(&self, var: VarId) -> bool;

    /// Bumped every time any variable becomes instantiated. Derived views
    /// cached by a strategy stay valid exactly while this value does not
    /// change.
    fn generation(&self) -> u64;
}

/// A pluggable variable-selection policy consumed by the backend at each
/// choice point.
pub trait SearchStrategy {
    /// Picks the next variable to branch on, posting any deferred
    /// constraints through `solver` before the decision applies. `None`
    /// means the strategy has no preference left and the backend finishes
    /// the search on its own.
    fn select(&mut self, solver: &mut dyn SolverBackend) -> Result<Option<VarId>>;
}

/// The narrow interface to the external constraint solver. The core only
/// assumes that posted constraints hold in any returned solution; the
/// search algorithm behind `solve` is opaque.
pub trait SolverBackend: DomainView {
    /// Declares an integer variable over `[lb, ub]`.
    fn declare_int(&mut self, name: &str, lb: i64, ub: i64) -> VarId;

    /// Declares an integer variable over an explicit value set.
    fn declare_sparse(&mut self, name: &str, values: &[i64]) -> VarId;

    /// Declares a 0/1 variable.
    fn declare_bool(&mut self, name: &str) -> VarId;

    /// Posts a constraint. A numeric contradiction detected deductively is
    /// reported as an error: the instance is structurally infeasible and
    /// must not be solved.
    fn post(&mut self, constraint: Constraint) -> Result<()>;

    /// Runs one search, branching through `strategy`, minimizing
    /// `objective` when given, bounded by `time_limit`. Blocks until an
    /// outcome is known.
    fn solve(&mut self, strategy: &mut dyn SearchStrategy, objective: Option<VarId>, time_limit: Option<Duration>) -> Result<SolveOutcome>;
}
