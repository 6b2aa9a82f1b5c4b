use thiserror::Error;

use crate::plan::action::ActionKind;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unable to post a constraint for '{subject}': {detail}")]
    Formulation { subject: String, detail: String },

    #[error("No duration evaluator registered for action kind '{0:?}'")]
    MissingDurationEvaluator(ActionKind),

    #[error("No constraint builder registered for '{0}'")]
    MissingConstraintBuilder(String),

    #[error("The solver proved that no plan satisfies the constraints")]
    Infeasible,

    #[error("No solution found within the time limit")]
    Timeout,

    #[error("Replaying '{action}' on the source model failed: {detail}")]
    ReplayViolation { action: String, detail: String },

    #[error("Dependency cycle between '{first}' and '{second}'")]
    CycleDetected { first: String, second: String },
}

impl Error {
    /// Shorthand used by the formulation code, which reports the offending
    /// node or VM as the subject.
    pub fn formulation(subject: impl ToString, detail: impl ToString) -> Self {
        Error::Formulation { subject: subject.to_string(), detail: detail.to_string() }
    }

    pub fn replay(action: impl ToString, detail: impl ToString) -> Self {
        Error::ReplayViolation { action: action.to_string(), detail: detail.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
