pub mod action;
pub mod dependency;
pub mod plan;

pub use action::{Action, ActionKind};
pub use dependency::DependencyGraph;
pub use plan::ReconfigurationPlan;
