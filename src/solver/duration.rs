use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::model::id::{NodeId, VmId};
use crate::model::model::Model;
use crate::plan::action::ActionKind;

/// The node or VM an action operates on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    Node(NodeId),
    Vm(VmId),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Node(n) => write!(f, "{}", n),
            Subject::Vm(v) => write!(f, "{}", v),
        }
    }
}

/// Estimates how long one kind of action takes on one subject.
pub trait ActionDurationEvaluator {
    fn evaluate(&self, model: &Model, subject: &Subject) -> i64;
}

/// The simplest estimation: the same duration for every subject.
pub struct ConstantActionDuration(pub i64);

impl ActionDurationEvaluator for ConstantActionDuration {
    fn evaluate(&self, _model: &Model, _subject: &Subject) -> i64 {
        self.0
    }
}

/// Registry of duration evaluators, keyed by action kind, with optional
/// per-subject overrides.
///
/// Asking for a kind without a registered evaluator is a configuration
/// error; the formulation raises it before any solving starts.
pub struct DurationEvaluators {
    evaluators: HashMap<ActionKind, Box<dyn ActionDurationEvaluator>>,
    overrides: HashMap<(ActionKind, Subject), i64>,
}

impl DurationEvaluators {
    /// An empty registry. Every needed kind must be registered explicitly.
    pub fn new() -> Self {
        DurationEvaluators { evaluators: HashMap::new(), overrides: HashMap::new() }
    }

    /// A registry seeded with plausible constants for every action kind.
    pub fn defaults() -> Self {
        let mut evs = DurationEvaluators::new();
        evs.register(ActionKind::BootNode, Box::new(ConstantActionDuration(8)));
        evs.register(ActionKind::ShutdownNode, Box::new(ConstantActionDuration(6)));
        evs.register(ActionKind::BootVm, Box::new(ConstantActionDuration(3)));
        evs.register(ActionKind::MigrateVm, Box::new(ConstantActionDuration(5)));
        evs.register(ActionKind::SuspendVm, Box::new(ConstantActionDuration(4)));
        evs.register(ActionKind::ResumeVm, Box::new(ConstantActionDuration(4)));
        evs.register(ActionKind::KillVm, Box::new(ConstantActionDuration(1)));
        evs.register(ActionKind::Allocate, Box::new(ConstantActionDuration(1)));
        evs
    }

    pub fn register(&mut self, kind: ActionKind, evaluator: Box<dyn ActionDurationEvaluator>) -> &mut Self {
        self.evaluators.insert(kind, evaluator);
        self
    }

    /// Pins the duration for one (kind, subject) pair, shadowing the
    /// registered evaluator.
    pub fn set_override(&mut self, kind: ActionKind, subject: Subject, duration: i64) -> &mut Self {
        self.overrides.insert((kind, subject), duration);
        self
    }

    pub fn evaluate(&self, model: &Model, kind: ActionKind, subject: &Subject) -> Result<i64> {
        if let Some(d) = self.overrides.get(&(kind, subject.clone())) {
            return Ok(*d);
        }
        let ev = self.evaluators.get(&kind).ok_or(Error::MissingDurationEvaluator(kind))?;
        let d = ev.evaluate(model, subject);
        if d < 0 {
            return Err(Error::formulation(subject, format!("negative duration {} for {:?}", d, kind)));
        }
        Ok(d)
    }
}

impl Default for DurationEvaluators {
    fn default() -> Self {
        DurationEvaluators::defaults()
    }
}
