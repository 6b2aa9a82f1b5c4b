use serde::Serialize;
use std::fmt;

use crate::error::{Error, Result};
use crate::model::id::{NodeId, ResourceId, VmId};
use crate::model::model::Model;

/// The closed set of reconfiguration actions.
///
/// Every action carries the interval `[start, end]` (with `start <= end`)
/// over which it executes. The variant's terminal effect is applied
/// atomically by [`Action::apply`]; intermediate states are never observable
/// through the model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Action {
    /// offline -> online.
    BootNode { node: NodeId, start: i64, end: i64 },

    /// online -> offline. The node must host nothing at `end`.
    ShutdownNode { node: NodeId, start: i64, end: i64 },

    /// ready -> running on `node`.
    BootVm { vm: VmId, node: NodeId, start: i64, end: i64 },

    /// Running on `from` before `start`, running on `to` at `end`.
    MigrateVm { vm: VmId, from: NodeId, to: NodeId, start: i64, end: i64 },

    /// running -> sleeping, same node.
    SuspendVm { vm: VmId, node: NodeId, start: i64, end: i64 },

    /// sleeping -> running, same node.
    ResumeVm { vm: VmId, node: NodeId, start: i64, end: i64 },

    /// running or sleeping -> destroyed. The resources are freed at `start`.
    KillVm { vm: VmId, node: NodeId, start: i64, end: i64 },

    /// Changes the reservation of `vm` on `node` for one resource dimension
    /// over `[start, end]`. An increase iff `new_qty > old_qty`.
    Allocate { vm: VmId, node: NodeId, resource: ResourceId, old_qty: i64, new_qty: i64, start: i64, end: i64 },
}

/// Discriminant of [`Action`], used to key duration evaluators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ActionKind {
    BootNode,
    ShutdownNode,
    BootVm,
    MigrateVm,
    SuspendVm,
    ResumeVm,
    KillVm,
    Allocate,
}

impl Action {
    pub fn start(&self) -> i64 {
        match self {
            Action::BootNode { start, .. }
            | Action::ShutdownNode { start, .. }
            | Action::BootVm { start, .. }
            | Action::MigrateVm { start, .. }
            | Action::SuspendVm { start, .. }
            | Action::ResumeVm { start, .. }
            | Action::KillVm { start, .. }
            | Action::Allocate { start, .. } => *start,
        }
    }

    pub fn end(&self) -> i64 {
        match self {
            Action::BootNode { end, .. }
            | Action::ShutdownNode { end, .. }
            | Action::BootVm { end, .. }
            | Action::MigrateVm { end, .. }
            | Action::SuspendVm { end, .. }
            | Action::ResumeVm { end, .. }
            | Action::KillVm { end, .. }
            | Action::Allocate { end, .. } => *end,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::BootNode { .. } => ActionKind::BootNode,
            Action::ShutdownNode { .. } => ActionKind::ShutdownNode,
            Action::BootVm { .. } => ActionKind::BootVm,
            Action::MigrateVm { .. } => ActionKind::MigrateVm,
            Action::SuspendVm { .. } => ActionKind::SuspendVm,
            Action::ResumeVm { .. } => ActionKind::ResumeVm,
            Action::KillVm { .. } => ActionKind::KillVm,
            Action::Allocate { .. } => ActionKind::Allocate,
        }
    }

    /// Checks the interval and per-variant structural invariants.
    pub fn is_well_formed(&self) -> bool {
        if self.start() < 0 || self.start() > self.end() {
            return false;
        }
        match self {
            Action::MigrateVm { from, to, .. } => from != to,
            _ => true,
        }
    }

    /// Applies the action's terminal effect to `model`.
    ///
    /// Fails fast with a [`Error::ReplayViolation`] when a precondition does
    /// not hold; such a failure signals a defect in whatever produced the
    /// plan, never a recoverable condition.
    pub fn apply(&self, model: &mut Model) -> Result<()> {
        match self {
            Action::BootNode { node, .. } => {
                if !model.mapping().is_offline(node) {
                    return Err(Error::replay(self, format!("node '{}' is not offline", node)));
                }
                model.mapping_mut().add_online_node(node.clone());
            }
            Action::ShutdownNode { node, .. } => {
                if !model.mapping().is_online(node) {
                    return Err(Error::replay(self, format!("node '{}' is not online", node)));
                }
                if !model.mapping_mut().add_offline_node(node.clone()) {
                    return Err(Error::replay(self, format!("node '{}' still hosts VMs", node)));
                }
            }
            Action::BootVm { vm, node, .. } => {
                if model.mapping().vm_state(vm) != Some(crate::model::mapping::VmState::Ready) {
                    return Err(Error::replay(self, format!("VM '{}' is not ready", vm)));
                }
                if !model.mapping_mut().add_running_vm(vm.clone(), node.clone()) {
                    return Err(Error::replay(self, format!("node '{}' cannot host", node)));
                }
            }
            Action::MigrateVm { vm, from, to, .. } => {
                if model.mapping().running_vms().all(|(v, n)| v != vm || n != from) {
                    return Err(Error::replay(self, format!("VM '{}' is not running on '{}'", vm, from)));
                }
                if !model.mapping_mut().add_running_vm(vm.clone(), to.clone()) {
                    return Err(Error::replay(self, format!("node '{}' cannot host", to)));
                }
            }
            Action::SuspendVm { vm, node, .. } => {
                if model.mapping().running_vms().all(|(v, n)| v != vm || n != node) {
                    return Err(Error::replay(self, format!("VM '{}' is not running on '{}'", vm, node)));
                }
                if !model.mapping_mut().add_sleeping_vm(vm.clone(), node.clone()) {
                    return Err(Error::replay(self, format!("node '{}' cannot host", node)));
                }
            }
            Action::ResumeVm { vm, node, .. } => {
                if model.mapping().sleeping_vms().all(|(v, n)| v != vm || n != node) {
                    return Err(Error::replay(self, format!("VM '{}' is not sleeping on '{}'", vm, node)));
                }
                if !model.mapping_mut().add_running_vm(vm.clone(), node.clone()) {
                    return Err(Error::replay(self, format!("node '{}' cannot host", node)));
                }
            }
            Action::KillVm { vm, node, .. } => {
                if model.mapping().host_of(vm) != Some(node) {
                    return Err(Error::replay(self, format!("VM '{}' is not hosted on '{}'", vm, node)));
                }
                model.mapping_mut().remove_vm(vm);
            }
            Action::Allocate { vm, node, resource, old_qty, new_qty, .. } => {
                if model.mapping().host_of(vm) != Some(node) {
                    return Err(Error::replay(self, format!("VM '{}' is not hosted on '{}'", vm, node)));
                }
                let Some(rc) = model.resource_mut(resource) else {
                    return Err(Error::replay(self, format!("no resource dimension '{}' attached", resource)));
                };
                if rc.demand(vm) != *old_qty {
                    return Err(Error::replay(self, format!("VM '{}' does not reserve {} of '{}'", vm, old_qty, resource)));
                }
                rc.set_demand(vm.clone(), *new_qty);
            }
        }
        Ok(())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::BootNode { node, start, end } => {
                write!(f, "boot(node={}, start={}, end={})", node, start, end)
            }
            Action::ShutdownNode { node, start, end } => {
                write!(f, "shutdown(node={}, start={}, end={})", node, start, end)
            }
            Action::BootVm { vm, node, start, end } => {
                write!(f, "boot(vm={}, on={}, start={}, end={})", vm, node, start, end)
            }
            Action::MigrateVm { vm, from, to, start, end } => {
                write!(f, "migrate(vm={}, from={}, to={}, start={}, end={})", vm, from, to, start, end)
            }
            Action::SuspendVm { vm, node, start, end } => {
                write!(f, "suspend(vm={}, on={}, start={}, end={})", vm, node, start, end)
            }
            Action::ResumeVm { vm, node, start, end } => {
                write!(f, "resume(vm={}, on={}, start={}, end={})", vm, node, start, end)
            }
            Action::KillVm { vm, node, start, end } => {
                write!(f, "kill(vm={}, on={}, start={}, end={})", vm, node, start, end)
            }
            Action::Allocate { vm, node, resource, old_qty, new_qty, start, end } => {
                write!(f, "allocate(vm={}, on={}, rc={}, {}->{}, start={}, end={})", vm, node, resource, old_qty, new_qty, start, end)
            }
        }
    }
}
