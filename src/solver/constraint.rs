use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::model::id::{NodeId, ResourceId, VmId};
use crate::solver::backend::Constraint;
use crate::solver::problem::ReconfigurationProblem;

/// The placement side constraints the formulation understands. The target
/// state of each VM is not a constraint but an input of the problem
/// itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SatConstraint {
    /// The VM may only run on one of the given nodes.
    Fence { vm: VmId, allowed: Vec<NodeId> },
    /// The VM may run anywhere but on the given nodes.
    Ban { vm: VmId, banned: Vec<NodeId> },
    /// The node must be online in the destination state.
    Online(NodeId),
    /// The node must be offline in the destination state.
    Offline(NodeId),
    /// The VM must end with at least `amount` of the resource reserved.
    Preserve { vm: VmId, resource: ResourceId, amount: i64 },
}

impl SatConstraint {
    pub fn kind(&self) -> &'static str {
        match self {
            SatConstraint::Fence { .. } => "fence",
            SatConstraint::Ban { .. } => "ban",
            SatConstraint::Online(_) => "online",
            SatConstraint::Offline(_) => "offline",
            SatConstraint::Preserve { .. } => "preserve",
        }
    }
}

/// Turns one [`SatConstraint`] into solver constraints over the problem's
/// variables.
pub type ConstraintBuilder = fn(&mut ReconfigurationProblem<'_>, &SatConstraint) -> Result<()>;

/// Explicit constraint-to-builder map, injected into the formulation at
/// construction time. Nothing here is process-global: two problems may use
/// two different registries.
pub struct ConstraintRegistry {
    builders: HashMap<&'static str, ConstraintBuilder>,
}

impl ConstraintRegistry {
    pub fn new() -> Self {
        ConstraintRegistry { builders: HashMap::new() }
    }

    /// The registry covering every [`SatConstraint`] variant.
    pub fn defaults() -> Self {
        let mut registry = ConstraintRegistry::new();
        registry.register("fence", build_fence);
        registry.register("ban", build_ban);
        registry.register("online", build_online);
        registry.register("offline", build_offline);
        registry.register("preserve", build_preserve);
        registry
    }

    pub fn register(&mut self, kind: &'static str, builder: ConstraintBuilder) -> &mut Self {
        self.builders.insert(kind, builder);
        self
    }

    pub fn builder_for(&self, kind: &str) -> Option<ConstraintBuilder> {
        self.builders.get(kind).copied()
    }
}

impl Default for ConstraintRegistry {
    fn default() -> Self {
        ConstraintRegistry::defaults()
    }
}

fn build_fence(rp: &mut ReconfigurationProblem<'_>, c: &SatConstraint) -> Result<()> {
    let SatConstraint::Fence { vm, allowed } = c else {
        return Err(Error::formulation(c.kind(), "builder bound to the wrong constraint kind"));
    };
    let hoster = rp.slice_of(vm).map(|s| s.hoster).ok_or_else(|| Error::formulation(vm, "fence on a VM with no placement slice"))?;
    let mut idxs = Vec::with_capacity(allowed.len());
    for n in allowed {
        let idx = rp.node_index_of(n).ok_or_else(|| Error::formulation(n, "fence on an unknown node"))?;
        idxs.push(idx as i64);
    }
    rp.post_for(vm.clone(), Constraint::Member(hoster, idxs))
}

fn build_ban(rp: &mut ReconfigurationProblem<'_>, c: &SatConstraint) -> Result<()> {
    let SatConstraint::Ban { vm, banned } = c else {
        return Err(Error::formulation(c.kind(), "builder bound to the wrong constraint kind"));
    };
    let hoster = rp.slice_of(vm).map(|s| s.hoster).ok_or_else(|| Error::formulation(vm, "ban on a VM with no placement slice"))?;
    for n in banned {
        let Some(idx) = rp.node_index_of(n) else {
            log::debug!("Ban of '{}' from unknown node '{}' is a no-op", vm, n);
            continue;
        };
        rp.post_for(vm.clone(), Constraint::NeqConst(hoster, idx as i64))?;
    }
    Ok(())
}

fn build_online(rp: &mut ReconfigurationProblem<'_>, c: &SatConstraint) -> Result<()> {
    let SatConstraint::Online(node) = c else {
        return Err(Error::formulation(c.kind(), "builder bound to the wrong constraint kind"));
    };
    let var = rp.node_online_var(node).ok_or_else(|| Error::formulation(node, "online constraint on an unknown node"))?;
    rp.post_for(node.clone(), Constraint::EqConst(var, 1))
}

fn build_offline(rp: &mut ReconfigurationProblem<'_>, c: &SatConstraint) -> Result<()> {
    let SatConstraint::Offline(node) = c else {
        return Err(Error::formulation(c.kind(), "builder bound to the wrong constraint kind"));
    };
    let var = rp.node_online_var(node).ok_or_else(|| Error::formulation(node, "offline constraint on an unknown node"))?;
    rp.post_for(node.clone(), Constraint::EqConst(var, 0))
}

fn build_preserve(rp: &mut ReconfigurationProblem<'_>, c: &SatConstraint) -> Result<()> {
    let SatConstraint::Preserve { vm, resource, amount } = c else {
        return Err(Error::formulation(c.kind(), "builder bound to the wrong constraint kind"));
    };
    let var = rp
        .allocation_var(vm, resource)
        .ok_or_else(|| Error::formulation(vm, format!("no allocation variable for dimension '{}'", resource)))?;
    rp.post_for(vm.clone(), Constraint::GeqConst(var, *amount))
}
