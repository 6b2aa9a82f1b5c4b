use serde::Serialize;
use std::collections::HashMap;

use crate::model::id::{NodeId, ResourceId, VmId};

/// One named resource dimension: how much of it each node provides and how
/// much of it each VM currently reserves.
///
/// Elements without an explicit value fall back to the defaults given at
/// construction time.
#[derive(Debug, Clone, Serialize)]
pub struct ShareableResource {
    id: ResourceId,
    default_capacity: i64,
    default_demand: i64,
    node_capacity: HashMap<NodeId, i64>,
    vm_demand: HashMap<VmId, i64>,
}

impl ShareableResource {
    pub fn new(id: ResourceId, default_capacity: i64, default_demand: i64) -> Self {
        ShareableResource { id, default_capacity, default_demand, node_capacity: HashMap::new(), vm_demand: HashMap::new() }
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn set_capacity(&mut self, node: NodeId, capacity: i64) -> &mut Self {
        self.node_capacity.insert(node, capacity);
        self
    }

    pub fn set_demand(&mut self, vm: VmId, demand: i64) -> &mut Self {
        self.vm_demand.insert(vm, demand);
        self
    }

    pub fn capacity(&self, node: &NodeId) -> i64 {
        self.node_capacity.get(node).copied().unwrap_or(self.default_capacity)
    }

    pub fn demand(&self, vm: &VmId) -> i64 {
        self.vm_demand.get(vm).copied().unwrap_or(self.default_demand)
    }
}
