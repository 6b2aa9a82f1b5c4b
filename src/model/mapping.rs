use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::model::id::{NodeId, VmId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeState {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum VmState {
    Ready,
    Running,
    Sleeping,
}

/// Placement snapshot: which nodes are online and which node hosts which VM.
///
/// The mutators preserve the placement invariants: a running or sleeping VM
/// has exactly one host and that host is an online node; an offline node
/// hosts nothing. A mutation that would break an invariant is rejected and
/// reported through the boolean return value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Mapping {
    online: HashSet<NodeId>,
    offline: HashSet<NodeId>,
    ready: HashSet<VmId>,
    running: HashMap<VmId, NodeId>,
    sleeping: HashMap<VmId, NodeId>,

    /// Derived index: all VMs (running or sleeping) per online node.
    hosted: HashMap<NodeId, HashSet<VmId>>,
}

impl Mapping {
    pub fn new() -> Self {
        Mapping::default()
    }

    /// Declares `node` online. A node may switch from offline to online at
    /// any time.
    pub fn add_online_node(&mut self, node: NodeId) {
        self.offline.remove(&node);
        self.hosted.entry(node.clone()).or_default();
        self.online.insert(node);
    }

    /// Declares `node` offline.
    ///
    /// # Returns
    /// `false` if the node is currently hosting VMs, in which case the
    /// mapping is left untouched.
    pub fn add_offline_node(&mut self, node: NodeId) -> bool {
        if self.hosted.get(&node).is_some_and(|vms| !vms.is_empty()) {
            log::warn!("Cannot set node '{}' offline: it is still hosting VMs", node);
            return false;
        }
        self.online.remove(&node);
        self.hosted.remove(&node);
        self.offline.insert(node);
        true
    }

    /// Puts `vm` in the ready state, removing it from any host.
    pub fn add_ready_vm(&mut self, vm: VmId) {
        self.unhost(&vm);
        self.ready.insert(vm);
    }

    /// Sets `vm` running on `node`.
    ///
    /// # Returns
    /// `false` if `node` is not online; the mapping is left untouched.
    pub fn add_running_vm(&mut self, vm: VmId, node: NodeId) -> bool {
        if !self.online.contains(&node) {
            log::warn!("Cannot run VM '{}' on node '{}': the node is not online", vm, node);
            return false;
        }
        self.unhost(&vm);
        self.ready.remove(&vm);
        self.hosted.entry(node.clone()).or_default().insert(vm.clone());
        self.running.insert(vm, node);
        true
    }

    /// Sets `vm` sleeping on `node`.
    ///
    /// # Returns
    /// `false` if `node` is not online; the mapping is left untouched.
    pub fn add_sleeping_vm(&mut self, vm: VmId, node: NodeId) -> bool {
        if !self.online.contains(&node) {
            log::warn!("Cannot put VM '{}' to sleep on node '{}': the node is not online", vm, node);
            return false;
        }
        self.unhost(&vm);
        self.ready.remove(&vm);
        self.hosted.entry(node.clone()).or_default().insert(vm.clone());
        self.sleeping.insert(vm, node);
        true
    }

    /// Removes `vm` entirely (destroyed/killed).
    pub fn remove_vm(&mut self, vm: &VmId) {
        self.unhost(vm);
        self.ready.remove(vm);
    }

    fn unhost(&mut self, vm: &VmId) {
        let host = self.running.remove(vm).or_else(|| self.sleeping.remove(vm));
        if let Some(n) = host {
            if let Some(vms) = self.hosted.get_mut(&n) {
                vms.remove(vm);
            }
        }
    }

    pub fn node_state(&self, node: &NodeId) -> Option<NodeState> {
        if self.online.contains(node) {
            Some(NodeState::Online)
        } else if self.offline.contains(node) {
            Some(NodeState::Offline)
        } else {
            None
        }
    }

    pub fn vm_state(&self, vm: &VmId) -> Option<VmState> {
        if self.running.contains_key(vm) {
            Some(VmState::Running)
        } else if self.sleeping.contains_key(vm) {
            Some(VmState::Sleeping)
        } else if self.ready.contains(vm) {
            Some(VmState::Ready)
        } else {
            None
        }
    }

    pub fn is_online(&self, node: &NodeId) -> bool {
        self.online.contains(node)
    }

    pub fn is_offline(&self, node: &NodeId) -> bool {
        self.offline.contains(node)
    }

    /// The host of `vm`, whether it is running or sleeping there.
    pub fn host_of(&self, vm: &VmId) -> Option<&NodeId> {
        self.running.get(vm).or_else(|| self.sleeping.get(vm))
    }

    /// All VMs hosted (running or sleeping) on `node`.
    pub fn hosted_vms(&self, node: &NodeId) -> impl Iterator<Item = &VmId> {
        self.hosted.get(node).into_iter().flatten()
    }

    pub fn online_nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.online.iter()
    }

    pub fn offline_nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.offline.iter()
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.online.iter().chain(self.offline.iter())
    }

    pub fn running_vms(&self) -> impl Iterator<Item = (&VmId, &NodeId)> {
        self.running.iter()
    }

    pub fn sleeping_vms(&self) -> impl Iterator<Item = (&VmId, &NodeId)> {
        self.sleeping.iter()
    }

    pub fn ready_vms(&self) -> impl Iterator<Item = &VmId> {
        self.ready.iter()
    }

    pub fn all_vms(&self) -> impl Iterator<Item = &VmId> {
        self.running.keys().chain(self.sleeping.keys()).chain(self.ready.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(id: &str) -> NodeId {
        NodeId::new(id)
    }

    fn vm(id: &str) -> VmId {
        VmId::new(id)
    }

    #[test]
    fn test_running_vm_needs_online_host() {
        let mut map = Mapping::new();
        map.add_offline_node(n("n1"));
        assert!(!map.add_running_vm(vm("vm1"), n("n1")), "Placing a VM on an offline node must be rejected");

        map.add_online_node(n("n1"));
        assert!(map.add_running_vm(vm("vm1"), n("n1")));
        assert_eq!(map.host_of(&vm("vm1")), Some(&n("n1")));
        assert_eq!(map.vm_state(&vm("vm1")), Some(VmState::Running));
    }

    #[test]
    fn test_offline_rejected_while_hosting() {
        let mut map = Mapping::new();
        map.add_online_node(n("n1"));
        map.add_running_vm(vm("vm1"), n("n1"));

        assert!(!map.add_offline_node(n("n1")), "A hosting node must not go offline");
        assert!(map.is_online(&n("n1")));

        map.remove_vm(&vm("vm1"));
        assert!(map.add_offline_node(n("n1")));
        assert!(map.is_offline(&n("n1")));
    }

    #[test]
    fn test_rehosting_moves_the_vm() {
        let mut map = Mapping::new();
        map.add_online_node(n("n1"));
        map.add_online_node(n("n2"));
        map.add_running_vm(vm("vm1"), n("n1"));
        map.add_sleeping_vm(vm("vm1"), n("n2"));

        assert_eq!(map.vm_state(&vm("vm1")), Some(VmState::Sleeping));
        assert_eq!(map.host_of(&vm("vm1")), Some(&n("n2")));
        assert_eq!(map.hosted_vms(&n("n1")).count(), 0, "The old host must no longer list the VM");
    }
}
