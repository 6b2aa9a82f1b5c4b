use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};

use replan::model::id::{NodeId, VmId};
use replan::model::mapping::Mapping;
use replan::model::model::Model;
use replan::plan::action::Action;
use replan::plan::dependency::DependencyGraph;
use replan::plan::plan::ReconfigurationPlan;

const ROUNDS: usize = 10_000;

/// Hand-rolled replay used as the independent reference for the round-trip
/// property. Deliberately not sharing code with the library.
#[derive(Default)]
struct SimState {
    online: HashSet<NodeId>,
    offline: HashSet<NodeId>,
    ready: HashSet<VmId>,
    running: HashMap<VmId, NodeId>,
    sleeping: HashMap<VmId, NodeId>,
}

impl SimState {
    fn of(model: &Model) -> Self {
        let mut sim = SimState::default();
        let mapping = model.mapping();
        sim.online = mapping.online_nodes().cloned().collect();
        sim.offline = mapping.offline_nodes().cloned().collect();
        sim.ready = mapping.ready_vms().cloned().collect();
        sim.running = mapping.running_vms().map(|(v, n)| (v.clone(), n.clone())).collect();
        sim.sleeping = mapping.sleeping_vms().map(|(v, n)| (v.clone(), n.clone())).collect();
        sim
    }

    fn step(&mut self, action: &Action) {
        match action {
            Action::BootNode { node, .. } => {
                self.offline.remove(node);
                self.online.insert(node.clone());
            }
            Action::ShutdownNode { node, .. } => {
                self.online.remove(node);
                self.offline.insert(node.clone());
            }
            Action::BootVm { vm, node, .. } => {
                self.ready.remove(vm);
                self.running.insert(vm.clone(), node.clone());
            }
            Action::MigrateVm { vm, to, .. } => {
                self.running.insert(vm.clone(), to.clone());
            }
            Action::SuspendVm { vm, node, .. } => {
                self.running.remove(vm);
                self.sleeping.insert(vm.clone(), node.clone());
            }
            Action::ResumeVm { vm, node, .. } => {
                self.sleeping.remove(vm);
                self.running.insert(vm.clone(), node.clone());
            }
            Action::KillVm { vm, .. } => {
                self.running.remove(vm);
                self.sleeping.remove(vm);
            }
            Action::Allocate { .. } => {}
        }
    }
}

/// A random but temporally consistent scenario: migrations, suspensions,
/// resumptions, kills, node boots with VM boots scheduled after them.
fn random_plan(rng: &mut StdRng) -> ReconfigurationPlan {
    let node_count = rng.random_range(3..8usize);
    let mut map = Mapping::new();
    let online: Vec<NodeId> = (0..node_count).map(|i| NodeId::new(format!("n{}", i))).collect();
    for node in &online {
        map.add_online_node(node.clone());
    }
    let cold = NodeId::new("cold");
    map.add_offline_node(cold.clone());

    let mut actions: Vec<Action> = Vec::new();
    let boot_end = rng.random_range(1..6);
    let boots_cold = rng.random_bool(0.5);
    if boots_cold {
        actions.push(Action::BootNode { node: cold.clone(), start: 0, end: boot_end });
    }

    let vm_count = rng.random_range(2..10usize);
    for i in 0..vm_count {
        let vm = VmId::new(format!("vm{}", i));
        let host = online[rng.random_range(0..online.len())].clone();
        match rng.random_range(0..10) {
            // A sleeping VM that may resume.
            0 | 1 => {
                map.add_sleeping_vm(vm.clone(), host.clone());
                if rng.random_bool(0.5) {
                    let start = rng.random_range(0..20);
                    let end = start + rng.random_range(1..5);
                    actions.push(Action::ResumeVm { vm, node: host, start, end });
                }
            }
            // A ready VM booted somewhere, possibly on the cold node once
            // it is up.
            2 => {
                map.add_ready_vm(vm.clone());
                let (node, earliest) = if boots_cold && rng.random_bool(0.3) {
                    (cold.clone(), boot_end)
                } else {
                    (online[rng.random_range(0..online.len())].clone(), 0)
                };
                let start = earliest + rng.random_range(0..10);
                let end = start + rng.random_range(1..5);
                actions.push(Action::BootVm { vm, node, start, end });
            }
            // A running VM: stay, migrate, suspend or get killed.
            _ => {
                map.add_running_vm(vm.clone(), host.clone());
                let start = rng.random_range(0..20);
                let end = start + rng.random_range(1..5);
                match rng.random_range(0..10) {
                    0..4 => {
                        let mut to = online[rng.random_range(0..online.len())].clone();
                        if to == host {
                            to = online[(online.iter().position(|n| *n == host).unwrap() + 1) % online.len()].clone();
                        }
                        actions.push(Action::MigrateVm { vm, from: host, to, start, end });
                    }
                    4 => actions.push(Action::SuspendVm { vm, node: host, start, end }),
                    5 => actions.push(Action::KillVm { vm, node: host, start, end }),
                    _ => {}
                }
            }
        }
    }

    let mut plan = ReconfigurationPlan::new(Model::new(map));
    for a in actions {
        assert!(plan.add(a), "The generator must only produce well-formed actions");
    }
    plan
}

/// Kahn over the predecessor sets: every action must eventually become
/// schedulable.
fn assert_acyclic(graph: &DependencyGraph) {
    let count = graph.actions().len();
    let mut done: HashSet<usize> = HashSet::new();
    while done.len() < count {
        let before = done.len();
        for i in 0..count {
            if !done.contains(&i) && graph.predecessors(i).iter().all(|p| done.contains(p)) {
                done.insert(i);
            }
        }
        assert!(done.len() > before, "No schedulable action left: the graph has a cycle");
    }
}

#[test]
fn test_random_plans_extract_acyclic_graphs_and_round_trip() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for round in 0..ROUNDS {
        let plan = random_plan(&mut rng);

        let graph = DependencyGraph::build(&plan).unwrap_or_else(|e| panic!("round {}: extraction failed: {e}\n{plan}", round));
        assert_acyclic(&graph);

        // Round trip: the replayed destination matches an independent
        // step-by-step simulation in chronological order.
        let dst = plan.destination_model().unwrap_or_else(|e| panic!("round {}: replay failed: {e}\n{plan}", round));
        let mut sim = SimState::of(plan.source());
        let mut chronological: Vec<&Action> = plan.actions().iter().collect();
        chronological.sort_by_key(|a| a.start());
        for a in chronological {
            sim.step(a);
        }

        let mapping = dst.mapping();
        assert_eq!(mapping.online_nodes().cloned().collect::<HashSet<_>>(), sim.online, "round {}", round);
        assert_eq!(mapping.offline_nodes().cloned().collect::<HashSet<_>>(), sim.offline, "round {}", round);
        assert_eq!(mapping.ready_vms().cloned().collect::<HashSet<_>>(), sim.ready, "round {}", round);
        assert_eq!(mapping.running_vms().map(|(v, n)| (v.clone(), n.clone())).collect::<HashMap<_, _>>(), sim.running, "round {}", round);
        assert_eq!(mapping.sleeping_vms().map(|(v, n)| (v.clone(), n.clone())).collect::<HashMap<_, _>>(), sim.sleeping, "round {}", round);
    }
}
