use replan::error::Error;
use replan::model::id::{NodeId, ResourceId, VmId};
use replan::model::mapping::{Mapping, VmState};
use replan::model::model::Model;
use replan::model::resource::ShareableResource;
use replan::plan::action::Action;
use replan::plan::plan::ReconfigurationPlan;

fn n(id: &str) -> NodeId {
    NodeId::new(id)
}

fn vm(id: &str) -> VmId {
    VmId::new(id)
}

fn sample_model() -> Model {
    let mut map = Mapping::new();
    for id in ["n1", "n2", "n3"] {
        map.add_online_node(n(id));
    }
    map.add_offline_node(n("n4"));
    map.add_running_vm(vm("vm1"), n("n1"));
    map.add_running_vm(vm("vm2"), n("n2"));
    map.add_sleeping_vm(vm("vm3"), n("n2"));
    map.add_ready_vm(vm("vm4"));
    Model::new(map)
}

#[test]
fn test_empty_plan() {
    let plan = ReconfigurationPlan::new(sample_model());
    assert_eq!(plan.duration(), 0);
    assert!(plan.is_empty());

    let dst = plan.destination_model().unwrap();
    assert_eq!(dst.mapping(), sample_model().mapping(), "An empty plan changes nothing");
}

#[test]
fn test_duration_is_max_end() {
    let mut plan = ReconfigurationPlan::new(sample_model());
    plan.add(Action::MigrateVm { vm: vm("vm1"), from: n("n1"), to: n("n3"), start: 0, end: 5 });
    plan.add(Action::SuspendVm { vm: vm("vm2"), node: n("n2"), start: 2, end: 9 });
    plan.add(Action::BootNode { node: n("n4"), start: 0, end: 3 });
    assert_eq!(plan.duration(), 9);
}

#[test]
fn test_malformed_actions_are_rejected() {
    let mut plan = ReconfigurationPlan::new(sample_model());
    assert!(!plan.add(Action::BootNode { node: n("n4"), start: 5, end: 3 }), "start > end must be rejected");
    assert!(!plan.add(Action::BootNode { node: n("n4"), start: -1, end: 3 }), "negative moments must be rejected");
    assert!(!plan.add(Action::MigrateVm { vm: vm("vm1"), from: n("n1"), to: n("n1"), start: 0, end: 5 }), "a migration must change node");
    assert!(plan.is_empty());
}

#[test]
fn test_actions_keep_insertion_order() {
    let mut plan = ReconfigurationPlan::new(sample_model());
    let late = Action::MigrateVm { vm: vm("vm1"), from: n("n1"), to: n("n3"), start: 7, end: 9 };
    let early = Action::SuspendVm { vm: vm("vm2"), node: n("n2"), start: 0, end: 2 };
    plan.add(late.clone());
    plan.add(early.clone());
    assert_eq!(plan.actions(), &[late, early], "Insertion order is preserved; temporal order is derived elsewhere");
}

#[test]
fn test_destination_model_applies_every_transition() {
    let mut model = sample_model();
    let mut rc = ShareableResource::new(ResourceId::new("cpu"), 8, 1);
    rc.set_demand(vm("vm1"), 2);
    model.attach(rc);

    let mut plan = ReconfigurationPlan::new(model);
    plan.add(Action::BootNode { node: n("n4"), start: 0, end: 3 });
    plan.add(Action::BootVm { vm: vm("vm4"), node: n("n4"), start: 3, end: 5 });
    plan.add(Action::MigrateVm { vm: vm("vm1"), from: n("n1"), to: n("n3"), start: 0, end: 5 });
    plan.add(Action::SuspendVm { vm: vm("vm2"), node: n("n2"), start: 1, end: 4 });
    plan.add(Action::ResumeVm { vm: vm("vm3"), node: n("n2"), start: 2, end: 6 });
    plan.add(Action::Allocate { vm: vm("vm1"), node: n("n3"), resource: ResourceId::new("cpu"), old_qty: 2, new_qty: 4, start: 5, end: 6 });
    plan.add(Action::ShutdownNode { node: n("n1"), start: 5, end: 8 });

    let dst = plan.destination_model().unwrap();
    assert!(dst.mapping().is_online(&n("n4")));
    assert!(dst.mapping().is_offline(&n("n1")));
    assert_eq!(dst.mapping().host_of(&vm("vm4")), Some(&n("n4")));
    assert_eq!(dst.mapping().host_of(&vm("vm1")), Some(&n("n3")));
    assert_eq!(dst.mapping().vm_state(&vm("vm2")), Some(VmState::Sleeping));
    assert_eq!(dst.mapping().vm_state(&vm("vm3")), Some(VmState::Running));
    assert_eq!(dst.resource(&ResourceId::new("cpu")).unwrap().demand(&vm("vm1")), 4);
}

#[test]
fn test_kill_frees_the_vm() {
    let mut plan = ReconfigurationPlan::new(sample_model());
    plan.add(Action::KillVm { vm: vm("vm1"), node: n("n1"), start: 0, end: 1 });
    let dst = plan.destination_model().unwrap();
    assert_eq!(dst.mapping().vm_state(&vm("vm1")), None, "A killed VM leaves the mapping entirely");
    assert_eq!(dst.mapping().hosted_vms(&n("n1")).count(), 0);
}

#[test]
fn test_replay_fails_fast_on_busy_shutdown() {
    let mut plan = ReconfigurationPlan::new(sample_model());
    plan.add(Action::ShutdownNode { node: n("n1"), start: 0, end: 3 });
    let err = plan.destination_model().unwrap_err();
    assert!(matches!(err, Error::ReplayViolation { .. }), "Expected a replay violation, got: {err}");
}

#[test]
fn test_replay_fails_fast_on_wrong_source_host() {
    let mut plan = ReconfigurationPlan::new(sample_model());
    plan.add(Action::MigrateVm { vm: vm("vm1"), from: n("n2"), to: n("n3"), start: 0, end: 5 });
    let err = plan.destination_model().unwrap_err();
    assert!(matches!(err, Error::ReplayViolation { .. }));
}

#[test]
fn test_replay_orders_by_start_not_insertion() {
    // The boot of n4 is inserted after the VM boot that relies on it; the
    // replay still works because it orders by start time.
    let mut plan = ReconfigurationPlan::new(sample_model());
    plan.add(Action::BootVm { vm: vm("vm4"), node: n("n4"), start: 3, end: 5 });
    plan.add(Action::BootNode { node: n("n4"), start: 0, end: 3 });

    let dst = plan.destination_model().unwrap();
    assert_eq!(dst.mapping().host_of(&vm("vm4")), Some(&n("n4")));
}

#[test]
fn test_same_instant_disjoint_actions_replay_deterministically() {
    let mut plan = ReconfigurationPlan::new(sample_model());
    plan.add(Action::MigrateVm { vm: vm("vm1"), from: n("n1"), to: n("n3"), start: 0, end: 4 });
    plan.add(Action::SuspendVm { vm: vm("vm2"), node: n("n2"), start: 0, end: 4 });

    let a = plan.destination_model().unwrap();
    let b = plan.destination_model().unwrap();
    assert_eq!(a.mapping(), b.mapping());
}
