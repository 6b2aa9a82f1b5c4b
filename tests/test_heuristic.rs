use std::cell::RefCell;
use std::rc::Rc;

use replan::model::id::VmId;
use replan::solver::backend::{Constraint, SearchStrategy, SolverBackend, VarId};
use replan::solver::heuristic::{OnStableNodeFirst, VmStartEntry};
use replan::solver::objective::MinMttr;
use replan::solver::solver_mock::MockSolver;

struct Fixture {
    solver: MockSolver,
    objective: Rc<RefCell<MinMttr>>,
    tracked_end: VarId,
}

fn fixture() -> Fixture {
    let mut solver = MockSolver::new();
    let cost = solver.declare_int("globalCost", 0, 100);
    let tracked_end = solver.declare_int("someTransition.end", 0, 100);
    let objective = Rc::new(RefCell::new(MinMttr::new(cost)));
    objective.borrow_mut().track_end(tracked_end);
    Fixture { solver, objective, tracked_end }
}

fn entry(solver: &mut MockSolver, name: &str, origin: Option<usize>, start_lb: i64, node_count: usize) -> VmStartEntry {
    let hoster = solver.declare_int(&format!("relocatable({}).hoster", name), 0, node_count as i64 - 1);
    let start = solver.declare_int(&format!("relocatable({}).start", name), start_lb, 100);
    VmStartEntry { vm: VmId::new(name), hoster, start, origin }
}

fn cost_posted(solver: &MockSolver, end: VarId) -> bool {
    solver.posted().iter().any(|c| matches!(c, Constraint::Leq(a, _) if *a == end))
}

/// A VM whose destination is fixed to another node is scheduled before the
/// staying ones, and the objective gets its cue.
#[test]
fn test_moving_vm_selected_and_cost_posted() {
    let mut f = fixture();
    let moving = entry(&mut f.solver, "vm1", Some(0), 0, 3);
    let staying = entry(&mut f.solver, "vm2", Some(1), 0, 3);
    f.solver.instantiate(moving.hoster, 1);
    f.solver.instantiate(staying.hoster, 1);

    let expected = moving.start;
    let mut h = OnStableNodeFirst::new(vec![moving, staying], 3, f.objective.clone());
    let picked = h.select(&mut f.solver).unwrap();

    assert_eq!(picked, Some(expected));
    assert!(cost_posted(&f.solver, f.tracked_end), "Scheduling a moving VM must trigger the cost constraints");
}

/// Among moving VMs, one arriving on a node nothing may leave wins even
/// with a later lower bound.
#[test]
fn test_stable_destination_preferred() {
    let mut f = fixture();
    // Node 0 is unstable: vm3 lives there and its destination is open.
    let undecided = entry(&mut f.solver, "vm3", Some(0), 0, 3);
    // vm1 moves onto the stable node 2, but may only start at 10.
    let to_stable = entry(&mut f.solver, "vm1", Some(0), 10, 3);
    // vm2 moves onto the unstable node 0 and could start at 0.
    let to_unstable = entry(&mut f.solver, "vm2", Some(1), 0, 3);
    f.solver.instantiate(to_stable.hoster, 2);
    f.solver.instantiate(to_unstable.hoster, 0);

    let expected = to_stable.start;
    let mut h = OnStableNodeFirst::new(vec![undecided, to_stable, to_unstable], 3, f.objective.clone());
    let picked = h.select(&mut f.solver).unwrap();

    assert_eq!(picked, Some(expected), "The arrival on the stable node can begin at 0 and must be fixed first");
}

/// With no moving VM, the earliest-schedulable staying VM is picked and
/// the cost constraints stay unposted.
#[test]
fn test_staying_vms_picked_by_smallest_lower_bound() {
    let mut f = fixture();
    let s1 = entry(&mut f.solver, "vm1", Some(0), 5, 2);
    let s2 = entry(&mut f.solver, "vm2", Some(1), 3, 2);
    f.solver.instantiate(s1.hoster, 0);
    f.solver.instantiate(s2.hoster, 1);

    let expected = s2.start;
    let mut h = OnStableNodeFirst::new(vec![s1, s2], 2, f.objective.clone());
    let picked = h.select(&mut f.solver).unwrap();

    assert_eq!(picked, Some(expected));
    assert!(!cost_posted(&f.solver, f.tracked_end), "Staying VMs do not trigger the scheduling hand-off");
}

/// A VM with no current host falls through to the global
/// smallest-lower-bound pool.
#[test]
fn test_homeless_vm_falls_through_to_global_pool() {
    let mut f = fixture();
    let boot = entry(&mut f.solver, "vm1", None, 4, 2);
    let expected = boot.start;
    let mut h = OnStableNodeFirst::new(vec![boot], 2, f.objective.clone());
    let picked = h.select(&mut f.solver).unwrap();
    assert_eq!(picked, Some(expected));
}

/// Once every start is fixed, the strategy signals the objective and
/// yields.
#[test]
fn test_exhausted_placement_hands_over_to_scheduling() {
    let mut f = fixture();
    let e = entry(&mut f.solver, "vm1", Some(0), 0, 2);
    f.solver.instantiate(e.hoster, 0);
    f.solver.instantiate(e.start, 0);

    let mut h = OnStableNodeFirst::new(vec![e], 2, f.objective.clone());
    let picked = h.select(&mut f.solver).unwrap();

    assert_eq!(picked, None);
    assert!(cost_posted(&f.solver, f.tracked_end), "The placement/scheduling hand-off must post the cost constraints");
}
