//! CSP profiles played out against the simulated drive.

use servo_common::drive::OperationMode;
use servo_master::cycle::CycleConfig;

use super::{enabled_in, operational_bus, primed_runner, tick_until};

/// Default limits at 1 ms: at most 10 counts per cycle, plus rounding.
const MAX_STEP: i32 = 11;

fn run_profile(
    runner: &mut servo_master::cycle::CycleRunner<servo_master::sim::SimulatedBus>,
    limit: usize,
) -> Vec<i32> {
    let mut trace = Vec::new();
    tick_until(runner, limit, |r| {
        trace.push(r.last_output().target_position);
        !r.dispatcher().csp_active()
    })
    .expect("profile completes");
    trace
}

#[test]
fn profile_reaches_target_within_limits() {
    let bus = operational_bus(1);
    let (mut runner, shared) = primed_runner(&bus, CycleConfig::default());
    enabled_in(&mut runner, &shared, OperationMode::Csp);

    shared.set_target_position(2_000);
    runner.tick();
    assert!(runner.dispatcher().csp_active());
    let trace = run_profile(&mut runner, 5_000);

    assert_eq!(*trace.last().unwrap(), 2_000);
    assert!(trace.windows(2).all(|w| w[1] >= w[0]));
    assert!(trace.windows(2).all(|w| w[1] - w[0] <= MAX_STEP));

    runner.tick();
    assert_eq!(bus.drive_position(1), Some(2_000.0));
    assert_eq!(runner.feedback().actual_position, 2_000);
}

#[test]
fn new_target_mid_move_replans_from_feedback() {
    let bus = operational_bus(1);
    let (mut runner, shared) = primed_runner(&bus, CycleConfig::default());
    enabled_in(&mut runner, &shared, OperationMode::Csp);

    shared.set_target_position(50_000);
    for _ in 0..300 {
        runner.tick();
    }
    let reached = runner.last_output().target_position;
    assert!(reached > 0 && reached < 50_000);

    shared.set_target_position(-1_000);
    let mut trace = vec![reached];
    trace.extend(run_profile(&mut runner, 20_000));

    assert_eq!(*trace.last().unwrap(), -1_000);
    assert!(trace.windows(2).all(|w| (w[1] - w[0]).abs() <= MAX_STEP));
}

#[test]
fn lower_velocity_limit_slows_profile() {
    let bus = operational_bus(1);
    let (mut runner, shared) = primed_runner(&bus, CycleConfig::default());
    enabled_in(&mut runner, &shared, OperationMode::Csp);
    shared.set_csp_max_velocity(2_000);

    shared.set_target_position(3_000);
    let trace = run_profile(&mut runner, 10_000);
    assert_eq!(*trace.last().unwrap(), 3_000);
    assert!(trace.windows(2).all(|w| w[1] - w[0] <= 3));
    // 3000 counts at 2000 counts/s takes at least 1.5 s.
    assert!(trace.len() >= 1_500);
}

#[test]
fn csp_targets_ignored_in_other_modes() {
    let bus = operational_bus(1);
    let (mut runner, shared) = primed_runner(&bus, CycleConfig::default());
    enabled_in(&mut runner, &shared, OperationMode::Csv);
    shared.set_target_position(10_000);
    for _ in 0..50 {
        runner.tick();
    }
    assert!(!runner.dispatcher().csp_active());
    assert_eq!(runner.last_output().target_position, 0);
    assert_eq!(bus.drive_position(1), Some(0.0));
}
