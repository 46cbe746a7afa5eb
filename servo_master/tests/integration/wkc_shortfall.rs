//! Working-counter shortfalls while the motor is running.

use servo_common::drive::OperationMode;
use servo_master::cycle::{CycleConfig, TickOutcome};

use super::{enabled_in, operational_bus, primed_runner};

#[test]
fn five_shortfalls_raise_health_check_once() {
    let bus = operational_bus(2);
    let (mut runner, shared) = primed_runner(&bus, CycleConfig::default());
    enabled_in(&mut runner, &shared, OperationMode::Csv);
    shared.set_target_velocity(500);
    for _ in 0..5 {
        runner.tick();
    }

    bus.inject_wkc_shortfall(5);
    // The frame already in flight comes back complete.
    assert_eq!(runner.tick(), TickOutcome::Exchanged);
    let held = runner.last_output();
    assert_eq!(held.target_velocity, 500);

    let outcomes: Vec<_> = (0..5).map(|_| runner.tick()).collect();
    assert_eq!(
        outcomes,
        vec![
            TickOutcome::Shortfall { consecutive: 1, escalated: false },
            TickOutcome::Shortfall { consecutive: 2, escalated: false },
            TickOutcome::Shortfall { consecutive: 3, escalated: true },
            TickOutcome::Shortfall { consecutive: 1, escalated: false },
            TickOutcome::Shortfall { consecutive: 2, escalated: false },
        ]
    );

    assert_eq!(shared.degraded_events(), 1);
    assert!(shared.take_health_check());
    assert!(shared.is_running());
    assert!(shared.motor_enabled());
    assert_eq!(runner.last_output(), held);
    assert_eq!(bus.outputs(1), Some(held));
    assert_eq!(bus.outputs(2), Some(held));

    assert_eq!(runner.tick(), TickOutcome::Exchanged);
    assert_eq!(runner.stats().shortfalls, 5);
    assert_eq!(runner.stats().escalations, 1);
}

#[test]
fn shortfall_skips_telemetry() {
    let bus = operational_bus(1);
    let (mut runner, shared) = primed_runner(&bus, CycleConfig::default());
    runner.tick();
    bus.inject_wkc_shortfall(3);
    for _ in 0..5 {
        runner.tick();
    }
    // Six ticks, three of them short.
    assert_eq!(shared.telemetry.published(), 3);
    assert_eq!(shared.last_wkc(), 3);
}

#[test]
fn higher_retry_limit_delays_escalation() {
    let bus = operational_bus(1);
    let config = CycleConfig {
        wkc_retry_limit: 10,
        ..CycleConfig::default()
    };
    let (mut runner, shared) = primed_runner(&bus, config);
    runner.tick();
    bus.inject_wkc_shortfall(9);
    for _ in 0..10 {
        runner.tick();
    }
    assert_eq!(shared.degraded_events(), 0);
    assert!(!shared.take_health_check());
}
