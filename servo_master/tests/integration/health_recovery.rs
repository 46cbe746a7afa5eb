//! Cyclic loop and health monitor cooperating on a lost slave.

use std::sync::Arc;

use servo_common::config::master::HealthConfig;
use servo_common::transport::{LinkState, MasterTransport};
use servo_master::cycle::{CycleConfig, TickOutcome};
use servo_master::health::HealthMonitor;

use super::{operational_bus, primed_runner, tick_until};

#[test]
fn lost_slave_is_reconfigured_and_promoted() {
    let bus = operational_bus(2);
    let (mut runner, shared) = primed_runner(&bus, CycleConfig::default());
    let mut monitor = HealthMonitor::new(Arc::clone(&bus), Arc::clone(&shared), HealthConfig::default());
    for _ in 0..5 {
        runner.tick();
    }
    assert!(!monitor.check_pass().checked);

    bus.disconnect_slave(2);
    tick_until(&mut runner, 10, |_| shared.degraded_events() > 0).unwrap();
    assert_eq!(shared.last_wkc(), 3);

    let report = monitor.check_pass();
    assert!(report.checked);
    assert_eq!(report.lost.as_slice(), &[2]);
    assert!(bus.slave(2).unwrap().lost);
    assert!(monitor.check_pending());

    bus.reconnect_slave(2);
    let report = monitor.check_pass();
    assert_eq!(report.reconfigured.as_slice(), &[2]);
    assert_eq!(bus.slave(2).unwrap().state, LinkState::SAFE_OP);

    let report = monitor.check_pass();
    assert_eq!(report.promoted.as_slice(), &[2]);
    assert_eq!(bus.slave(2).unwrap().state, LinkState::OPERATIONAL);

    tick_until(&mut runner, 10, |_| shared.last_wkc() == 6).unwrap();
    assert_eq!(runner.tick(), TickOutcome::Exchanged);

    let report = monitor.check_pass();
    assert!(report.checked);
    assert!(report.all_operational);
    assert!(!monitor.check_pass().checked);

    let messages: Vec<_> = shared.notifier.drain().into_iter().map(|n| n.message.to_string()).collect();
    assert!(messages.iter().any(|m| m == "Slave 2 lost"));
}

#[test]
fn watchdog_error_is_acknowledged() {
    let bus = operational_bus(3);
    let (mut runner, shared) = primed_runner(&bus, CycleConfig::default());
    let mut monitor = HealthMonitor::new(Arc::clone(&bus), Arc::clone(&shared), HealthConfig::default());

    bus.set_slave_state(3, LinkState::SAFE_OP.with_ack(), 0x001B);
    tick_until(&mut runner, 10, |_| shared.degraded_events() > 0).unwrap();

    let report = monitor.check_pass();
    assert_eq!(report.acknowledged.as_slice(), &[3]);
    let report = monitor.check_pass();
    assert_eq!(report.promoted.as_slice(), &[3]);
    assert_eq!(bus.read_state(), LinkState::OPERATIONAL);
    // Frames were never touched by the monitor.
    assert_eq!(bus.outputs(3), Some(runner.last_output()));
}
