//! CiA-402 enable/disable ladders and mode handshakes on the simulated drive.

use servo_common::channel::CyclicPhase;
use servo_common::drive::{DriveState, OperationMode};
use servo_master::cycle::CycleConfig;

use super::{operational_bus, primed_runner, tick_until};

#[test]
fn enable_operation_only_after_switched_on() {
    let bus = operational_bus(1);
    let (mut runner, shared) = primed_runner(&bus, CycleConfig::default());
    shared.request_mode_change(OperationMode::Csv);
    tick_until(&mut runner, 20, |_| shared.mode_confirmed()).unwrap();
    // Let the disable ladder park the drive in SWITCH_ON_DISABLED.
    for _ in 0..5 {
        runner.tick();
    }

    shared.request_enable();
    let mut words = Vec::new();
    for _ in 0..20 {
        runner.tick();
        let word = runner.last_output().control_word;
        let state = DriveState::from_status_word(runner.feedback().status_word);
        if word == 0x000F {
            assert!(
                matches!(state, Some(DriveState::SwitchedOn | DriveState::OperationEnabled)),
                "0x000F sent while drive in {state:?}"
            );
        }
        if words.last() != Some(&word) {
            words.push(word);
        }
        if shared.motor_enabled() {
            break;
        }
    }
    assert!(shared.motor_enabled());
    assert_eq!(words, vec![0x0006, 0x0007, 0x000F]);
    assert_eq!(shared.phase(), CyclicPhase::Enabled);
}

#[test]
fn disable_walks_the_ladder_down() {
    let bus = operational_bus(1);
    let (mut runner, shared) = primed_runner(&bus, CycleConfig::default());
    super::enabled_in(&mut runner, &shared, OperationMode::Csv);
    runner.tick();
    assert_eq!(
        DriveState::from_status_word(runner.feedback().status_word),
        Some(DriveState::OperationEnabled)
    );

    shared.request_disable();
    let mut words = Vec::new();
    tick_until(&mut runner, 20, |r| {
        let word = r.last_output().control_word;
        if words.last() != Some(&word) {
            words.push(word);
        }
        shared.phase() == CyclicPhase::Disabled
    })
    .unwrap();
    assert_eq!(words, vec![0x0007, 0x0006, 0x0000]);
    assert!(!shared.motor_enabled());
}

#[test]
fn reenable_during_disable_passes_through_switched_on() {
    let bus = operational_bus(1);
    let (mut runner, shared) = primed_runner(&bus, CycleConfig::default());
    super::enabled_in(&mut runner, &shared, OperationMode::Csv);
    runner.tick();

    shared.request_disable();
    runner.tick();
    assert_eq!(runner.last_output().control_word, 0x0007);
    assert_eq!(shared.phase(), CyclicPhase::Disabling);
    assert!(shared.motor_enabled());

    shared.request_enable();
    let mut switched_on_seen = false;
    tick_until(&mut runner, 20, |r| {
        let state = DriveState::from_status_word(r.feedback().status_word);
        switched_on_seen |= state == Some(DriveState::SwitchedOn);
        if r.last_output().control_word == 0x000F {
            assert!(switched_on_seen, "0x000F sent in {state:?} before SWITCHED_ON");
        }
        shared.phase() == CyclicPhase::Enabled
    })
    .unwrap();
    assert!(switched_on_seen);
    assert!(shared.motor_enabled());
    assert_eq!(runner.last_output().control_word, 0x000F);
}

#[test]
fn enable_without_confirmed_mode_is_rejected() {
    let bus = operational_bus(1);
    let (mut runner, shared) = primed_runner(&bus, CycleConfig::default());
    shared.request_enable();
    for _ in 0..10 {
        runner.tick();
    }
    assert!(!shared.motor_enabled());
    assert!(!shared.enable_requested());
    assert_eq!(runner.last_output().control_word, 0x0000);
    assert_eq!(bus.outputs(1).unwrap().control_word, 0x0000);
    assert!(shared
        .notifier
        .drain()
        .iter()
        .any(|n| n.message.to_string().contains("Enable refused")));
}

#[test]
fn mode_change_timeout_keeps_previous_mode() {
    let bus = operational_bus(1);
    let config = CycleConfig {
        mode_change_timeout_ticks: 20,
        ..CycleConfig::default()
    };
    let (mut runner, shared) = primed_runner(&bus, config);
    shared.request_mode_change(OperationMode::Pv);
    tick_until(&mut runner, 20, |_| shared.mode_confirmed()).unwrap();

    // The drive stops following mode requests.
    bus.set_mode_delay(u32::MAX);
    shared.request_mode_change(OperationMode::Cst);
    let used = tick_until(&mut runner, 100, |_| !shared.mode_change_pending()).unwrap();
    assert_eq!(used, 20);
    assert!(!shared.mode_confirmed());
    assert_eq!(shared.active_mode(), None);
    assert_eq!(runner.last_output().mode_of_operation, OperationMode::Pv.code());
    assert_eq!(runner.stats().mode_timeouts, 1);
}

#[test]
fn mode_needs_every_slave() {
    let bus = operational_bus(3);
    let (mut runner, shared) = primed_runner(&bus, CycleConfig::default());
    shared.request_mode_change(OperationMode::Pp);
    tick_until(&mut runner, 20, |_| shared.mode_confirmed()).unwrap();
    for slave in 1..=3 {
        assert_eq!(bus.feedback(slave).unwrap().mode_display, 1);
    }
}

#[test]
fn fault_is_reset_on_next_enable() {
    let bus = operational_bus(1);
    let (mut runner, shared) = primed_runner(&bus, CycleConfig::default());
    super::enabled_in(&mut runner, &shared, OperationMode::Cst);

    bus.inject_drive_fault(1);
    tick_until(&mut runner, 5, |_| !shared.motor_enabled()).unwrap();
    assert_eq!(runner.last_output().control_word, 0x0000);

    shared.request_enable();
    let mut saw_reset = false;
    tick_until(&mut runner, 20, |r| {
        saw_reset |= r.last_output().control_word == 0x0080;
        shared.motor_enabled()
    })
    .unwrap();
    assert!(saw_reset);
}
