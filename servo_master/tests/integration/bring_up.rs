//! Full runtime bring-up on the simulated bus, driven through the console.

use std::sync::Arc;
use std::time::{Duration, Instant};

use servo_common::config::master::MasterConfig;
use servo_common::drive::OperationMode;
use servo_common::transport::{LinkState, MasterTransport};
use servo_master::console::Console;
use servo_master::error::{MasterError, RequestError};
use servo_master::runtime::MasterRuntime;
use servo_master::sim::{SimConfig, SimulatedBus};

fn fast_config() -> MasterConfig {
    let mut config = MasterConfig::default();
    config.bus.interface = Some("sim0".to_string());
    config.bus.state_poll_interval_ms = 1;
    config.bus.state_timeout_ms = 500;
    config.bus.pdo_settle_ms = 0;
    config.bus.dc_settle_ms = 0;
    config.rt.lock_memory = false;
    config
}

fn sim(slaves: u16) -> Arc<SimulatedBus> {
    Arc::new(SimulatedBus::new(SimConfig {
        slave_count: slaves,
        ..SimConfig::default()
    }))
}

fn wait_for(console: &Console<SimulatedBus>, done: impl Fn(&Console<SimulatedBus>) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if done(console) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn velocity_move_end_to_end() {
    let bus = sim(3);
    let mut runtime = MasterRuntime::new(Arc::clone(&bus), fast_config());
    runtime.start().unwrap();
    assert_eq!(runtime.shared().expected_wkc(), 9);
    assert_eq!(bus.read_state(), LinkState::OPERATIONAL);

    let console = runtime.console();
    console.request_mode(OperationMode::Csv).unwrap();
    assert!(wait_for(&console, |c| c.status().mode_confirmed));
    assert_eq!(console.status().active_mode, Some(OperationMode::Csv));

    console.enable().unwrap();
    assert!(wait_for(&console, |c| c.status().motor_enabled));
    assert!(matches!(
        console.request_mode(OperationMode::Csp),
        Err(RequestError::MotorEnabled)
    ));

    console.set_target(500).unwrap();
    assert!(wait_for(&console, |c| c
        .latest_sample()
        .is_some_and(|s| s.velocity == 500)));

    console.disable();
    assert!(wait_for(&console, |c| !c.status().motor_enabled));

    let stats = console.drain_telemetry(usize::MAX, |_| {});
    assert!(stats.read > 0);

    runtime.shutdown().unwrap();
    assert_eq!(bus.interface(), None);
    for slave in 1..=3 {
        assert_eq!(bus.slave(slave).unwrap().state, LinkState::INIT);
    }
}

#[test]
fn rejected_safe_op_aborts_startup() {
    let bus = sim(2);
    bus.fail_state_transition(2, LinkState::SAFE_OP, 0x001D);
    let mut runtime = MasterRuntime::new(Arc::clone(&bus), fast_config());

    let err = runtime.start().unwrap_err();
    assert!(matches!(
        err,
        MasterError::LinkState {
            slave: 2,
            al_status: 0x001D,
            ..
        }
    ));
    assert!(!runtime.is_operational());
    assert_eq!(bus.interface(), None);
}

#[test]
fn console_stop_ends_threads() {
    let bus = sim(1);
    let mut runtime = MasterRuntime::new(Arc::clone(&bus), fast_config());
    runtime.start().unwrap();
    let console = runtime.console();
    console.stop();
    let start = Instant::now();
    runtime.shutdown().unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(!console.shared().is_running());
    assert!(!console.status().in_operational);
}
