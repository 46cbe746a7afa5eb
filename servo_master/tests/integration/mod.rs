//! Shared fixtures for the integration suite.

mod bring_up;
mod csp_motion;
mod drive_ladder;
mod health_recovery;
mod planner_props;
mod wkc_shortfall;

use std::sync::Arc;
use std::time::Duration;

use servo_common::channel::SharedControlState;
use servo_common::drive::OperationMode;
use servo_common::transport::{LinkState, MasterTransport};
use servo_master::cycle::{CycleConfig, CycleRunner};
use servo_master::mapping::PdoMapper;
use servo_master::sim::{SimConfig, SimulatedBus};

/// Simulated bus with `slaves` drives mapped and OPERATIONAL.
pub fn operational_bus(slaves: u16) -> Arc<SimulatedBus> {
    let bus = SimulatedBus::new(SimConfig {
        slave_count: slaves,
        mode_delay_ticks: 1,
        ..SimConfig::default()
    });
    bus.init("sim0").unwrap();
    bus.discover_and_configure().unwrap();
    PdoMapper::new(&bus, Duration::ZERO)
        .configure_all(Duration::ZERO)
        .unwrap();
    bus.write_state(0, LinkState::SAFE_OP).unwrap();
    bus.write_state(0, LinkState::OPERATIONAL).unwrap();
    Arc::new(bus)
}

/// Primed runner on `bus` with a fresh shared state.
pub fn primed_runner(
    bus: &Arc<SimulatedBus>,
    config: CycleConfig,
) -> (CycleRunner<SimulatedBus>, Arc<SharedControlState>) {
    let shared = Arc::new(SharedControlState::new(1024, 10_000));
    shared.set_in_operational(true);
    let mut runner = CycleRunner::new(Arc::clone(bus), Arc::clone(&shared), config);
    runner.prime();
    (runner, shared)
}

/// Tick until `done` holds or `limit` ticks pass. Returns the ticks used.
pub fn tick_until(
    runner: &mut CycleRunner<SimulatedBus>,
    limit: usize,
    mut done: impl FnMut(&CycleRunner<SimulatedBus>) -> bool,
) -> Option<usize> {
    for i in 1..=limit {
        runner.tick();
        if done(runner) {
            return Some(i);
        }
    }
    None
}

/// Confirm `mode` and enable the motor.
pub fn enabled_in(
    runner: &mut CycleRunner<SimulatedBus>,
    shared: &SharedControlState,
    mode: OperationMode,
) {
    shared.request_mode_change(mode);
    tick_until(runner, 20, |_| shared.mode_confirmed()).expect("mode confirmed");
    shared.request_enable();
    tick_until(runner, 20, |_| shared.motor_enabled()).expect("motor enabled");
}
