//! Shared control state between the console, the cyclic loop and the
//! health monitor.
//!
//! Flags and targets crossing into the cyclic loop are atomics. A request
//! value is stored before its flag with `Release`, and the loop reads the
//! flag with `Acquire` before the value. The parameter blocks and the
//! interface name sit behind a mutex; the cyclic loop never touches them.

use std::sync::atomic::{
    AtomicBool, AtomicI16, AtomicI32, AtomicU8, AtomicU16, AtomicU32, AtomicU64, Ordering,
};

use parking_lot::Mutex;

use super::notify::Notifier;
use super::ring::TelemetryRing;
use crate::consts::NOTIFICATION_CAPACITY;
use crate::drive::OperationMode;
use crate::drive::params::ModeParams;

/// Phase of the cyclic enable/disable sequence, orthogonal to the drive state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CyclicPhase {
    #[default]
    Disabled = 0,
    Enabling = 1,
    Enabled = 2,
    Disabling = 3,
}

impl CyclicPhase {
    pub const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Enabling,
            2 => Self::Enabled,
            3 => Self::Disabling,
            _ => Self::Disabled,
        }
    }
}

/// Status/control word pair exported at the diagnostic interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiagnosticSnapshot {
    pub status_word: u16,
    pub control_word: u16,
    pub tick: u64,
    pub wkc: u16,
    pub expected_wkc: u16,
}

pub struct SharedControlState {
    running: AtomicBool,

    interface: Mutex<Option<String>>,
    interface_confirmed: AtomicBool,

    requested_mode: AtomicU8,
    mode_change_requested: AtomicBool,
    mode_confirmed: AtomicBool,
    /// Code of the last confirmed mode, 0 when none.
    active_mode: AtomicU8,

    enable_requested: AtomicBool,
    motor_enabled: AtomicBool,
    state_changed: AtomicBool,
    phase: AtomicU8,

    target_position: AtomicI32,
    target_velocity: AtomicI32,
    target_torque: AtomicI16,
    csp_max_velocity: AtomicU32,

    params: Mutex<[ModeParams; 6]>,
    params_confirmed: [AtomicBool; 6],

    in_operational: AtomicBool,
    last_wkc: AtomicU16,
    expected_wkc: AtomicU16,
    health_check_requested: AtomicBool,
    degraded_events: AtomicU64,

    diag_status_word: AtomicU16,
    diag_control_word: AtomicU16,
    diag_tick: AtomicU64,

    pub telemetry: TelemetryRing,
    pub notifier: Notifier,
}

impl SharedControlState {
    pub fn new(telemetry_capacity: usize, csp_max_velocity: u32) -> Self {
        Self {
            running: AtomicBool::new(true),
            interface: Mutex::new(None),
            interface_confirmed: AtomicBool::new(false),
            requested_mode: AtomicU8::new(0),
            mode_change_requested: AtomicBool::new(false),
            mode_confirmed: AtomicBool::new(false),
            active_mode: AtomicU8::new(0),
            enable_requested: AtomicBool::new(false),
            motor_enabled: AtomicBool::new(false),
            state_changed: AtomicBool::new(false),
            phase: AtomicU8::new(CyclicPhase::Disabled as u8),
            target_position: AtomicI32::new(0),
            target_velocity: AtomicI32::new(0),
            target_torque: AtomicI16::new(0),
            csp_max_velocity: AtomicU32::new(csp_max_velocity),
            params: Mutex::new(OperationMode::ALL.map(ModeParams::defaults_for)),
            params_confirmed: Default::default(),
            in_operational: AtomicBool::new(false),
            last_wkc: AtomicU16::new(0),
            expected_wkc: AtomicU16::new(0),
            health_check_requested: AtomicBool::new(false),
            degraded_events: AtomicU64::new(0),
            diag_status_word: AtomicU16::new(0),
            diag_control_word: AtomicU16::new(0),
            diag_tick: AtomicU64::new(0),
            telemetry: TelemetryRing::new(telemetry_capacity),
            notifier: Notifier::new(NOTIFICATION_CAPACITY),
        }
    }

    // ─── Run Flag ───────────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clear the run flag. Every thread exits at its next check.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    // ─── Interface Selection ────────────────────────────────────────

    pub fn select_interface(&self, name: &str) {
        *self.interface.lock() = Some(name.to_string());
        self.interface_confirmed.store(false, Ordering::Release);
    }

    /// Confirm the selected interface. `false` if none is selected.
    pub fn confirm_interface(&self) -> bool {
        let selected = self.interface.lock().is_some();
        if selected {
            self.interface_confirmed.store(true, Ordering::Release);
        }
        selected
    }

    /// The interface, once confirmed.
    pub fn confirmed_interface(&self) -> Option<String> {
        if self.interface_confirmed.load(Ordering::Acquire) {
            self.interface.lock().clone()
        } else {
            None
        }
    }

    // ─── Mode Change ────────────────────────────────────────────────

    /// Stage a mode change. Drops the mode confirmation and every
    /// parameter confirmation; zeroes the targets.
    pub fn request_mode_change(&self, mode: OperationMode) {
        self.mode_confirmed.store(false, Ordering::Release);
        for flag in &self.params_confirmed {
            flag.store(false, Ordering::Release);
        }
        self.set_target_position(0);
        self.set_target_velocity(0);
        self.set_target_torque(0);
        self.requested_mode.store(mode.code(), Ordering::Relaxed);
        self.mode_change_requested.store(true, Ordering::Release);
    }

    /// Raw requested mode code while a change is pending.
    pub fn pending_mode_change(&self) -> Option<u8> {
        if self.mode_change_requested.load(Ordering::Acquire) {
            Some(self.requested_mode.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    /// Close a pending change. On success the mode becomes the active one.
    pub fn finish_mode_change(&self, confirmed: Option<OperationMode>) {
        if let Some(mode) = confirmed {
            self.active_mode.store(mode.code(), Ordering::Relaxed);
            self.mode_confirmed.store(true, Ordering::Release);
        }
        self.mode_change_requested.store(false, Ordering::Release);
    }

    pub fn mode_change_pending(&self) -> bool {
        self.mode_change_requested.load(Ordering::Acquire)
    }

    pub fn mode_confirmed(&self) -> bool {
        self.mode_confirmed.load(Ordering::Acquire)
    }

    /// Last confirmed mode.
    pub fn active_mode(&self) -> Option<OperationMode> {
        if self.mode_confirmed() {
            OperationMode::from_u8(self.active_mode.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    // ─── Enable / Disable ───────────────────────────────────────────

    pub fn request_enable(&self) {
        self.enable_requested.store(true, Ordering::Release);
    }

    pub fn request_disable(&self) {
        self.enable_requested.store(false, Ordering::Release);
    }

    pub fn enable_requested(&self) -> bool {
        self.enable_requested.load(Ordering::Acquire)
    }

    pub fn motor_enabled(&self) -> bool {
        self.motor_enabled.load(Ordering::Acquire)
    }

    /// Update the motor-enabled flag; raises the state-changed edge on change.
    pub fn set_motor_enabled(&self, enabled: bool) {
        let previous = self.motor_enabled.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            self.state_changed.store(true, Ordering::Release);
        }
    }

    /// Consume the edge-triggered state-changed notification.
    pub fn take_state_changed(&self) -> bool {
        self.state_changed.swap(false, Ordering::AcqRel)
    }

    pub fn phase(&self) -> CyclicPhase {
        CyclicPhase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    pub fn set_phase(&self, phase: CyclicPhase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }

    // ─── Targets ────────────────────────────────────────────────────

    pub fn target_position(&self) -> i32 {
        self.target_position.load(Ordering::Acquire)
    }

    pub fn set_target_position(&self, v: i32) {
        self.target_position.store(v, Ordering::Release);
    }

    pub fn target_velocity(&self) -> i32 {
        self.target_velocity.load(Ordering::Acquire)
    }

    pub fn set_target_velocity(&self, v: i32) {
        self.target_velocity.store(v, Ordering::Release);
    }

    pub fn target_torque(&self) -> i16 {
        self.target_torque.load(Ordering::Acquire)
    }

    pub fn set_target_torque(&self, v: i16) {
        self.target_torque.store(v, Ordering::Release);
    }

    pub fn csp_max_velocity(&self) -> u32 {
        self.csp_max_velocity.load(Ordering::Acquire)
    }

    pub fn set_csp_max_velocity(&self, v: u32) {
        self.csp_max_velocity.store(v, Ordering::Release);
    }

    // ─── Parameter Blocks ───────────────────────────────────────────

    pub fn params(&self, mode: OperationMode) -> ModeParams {
        self.params.lock()[mode.slot()]
    }

    /// Store a block; its confirmation is dropped until re-applied.
    pub fn store_params(&self, params: ModeParams) {
        let slot = params.mode().slot();
        self.params.lock()[slot] = params;
        self.params_confirmed[slot].store(false, Ordering::Release);
    }

    pub fn set_params_confirmed(&self, mode: OperationMode, confirmed: bool) {
        self.params_confirmed[mode.slot()].store(confirmed, Ordering::Release);
    }

    pub fn params_confirmed(&self, mode: OperationMode) -> bool {
        self.params_confirmed[mode.slot()].load(Ordering::Acquire)
    }

    // ─── Bus Health ─────────────────────────────────────────────────

    pub fn set_in_operational(&self, v: bool) {
        self.in_operational.store(v, Ordering::Release);
    }

    pub fn in_operational(&self) -> bool {
        self.in_operational.load(Ordering::Acquire)
    }

    pub fn record_wkc(&self, wkc: u16) {
        self.last_wkc.store(wkc, Ordering::Relaxed);
    }

    pub fn last_wkc(&self) -> u16 {
        self.last_wkc.load(Ordering::Relaxed)
    }

    pub fn set_expected_wkc(&self, wkc: u16) {
        self.expected_wkc.store(wkc, Ordering::Relaxed);
    }

    pub fn expected_wkc(&self) -> u16 {
        self.expected_wkc.load(Ordering::Relaxed)
    }

    /// Raised by the cyclic loop on a sustained working-counter shortfall.
    pub fn request_health_check(&self) {
        self.degraded_events.fetch_add(1, Ordering::Relaxed);
        self.health_check_requested.store(true, Ordering::Release);
    }

    pub fn take_health_check(&self) -> bool {
        self.health_check_requested.swap(false, Ordering::AcqRel)
    }

    /// How often the cyclic loop raised the health check.
    pub fn degraded_events(&self) -> u64 {
        self.degraded_events.load(Ordering::Relaxed)
    }

    // ─── Diagnostics ────────────────────────────────────────────────

    pub fn publish_diagnostics(&self, status_word: u16, control_word: u16, tick: u64) {
        self.diag_status_word.store(status_word, Ordering::Relaxed);
        self.diag_control_word.store(control_word, Ordering::Relaxed);
        self.diag_tick.store(tick, Ordering::Release);
    }

    pub fn diagnostics(&self) -> DiagnosticSnapshot {
        let tick = self.diag_tick.load(Ordering::Acquire);
        DiagnosticSnapshot {
            status_word: self.diag_status_word.load(Ordering::Relaxed),
            control_word: self.diag_control_word.load(Ordering::Relaxed),
            tick,
            wkc: self.last_wkc(),
            expected_wkc: self.expected_wkc(),
        }
    }
}
