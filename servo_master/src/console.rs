//! Operator console handle.
//!
//! Non-RT callers drive the master through [`Console`]: interface
//! selection, mode and parameter requests, enable/disable and targets.
//! Requests only store into the shared state; the cyclic loop acts on
//! them at its next tick. Parameter confirmation is the one blocking
//! call, since it downloads the block to every slave over SDO.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use servo_common::channel::{
    CyclicPhase, DiagnosticSnapshot, DrainStats, Notification, SharedControlState, TelemetrySample,
};
use servo_common::drive::params::ModeParams;
use servo_common::drive::{OperationMode, TargetKind};
use servo_common::transport::MasterTransport;
use tracing::debug;

use crate::error::RequestError;
use crate::sdo;

/// Snapshot of the flags an operator display shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleStatus {
    pub in_operational: bool,
    pub phase: CyclicPhase,
    pub motor_enabled: bool,
    pub mode_confirmed: bool,
    pub active_mode: Option<OperationMode>,
    pub pending_mode: Option<u8>,
    pub diagnostics: DiagnosticSnapshot,
    pub degraded_events: u64,
}

pub struct Console<T: MasterTransport + ?Sized> {
    transport: Arc<T>,
    shared: Arc<SharedControlState>,
    sdo_timeout: Duration,
}

impl<T: MasterTransport + ?Sized> Clone for Console<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            shared: Arc::clone(&self.shared),
            sdo_timeout: self.sdo_timeout,
        }
    }
}

impl<T: MasterTransport + ?Sized> Console<T> {
    pub fn new(transport: Arc<T>, shared: Arc<SharedControlState>, sdo_timeout: Duration) -> Self {
        Self {
            transport,
            shared,
            sdo_timeout,
        }
    }

    pub fn shared(&self) -> &Arc<SharedControlState> {
        &self.shared
    }

    // ─── Interface ──────────────────────────────────────────────────

    pub fn select_interface(&self, name: &str) -> Result<(), RequestError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RequestError::NoInterface);
        }
        self.shared.select_interface(name);
        debug!(interface = name, "interface selected");
        Ok(())
    }

    pub fn confirm_interface(&self) -> Result<(), RequestError> {
        if !self.shared.confirm_interface() {
            return Err(RequestError::NoInterface);
        }
        if let Some(name) = self.shared.confirmed_interface() {
            self.shared
                .notifier
                .info(format!("Network interface {name} confirmed"));
        }
        Ok(())
    }

    // ─── Mode / Parameters ──────────────────────────────────────────

    /// Stage a mode change. Drops every confirmation and zeroes the targets.
    pub fn request_mode(&self, mode: OperationMode) -> Result<(), RequestError> {
        if self.shared.motor_enabled() {
            self.shared
                .notifier
                .warning(format!("Mode change to {mode} refused: motor is enabled"));
            return Err(RequestError::MotorEnabled);
        }
        self.shared.request_mode_change(mode);
        self.shared
            .notifier
            .info(format!("Mode change to {mode} requested"));
        Ok(())
    }

    /// Store a block without applying it.
    pub fn set_params(&self, params: ModeParams) -> Result<(), RequestError> {
        if self.shared.motor_enabled() {
            return Err(RequestError::MotorEnabled);
        }
        params.validate()?;
        self.shared.store_params(params);
        Ok(())
    }

    pub fn params(&self, mode: OperationMode) -> ModeParams {
        self.shared.params(mode)
    }

    /// Store and apply a block for the active mode.
    ///
    /// CSP keeps its block host-side for the planner; every other mode is
    /// downloaded to every slave. The confirmation flag is set only when
    /// all downloads succeeded.
    pub fn confirm_params(&self, params: ModeParams) -> Result<(), RequestError> {
        if self.shared.motor_enabled() {
            self.shared
                .notifier
                .warning("Parameter change refused: motor is enabled");
            return Err(RequestError::MotorEnabled);
        }
        let active = self
            .shared
            .active_mode()
            .ok_or(RequestError::ModeNotConfirmed)?;
        let given = params.mode();
        if given != active {
            return Err(RequestError::WrongMode { given, active });
        }
        params.validate()?;
        self.shared.store_params(params);

        if let ModeParams::Csp(csp) = params {
            self.shared.set_csp_max_velocity(csp.max_velocity);
        } else if let Err(e) = sdo::apply_params(&*self.transport, &params, self.sdo_timeout) {
            self.shared
                .notifier
                .error(format!("{given} parameters not applied: {e}"));
            return Err(e);
        }

        self.shared.set_params_confirmed(given, true);
        self.shared
            .notifier
            .success(format!("{given} parameters confirmed"));
        Ok(())
    }

    // ─── Enable / Disable ───────────────────────────────────────────

    pub fn enable(&self) -> Result<(), RequestError> {
        if !self.shared.mode_confirmed() {
            self.shared
                .notifier
                .warning("Enable refused: no operation mode confirmed");
            return Err(RequestError::ModeNotConfirmed);
        }
        self.shared.request_enable();
        Ok(())
    }

    /// Request the disable ladder. The velocity target is zeroed.
    pub fn disable(&self) {
        self.shared.set_target_velocity(0);
        self.shared.request_disable();
    }

    // ─── Targets ────────────────────────────────────────────────────

    /// Set the target the active mode consumes: position [counts],
    /// velocity [counts/s] or torque [per mille of rated].
    pub fn set_target(&self, value: i64) -> Result<(), RequestError> {
        if !self.shared.motor_enabled() {
            return Err(RequestError::MotorDisabled);
        }
        let mode = self
            .shared
            .active_mode()
            .ok_or(RequestError::ModeNotConfirmed)?;
        let out_of_range = || RequestError::TargetOutOfRange { mode, value };

        match mode.target_kind() {
            TargetKind::Position => {
                let v = i32::try_from(value).map_err(|_| out_of_range())?;
                self.shared.set_target_position(v);
            }
            TargetKind::Velocity => {
                if mode == OperationMode::Pv && !self.shared.params_confirmed(mode) {
                    return Err(RequestError::ParamsNotConfirmed(mode));
                }
                let v = i32::try_from(value).map_err(|_| out_of_range())?;
                self.shared.set_target_velocity(v);
            }
            TargetKind::Torque => {
                let v = i16::try_from(value).map_err(|_| out_of_range())?;
                self.shared.set_target_torque(v);
            }
        }
        debug!(%mode, value, "target set");
        Ok(())
    }

    // ─── Outputs ────────────────────────────────────────────────────

    pub fn status(&self) -> ConsoleStatus {
        ConsoleStatus {
            in_operational: self.shared.in_operational(),
            phase: self.shared.phase(),
            motor_enabled: self.shared.motor_enabled(),
            mode_confirmed: self.shared.mode_confirmed(),
            active_mode: self.shared.active_mode(),
            pending_mode: self.shared.pending_mode_change(),
            diagnostics: self.shared.diagnostics(),
            degraded_events: self.shared.degraded_events(),
        }
    }

    /// Hand up to `max` unread telemetry samples to `f`.
    pub fn drain_telemetry(&self, max: usize, f: impl FnMut(TelemetrySample)) -> DrainStats {
        self.shared.telemetry.drain(max, f)
    }

    pub fn latest_sample(&self) -> Option<TelemetrySample> {
        self.shared.telemetry.latest()
    }

    /// Edge-triggered: `true` once per motor-enabled change.
    pub fn take_state_changed(&self) -> bool {
        self.shared.take_state_changed()
    }

    /// Everything queued. Cycle events are logged as they are read.
    pub fn notifications(&self) -> Vec<Notification> {
        self.shared.notifier.drain()
    }

    pub fn subscribe(&self) -> Receiver<Notification> {
        self.shared.notifier.subscribe()
    }

    /// Clear the run flag; every thread exits at its next check.
    pub fn stop(&self) {
        self.shared.stop();
    }
}
