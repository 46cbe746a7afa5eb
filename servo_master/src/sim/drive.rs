//! Emulated CiA-402 drive.
//!
//! Decodes the control word one transition per cycle, follows the mode
//! of operation after a configurable delay and integrates a simple
//! kinematic model for the active mode.

use std::time::Duration;

use servo_common::drive::{DriveState, OperationMode, StatusWord, control};
use servo_common::pdo::{RxFrame, TxFrame, index};

const DEFAULT_PROFILE_VELOCITY: u32 = 10_000;
const DEFAULT_PROFILE_ACCELERATION: u32 = 10_000;

/// counts/s gained per second per torque unit.
const TORQUE_GAIN: f64 = 10.0;
/// Velocity clamp for the torque modes [counts/s].
const TORQUE_VELOCITY_LIMIT: f64 = 100_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    DisableVoltage,
    QuickStop,
    Shutdown,
    SwitchOn,
    EnableOperation,
    FaultReset,
}

fn decode(control_word: u16) -> Command {
    if control_word & control::FAULT_RESET != 0 {
        Command::FaultReset
    } else if control_word & 0x0002 == 0 {
        Command::DisableVoltage
    } else if control_word & 0x0004 == 0 {
        Command::QuickStop
    } else if control_word & 0x0001 == 0 {
        Command::Shutdown
    } else if control_word & 0x0008 == 0 {
        Command::SwitchOn
    } else {
        Command::EnableOperation
    }
}

#[derive(Debug, Clone)]
pub struct SimDrive {
    state: DriveState,
    fault_reset_seen: bool,

    mode_display: u8,
    /// Requested mode and cycles until it is displayed.
    pending_mode: Option<(u8, u32)>,
    mode_delay_ticks: u32,

    position: f64,
    velocity: f64,
    torque: i16,

    profile_velocity: u32,
    profile_acceleration: u32,
    profile_deceleration: u32,

    pp_target: Option<f64>,
    pp_ack: bool,
    pp_reached: bool,
    new_set_point_seen: bool,
}

impl SimDrive {
    pub fn new(mode_delay_ticks: u32) -> Self {
        Self {
            state: DriveState::SwitchOnDisabled,
            fault_reset_seen: false,
            mode_display: 0,
            pending_mode: None,
            mode_delay_ticks,
            position: 0.0,
            velocity: 0.0,
            torque: 0,
            profile_velocity: DEFAULT_PROFILE_VELOCITY,
            profile_acceleration: DEFAULT_PROFILE_ACCELERATION,
            profile_deceleration: DEFAULT_PROFILE_ACCELERATION,
            pp_target: None,
            pp_ack: false,
            pp_reached: false,
            new_set_point_seen: false,
        }
    }

    /// Apply one cycle of outputs and return the inputs.
    pub fn step(&mut self, rx: &RxFrame, dt: Duration) -> TxFrame {
        self.track_mode(rx.mode_of_operation);
        self.apply_command(rx.control_word);
        self.integrate(rx, dt.as_secs_f64());
        self.feedback()
    }

    /// Inputs without processing outputs (SAFE_OP).
    pub fn feedback(&self) -> TxFrame {
        let mut status = StatusWord::from_word(self.state as u16) | StatusWord::REMOTE;
        if self.pp_reached {
            status |= StatusWord::TARGET_REACHED;
        }
        if self.pp_ack {
            status |= StatusWord::SET_POINT_ACK;
        }
        TxFrame {
            status_word: status.bits(),
            actual_position: self.position.round() as i32,
            actual_velocity: self.velocity.round() as i32,
            actual_torque: self.torque,
            mode_display: self.mode_display,
        }
    }

    pub fn inject_fault(&mut self) {
        self.state = DriveState::Fault;
        self.halt();
    }

    pub fn set_mode_delay(&mut self, ticks: u32) {
        self.mode_delay_ticks = ticks;
    }

    pub fn state(&self) -> DriveState {
        self.state
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn mode_display(&self) -> u8 {
        self.mode_display
    }

    pub fn profile_velocity(&self) -> u32 {
        self.profile_velocity
    }

    /// SDO download into the drive profile objects. Unknown objects are accepted and ignored.
    pub fn write_object(&mut self, object: u16, data: &[u8]) {
        let mut word = [0u8; 4];
        let n = data.len().min(4);
        word[..n].copy_from_slice(&data[..n]);
        let value = u32::from_le_bytes(word);
        match object {
            index::PROFILE_VELOCITY => self.profile_velocity = value,
            index::PROFILE_ACCELERATION => self.profile_acceleration = value,
            index::PROFILE_DECELERATION => self.profile_deceleration = value,
            _ => {}
        }
    }

    /// SDO upload of a live drive object.
    pub fn read_object(&self, object: u16) -> Option<Vec<u8>> {
        let tx = self.feedback();
        let bytes = match object {
            index::STATUS_WORD => tx.status_word.to_le_bytes().to_vec(),
            index::MODE_DISPLAY => vec![tx.mode_display],
            index::POSITION_ACTUAL => tx.actual_position.to_le_bytes().to_vec(),
            index::VELOCITY_ACTUAL => tx.actual_velocity.to_le_bytes().to_vec(),
            index::TORQUE_ACTUAL => tx.actual_torque.to_le_bytes().to_vec(),
            index::PROFILE_VELOCITY => self.profile_velocity.to_le_bytes().to_vec(),
            _ => return None,
        };
        Some(bytes)
    }

    fn track_mode(&mut self, requested: u8) {
        if requested == self.mode_display || OperationMode::from_u8(requested).is_none() {
            self.pending_mode = None;
            return;
        }
        let left = match self.pending_mode {
            Some((code, left)) if code == requested => left,
            _ => self.mode_delay_ticks,
        };
        if left == 0 {
            self.mode_display = requested;
            self.pending_mode = None;
            self.pp_target = None;
            self.pp_reached = false;
        } else {
            self.pending_mode = Some((requested, left - 1));
        }
    }

    fn apply_command(&mut self, control_word: u16) {
        let command = decode(control_word);
        let reset_edge = command == Command::FaultReset && !self.fault_reset_seen;
        self.fault_reset_seen = command == Command::FaultReset;

        use DriveState::*;
        let next = match (self.state, command) {
            (Fault | FaultReaction, _) if reset_edge => SwitchOnDisabled,
            (Fault | FaultReaction, _) => Fault,
            (_, Command::FaultReset) => self.state,
            (NotReady, _) => SwitchOnDisabled,
            (_, Command::DisableVoltage | Command::QuickStop) => SwitchOnDisabled,
            (SwitchOnDisabled, Command::Shutdown) => ReadyToSwitchOn,
            (ReadyToSwitchOn, Command::SwitchOn | Command::EnableOperation) => SwitchedOn,
            (SwitchedOn, Command::EnableOperation) => OperationEnabled,
            (SwitchedOn | OperationEnabled, Command::Shutdown) => ReadyToSwitchOn,
            (OperationEnabled, Command::SwitchOn) => SwitchedOn,
            (state, _) => state,
        };

        if self.state == OperationEnabled && next != OperationEnabled {
            self.halt();
        }
        self.state = next;
    }

    fn halt(&mut self) {
        self.velocity = 0.0;
        self.torque = 0;
        self.pp_target = None;
        self.pp_ack = false;
    }

    fn integrate(&mut self, rx: &RxFrame, dt: f64) {
        if self.state != DriveState::OperationEnabled || dt <= 0.0 {
            self.velocity = 0.0;
            self.torque = 0;
            return;
        }

        match OperationMode::from_u8(self.mode_display) {
            Some(OperationMode::Csp) => {
                let target = f64::from(rx.target_position);
                self.velocity = (target - self.position) / dt;
                self.position = target;
            }
            Some(OperationMode::Csv) => {
                self.velocity = f64::from(rx.target_velocity);
                self.position += self.velocity * dt;
            }
            Some(OperationMode::Pv) => {
                let target = f64::from(rx.target_velocity);
                let rate = if target.abs() >= self.velocity.abs() {
                    self.profile_acceleration
                } else {
                    self.profile_deceleration
                };
                let step = f64::from(rate) * dt;
                let err = target - self.velocity;
                self.velocity = if err.abs() <= step {
                    target
                } else {
                    self.velocity + step.copysign(err)
                };
                self.position += self.velocity * dt;
            }
            Some(OperationMode::Pt | OperationMode::Cst) => {
                self.torque = rx.target_torque;
                self.velocity = (self.velocity + f64::from(self.torque) * TORQUE_GAIN * dt)
                    .clamp(-TORQUE_VELOCITY_LIMIT, TORQUE_VELOCITY_LIMIT);
                self.position += self.velocity * dt;
            }
            Some(OperationMode::Pp) => self.profile_position(rx, dt),
            None => self.velocity = 0.0,
        }
    }

    fn profile_position(&mut self, rx: &RxFrame, dt: f64) {
        let new_set_point = rx.control_word & control::BIT_NEW_SET_POINT != 0;
        if new_set_point && !self.new_set_point_seen {
            self.pp_target = Some(f64::from(rx.target_position));
            self.pp_ack = true;
            self.pp_reached = false;
        }
        if !new_set_point {
            self.pp_ack = false;
        }
        self.new_set_point_seen = new_set_point;

        let Some(target) = self.pp_target else {
            self.velocity = 0.0;
            return;
        };
        let step = f64::from(self.profile_velocity) * dt;
        let err = target - self.position;
        if err.abs() <= step {
            self.position = target;
            self.velocity = 0.0;
            self.pp_reached = true;
        } else {
            self.position += step.copysign(err);
            self.velocity = f64::from(self.profile_velocity).copysign(err);
        }
    }
}
