//! Per-mode target computation while the motor is enabled.
//!
//! Each tick the dispatcher fills the target fields of the outgoing
//! frame for the confirmed mode only. PP carries the set-point handshake,
//! CSP runs the trapezoidal planner; the other modes copy their target.

use servo_common::drive::{OperationMode, StatusWord, control};
use servo_common::pdo::{RxFrame, TxFrame};
use tracing::debug;

use crate::planner::{MotionParams, PlannerError, TrapezoidalPlanner};

/// Operator targets sampled once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Targets {
    pub position: i32,
    pub velocity: i32,
    pub torque: i16,
    pub csp_max_velocity: u32,
}

/// PP set-point handshake.
///
/// Target-reached only completes a set-point after the drive either
/// acknowledged it (bit 12) or dropped target-reached at least once, so
/// a stale bit from the previous move is never taken as completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PpHandshake {
    Idle,
    /// Bit 4 is dropped for one tick before a new set-point.
    Rearm,
    Pending {
        acknowledged: bool,
        reached_cleared: bool,
    },
}

#[derive(Debug)]
pub struct ModeDispatcher {
    /// Cycle time [s].
    dt: f64,
    csp_acceleration: u32,
    csp_deceleration: u32,
    planner: TrapezoidalPlanner,
    /// Target of the current or last CSP profile.
    csp_target: Option<i32>,
    csp_active: bool,
    pp: PpHandshake,
    pp_target: Option<i32>,
}

impl ModeDispatcher {
    pub fn new(dt: f64, csp_acceleration: u32, csp_deceleration: u32) -> Self {
        Self {
            dt,
            csp_acceleration,
            csp_deceleration,
            planner: TrapezoidalPlanner::new(),
            csp_target: None,
            csp_active: false,
            pp: PpHandshake::Idle,
            pp_target: None,
        }
    }

    /// Forget motion state. Called whenever the motor leaves OPERATION_ENABLED.
    pub fn reset(&mut self) {
        self.csp_target = None;
        self.csp_active = false;
        self.pp = PpHandshake::Idle;
        self.pp_target = None;
    }

    /// A CSP profile is being played out.
    pub fn csp_active(&self) -> bool {
        self.csp_active
    }

    pub fn planner(&self) -> &TrapezoidalPlanner {
        &self.planner
    }

    /// Fill `rx` for `mode`.
    ///
    /// # Errors
    /// The CSP planner rejected its parameters; `rx` holds its last target.
    pub fn dispatch(
        &mut self,
        mode: OperationMode,
        tx: &TxFrame,
        targets: &Targets,
        rx: &mut RxFrame,
    ) -> Result<(), PlannerError> {
        rx.control_word = control::ENABLE_OPERATION;
        match mode {
            OperationMode::Pp => self.profile_position(tx, targets.position, rx),
            OperationMode::Pv => {
                rx.target_velocity = targets.velocity;
            }
            OperationMode::Pt | OperationMode::Cst => {
                rx.target_position = 0;
                rx.target_velocity = 0;
                rx.target_torque = targets.torque;
            }
            OperationMode::Csv => {
                rx.target_position = 0;
                rx.target_torque = 0;
                rx.target_velocity = targets.velocity;
            }
            OperationMode::Csp => return self.cyclic_position(tx, targets, rx),
        }
        Ok(())
    }

    fn profile_position(&mut self, tx: &TxFrame, target: i32, rx: &mut RxFrame) {
        match self.pp_target {
            None => {
                // First enabled tick: the current target is the baseline.
                self.pp_target = Some(target);
                self.pp = PpHandshake::Idle;
            }
            Some(latched) if latched != target => {
                self.pp_target = Some(target);
                self.pp = match self.pp {
                    PpHandshake::Pending { .. } => PpHandshake::Rearm,
                    _ => PpHandshake::Pending {
                        acknowledged: false,
                        reached_cleared: false,
                    },
                };
                debug!(target, "PP set-point latched");
            }
            Some(_) => {}
        }

        if let Some(latched) = self.pp_target {
            rx.target_position = latched;
        }

        let status = StatusWord::from_word(tx.status_word);
        rx.control_word = match self.pp {
            PpHandshake::Idle => control::ENABLE_OPERATION,
            PpHandshake::Rearm => {
                self.pp = PpHandshake::Pending {
                    acknowledged: false,
                    reached_cleared: false,
                };
                control::ENABLE_OPERATION
            }
            PpHandshake::Pending {
                acknowledged,
                reached_cleared,
            } => {
                let acknowledged = acknowledged || status.set_point_acknowledged();
                let reached_cleared = reached_cleared || !status.target_reached();
                if status.target_reached() && (acknowledged || reached_cleared) {
                    self.pp = PpHandshake::Idle;
                    debug!(position = tx.actual_position, "PP target reached");
                    control::ENABLE_OPERATION
                } else {
                    self.pp = PpHandshake::Pending {
                        acknowledged,
                        reached_cleared,
                    };
                    control::NEW_SET_POINT
                }
            }
        };
    }

    fn cyclic_position(
        &mut self,
        tx: &TxFrame,
        targets: &Targets,
        rx: &mut RxFrame,
    ) -> Result<(), PlannerError> {
        if self.csp_target != Some(targets.position) {
            self.csp_target = Some(targets.position);
            let params = MotionParams {
                target_position: targets.position,
                max_velocity: targets.csp_max_velocity,
                acceleration: self.csp_acceleration,
                deceleration: self.csp_deceleration,
                current_position: tx.actual_position,
                current_velocity: tx.actual_velocity,
            };
            if let Err(e) = self.planner.init(&params) {
                self.csp_active = false;
                return Err(e);
            }
            self.csp_active = true;
            debug!(
                from = tx.actual_position,
                to = targets.position,
                peak = self.planner.peak_velocity(),
                "CSP profile started"
            );
        }

        if self.csp_active {
            let state = self.planner.step(self.dt);
            rx.target_position = state.position;
            if state.is_completed {
                self.csp_active = false;
                debug!(position = state.position, "CSP profile completed");
            }
        }
        Ok(())
    }
}
