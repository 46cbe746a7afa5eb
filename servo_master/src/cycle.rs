//! Cyclic process-data exchange.
//!
//! One tick per bus cycle:
//!
//! 1. receive the frame sent last tick and record the working counter;
//! 2. on a shortfall re-send the previous outputs unchanged, escalating
//!    to the health monitor after `wkc_retry_limit` in a row;
//! 3. copy feedback from slave 1;
//! 4. stage a pending mode change (motor disabled only);
//! 5. step the enable ladder, the disable ladder or the mode dispatcher;
//! 6. publish telemetry and, every diagnostic interval, a status snapshot;
//! 7. write the outputs to every slave and transmit.
//!
//! The loop never blocks outside its deadline wait and never stops on
//! bus errors; only the run flag ends it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use servo_common::channel::{CycleEvent, CyclicPhase, SharedControlState, TelemetrySample};
use servo_common::config::master::MasterConfig;
use servo_common::drive::{DriveState, OperationMode, control};
use servo_common::pdo::{RX_FRAME_SIZE, RxFrame, TX_FRAME_SIZE, TxFrame};
use servo_common::transport::MasterTransport;
use tracing::{debug, info, warn};

use crate::dc::ClockSync;
use crate::drive::{DriveStateMachine, ModeDispatcher, Targets};
use crate::error::MasterError;
use crate::planner::PlannerError;
use crate::rt::{CycleStats, DeadlineClock, period_ns};

/// Byte offset of the mode display in the input frame.
const MODE_DISPLAY_OFFSET: usize = 12;

/// Hot-path log throttle: the first ten, then every thousandth.
#[inline]
const fn should_log(count: u64) -> bool {
    count <= 10 || count % 1000 == 0
}

// ─── Configuration ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleConfig {
    pub cycle_time: Duration,
    pub receive_timeout: Duration,
    pub wkc_retry_limit: u32,
    pub mode_change_timeout_ticks: u32,
    pub diagnostic_interval_ticks: u64,
    pub csp_acceleration: u32,
    pub csp_deceleration: u32,
    /// Mode staged before the operator confirms one.
    pub initial_mode: OperationMode,
}

impl CycleConfig {
    pub fn from_master(config: &MasterConfig) -> Self {
        Self {
            cycle_time: config.bus.cycle_time(),
            receive_timeout: config.bus.receive_timeout(),
            wkc_retry_limit: config.cyclic.wkc_retry_limit,
            mode_change_timeout_ticks: config.cyclic.mode_change_timeout_ticks,
            diagnostic_interval_ticks: config
                .cyclic
                .diagnostic_interval_ticks(config.bus.cycle_time_us),
            csp_acceleration: config.cyclic.csp_acceleration,
            csp_deceleration: config.cyclic.csp_deceleration,
            initial_mode: config.bus.initial_mode,
        }
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self::from_master(&MasterConfig::default())
    }
}

// ─── Tick Outcome / Statistics ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Feedback consumed, new outputs computed and sent.
    Exchanged,
    /// Working counter short; the previous outputs were re-sent.
    Shortfall {
        consecutive: u32,
        /// The health check was raised on this tick.
        escalated: bool,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoopStats {
    pub timing: CycleStats,
    /// Ticks with a short working counter.
    pub shortfalls: u64,
    /// Health checks raised.
    pub escalations: u64,
    pub mode_timeouts: u64,
    pub transmit_errors: u64,
}

// ─── Cycle Runner ───────────────────────────────────────────────────

pub struct CycleRunner<T: MasterTransport + ?Sized> {
    transport: Arc<T>,
    shared: Arc<SharedControlState>,
    config: CycleConfig,

    rx: RxFrame,
    tx: TxFrame,
    out_buf: [u8; RX_FRAME_SIZE],
    in_buf: [u8; TX_FRAME_SIZE],

    machine: DriveStateMachine,
    dispatcher: ModeDispatcher,
    clock_sync: ClockSync,
    dc_enabled: bool,

    slaves: u16,
    expected_wkc: u16,
    retries: u32,
    tick: u64,

    /// Mode being staged and the cycles spent waiting for it.
    staged_request: Option<u8>,
    mode_wait_ticks: u32,
    /// Mode the drives run when no change is pending.
    confirmed_mode: u8,

    stats: LoopStats,
    epoch: Instant,
}

impl<T: MasterTransport + ?Sized> CycleRunner<T> {
    pub fn new(transport: Arc<T>, shared: Arc<SharedControlState>, config: CycleConfig) -> Self {
        let dt = config.cycle_time.as_secs_f64();
        Self {
            dispatcher: ModeDispatcher::new(dt, config.csp_acceleration, config.csp_deceleration),
            transport,
            shared,
            rx: RxFrame {
                mode_of_operation: config.initial_mode.code(),
                ..RxFrame::default()
            },
            tx: TxFrame::default(),
            out_buf: [0; RX_FRAME_SIZE],
            in_buf: [0; TX_FRAME_SIZE],
            machine: DriveStateMachine::new(),
            clock_sync: ClockSync::new(),
            dc_enabled: false,
            slaves: 0,
            expected_wkc: 0,
            retries: 0,
            tick: 0,
            staged_request: None,
            mode_wait_ticks: 0,
            confirmed_mode: config.initial_mode.code(),
            stats: LoopStats::default(),
            epoch: Instant::now(),
            config,
        }
    }

    /// Latch the bus layout, seed the outputs from the current feedback
    /// and send the first frame.
    pub fn prime(&mut self) {
        self.slaves = self.transport.slave_count();
        self.expected_wkc = self.transport.expected_wkc();
        self.shared.set_expected_wkc(self.expected_wkc);
        self.dc_enabled = (1..=self.slaves)
            .any(|s| self.transport.slave(s).is_some_and(|r| r.dc_active));

        self.read_feedback();
        self.rx.control_word = control::DISABLE_VOLTAGE;
        self.hold_safe();
        self.epoch = Instant::now();
        self.transmit();

        info!(
            slaves = self.slaves,
            expected_wkc = self.expected_wkc,
            dc = self.dc_enabled,
            cycle_us = self.config.cycle_time.as_micros() as u64,
            "cyclic exchange primed"
        );
    }

    /// One bus cycle.
    pub fn tick(&mut self) -> TickOutcome {
        let wkc = self.transport.receive_process_data(self.config.receive_timeout);
        self.shared.record_wkc(wkc);
        self.tick += 1;

        if wkc < self.expected_wkc {
            return self.shortfall(wkc);
        }
        self.retries = 0;

        self.read_feedback();
        self.step_control();
        self.publish_telemetry();
        self.publish_diagnostics(wkc);
        self.transmit();
        TickOutcome::Exchanged
    }

    /// Run ticks on absolute deadlines until the run flag clears.
    pub fn run(&mut self) -> Result<(), MasterError> {
        let cycle_ns = period_ns(self.config.cycle_time.as_micros() as u32);
        let mut clock = DeadlineClock::start(cycle_ns)?;
        info!(cycle_ns, "cyclic loop started");

        while self.shared.is_running() {
            let latency = clock.wait()?;
            if !self.shared.is_running() {
                break;
            }

            let start = clock.now_ns()?;
            self.tick();
            let end = clock.now_ns()?;

            let duration = end - start;
            self.stats.timing.record(duration, latency.max(0));
            if duration > cycle_ns {
                self.stats.timing.overruns += 1;
                if should_log(self.stats.timing.overruns) {
                    warn!(
                        duration_ns = duration,
                        budget_ns = cycle_ns,
                        overruns = self.stats.timing.overruns,
                        "cycle overrun"
                    );
                }
            }

            let offset = if self.dc_enabled {
                self.clock_sync.sync(self.transport.dc_time(), cycle_ns)
            } else {
                0
            };
            clock.advance(offset);
            if clock.resync_if_behind(end) {
                self.stats.timing.resyncs += 1;
                debug!(resyncs = self.stats.timing.resyncs, "deadline resynchronized");
            }
        }

        let t = &self.stats.timing;
        info!(
            cycles = t.cycle_count,
            avg_ns = t.avg_cycle_ns(),
            max_ns = t.max_cycle_ns,
            max_latency_ns = t.max_latency_ns,
            overruns = t.overruns,
            shortfalls = self.stats.shortfalls,
            "cyclic loop stopped"
        );
        Ok(())
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Outputs of the last transmitted frame.
    pub fn last_output(&self) -> RxFrame {
        self.rx
    }

    /// Feedback of the last good exchange.
    pub fn feedback(&self) -> TxFrame {
        self.tx
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    pub fn dispatcher(&self) -> &ModeDispatcher {
        &self.dispatcher
    }

    // ─── Exchange ───────────────────────────────────────────────────

    fn shortfall(&mut self, wkc: u16) -> TickOutcome {
        self.retries += 1;
        self.stats.shortfalls += 1;
        let consecutive = self.retries;
        let escalated = consecutive >= self.config.wkc_retry_limit;

        if escalated {
            self.retries = 0;
            self.stats.escalations += 1;
            self.shared.request_health_check();
            if self.shared.in_operational() {
                if should_log(self.stats.escalations) {
                    warn!(
                        wkc,
                        expected = self.expected_wkc,
                        consecutive,
                        events = self.stats.escalations,
                        "sustained working counter shortfall, health check requested"
                    );
                }
            } else {
                debug!(wkc, expected = self.expected_wkc, "working counter short before OPERATIONAL");
            }
        }

        self.transmit();
        TickOutcome::Shortfall {
            consecutive,
            escalated,
        }
    }

    fn read_feedback(&mut self) {
        if self.slaves == 0 {
            return;
        }
        if self.transport.read_inputs(1, &mut self.in_buf).is_ok() {
            self.tx = TxFrame::decode(&self.in_buf);
        }
    }

    fn transmit(&mut self) {
        self.rx.encode_into(&mut self.out_buf);
        let mut result = Ok(());
        for slave in 1..=self.slaves {
            result = result.and(self.transport.write_outputs(slave, &self.out_buf));
        }
        if let Err(e) = result.and_then(|()| self.transport.send_process_data()) {
            self.stats.transmit_errors += 1;
            if should_log(self.stats.transmit_errors) {
                warn!(errors = self.stats.transmit_errors, "process data transmit failed: {e}");
            }
        }
    }

    // ─── Control ────────────────────────────────────────────────────

    fn step_control(&mut self) {
        let pending = if self.shared.motor_enabled() {
            None
        } else {
            self.shared.pending_mode_change()
        };

        if let Some(code) = pending {
            self.stage_mode_change(code);
        } else if self.shared.enable_requested() {
            // A re-enable while the disable ladder runs starts a new enable sequence.
            if self.shared.motor_enabled() && self.shared.phase() == CyclicPhase::Enabled {
                self.step_enabled();
            } else {
                self.step_enable();
            }
        } else {
            self.step_disable();
        }
    }

    fn hold_safe(&mut self) {
        self.rx.target_position = self.tx.actual_position;
        self.rx.target_velocity = 0;
        self.rx.target_torque = 0;
    }

    fn stage_mode_change(&mut self, code: u8) {
        let Some(mode) = OperationMode::from_u8(code) else {
            self.shared.finish_mode_change(None);
            self.shared.notifier.post(CycleEvent::UnknownMode(code));
            return;
        };

        if self.staged_request != Some(code) {
            self.staged_request = Some(code);
            self.mode_wait_ticks = 0;
            debug!(%mode, "staging mode change");
        }

        self.rx.mode_of_operation = code;
        self.rx.control_word = control::SHUTDOWN;
        self.hold_safe();
        self.dispatcher.reset();

        if self.all_slaves_report(code) {
            self.shared.finish_mode_change(Some(mode));
            self.confirmed_mode = code;
            self.staged_request = None;
            self.shared.notifier.post(CycleEvent::ModeConfirmed {
                mode,
                cycles: self.mode_wait_ticks,
            });
            self.mode_wait_ticks = 0;
            return;
        }

        self.mode_wait_ticks += 1;
        if self.mode_wait_ticks >= self.config.mode_change_timeout_ticks {
            self.rx.mode_of_operation = self.confirmed_mode;
            self.shared.finish_mode_change(None);
            self.staged_request = None;
            self.stats.mode_timeouts += 1;
            self.shared.notifier.post(CycleEvent::ModeTimedOut {
                mode,
                cycles: self.mode_wait_ticks,
                displayed: self.tx.mode_display,
            });
            self.mode_wait_ticks = 0;
        }
    }

    /// Every slave displays `code`. Slave 1 is the decoded feedback.
    fn all_slaves_report(&self, code: u8) -> bool {
        if self.tx.mode_display != code {
            return false;
        }
        let mut buf = [0u8; TX_FRAME_SIZE];
        (2..=self.slaves).all(|slave| {
            self.transport.read_inputs(slave, &mut buf).is_ok()
                && buf[MODE_DISPLAY_OFFSET] == code
        })
    }

    fn step_enable(&mut self) {
        if !self.shared.mode_confirmed() {
            self.shared.request_disable();
            self.shared.notifier.post(CycleEvent::EnableRefused);
            return;
        }

        self.shared.set_phase(CyclicPhase::Enabling);
        self.hold_safe();
        let step = self.machine.enable_step(self.tx.status_word);
        if let Some(word) = step.control_word {
            self.rx.control_word = word;
        }
        // OPERATION_ENABLED under any other word is a drive still leaving
        // it; the ladder continues once it reports SWITCHED_ON.
        if step.settled && self.rx.control_word == control::ENABLE_OPERATION {
            self.dispatcher.reset();
            self.shared.set_motor_enabled(true);
            self.shared.set_phase(CyclicPhase::Enabled);
            self.shared.notifier.post(CycleEvent::MotorEnabled);
        }
    }

    fn step_enabled(&mut self) {
        let faulted = DriveState::from_status_word(self.tx.status_word)
            .is_some_and(DriveState::is_fault);
        if faulted {
            self.shared.request_disable();
            self.shared.set_motor_enabled(false);
            self.shared.set_phase(CyclicPhase::Disabled);
            self.dispatcher.reset();
            self.rx.control_word = control::DISABLE_VOLTAGE;
            self.hold_safe();
            self.shared.notifier.post(CycleEvent::DriveFault {
                status_word: self.tx.status_word,
            });
            return;
        }

        let Some(mode) = self.shared.active_mode() else {
            self.hold_safe();
            return;
        };
        let targets = Targets {
            position: self.shared.target_position(),
            velocity: self.shared.target_velocity(),
            torque: self.shared.target_torque(),
            csp_max_velocity: self.shared.csp_max_velocity(),
        };
        if let Err(PlannerError::NotPositive(limit)) = self
            .dispatcher
            .dispatch(mode, &self.tx, &targets, &mut self.rx)
        {
            self.shared.notifier.post(CycleEvent::CspLimitNotPositive {
                target: targets.position,
                limit,
            });
        }
    }

    fn step_disable(&mut self) {
        if self.shared.phase() != CyclicPhase::Disabled {
            self.shared.set_phase(CyclicPhase::Disabling);
        }
        self.hold_safe();
        let step = self.machine.disable_step(self.tx.status_word);
        if let Some(word) = step.control_word {
            self.rx.control_word = word;
        }
        if step.settled {
            if self.shared.motor_enabled() {
                self.shared.set_motor_enabled(false);
                self.shared.notifier.post(CycleEvent::MotorDisabled);
            }
            if self.shared.phase() != CyclicPhase::Disabled {
                self.shared.set_phase(CyclicPhase::Disabled);
                self.dispatcher.reset();
            }
        }
    }

    // ─── Publishing ─────────────────────────────────────────────────

    fn publish_telemetry(&self) {
        self.shared.telemetry.push(TelemetrySample {
            timestamp_ns: self.epoch.elapsed().as_nanos() as u64,
            position: self.tx.actual_position,
            velocity: self.tx.actual_velocity,
            torque: self.tx.actual_torque,
            mode: self.tx.mode_display,
        });
    }

    fn publish_diagnostics(&self, wkc: u16) {
        let interval = self.config.diagnostic_interval_ticks;
        if interval == 0 || self.tick % interval != 0 {
            return;
        }
        self.shared
            .publish_diagnostics(self.tx.status_word, self.rx.control_word, self.tick);
        debug!(
            tick = self.tick,
            status_word = format_args!("{:#06x}", self.tx.status_word),
            control_word = format_args!("{:#06x}", self.rx.control_word),
            wkc,
            expected_wkc = self.expected_wkc,
            "diagnostics"
        );
    }
}
