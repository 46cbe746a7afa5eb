//! Link-state controller.
//!
//! Walks the slaves through INIT → PRE_OP → SAFE_OP → OPERATIONAL. Each
//! transition is requested for the whole bus and then polled until every
//! slave reports it, a slave reports an ERROR-flagged state, the timeout
//! elapses or the run flag is cleared.
//!
//! | From     | To          | Done by                         |
//! |----------|-------------|---------------------------------|
//! | any      | INIT        | [`bring_up`](LinkStateController::bring_up), per slave not in PRE_OP |
//! | INIT     | PRE_OP      | `bring_up`                      |
//! | PRE_OP   | SAFE_OP     | `advance_to` after PDO and DC   |
//! | SAFE_OP  | OPERATIONAL | `advance_to` once cyclic data flows |

use std::time::{Duration, Instant};

use servo_common::channel::SharedControlState;
use servo_common::transport::{LinkState, MasterTransport, al_status_description};
use tracing::{debug, info, warn};

use crate::error::MasterError;

/// Stage that must precede `state` in the bring-up order.
const fn previous_stage(state: LinkState) -> Option<LinkState> {
    match state.raw() {
        0x02 => Some(LinkState::INIT),
        0x04 => Some(LinkState::PRE_OP),
        0x08 => Some(LinkState::SAFE_OP),
        _ => None,
    }
}

pub struct LinkStateController<'a, T: MasterTransport + ?Sized> {
    transport: &'a T,
    shared: &'a SharedControlState,
    poll_interval: Duration,
    timeout: Duration,
    stage: LinkState,
}

impl<'a, T: MasterTransport + ?Sized> LinkStateController<'a, T> {
    pub fn new(
        transport: &'a T,
        shared: &'a SharedControlState,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            shared,
            poll_interval,
            timeout,
            stage: LinkState::NONE,
        }
    }

    /// Last stage reached by the whole bus.
    pub fn stage(&self) -> LinkState {
        self.stage
    }

    /// Force every slave not already in PRE_OP into INIT, verify, then
    /// take the whole bus to PRE_OP.
    pub fn bring_up(&mut self) -> Result<(), MasterError> {
        self.transport.read_state();
        for slave in 1..=self.transport.slave_count() {
            let state = self.state_of(slave);
            if state.base() == LinkState::PRE_OP && !state.has_error() {
                continue;
            }
            debug!(slave, %state, "forcing INIT");
            self.transport.write_state(slave, LinkState::INIT)?;
            self.wait_for(slave, LinkState::INIT, self.timeout)?;
        }
        self.stage = LinkState::INIT;
        info!(slaves = self.transport.slave_count(), "all slaves in INIT or PRE_OP");
        self.advance_to(LinkState::PRE_OP)
    }

    /// Request `target` on every slave and wait for it.
    ///
    /// # Errors
    /// `StageSkipped` unless `target` directly follows the current stage.
    pub fn advance_to(&mut self, target: LinkState) -> Result<(), MasterError> {
        if previous_stage(target) != Some(self.stage) {
            return Err(MasterError::StageSkipped {
                from: self.stage,
                to: target,
            });
        }
        self.transport.write_state(0, target)?;
        self.wait_for(0, target, self.timeout)?;
        self.stage = target;
        info!(state = %target, "bus reached state");
        Ok(())
    }

    /// Poll until `slave` (or every slave for `0`) reports `target`.
    pub fn wait_for(
        &self,
        slave: u16,
        target: LinkState,
        timeout: Duration,
    ) -> Result<LinkState, MasterError> {
        let deadline = Instant::now() + timeout;
        loop {
            let lowest = self.transport.read_state();

            if let Some((bad, state, al_status)) = self.first_error(slave) {
                self.log_slave_states(target);
                return Err(MasterError::LinkState {
                    slave: bad,
                    state,
                    al_status,
                    description: al_status_description(al_status),
                });
            }

            if self.reached(slave, target) {
                return Ok(target);
            }

            if Instant::now() >= deadline {
                self.log_slave_states(target);
                let observed = if slave == 0 { lowest } else { self.state_of(slave) };
                return Err(MasterError::LinkStateTimeout {
                    slave,
                    target,
                    observed,
                });
            }

            std::thread::sleep(self.poll_interval);
            if !self.shared.is_running() {
                return Err(MasterError::Cancelled);
            }
        }
    }

    fn state_of(&self, slave: u16) -> LinkState {
        self.transport
            .slave(slave)
            .map(|r| r.state)
            .unwrap_or(LinkState::NONE)
    }

    fn slaves(&self, slave: u16) -> std::ops::RangeInclusive<u16> {
        if slave == 0 {
            1..=self.transport.slave_count()
        } else {
            slave..=slave
        }
    }

    fn reached(&self, slave: u16, target: LinkState) -> bool {
        self.slaves(slave)
            .all(|s| self.state_of(s) == target.base())
    }

    fn first_error(&self, slave: u16) -> Option<(u16, LinkState, u16)> {
        self.slaves(slave).find_map(|s| {
            let record = self.transport.slave(s)?;
            record
                .state
                .has_error()
                .then_some((s, record.state, record.al_status))
        })
    }

    /// Log every slave that is not in `target`.
    pub fn log_slave_states(&self, target: LinkState) {
        for slave in 1..=self.transport.slave_count() {
            let Some(record) = self.transport.slave(slave) else {
                continue;
            };
            if record.state != target {
                warn!(
                    slave,
                    state = %record.state,
                    al_status = format_args!("{:#06x}", record.al_status),
                    "{}",
                    al_status_description(record.al_status)
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimConfig, SimulatedBus};

    fn bus(slaves: u16) -> SimulatedBus {
        let bus = SimulatedBus::new(SimConfig {
            slave_count: slaves,
            ..SimConfig::default()
        });
        bus.init("sim0").unwrap();
        bus.discover_and_configure().unwrap();
        bus
    }

    fn controller<'a>(
        bus: &'a SimulatedBus,
        shared: &'a SharedControlState,
    ) -> LinkStateController<'a, SimulatedBus> {
        LinkStateController::new(bus, shared, Duration::from_millis(1), Duration::from_millis(50))
    }

    #[test]
    fn bring_up_reaches_pre_op() {
        let bus = bus(2);
        let shared = SharedControlState::new(16, 1000);
        let mut link = controller(&bus, &shared);
        link.bring_up().unwrap();
        assert_eq!(link.stage(), LinkState::PRE_OP);
        assert_eq!(bus.read_state(), LinkState::PRE_OP);
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        let bus = bus(1);
        let shared = SharedControlState::new(16, 1000);
        let mut link = controller(&bus, &shared);
        link.bring_up().unwrap();
        let err = link.advance_to(LinkState::OPERATIONAL).unwrap_err();
        assert!(matches!(
            err,
            MasterError::StageSkipped { from, to }
                if from == LinkState::PRE_OP && to == LinkState::OPERATIONAL
        ));
    }

    #[test]
    fn error_state_aborts_with_al_status() {
        let bus = bus(2);
        bus.fail_state_transition(2, LinkState::SAFE_OP, 0x001D);
        let shared = SharedControlState::new(16, 1000);
        let mut link = controller(&bus, &shared);
        link.bring_up().unwrap();
        let err = link.advance_to(LinkState::SAFE_OP).unwrap_err();
        match err {
            MasterError::LinkState {
                slave,
                al_status,
                description,
                ..
            } => {
                assert_eq!(slave, 2);
                assert_eq!(al_status, 0x001D);
                assert_eq!(description, "Invalid output configuration");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn silent_slave_times_out() {
        let bus = bus(2);
        let shared = SharedControlState::new(16, 1000);
        let mut link = controller(&bus, &shared);
        link.bring_up().unwrap();
        bus.disconnect_slave(1);
        let err = link.advance_to(LinkState::SAFE_OP).unwrap_err();
        assert!(matches!(err, MasterError::LinkStateTimeout { slave: 0, .. }));
    }

    #[test]
    fn cleared_run_flag_cancels_wait() {
        let bus = bus(1);
        let shared = SharedControlState::new(16, 1000);
        bus.disconnect_slave(1);
        shared.stop();
        let link = LinkStateController::new(
            &bus,
            &shared,
            Duration::from_millis(1),
            Duration::from_secs(10),
        );
        let err = link.wait_for(1, LinkState::INIT, Duration::from_secs(10)).unwrap_err();
        assert!(matches!(err, MasterError::Cancelled));
    }
}
