//! Slave health monitor.
//!
//! Runs beside the cyclic loop at a slow period. A pass is taken while
//! the bus is OPERATIONAL and either the working counter is short, a
//! previous pass left a slave below OPERATIONAL, or the cyclic loop
//! raised the degraded-check flag.
//!
//! | Slave state        | Action                           |
//! |--------------------|----------------------------------|
//! | SAFE_OP + ERROR    | write SAFE_OP + ACK              |
//! | SAFE_OP            | write OPERATIONAL                |
//! | other, not NONE    | reconfigure (while running)      |
//! | NONE               | mark lost                        |
//! | lost               | recover, or mark found if it answers |
//!
//! The monitor never touches the process-data frames.

use std::sync::Arc;

use heapless::Vec as HVec;
use servo_common::channel::SharedControlState;
use servo_common::config::master::HealthConfig;
use servo_common::consts::MAX_SLAVES;
use servo_common::transport::{LinkState, MasterTransport, al_status_description};
use tracing::{debug, info, warn};

/// Slave indices touched by one pass.
pub type SlaveList = HVec<u16, MAX_SLAVES>;

/// What one pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    /// A check ran on this pass.
    pub checked: bool,
    pub acknowledged: SlaveList,
    pub promoted: SlaveList,
    pub reconfigured: SlaveList,
    pub lost: SlaveList,
    pub recovered: SlaveList,
    pub found: SlaveList,
    /// Every slave was OPERATIONAL when the pass ended.
    pub all_operational: bool,
}

pub struct HealthMonitor<T: MasterTransport + ?Sized> {
    transport: Arc<T>,
    shared: Arc<SharedControlState>,
    config: HealthConfig,
    /// A slave was below OPERATIONAL last pass.
    check_pending: bool,
    consecutive_shortfalls: u32,
    passes: u64,
}

impl<T: MasterTransport + ?Sized> HealthMonitor<T> {
    pub fn new(transport: Arc<T>, shared: Arc<SharedControlState>, config: HealthConfig) -> Self {
        Self {
            transport,
            shared,
            config,
            check_pending: false,
            consecutive_shortfalls: 0,
            passes: 0,
        }
    }

    /// Passes that ran a check.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn check_pending(&self) -> bool {
        self.check_pending
    }

    /// Loop until the run flag clears.
    pub fn run(&mut self) {
        info!(interval_ms = self.config.interval_ms, "health monitor started");
        while self.shared.is_running() {
            let report = self.check_pass();
            if report.checked && report.all_operational {
                info!("all slaves resumed OPERATIONAL");
            }
            std::thread::sleep(self.config.interval());
        }
        info!(passes = self.passes, "health monitor stopped");
    }

    /// One supervision pass.
    pub fn check_pass(&mut self) -> HealthReport {
        let mut report = HealthReport::default();
        // Always consume the flag so a stale request does not linger.
        let flagged = self.shared.take_health_check();
        if !self.shared.in_operational() {
            if flagged {
                debug!("health check requested before OPERATIONAL, ignored");
            }
            return report;
        }

        let wkc = self.shared.last_wkc();
        let expected = self.shared.expected_wkc();
        let short = expected > 0 && wkc < expected;
        if !(short || flagged || self.check_pending) {
            return report;
        }

        if short {
            self.consecutive_shortfalls += 1;
            debug!(
                wkc,
                expected,
                consecutive = self.consecutive_shortfalls,
                "working counter short"
            );
            if self.consecutive_shortfalls >= self.config.shortfall_threshold {
                warn!(
                    consecutive = self.consecutive_shortfalls,
                    "sustained working counter shortfall, forcing full check"
                );
                self.consecutive_shortfalls = 0;
            }
        } else {
            self.consecutive_shortfalls = 0;
        }

        report.checked = true;
        self.passes += 1;
        self.check_pending = false;
        self.transport.read_state();

        for slave in 1..=self.transport.slave_count() {
            let Some(record) = self.transport.slave(slave) else {
                continue;
            };
            if record.state != LinkState::OPERATIONAL {
                self.check_pending = true;
                self.handle_slave(slave, record.state, record.al_status, record.lost, &mut report);
            }
            // Slaves marked lost on this pass are recovered on the next one.
            if report.lost.contains(&slave) {
                continue;
            }

            let Some(record) = self.transport.slave(slave) else {
                continue;
            };
            if record.lost {
                self.handle_lost(slave, record.state, &mut report);
            }
        }

        report.all_operational = !self.check_pending;
        report
    }

    fn handle_slave(
        &self,
        slave: u16,
        state: LinkState,
        al_status: u16,
        lost: bool,
        report: &mut HealthReport,
    ) {
        let timeout = self.config.recovery_timeout();
        if state == LinkState::SAFE_OP.with_ack() {
            warn!(
                slave,
                al_status = format_args!("{al_status:#06x}"),
                "slave in SAFE_OP+ERROR ({}), acknowledging",
                al_status_description(al_status)
            );
            if self
                .transport
                .write_state(slave, LinkState::SAFE_OP.with_ack())
                .is_ok()
            {
                let _ = report.acknowledged.push(slave);
            }
        } else if state == LinkState::SAFE_OP {
            warn!(slave, "slave in SAFE_OP, requesting OPERATIONAL");
            if self
                .transport
                .write_state(slave, LinkState::OPERATIONAL)
                .is_ok()
            {
                let _ = report.promoted.push(slave);
            }
        } else if !state.is_none() {
            if self.shared.is_running() && self.transport.reconfigure_slave(slave, timeout) {
                self.transport.mark_lost(slave, false);
                info!(slave, from = %state, "slave reconfigured");
                let _ = report.reconfigured.push(slave);
            }
        } else if !lost {
            self.transport.mark_lost(slave, true);
            self.shared
                .notifier
                .error(format!("Slave {slave} lost"));
            let _ = report.lost.push(slave);
        }
    }

    fn handle_lost(&self, slave: u16, state: LinkState, report: &mut HealthReport) {
        if state.is_none() {
            if self
                .transport
                .recover_slave(slave, self.config.recovery_timeout())
            {
                self.transport.mark_lost(slave, false);
                self.shared
                    .notifier
                    .success(format!("Slave {slave} recovered"));
                let _ = report.recovered.push(slave);
            }
        } else {
            self.transport.mark_lost(slave, false);
            self.shared.notifier.info(format!("Slave {slave} found"));
            let _ = report.found.push(slave);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mapping::PdoMapper;
    use crate::sim::{SimConfig, SimulatedBus};

    fn setup(slaves: u16) -> (Arc<SimulatedBus>, Arc<SharedControlState>, HealthMonitor<SimulatedBus>) {
        let bus = SimulatedBus::new(SimConfig {
            slave_count: slaves,
            ..SimConfig::default()
        });
        bus.init("sim0").unwrap();
        bus.discover_and_configure().unwrap();
        PdoMapper::new(&bus, Duration::ZERO)
            .configure_all(Duration::ZERO)
            .unwrap();
        bus.write_state(0, LinkState::SAFE_OP).unwrap();
        bus.write_state(0, LinkState::OPERATIONAL).unwrap();
        let bus = Arc::new(bus);

        let shared = Arc::new(SharedControlState::new(16, 10_000));
        shared.set_expected_wkc(bus.expected_wkc());
        shared.record_wkc(bus.expected_wkc());
        shared.set_in_operational(true);
        let monitor = HealthMonitor::new(Arc::clone(&bus), Arc::clone(&shared), HealthConfig::default());
        (bus, shared, monitor)
    }

    #[test]
    fn idle_when_healthy() {
        let (_bus, _shared, mut monitor) = setup(2);
        let report = monitor.check_pass();
        assert!(!report.checked);
        assert_eq!(monitor.passes(), 0);
    }

    #[test]
    fn ignored_before_operational() {
        let (_bus, shared, mut monitor) = setup(1);
        shared.set_in_operational(false);
        shared.request_health_check();
        assert!(!monitor.check_pass().checked);
        assert!(!shared.take_health_check());
    }

    #[test]
    fn acknowledges_safe_op_error_then_promotes() {
        let (bus, shared, mut monitor) = setup(2);
        bus.set_slave_state(2, LinkState::SAFE_OP.with_ack(), 0x001B);
        shared.request_health_check();

        let report = monitor.check_pass();
        assert!(report.checked);
        assert_eq!(report.acknowledged.as_slice(), &[2]);
        assert!(!report.all_operational);
        assert_eq!(bus.slave(2).unwrap().state, LinkState::SAFE_OP);

        let report = monitor.check_pass();
        assert_eq!(report.promoted.as_slice(), &[2]);
        assert_eq!(bus.slave(2).unwrap().state, LinkState::OPERATIONAL);

        let report = monitor.check_pass();
        assert!(report.checked);
        assert!(report.all_operational);
        assert!(!monitor.check_pass().checked);
    }

    #[test]
    fn lost_slave_is_recovered() {
        let (bus, shared, mut monitor) = setup(2);
        bus.disconnect_slave(1);
        shared.record_wkc(3);

        let report = monitor.check_pass();
        assert_eq!(report.lost.as_slice(), &[1]);
        assert!(bus.slave(1).unwrap().lost);

        // Still silent: recovery fails, slave stays lost.
        let report = monitor.check_pass();
        assert!(report.recovered.is_empty());
        assert!(bus.slave(1).unwrap().lost);

        bus.reconnect_slave(1);
        // Reconnected slaves report INIT: reconfigured, then found.
        let report = monitor.check_pass();
        assert_eq!(report.reconfigured.as_slice(), &[1]);
        assert!(!bus.slave(1).unwrap().lost);

        let report = monitor.check_pass();
        assert_eq!(report.promoted.as_slice(), &[1]);
        shared.record_wkc(6);
        let report = monitor.check_pass();
        assert!(report.all_operational);

        let notes = shared.notifier.drain();
        assert!(notes.iter().any(|n| n.message == "Slave 1 lost"));
    }

    #[test]
    fn lost_slave_answers_recovery_on_next_pass() {
        let (bus, shared, mut monitor) = setup(3);
        bus.disconnect_slave(2);
        bus.reconnect_on_recovery(2);
        shared.record_wkc(6);

        let report = monitor.check_pass();
        assert_eq!(report.lost.as_slice(), &[2]);
        assert!(report.recovered.is_empty());
        assert_eq!(bus.slave(2).unwrap().state, LinkState::NONE);

        let report = monitor.check_pass();
        assert_eq!(report.recovered.as_slice(), &[2]);
        assert!(report.lost.is_empty());
        let record = bus.slave(2).unwrap();
        assert!(!record.lost);
        assert_eq!(record.state, LinkState::INIT);

        let report = monitor.check_pass();
        assert_eq!(report.reconfigured.as_slice(), &[2]);
        let report = monitor.check_pass();
        assert_eq!(report.promoted.as_slice(), &[2]);

        let messages: Vec<_> = shared.notifier.drain().into_iter().map(|n| n.message.to_string()).collect();
        assert_eq!(messages, ["Slave 2 lost", "Slave 2 recovered"]);
    }
}
