//! Distributed-clock configuration and master/bus clock alignment.
//!
//! [`configure`] arms SYNC0 on every DC-capable slave during bring-up.
//! [`ClockSync`] runs once per cycle and yields a wake-time offset that
//! keeps the master's cycle phase-locked to the bus reference clock.

use std::time::Duration;

use servo_common::transport::{MasterTransport, TransportError};
use tracing::{debug, info};

use crate::error::MasterError;

/// Result of DC configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DcSummary {
    /// Slaves with SYNC0 armed.
    pub synced_slaves: u16,
}

/// Arm SYNC0 at `cycle` on every DC-capable slave, verify activation,
/// distribute the reference clock, then wait `settle`.
pub fn configure<T: MasterTransport + ?Sized>(
    transport: &T,
    cycle: Duration,
    settle: Duration,
) -> Result<DcSummary, MasterError> {
    let mut synced = 0u16;
    for slave in 1..=transport.slave_count() {
        let record = transport
            .slave(slave)
            .ok_or(TransportError::InvalidSlave(slave))?;
        if !record.has_dc {
            debug!(slave, "no distributed clock, SYNC0 skipped");
            continue;
        }
        transport.dc_sync0(slave, true, cycle, 0)?;
        let active = transport.slave(slave).is_some_and(|r| r.dc_active);
        if !active {
            return Err(MasterError::DcActivation { slave });
        }
        synced += 1;
    }

    transport.configure_dc()?;
    std::thread::sleep(settle);
    info!(
        synced_slaves = synced,
        cycle_us = cycle.as_micros() as u64,
        "distributed clock configured"
    );
    Ok(DcSummary {
        synced_slaves: synced,
    })
}

/// PI alignment of the master cycle to the bus reference clock.
///
/// `delta = ref_time mod cycle`, folded into `[-cycle/2, cycle/2)`; the
/// integral moves by one count in the direction of `delta` each cycle.
#[derive(Debug, Clone, Default)]
pub struct ClockSync {
    integral: i64,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset [ns] to add to the next absolute wake time.
    pub fn sync(&mut self, ref_time_ns: i64, cycle_ns: i64) -> i64 {
        if cycle_ns <= 0 {
            return 0;
        }
        let mut delta = ref_time_ns.rem_euclid(cycle_ns);
        if delta >= cycle_ns / 2 {
            delta -= cycle_ns;
        }
        self.integral += delta.signum();
        -(delta / 100) - (self.integral / 20)
    }

    pub fn integral(&self) -> i64 {
        self.integral
    }

    pub fn reset(&mut self) {
        self.integral = 0;
    }
}
