//! Master configuration file (`config/master.toml`).
//!
//! Every field carries a serde default so a partial file, or an empty
//! one, still loads. Call [`MasterConfig::validate`] after loading.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ConfigError, SharedConfig};
use crate::consts::*;
use crate::drive::OperationMode;

/// Top-level master configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasterConfig {
    #[serde(default)]
    pub shared: SharedConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub cyclic: CyclicConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub rt: RtSettings,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

// ─── [bus] ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Network interface. When absent, startup waits for the console to
    /// select and confirm one.
    #[serde(default)]
    pub interface: Option<String>,

    /// Cyclic exchange period [µs].
    #[serde(default = "default_cycle_time_us")]
    pub cycle_time_us: u32,

    #[serde(default = "default_state_poll_interval_ms")]
    pub state_poll_interval_ms: u32,

    #[serde(default = "default_state_timeout_ms")]
    pub state_timeout_ms: u32,

    #[serde(default = "default_sdo_timeout_us")]
    pub sdo_timeout_us: u32,

    #[serde(default = "default_receive_timeout_us")]
    pub receive_timeout_us: u32,

    #[serde(default = "default_pdo_settle_ms")]
    pub pdo_settle_ms: u32,

    #[serde(default = "default_dc_settle_ms")]
    pub dc_settle_ms: u32,

    #[serde(default = "default_interface_wait_ms")]
    pub interface_wait_ms: u32,

    /// Mode staged into the first output frame.
    #[serde(default = "default_initial_mode")]
    pub initial_mode: OperationMode,
}

fn default_cycle_time_us() -> u32 {
    CYCLE_TIME_US
}
fn default_state_poll_interval_ms() -> u32 {
    STATE_POLL_INTERVAL_MS
}
fn default_state_timeout_ms() -> u32 {
    STATE_TIMEOUT_MS
}
fn default_sdo_timeout_us() -> u32 {
    SDO_TIMEOUT_US
}
fn default_receive_timeout_us() -> u32 {
    RECEIVE_TIMEOUT_US
}
fn default_pdo_settle_ms() -> u32 {
    PDO_SETTLE_MS
}
fn default_dc_settle_ms() -> u32 {
    DC_SETTLE_MS
}
fn default_interface_wait_ms() -> u32 {
    INTERFACE_WAIT_MS
}
fn default_initial_mode() -> OperationMode {
    OperationMode::Csv
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            interface: None,
            cycle_time_us: default_cycle_time_us(),
            state_poll_interval_ms: default_state_poll_interval_ms(),
            state_timeout_ms: default_state_timeout_ms(),
            sdo_timeout_us: default_sdo_timeout_us(),
            receive_timeout_us: default_receive_timeout_us(),
            pdo_settle_ms: default_pdo_settle_ms(),
            dc_settle_ms: default_dc_settle_ms(),
            interface_wait_ms: default_interface_wait_ms(),
            initial_mode: default_initial_mode(),
        }
    }
}

impl BusConfig {
    pub fn cycle_time(&self) -> Duration {
        Duration::from_micros(u64::from(self.cycle_time_us))
    }

    pub fn state_poll_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.state_poll_interval_ms))
    }

    pub fn state_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.state_timeout_ms))
    }

    pub fn sdo_timeout(&self) -> Duration {
        Duration::from_micros(u64::from(self.sdo_timeout_us))
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_micros(u64::from(self.receive_timeout_us))
    }

    pub fn pdo_settle(&self) -> Duration {
        Duration::from_millis(u64::from(self.pdo_settle_ms))
    }

    pub fn dc_settle(&self) -> Duration {
        Duration::from_millis(u64::from(self.dc_settle_ms))
    }

    pub fn interface_wait(&self) -> Duration {
        Duration::from_millis(u64::from(self.interface_wait_ms))
    }
}

// ─── [cyclic] ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CyclicConfig {
    /// Consecutive working-counter shortfalls before the health check is raised.
    #[serde(default = "default_wkc_retry_limit")]
    pub wkc_retry_limit: u32,

    #[serde(default = "default_mode_change_timeout_ticks")]
    pub mode_change_timeout_ticks: u32,

    #[serde(default = "default_diagnostic_interval_ms")]
    pub diagnostic_interval_ms: u32,

    /// CSP planner acceleration [counts/s²].
    #[serde(default = "default_csp_acceleration")]
    pub csp_acceleration: u32,

    /// CSP planner deceleration [counts/s²].
    #[serde(default = "default_csp_deceleration")]
    pub csp_deceleration: u32,

    /// CSP max velocity used until the operator confirms a CSP block [counts/s].
    #[serde(default = "default_csp_max_velocity")]
    pub csp_max_velocity: u32,

    #[serde(default = "default_telemetry_capacity")]
    pub telemetry_capacity: usize,
}

fn default_wkc_retry_limit() -> u32 {
    WKC_RETRY_LIMIT
}
fn default_mode_change_timeout_ticks() -> u32 {
    MODE_CHANGE_TIMEOUT_TICKS
}
fn default_diagnostic_interval_ms() -> u32 {
    DIAGNOSTIC_INTERVAL_MS
}
fn default_csp_acceleration() -> u32 {
    CSP_ACCELERATION
}
fn default_csp_deceleration() -> u32 {
    CSP_DECELERATION
}
fn default_csp_max_velocity() -> u32 {
    CSP_MAX_VELOCITY
}
fn default_telemetry_capacity() -> usize {
    TELEMETRY_CAPACITY
}

impl Default for CyclicConfig {
    fn default() -> Self {
        Self {
            wkc_retry_limit: default_wkc_retry_limit(),
            mode_change_timeout_ticks: default_mode_change_timeout_ticks(),
            diagnostic_interval_ms: default_diagnostic_interval_ms(),
            csp_acceleration: default_csp_acceleration(),
            csp_deceleration: default_csp_deceleration(),
            csp_max_velocity: default_csp_max_velocity(),
            telemetry_capacity: default_telemetry_capacity(),
        }
    }
}

impl CyclicConfig {
    /// Diagnostic interval in ticks for a given cycle time (at least 1).
    pub fn diagnostic_interval_ticks(&self, cycle_time_us: u32) -> u64 {
        let cycle = u64::from(cycle_time_us.max(1));
        (u64::from(self.diagnostic_interval_ms) * 1000 / cycle).max(1)
    }
}

// ─── [health] ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_interval_ms")]
    pub interval_ms: u32,

    #[serde(default = "default_shortfall_threshold")]
    pub shortfall_threshold: u32,

    #[serde(default = "default_recovery_timeout_us")]
    pub recovery_timeout_us: u32,
}

fn default_health_interval_ms() -> u32 {
    HEALTH_INTERVAL_MS
}
fn default_shortfall_threshold() -> u32 {
    HEALTH_SHORTFALL_THRESHOLD
}
fn default_recovery_timeout_us() -> u32 {
    RECOVERY_TIMEOUT_US
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_health_interval_ms(),
            shortfall_threshold: default_shortfall_threshold(),
            recovery_timeout_us: default_recovery_timeout_us(),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.interval_ms))
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_micros(u64::from(self.recovery_timeout_us))
    }
}

// ─── [rt] ───────────────────────────────────────────────────────────

/// Scheduling of one RT thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSettings {
    /// CPU core to pin to; unpinned when absent.
    #[serde(default)]
    pub cpu_core: Option<usize>,
    /// SCHED_FIFO priority (1..=99).
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtSettings {
    /// `mlockall` before the threads start.
    #[serde(default = "default_lock_memory")]
    pub lock_memory: bool,

    #[serde(default = "default_cyclic_thread")]
    pub cyclic: ThreadSettings,

    #[serde(default = "default_health_thread")]
    pub health: ThreadSettings,
}

fn default_lock_memory() -> bool {
    true
}
fn default_cyclic_thread() -> ThreadSettings {
    ThreadSettings {
        cpu_core: Some(1),
        priority: 80,
    }
}
fn default_health_thread() -> ThreadSettings {
    ThreadSettings {
        cpu_core: Some(2),
        priority: 60,
    }
}

impl Default for RtSettings {
    fn default() -> Self {
        Self {
            lock_memory: default_lock_memory(),
            cyclic: default_cyclic_thread(),
            health: default_health_thread(),
        }
    }
}

// ─── [shutdown] ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u32,
}

fn default_join_timeout_ms() -> u32 {
    JOIN_TIMEOUT_MS
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            join_timeout_ms: default_join_timeout_ms(),
        }
    }
}

impl ShutdownConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.join_timeout_ms))
    }
}

// ─── Validation ─────────────────────────────────────────────────────

fn invalid(msg: String) -> ConfigError {
    ConfigError::ValidationError(msg)
}

impl MasterConfig {
    /// Check bounds across all sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        let bus = &self.bus;
        if bus.cycle_time_us < MIN_CYCLE_TIME_US || bus.cycle_time_us > MAX_CYCLE_TIME_US {
            return Err(invalid(format!(
                "bus.cycle_time_us {} out of range [{MIN_CYCLE_TIME_US}, {MAX_CYCLE_TIME_US}]",
                bus.cycle_time_us
            )));
        }
        if let Some(iface) = &bus.interface {
            if iface.trim().is_empty() {
                return Err(invalid("bus.interface cannot be empty".to_string()));
            }
        }
        if bus.state_poll_interval_ms == 0 || bus.state_poll_interval_ms > bus.state_timeout_ms {
            return Err(invalid(format!(
                "bus.state_poll_interval_ms {} must be in [1, state_timeout_ms = {}]",
                bus.state_poll_interval_ms, bus.state_timeout_ms
            )));
        }
        if bus.sdo_timeout_us == 0 || bus.receive_timeout_us == 0 {
            return Err(invalid("bus SDO and receive timeouts must be > 0".to_string()));
        }

        let cyclic = &self.cyclic;
        if cyclic.wkc_retry_limit == 0 {
            return Err(invalid("cyclic.wkc_retry_limit must be > 0".to_string()));
        }
        if cyclic.mode_change_timeout_ticks == 0 {
            return Err(invalid("cyclic.mode_change_timeout_ticks must be > 0".to_string()));
        }
        if cyclic.csp_acceleration == 0
            || cyclic.csp_deceleration == 0
            || cyclic.csp_max_velocity == 0
        {
            return Err(invalid(
                "cyclic CSP acceleration, deceleration and max velocity must be > 0".to_string(),
            ));
        }
        if !(16..=1_000_000).contains(&cyclic.telemetry_capacity) {
            return Err(invalid(format!(
                "cyclic.telemetry_capacity {} out of range [16, 1000000]",
                cyclic.telemetry_capacity
            )));
        }

        if self.health.interval_ms == 0 || self.health.shortfall_threshold == 0 {
            return Err(invalid(
                "health.interval_ms and health.shortfall_threshold must be > 0".to_string(),
            ));
        }

        for (name, thread) in [("cyclic", &self.rt.cyclic), ("health", &self.rt.health)] {
            if !(1..=99).contains(&thread.priority) {
                return Err(invalid(format!(
                    "rt.{name}.priority {} out of range [1, 99]",
                    thread.priority
                )));
            }
        }

        if self.shutdown.join_timeout_ms == 0 {
            return Err(invalid("shutdown.join_timeout_ms must be > 0".to_string()));
        }
        Ok(())
    }
}
