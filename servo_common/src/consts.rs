//! System-wide constants for the servo master.
//!
//! Single source of truth for numeric limits and default timings.
//! Configuration defaults in [`crate::config`] are built from these.

/// Maximum number of slaves on one bus segment.
pub const MAX_SLAVES: usize = 32;

/// Default cycle time in microseconds (1 kHz).
pub const CYCLE_TIME_US: u32 = 1000;

/// Shortest cycle time accepted by config validation [µs].
pub const MIN_CYCLE_TIME_US: u32 = 125;

/// Longest cycle time accepted by config validation [µs].
pub const MAX_CYCLE_TIME_US: u32 = 10_000;

/// Default telemetry ring capacity [samples].
pub const TELEMETRY_CAPACITY: usize = 10_000;

/// Consecutive working-counter shortfalls absorbed by the cyclic loop
/// before it raises the degraded-check flag.
pub const WKC_RETRY_LIMIT: u32 = 3;

/// Ticks a pending mode change may wait for the drives to report it.
pub const MODE_CHANGE_TIMEOUT_TICKS: u32 = 1000;

/// Period of the diagnostic status/control-word snapshot [ms].
pub const DIAGNOSTIC_INTERVAL_MS: u32 = 400;

/// Fixed CSP profile acceleration [counts/s²].
pub const CSP_ACCELERATION: u32 = 10_000;

/// Fixed CSP profile deceleration [counts/s²].
pub const CSP_DECELERATION: u32 = 10_000;

/// Default CSP maximum velocity until the operator confirms one [counts/s].
pub const CSP_MAX_VELOCITY: u32 = 10_000;

/// Health monitor pass period [ms].
pub const HEALTH_INTERVAL_MS: u32 = 10;

/// Consecutive shortfalls seen by the health monitor before a full check.
pub const HEALTH_SHORTFALL_THRESHOLD: u32 = 5;

/// Timeout handed to slave reconfigure/recover calls [µs].
pub const RECOVERY_TIMEOUT_US: u32 = 5000;

/// Link-state poll interval while waiting for a state [ms].
pub const STATE_POLL_INTERVAL_MS: u32 = 100;

/// Link-state wait timeout [ms].
pub const STATE_TIMEOUT_MS: u32 = 8000;

/// SDO transfer timeout [µs].
pub const SDO_TIMEOUT_US: u32 = 700_000;

/// Process-data receive timeout [µs].
pub const RECEIVE_TIMEOUT_US: u32 = 2000;

/// Settle delay after building the process image [ms].
pub const PDO_SETTLE_MS: u32 = 100;

/// Settle delay after distributed-clock configuration [ms].
pub const DC_SETTLE_MS: u32 = 200;

/// How long startup waits for an operator to confirm a network interface [ms].
pub const INTERFACE_WAIT_MS: u32 = 10_000;

/// Bounded join timeout for the RT threads at shutdown [ms].
pub const JOIN_TIMEOUT_MS: u32 = 5000;

/// Capacity of the console notification queue.
pub const NOTIFICATION_CAPACITY: usize = 256;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "config/master.toml";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert!(MAX_SLAVES > 0 && MAX_SLAVES <= u16::MAX as usize);
        assert!(MIN_CYCLE_TIME_US <= CYCLE_TIME_US && CYCLE_TIME_US <= MAX_CYCLE_TIME_US);
        assert!(TELEMETRY_CAPACITY > 0);
        assert!(WKC_RETRY_LIMIT > 0);
        assert!(STATE_POLL_INTERVAL_MS < STATE_TIMEOUT_MS);
    }

    #[test]
    fn diagnostic_interval_spans_several_cycles() {
        assert!(DIAGNOSTIC_INTERVAL_MS * 1000 > CYCLE_TIME_US);
    }
}
