//! Loading master configuration files from disk.

use std::io::Write;
use std::path::PathBuf;

use servo_common::config::master::MasterConfig;
use servo_common::config::{ConfigError, ConfigLoader, LogLevel};
use servo_common::drive::OperationMode;
use tempfile::NamedTempFile;

fn shipped_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../config/master.toml")
}

fn write_temp(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn shipped_config_matches_defaults() {
    let config = MasterConfig::load(&shipped_config()).unwrap();
    let defaults = MasterConfig::default();

    assert!(config.validate().is_ok());
    assert_eq!(config.shared.log_level, LogLevel::Info);
    assert_eq!(config.bus.interface, None);
    assert_eq!(config.bus.cycle_time_us, defaults.bus.cycle_time_us);
    assert_eq!(config.bus.sdo_timeout_us, defaults.bus.sdo_timeout_us);
    assert_eq!(config.bus.initial_mode, OperationMode::Csv);
    assert_eq!(config.cyclic.wkc_retry_limit, defaults.cyclic.wkc_retry_limit);
    assert_eq!(
        config.cyclic.mode_change_timeout_ticks,
        defaults.cyclic.mode_change_timeout_ticks
    );
    assert_eq!(config.health.shortfall_threshold, defaults.health.shortfall_threshold);
    assert_eq!(config.rt.cyclic, defaults.rt.cyclic);
    assert_eq!(config.rt.health, defaults.rt.health);
    assert_eq!(config.shutdown.join_timeout_ms, defaults.shutdown.join_timeout_ms);
}

#[test]
fn missing_file_is_distinguished() {
    let dir = tempfile::tempdir().unwrap();
    let result = MasterConfig::load(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::FileNotFound)));
}

#[test]
fn mistyped_value_is_a_parse_error() {
    let file = write_temp("[bus]\ncycle_time_us = \"fast\"\n");
    match MasterConfig::load(file.path()) {
        Err(ConfigError::ParseError(msg)) => assert!(msg.contains("cycle_time_us")),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn unknown_mode_is_a_parse_error() {
    let file = write_temp("[bus]\ninitial_mode = \"homing\"\n");
    assert!(matches!(
        MasterConfig::load(file.path()),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn out_of_range_values_load_but_fail_validation() {
    let file = write_temp(
        r#"
[cyclic]
telemetry_capacity = 4

[health]
interval_ms = 0
"#,
    );
    let config = MasterConfig::load(file.path()).unwrap();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ValidationError(_))
    ));
}

#[test]
fn overrides_survive_round_trip_through_disk() {
    let file = write_temp(
        r#"
[shared]
service_name = "bench-rig"
log_level = "debug"

[bus]
interface = "enp3s0"
cycle_time_us = 250
initial_mode = "pp"

[rt]
lock_memory = false
"#,
    );
    let config = MasterConfig::load(file.path()).unwrap();
    assert_eq!(config.shared.service_name, "bench-rig");
    assert_eq!(config.shared.log_level, LogLevel::Debug);
    assert_eq!(config.bus.interface.as_deref(), Some("enp3s0"));
    assert_eq!(config.bus.cycle_time_us, 250);
    assert_eq!(config.bus.initial_mode, OperationMode::Pp);
    assert!(!config.rt.lock_memory);
    assert!(config.validate().is_ok());
}
