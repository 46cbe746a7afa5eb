//! # Servo Master
//!
//! Brings a fieldbus of CiA-402 servo drives to OPERATIONAL, runs the
//! cyclic exchange and health threads, and drives them from a headless
//! console script given on the command line.
//!
//! ```text
//! servo_master --simulate --slaves 2 --mode csv --enable --target 5000 --duration 10
//! ```

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use servo_common::config::master::MasterConfig;
use servo_common::config::{ConfigError, ConfigLoader, LogLevel};
use servo_common::drive::OperationMode;
use servo_common::transport::{MasterTransport, TransportError};
use servo_master::console::Console;
use servo_master::error::MasterError;
use servo_master::runtime::{MasterRuntime, sleep_while_running};
use servo_master::sim::{SimConfig, SimulatedBus};
use tracing::{Level, error, info, info_span, warn};
use tracing_subscriber::EnvFilter;

const EXIT_FATAL: i32 = 1;
const EXIT_FORCED: i32 = 2;

const STEP_TIMEOUT: Duration = Duration::from_secs(3);
const POLL: Duration = Duration::from_millis(10);
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Servo Master: real-time CiA-402 fieldbus controller
#[derive(Parser, Debug)]
#[command(name = "servo_master")]
#[command(version)]
#[command(about = "Real-time fieldbus master for CiA-402 servo drives")]
struct Args {
    /// Path to the master configuration TOML.
    #[arg(default_value = "config/master.toml")]
    config: PathBuf,

    /// Network interface (overrides `[bus] interface`).
    #[arg(short, long)]
    interface: Option<String>,

    /// Run against the in-process simulated bus.
    #[arg(long)]
    simulate: bool,

    /// Number of simulated slaves.
    #[arg(long, default_value_t = 1)]
    slaves: u16,

    /// Operation mode to request once OPERATIONAL (pp, pv, pt, csp, csv, cst or its code).
    #[arg(long, value_parser = parse_mode)]
    mode: Option<OperationMode>,

    /// Enable the motor after the mode is confirmed.
    #[arg(long)]
    enable: bool,

    /// Target for the active mode once enabled.
    #[arg(long, allow_hyphen_values = true)]
    target: Option<i64>,

    /// Seconds to run before shutting down (default: until Ctrl+C).
    #[arg(long)]
    duration: Option<u64>,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn parse_mode(s: &str) -> Result<OperationMode, String> {
    let lower = s.to_ascii_lowercase();
    OperationMode::ALL
        .into_iter()
        .find(|m| m.name().eq_ignore_ascii_case(&lower) || lower.parse::<u8>().ok() == Some(m.code()))
        .ok_or_else(|| format!("unknown operation mode `{s}`"))
}

fn main() {
    let args = Args::parse();
    let loaded = MasterConfig::load(&args.config);
    let level = match &loaded {
        Ok(config) => config.shared.log_level,
        Err(_) => LogLevel::Info,
    };
    setup_tracing(&args, level);

    info!("Servo Master v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = match loaded {
        Ok(config) => config,
        Err(ConfigError::FileNotFound) => {
            warn!(path = %args.config.display(), "config file not found, using defaults");
            MasterConfig::default()
        }
        Err(e) => {
            error!("FATAL: {e}");
            process::exit(EXIT_FATAL);
        }
    };

    if let Err(e) = run(&args, config) {
        let forced = matches!(
            e.downcast_ref::<MasterError>(),
            Some(MasterError::JoinTimeout { .. })
        );
        error!("FATAL: {e}");
        process::exit(if forced { EXIT_FORCED } else { EXIT_FATAL });
    }

    info!("Servo Master shutdown complete");
}

fn run(args: &Args, mut config: MasterConfig) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(interface) = &args.interface {
        config.bus.interface = Some(interface.clone());
    }
    if args.simulate && config.bus.interface.is_none() {
        config.bus.interface = Some("sim0".to_string());
    }
    config.validate()?;

    let _span = info_span!("master", service = %config.shared.service_name).entered();
    info!(
        cycle_us = config.bus.cycle_time_us,
        initial_mode = %config.bus.initial_mode,
        "config OK"
    );

    if !args.simulate {
        return Err(Box::new(MasterError::Transport(TransportError::InitFailed {
            interface: config.bus.interface.clone().unwrap_or_default(),
            reason: "no hardware transport linked into this build; run with --simulate".to_string(),
        })));
    }

    let bus = Arc::new(SimulatedBus::new(SimConfig {
        slave_count: args.slaves,
        cycle_time: config.bus.cycle_time(),
        ..SimConfig::default()
    }));
    run_with(args, bus, config)
}

fn run_with<T: MasterTransport + 'static>(
    args: &Args,
    transport: Arc<T>,
    config: MasterConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut runtime = MasterRuntime::new(transport, config);
    let shared = Arc::clone(runtime.shared());
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        shared.stop();
    })?;

    runtime.start()?;
    let console = runtime.console();

    if let Err(e) = script(args, &console) {
        warn!("console script stopped: {e}");
    }
    monitor(args, &console);

    console.disable();
    wait_until(&console, STEP_TIMEOUT, |c| !c.status().motor_enabled);
    runtime.shutdown()?;
    Ok(())
}

/// Apply `--mode`, `--enable` and `--target` in order.
fn script<T: MasterTransport + ?Sized>(
    args: &Args,
    console: &Console<T>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(mode) = args.mode {
        console.request_mode(mode)?;
        if !wait_until(console, STEP_TIMEOUT, |c| c.status().pending_mode.is_none()) {
            return Err(format!("mode {mode} not confirmed in time").into());
        }
        if !console.status().mode_confirmed {
            return Err(format!("mode {mode} rejected by the drives").into());
        }
        if mode == OperationMode::Pv {
            console.confirm_params(console.params(mode))?;
        }
    }

    if args.enable {
        console.enable()?;
        if !wait_until(console, STEP_TIMEOUT, |c| c.status().motor_enabled) {
            return Err("motor did not enable in time".into());
        }
    }

    if let Some(target) = args.target {
        console.set_target(target)?;
    }
    Ok(())
}

/// Log telemetry once per second until `--duration` elapses or Ctrl+C.
fn monitor<T: MasterTransport + ?Sized>(args: &Args, console: &Console<T>) {
    let shared = Arc::clone(console.shared());
    let deadline = args
        .duration
        .map(|s| Instant::now() + Duration::from_secs(s));

    while shared.is_running() && deadline.is_none_or(|d| Instant::now() < d) {
        sleep_while_running(&shared, REPORT_INTERVAL, POLL);
        // Reading the queue logs the events posted by the cyclic thread.
        console.notifications();

        let stats = console.drain_telemetry(usize::MAX, |_| {});
        let status = console.status();
        if let Some(sample) = console.latest_sample() {
            info!(
                samples = stats.read,
                dropped = stats.dropped,
                position = sample.position,
                velocity = sample.velocity,
                torque = sample.torque,
                mode = sample.mode,
                phase = ?status.phase,
                wkc = status.diagnostics.wkc,
                "telemetry"
            );
        }
        if console.take_state_changed() {
            info!(enabled = status.motor_enabled, "motor state changed");
        }
    }
}

fn wait_until<T: MasterTransport + ?Sized>(
    console: &Console<T>,
    timeout: Duration,
    done: impl Fn(&Console<T>) -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline && console.shared().is_running() {
        console.notifications();
        if done(console) {
            return true;
        }
        std::thread::sleep(POLL);
    }
    done(console)
}

/// Setup tracing subscriber based on CLI arguments and the config level.
fn setup_tracing(args: &Args, level: LogLevel) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
