//! Master lifecycle: bring-up, thread spawn and bounded shutdown.
//!
//! ## Startup
//! 1. Resolve the interface (config, or wait for the console to confirm one)
//! 2. `init` + discovery
//! 3. INIT → PRE_OP
//! 4. PDO mapping, process image
//! 5. Distributed clock
//! 6. PRE_OP → SAFE_OP
//! 7. Spawn cyclic + health threads
//! 8. SAFE_OP → OPERATIONAL
//!
//! Any failure stops what was started, closes the transport and returns
//! the error.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use servo_common::channel::SharedControlState;
use servo_common::config::master::MasterConfig;
use servo_common::transport::{LinkState, MasterTransport};
use tracing::{debug, error, info, warn};

use crate::console::Console;
use crate::cycle::{CycleConfig, CycleRunner};
use crate::dc;
use crate::error::MasterError;
use crate::health::HealthMonitor;
use crate::link::LinkStateController;
use crate::mapping::PdoMapper;
use crate::rt;

const INTERFACE_POLL: Duration = Duration::from_millis(100);
const JOIN_POLL: Duration = Duration::from_millis(10);

pub const CYCLIC_THREAD: &str = "servo-cyclic";
pub const HEALTH_THREAD: &str = "servo-health";

/// Sleep up to `total` in `slice` steps, returning early once the run flag clears.
pub fn sleep_while_running(shared: &SharedControlState, total: Duration, slice: Duration) {
    let mut left = total;
    while !left.is_zero() && shared.is_running() {
        let step = left.min(slice);
        std::thread::sleep(step);
        left = left.saturating_sub(step);
    }
}

pub struct MasterRuntime<T: MasterTransport + ?Sized + 'static> {
    transport: Arc<T>,
    shared: Arc<SharedControlState>,
    config: MasterConfig,
    cyclic: Option<JoinHandle<()>>,
    health: Option<JoinHandle<()>>,
    /// `init` succeeded; the transport must be closed.
    opened: bool,
}

impl<T: MasterTransport + ?Sized + 'static> MasterRuntime<T> {
    pub fn new(transport: Arc<T>, config: MasterConfig) -> Self {
        let shared = Arc::new(SharedControlState::new(
            config.cyclic.telemetry_capacity,
            config.cyclic.csp_max_velocity,
        ));
        Self::with_shared(transport, shared, config)
    }

    /// Use an existing shared state, e.g. one a console already holds.
    pub fn with_shared(
        transport: Arc<T>,
        shared: Arc<SharedControlState>,
        config: MasterConfig,
    ) -> Self {
        Self {
            transport,
            shared,
            config,
            cyclic: None,
            health: None,
            opened: false,
        }
    }

    pub fn shared(&self) -> &Arc<SharedControlState> {
        &self.shared
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn console(&self) -> Console<T> {
        Console::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.shared),
            self.config.bus.sdo_timeout(),
        )
    }

    pub fn is_operational(&self) -> bool {
        self.shared.in_operational()
    }

    /// Bring the bus to OPERATIONAL with both threads running.
    pub fn start(&mut self) -> Result<(), MasterError> {
        match self.bring_up() {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("startup failed: {e}");
                if let Err(stop) = self.shutdown() {
                    warn!("cleanup after failed startup: {stop}");
                }
                Err(e)
            }
        }
    }

    fn bring_up(&mut self) -> Result<(), MasterError> {
        let bus = self.config.bus.clone();
        let interface = self.resolve_interface()?;

        self.transport.init(&interface)?;
        self.opened = true;
        let slaves = self.transport.discover_and_configure()?;
        info!(
            transport = self.transport.name(),
            interface = %interface,
            slaves,
            "bus opened"
        );

        let transport = Arc::clone(&self.transport);
        let shared = Arc::clone(&self.shared);
        let mut link = LinkStateController::new(
            &*transport,
            &shared,
            bus.state_poll_interval(),
            bus.state_timeout(),
        );
        link.bring_up()?;

        let image = PdoMapper::new(&*transport, bus.sdo_timeout()).configure_all(bus.pdo_settle())?;
        self.shared.set_expected_wkc(image.expected_wkc);

        dc::configure(&*transport, bus.cycle_time(), bus.dc_settle())?;
        link.advance_to(LinkState::SAFE_OP)?;

        if self.config.rt.lock_memory {
            if let Err(e) = rt::lock_memory() {
                warn!("{e}; continuing without locked memory");
            }
        }
        self.spawn_threads()?;

        link.advance_to(LinkState::OPERATIONAL)?;
        self.shared.set_in_operational(true);
        self.shared
            .notifier
            .success(format!("{slaves} slave(s) OPERATIONAL on {interface}"));
        Ok(())
    }

    fn resolve_interface(&self) -> Result<String, MasterError> {
        if let Some(name) = self.config.bus.interface.as_deref().filter(|n| !n.is_empty()) {
            self.shared.select_interface(name);
            self.shared.confirm_interface();
            return Ok(name.to_string());
        }

        let wait = self.config.bus.interface_wait();
        let deadline = Instant::now() + wait;
        info!(wait_ms = wait.as_millis() as u64, "waiting for interface confirmation");
        loop {
            if let Some(name) = self.shared.confirmed_interface() {
                return Ok(name);
            }
            if !self.shared.is_running() {
                return Err(MasterError::Cancelled);
            }
            if Instant::now() >= deadline {
                self.shared
                    .notifier
                    .error("No network interface confirmed; select one and restart");
                return Err(MasterError::InterfaceNotConfirmed {
                    waited_ms: wait.as_millis() as u64,
                });
            }
            std::thread::sleep(INTERFACE_POLL);
        }
    }

    fn spawn_threads(&mut self) -> Result<(), MasterError> {
        let mut runner = CycleRunner::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.shared),
            CycleConfig::from_master(&self.config),
        );
        let shared = Arc::clone(&self.shared);
        self.cyclic = Some(rt::spawn_rt(CYCLIC_THREAD, self.config.rt.cyclic, move || {
            runner.prime();
            if let Err(e) = runner.run() {
                error!("cyclic loop aborted: {e}");
                shared.stop();
            }
        })?);

        let mut monitor = HealthMonitor::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.shared),
            self.config.health.clone(),
        );
        self.health = Some(rt::spawn_rt(HEALTH_THREAD, self.config.rt.health, move || {
            monitor.run();
        })?);
        debug!("cyclic and health threads spawned");
        Ok(())
    }

    /// Stop both threads, request INIT on every slave and close the transport.
    ///
    /// # Errors
    /// `JoinTimeout` if a thread did not stop in time (it is left
    /// detached), `ThreadPanicked` if one panicked. The transport is
    /// closed either way.
    pub fn shutdown(&mut self) -> Result<(), MasterError> {
        self.shared.stop();
        self.shared.set_in_operational(false);

        let deadline = Instant::now() + self.config.shutdown.join_timeout();
        let timeout_ms = self.config.shutdown.join_timeout_ms as u64;
        let mut result = Ok(());
        for (thread, handle) in [
            (CYCLIC_THREAD, self.cyclic.take()),
            (HEALTH_THREAD, self.health.take()),
        ] {
            let Some(handle) = handle else {
                continue;
            };
            let outcome = join_until(thread, handle, deadline, timeout_ms);
            if let Err(e) = outcome {
                error!("{e}");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        if self.opened {
            if let Err(e) = self.transport.write_state(0, LinkState::INIT) {
                warn!("INIT request on shutdown failed: {e}");
            }
            self.transport.close();
            self.opened = false;
            info!("bus closed");
        }
        result
    }
}

impl<T: MasterTransport + ?Sized + 'static> Drop for MasterRuntime<T> {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

fn join_until(
    thread: &'static str,
    handle: JoinHandle<()>,
    deadline: Instant,
    timeout_ms: u64,
) -> Result<(), MasterError> {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return Err(MasterError::JoinTimeout { thread, timeout_ms });
        }
        std::thread::sleep(JOIN_POLL);
    }
    handle
        .join()
        .map_err(|_| MasterError::ThreadPanicked { thread })?;
    debug!(thread, "thread joined");
    Ok(())
}
