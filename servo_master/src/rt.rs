//! Real-time thread setup and absolute-deadline pacing.
//!
//! ## Thread setup
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)` once per process.
//! 2. Prefault the thread's stack.
//! 3. `sched_setaffinity` to the configured core.
//! 4. `sched_setscheduler(SCHED_FIFO, priority)`.
//!
//! Without the `rt` feature every call is a no-op and [`DeadlineClock`]
//! falls back to `Instant` + `thread::sleep`, keeping the same absolute
//! deadline arithmetic.

use std::thread::JoinHandle;

use servo_common::config::master::ThreadSettings;
use tracing::{debug, warn};

use crate::error::MasterError;

const RT_STACK_SIZE: usize = 2 * 1024 * 1024;
const PREFAULT_BYTES: usize = 256 * 1024;
const NSEC_PER_SEC: i64 = 1_000_000_000;

// ─── Cycle Statistics ───────────────────────────────────────────────

/// O(1) per-cycle timing statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub cycle_count: u64,
    /// Last cycle body duration [ns].
    pub last_cycle_ns: i64,
    pub min_cycle_ns: i64,
    pub max_cycle_ns: i64,
    pub sum_cycle_ns: i64,
    /// Body longer than the period.
    pub overruns: u64,
    /// Worst wake-up latency past the deadline [ns].
    pub max_latency_ns: i64,
    /// Deadline reset after falling more than a period behind.
    pub resyncs: u64,
}

impl CycleStats {
    pub const fn new() -> Self {
        Self {
            cycle_count: 0,
            last_cycle_ns: 0,
            min_cycle_ns: i64::MAX,
            max_cycle_ns: 0,
            sum_cycle_ns: 0,
            overruns: 0,
            max_latency_ns: 0,
            resyncs: 0,
        }
    }

    #[inline]
    pub fn record(&mut self, duration_ns: i64, latency_ns: i64) {
        self.cycle_count += 1;
        self.last_cycle_ns = duration_ns;
        self.min_cycle_ns = self.min_cycle_ns.min(duration_ns);
        self.max_cycle_ns = self.max_cycle_ns.max(duration_ns);
        self.sum_cycle_ns += duration_ns;
        self.max_latency_ns = self.max_latency_ns.max(latency_ns);
    }

    #[inline]
    pub fn avg_cycle_ns(&self) -> i64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.sum_cycle_ns / self.cycle_count as i64
        }
    }
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

// ─── RT Setup ───────────────────────────────────────────────────────

/// Lock all current and future pages.
#[cfg(feature = "rt")]
pub fn lock_memory() -> Result<(), MasterError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| MasterError::RtSetup(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
pub fn lock_memory() -> Result<(), MasterError> {
    Ok(())
}

fn prefault_stack() {
    let mut buf = [0u8; PREFAULT_BYTES];
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid, exclusive reference into `buf`.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

#[cfg(feature = "rt")]
fn set_affinity(cpu: usize) -> Result<(), MasterError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| MasterError::RtSetup(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| MasterError::RtSetup(format!("sched_setaffinity failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn set_affinity(_cpu: usize) -> Result<(), MasterError> {
    Ok(())
}

#[cfg(feature = "rt")]
fn set_scheduler(priority: i32) -> Result<(), MasterError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` outlives the call; pid 0 is the calling thread.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(MasterError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn set_scheduler(_priority: i32) -> Result<(), MasterError> {
    Ok(())
}

/// Prefault, pin and raise the calling thread.
pub fn apply_thread(settings: &ThreadSettings) -> Result<(), MasterError> {
    prefault_stack();
    if let Some(core) = settings.cpu_core {
        set_affinity(core)?;
    }
    set_scheduler(settings.priority)?;
    Ok(())
}

/// Spawn a named thread that applies `settings` before running `body`.
///
/// A failed RT setup is logged and the thread runs unprivileged.
pub fn spawn_rt<F>(
    name: &'static str,
    settings: ThreadSettings,
    body: F,
) -> Result<JoinHandle<()>, MasterError>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .stack_size(RT_STACK_SIZE)
        .spawn(move || {
            match apply_thread(&settings) {
                Ok(()) => debug!(
                    thread = name,
                    core = ?settings.cpu_core,
                    priority = settings.priority,
                    "RT setup complete"
                ),
                Err(e) => warn!(thread = name, "{e}; running without RT scheduling"),
            }
            body();
        })
        .map_err(|e| MasterError::ThreadSpawn {
            thread: name,
            reason: e.to_string(),
        })
}

// ─── Deadline Clock ─────────────────────────────────────────────────

/// First period boundary strictly after `now_ns`.
pub const fn align_ns(now_ns: i64, period_ns: i64) -> i64 {
    if period_ns <= 0 {
        return now_ns;
    }
    (now_ns / period_ns + 1) * period_ns
}

/// Absolute-deadline pacing on the monotonic clock.
///
/// Deadlines advance by the period plus an optional correction, never
/// by "now + period", so jitter does not accumulate.
pub struct DeadlineClock {
    period_ns: i64,
    next_wake_ns: i64,
    #[cfg(not(feature = "rt"))]
    origin: std::time::Instant,
}

impl DeadlineClock {
    /// Start with the first deadline on the next period boundary.
    pub fn start(period_ns: i64) -> Result<Self, MasterError> {
        let mut clock = Self {
            period_ns,
            next_wake_ns: 0,
            #[cfg(not(feature = "rt"))]
            origin: std::time::Instant::now(),
        };
        clock.next_wake_ns = align_ns(clock.now_ns()?, period_ns);
        Ok(clock)
    }

    #[cfg(feature = "rt")]
    pub fn now_ns(&self) -> Result<i64, MasterError> {
        use nix::time::{ClockId, clock_gettime};
        let ts = clock_gettime(ClockId::CLOCK_MONOTONIC)
            .map_err(|e| MasterError::RtSetup(format!("clock_gettime: {e}")))?;
        Ok(timespec_to_ns(&ts))
    }

    #[cfg(not(feature = "rt"))]
    pub fn now_ns(&self) -> Result<i64, MasterError> {
        Ok(self.origin.elapsed().as_nanos() as i64)
    }

    pub fn next_wake_ns(&self) -> i64 {
        self.next_wake_ns
    }

    pub fn period_ns(&self) -> i64 {
        self.period_ns
    }

    /// Move the deadline one period ahead, plus `correction_ns`.
    pub fn advance(&mut self, correction_ns: i64) {
        self.next_wake_ns += self.period_ns + correction_ns;
    }

    /// Sleep until the deadline. Returns the wake latency [ns].
    #[cfg(feature = "rt")]
    pub fn wait(&self) -> Result<i64, MasterError> {
        use nix::time::{ClockId, ClockNanosleepFlags, clock_nanosleep};
        let wake = timespec_from_ns(self.next_wake_ns);
        let _ = clock_nanosleep(
            ClockId::CLOCK_MONOTONIC,
            ClockNanosleepFlags::TIMER_ABSTIME,
            &wake,
        );
        Ok(self.now_ns()? - self.next_wake_ns)
    }

    #[cfg(not(feature = "rt"))]
    pub fn wait(&self) -> Result<i64, MasterError> {
        let now = self.now_ns()?;
        if self.next_wake_ns > now {
            std::thread::sleep(std::time::Duration::from_nanos(
                (self.next_wake_ns - now) as u64,
            ));
        }
        Ok(self.now_ns()? - self.next_wake_ns)
    }

    /// If more than a full period behind, restart from the next boundary.
    pub fn resync_if_behind(&mut self, now_ns: i64) -> bool {
        if now_ns - self.next_wake_ns > self.period_ns {
            self.next_wake_ns = align_ns(now_ns, self.period_ns);
            true
        } else {
            false
        }
    }
}

// ─── Time Helpers ───────────────────────────────────────────────────

#[cfg(feature = "rt")]
fn timespec_to_ns(ts: &nix::sys::time::TimeSpec) -> i64 {
    ts.tv_sec() * NSEC_PER_SEC + ts.tv_nsec()
}

#[cfg(feature = "rt")]
fn timespec_from_ns(ns: i64) -> nix::sys::time::TimeSpec {
    nix::sys::time::TimeSpec::new(ns.div_euclid(NSEC_PER_SEC), ns.rem_euclid(NSEC_PER_SEC))
}

/// Period in nanoseconds from microseconds.
pub const fn period_ns(cycle_time_us: u32) -> i64 {
    cycle_time_us as i64 * (NSEC_PER_SEC / 1_000_000)
}
