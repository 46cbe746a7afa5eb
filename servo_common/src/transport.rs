//! Master transport seam.
//!
//! The raw fieldbus master (frame construction, socket binding, slave
//! discovery bookkeeping) lives behind [`MasterTransport`]. The core only
//! consumes it: link-state requests, SDO access, the process-data image,
//! the distributed clock and per-slave recovery.
//!
//! # Lifecycle
//!
//! | Phase        | Calls                                                    | Caller          |
//! |--------------|----------------------------------------------------------|-----------------|
//! | Startup      | `init`, `discover_and_configure`                         | runtime         |
//! | PRE_OP       | `sdo_write`, `map_process_image`, `dc_sync0`, `configure_dc` | mapping, dc |
//! | Cyclic       | `receive_process_data`, `read_inputs`, `write_outputs`, `send_process_data`, `dc_time` | cyclic loop |
//! | Supervision  | `read_state`, `slave`, `write_state`, `reconfigure_slave`, `recover_slave`, `mark_lost` | health monitor |
//! | Shutdown     | `write_state(0, INIT)`, `close`                          | runtime         |
//!
//! All methods take `&self`: an implementation is shared by the cyclic
//! loop, the health monitor and the console through an `Arc`, and must
//! do its own synchronization.

use std::time::Duration;

use thiserror::Error;

// ─── Link State ─────────────────────────────────────────────────────

/// Application-layer link state of a slave, including the ERROR/ACK bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LinkState(u16);

impl LinkState {
    /// No state reported (slave silent).
    pub const NONE: Self = Self(0x00);
    pub const INIT: Self = Self(0x01);
    pub const PRE_OP: Self = Self(0x02);
    pub const BOOT: Self = Self(0x03);
    pub const SAFE_OP: Self = Self(0x04);
    pub const OPERATIONAL: Self = Self(0x08);

    /// ERROR indication when read, acknowledge request when written.
    pub const ERROR_FLAG: u16 = 0x10;

    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    /// State without the ERROR/ACK bit.
    pub const fn base(self) -> Self {
        Self(self.0 & 0x0F)
    }

    pub const fn has_error(self) -> bool {
        self.0 & Self::ERROR_FLAG != 0
    }

    /// The same state with the ERROR bit set; written, it acknowledges the error.
    pub const fn with_ack(self) -> Self {
        Self(self.0 | Self::ERROR_FLAG)
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    pub const fn name(self) -> &'static str {
        match self.base().0 {
            0x00 => "NONE",
            0x01 => "INIT",
            0x02 => "PRE_OP",
            0x03 => "BOOT",
            0x04 => "SAFE_OP",
            0x08 => "OPERATIONAL",
            _ => "INVALID",
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_error() {
            write!(f, "{}+ERROR", self.name())
        } else {
            f.write_str(self.name())
        }
    }
}

// ─── Slave Record ───────────────────────────────────────────────────

/// Snapshot of one slave as tracked by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlaveRecord {
    /// 1-based position on the bus.
    pub index: u16,
    pub state: LinkState,
    pub has_dc: bool,
    pub dc_active: bool,
    /// AL status code of the last error.
    pub al_status: u16,
    /// Marked by the health monitor when the slave stops answering.
    pub lost: bool,
}

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport initialization failed on `{interface}`: {reason}")]
    InitFailed { interface: String, reason: String },

    #[error("no slaves found on the bus")]
    NoSlaves,

    #[error("slave {0} does not exist")]
    InvalidSlave(u16),

    #[error("SDO {index:#06x}:{subindex} on slave {slave} failed (abort {abort_code:#010x})")]
    SdoAbort {
        slave: u16,
        index: u16,
        subindex: u8,
        abort_code: u32,
    },

    #[error("SDO {index:#06x}:{subindex} on slave {slave} timed out")]
    SdoTimeout { slave: u16, index: u16, subindex: u8 },

    #[error("process image not mapped")]
    NotMapped,

    #[error("frame length mismatch: expected {expected}, got {actual}")]
    FrameLength { expected: usize, actual: usize },

    #[error("transport I/O error: {0}")]
    Io(String),
}

// ─── Transport Trait ────────────────────────────────────────────────

/// Fieldbus master consumed by the servo core.
///
/// Slave indices are 1-based; `0` in [`write_state`](Self::write_state)
/// addresses every slave.
pub trait MasterTransport: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &'static str;

    /// Bind to a network interface.
    fn init(&self, interface: &str) -> Result<(), TransportError>;

    /// Scan the bus and build the slave table. Returns the slave count.
    fn discover_and_configure(&self) -> Result<u16, TransportError>;

    fn slave_count(&self) -> u16;

    /// Last known record of a slave, refreshed by [`read_state`](Self::read_state).
    fn slave(&self, index: u16) -> Option<SlaveRecord>;

    /// Refresh every slave's state and return the lowest state on the bus.
    fn read_state(&self) -> LinkState;

    /// Request a state for one slave, or all slaves with `slave == 0`.
    fn write_state(&self, slave: u16, state: LinkState) -> Result<(), TransportError>;

    /// Upload an object into `buf`. Returns the byte count.
    fn sdo_read(
        &self,
        slave: u16,
        index: u16,
        subindex: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Download `data` to an object.
    fn sdo_write(
        &self,
        slave: u16,
        index: u16,
        subindex: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(), TransportError>;

    /// Build the shared I/O image from the programmed mappings. Returns its size in bytes.
    fn map_process_image(&self) -> Result<usize, TransportError>;

    /// Working counter a complete exchange returns
    /// (`outputs_wkc * 2 + inputs_wkc`).
    fn expected_wkc(&self) -> u16;

    /// Enable or disable SYNC0 on a slave.
    fn dc_sync0(
        &self,
        slave: u16,
        active: bool,
        cycle: Duration,
        shift_ns: i32,
    ) -> Result<(), TransportError>;

    /// Measure propagation delays and distribute the reference clock.
    fn configure_dc(&self) -> Result<(), TransportError>;

    /// Reference clock time of the last exchange [ns].
    fn dc_time(&self) -> i64;

    fn send_process_data(&self) -> Result<(), TransportError>;

    /// Wait for the frame sent last. Returns the working counter, `0` on no frame.
    fn receive_process_data(&self, timeout: Duration) -> u16;

    /// Copy a slave's output bytes into the image.
    fn write_outputs(&self, slave: u16, data: &[u8]) -> Result<(), TransportError>;

    /// Copy a slave's input bytes out of the image.
    fn read_inputs(&self, slave: u16, buf: &mut [u8]) -> Result<(), TransportError>;

    /// Re-run configuration for a slave that fell out of OPERATIONAL.
    fn reconfigure_slave(&self, slave: u16, timeout: Duration) -> bool;

    /// Re-attach a lost slave. `true` once it answers again.
    fn recover_slave(&self, slave: u16, timeout: Duration) -> bool;

    fn mark_lost(&self, slave: u16, lost: bool);

    /// Release the interface.
    fn close(&self);
}

// ─── AL Status ──────────────────────────────────────────────────────

/// Human-readable AL status code.
pub fn al_status_description(code: u16) -> &'static str {
    match code {
        0x0000 => "No error",
        0x0001 => "Unspecified error",
        0x0002 => "No memory",
        0x0011 => "Invalid requested state change",
        0x0012 => "Unknown requested state",
        0x0013 => "Bootstrap not supported",
        0x0014 => "No valid firmware",
        0x0015 => "Invalid mailbox configuration (bootstrap)",
        0x0016 => "Invalid mailbox configuration",
        0x0017 => "Invalid sync manager configuration",
        0x0018 => "No valid inputs available",
        0x0019 => "No valid outputs",
        0x001A => "Synchronization error",
        0x001B => "Sync manager watchdog",
        0x001C => "Invalid sync manager types",
        0x001D => "Invalid output configuration",
        0x001E => "Invalid input configuration",
        0x001F => "Invalid watchdog configuration",
        0x0020 => "Slave needs cold start",
        0x0021 => "Slave needs INIT",
        0x0022 => "Slave needs PREOP",
        0x0023 => "Slave needs SAFEOP",
        0x0024 => "Invalid input mapping",
        0x0025 => "Invalid output mapping",
        0x0026 => "Inconsistent settings",
        0x0027 => "Freerun not supported",
        0x0028 => "Synchronization not supported",
        0x0029 => "Freerun needs 3 buffer mode",
        0x002A => "Background watchdog",
        0x002B => "No valid inputs and outputs",
        0x002C => "Fatal sync error",
        0x002D => "No sync error",
        0x0030 => "Invalid DC SYNC configuration",
        0x0031 => "Invalid DC latch configuration",
        0x0032 => "PLL error",
        0x0033 => "DC sync IO error",
        0x0034 => "DC sync timeout error",
        0x0035 => "DC invalid sync cycle time",
        0x0036 => "DC invalid sync0 cycle time",
        0x0037 => "DC invalid sync1 cycle time",
        0x0050 => "EEPROM no access",
        0x0051 => "EEPROM error",
        0x0060 => "Slave restarted locally",
        0x0061 => "Device identification value updated",
        0x00F0 => "Application controller available",
        _ => "Unknown AL status",
    }
}
