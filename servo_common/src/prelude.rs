//! Prelude module for common re-exports.
//!
//! ```rust
//! use servo_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::master::MasterConfig;
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};

// ─── Wire Layout ────────────────────────────────────────────────────
pub use crate::pdo::{PdoDirection, RX_FRAME_SIZE, RxFrame, TX_FRAME_SIZE, TxFrame};

// ─── Drive ──────────────────────────────────────────────────────────
pub use crate::drive::params::ModeParams;
pub use crate::drive::{DriveState, OperationMode, StatusWord, control};

// ─── Transport ──────────────────────────────────────────────────────
pub use crate::transport::{LinkState, MasterTransport, SlaveRecord, TransportError};

// ─── Channel ────────────────────────────────────────────────────────
pub use crate::channel::{
    CycleEvent, CyclicPhase, Notification, Severity, SharedControlState, TelemetrySample,
};
