//! Servo Common Library
//!
//! Shared definitions for the servo master workspace: the process-data
//! wire layout, CiA-402 drive types, the master transport seam,
//! configuration loading and the control/telemetry channel that links
//! the real-time loop with an operator console.
//!
//! # Module Structure
//!
//! - [`config`] - Configuration loading traits and the master config file
//! - [`consts`] - Numeric limits and default timings
//! - [`pdo`] - RxFrame/TxFrame layout and PDO mapping tables
//! - [`drive`] - Drive states, operation modes, control words, parameter blocks
//! - [`transport`] - The `MasterTransport` trait and slave records
//! - [`channel`] - Shared control state, telemetry ring, notifications
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! servo_common = { path = "../servo_common" }
//! ```
//!
//! ```rust
//! use servo_common::prelude::*;
//! ```

pub mod channel;
pub mod config;
pub mod consts;
pub mod drive;
pub mod pdo;
pub mod prelude;
pub mod transport;
