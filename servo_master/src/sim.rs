//! Simulated fieldbus.
//!
//! A software bus of CiA-402 drives behind [`MasterTransport`], used by
//! `--simulate`, the tests and the benches. Link states, the object
//! dictionary, the process image, working counters and the reference
//! clock are all emulated; faults can be injected at runtime.
//!
//! [`MasterTransport`]: servo_common::transport::MasterTransport

mod bus;
mod drive;

pub use bus::{SdoRecord, SimConfig, SimulatedBus};
pub use drive::SimDrive;
