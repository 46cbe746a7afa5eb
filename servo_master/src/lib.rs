//! # Servo Master
//!
//! Master-side real-time controller for a fieldbus network of CiA-402
//! servo drives. Brings the slaves through the link-state machine,
//! programs the process-data mapping, locks the distributed clock and
//! runs a fixed-period exchange loop that drives the power state
//! machine and the six operation modes.
//!
//! ## Threads
//!
//! 1. **Cyclic**: absolute-deadline loop, SCHED_FIFO, pinned core
//! 2. **Health**: slave supervision and recovery every ~10 ms
//! 3. **Console**: any non-RT caller of [`console::Console`]
//!
//! ## Bring-up
//!
//! INIT → PRE_OP → PDO mapping → DC → SAFE_OP → threads → OPERATIONAL
//! ([`runtime::MasterRuntime::start`]).

pub mod console;
pub mod cycle;
pub mod dc;
pub mod drive;
pub mod error;
pub mod health;
pub mod link;
pub mod mapping;
pub mod planner;
pub mod rt;
pub mod runtime;
pub mod sdo;
pub mod sim;
