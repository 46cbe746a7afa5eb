//! Drive control inside the cyclic loop.
//!
//! - [`machine`] - CiA-402 enable/disable ladders
//! - [`dispatch`] - per-mode target computation while enabled

pub mod dispatch;
pub mod machine;

pub use dispatch::{ModeDispatcher, Targets};
pub use machine::{DriveStateMachine, LadderStep};
