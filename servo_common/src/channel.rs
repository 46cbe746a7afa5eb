//! Control/telemetry channel between the real-time threads and the console.
//!
//! - [`shared`] - Atomics for requests, flags, targets and bus health
//! - [`ring`] - Single-writer telemetry ring with gap-tolerant reads
//! - [`notify`] - Bounded, non-blocking notification queue

pub mod notify;
pub mod ring;
pub mod shared;

pub use notify::{CycleEvent, Message, Notification, Notifier, Severity};
pub use ring::{DrainStats, TelemetryRing, TelemetrySample};
pub use shared::{CyclicPhase, DiagnosticSnapshot, SharedControlState};
