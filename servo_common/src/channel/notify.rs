//! Severity-tagged notifications for the operator console.
//!
//! Producers never block: when the queue is full the notification is
//! counted as dropped. Text notifications are also emitted as a `tracing`
//! event at the matching level when posted. The cyclic thread posts
//! [`CycleEvent`]s instead, which are plain values: they are formatted
//! and logged only when a non-RT reader takes them off the queue.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use tracing::{error, info, warn};

use crate::drive::OperationMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Success,
}

/// Events raised inside the cycle. Posting one never allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEvent {
    UnknownMode(u8),
    ModeConfirmed { mode: OperationMode, cycles: u32 },
    ModeTimedOut { mode: OperationMode, cycles: u32, displayed: u8 },
    EnableRefused,
    MotorEnabled,
    MotorDisabled,
    DriveFault { status_word: u16 },
    CspLimitNotPositive { target: i32, limit: &'static str },
}

impl CycleEvent {
    pub const fn severity(self) -> Severity {
        match self {
            Self::UnknownMode(_)
            | Self::ModeTimedOut { .. }
            | Self::DriveFault { .. }
            | Self::CspLimitNotPositive { .. } => Severity::Error,
            Self::EnableRefused => Severity::Warning,
            Self::ModeConfirmed { .. } | Self::MotorEnabled => Severity::Success,
            Self::MotorDisabled => Severity::Info,
        }
    }
}

impl fmt::Display for CycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UnknownMode(code) => write!(f, "Unknown operation mode {code} requested"),
            Self::ModeConfirmed { mode, cycles } => {
                write!(f, "Operation mode {mode} confirmed after {cycles} cycles")
            }
            Self::ModeTimedOut {
                mode,
                cycles,
                displayed,
            } => write!(
                f,
                "Mode change to {mode} timed out after {cycles} cycles (drive reports {displayed})"
            ),
            Self::EnableRefused => f.write_str("Enable refused: no operation mode confirmed"),
            Self::MotorEnabled => f.write_str("Motor enabled"),
            Self::MotorDisabled => f.write_str("Motor disabled"),
            Self::DriveFault { status_word } => write!(
                f,
                "Drive fault while enabled (status {status_word:#06x}); enable again to reset"
            ),
            Self::CspLimitNotPositive { target, limit } => {
                write!(f, "CSP target {target} rejected: {limit} must be greater than zero")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Cycle(CycleEvent),
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Cycle(event) => fmt::Display::fmt(event, f),
        }
    }
}

impl PartialEq<&str> for Message {
    fn eq(&self, other: &&str) -> bool {
        match self {
            Self::Text(text) => text == other,
            Self::Cycle(event) => event.to_string() == *other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub severity: Severity,
    pub message: Message,
}

impl Notification {
    fn log(&self) {
        let message = &self.message;
        match self.severity {
            Severity::Info | Severity::Success => info!(target: "console", "{message}"),
            Severity::Warning => warn!(target: "console", "{message}"),
            Severity::Error => error!(target: "console", "{message}"),
        }
    }
}

pub struct Notifier {
    tx: Sender<Notification>,
    rx: Receiver<Notification>,
    dropped: AtomicU64,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn notify(&self, severity: Severity, message: impl Into<String>) {
        let notification = Notification {
            severity,
            message: Message::Text(message.into()),
        };
        notification.log();
        self.push(notification);
    }

    /// Queue a cycle event. No formatting and no logging happen here.
    pub fn post(&self, event: CycleEvent) {
        self.push(Notification {
            severity: event.severity(),
            message: Message::Cycle(event),
        });
    }

    fn push(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.notify(Severity::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.notify(Severity::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.notify(Severity::Error, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.notify(Severity::Success, message);
    }

    /// A raw receiver handle. Cycle events read through it are not logged.
    pub fn subscribe(&self) -> Receiver<Notification> {
        self.rx.clone()
    }

    pub fn try_recv(&self) -> Option<Notification> {
        self.rx.try_recv().ok().map(Self::received)
    }

    /// Everything currently queued.
    pub fn drain(&self) -> Vec<Notification> {
        self.rx.try_iter().map(Self::received).collect()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn received(notification: Notification) -> Notification {
        if matches!(notification.message, Message::Cycle(_)) {
            notification.log();
        }
        notification
    }
}
