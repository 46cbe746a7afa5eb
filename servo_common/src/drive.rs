//! CiA-402 drive types.
//!
//! The drive state is never stored on its own: it is derived every cycle
//! from the status word with [`DriveState::from_status_word`].

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

pub mod params;

/// Mask applied to the status word before matching drive states.
pub const STATE_MASK: u16 = 0x006F;

// ─── Control Words ──────────────────────────────────────────────────

/// Control words emitted by the master.
pub mod control {
    /// Disable voltage: drops to SWITCH_ON_DISABLED.
    pub const DISABLE_VOLTAGE: u16 = 0x0000;
    /// Shutdown: request READY_TO_SWITCH_ON.
    pub const SHUTDOWN: u16 = 0x0006;
    /// Switch on / disable operation: request SWITCHED_ON.
    pub const SWITCH_ON: u16 = 0x0007;
    /// Enable operation. Base word while the motor is enabled.
    pub const ENABLE_OPERATION: u16 = 0x000F;
    /// Enable operation with the new set-point bit (PP).
    pub const NEW_SET_POINT: u16 = 0x001F;
    /// Fault reset (rising edge of bit 7).
    pub const FAULT_RESET: u16 = 0x0080;
    /// Bit 4: new set-point.
    pub const BIT_NEW_SET_POINT: u16 = 1 << 4;
}

bitflags! {
    /// Status word bits (0x6041).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusWord: u16 {
        const READY_TO_SWITCH_ON  = 1 << 0;
        const SWITCHED_ON         = 1 << 1;
        const OPERATION_ENABLED   = 1 << 2;
        const FAULT               = 1 << 3;
        const VOLTAGE_ENABLED     = 1 << 4;
        const QUICK_STOP          = 1 << 5;
        const SWITCH_ON_DISABLED  = 1 << 6;
        const WARNING             = 1 << 7;
        const REMOTE              = 1 << 9;
        const TARGET_REACHED      = 1 << 10;
        const INTERNAL_LIMIT      = 1 << 11;
        /// Set-point acknowledge in PP, speed zero in PV.
        const SET_POINT_ACK       = 1 << 12;
        /// Following error in PP/CSP.
        const FOLLOWING_ERROR     = 1 << 13;
    }
}

impl StatusWord {
    pub const fn from_word(word: u16) -> Self {
        Self::from_bits_retain(word)
    }

    pub const fn target_reached(self) -> bool {
        self.contains(Self::TARGET_REACHED)
    }

    pub const fn set_point_acknowledged(self) -> bool {
        self.contains(Self::SET_POINT_ACK)
    }
}

// ─── Drive State ────────────────────────────────────────────────────

/// CiA-402 power state decoded from `status_word & 0x6F`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DriveState {
    NotReady = 0x00,
    SwitchOnDisabled = 0x40,
    ReadyToSwitchOn = 0x21,
    SwitchedOn = 0x23,
    OperationEnabled = 0x27,
    Fault = 0x08,
    FaultReaction = 0x0F,
    QuickStop = 0x07,
}

impl DriveState {
    /// Decode a status word. `None` when the masked value matches no state.
    pub const fn from_status_word(status_word: u16) -> Option<Self> {
        match status_word & STATE_MASK {
            0x00 => Some(Self::NotReady),
            0x40 => Some(Self::SwitchOnDisabled),
            0x21 => Some(Self::ReadyToSwitchOn),
            0x23 => Some(Self::SwitchedOn),
            0x27 => Some(Self::OperationEnabled),
            0x08 => Some(Self::Fault),
            0x0F => Some(Self::FaultReaction),
            0x07 => Some(Self::QuickStop),
            _ => None,
        }
    }

    pub const fn is_fault(self) -> bool {
        matches!(self, Self::Fault | Self::FaultReaction)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::NotReady => "NOT_READY",
            Self::SwitchOnDisabled => "SWITCH_ON_DISABLED",
            Self::ReadyToSwitchOn => "READY_TO_SWITCH_ON",
            Self::SwitchedOn => "SWITCHED_ON",
            Self::OperationEnabled => "OPERATION_ENABLED",
            Self::Fault => "FAULT",
            Self::FaultReaction => "FAULT_REACTION",
            Self::QuickStop => "QUICK_STOP",
        }
    }
}

impl std::fmt::Display for DriveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Operation Mode ─────────────────────────────────────────────────

/// Mode of operation (0x6060 / 0x6061).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum OperationMode {
    /// Profile position.
    Pp = 1,
    /// Profile velocity.
    Pv = 3,
    /// Profile torque.
    Pt = 4,
    /// Cyclic synchronous position.
    Csp = 8,
    /// Cyclic synchronous velocity.
    Csv = 9,
    /// Cyclic synchronous torque.
    Cst = 10,
}

impl OperationMode {
    pub const ALL: [Self; 6] = [Self::Pp, Self::Pv, Self::Pt, Self::Csp, Self::Csv, Self::Cst];

    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Pp),
            3 => Some(Self::Pv),
            4 => Some(Self::Pt),
            8 => Some(Self::Csp),
            9 => Some(Self::Csv),
            10 => Some(Self::Cst),
            _ => None,
        }
    }

    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Dense index `0..6`, used for per-mode tables.
    pub const fn slot(self) -> usize {
        match self {
            Self::Pp => 0,
            Self::Pv => 1,
            Self::Pt => 2,
            Self::Csp => 3,
            Self::Csv => 4,
            Self::Cst => 5,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Pp => "PP",
            Self::Pv => "PV",
            Self::Pt => "PT",
            Self::Csp => "CSP",
            Self::Csv => "CSV",
            Self::Cst => "CST",
        }
    }

    /// Which target value the mode consumes.
    pub const fn target_kind(self) -> TargetKind {
        match self {
            Self::Pp | Self::Csp => TargetKind::Position,
            Self::Pv | Self::Csv => TargetKind::Velocity,
            Self::Pt | Self::Cst => TargetKind::Torque,
        }
    }
}

impl std::fmt::Display for OperationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Target channel driven by an operation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Position,
    Velocity,
    Torque,
}
