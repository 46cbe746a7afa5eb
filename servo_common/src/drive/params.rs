//! Per-mode drive parameter blocks.
//!
//! An operator sets one block per operation mode. Confirming a block
//! writes it to every slave over SDO; the CSP block stays host-side and
//! only feeds the trajectory planner.
//!
//! | Mode     | Objects written                                 |
//! |----------|-------------------------------------------------|
//! | PP       | 0x6081 velocity, 0x6083 accel, 0x6084 decel     |
//! | PV, CSV  | 0x6083 accel, 0x6084 decel                      |
//! | PT, CST  | 0x6072 max torque, 0x6087 torque slope          |
//! | CSP      | none (planner max velocity)                     |

use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::OperationMode;
use crate::pdo::index;

/// Parameter block rejected before any SDO traffic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("{mode} parameter `{name}` must be greater than zero")]
    NotPositive {
        mode: OperationMode,
        name: &'static str,
    },
}

/// A value as it goes on the wire for one SDO download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoValue {
    U16(u16),
    U32(u32),
}

impl SdoValue {
    /// Little-endian bytes and their count.
    pub fn to_le_bytes(self) -> ([u8; 4], usize) {
        let mut buf = [0u8; 4];
        match self {
            Self::U16(v) => {
                buf[..2].copy_from_slice(&v.to_le_bytes());
                (buf, 2)
            }
            Self::U32(v) => {
                buf.copy_from_slice(&v.to_le_bytes());
                (buf, 4)
            }
        }
    }
}

/// One object dictionary write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdoWrite {
    pub index: u16,
    pub subindex: u8,
    pub value: SdoValue,
}

impl SdoWrite {
    const fn u32(index: u16, value: u32) -> Self {
        Self {
            index,
            subindex: 0,
            value: SdoValue::U32(value),
        }
    }

    const fn u16(index: u16, value: u16) -> Self {
        Self {
            index,
            subindex: 0,
            value: SdoValue::U16(value),
        }
    }
}

/// Writes for one block, in the order they are sent.
pub type SdoWrites = Vec<SdoWrite, 3>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PpParams {
    pub profile_velocity: u32,
    pub profile_acceleration: u32,
    pub profile_deceleration: u32,
}

impl Default for PpParams {
    fn default() -> Self {
        Self {
            profile_velocity: 10_000,
            profile_acceleration: 10_000,
            profile_deceleration: 10_000,
        }
    }
}

/// Acceleration pair used by PV and CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RampParams {
    pub acceleration: u32,
    pub deceleration: u32,
}

impl Default for RampParams {
    fn default() -> Self {
        Self {
            acceleration: 10_000,
            deceleration: 10_000,
        }
    }
}

/// Torque limits used by PT and CST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorqueParams {
    /// Per-mille of rated torque.
    pub max_torque: u16,
    /// Per-mille of rated torque per second.
    pub torque_slope: u32,
}

impl Default for TorqueParams {
    fn default() -> Self {
        Self {
            max_torque: 1000,
            torque_slope: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CspParams {
    pub max_velocity: u32,
}

impl Default for CspParams {
    fn default() -> Self {
        Self {
            max_velocity: crate::consts::CSP_MAX_VELOCITY,
        }
    }
}

/// A parameter block tagged with the mode it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeParams {
    Pp(PpParams),
    Pv(RampParams),
    Pt(TorqueParams),
    Csp(CspParams),
    Csv(RampParams),
    Cst(TorqueParams),
}

impl ModeParams {
    pub const fn mode(&self) -> OperationMode {
        match self {
            Self::Pp(_) => OperationMode::Pp,
            Self::Pv(_) => OperationMode::Pv,
            Self::Pt(_) => OperationMode::Pt,
            Self::Csp(_) => OperationMode::Csp,
            Self::Csv(_) => OperationMode::Csv,
            Self::Cst(_) => OperationMode::Cst,
        }
    }

    /// Default block for a mode.
    pub fn defaults_for(mode: OperationMode) -> Self {
        match mode {
            OperationMode::Pp => Self::Pp(PpParams::default()),
            OperationMode::Pv => Self::Pv(RampParams::default()),
            OperationMode::Pt => Self::Pt(TorqueParams::default()),
            OperationMode::Csp => Self::Csp(CspParams::default()),
            OperationMode::Csv => Self::Csv(RampParams::default()),
            OperationMode::Cst => Self::Cst(TorqueParams::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ParamError> {
        let mode = self.mode();
        let positive = |name: &'static str, v: u32| {
            if v == 0 {
                Err(ParamError::NotPositive { mode, name })
            } else {
                Ok(())
            }
        };
        match self {
            Self::Pp(p) => {
                positive("profile_velocity", p.profile_velocity)?;
                positive("profile_acceleration", p.profile_acceleration)?;
                positive("profile_deceleration", p.profile_deceleration)
            }
            Self::Pv(p) | Self::Csv(p) => {
                positive("acceleration", p.acceleration)?;
                positive("deceleration", p.deceleration)
            }
            Self::Pt(p) | Self::Cst(p) => {
                positive("max_torque", u32::from(p.max_torque))?;
                positive("torque_slope", p.torque_slope)
            }
            Self::Csp(p) => positive("max_velocity", p.max_velocity),
        }
    }

    /// SDO writes that apply this block to a drive. Empty for CSP.
    pub fn sdo_writes(&self) -> SdoWrites {
        let list = match self {
            Self::Pp(p) => [
                Some(SdoWrite::u32(index::PROFILE_VELOCITY, p.profile_velocity)),
                Some(SdoWrite::u32(index::PROFILE_ACCELERATION, p.profile_acceleration)),
                Some(SdoWrite::u32(index::PROFILE_DECELERATION, p.profile_deceleration)),
            ],
            Self::Pv(p) | Self::Csv(p) => [
                Some(SdoWrite::u32(index::PROFILE_ACCELERATION, p.acceleration)),
                Some(SdoWrite::u32(index::PROFILE_DECELERATION, p.deceleration)),
                None,
            ],
            Self::Pt(p) | Self::Cst(p) => [
                Some(SdoWrite::u16(index::MAX_TORQUE, p.max_torque)),
                Some(SdoWrite::u32(index::TORQUE_SLOPE, p.torque_slope)),
                None,
            ],
            Self::Csp(_) => [None; 3],
        };
        let mut writes = SdoWrites::new();
        for w in list.into_iter().flatten() {
            // Capacity covers the longest block.
            let _ = writes.push(w);
        }
        writes
    }
}
