//! Process-data wire layout and PDO mapping tables.
//!
//! The slave firmware parses the cyclic frames by byte offset, so the
//! layout is fixed here with explicit little-endian encode/decode rather
//! than a packed struct. Field order and widths follow the mapping
//! objects programmed during bring-up (see [`RX_MAPPING`], [`TX_MAPPING`]).
//!
//! | Offset | RxFrame (master → slave) | TxFrame (slave → master) |
//! |--------|--------------------------|--------------------------|
//! | 0      | control word `u16`       | status word `u16`        |
//! | 2      | target position `i32`    | actual position `i32`    |
//! | 6      | target velocity `i32`    | actual velocity `i32`    |
//! | 10     | target torque `i16`      | actual torque `i16`      |
//! | 12     | mode of operation `u8`   | mode display `u8`        |
//! | 13     | padding                  | padding                  |

use static_assertions::const_assert_eq;

/// Encoded size of [`RxFrame`] in bytes.
pub const RX_FRAME_SIZE: usize = 14;

/// Encoded size of [`TxFrame`] in bytes.
pub const TX_FRAME_SIZE: usize = 14;

// ─── Object Dictionary Indices ──────────────────────────────────────

/// CoE object dictionary indices used by the master.
pub mod index {
    /// RxPDO mapping object (first).
    pub const RX_PDO_MAPPING: u16 = 0x1600;
    /// TxPDO mapping object (first).
    pub const TX_PDO_MAPPING: u16 = 0x1A00;
    /// Sync manager 2 (outputs) PDO assignment.
    pub const RX_PDO_ASSIGN: u16 = 0x1C12;
    /// Sync manager 3 (inputs) PDO assignment.
    pub const TX_PDO_ASSIGN: u16 = 0x1C13;

    pub const CONTROL_WORD: u16 = 0x6040;
    pub const STATUS_WORD: u16 = 0x6041;
    pub const MODE_OF_OPERATION: u16 = 0x6060;
    pub const MODE_DISPLAY: u16 = 0x6061;
    pub const POSITION_ACTUAL: u16 = 0x6064;
    pub const VELOCITY_ACTUAL: u16 = 0x606C;
    pub const TARGET_TORQUE: u16 = 0x6071;
    pub const MAX_TORQUE: u16 = 0x6072;
    pub const TORQUE_ACTUAL: u16 = 0x6077;
    pub const TARGET_POSITION: u16 = 0x607A;
    pub const MAX_PROFILE_VELOCITY: u16 = 0x607F;
    pub const PROFILE_VELOCITY: u16 = 0x6081;
    pub const PROFILE_ACCELERATION: u16 = 0x6083;
    pub const PROFILE_DECELERATION: u16 = 0x6084;
    pub const TORQUE_SLOPE: u16 = 0x6087;
    pub const TARGET_VELOCITY: u16 = 0x60FF;
}

// ─── Mapping Tables ─────────────────────────────────────────────────

/// One PDO mapping entry: object index, subindex and bit length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdoEntry {
    pub index: u16,
    pub subindex: u8,
    pub bits: u8,
}

impl PdoEntry {
    pub const fn new(index: u16, subindex: u8, bits: u8) -> Self {
        Self {
            index,
            subindex,
            bits,
        }
    }

    /// Padding entry of the given width (index 0).
    pub const fn padding(bits: u8) -> Self {
        Self::new(0, 0, bits)
    }

    /// Mapping word as written to the mapping object: `index:16 | sub:8 | bits:8`.
    pub const fn word(&self) -> u32 {
        ((self.index as u32) << 16) | ((self.subindex as u32) << 8) | self.bits as u32
    }
}

/// RxPDO mapping, in wire order.
pub const RX_MAPPING: [PdoEntry; 6] = [
    PdoEntry::new(index::CONTROL_WORD, 0, 16),
    PdoEntry::new(index::TARGET_POSITION, 0, 32),
    PdoEntry::new(index::TARGET_VELOCITY, 0, 32),
    PdoEntry::new(index::TARGET_TORQUE, 0, 16),
    PdoEntry::new(index::MODE_OF_OPERATION, 0, 8),
    PdoEntry::padding(8),
];

/// TxPDO mapping, in wire order.
pub const TX_MAPPING: [PdoEntry; 6] = [
    PdoEntry::new(index::STATUS_WORD, 0, 16),
    PdoEntry::new(index::POSITION_ACTUAL, 0, 32),
    PdoEntry::new(index::VELOCITY_ACTUAL, 0, 32),
    PdoEntry::new(index::TORQUE_ACTUAL, 0, 16),
    PdoEntry::new(index::MODE_DISPLAY, 0, 8),
    PdoEntry::padding(8),
];

/// Total bytes covered by a mapping table.
pub const fn mapped_bytes(entries: &[PdoEntry]) -> usize {
    let mut bits = 0usize;
    let mut i = 0;
    while i < entries.len() {
        bits += entries[i].bits as usize;
        i += 1;
    }
    bits / 8
}

const_assert_eq!(mapped_bytes(&RX_MAPPING), RX_FRAME_SIZE);
const_assert_eq!(mapped_bytes(&TX_MAPPING), TX_FRAME_SIZE);

/// Direction of a process-data object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdoDirection {
    /// Master outputs (RxPDO from the slave's view).
    Rx,
    /// Master inputs (TxPDO from the slave's view).
    Tx,
}

impl PdoDirection {
    /// Mapping object index.
    pub const fn mapping_object(self) -> u16 {
        match self {
            Self::Rx => index::RX_PDO_MAPPING,
            Self::Tx => index::TX_PDO_MAPPING,
        }
    }

    /// Sync manager assignment object index.
    pub const fn assign_object(self) -> u16 {
        match self {
            Self::Rx => index::RX_PDO_ASSIGN,
            Self::Tx => index::TX_PDO_ASSIGN,
        }
    }

    pub const fn entries(self) -> &'static [PdoEntry; 6] {
        match self {
            Self::Rx => &RX_MAPPING,
            Self::Tx => &TX_MAPPING,
        }
    }

    pub const fn frame_size(self) -> usize {
        match self {
            Self::Rx => RX_FRAME_SIZE,
            Self::Tx => TX_FRAME_SIZE,
        }
    }
}

// ─── Frames ─────────────────────────────────────────────────────────

/// Master → slave cyclic frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxFrame {
    pub control_word: u16,
    pub target_position: i32,
    pub target_velocity: i32,
    pub target_torque: i16,
    pub mode_of_operation: u8,
}

impl RxFrame {
    pub fn encode(&self) -> [u8; RX_FRAME_SIZE] {
        let mut buf = [0u8; RX_FRAME_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode into an existing buffer. The padding byte is zeroed.
    pub fn encode_into(&self, buf: &mut [u8; RX_FRAME_SIZE]) {
        buf[0..2].copy_from_slice(&self.control_word.to_le_bytes());
        buf[2..6].copy_from_slice(&self.target_position.to_le_bytes());
        buf[6..10].copy_from_slice(&self.target_velocity.to_le_bytes());
        buf[10..12].copy_from_slice(&self.target_torque.to_le_bytes());
        buf[12] = self.mode_of_operation;
        buf[13] = 0;
    }

    pub fn decode(buf: &[u8; RX_FRAME_SIZE]) -> Self {
        Self {
            control_word: u16::from_le_bytes([buf[0], buf[1]]),
            target_position: i32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]),
            target_velocity: i32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]),
            target_torque: i16::from_le_bytes([buf[10], buf[11]]),
            mode_of_operation: buf[12],
        }
    }

    /// Decode from the head of a slice; `None` if it is too short.
    pub fn from_slice(buf: &[u8]) -> Option<Self> {
        buf.get(..RX_FRAME_SIZE)
            .and_then(|head| <&[u8; RX_FRAME_SIZE]>::try_from(head).ok())
            .map(Self::decode)
    }
}

/// Slave → master cyclic frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxFrame {
    pub status_word: u16,
    pub actual_position: i32,
    pub actual_velocity: i32,
    pub actual_torque: i16,
    pub mode_display: u8,
}

impl TxFrame {
    pub fn encode(&self) -> [u8; TX_FRAME_SIZE] {
        let mut buf = [0u8; TX_FRAME_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    pub fn encode_into(&self, buf: &mut [u8; TX_FRAME_SIZE]) {
        buf[0..2].copy_from_slice(&self.status_word.to_le_bytes());
        buf[2..6].copy_from_slice(&self.actual_position.to_le_bytes());
        buf[6..10].copy_from_slice(&self.actual_velocity.to_le_bytes());
        buf[10..12].copy_from_slice(&self.actual_torque.to_le_bytes());
        buf[12] = self.mode_display;
        buf[13] = 0;
    }

    pub fn decode(buf: &[u8; TX_FRAME_SIZE]) -> Self {
        Self {
            status_word: u16::from_le_bytes([buf[0], buf[1]]),
            actual_position: i32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]),
            actual_velocity: i32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]),
            actual_torque: i16::from_le_bytes([buf[10], buf[11]]),
            mode_display: buf[12],
        }
    }

    pub fn from_slice(buf: &[u8]) -> Option<Self> {
        buf.get(..TX_FRAME_SIZE)
            .and_then(|head| <&[u8; TX_FRAME_SIZE]>::try_from(head).ok())
            .map(Self::decode)
    }
}
