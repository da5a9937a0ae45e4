//! Board type identification
//!
//! The read-board-type answer carries a one-byte type code and the number
//! of channels the board exposes.

/// Type codes and their display names, fixed at build time
const BOARD_TYPE_NAMES: &[(u8, &str)] = &[
    (0x01, "Single gas (electrochemical)"),
    (0x02, "Dual gas (electrochemical)"),
    (0x03, "Quad gas (electrochemical)"),
    (0x04, "Photoionization (PID)"),
    (0x05, "Environmental (T/RH/P)"),
    (0x06, "Particulate matter"),
    (0x07, "NDIR CO2"),
];

/// Kind of sensor board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BoardType {
    /// One electrochemical cell
    SingleGas,
    /// Two electrochemical cells
    DualGas,
    /// Four electrochemical cells
    QuadGas,
    /// Photoionization detector
    Pid,
    /// Temperature, humidity and pressure
    Environmental,
    /// Optical particle counter
    ParticulateMatter,
    /// Non-dispersive infrared CO2
    Ndir,
    /// Type code not known to this host
    Unknown(u8),
}

impl BoardType {
    /// Map a wire type code to a board type
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => Self::SingleGas,
            0x02 => Self::DualGas,
            0x03 => Self::QuadGas,
            0x04 => Self::Pid,
            0x05 => Self::Environmental,
            0x06 => Self::ParticulateMatter,
            0x07 => Self::Ndir,
            other => Self::Unknown(other),
        }
    }

    /// Wire type code
    pub fn code(&self) -> u8 {
        match self {
            Self::SingleGas => 0x01,
            Self::DualGas => 0x02,
            Self::QuadGas => 0x03,
            Self::Pid => 0x04,
            Self::Environmental => 0x05,
            Self::ParticulateMatter => 0x06,
            Self::Ndir => 0x07,
            Self::Unknown(code) => *code,
        }
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        let code = self.code();
        BOARD_TYPE_NAMES
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, name)| *name)
            .unwrap_or("Unknown board")
    }
}

/// Decoded read-board-type answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoardTypeInfo {
    /// Board kind
    pub board_type: BoardType,
    /// Number of measurement channels
    pub channels: u8,
}
