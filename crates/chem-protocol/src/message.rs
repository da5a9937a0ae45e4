//! Logical bus messages
//!
//! An [`AppMessage`] is what survives framing: the board a message is for
//! (or from) and the command payload string.

use std::fmt;

use crate::error::ProtocolError;

/// Address of a board on the bus
///
/// Valid bus addresses are `0..MAX_BOARDS`. `0xFF` is reserved: it means
/// "undefined" on the wire and also tags host-local pseudo-devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct BoardId(u8);

impl BoardId {
    /// Number of addressable boards on one bus
    pub const MAX_BOARDS: u8 = 16;

    /// Reserved sentinel: no particular board
    pub const UNDEFINED: BoardId = BoardId(0xFF);

    /// Board id used for sensors read directly on the host
    pub const HOST_LOCAL: BoardId = BoardId::UNDEFINED;

    /// Wrap a raw id (any value, including the sentinel)
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// Wrap a raw id, rejecting anything that is not a bus address
    pub fn addressable(id: u8) -> Result<Self, ProtocolError> {
        if id < Self::MAX_BOARDS {
            Ok(Self(id))
        } else {
            Err(ProtocolError::BoardIdOutOfRange(id))
        }
    }

    /// All addressable ids in order
    pub fn all() -> impl Iterator<Item = BoardId> {
        (0..Self::MAX_BOARDS).map(BoardId)
    }

    /// Get the raw id value
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Whether this is the undefined/host-local sentinel
    pub fn is_undefined(&self) -> bool {
        *self == Self::UNDEFINED
    }
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_undefined() {
            write!(f, "--")
        } else {
            write!(f, "{:02X}", self.0)
        }
    }
}

/// A logical message exchanged with a board
///
/// Immutable once constructed; clone it when a comparison must not touch
/// the original.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppMessage {
    board_id: BoardId,
    payload: String,
}

impl AppMessage {
    /// Create a message for (or from) a board
    pub fn new(board_id: BoardId, payload: impl Into<String>) -> Self {
        Self {
            board_id,
            payload: payload.into(),
        }
    }

    /// Create a message without a board address
    pub fn unaddressed(payload: impl Into<String>) -> Self {
        Self::new(BoardId::UNDEFINED, payload)
    }

    /// Board the message targets or originates from
    pub fn board_id(&self) -> BoardId {
        self.board_id
    }

    /// Command payload
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Whether two messages form a request/answer pair
    ///
    /// Board ids must be equal unless either is undefined, and one payload
    /// must be a prefix of the other: answers echo the request and append
    /// their data, while some requests carry more than their echo.
    pub fn is_compatible(&self, other: &AppMessage) -> bool {
        let same_board = self.board_id == other.board_id
            || self.board_id.is_undefined()
            || other.board_id.is_undefined();

        same_board
            && (self.payload.starts_with(&other.payload)
                || other.payload.starts_with(&self.payload))
    }
}

impl fmt::Display for AppMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.board_id, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatible_answer_extends_request() {
        let request = AppMessage::new(BoardId::new(1), "n00");
        let answer = AppMessage::new(BoardId::new(1), "n00434F3200");
        assert!(request.is_compatible(&answer));
        assert!(answer.is_compatible(&request));
    }

    #[test]
    fn test_incompatible_board() {
        let request = AppMessage::new(BoardId::new(1), "T");
        let answer = AppMessage::new(BoardId::new(2), "T0102");
        assert!(!request.is_compatible(&answer));
    }

    #[test]
    fn test_undefined_board_matches_any() {
        let request = AppMessage::unaddressed("T");
        let answer = AppMessage::new(BoardId::new(7), "T0102");
        assert!(request.is_compatible(&answer));
        assert!(answer.is_compatible(&request));
    }

    #[test]
    fn test_unrelated_payloads() {
        let a = AppMessage::new(BoardId::new(1), "p00");
        let b = AppMessage::new(BoardId::new(1), "p01000003E8");
        assert!(!a.is_compatible(&b));
    }

    #[test]
    fn test_addressable_range() {
        assert!(BoardId::addressable(15).is_ok());
        assert_eq!(
            BoardId::addressable(16),
            Err(ProtocolError::BoardIdOutOfRange(16))
        );
        assert_eq!(BoardId::all().count(), 16);
    }

    #[test]
    fn test_display() {
        assert_eq!(BoardId::new(0x0A).to_string(), "0A");
        assert_eq!(BoardId::UNDEFINED.to_string(), "--");
        assert_eq!(AppMessage::new(BoardId::new(3), "T").to_string(), "[03] T");
    }
}
