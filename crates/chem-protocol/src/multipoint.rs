//! Point-to-multipoint transport
//!
//! Several boards share one half-duplex line. Every frame carries the
//! protocol version and a board address.
//!
//! # Frame Format
//! ```text
//! host → board:  [ v BB payload ]
//! board → host:  ( v BB payload [crc32] )
//! ```
//!
//! - `v`: protocol version digit (`0` plain, `1` with CRC, `F` firmware update)
//! - `BB`: board id, 2 hex digits
//! - `crc32`: 8 uppercase hex digits over the payload characters, present on
//!   board → host frames when the version carries a checksum
//!
//! A frame whose checksum does not match is dropped without a trace on the
//! bus: the protocol has no NAK, the requester's timeout is the recovery.

use crate::crc;
use crate::message::{AppMessage, BoardId};
use crate::{Role, TransportKind, TransportLogic};

/// Host → board frame header
pub const REQUEST_HEADER: u8 = b'[';
/// Host → board frame trailer
pub const REQUEST_TRAILER: u8 = b']';
/// Board → host frame header
pub const ANSWER_HEADER: u8 = b'(';
/// Board → host frame trailer
pub const ANSWER_TRAILER: u8 = b')';

/// Longest payload (including checksum digits) before the frame is discarded
pub const MAX_PAYLOAD_LEN: usize = 64;

/// Protocol version carried in every multipoint frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    /// Plain frames
    V0,
    /// Frames from boards carry a CRC-32
    V1,
    /// Firmware update traffic, checksummed
    FirmwareUpdate,
}

impl ProtocolVersion {
    /// Version byte on the wire
    pub fn byte(&self) -> u8 {
        match self {
            ProtocolVersion::V0 => b'0',
            ProtocolVersion::V1 => b'1',
            ProtocolVersion::FirmwareUpdate => b'F',
        }
    }

    /// Whether board → host frames carry a checksum
    pub fn uses_crc(&self) -> bool {
        !matches!(self, ProtocolVersion::V0)
    }
}

/// Receive state: what the framer expects next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    Idle,
    Version,
    BoardIdHi,
    BoardIdLo,
    Payload,
}

/// Multipoint framer for either end of the line
#[derive(Debug)]
pub struct MultipointTransport {
    version: ProtocolVersion,
    role: Role,
    state: RxState,
    board_id: u8,
    buffer: Vec<u8>,
    crc_rejects: u64,
}

impl MultipointTransport {
    /// Create a framer for the given version and end of the line
    pub fn new(version: ProtocolVersion, role: Role) -> Self {
        Self {
            version,
            role,
            state: RxState::Idle,
            board_id: 0,
            buffer: Vec::with_capacity(MAX_PAYLOAD_LEN),
            crc_rejects: 0,
        }
    }

    /// Protocol version in use
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    fn rx_delimiters(&self) -> (u8, u8) {
        match self.role {
            Role::Host => (ANSWER_HEADER, ANSWER_TRAILER),
            Role::Device => (REQUEST_HEADER, REQUEST_TRAILER),
        }
    }

    fn tx_delimiters(&self) -> (u8, u8) {
        match self.role {
            Role::Host => (REQUEST_HEADER, REQUEST_TRAILER),
            Role::Device => (ANSWER_HEADER, ANSWER_TRAILER),
        }
    }

    /// Checksums travel board → host only
    fn rx_has_crc(&self) -> bool {
        self.role == Role::Host && self.version.uses_crc()
    }

    fn tx_has_crc(&self) -> bool {
        self.role == Role::Device && self.version.uses_crc()
    }

    fn resync(&mut self, reason: &str, byte: u8) {
        tracing::trace!("Multipoint resync ({}), byte 0x{:02X}", reason, byte);
        self.reset();
    }

    fn complete_frame(&mut self) -> Option<AppMessage> {
        let mut payload = std::mem::take(&mut self.buffer);
        let board_id = BoardId::new(self.board_id);

        if self.rx_has_crc() {
            if payload.len() < crc::HEX_LEN {
                tracing::debug!("Frame from board {} too short for checksum", board_id);
                self.crc_rejects += 1;
                return None;
            }
            let split = payload.len() - crc::HEX_LEN;
            let received = crc::from_hex(&payload[split..]);
            payload.truncate(split);
            let computed = crc::checksum(&payload);
            if received != Some(computed) {
                self.crc_rejects += 1;
                tracing::warn!(
                    "CRC mismatch from board {}: computed {:08X}, received {:?}",
                    board_id,
                    computed,
                    received.map(|r| format!("{:08X}", r))
                );
                return None;
            }
        }

        match String::from_utf8(payload) {
            Ok(payload) => Some(AppMessage::new(board_id, payload)),
            Err(_) => None,
        }
    }
}

fn hex_value(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|d| d as u8)
}

impl TransportLogic for MultipointTransport {
    fn kind(&self) -> TransportKind {
        match self.version {
            ProtocolVersion::FirmwareUpdate => TransportKind::PointToMultipointFwu,
            _ => TransportKind::PointToMultipoint,
        }
    }

    fn on_byte_received(&mut self, byte: u8) -> Option<AppMessage> {
        let (header, trailer) = self.rx_delimiters();

        if byte == header {
            self.buffer.clear();
            self.state = RxState::Version;
            return None;
        }

        match self.state {
            RxState::Idle => {}
            RxState::Version => {
                if byte == self.version.byte() {
                    self.state = RxState::BoardIdHi;
                } else {
                    self.resync("version", byte);
                }
            }
            RxState::BoardIdHi => match hex_value(byte) {
                Some(hi) => {
                    self.board_id = hi << 4;
                    self.state = RxState::BoardIdLo;
                }
                None => self.resync("board id", byte),
            },
            RxState::BoardIdLo => match hex_value(byte) {
                Some(lo) => {
                    self.board_id |= lo;
                    self.state = RxState::Payload;
                }
                None => self.resync("board id", byte),
            },
            RxState::Payload => {
                if byte == trailer {
                    self.state = RxState::Idle;
                    return self.complete_frame();
                }
                let (tx_header, tx_trailer) = self.tx_delimiters();
                if byte == tx_header || byte == tx_trailer {
                    self.resync("foreign delimiter", byte);
                } else if self.buffer.len() >= MAX_PAYLOAD_LEN {
                    self.resync("overflow", byte);
                } else {
                    self.buffer.push(byte);
                }
            }
        }

        None
    }

    fn to_wire(&self, message: &AppMessage) -> Vec<u8> {
        let (header, trailer) = self.tx_delimiters();
        let payload = message.payload().as_bytes();

        let mut wire = Vec::with_capacity(payload.len() + 4 + crc::HEX_LEN);
        wire.push(header);
        wire.push(self.version.byte());
        wire.extend_from_slice(format!("{:02X}", message.board_id().as_u8()).as_bytes());
        wire.extend_from_slice(payload);
        if self.tx_has_crc() {
            wire.extend_from_slice(crc::to_hex(crc::checksum(payload)).as_bytes());
        }
        wire.push(trailer);
        wire
    }

    fn is_half_duplex(&self) -> bool {
        true
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.board_id = 0;
        self.state = RxState::Idle;
    }

    fn crc_rejects(&self) -> u64 {
        self.crc_rejects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(t: &mut MultipointTransport, data: &[u8]) -> Vec<AppMessage> {
        data.iter().filter_map(|&b| t.on_byte_received(b)).collect()
    }

    fn device_frame(version: ProtocolVersion, board: u8, payload: &str) -> Vec<u8> {
        MultipointTransport::new(version, Role::Device)
            .to_wire(&AppMessage::new(BoardId::new(board), payload))
    }

    #[test]
    fn test_host_request_wire() {
        let host = MultipointTransport::new(ProtocolVersion::V1, Role::Host);
        assert_eq!(host.to_wire(&AppMessage::new(BoardId::new(0x0A), "n01")), b"[10An01]");
    }

    #[test]
    fn test_device_answer_with_crc() {
        let wire = device_frame(ProtocolVersion::V1, 1, "T0102");
        let expected_crc = crc::to_hex(crc::checksum(b"T0102"));
        assert_eq!(wire, format!("(101T0102{})", expected_crc).into_bytes());
    }

    #[test]
    fn test_host_receives_v0() {
        let mut host = MultipointTransport::new(ProtocolVersion::V0, Role::Host);
        assert_eq!(
            feed(&mut host, b"(003T0102)"),
            vec![AppMessage::new(BoardId::new(3), "T0102")]
        );
    }

    #[test]
    fn test_host_receives_v1() {
        let mut host = MultipointTransport::new(ProtocolVersion::V1, Role::Host);
        let wire = device_frame(ProtocolVersion::V1, 2, "V312E3000");
        assert_eq!(
            feed(&mut host, &wire),
            vec![AppMessage::new(BoardId::new(2), "V312E3000")]
        );
        assert_eq!(host.crc_rejects(), 0);
    }

    #[test]
    fn test_crc_mismatch_dropped() {
        let mut host = MultipointTransport::new(ProtocolVersion::V1, Role::Host);
        let mut wire = device_frame(ProtocolVersion::V1, 2, "T0102");
        wire[5] = b'3';
        assert!(feed(&mut host, &wire).is_empty());
        assert_eq!(host.crc_rejects(), 1);

        // The framer is back in idle and accepts the next good frame
        let good = device_frame(ProtocolVersion::V1, 2, "T0102");
        assert_eq!(feed(&mut host, &good).len(), 1);
    }

    #[test]
    fn test_version_mismatch_resyncs() {
        let mut host = MultipointTransport::new(ProtocolVersion::V0, Role::Host);
        // Firmware update frame is ignored by normal inquiry traffic
        assert!(feed(&mut host, b"(F01xyz)").is_empty());
        assert_eq!(
            feed(&mut host, b"(001T0101)"),
            vec![AppMessage::new(BoardId::new(1), "T0101")]
        );
    }

    #[test]
    fn test_fwu_ignores_normal_frames() {
        let mut host = MultipointTransport::new(ProtocolVersion::FirmwareUpdate, Role::Host);
        assert!(feed(&mut host, b"(001T0101)").is_empty());
        let wire = device_frame(ProtocolVersion::FirmwareUpdate, 1, "W00");
        assert_eq!(
            feed(&mut host, &wire),
            vec![AppMessage::new(BoardId::new(1), "W00")]
        );
    }

    #[test]
    fn test_bad_board_digit_resyncs() {
        let mut host = MultipointTransport::new(ProtocolVersion::V0, Role::Host);
        assert!(feed(&mut host, b"(0G1T)").is_empty());
    }

    #[test]
    fn test_header_mid_frame_restarts() {
        let mut host = MultipointTransport::new(ProtocolVersion::V0, Role::Host);
        assert_eq!(
            feed(&mut host, b"(001n0(002T0101)"),
            vec![AppMessage::new(BoardId::new(2), "T0101")]
        );
    }

    #[test]
    fn test_own_echo_not_delivered() {
        // On a two-wire bus the host hears its own request
        let mut host = MultipointTransport::new(ProtocolVersion::V0, Role::Host);
        assert!(feed(&mut host, b"[001T]").is_empty());
    }

    #[test]
    fn test_overflow_discards() {
        let mut host = MultipointTransport::new(ProtocolVersion::V0, Role::Host);
        let mut data = b"(001".to_vec();
        data.extend(std::iter::repeat(b'A').take(MAX_PAYLOAD_LEN + 1));
        data.push(ANSWER_TRAILER);
        assert!(feed(&mut host, &data).is_empty());
    }

    #[test]
    fn test_device_parses_requests() {
        let mut device = MultipointTransport::new(ProtocolVersion::V1, Role::Device);
        assert_eq!(
            feed(&mut device, b"[10Fp03]"),
            vec![AppMessage::new(BoardId::new(0x0F), "p03")]
        );
    }

    #[test]
    fn test_short_v1_frame_rejected() {
        let mut host = MultipointTransport::new(ProtocolVersion::V1, Role::Host);
        assert!(feed(&mut host, b"(101T)").is_empty());
        assert_eq!(host.crc_rejects(), 1);
    }
}
