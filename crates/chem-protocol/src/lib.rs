//! Sensor Board Protocol Library
//!
//! This crate provides encoding, decoding and bus framing for the chemical
//! sensor board protocol:
//!
//! - **Codec**: one-character command ids followed by ASCII-hex fields
//! - **Flat**: unframed, newline-delimited messages for RPC-like channels
//! - **Point-to-point**: `{payload}` frames for a single board on a link
//! - **Point-to-multipoint**: `[vBBpayload]` / `(vBBpayload)` frames carrying
//!   a protocol version digit and a board id, with an optional CRC-32 trailer
//! - **Point-to-multipoint FWU**: the multipoint framing tagged with the
//!   firmware-update version byte
//!
//! # Architecture
//!
//! Everything in this crate is pure: no I/O, no clocks, no threads. The
//! framers are incremental state machines fed one byte at a time; the bus
//! crate owns the serial port and drives them.
//!
//! The same frame means different things based on direction:
//! - `[100T]` TO a board = read-board-type request for board 0x00
//! - `(100T0302xxxxxxxx)` FROM a board = board type answer with CRC
//!
//! # Example
//!
//! ```rust
//! use chem_protocol::{create_transport, AppMessage, BoardId, Command, Role, TransportKind};
//!
//! let mut host = create_transport(TransportKind::PointToMultipoint, Role::Host, false);
//! let wire = host.to_wire(&AppMessage::new(BoardId::new(3), Command::BoardType(None).encode()));
//! assert_eq!(wire, b"[003T]");
//!
//! let mut received = None;
//! for &byte in b"(003T0102)" {
//!     if let Some(msg) = host.on_byte_received(byte) {
//!         received = Some(msg);
//!     }
//! }
//! let msg = received.unwrap();
//! assert_eq!(msg.board_id(), BoardId::new(3));
//! assert!(matches!(Command::decode(msg.payload()), Some(Command::BoardType(Some(_)))));
//! ```

pub mod board_type;
pub mod command;
pub mod crc;
pub mod error;
pub mod flat;
pub mod hex;
pub mod message;
pub mod multipoint;
pub mod point_to_point;

pub use board_type::{BoardType, BoardTypeInfo};
pub use command::{readback_id, Command, HiResSample, RawSample};
pub use error::ProtocolError;
pub use message::{AppMessage, BoardId};

/// Identifies which framing strategy a bus uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TransportKind {
    /// No framing, one message per line (RPC-like channels, not the serial bus)
    Flat,
    /// `{payload}` frames, single board per link
    PointToPoint,
    /// `[vBBpayload]` frames with board addressing, optional CRC-32
    PointToMultipoint,
    /// Multipoint framing carrying the firmware-update version byte
    PointToMultipointFwu,
}

impl TransportKind {
    /// Returns a human-readable name for the transport
    pub fn name(&self) -> &'static str {
        match self {
            TransportKind::Flat => "Flat",
            TransportKind::PointToPoint => "Point-to-point",
            TransportKind::PointToMultipoint => "Point-to-multipoint",
            TransportKind::PointToMultipointFwu => "Point-to-multipoint FWU",
        }
    }

    /// Serial bitrate used to open the channel for this transport
    pub fn bitrate(&self) -> u32 {
        match self {
            TransportKind::Flat | TransportKind::PointToPoint => 115_200,
            TransportKind::PointToMultipoint | TransportKind::PointToMultipointFwu => 19_200,
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flat" => Ok(TransportKind::Flat),
            "point_to_point" | "p2p" => Ok(TransportKind::PointToPoint),
            "point_to_multipoint" | "p2mp" => Ok(TransportKind::PointToMultipoint),
            "point_to_multipoint_fwu" | "fwu" => Ok(TransportKind::PointToMultipointFwu),
            other => Err(ProtocolError::UnknownTransport(other.to_string())),
        }
    }
}

/// Which end of the link a framer sits on
///
/// The host sends `[...]` and receives `(...)`; a board does the opposite.
/// CRC trailers only travel board → host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The computer driving the bus
    Host,
    /// A sensor board answering on the bus
    Device,
}

/// Object-safe framing strategy selected when a bus connects
pub trait TransportLogic: Send {
    /// Which framing this is
    fn kind(&self) -> TransportKind;

    /// Bitrate the byte channel must be opened at
    fn bitrate(&self) -> u32 {
        self.kind().bitrate()
    }

    /// Feed one received byte; returns a message only when a frame closes
    fn on_byte_received(&mut self, byte: u8) -> Option<AppMessage>;

    /// Frame a message for transmission
    fn to_wire(&self, message: &AppMessage) -> Vec<u8>;

    /// Whether the link is shared and the sender must wait for its turn
    fn is_half_duplex(&self) -> bool {
        false
    }

    /// Drop any partial frame and return to idle
    fn reset(&mut self);

    /// Frames discarded because their CRC did not match
    fn crc_rejects(&self) -> u64 {
        0
    }
}

/// Create a framer for the given transport
///
/// `crc` selects protocol version 1 on the multipoint transport. The FWU
/// variant always carries a checksum; the other variants ignore the flag.
pub fn create_transport(kind: TransportKind, role: Role, crc: bool) -> Box<dyn TransportLogic> {
    match kind {
        TransportKind::Flat => Box::new(flat::FlatTransport::new()),
        TransportKind::PointToPoint => Box::new(point_to_point::PointToPointTransport::new()),
        TransportKind::PointToMultipoint => {
            let version = if crc {
                multipoint::ProtocolVersion::V1
            } else {
                multipoint::ProtocolVersion::V0
            };
            Box::new(multipoint::MultipointTransport::new(version, role))
        }
        TransportKind::PointToMultipointFwu => Box::new(multipoint::MultipointTransport::new(
            multipoint::ProtocolVersion::FirmwareUpdate,
            role,
        )),
    }
}
