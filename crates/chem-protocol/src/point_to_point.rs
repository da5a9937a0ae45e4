//! Point-to-point transport
//!
//! # Frame Format
//! ```text
//! { payload }
//! ```
//!
//! One board per link, so frames carry no address. A `{` anywhere restarts
//! the accumulator, which lets the receiver recover from a stray or
//! truncated frame on the next header.

use crate::message::AppMessage;
use crate::{TransportKind, TransportLogic};

/// Frame header byte
pub const HEADER: u8 = b'{';
/// Frame trailer byte
pub const TRAILER: u8 = b'}';

/// Accumulator size; a longer frame is discarded
pub const MAX_FRAME_LEN: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    Idle,
    Payload,
}

/// `{payload}` framer
#[derive(Debug)]
pub struct PointToPointTransport {
    state: RxState,
    buffer: Vec<u8>,
}

impl PointToPointTransport {
    /// Create a new point-to-point framer
    pub fn new() -> Self {
        Self {
            state: RxState::Idle,
            buffer: Vec::with_capacity(MAX_FRAME_LEN),
        }
    }
}

impl Default for PointToPointTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportLogic for PointToPointTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::PointToPoint
    }

    fn on_byte_received(&mut self, byte: u8) -> Option<AppMessage> {
        if byte == HEADER {
            self.buffer.clear();
            self.state = RxState::Payload;
            return None;
        }

        match self.state {
            RxState::Idle => None,
            RxState::Payload if byte == TRAILER => {
                self.state = RxState::Idle;
                let payload = std::mem::take(&mut self.buffer);
                match String::from_utf8(payload) {
                    Ok(payload) => Some(AppMessage::unaddressed(payload)),
                    Err(_) => None,
                }
            }
            RxState::Payload => {
                if self.buffer.len() >= MAX_FRAME_LEN {
                    tracing::debug!("Point-to-point frame overflow, re-arming");
                    self.reset();
                } else {
                    self.buffer.push(byte);
                }
                None
            }
        }
    }

    fn to_wire(&self, message: &AppMessage) -> Vec<u8> {
        let mut wire = Vec::with_capacity(message.payload().len() + 2);
        wire.push(HEADER);
        wire.extend_from_slice(message.payload().as_bytes());
        wire.push(TRAILER);
        wire
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.state = RxState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(t: &mut PointToPointTransport, data: &[u8]) -> Vec<AppMessage> {
        data.iter().filter_map(|&b| t.on_byte_received(b)).collect()
    }

    #[test]
    fn test_single_frame() {
        let mut t = PointToPointTransport::new();
        assert_eq!(feed(&mut t, b"{T0102}"), vec![AppMessage::unaddressed("T0102")]);
    }

    #[test]
    fn test_stray_header_restarts() {
        let mut t = PointToPointTransport::new();
        assert_eq!(
            feed(&mut t, b"{p00{T0102}"),
            vec![AppMessage::unaddressed("T0102")]
        );
    }

    #[test]
    fn test_noise_outside_frame_ignored() {
        let mut t = PointToPointTransport::new();
        assert_eq!(
            feed(&mut t, b"xx}{V3100}zz"),
            vec![AppMessage::unaddressed("V3100")]
        );
    }

    #[test]
    fn test_overflow_discards() {
        let mut t = PointToPointTransport::new();
        let mut data = vec![HEADER];
        data.extend(std::iter::repeat(b'A').take(MAX_FRAME_LEN + 5));
        data.push(TRAILER);
        assert!(feed(&mut t, &data).is_empty());
        // Next frame still decodes
        assert_eq!(feed(&mut t, b"{T}"), vec![AppMessage::unaddressed("T")]);
    }

    #[test]
    fn test_to_wire() {
        let t = PointToPointTransport::new();
        assert_eq!(t.to_wire(&AppMessage::unaddressed("p01")), b"{p01}");
    }
}
