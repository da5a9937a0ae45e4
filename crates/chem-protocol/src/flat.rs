//! Flat transport
//!
//! No framing: one message is one line on the wire. Used for RPC-like
//! channels where the underlying link already delimits messages, never on
//! the shared serial bus.

use crate::message::AppMessage;
use crate::{TransportKind, TransportLogic};

/// Longest line accepted before the accumulator is discarded
const MAX_LINE_LEN: usize = 4096;

/// Line-delimited pass-through transport
#[derive(Debug, Default)]
pub struct FlatTransport {
    line: Vec<u8>,
}

impl FlatTransport {
    /// Create a new flat transport
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransportLogic for FlatTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Flat
    }

    fn on_byte_received(&mut self, byte: u8) -> Option<AppMessage> {
        match byte {
            b'\n' | b'\r' => {
                if self.line.is_empty() {
                    return None;
                }
                let line = std::mem::take(&mut self.line);
                match String::from_utf8(line) {
                    Ok(payload) => Some(AppMessage::unaddressed(payload)),
                    Err(_) => {
                        tracing::debug!("Dropping non-UTF-8 line on flat transport");
                        None
                    }
                }
            }
            _ => {
                if self.line.len() >= MAX_LINE_LEN {
                    tracing::warn!("Flat transport line overflow, discarding");
                    self.line.clear();
                }
                self.line.push(byte);
                None
            }
        }
    }

    fn to_wire(&self, message: &AppMessage) -> Vec<u8> {
        let mut wire = Vec::with_capacity(message.payload().len() + 1);
        wire.extend_from_slice(message.payload().as_bytes());
        wire.push(b'\n');
        wire
    }

    fn reset(&mut self) {
        self.line.clear();
    }
}
