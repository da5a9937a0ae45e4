//! ASCII-hex field encoding
//!
//! Every field in a command payload is uppercase hex: 2 digits for a byte,
//! 4 for a 16-bit value, 8 for a 32-bit value. Strings are a sequence of
//! 2-digit bytes closed by `00`.
//!
//! The reader side is made of partial functions. A short or malformed field
//! yields `None` and leaves the caller to treat the whole payload as "no
//! match".

use std::fmt::Write;

/// Append a byte as 2 hex digits
pub fn push_u8(out: &mut String, value: u8) {
    let _ = write!(out, "{:02X}", value);
}

/// Append a 16-bit value as 4 hex digits
pub fn push_u16(out: &mut String, value: u16) {
    let _ = write!(out, "{:04X}", value);
}

/// Append a 32-bit value as 8 hex digits
pub fn push_u32(out: &mut String, value: u32) {
    let _ = write!(out, "{:08X}", value);
}

/// Append a string as hex bytes followed by the `00` terminator
pub fn push_str(out: &mut String, value: &str) {
    for byte in value.bytes() {
        push_u8(out, byte);
    }
    out.push_str("00");
}

/// Parse an exact-width hex field
///
/// `from_str_radix` tolerates a leading `+`, so digits are checked first.
fn parse_field(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

/// Cursor over the hex fields of one payload
#[derive(Debug, Clone)]
pub struct HexReader<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> HexReader<'a> {
    /// Start reading at the beginning of `input`
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn take(&mut self, width: usize) -> Option<&'a str> {
        let end = self.pos.checked_add(width)?;
        let field = self.input.get(self.pos..end)?;
        self.pos = end;
        Some(field)
    }

    /// Read 2 hex digits
    pub fn u8(&mut self) -> Option<u8> {
        let field = self.take(2)?;
        parse_field(field).map(|v| v as u8)
    }

    /// Read 4 hex digits
    pub fn u16(&mut self) -> Option<u16> {
        let field = self.take(4)?;
        parse_field(field).map(|v| v as u16)
    }

    /// Read 8 hex digits
    pub fn u32(&mut self) -> Option<u32> {
        let field = self.take(8)?;
        parse_field(field)
    }

    /// Read a `00`-terminated string
    pub fn string(&mut self) -> Option<String> {
        let mut bytes = Vec::new();
        loop {
            match self.u8()? {
                0 => break,
                b => bytes.push(b),
            }
        }
        String::from_utf8(bytes).ok()
    }

    /// Whether every character has been consumed
    pub fn is_empty(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Unread remainder
    pub fn rest(&self) -> &'a str {
        self.input.get(self.pos..).unwrap_or("")
    }
}
