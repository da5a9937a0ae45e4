//! CRC-32 used by protocol version 1
//!
//! Polynomial 0x04C11DB7, initial value 0xFFFFFFFF, bit-serial MSB-first,
//! no reflection and no final XOR. The board firmware computes it the same
//! way over the ASCII payload characters.

/// Generator polynomial
pub const POLYNOMIAL: u32 = 0x04C1_1DB7;

/// Register value before the first byte
pub const INITIAL: u32 = 0xFFFF_FFFF;

/// Number of hex digits the checksum occupies on the wire
pub const HEX_LEN: usize = 8;

/// Feed one byte into a running CRC
pub fn update(mut crc: u32, byte: u8) -> u32 {
    crc ^= (byte as u32) << 24;
    for _ in 0..8 {
        crc = if crc & 0x8000_0000 != 0 {
            (crc << 1) ^ POLYNOMIAL
        } else {
            crc << 1
        };
    }
    crc
}

/// CRC over a whole buffer
pub fn checksum(data: &[u8]) -> u32 {
    data.iter().fold(INITIAL, |crc, &b| update(crc, b))
}

/// Checksum rendered as it travels on the wire
pub fn to_hex(crc: u32) -> String {
    format!("{:08X}", crc)
}

/// Parse a wire checksum
///
/// Only uppercase digits are accepted: a flipped case bit must not turn a
/// corrupted trailer into a valid one.
pub fn from_hex(digits: &[u8]) -> Option<u32> {
    if digits.len() != HEX_LEN
        || !digits
            .iter()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(b))
    {
        return None;
    }
    let s = std::str::from_utf8(digits).ok()?;
    u32::from_str_radix(s, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        // Standard check input for this CRC-32 parameter set
        assert_eq!(checksum(b"123456789"), 0x0376_E6E7);
    }

    #[test]
    fn test_empty_is_initial() {
        assert_eq!(checksum(b""), INITIAL);
    }

    #[test]
    fn test_hex_roundtrip() {
        let crc = checksum(b"T0102");
        assert_eq!(from_hex(to_hex(crc).as_bytes()), Some(crc));
    }

    #[test]
    fn test_lowercase_rejected() {
        assert_eq!(from_hex(b"0376e6e7"), None);
        assert_eq!(from_hex(b"0376E6E"), None);
    }
}
