//! Board command set
//!
//! # Format
//! - Command id: one ASCII character
//! - Channel id: 2 hex digits, for channel-level commands only
//! - Fields: 2/4/8 hex digits, strings as hex bytes closed by `00`
//!
//! A request is the bare id (plus channel); the answer echoes the request
//! and appends the data, so a request is always a prefix of its answer.
//! Write commands carry the new value and are answered by an echo.
//!
//! # Commands
//! - `T` board type, `V` firmware version, `S` board serial
//! - `n`/`N` channel name, `s` channel serial, `u` units
//! - `p`/`P` sampling period, `e`/`E` enabled, `c`/`C` prescaler
//! - `l` last sample (fixed point), `h` last sample (float)

use crate::board_type::{BoardType, BoardTypeInfo};
use crate::hex::{self, HexReader};

/// Write ids and the read id that reads the same value back
const READBACK_IDS: &[(char, char)] = &[('N', 'n'), ('P', 'p'), ('E', 'e'), ('C', 'c')];

/// Read-back command id for a write command id
///
/// Used to verify a statically configured value after writing it.
pub fn readback_id(write_id: char) -> Option<char> {
    READBACK_IDS
        .iter()
        .find(|(w, _)| *w == write_id)
        .map(|(_, r)| *r)
}

/// Last sample in the legacy fixed-point format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawSample {
    /// Raw ADC-derived value, fed through the channel's expression
    pub value: i32,
    /// Board-side timestamp of the sample
    pub timestamp: u32,
}

/// Last sample pre-scaled by the board firmware
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HiResSample {
    /// Engineering-unit value
    pub value: f32,
    /// Board-side timestamp of the sample
    pub timestamp: u32,
}

/// Sensor board command
///
/// `None` fields denote the request form, `Some` the answer form.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Read board type: `T` / `Tttcc`
    BoardType(Option<BoardTypeInfo>),
    /// Read firmware version: `V` / `V<str>`
    FirmwareVersion(Option<String>),
    /// Read board serial: `S` / `S<str>`
    BoardSerial(Option<String>),
    /// Read channel name: `nCC` / `nCC<str>`
    ChannelName { channel: u8, name: Option<String> },
    /// Write channel name: `NCC<str>`
    SetChannelName { channel: u8, name: String },
    /// Read channel serial: `sCC` / `sCC<str>`
    ChannelSerial { channel: u8, serial: Option<String> },
    /// Read measurement units: `uCC` / `uCC<str>`
    Units { channel: u8, units: Option<String> },
    /// Read sampling period in ms: `pCC` / `pCCpppppppp`
    SamplingPeriod { channel: u8, period_ms: Option<u32> },
    /// Write sampling period in ms: `PCCpppppppp`
    SetSamplingPeriod { channel: u8, period_ms: u32 },
    /// Read enabled flag: `eCC` / `eCCff`
    Enabled { channel: u8, enabled: Option<bool> },
    /// Write enabled flag: `ECCff`
    SetEnabled { channel: u8, enabled: bool },
    /// Read ADC prescaler: `cCC` / `cCCvvvv`
    Prescaler { channel: u8, value: Option<u16> },
    /// Write ADC prescaler: `CCCvvvv`
    SetPrescaler { channel: u8, value: u16 },
    /// Last sample, fixed point: `lCC` / `lCCvvvvvvvvtttttttt`
    LastSample {
        channel: u8,
        sample: Option<RawSample>,
    },
    /// Last sample, float: `hCC` / `hCCvvvvvvvvtttttttt`
    LastSampleHiRes {
        channel: u8,
        sample: Option<HiResSample>,
    },
    /// Unknown command id (preserves the raw payload)
    Unknown(String),
}

impl Command {
    /// One-character command id
    pub fn id(&self) -> char {
        match self {
            Command::BoardType(_) => 'T',
            Command::FirmwareVersion(_) => 'V',
            Command::BoardSerial(_) => 'S',
            Command::ChannelName { .. } => 'n',
            Command::SetChannelName { .. } => 'N',
            Command::ChannelSerial { .. } => 's',
            Command::Units { .. } => 'u',
            Command::SamplingPeriod { .. } => 'p',
            Command::SetSamplingPeriod { .. } => 'P',
            Command::Enabled { .. } => 'e',
            Command::SetEnabled { .. } => 'E',
            Command::Prescaler { .. } => 'c',
            Command::SetPrescaler { .. } => 'C',
            Command::LastSample { .. } => 'l',
            Command::LastSampleHiRes { .. } => 'h',
            Command::Unknown(raw) => raw.chars().next().unwrap_or('?'),
        }
    }

    /// Channel this command addresses, for channel-level commands
    pub fn channel(&self) -> Option<u8> {
        match self {
            Command::ChannelName { channel, .. }
            | Command::SetChannelName { channel, .. }
            | Command::ChannelSerial { channel, .. }
            | Command::Units { channel, .. }
            | Command::SamplingPeriod { channel, .. }
            | Command::SetSamplingPeriod { channel, .. }
            | Command::Enabled { channel, .. }
            | Command::SetEnabled { channel, .. }
            | Command::Prescaler { channel, .. }
            | Command::SetPrescaler { channel, .. }
            | Command::LastSample { channel, .. }
            | Command::LastSampleHiRes { channel, .. } => Some(*channel),
            _ => None,
        }
    }

    /// Returns true if this is a read request (no data attached)
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Command::BoardType(None)
                | Command::FirmwareVersion(None)
                | Command::BoardSerial(None)
                | Command::ChannelName { name: None, .. }
                | Command::ChannelSerial { serial: None, .. }
                | Command::Units { units: None, .. }
                | Command::SamplingPeriod { period_ms: None, .. }
                | Command::Enabled { enabled: None, .. }
                | Command::Prescaler { value: None, .. }
                | Command::LastSample { sample: None, .. }
                | Command::LastSampleHiRes { sample: None, .. }
        )
    }

    /// Returns true if this command changes board configuration
    pub fn is_write(&self) -> bool {
        readback_id(self.id()).is_some() && !matches!(self, Command::Unknown(_))
    }

    /// The read request that verifies a write command
    pub fn readback(&self) -> Option<Command> {
        match self {
            Command::SetChannelName { channel, .. } => Some(Command::ChannelName {
                channel: *channel,
                name: None,
            }),
            Command::SetSamplingPeriod { channel, .. } => Some(Command::SamplingPeriod {
                channel: *channel,
                period_ms: None,
            }),
            Command::SetEnabled { channel, .. } => Some(Command::Enabled {
                channel: *channel,
                enabled: None,
            }),
            Command::SetPrescaler { channel, .. } => Some(Command::Prescaler {
                channel: *channel,
                value: None,
            }),
            _ => None,
        }
    }

    /// Render this command as a payload string
    pub fn encode(&self) -> String {
        if let Command::Unknown(raw) = self {
            return raw.clone();
        }

        let mut out = String::with_capacity(24);
        out.push(self.id());
        if let Some(channel) = self.channel() {
            hex::push_u8(&mut out, channel);
        }

        match self {
            Command::BoardType(Some(info)) => {
                hex::push_u8(&mut out, info.board_type.code());
                hex::push_u8(&mut out, info.channels);
            }
            Command::FirmwareVersion(Some(s))
            | Command::BoardSerial(Some(s))
            | Command::ChannelName { name: Some(s), .. }
            | Command::SetChannelName { name: s, .. }
            | Command::ChannelSerial { serial: Some(s), .. }
            | Command::Units { units: Some(s), .. } => hex::push_str(&mut out, s),
            Command::SamplingPeriod {
                period_ms: Some(ms),
                ..
            }
            | Command::SetSamplingPeriod { period_ms: ms, .. } => hex::push_u32(&mut out, *ms),
            Command::Enabled {
                enabled: Some(flag),
                ..
            }
            | Command::SetEnabled { enabled: flag, .. } => {
                hex::push_u8(&mut out, u8::from(*flag))
            }
            Command::Prescaler { value: Some(v), .. } | Command::SetPrescaler { value: v, .. } => {
                hex::push_u16(&mut out, *v)
            }
            Command::LastSample {
                sample: Some(sample),
                ..
            } => {
                hex::push_u32(&mut out, sample.value as u32);
                hex::push_u32(&mut out, sample.timestamp);
            }
            Command::LastSampleHiRes {
                sample: Some(sample),
                ..
            } => {
                hex::push_u32(&mut out, sample.value.to_bits());
                hex::push_u32(&mut out, sample.timestamp);
            }
            _ => {}
        }

        out
    }

    /// Parse a payload string
    ///
    /// Returns `None` for a known command id whose fields are short,
    /// malformed, or followed by trailing characters. Unknown ids are kept
    /// as [`Command::Unknown`].
    pub fn decode(payload: &str) -> Option<Command> {
        let mut chars = payload.chars();
        let id = chars.next()?;
        let mut reader = HexReader::new(chars.as_str());

        let command = match id {
            'T' => {
                if reader.is_empty() {
                    Command::BoardType(None)
                } else {
                    let code = reader.u8()?;
                    let channels = reader.u8()?;
                    Command::BoardType(Some(BoardTypeInfo {
                        board_type: BoardType::from_code(code),
                        channels,
                    }))
                }
            }
            'V' => Command::FirmwareVersion(optional(&mut reader, HexReader::string)?),
            'S' => Command::BoardSerial(optional(&mut reader, HexReader::string)?),
            'n' => {
                let channel = reader.u8()?;
                let name = optional(&mut reader, HexReader::string)?;
                Command::ChannelName { channel, name }
            }
            'N' => {
                let channel = reader.u8()?;
                let name = reader.string()?;
                Command::SetChannelName { channel, name }
            }
            's' => {
                let channel = reader.u8()?;
                let serial = optional(&mut reader, HexReader::string)?;
                Command::ChannelSerial { channel, serial }
            }
            'u' => {
                let channel = reader.u8()?;
                let units = optional(&mut reader, HexReader::string)?;
                Command::Units { channel, units }
            }
            'p' => {
                let channel = reader.u8()?;
                let period_ms = optional(&mut reader, HexReader::u32)?;
                Command::SamplingPeriod { channel, period_ms }
            }
            'P' => {
                let channel = reader.u8()?;
                let period_ms = reader.u32()?;
                Command::SetSamplingPeriod { channel, period_ms }
            }
            'e' => {
                let channel = reader.u8()?;
                let enabled = optional(&mut reader, HexReader::u8)?.map(|f| f != 0);
                Command::Enabled { channel, enabled }
            }
            'E' => {
                let channel = reader.u8()?;
                let enabled = reader.u8()? != 0;
                Command::SetEnabled { channel, enabled }
            }
            'c' => {
                let channel = reader.u8()?;
                let value = optional(&mut reader, HexReader::u16)?;
                Command::Prescaler { channel, value }
            }
            'C' => {
                let channel = reader.u8()?;
                let value = reader.u16()?;
                Command::SetPrescaler { channel, value }
            }
            'l' => {
                let channel = reader.u8()?;
                let sample = if reader.is_empty() {
                    None
                } else {
                    let value = reader.u32()? as i32;
                    let timestamp = reader.u32()?;
                    Some(RawSample { value, timestamp })
                };
                Command::LastSample { channel, sample }
            }
            'h' => {
                let channel = reader.u8()?;
                let sample = if reader.is_empty() {
                    None
                } else {
                    let value = f32::from_bits(reader.u32()?);
                    let timestamp = reader.u32()?;
                    Some(HiResSample { value, timestamp })
                };
                Command::LastSampleHiRes { channel, sample }
            }
            _ => return Some(Command::Unknown(payload.to_string())),
        };

        // Byte-exact: trailing characters mean the payload is not this command
        if reader.is_empty() {
            Some(command)
        } else {
            None
        }
    }
}

/// Read an optional trailing field: absent is `Some(None)`, malformed is `None`
fn optional<'a, T>(
    reader: &mut HexReader<'a>,
    read: impl FnOnce(&mut HexReader<'a>) -> Option<T>,
) -> Option<Option<T>> {
    if reader.is_empty() {
        Some(None)
    } else {
        read(reader).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::{readback_id, Command, HiResSample, RawSample};
    use crate::board_type::{BoardType, BoardTypeInfo};

    #[test]
    fn test_encode_board_type_request() {
        assert_eq!(Command::BoardType(None).encode(), "T");
    }

    #[test]
    fn test_decode_board_type_answer() {
        let cmd = Command::decode("T0302").unwrap();
        assert_eq!(
            cmd,
            Command::BoardType(Some(BoardTypeInfo {
                board_type: BoardType::QuadGas,
                channels: 2,
            }))
        );
    }

    #[test]
    fn test_encode_channel_name_answer() {
        let cmd = Command::ChannelName {
            channel: 1,
            name: Some("CO".into()),
        };
        assert_eq!(cmd.encode(), "n01434F00");
    }

    #[test]
    fn test_request_prefixes_answer() {
        let request = Command::SamplingPeriod {
            channel: 2,
            period_ms: None,
        }
        .encode();
        let answer = Command::SamplingPeriod {
            channel: 2,
            period_ms: Some(900),
        }
        .encode();
        assert_eq!(request, "p02");
        assert_eq!(answer, "p0200000384");
        assert!(answer.starts_with(&request));
    }

    #[test]
    fn test_decode_last_sample_negative() {
        let cmd = Command::LastSample {
            channel: 0,
            sample: Some(RawSample {
                value: -42,
                timestamp: 7,
            }),
        };
        let encoded = cmd.encode();
        assert_eq!(encoded, "l00FFFFFFD600000007");
        assert_eq!(Command::decode(&encoded), Some(cmd));
    }

    #[test]
    fn test_decode_hires_sample() {
        let cmd = Command::LastSampleHiRes {
            channel: 3,
            sample: Some(HiResSample {
                value: 1.5,
                timestamp: 1000,
            }),
        };
        assert_eq!(Command::decode(&cmd.encode()), Some(cmd));
    }

    #[test]
    fn test_decode_short_input_is_no_match() {
        assert_eq!(Command::decode("p0"), None);
        assert_eq!(Command::decode("l00FFFF"), None);
        assert_eq!(Command::decode("n01434F"), None);
        assert_eq!(Command::decode("P01"), None);
    }

    #[test]
    fn test_decode_trailing_garbage_is_no_match() {
        assert_eq!(Command::decode("T0302Z"), None);
        assert_eq!(Command::decode("e0101FF"), None);
    }

    #[test]
    fn test_decode_malformed_digits() {
        assert_eq!(Command::decode("pXY"), None);
        assert_eq!(Command::decode("T+1+2"), None);
    }

    #[test]
    fn test_decode_empty() {
        assert_eq!(Command::decode(""), None);
    }

    #[test]
    fn test_unknown_command_preserved() {
        assert_eq!(
            Command::decode("Z1234"),
            Some(Command::Unknown("Z1234".into()))
        );
        assert_eq!(Command::Unknown("Z1234".into()).encode(), "Z1234");
    }

    #[test]
    fn test_readback_table() {
        assert_eq!(readback_id('P'), Some('p'));
        assert_eq!(readback_id('C'), Some('c'));
        assert_eq!(readback_id('p'), None);

        let write = Command::SetPrescaler {
            channel: 1,
            value: 64,
        };
        assert!(write.is_write());
        let readback = write.readback().unwrap();
        assert_eq!(readback.encode(), "c01");
        assert_eq!(Some(readback.id()), readback_id(write.id()));
    }

    #[test]
    fn test_write_echo_is_compatible_with_readback_answer() {
        let write = Command::SetEnabled {
            channel: 0,
            enabled: false,
        };
        assert_eq!(write.encode(), "E0000");
        assert_eq!(Command::decode("E0000"), Some(write));
    }

    #[test]
    fn test_query_classification() {
        assert!(Command::BoardType(None).is_query());
        assert!(!Command::BoardType(Some(BoardTypeInfo {
            board_type: BoardType::Ndir,
            channels: 1
        }))
        .is_query());
        assert!(!Command::SetEnabled {
            channel: 0,
            enabled: true
        }
        .is_query());
    }
}
