//! Virtual sensor board
//!
//! Answers the board command set from in-memory state. Samples advance on
//! their own: a new sample (with a new timestamp) appears once per sampling
//! period, measured from when the board was created.

use chem_protocol::{
    BoardId, BoardType, BoardTypeInfo, Command, HiResSample, RawSample,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::trace;

/// One simulated channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualChannel {
    pub name: String,
    pub serial: String,
    pub units: String,
    pub sampling_period_ms: u32,
    pub enabled: bool,
    pub prescaler: u16,
    /// Raw reading the waveform starts from
    pub base_raw: i32,
    /// Divider turning raw readings into the pre-scaled value
    pub scale: f32,
}

impl Default for VirtualChannel {
    fn default() -> Self {
        Self {
            name: "Gas".to_string(),
            serial: "CH-0000".to_string(),
            units: "ppm".to_string(),
            sampling_period_ms: 1000,
            enabled: true,
            prescaler: 1,
            base_raw: 400,
            scale: 10.0,
        }
    }
}

impl VirtualChannel {
    pub fn new(name: impl Into<String>, units: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            units: units.into(),
            ..Self::default()
        }
    }

    /// Index of the sample current `elapsed_ms` after power-up
    fn sample_index(&self, elapsed_ms: u64) -> u64 {
        elapsed_ms / u64::from(self.sampling_period_ms.max(1))
    }

    /// Raw reading for a sample index: a slow sawtooth above the base
    fn raw_at(&self, index: u64) -> i32 {
        self.base_raw + (index % 10) as i32
    }

    fn sample_at(&self, elapsed_ms: u64) -> RawSample {
        let index = self.sample_index(elapsed_ms);
        RawSample {
            value: self.raw_at(index),
            timestamp: (index * u64::from(self.sampling_period_ms)) as u32,
        }
    }
}

/// Serializable description of a virtual board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualBoardConfig {
    pub id: u8,
    /// Board type code
    pub board_type: u8,
    #[serde(default = "default_firmware")]
    pub firmware: String,
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub channels: Vec<VirtualChannel>,
}

fn default_firmware() -> String {
    "1.0".to_string()
}

/// A simulated sensor board
#[derive(Debug, Clone)]
pub struct VirtualBoard {
    id: BoardId,
    board_type: BoardType,
    firmware: String,
    serial: String,
    channels: Vec<VirtualChannel>,
    powered_at: Instant,
    silent: bool,
    requests: u64,
}

impl VirtualBoard {
    /// A board with `channels` default channels
    pub fn new(id: u8, board_type: BoardType, channels: u8) -> Self {
        let channels = (0..channels)
            .map(|c| VirtualChannel {
                name: format!("Gas {}", c),
                serial: format!("CH-{:02X}{:02X}", id, c),
                ..VirtualChannel::default()
            })
            .collect();
        Self {
            id: BoardId::new(id),
            board_type,
            firmware: default_firmware(),
            serial: format!("SB-{:04}", id),
            channels,
            powered_at: Instant::now(),
            silent: false,
            requests: 0,
        }
    }

    pub fn from_config(config: VirtualBoardConfig) -> Self {
        Self {
            id: BoardId::new(config.id),
            board_type: BoardType::from_code(config.board_type),
            firmware: config.firmware,
            serial: config.serial,
            channels: config.channels,
            powered_at: Instant::now(),
            silent: false,
            requests: 0,
        }
    }

    pub fn id(&self) -> BoardId {
        self.id
    }

    pub fn channels(&self) -> &[VirtualChannel] {
        &self.channels
    }

    pub fn channel_mut(&mut self, channel: u8) -> Option<&mut VirtualChannel> {
        self.channels.get_mut(usize::from(channel))
    }

    pub fn push_channel(&mut self, channel: VirtualChannel) {
        self.channels.push(channel);
    }

    pub fn set_firmware(&mut self, firmware: impl Into<String>) {
        self.firmware = firmware.into();
    }

    /// Stop answering (unplugged or crashed board)
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Requests this board has received
    pub fn requests(&self) -> u64 {
        self.requests
    }

    /// Answer a request payload, `None` if the board stays quiet
    pub fn handle(&mut self, payload: &str, now: Instant) -> Option<String> {
        self.requests += 1;
        if self.silent {
            return None;
        }
        let command = Command::decode(payload)?;
        if !command.is_query() && !command.is_write() {
            return None;
        }
        let answer = self.answer(command, now)?;
        trace!("Board {} answers {} with {}", self.id, payload, answer);
        Some(answer)
    }

    fn answer(&mut self, command: Command, now: Instant) -> Option<String> {
        let elapsed_ms = now.saturating_duration_since(self.powered_at).as_millis() as u64;
        let channel_count = self.channels.len() as u8;

        let answer = match command {
            Command::BoardType(None) => Command::BoardType(Some(BoardTypeInfo {
                board_type: self.board_type,
                channels: channel_count,
            })),
            Command::FirmwareVersion(None) => Command::FirmwareVersion(Some(self.firmware.clone())),
            Command::BoardSerial(None) => Command::BoardSerial(Some(self.serial.clone())),
            Command::ChannelName { channel, name: None } => Command::ChannelName {
                channel,
                name: Some(self.channel(channel)?.name.clone()),
            },
            Command::ChannelSerial {
                channel,
                serial: None,
            } => Command::ChannelSerial {
                channel,
                serial: Some(self.channel(channel)?.serial.clone()),
            },
            Command::Units {
                channel,
                units: None,
            } => Command::Units {
                channel,
                units: Some(self.channel(channel)?.units.clone()),
            },
            Command::SamplingPeriod {
                channel,
                period_ms: None,
            } => Command::SamplingPeriod {
                channel,
                period_ms: Some(self.channel(channel)?.sampling_period_ms),
            },
            Command::Enabled {
                channel,
                enabled: None,
            } => Command::Enabled {
                channel,
                enabled: Some(self.channel(channel)?.enabled),
            },
            Command::Prescaler {
                channel,
                value: None,
            } => Command::Prescaler {
                channel,
                value: Some(self.channel(channel)?.prescaler),
            },
            Command::LastSample {
                channel,
                sample: None,
            } => Command::LastSample {
                channel,
                sample: Some(self.channel(channel)?.sample_at(elapsed_ms)),
            },
            Command::LastSampleHiRes {
                channel,
                sample: None,
            } => {
                let ch = self.channel(channel)?;
                let raw = ch.sample_at(elapsed_ms);
                Command::LastSampleHiRes {
                    channel,
                    sample: Some(HiResSample {
                        value: raw.value as f32 / ch.scale,
                        timestamp: raw.timestamp,
                    }),
                }
            }

            // Writes are applied and echoed
            Command::SetChannelName { channel, name } => {
                self.channel_mut(channel)?.name = name.clone();
                Command::SetChannelName { channel, name }
            }
            Command::SetSamplingPeriod { channel, period_ms } => {
                self.channel_mut(channel)?.sampling_period_ms = period_ms;
                Command::SetSamplingPeriod { channel, period_ms }
            }
            Command::SetEnabled { channel, enabled } => {
                self.channel_mut(channel)?.enabled = enabled;
                Command::SetEnabled { channel, enabled }
            }
            Command::SetPrescaler { channel, value } => {
                self.channel_mut(channel)?.prescaler = value;
                Command::SetPrescaler { channel, value }
            }
            _ => return None,
        };
        Some(answer.encode())
    }

    fn channel(&self, channel: u8) -> Option<&VirtualChannel> {
        self.channels.get(usize::from(channel))
    }
}
