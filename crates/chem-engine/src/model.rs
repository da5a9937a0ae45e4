//! Boards, sensors and samples

use chem_protocol::{BoardId, BoardType};
use serde::{Deserialize, Serialize};

use crate::discovered::Discovered;

/// Pseudo-sensors read from the host itself rather than over the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostLocalKind {
    BatteryStatus,
    CoulombCounter,
    Voltage,
}

impl HostLocalKind {
    /// All host-local sensors in channel order
    pub const ALL: [HostLocalKind; 3] = [
        HostLocalKind::BatteryStatus,
        HostLocalKind::CoulombCounter,
        HostLocalKind::Voltage,
    ];

    /// Channel index on the host-local board
    pub fn channel(&self) -> u8 {
        match self {
            HostLocalKind::BatteryStatus => 0,
            HostLocalKind::CoulombCounter => 1,
            HostLocalKind::Voltage => 2,
        }
    }

    pub fn from_channel(channel: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.channel() == channel)
    }

    pub fn name(&self) -> &'static str {
        match self {
            HostLocalKind::BatteryStatus => "Battery status",
            HostLocalKind::CoulombCounter => "Coulomb counter",
            HostLocalKind::Voltage => "Voltage",
        }
    }

    pub fn units(&self) -> &'static str {
        match self {
            HostLocalKind::BatteryStatus => "%",
            HostLocalKind::CoulombCounter => "mAh",
            HostLocalKind::Voltage => "V",
        }
    }
}

/// Latest accepted reading of a channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SampleValue {
    /// Value as reported (raw integer for legacy samples)
    pub value: f64,
    /// Value in engineering units
    pub evaluated: f64,
    /// Board-side timestamp
    pub timestamp: u32,
}

/// A sensor board on a bus
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Board {
    pub id: BoardId,
    pub board_type: Discovered<BoardType>,
    pub channels: Discovered<u8>,
    pub firmware: Discovered<String>,
    pub serial: Discovered<String>,
}

impl Board {
    /// An empty board record
    pub fn new(id: BoardId) -> Self {
        Self {
            id,
            board_type: Discovered::unset(),
            channels: Discovered::unset(),
            firmware: Discovered::unset(),
            serial: Discovered::unset(),
        }
    }

    /// Number of channels, zero if unknown
    pub fn channel_count(&self) -> u8 {
        self.channels.get().unwrap_or(0)
    }

    /// Firmware and serial are both known
    pub fn is_info_complete(&self) -> bool {
        self.firmware.is_set() && self.serial.is_set()
    }
}

/// One measurement channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sensor {
    pub board: BoardId,
    pub channel: u8,
    pub name: Discovered<String>,
    pub serial: Discovered<String>,
    pub units: Discovered<String>,
    pub sampling_period_ms: Discovered<u32>,
    pub enabled: Discovered<bool>,
    pub prescaler: Discovered<u16>,
    /// Raw → engineering-unit conversion over `x`
    pub expression: Discovered<String>,
    pub sample: Option<SampleValue>,
}

impl Sensor {
    /// An empty channel record
    pub fn new(board: BoardId, channel: u8) -> Self {
        Self {
            board,
            channel,
            name: Discovered::unset(),
            serial: Discovered::unset(),
            units: Discovered::unset(),
            sampling_period_ms: Discovered::unset(),
            enabled: Discovered::unset(),
            prescaler: Discovered::unset(),
            expression: Discovered::unset(),
            sample: None,
        }
    }

    /// A host-local pseudo-sensor
    pub fn host_local(kind: HostLocalKind) -> Self {
        let mut sensor = Self::new(BoardId::HOST_LOCAL, kind.channel());
        sensor.name.set_discovered(kind.name().to_string());
        sensor.units.set_discovered(kind.units().to_string());
        sensor.enabled.set_discovered(true);
        sensor
    }

    /// Sort and lookup key
    pub fn key(&self) -> (BoardId, u8) {
        (self.board, self.channel)
    }

    pub fn is_host_local(&self) -> bool {
        self.board == BoardId::HOST_LOCAL
    }

    pub fn host_local_kind(&self) -> Option<HostLocalKind> {
        if self.is_host_local() {
            HostLocalKind::from_channel(self.channel)
        } else {
            None
        }
    }

    /// A channel whose enabled flag was never reported counts as enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.get().unwrap_or(true)
    }

    /// Every field the channel inquiry asks for has an answer
    pub fn is_info_complete(&self) -> bool {
        self.name.is_set()
            && self.serial.is_set()
            && self.sampling_period_ms.is_set()
            && self.units.is_set()
            && self.enabled.is_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_local_sensor() {
        let sensor = Sensor::host_local(HostLocalKind::Voltage);
        assert!(sensor.is_host_local());
        assert_eq!(sensor.host_local_kind(), Some(HostLocalKind::Voltage));
        assert_eq!(sensor.units.get().as_deref(), Some("V"));
    }

    #[test]
    fn test_channel_info_completeness() {
        let mut sensor = Sensor::new(BoardId::new(1), 0);
        assert!(sensor.is_enabled());
        sensor.name.set_discovered("CO".into());
        sensor.serial.set_discovered("A1".into());
        sensor.units.set_discovered("ppm".into());
        sensor.enabled.set_discovered(false);
        assert!(!sensor.is_info_complete());
        sensor.sampling_period_ms.set_discovered(900);
        assert!(sensor.is_info_complete());
        assert!(!sensor.is_enabled());
    }
}
