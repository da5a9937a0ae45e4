//! Static configuration
//!
//! Loaded once at startup from JSON. The engine reads the per-bus board and
//! sensor entries when ReadConfiguration is entered; every value given here
//! overrides what the boards report.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chem_protocol::{BoardId, BoardType, TransportKind};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::HostLocalKind;

/// Engine timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scheduler tick
    pub tick_ms: u64,
    /// Wait for board type answers
    pub board_discovery_timeout_ms: u64,
    /// Wait for firmware/serial answers
    pub board_info_timeout_ms: u64,
    /// Wait for channel attribute answers
    pub channel_info_timeout_ms: u64,
    /// Wait for re-inquired names/serials and write verification
    pub configuration_timeout_ms: u64,
    /// Floor applied to every channel's sampling period
    pub default_sampling_period_ms: u32,
    /// Engine-level ownership lease
    pub engine_ownership_timeout_ms: u64,
    /// Per-bus ownership lease
    pub host_ownership_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            board_discovery_timeout_ms: 5_000,
            board_info_timeout_ms: 20_000,
            channel_info_timeout_ms: 35_000,
            configuration_timeout_ms: 20_000,
            default_sampling_period_ms: 500,
            engine_ownership_timeout_ms: 120_000,
            host_ownership_timeout_ms: 60_000,
        }
    }
}

impl EngineConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn board_discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.board_discovery_timeout_ms)
    }

    pub fn board_info_timeout(&self) -> Duration {
        Duration::from_millis(self.board_info_timeout_ms)
    }

    pub fn channel_info_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_info_timeout_ms)
    }

    pub fn configuration_timeout(&self) -> Duration {
        Duration::from_millis(self.configuration_timeout_ms)
    }

    pub fn engine_ownership_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_ownership_timeout_ms)
    }

    pub fn host_ownership_timeout(&self) -> Duration {
        Duration::from_millis(self.host_ownership_timeout_ms)
    }

    /// Poll interval for a channel: a third of its effective sampling period
    pub fn poll_interval(&self, sampling_period_ms: Option<u32>) -> Duration {
        let period = sampling_period_ms
            .unwrap_or(self.default_sampling_period_ms)
            .max(self.default_sampling_period_ms);
        Duration::from_millis(u64::from(period)) / 3
    }
}

/// A board known from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticBoard {
    pub id: u8,
    /// Board type code
    pub board_type: u8,
    pub channels: u8,
    #[serde(default)]
    pub firmware: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
}

impl StaticBoard {
    pub fn board_id(&self) -> BoardId {
        BoardId::new(self.id)
    }

    pub fn board_type(&self) -> BoardType {
        BoardType::from_code(self.board_type)
    }
}

/// Channel attributes fixed by configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticSensor {
    pub board: u8,
    pub channel: u8,
    pub name: Option<String>,
    pub serial: Option<String>,
    pub units: Option<String>,
    pub expression: Option<String>,
    pub enabled: Option<bool>,
    pub sampling_period_ms: Option<u32>,
}

impl StaticSensor {
    pub fn key(&self) -> (BoardId, u8) {
        (BoardId::new(self.board), self.channel)
    }
}

/// Which host-local pseudo-sensors to publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostLocalConfig {
    pub battery_status: bool,
    pub coulomb_counter: bool,
    pub voltage: bool,
}

impl HostLocalConfig {
    /// Enabled kinds in channel order
    pub fn enabled(&self) -> Vec<HostLocalKind> {
        HostLocalKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                HostLocalKind::BatteryStatus => self.battery_status,
                HostLocalKind::CoulombCounter => self.coulomb_counter,
                HostLocalKind::Voltage => self.voltage,
            })
            .collect()
    }
}

fn default_transport() -> TransportKind {
    TransportKind::PointToMultipoint
}

fn default_true() -> bool {
    true
}

/// One physical bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Name used in logs and events
    pub name: String,
    /// Serial port path, or `mem:<name>` for a simulated bus
    pub endpoint: String,
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
    /// Protocol version 1 (CRC-32 on answers)
    #[serde(default)]
    pub crc: bool,
    /// Run Autodiscover before reading configuration
    #[serde(default = "default_true")]
    pub autodiscovery: bool,
    #[serde(default)]
    pub boards: Vec<StaticBoard>,
    #[serde(default)]
    pub sensors: Vec<StaticSensor>,
    #[serde(default)]
    pub host_local: HostLocalConfig,
}

impl BusConfig {
    /// A bus with autodiscovery and no static entries
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            transport: default_transport(),
            crc: false,
            autodiscovery: true,
            boards: Vec::new(),
            sensors: Vec::new(),
            host_local: HostLocalConfig::default(),
        }
    }

    /// Whether frames on this bus carry board ids
    ///
    /// Point-to-point links reach exactly one board, which the engine files
    /// under id 0.
    pub fn is_addressed(&self) -> bool {
        matches!(
            self.transport,
            TransportKind::PointToMultipoint | TransportKind::PointToMultipointFwu
        )
    }

    /// Static entry for a channel, if any
    pub fn sensor(&self, board: BoardId, channel: u8) -> Option<&StaticSensor> {
        self.sensors.iter().find(|s| s.key() == (board, channel))
    }
}

/// Root configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineConfig,
    pub buses: Vec<BusConfig>,
}

impl Settings {
    /// `$XDG_CONFIG_HOME/chem-hostd`, falling back to `~/.config/chem-hostd`
    pub fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("chem-hostd"));
            }
        }
        dirs::home_dir().map(|h| h.join(".config").join("chem-hostd"))
    }

    /// Default configuration file path
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from `path`, or from the default location
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path().ok_or(ConfigError::NoConfigDir)?,
        };
        let json = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Write to `path` as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.tick_ms == 0 {
            return Err(ConfigError::Invalid("tick_ms must be positive".into()));
        }
        if self.engine.default_sampling_period_ms == 0 {
            return Err(ConfigError::Invalid(
                "default_sampling_period_ms must be positive".into(),
            ));
        }

        let mut names = HashSet::new();
        for bus in &self.buses {
            if !names.insert(bus.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate bus name {}", bus.name)));
            }
            for board in &bus.boards {
                BoardId::addressable(board.id).map_err(|e| {
                    ConfigError::Invalid(format!("bus {}: {}", bus.name, e))
                })?;
            }
            for sensor in &bus.sensors {
                BoardId::addressable(sensor.board).map_err(|e| {
                    ConfigError::Invalid(format!("bus {}: {}", bus.name, e))
                })?;
                if sensor.sampling_period_ms == Some(0) {
                    return Err(ConfigError::Invalid(format!(
                        "bus {}: sensor {:02X}/{} has a zero sampling period",
                        bus.name, sensor.board, sensor.channel
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "engine": { "tick_ms": 50 },
        "buses": [
            {
                "name": "main",
                "endpoint": "/dev/ttyUSB0",
                "transport": "point_to_multipoint",
                "crc": true,
                "boards": [ { "id": 2, "board_type": 3, "channels": 4 } ],
                "sensors": [
                    { "board": 2, "channel": 0, "name": "CO", "expression": "x / 10" },
                    { "board": 2, "channel": 1, "enabled": false, "sampling_period_ms": 2000 }
                ],
                "host_local": { "voltage": true }
            }
        ]
    }"#;

    #[test]
    fn test_parse_sample() {
        let settings = Settings::from_json(SAMPLE).unwrap();
        assert_eq!(settings.engine.tick_ms, 50);
        assert_eq!(settings.engine.board_discovery_timeout_ms, 5_000);

        let bus = &settings.buses[0];
        assert_eq!(bus.transport, TransportKind::PointToMultipoint);
        assert!(bus.crc);
        assert!(bus.autodiscovery);
        assert_eq!(bus.boards[0].board_type(), BoardType::QuadGas);
        assert_eq!(
            bus.sensor(BoardId::new(2), 0).and_then(|s| s.expression.as_deref()),
            Some("x / 10")
        );
        assert_eq!(bus.host_local.enabled(), vec![HostLocalKind::Voltage]);
    }

    #[test]
    fn test_unknown_transport_rejected() {
        let json = r#"{ "buses": [ { "name": "a", "endpoint": "x", "transport": "rs485" } ] }"#;
        assert!(matches!(Settings::from_json(json), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_board_id_out_of_range() {
        let json = r#"{ "buses": [ { "name": "a", "endpoint": "x",
            "boards": [ { "id": 16, "board_type": 1, "channels": 1 } ] } ] }"#;
        assert!(matches!(Settings::from_json(json), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_duplicate_bus_names() {
        let json = r#"{ "buses": [ { "name": "a", "endpoint": "x" }, { "name": "a", "endpoint": "y" } ] }"#;
        assert!(matches!(Settings::from_json(json), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_poll_interval() {
        let config = EngineConfig::default();
        assert_eq!(config.poll_interval(Some(900)), Duration::from_millis(300));
        // Shorter periods are raised to the default
        assert_eq!(config.poll_interval(Some(60)), Duration::from_millis(500) / 3);
        assert_eq!(config.poll_interval(None), Duration::from_millis(500) / 3);
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("chem-engine-config-{}", std::process::id()));
        let path = dir.join("config.json");
        let settings = Settings::from_json(SAMPLE).unwrap();
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(Some(&path)).unwrap(), settings);
        let _ = std::fs::remove_dir_all(dir);
    }
}
