//! Host-local readings
//!
//! Battery status, coulomb counter and supply voltage are read from the host
//! rather than over the bus. They are published as channels of the reserved
//! host-local board.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::trace;

use crate::model::HostLocalKind;

/// Source of host-local readings
pub trait HostTelemetry: Send + Sync {
    /// Current reading in the kind's units, `None` if unavailable
    fn read(&self, kind: HostLocalKind) -> Option<f64>;
}

/// Reads the Linux power-supply class
///
/// `capacity` is a percentage, `charge_now` is in µAh and `voltage_now`
/// in µV.
#[derive(Debug, Clone)]
pub struct SysfsTelemetry {
    supply_dir: PathBuf,
}

impl SysfsTelemetry {
    pub const DEFAULT_SUPPLY: &'static str = "/sys/class/power_supply/BAT0";

    pub fn new() -> Self {
        Self::with_supply_dir(Self::DEFAULT_SUPPLY)
    }

    pub fn with_supply_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            supply_dir: dir.into(),
        }
    }

    fn read_attribute(&self, name: &str) -> Option<f64> {
        let path = self.supply_dir.join(name);
        match std::fs::read_to_string(&path) {
            Ok(text) => text.trim().parse().ok(),
            Err(e) => {
                trace!("Cannot read {}: {}", path.display(), e);
                None
            }
        }
    }
}

impl Default for SysfsTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl HostTelemetry for SysfsTelemetry {
    fn read(&self, kind: HostLocalKind) -> Option<f64> {
        match kind {
            HostLocalKind::BatteryStatus => self.read_attribute("capacity"),
            HostLocalKind::CoulombCounter => self.read_attribute("charge_now").map(|uah| uah / 1000.0),
            HostLocalKind::Voltage => self.read_attribute("voltage_now").map(|uv| uv / 1_000_000.0),
        }
    }
}

/// Readings set by hand, for tests and simulation
#[derive(Debug, Default)]
pub struct FixedTelemetry {
    values: Mutex<HashMap<HostLocalKind, f64>>,
}

impl FixedTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, kind: HostLocalKind, value: f64) {
        self.values.lock().insert(kind, value);
    }

    pub fn clear(&self, kind: HostLocalKind) {
        self.values.lock().remove(&kind);
    }
}

impl HostTelemetry for FixedTelemetry {
    fn read(&self, kind: HostLocalKind) -> Option<f64> {
        self.values.lock().get(&kind).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysfs_units() {
        let dir = std::env::temp_dir().join(format!("chem-engine-supply-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("capacity"), "87\n").unwrap();
        std::fs::write(dir.join("voltage_now"), "12150000\n").unwrap();

        let telemetry = SysfsTelemetry::with_supply_dir(&dir);
        assert_eq!(telemetry.read(HostLocalKind::BatteryStatus), Some(87.0));
        assert_eq!(telemetry.read(HostLocalKind::Voltage), Some(12.15));
        assert_eq!(telemetry.read(HostLocalKind::CoulombCounter), None);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_fixed_readings() {
        let telemetry = FixedTelemetry::new();
        assert_eq!(telemetry.read(HostLocalKind::Voltage), None);
        telemetry.set(HostLocalKind::Voltage, 3.7);
        assert_eq!(telemetry.read(HostLocalKind::Voltage), Some(3.7));
        telemetry.clear(HostLocalKind::Voltage);
        assert_eq!(telemetry.read(HostLocalKind::Voltage), None);
    }
}
