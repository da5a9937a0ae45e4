//! Serial port enumeration
//!
//! Lists the ports a sensor bus could be attached to, skipping ports that
//! are never sensor adapters.

use serde::Serialize;
use serialport::{available_ports, SerialPortType};
use tracing::info;

use crate::error::BusError;

/// Information about a serial port
#[derive(Debug, Clone, Serialize)]
pub struct SerialPortInfo {
    /// Port name (e.g., /dev/ttyUSB0, COM3)
    pub port: String,
    /// USB Vendor ID (if USB)
    pub vid: Option<u16>,
    /// USB Product ID (if USB)
    pub pid: Option<u16>,
    /// USB serial number (if available)
    pub serial_number: Option<String>,
    /// USB manufacturer string
    pub manufacturer: Option<String>,
    /// USB product string
    pub product: Option<String>,
}

impl SerialPortInfo {
    fn from_serialport(name: String, port_type: &SerialPortType) -> Self {
        match port_type {
            SerialPortType::UsbPort(usb) => Self {
                port: name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                serial_number: usb.serial_number.clone(),
                manufacturer: usb.manufacturer.clone(),
                product: usb.product.clone(),
            },
            _ => Self {
                port: name,
                vid: None,
                pid: None,
                serial_number: None,
                manufacturer: None,
                product: None,
            },
        }
    }

    /// One-line description for listings
    pub fn describe(&self) -> String {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => format!(
                "{} [{:04x}:{:04x}] {}",
                self.port,
                vid,
                pid,
                self.product.as_deref().unwrap_or("USB serial")
            ),
            _ => self.port.clone(),
        }
    }
}

/// Port scanner
#[derive(Debug, Clone)]
pub struct PortScanner {
    skip_patterns: Vec<String>,
}

impl PortScanner {
    /// Scanner skipping Bluetooth and debug ports
    pub fn new() -> Self {
        Self {
            skip_patterns: vec!["Bluetooth".to_string(), "debug".to_string()],
        }
    }

    /// Scanner with custom skip patterns
    pub fn with_skip_patterns(skip_patterns: Vec<String>) -> Self {
        Self { skip_patterns }
    }

    /// Enumerate all available serial ports
    pub fn enumerate_ports(&self) -> Result<Vec<SerialPortInfo>, BusError> {
        let ports = available_ports().map_err(|e| BusError::EnumerationFailed(e.to_string()))?;

        let result: Vec<_> = ports
            .into_iter()
            .map(|p| SerialPortInfo::from_serialport(p.port_name, &p.port_type))
            .filter(|p| !self.should_skip(&p.port))
            .collect();

        info!("Found {} serial port(s)", result.len());
        Ok(result)
    }

    fn should_skip(&self, port: &str) -> bool {
        self.skip_patterns.iter().any(|pattern| port.contains(pattern))
    }
}

impl Default for PortScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    #[test]
    fn test_usb_port_description() {
        let usb = SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x10c4,
            pid: 0xea60,
            serial_number: Some("0001".to_string()),
            manufacturer: Some("Silicon Labs".to_string()),
            product: Some("CP2102".to_string()),
        });
        let info = SerialPortInfo::from_serialport("/dev/ttyUSB0".to_string(), &usb);
        assert_eq!(info.describe(), "/dev/ttyUSB0 [10c4:ea60] CP2102");
    }

    #[test]
    fn test_skip_patterns() {
        let scanner = PortScanner::new();
        assert!(scanner.should_skip("/dev/cu.Bluetooth-Incoming-Port"));
        assert!(scanner.should_skip("/dev/cu.debug-console"));
        assert!(!scanner.should_skip("/dev/ttyUSB0"));
    }
}
