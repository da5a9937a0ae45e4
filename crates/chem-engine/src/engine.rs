//! Multi-bus engine
//!
//! One [`SensorHost`] and one [`SensorBus`] per configured bus, plus an
//! engine-wide ownership lease that suspends every host at once.

use std::sync::Arc;

use chem_bus::{BusOptions, ByteChannel, RawCommandQueue, SensorBus};
use chem_protocol::AppMessage;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{BusConfig, EngineConfig, Settings};
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::host::SensorHost;
use crate::ownership::OwnershipLease;
use crate::telemetry::HostTelemetry;

/// Bus name used in events about the engine-wide lease
pub const ENGINE_WIDE: &str = "*";

/// A host wired to its bus
#[derive(Clone)]
pub struct HostEntry {
    pub host: Arc<SensorHost>,
    pub bus: SensorBus,
    pub raw: Arc<RawCommandQueue>,
}

pub struct Engine {
    config: EngineConfig,
    hosts: Vec<HostEntry>,
    ownership: Mutex<OwnershipLease>,
    event_buffer: Mutex<Vec<EngineEvent>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let ownership = OwnershipLease::new(config.engine_ownership_timeout());
        Self {
            config,
            hosts: Vec::new(),
            ownership: Mutex::new(ownership),
            event_buffer: Mutex::new(Vec::new()),
        }
    }

    /// Build an engine for every bus in `settings`
    ///
    /// `channel_for` picks the byte channel of each bus (serial port or an
    /// in-memory pipe to simulated boards).
    pub fn from_settings(
        settings: &Settings,
        telemetry: Arc<dyn HostTelemetry>,
        mut channel_for: impl FnMut(&BusConfig) -> Arc<dyn ByteChannel>,
    ) -> Self {
        let mut engine = Self::new(settings.engine.clone());
        for bus_config in &settings.buses {
            let channel = channel_for(bus_config);
            engine.add_bus(bus_config.clone(), channel, telemetry.clone());
        }
        engine
    }

    /// Wire a new bus; the host is subscribed to it before it connects
    pub fn add_bus(
        &mut self,
        bus_config: BusConfig,
        channel: Arc<dyn ByteChannel>,
        telemetry: Arc<dyn HostTelemetry>,
    ) -> &HostEntry {
        let options = BusOptions {
            transport: bus_config.transport,
            crc: bus_config.crc,
            ..BusOptions::default()
        };
        let bus = SensorBus::new(bus_config.name.clone(), channel, options);
        let host = Arc::new(SensorHost::new(bus_config, self.config.clone(), telemetry));
        bus.subscribe(host.clone());
        let raw = RawCommandQueue::attach(&bus);
        self.hosts.push(HostEntry { host, bus, raw });
        &self.hosts[self.hosts.len() - 1]
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn hosts(&self) -> &[HostEntry] {
        &self.hosts
    }

    pub fn host(&self, bus: &str) -> Result<&HostEntry, EngineError> {
        self.hosts
            .iter()
            .find(|e| e.host.name() == bus)
            .ok_or_else(|| EngineError::UnknownBus(bus.to_string()))
    }

    /// Connect every bus to its configured endpoint
    ///
    /// A bus that cannot be opened is logged and left disconnected; its
    /// first write retries. Returns how many buses connected.
    pub async fn connect_all(&self) -> usize {
        let mut connected = 0;
        for entry in &self.hosts {
            let endpoint = &entry.host.bus_config().endpoint;
            match entry.bus.connect(endpoint).await {
                Ok(()) => {
                    info!("[{}] Connected to {}", entry.host.name(), endpoint);
                    connected += 1;
                }
                Err(e) => warn!("[{}] Connect failed: {}", entry.host.name(), e),
            }
        }
        connected
    }

    pub async fn disconnect_all(&self) {
        for entry in &self.hosts {
            entry.bus.disconnect().await;
        }
    }

    /// One tick for the host at `index`
    ///
    /// Returns nothing while the engine-wide lease is held.
    pub fn inquire(&self, index: usize, now: Instant) -> Vec<AppMessage> {
        if self.check_ownership(now) {
            return Vec::new();
        }
        match self.hosts.get(index) {
            Some(entry) => entry.host.inquire(now),
            None => Vec::new(),
        }
    }

    /// Suspend every host
    pub fn take_ownership(&self, owner: &str, now: Instant) -> Result<(), EngineError> {
        self.ownership
            .lock()
            .take(owner, now)
            .map_err(|current| EngineError::AlreadyOwned {
                bus: ENGINE_WIDE.to_string(),
                owner: current,
            })?;
        self.push_event(EngineEvent::OwnershipChanged {
            bus: ENGINE_WIDE.to_string(),
            owner: Some(owner.to_string()),
        });
        Ok(())
    }

    pub fn release_ownership(&self, owner: &str) -> bool {
        let released = self.ownership.lock().release(owner);
        if released {
            self.push_event(EngineEvent::OwnershipChanged {
                bus: ENGINE_WIDE.to_string(),
                owner: None,
            });
        }
        released
    }

    pub fn is_owned(&self, now: Instant) -> bool {
        self.ownership.lock().is_owned(now)
    }

    /// Suspend one host
    pub fn take_bus_ownership(&self, bus: &str, owner: &str, now: Instant) -> Result<(), EngineError> {
        self.host(bus)?.host.take_ownership(owner, now)
    }

    pub fn release_bus_ownership(&self, bus: &str, owner: &str) -> Result<bool, EngineError> {
        Ok(self.host(bus)?.host.release_ownership(owner))
    }

    /// Send opaque commands on a bus and collect the literal answers
    pub async fn send_raw(&self, bus: &str, commands: &[AppMessage]) -> Result<Vec<AppMessage>, EngineError> {
        let raw = self.host(bus)?.raw.clone();
        Ok(raw.send(commands).await?)
    }

    /// Take engine-wide events buffered since the last call
    pub fn drain_events(&self) -> Vec<EngineEvent> {
        std::mem::take(&mut *self.event_buffer.lock())
    }

    fn check_ownership(&self, now: Instant) -> bool {
        let mut lease = self.ownership.lock();
        if let Some(previous) = lease.expire(now) {
            drop(lease);
            info!("Engine ownership of {} expired", previous);
            self.push_event(EngineEvent::OwnershipChanged {
                bus: ENGINE_WIDE.to_string(),
                owner: None,
            });
            return false;
        }
        lease.is_owned(now)
    }

    fn push_event(&self, event: EngineEvent) {
        self.event_buffer.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chem_bus::memory_channel;

    use super::*;
    use crate::telemetry::FixedTelemetry;

    fn engine_with_two_buses() -> Engine {
        let settings = Settings {
            engine: EngineConfig::default(),
            buses: vec![BusConfig::new("a", "mem:a"), BusConfig::new("b", "mem:b")],
        };
        Engine::from_settings(&settings, Arc::new(FixedTelemetry::new()), |_| {
            let (channel, _listener) = memory_channel();
            Arc::new(channel)
        })
    }

    #[test]
    fn test_engine_ownership_suspends_all_hosts() {
        let engine = engine_with_two_buses();
        let start = Instant::now();
        engine.take_ownership("tool", start).unwrap();
        assert!(engine.inquire(0, start).is_empty());
        assert!(engine.inquire(1, start + Duration::from_secs(119)).is_empty());

        let later = start + Duration::from_secs(120);
        assert_eq!(engine.inquire(0, later).len(), 16);
        assert_eq!(engine.inquire(1, later).len(), 16);
        assert_eq!(
            engine.drain_events().last(),
            Some(&EngineEvent::OwnershipChanged {
                bus: ENGINE_WIDE.to_string(),
                owner: None
            })
        );
    }

    #[test]
    fn test_bus_ownership_suspends_one_host() {
        let engine = engine_with_two_buses();
        let start = Instant::now();
        engine.take_bus_ownership("b", "tool", start).unwrap();
        assert_eq!(engine.inquire(0, start).len(), 16);
        assert!(engine.inquire(1, start).is_empty());
        assert!(matches!(
            engine.take_bus_ownership("c", "tool", start),
            Err(EngineError::UnknownBus(_))
        ));
        assert!(engine.release_bus_ownership("b", "tool").unwrap());
        assert_eq!(engine.inquire(1, start).len(), 16);
    }
}
