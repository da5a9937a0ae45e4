//! Byte channels for configured buses
//!
//! Serial endpoints get a [`SerialChannel`]. `mem:` endpoints, and every bus
//! in simulated mode, get an in-memory channel served by simulated boards.

use std::sync::Arc;

use chem_bus::{is_memory_endpoint, ByteChannel, SerialChannel, MEMORY_PORT_PREFIX};
use chem_engine::{BusConfig, Settings};
use chem_protocol::TransportKind;
use tokio::task::JoinHandle;
use tracing::info;

/// Channel factory for `Engine::from_settings`
///
/// Keeps the simulated bus tasks alive for as long as it lives.
pub struct ChannelFactory {
    simulate: bool,
    servers: Vec<JoinHandle<()>>,
}

impl ChannelFactory {
    pub fn new(simulate: bool) -> Self {
        Self {
            simulate,
            servers: Vec::new(),
        }
    }

    pub fn channel_for(&mut self, bus: &BusConfig) -> Arc<dyn ByteChannel> {
        if self.simulate || is_memory_endpoint(&bus.endpoint) {
            info!(
                "[{}] Using simulated boards ({})",
                bus.name,
                bus.transport.name()
            );
            let (channel, server) = chem_sim::demo_bus(bus.transport, bus.crc).attach();
            self.servers.push(server);
            Arc::new(channel)
        } else {
            Arc::new(SerialChannel::new())
        }
    }

    /// Stop serving simulated links
    pub fn shutdown(self) {
        for server in self.servers {
            server.abort();
        }
    }
}

/// Settings for `--simulate` when no configuration file exists
pub fn simulated_settings() -> Settings {
    let mut bus = BusConfig::new("sim", format!("{}sim", MEMORY_PORT_PREFIX));
    bus.transport = TransportKind::PointToMultipoint;
    bus.crc = true;
    bus.host_local.voltage = true;
    Settings {
        buses: vec![bus],
        ..Settings::default()
    }
}
