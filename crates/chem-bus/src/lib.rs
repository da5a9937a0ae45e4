//! Sensor Bus Core
//!
//! This crate runs the chemical sensor board protocol over a byte channel:
//!
//! - [`ByteChannel`]: opens a byte stream for an endpoint (serial port or
//!   in-memory pipe)
//! - [`SensorBus`]: bounded rx/tx queues, the framing pumps, the half-duplex
//!   turn gate and automatic reconnection
//! - [`RawCommandQueue`]: send a list of opaque commands and collect the
//!   literal answers
//! - [`PortScanner`]: serial port enumeration
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chem_bus::{BusOptions, SensorBus, SerialChannel};
//! use chem_protocol::{AppMessage, BoardId, Command};
//!
//! # async fn run() -> Result<(), chem_bus::BusError> {
//! let bus = SensorBus::new("bus0", Arc::new(SerialChannel::new()), BusOptions::default());
//! bus.connect("/dev/ttyUSB0").await?;
//! bus.write(AppMessage::new(BoardId::new(0), Command::BoardType(None).encode())).await?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod channel;
pub mod error;
pub mod gate;
pub mod raw_queue;
pub mod scanner;

pub use bus::{BusOptions, BusStats, MessageConsumer, SensorBus};
pub use channel::{
    is_memory_endpoint, memory_channel, BoxedStream, ByteChannel, ByteStream, MemoryChannel,
    MemoryLink, MemoryListener, SerialChannel, MEMORY_PORT_PREFIX,
};
pub use error::BusError;
pub use gate::TurnGate;
pub use raw_queue::RawCommandQueue;
pub use scanner::{PortScanner, SerialPortInfo};
