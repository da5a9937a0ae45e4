//! Sensor Host Engine
//!
//! Sequences bus inquiries for chemical sensor boards:
//!
//! - **Autodiscover**: find boards, then their firmware/serial, then every
//!   channel's attributes
//! - **ReadConfiguration**: fold static configuration into what was found,
//!   append host-local pseudo-sensors, write and verify configured periods
//! - **Sampling**: poll every enabled channel at a third of its period
//!
//! # Architecture
//!
//! ```text
//! Engine ──► SensorHost (per bus) ──► EngineState ──► Inventory
//!    │             ▲
//!    ▼             │ deliver()
//! driver ──► SensorBus (chem-bus)
//! ```
//!
//! The states are plain data driven by `inquire`/`evaluate_answer`; they
//! take the current time as an argument and never touch the bus directly.
//! [`run_engine`] is the only part that spawns tasks.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chem_bus::SerialChannel;
//! use chem_engine::{run_engine, Engine, Settings, SysfsTelemetry};
//! use tokio::sync::mpsc;
//!
//! # async fn run() -> Result<(), chem_engine::EngineError> {
//! let settings = Settings::load(None)?;
//! let engine = Arc::new(Engine::from_settings(
//!     &settings,
//!     Arc::new(SysfsTelemetry::new()),
//!     |_| Arc::new(SerialChannel::new()),
//! ));
//! engine.connect_all().await;
//!
//! let (event_tx, mut events) = mpsc::channel(256);
//! let handle = run_engine(engine.clone(), event_tx);
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod discovered;
pub mod driver;
pub mod engine;
pub mod error;
pub mod events;
pub mod expression;
pub mod host;
pub mod inventory;
pub mod model;
pub mod ownership;
pub mod state;
pub mod telemetry;

pub use config::{BusConfig, EngineConfig, HostLocalConfig, Settings, StaticBoard, StaticSensor};
pub use discovered::{Discovered, FieldOrigin};
pub use driver::{run_engine, EngineHandle};
pub use engine::{Engine, HostEntry, ENGINE_WIDE};
pub use error::{ConfigError, EngineError};
pub use events::EngineEvent;
pub use expression::{evaluate_or_raw, Expression, ExpressionError};
pub use host::SensorHost;
pub use inventory::Inventory;
pub use model::{Board, HostLocalKind, SampleValue, Sensor};
pub use ownership::OwnershipLease;
pub use state::StateKind;
pub use telemetry::{FixedTelemetry, HostTelemetry, SysfsTelemetry};
