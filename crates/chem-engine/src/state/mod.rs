//! Engine state machine
//!
//! A bus goes through three states:
//!
//! ```text
//! Autodiscover ──► ReadConfiguration ──► Sampling
//! ```
//!
//! Autodiscover is skipped when the bus has discovery disabled. Sampling
//! never terminates; the sequence only starts over when the host is asked
//! to re-discover.
//!
//! Every state is driven the same way: `enter` once, `inquire` on each
//! scheduler tick (returns the requests to put on the bus), and
//! `evaluate_answer` for every message the bus delivers.

mod autodiscover;
mod read_configuration;
mod sampling;

use std::fmt;

use chem_protocol::{AppMessage, BoardId, Command};
use serde::Serialize;
use tokio::time::Instant;

pub use autodiscover::{Autodiscover, DiscoveryPhase};
pub use read_configuration::{ConfigurationPhase, ReadConfiguration};
pub use sampling::Sampling;

use crate::config::{BusConfig, EngineConfig};
use crate::events::EngineEvent;
use crate::inventory::{AnswerTarget, Inventory};
use crate::telemetry::HostTelemetry;

/// Which state a host is in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Autodiscover,
    ReadConfiguration,
    Sampling,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKind::Autodiscover => write!(f, "Autodiscover"),
            StateKind::ReadConfiguration => write!(f, "ReadConfiguration"),
            StateKind::Sampling => write!(f, "Sampling"),
        }
    }
}

/// Everything a state works on, borrowed from the owning host
pub struct StateContext<'a> {
    pub bus: &'a str,
    pub bus_config: &'a BusConfig,
    pub config: &'a EngineConfig,
    pub inventory: &'a Inventory,
    pub telemetry: &'a dyn HostTelemetry,
    pub events: &'a mut Vec<EngineEvent>,
}

impl StateContext<'_> {
    /// Whether frames on this bus carry board ids
    pub fn is_addressed(&self) -> bool {
        self.bus_config.is_addressed()
    }

    /// Build a request for a board
    pub fn request(&self, board: BoardId, command: Command) -> AppMessage {
        AppMessage::new(board, command.encode())
    }

    pub fn emit(&mut self, event: EngineEvent) {
        self.events.push(event);
    }

    /// Store an attribute answer and report the channel it touched
    pub fn apply_answer(&mut self, board: BoardId, command: &Command) -> Option<AnswerTarget> {
        let target = self.inventory.apply_answer(board, command);
        if let Some(AnswerTarget::Sensor(board, channel)) = target {
            let bus = self.bus.to_string();
            self.emit(EngineEvent::SensorUpdated { bus, board, channel });
        }
        target
    }

    pub fn timed_out(&mut self, phase: &'static str, missing: usize) {
        let bus = self.bus.to_string();
        self.emit(EngineEvent::PhaseTimedOut { bus, phase, missing });
    }
}

/// The current state and its private progress
#[derive(Debug)]
pub enum EngineState {
    Autodiscover(Autodiscover),
    ReadConfiguration(ReadConfiguration),
    Sampling(Sampling),
}

impl EngineState {
    /// First state for a bus
    pub fn initial(bus_config: &BusConfig) -> Self {
        if bus_config.autodiscovery {
            EngineState::Autodiscover(Autodiscover::new())
        } else {
            EngineState::ReadConfiguration(ReadConfiguration::new())
        }
    }

    pub fn kind(&self) -> StateKind {
        match self {
            EngineState::Autodiscover(_) => StateKind::Autodiscover,
            EngineState::ReadConfiguration(_) => StateKind::ReadConfiguration,
            EngineState::Sampling(_) => StateKind::Sampling,
        }
    }

    pub fn enter(&mut self, ctx: &mut StateContext<'_>, now: Instant) {
        match self {
            EngineState::Autodiscover(s) => s.enter(ctx, now),
            EngineState::ReadConfiguration(s) => s.enter(ctx, now),
            EngineState::Sampling(s) => s.enter(ctx, now),
        }
        let bus = ctx.bus.to_string();
        ctx.emit(EngineEvent::StateEntered {
            bus,
            state: self.kind(),
        });
    }

    pub fn inquire(&mut self, ctx: &mut StateContext<'_>, now: Instant) -> Vec<AppMessage> {
        match self {
            EngineState::Autodiscover(s) => s.inquire(ctx, now),
            EngineState::ReadConfiguration(s) => s.inquire(ctx, now),
            EngineState::Sampling(s) => s.inquire(ctx, now),
        }
    }

    pub fn evaluate_answer(&mut self, ctx: &mut StateContext<'_>, message: &AppMessage) {
        match self {
            EngineState::Autodiscover(s) => s.evaluate_answer(ctx, message),
            EngineState::ReadConfiguration(s) => s.evaluate_answer(ctx, message),
            EngineState::Sampling(s) => s.evaluate_answer(ctx, message),
        }
    }

    pub fn is_terminated(&self) -> bool {
        match self {
            EngineState::Autodiscover(s) => s.is_terminated(),
            EngineState::ReadConfiguration(s) => s.is_terminated(),
            EngineState::Sampling(_) => false,
        }
    }

    /// State that follows a terminated one
    pub fn next(&self) -> Option<EngineState> {
        match self {
            EngineState::Autodiscover(_) => {
                Some(EngineState::ReadConfiguration(ReadConfiguration::new()))
            }
            EngineState::ReadConfiguration(_) => Some(EngineState::Sampling(Sampling::new())),
            EngineState::Sampling(_) => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chem_protocol::{AppMessage, BoardId, Command};

    use super::*;
    use crate::telemetry::FixedTelemetry;

    /// Owns everything a [`StateContext`] borrows
    pub struct Harness {
        pub bus_config: BusConfig,
        pub config: EngineConfig,
        pub inventory: Inventory,
        pub telemetry: FixedTelemetry,
        pub events: Vec<EngineEvent>,
    }

    impl Harness {
        pub fn new(bus_config: BusConfig) -> Self {
            Self {
                bus_config,
                config: EngineConfig::default(),
                inventory: Inventory::new(),
                telemetry: FixedTelemetry::new(),
                events: Vec::new(),
            }
        }

        pub fn ctx(&mut self) -> StateContext<'_> {
            StateContext {
                bus: &self.bus_config.name,
                bus_config: &self.bus_config,
                config: &self.config,
                inventory: &self.inventory,
                telemetry: &self.telemetry,
                events: &mut self.events,
            }
        }
    }

    pub fn answer(board: u8, command: Command) -> AppMessage {
        AppMessage::new(BoardId::new(board), command.encode())
    }

    pub fn decoded(messages: &[AppMessage]) -> Vec<(BoardId, Command)> {
        messages
            .iter()
            .filter_map(|m| Command::decode(m.payload()).map(|c| (m.board_id(), c)))
            .collect()
    }
}
