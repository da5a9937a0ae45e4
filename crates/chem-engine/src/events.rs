//! Engine event stream
//!
//! Every host buffers what happened during a tick or an answer and the
//! driver forwards the buffer to a single channel. Observers (the daemon's
//! printer, a persistence layer) get a consistent ordering per bus.

use chem_protocol::BoardId;
use serde::Serialize;

use crate::model::SampleValue;
use crate::state::StateKind;

/// Something a sensor host did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    // -------------------------------------------------------------------------
    // State machine
    // -------------------------------------------------------------------------
    /// The host entered a new state
    StateEntered {
        bus: String,
        state: StateKind,
    },

    /// A phase hit its timeout and continued with partial results
    PhaseTimedOut {
        bus: String,
        /// Phase name, for logs
        phase: &'static str,
        /// Items still missing when the phase gave up
        missing: usize,
    },

    // -------------------------------------------------------------------------
    // Inventory
    // -------------------------------------------------------------------------
    /// A board answered the board type inquiry
    BoardDiscovered {
        bus: String,
        board: BoardId,
        channels: u8,
    },

    /// A channel attribute changed
    SensorUpdated {
        bus: String,
        board: BoardId,
        channel: u8,
    },

    /// A new sample was accepted for a channel
    SampleAccepted {
        bus: String,
        board: BoardId,
        channel: u8,
        sample: SampleValue,
    },

    // -------------------------------------------------------------------------
    // Ownership
    // -------------------------------------------------------------------------
    /// An external owner took or released the bus
    OwnershipChanged {
        bus: String,
        /// Current owner, `None` once released or expired
        owner: Option<String>,
    },
}

impl EngineEvent {
    /// Bus the event belongs to
    pub fn bus(&self) -> &str {
        match self {
            EngineEvent::StateEntered { bus, .. }
            | EngineEvent::PhaseTimedOut { bus, .. }
            | EngineEvent::BoardDiscovered { bus, .. }
            | EngineEvent::SensorUpdated { bus, .. }
            | EngineEvent::SampleAccepted { bus, .. }
            | EngineEvent::OwnershipChanged { bus, .. } => bus,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_tagged() {
        let event = EngineEvent::SampleAccepted {
            bus: "line".into(),
            board: BoardId::new(3),
            channel: 1,
            sample: SampleValue {
                value: 412.0,
                evaluated: 41.2,
                timestamp: 5000,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "sample_accepted");
        assert_eq!(json["board"], 3);
        assert_eq!(json["sample"]["timestamp"], 5000);
        assert_eq!(event.bus(), "line");
    }
}
