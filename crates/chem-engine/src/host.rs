//! Per-bus sensor host
//!
//! Owns the inventory and the state machine of one bus. The engine tick
//! calls [`SensorHost::inquire`]; the bus rx pump calls
//! [`SensorHost::evaluate_answer`] through the [`MessageConsumer`] impl.
//! Both go through the same state lock, so a state never sees an answer in
//! the middle of a tick.

use std::sync::Arc;

use chem_bus::MessageConsumer;
use chem_protocol::{AppMessage, BoardId};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{BusConfig, EngineConfig};
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::inventory::Inventory;
use crate::model::{Board, Sensor};
use crate::ownership::OwnershipLease;
use crate::state::{EngineState, StateContext, StateKind};
use crate::telemetry::HostTelemetry;

/// State machine slot; `None` until the first tick enters the initial state
struct Machine {
    state: Option<EngineState>,
}

/// Discovery, configuration and sampling of one bus
pub struct SensorHost {
    bus_config: BusConfig,
    config: EngineConfig,
    inventory: Inventory,
    telemetry: Arc<dyn HostTelemetry>,
    machine: Mutex<Machine>,
    ownership: Mutex<OwnershipLease>,
    event_buffer: Mutex<Vec<EngineEvent>>,
}

impl std::fmt::Debug for SensorHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorHost")
            .field("bus", &self.bus_config.name)
            .field("state", &self.state_kind())
            .finish_non_exhaustive()
    }
}

impl SensorHost {
    pub fn new(bus_config: BusConfig, config: EngineConfig, telemetry: Arc<dyn HostTelemetry>) -> Self {
        let ownership = OwnershipLease::new(config.host_ownership_timeout());
        Self {
            bus_config,
            config,
            inventory: Inventory::new(),
            telemetry,
            machine: Mutex::new(Machine { state: None }),
            ownership: Mutex::new(ownership),
            event_buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.bus_config.name
    }

    pub fn bus_config(&self) -> &BusConfig {
        &self.bus_config
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Snapshot of the boards
    pub fn boards(&self) -> Vec<Board> {
        self.inventory.boards()
    }

    /// Snapshot of the channels with their latest samples
    pub fn sensors(&self) -> Vec<Sensor> {
        self.inventory.sensors()
    }

    /// Current state, `None` before the first tick
    pub fn state_kind(&self) -> Option<StateKind> {
        self.machine.lock().state.as_ref().map(EngineState::kind)
    }

    /// Run one scheduler tick and return the requests to transmit
    ///
    /// Returns nothing while the bus is owned. Terminated states hand over
    /// to their successor within the same tick.
    pub fn inquire(&self, now: Instant) -> Vec<AppMessage> {
        if self.check_ownership(now) {
            return Vec::new();
        }

        let mut events = Vec::new();
        let requests = {
            let mut machine = self.machine.lock();
            let mut ctx = self.context(&mut events);

            if machine.state.is_none() {
                let mut initial = EngineState::initial(&self.bus_config);
                initial.enter(&mut ctx, now);
                machine.state = Some(initial);
            }

            let mut requests = Vec::new();
            while let Some(state) = machine.state.as_mut() {
                requests.extend(state.inquire(&mut ctx, now));
                if !state.is_terminated() {
                    break;
                }
                let Some(mut next) = state.next() else {
                    break;
                };
                info!("[{}] {} -> {}", self.name(), state.kind(), next.kind());
                next.enter(&mut ctx, now);
                machine.state = Some(next);
            }
            requests
        };
        self.event_buffer.lock().extend(events);
        requests
    }

    /// Feed one delivered message to the current state
    ///
    /// Runs even while the bus is owned so answers to an owner's commands
    /// still refresh the inventory.
    pub fn evaluate_answer(&self, message: &AppMessage) {
        let message = self.normalize(message);
        let mut events = Vec::new();
        {
            let mut machine = self.machine.lock();
            let Some(state) = machine.state.as_mut() else {
                debug!("[{}] Answer before start: {}", self.name(), message);
                return;
            };
            let mut ctx = self.context(&mut events);
            state.evaluate_answer(&mut ctx, &message);
        }
        self.event_buffer.lock().extend(events);
    }

    /// Start over from Autodiscover on the next tick
    pub fn rediscover(&self) {
        info!("[{}] Re-discovery requested", self.name());
        self.machine.lock().state = None;
    }

    /// Take (or renew) exclusive use of this bus
    pub fn take_ownership(&self, owner: &str, now: Instant) -> Result<(), EngineError> {
        self.ownership
            .lock()
            .take(owner, now)
            .map_err(|current| EngineError::AlreadyOwned {
                bus: self.name().to_string(),
                owner: current,
            })?;
        self.push_event(EngineEvent::OwnershipChanged {
            bus: self.name().to_string(),
            owner: Some(owner.to_string()),
        });
        Ok(())
    }

    /// Give the bus back; returns false if `owner` did not hold it
    pub fn release_ownership(&self, owner: &str) -> bool {
        let released = self.ownership.lock().release(owner);
        if released {
            self.push_event(EngineEvent::OwnershipChanged {
                bus: self.name().to_string(),
                owner: None,
            });
        }
        released
    }

    pub fn is_owned(&self, now: Instant) -> bool {
        self.ownership.lock().is_owned(now)
    }

    /// Take all buffered events
    pub fn drain_events(&self) -> Vec<EngineEvent> {
        std::mem::take(&mut *self.event_buffer.lock())
    }

    /// Expire a stale lease; returns true if the bus is still owned
    fn check_ownership(&self, now: Instant) -> bool {
        let mut lease = self.ownership.lock();
        if let Some(previous) = lease.expire(now) {
            drop(lease);
            info!("[{}] Ownership of {} expired", self.name(), previous);
            self.push_event(EngineEvent::OwnershipChanged {
                bus: self.name().to_string(),
                owner: None,
            });
            return false;
        }
        lease.is_owned(now)
    }

    fn push_event(&self, event: EngineEvent) {
        self.event_buffer.lock().push(event);
    }

    fn context<'a>(&'a self, events: &'a mut Vec<EngineEvent>) -> StateContext<'a> {
        StateContext {
            bus: &self.bus_config.name,
            bus_config: &self.bus_config,
            config: &self.config,
            inventory: &self.inventory,
            telemetry: self.telemetry.as_ref(),
            events,
        }
    }

    /// File answers from an unaddressed link under board 0
    fn normalize(&self, message: &AppMessage) -> AppMessage {
        if !self.bus_config.is_addressed() && message.board_id().is_undefined() {
            AppMessage::new(BoardId::new(0), message.payload())
        } else {
            message.clone()
        }
    }
}

impl MessageConsumer for SensorHost {
    fn deliver(&self, message: &AppMessage) {
        self.evaluate_answer(message);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chem_protocol::{BoardType, BoardTypeInfo, Command};

    use super::*;
    use crate::telemetry::FixedTelemetry;

    fn host() -> SensorHost {
        SensorHost::new(
            BusConfig::new("bus", "mem:bus"),
            EngineConfig::default(),
            Arc::new(FixedTelemetry::new()),
        )
    }

    #[test]
    fn test_first_tick_enters_autodiscover() {
        let host = host();
        assert_eq!(host.state_kind(), None);
        let start = Instant::now();
        assert_eq!(host.inquire(start).len(), 16);
        assert_eq!(host.state_kind(), Some(StateKind::Autodiscover));
        assert!(host.drain_events().contains(&EngineEvent::StateEntered {
            bus: "bus".into(),
            state: StateKind::Autodiscover,
        }));
        assert!(host.drain_events().is_empty());
    }

    #[test]
    fn test_states_chain_within_a_tick() {
        let host = host();
        let start = Instant::now();
        host.inquire(start);

        // No board answers: discovery ends at its timeout and the host goes
        // straight through configuration into sampling
        host.inquire(start + Duration::from_secs(5));
        assert_eq!(host.state_kind(), Some(StateKind::Sampling));
        let entered: Vec<_> = host
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::StateEntered { state, .. } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            entered,
            vec![
                StateKind::Autodiscover,
                StateKind::ReadConfiguration,
                StateKind::Sampling
            ]
        );
    }

    #[test]
    fn test_ownership_suppresses_inquiries() {
        let host = host();
        let start = Instant::now();
        host.take_ownership("tool", start).unwrap();
        assert!(host.inquire(start).is_empty());
        assert!(host.inquire(start + Duration::from_secs(59)).is_empty());
        assert!(matches!(
            host.take_ownership("other", start + Duration::from_secs(1)),
            Err(EngineError::AlreadyOwned { .. })
        ));

        // Expired: the next tick inquires again
        assert_eq!(host.inquire(start + Duration::from_secs(60)).len(), 16);
        let owners: Vec<_> = host
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::OwnershipChanged { owner, .. } => Some(owner),
                _ => None,
            })
            .collect();
        assert_eq!(owners, vec![Some("tool".to_string()), None]);
    }

    #[test]
    fn test_answers_evaluated_while_owned() {
        let host = host();
        let start = Instant::now();
        host.inquire(start);
        host.take_ownership("tool", start).unwrap();

        let info = BoardTypeInfo {
            board_type: BoardType::SingleGas,
            channels: 1,
        };
        host.deliver(&AppMessage::new(
            BoardId::new(4),
            Command::BoardType(Some(info)).encode(),
        ));
        assert_eq!(host.boards().len(), 1);
        assert!(host.release_ownership("tool"));
        assert!(!host.is_owned(start));
    }

    #[test]
    fn test_unaddressed_answers_filed_under_board_zero() {
        let mut bus_config = BusConfig::new("p2p", "mem:p2p");
        bus_config.transport = chem_protocol::TransportKind::PointToPoint;
        let host = SensorHost::new(bus_config, EngineConfig::default(), Arc::new(FixedTelemetry::new()));
        let start = Instant::now();
        assert_eq!(host.inquire(start).len(), 1);

        let info = BoardTypeInfo {
            board_type: BoardType::Ndir,
            channels: 1,
        };
        host.deliver(&AppMessage::unaddressed(Command::BoardType(Some(info)).encode()));
        assert_eq!(host.boards()[0].id, BoardId::new(0));
    }

    #[test]
    fn test_rediscover_restarts() {
        let host = host();
        let start = Instant::now();
        host.inquire(start);
        host.inquire(start + Duration::from_secs(5));
        assert_eq!(host.state_kind(), Some(StateKind::Sampling));
        host.rediscover();
        assert_eq!(host.inquire(start + Duration::from_secs(6)).len(), 16);
        assert_eq!(host.state_kind(), Some(StateKind::Autodiscover));
    }
}
