//! Event output
//!
//! Samples go to stdout, one line each (or one JSON object per line with
//! `--json`). Everything else is logged.

use chem_engine::{Engine, EngineEvent};
use tracing::{debug, info, warn};

pub fn report(engine: &Engine, event: &EngineEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Unserializable event {:?}: {}", event, e),
        }
        return;
    }

    match event {
        EngineEvent::SampleAccepted {
            bus,
            board,
            channel,
            sample,
        } => {
            let (name, units) = sensor_label(engine, bus, *board, *channel);
            println!(
                "{} [{}:{}] {} = {} {} (raw {}, t={} ms)",
                bus, board, channel, name, sample.evaluated, units, sample.value, sample.timestamp
            );
        }
        EngineEvent::StateEntered { bus, state } => info!("[{}] {}", bus, state),
        EngineEvent::PhaseTimedOut {
            bus,
            phase,
            missing,
        } => warn!("[{}] {} timed out, {} missing", bus, phase, missing),
        EngineEvent::BoardDiscovered {
            bus,
            board,
            channels,
        } => info!("[{}] Board {} with {} channels", bus, board, channels),
        EngineEvent::SensorUpdated {
            bus,
            board,
            channel,
        } => debug!("[{}] Sensor {}:{} updated", bus, board, channel),
        EngineEvent::OwnershipChanged { bus, owner } => match owner {
            Some(owner) => info!("[{}] Owned by {}", bus, owner),
            None => info!("[{}] Released", bus),
        },
    }
}

fn sensor_label(
    engine: &Engine,
    bus: &str,
    board: chem_protocol::BoardId,
    channel: u8,
) -> (String, String) {
    let sensor = engine
        .host(bus)
        .ok()
        .and_then(|entry| entry.host.inventory().sensor(board, channel));
    match sensor {
        Some(sensor) => (
            sensor.name.get().unwrap_or_else(|| "?".to_string()),
            sensor.units.get().unwrap_or_default(),
        ),
        None => ("?".to_string(), String::new()),
    }
}
