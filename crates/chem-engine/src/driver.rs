//! Async tick driver
//!
//! One task per bus runs the host's `inquire` on a fixed interval, writes
//! the requests to the bus and forwards buffered events. A tick that runs
//! long delays the next one instead of overlapping it.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::events::EngineEvent;

/// Running engine tasks
pub struct EngineHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Stop every tick loop and wait for them to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Spawn one tick loop per bus
pub fn run_engine(engine: Arc<Engine>, event_tx: mpsc::Sender<EngineEvent>) -> EngineHandle {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let tasks = (0..engine.hosts().len())
        .map(|index| {
            tokio::spawn(run_host(
                engine.clone(),
                index,
                event_tx.clone(),
                shutdown_rx.clone(),
            ))
        })
        .collect();
    EngineHandle { shutdown, tasks }
}

async fn run_host(
    engine: Arc<Engine>,
    index: usize,
    event_tx: mpsc::Sender<EngineEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let Some(entry) = engine.hosts().get(index).cloned() else {
        return;
    };
    info!("[{}] Engine loop started", entry.host.name());

    let mut ticker = interval(engine.config().tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("[{}] Engine loop shutdown requested", entry.host.name());
                break;
            }
            _ = ticker.tick() => {
                let requests = engine.inquire(index, Instant::now());
                for request in requests {
                    if let Err(e) = entry.bus.write(request).await {
                        warn!("[{}] Dropping tick requests: {}", entry.host.name(), e);
                        break;
                    }
                }

                let events = engine
                    .drain_events()
                    .into_iter()
                    .chain(entry.host.drain_events());
                for event in events {
                    if event_tx.send(event).await.is_err() {
                        // Nobody listening; keep sampling for snapshot readers
                        break;
                    }
                }
            }
        }
    }

    info!("[{}] Engine loop stopped", entry.host.name());
}
