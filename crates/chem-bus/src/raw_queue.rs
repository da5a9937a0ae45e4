//! Raw command queue
//!
//! Lets an external caller send an ordered list of opaque commands and see
//! the literal answers. Exactly one request is pending at a time: the
//! queue registers itself as a bus consumer and hands the first compatible
//! message (same board or undefined board, payload prefix either way) to
//! the waiting caller. Everything else passes through untouched.
//!
//! Whole lists are serialized by a single-slot gate. A caller that cannot
//! get the gate within [`DEFAULT_LIST_GATE_TIMEOUT`] proceeds anyway.

use std::sync::Arc;
use std::time::Duration;

use chem_protocol::AppMessage;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::bus::{MessageConsumer, SensorBus};
use crate::error::BusError;

/// How long each command waits for its answer
pub const DEFAULT_ANSWER_TIMEOUT: Duration = Duration::from_secs(1);

/// How long a list waits for another list to finish
pub const DEFAULT_LIST_GATE_TIMEOUT: Duration = Duration::from_secs(10);

struct Pending {
    request: AppMessage,
    answer: oneshot::Sender<AppMessage>,
}

/// Request/answer correlation over a [`SensorBus`]
pub struct RawCommandQueue {
    bus: SensorBus,
    list_gate: tokio::sync::Mutex<()>,
    pending: Mutex<Option<Pending>>,
    answer_timeout: Duration,
    list_gate_timeout: Duration,
}

impl RawCommandQueue {
    /// Create a queue and subscribe it to the bus
    pub fn attach(bus: &SensorBus) -> Arc<Self> {
        Self::attach_with_timeouts(bus, DEFAULT_ANSWER_TIMEOUT, DEFAULT_LIST_GATE_TIMEOUT)
    }

    /// Create a queue with custom timeouts and subscribe it to the bus
    pub fn attach_with_timeouts(
        bus: &SensorBus,
        answer_timeout: Duration,
        list_gate_timeout: Duration,
    ) -> Arc<Self> {
        let queue = Arc::new(Self {
            bus: bus.clone(),
            list_gate: tokio::sync::Mutex::new(()),
            pending: Mutex::new(None),
            answer_timeout,
            list_gate_timeout,
        });
        bus.subscribe(queue.clone());
        queue
    }

    /// Send `commands` in order and collect their answers
    ///
    /// Stops at the first command that gets no answer within the answer
    /// timeout, so the result holds the answers of the leading answered
    /// commands only.
    pub async fn send(&self, commands: &[AppMessage]) -> Result<Vec<AppMessage>, BusError> {
        let _list = match tokio::time::timeout(self.list_gate_timeout, self.list_gate.lock()).await
        {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!(
                    "Raw command list on bus {} still busy after {:?}, proceeding",
                    self.bus.name(),
                    self.list_gate_timeout
                );
                None
            }
        };

        let mut answers = Vec::with_capacity(commands.len());
        for command in commands {
            let (tx, rx) = oneshot::channel();
            *self.pending.lock() = Some(Pending {
                request: command.clone(),
                answer: tx,
            });

            if let Err(e) = self.bus.write(command.clone()).await {
                self.pending.lock().take();
                return Err(e);
            }

            match tokio::time::timeout(self.answer_timeout, rx).await {
                Ok(Ok(answer)) => {
                    debug!("Raw command {} answered: {}", command, answer);
                    answers.push(answer);
                }
                _ => {
                    self.pending.lock().take();
                    warn!("No answer to raw command {} on bus {}", command, self.bus.name());
                    break;
                }
            }
        }

        Ok(answers)
    }

    /// Returns true while a command is waiting for its answer
    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}

impl MessageConsumer for RawCommandQueue {
    fn deliver(&self, message: &AppMessage) {
        let mut pending = self.pending.lock();
        let matches = pending
            .as_ref()
            .is_some_and(|p| p.request.is_compatible(message));
        if matches {
            if let Some(p) = pending.take() {
                let _ = p.answer.send(message.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusOptions;
    use crate::channel::memory_channel;
    use chem_protocol::{create_transport, BoardId, Role, TransportKind};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Board answering every request with its payload plus "01", except
    /// payloads listed in `silent`
    async fn run_board(mut link: crate::channel::MemoryLink, silent: Vec<&'static str>) {
        let mut framer = create_transport(TransportKind::PointToMultipoint, Role::Device, false);
        let mut buf = [0u8; 64];
        loop {
            let n = match link.stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            for &byte in &buf[..n] {
                if let Some(request) = framer.on_byte_received(byte) {
                    if silent.iter().any(|s| *s == request.payload()) {
                        continue;
                    }
                    let answer =
                        AppMessage::new(request.board_id(), format!("{}01", request.payload()));
                    if link.stream.write_all(&framer.to_wire(&answer)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn setup(silent: Vec<&'static str>) -> (SensorBus, Arc<RawCommandQueue>) {
        let (channel, mut listener) = memory_channel();
        let bus = SensorBus::new("raw", Arc::new(channel), BusOptions::default());
        let queue = RawCommandQueue::attach(&bus);
        bus.connect("mem:raw").await.unwrap();
        let link = listener.accept().await.unwrap();
        tokio::spawn(run_board(link, silent));
        tokio::spawn(async move {
            // Keep later reconnects answerable
            while let Some(link) = listener.accept().await {
                drop(link);
            }
        });
        (bus, queue)
    }

    fn cmd(board: u8, payload: &str) -> AppMessage {
        AppMessage::new(BoardId::new(board), payload)
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_answered() {
        let (_bus, queue) = setup(vec![]).await;
        let answers = queue.send(&[cmd(1, "T"), cmd(1, "V")]).await.unwrap();
        assert_eq!(answers, vec![cmd(1, "T01"), cmd(1, "V01")]);
        assert!(!queue.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_first_unanswered() {
        let (_bus, queue) = setup(vec!["p00"]).await;
        let start = tokio::time::Instant::now();
        let answers = queue
            .send(&[cmd(2, "n00"), cmd(2, "p00"), cmd(2, "u00")])
            .await
            .unwrap();
        assert_eq!(answers, vec![cmd(2, "n0001")]);
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!queue.is_pending());

        // The gate was released: the next list goes through
        let answers = queue.send(&[cmd(2, "e00")]).await.unwrap();
        assert_eq!(answers, vec![cmd(2, "e0001")]);
    }

    #[tokio::test]
    async fn test_unrelated_message_does_not_resolve() {
        let (channel, _listener) = memory_channel();
        let bus = SensorBus::new("raw", Arc::new(channel), BusOptions::default());
        let queue = RawCommandQueue::attach(&bus);

        let (tx, mut rx) = oneshot::channel();
        *queue.pending.lock() = Some(Pending {
            request: cmd(1, "p00"),
            answer: tx,
        });

        queue.deliver(&cmd(2, "p0000000384"));
        queue.deliver(&cmd(1, "n00"));
        assert!(rx.try_recv().is_err());
        assert!(queue.is_pending());

        queue.deliver(&cmd(1, "p0000000384"));
        assert_eq!(rx.try_recv().unwrap(), cmd(1, "p0000000384"));
        assert!(!queue.is_pending());
    }
}
