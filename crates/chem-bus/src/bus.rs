//! Sensor bus core
//!
//! A [`SensorBus`] owns one byte channel and the transport logic selected for
//! it. While connected, two tasks run per bus:
//!
//! - **link task**: reads bytes from the channel, feeds them one at a time
//!   through the framer and pushes complete messages onto the bounded rx
//!   queue; concurrently drains the bounded tx queue, waits for the
//!   half-duplex gate and writes framed bytes. On a channel error it reopens
//!   the last endpoint once before giving up.
//! - **rx pump**: drains the rx queue and delivers each message to every
//!   registered [`MessageConsumer`].
//!
//! Every queue operation races a shutdown signal so [`SensorBus::disconnect`]
//! can stop a pump mid-wait.

use std::io::{self, ErrorKind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chem_protocol::{create_transport, AppMessage, Role, TransportKind, TransportLogic};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::channel::{BoxedStream, ByteChannel};
use crate::error::BusError;
use crate::gate::{TurnGate, DEFAULT_GATE_TIMEOUT};

/// Default capacity of the receive queue
pub const RX_QUEUE_CAPACITY: usize = 256;
/// Default capacity of the transmit queue
pub const TX_QUEUE_CAPACITY: usize = 64;

/// Pause before reopening a failed channel
const RECONNECT_DELAY: Duration = Duration::from_millis(200);

/// Receives every message the bus decodes
pub trait MessageConsumer: Send + Sync {
    /// Called from the rx pump, once per message, in arrival order
    fn deliver(&self, message: &AppMessage);
}

impl MessageConsumer for mpsc::UnboundedSender<AppMessage> {
    fn deliver(&self, message: &AppMessage) {
        let _ = self.send(message.clone());
    }
}

/// Bus construction options
#[derive(Debug, Clone)]
pub struct BusOptions {
    /// Framing used on the channel
    pub transport: TransportKind,
    /// Protocol version 1 (CRC-32 on answers) for the multipoint transport
    pub crc: bool,
    /// Receive queue capacity
    pub rx_capacity: usize,
    /// Transmit queue capacity
    pub tx_capacity: usize,
    /// How long a transmit waits for the previous answer on a half-duplex line
    pub gate_timeout: Duration,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            transport: TransportKind::PointToMultipoint,
            crc: false,
            rx_capacity: RX_QUEUE_CAPACITY,
            tx_capacity: TX_QUEUE_CAPACITY,
            gate_timeout: DEFAULT_GATE_TIMEOUT,
        }
    }
}

/// Snapshot of bus counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    /// Complete frames decoded
    pub frames_received: u64,
    /// Frames written to the channel
    pub frames_sent: u64,
    /// Frames dropped because their CRC did not match
    pub crc_rejects: u64,
    /// Successful automatic reopens after a channel error
    pub reconnects: u64,
    /// Transmits that went out without seeing the previous answer
    pub gate_timeouts: u64,
}

#[derive(Debug, Default)]
struct Counters {
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    reconnects: AtomicU64,
    gate_timeouts: AtomicU64,
}

/// Handles of one connection
struct Link {
    endpoint: String,
    tx: mpsc::Sender<AppMessage>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

struct BusInner {
    name: String,
    channel: Arc<dyn ByteChannel>,
    options: BusOptions,
    transport: Mutex<Box<dyn TransportLogic>>,
    half_duplex: bool,
    bitrate: u32,
    gate: TurnGate,
    consumers: RwLock<Vec<Arc<dyn MessageConsumer>>>,
    link: Mutex<Option<Link>>,
    last_endpoint: Mutex<Option<String>>,
    connected: AtomicBool,
    // Serializes connect/disconnect; the only lock held across an await
    lifecycle: tokio::sync::Mutex<()>,
    counters: Counters,
}

/// A sensor bus over one byte channel
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct SensorBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for SensorBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorBus")
            .field("name", &self.inner.name)
            .field("transport", &self.inner.options.transport)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl SensorBus {
    /// Create a disconnected bus
    pub fn new(name: impl Into<String>, channel: Arc<dyn ByteChannel>, options: BusOptions) -> Self {
        let transport = create_transport(options.transport, Role::Host, options.crc);
        let half_duplex = transport.is_half_duplex();
        let bitrate = transport.bitrate();

        Self {
            inner: Arc::new(BusInner {
                name: name.into(),
                channel,
                options,
                transport: Mutex::new(transport),
                half_duplex,
                bitrate,
                gate: TurnGate::new(),
                consumers: RwLock::new(Vec::new()),
                link: Mutex::new(None),
                last_endpoint: Mutex::new(None),
                connected: AtomicBool::new(false),
                lifecycle: tokio::sync::Mutex::new(()),
                counters: Counters::default(),
            }),
        }
    }

    /// Bus name used in logs and events
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Framing in use
    pub fn transport(&self) -> TransportKind {
        self.inner.options.transport
    }

    /// Endpoint of the most recent connect
    pub fn endpoint(&self) -> Option<String> {
        self.inner.last_endpoint.lock().clone()
    }

    /// Returns true while the link task is running
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Register a consumer for every decoded message
    pub fn subscribe(&self, consumer: Arc<dyn MessageConsumer>) {
        self.inner.consumers.write().push(consumer);
    }

    /// Open `endpoint` and start the pumps
    ///
    /// Any previous connection is closed first and both queues start empty.
    pub async fn connect(&self, endpoint: &str) -> Result<(), BusError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.connect_locked(endpoint).await
    }

    async fn connect_locked(&self, endpoint: &str) -> Result<(), BusError> {
        self.disconnect_locked().await;
        *self.inner.last_endpoint.lock() = Some(endpoint.to_string());

        let stream = self.inner.open(endpoint)?;

        let (tx_tx, tx_rx) = mpsc::channel(self.inner.options.tx_capacity);
        let (rx_tx, rx_rx) = mpsc::channel(self.inner.options.rx_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.inner.connected.store(true, Ordering::SeqCst);
        let link_task = tokio::spawn(run_link(
            self.inner.clone(),
            endpoint.to_string(),
            stream,
            tx_rx,
            rx_tx,
            shutdown_rx.clone(),
        ));
        let rx_task = tokio::spawn(run_rx_pump(self.inner.clone(), rx_rx, shutdown_rx));

        *self.inner.link.lock() = Some(Link {
            endpoint: endpoint.to_string(),
            tx: tx_tx,
            shutdown: shutdown_tx,
            tasks: vec![link_task, rx_task],
        });

        info!(
            "Bus {} connected to {} ({}, {} baud, {} channel)",
            self.inner.name,
            endpoint,
            self.inner.options.transport.name(),
            self.inner.bitrate,
            self.inner.channel.name()
        );
        Ok(())
    }

    /// Stop both pumps, drop queued messages and close the channel
    pub async fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.disconnect_locked().await;
    }

    async fn disconnect_locked(&self) {
        let link = self.inner.link.lock().take();
        self.inner.connected.store(false, Ordering::SeqCst);

        if let Some(link) = link {
            let _ = link.shutdown.send(true);
            drop(link.tx);
            for task in link.tasks {
                let _ = task.await;
            }
            info!("Bus {} disconnected from {}", self.inner.name, link.endpoint);
        }
    }

    /// Queue a message for transmission
    ///
    /// If the bus is down, one reconnect to the last endpoint is attempted
    /// first. Waits while the tx queue is full; the wait ends early if the
    /// bus is disconnected.
    pub async fn write(&self, message: AppMessage) -> Result<(), BusError> {
        if !self.is_connected() {
            self.reconnect().await?;
        }

        let (tx, mut shutdown) = {
            let link = self.inner.link.lock();
            match link.as_ref() {
                Some(link) => (link.tx.clone(), link.shutdown.subscribe()),
                None => return Err(BusError::NotConnected(self.inner.name.clone())),
            }
        };

        tokio::select! {
            sent = tx.send(message) => {
                sent.map_err(|_| BusError::Closed(self.inner.name.clone()))
            }
            _ = shutdown.changed() => Err(BusError::Closed(self.inner.name.clone())),
        }
    }

    async fn reconnect(&self) -> Result<(), BusError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        // Another writer may have reconnected while we waited
        if self.is_connected() {
            return Ok(());
        }
        let endpoint = self
            .endpoint()
            .ok_or_else(|| BusError::NotConnected(self.inner.name.clone()))?;
        warn!("Bus {} is down, reconnecting to {}", self.inner.name, endpoint);
        self.connect_locked(&endpoint).await
    }

    /// Current counters
    pub fn stats(&self) -> BusStats {
        let counters = &self.inner.counters;
        BusStats {
            frames_received: counters.frames_received.load(Ordering::Relaxed),
            frames_sent: counters.frames_sent.load(Ordering::Relaxed),
            crc_rejects: self.inner.transport.lock().crc_rejects(),
            reconnects: counters.reconnects.load(Ordering::Relaxed),
            gate_timeouts: counters.gate_timeouts.load(Ordering::Relaxed),
        }
    }
}

impl BusInner {
    /// Open the channel with a clean framer and an open gate
    fn open(&self, endpoint: &str) -> Result<BoxedStream, BusError> {
        self.transport.lock().reset();
        self.gate.reset();
        self.channel
            .open(endpoint, self.bitrate)
            .map_err(|e| BusError::ConnectionUnavailable {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
    }

    /// Run received bytes through the framer
    fn unframe(&self, data: &[u8]) -> Vec<AppMessage> {
        let mut messages = Vec::new();
        let mut transport = self.transport.lock();
        for &byte in data {
            if let Some(message) = transport.on_byte_received(byte) {
                if self.half_duplex {
                    self.gate.release();
                }
                debug!("Bus {} <- {}", self.name, message);
                messages.push(message);
            }
        }
        self.counters
            .frames_received
            .fetch_add(messages.len() as u64, Ordering::Relaxed);
        messages
    }

    /// Channel → rx queue; returns `Ok` only when the rx queue is gone
    async fn read_frames(
        &self,
        mut reader: ReadHalf<BoxedStream>,
        rx_queue: &mpsc::Sender<AppMessage>,
    ) -> io::Result<()> {
        let mut buf = [0u8; 256];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => {
                    return Err(io::Error::new(ErrorKind::UnexpectedEof, "channel closed"));
                }
                Ok(n) => n,
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(e),
            };
            trace!("Bus {} read {} bytes: {:02X?}", self.name, n, &buf[..n]);

            for message in self.unframe(&buf[..n]) {
                if rx_queue.send(message).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    /// tx queue → channel; returns `Ok` only when the tx queue is gone
    async fn write_frames(
        &self,
        mut writer: WriteHalf<BoxedStream>,
        tx_queue: &mut mpsc::Receiver<AppMessage>,
    ) -> io::Result<()> {
        while let Some(message) = tx_queue.recv().await {
            if self.half_duplex && !self.gate.acquire(self.options.gate_timeout).await {
                self.counters.gate_timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Bus {}: no answer from a previous transmission, sending {} anyway",
                    self.name, message
                );
            }

            let wire = self.transport.lock().to_wire(&message);
            debug!("Bus {} -> {}", self.name, message);
            writer.write_all(&wire).await?;
            writer.flush().await?;
            self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn deliver(&self, message: &AppMessage) {
        let consumers = self.consumers.read().clone();
        for consumer in consumers {
            consumer.deliver(message);
        }
    }
}

async fn run_link(
    inner: Arc<BusInner>,
    endpoint: String,
    mut stream: BoxedStream,
    mut tx_queue: mpsc::Receiver<AppMessage>,
    rx_queue: mpsc::Sender<AppMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let (reader, writer) = tokio::io::split(stream);
        let result = tokio::select! {
            _ = shutdown.changed() => break,
            result = inner.read_frames(reader, &rx_queue) => result,
            result = inner.write_frames(writer, &mut tx_queue) => result,
        };

        let error = match result {
            Ok(()) => break,
            Err(e) => e,
        };
        warn!(
            "Bus {} channel error on {}: {}, reconnecting",
            inner.name, endpoint, error
        );

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }

        match inner.open(&endpoint) {
            Ok(fresh) => {
                inner.counters.reconnects.fetch_add(1, Ordering::Relaxed);
                info!("Bus {} reconnected to {}", inner.name, endpoint);
                stream = fresh;
            }
            Err(e) => {
                warn!("Bus {}: {}", inner.name, e);
                break;
            }
        }
    }

    inner.connected.store(false, Ordering::SeqCst);
    debug!("Link task ended for bus {}", inner.name);
}

async fn run_rx_pump(
    inner: Arc<BusInner>,
    mut rx_queue: mpsc::Receiver<AppMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            message = rx_queue.recv() => match message {
                Some(message) => inner.deliver(&message),
                None => break,
            },
        }
    }
}
