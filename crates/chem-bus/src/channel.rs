//! Byte channels a sensor bus can run over
//!
//! A channel only knows how to open a bidirectional byte stream for an
//! endpoint at a bitrate. Framing, queues and reconnection live in the bus.
//!
//! - [`SerialChannel`]: a real serial port through `tokio_serial`
//! - [`MemoryChannel`]: an in-process `tokio::io::duplex()` pipe whose far
//!   end is handed to a [`MemoryListener`], used by simulated boards and tests

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::sync::mpsc;
use tokio_serial::SerialPortBuilderExt;
use tracing::debug;

/// Endpoint prefix that marks an in-memory channel in configuration
pub const MEMORY_PORT_PREFIX: &str = "mem:";

/// Returns true if the endpoint names an in-memory channel
pub fn is_memory_endpoint(endpoint: &str) -> bool {
    endpoint.starts_with(MEMORY_PORT_PREFIX)
}

/// Async byte stream usable as a bus link
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Boxed stream returned by [`ByteChannel::open`]
pub type BoxedStream = Box<dyn ByteStream>;

/// Something that can open a byte stream to an endpoint
///
/// Opening is synchronous and may block (a physical port open).
pub trait ByteChannel: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Open a stream to `endpoint` at `bitrate`
    fn open(&self, endpoint: &str, bitrate: u32) -> io::Result<BoxedStream>;
}

/// Serial port channel
#[derive(Debug, Clone)]
pub struct SerialChannel {
    timeout: Duration,
}

impl SerialChannel {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_millis(100),
        }
    }
}

impl Default for SerialChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteChannel for SerialChannel {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn open(&self, endpoint: &str, bitrate: u32) -> io::Result<BoxedStream> {
        let stream = tokio_serial::new(endpoint, bitrate)
            .timeout(self.timeout)
            .open_native_async()?;
        debug!("Opened serial port {} at {} baud", endpoint, bitrate);
        Ok(Box::new(stream))
    }
}

/// Far end of an in-memory link, as seen by a simulated board
#[derive(Debug)]
pub struct MemoryLink {
    /// Endpoint the bus asked for
    pub endpoint: String,
    /// Bitrate the bus asked for
    pub bitrate: u32,
    /// Board side of the pipe
    pub stream: DuplexStream,
}

/// In-memory channel: every open creates a fresh duplex pipe
#[derive(Debug)]
pub struct MemoryChannel {
    links: mpsc::UnboundedSender<MemoryLink>,
    available: AtomicBool,
    buffer_size: usize,
}

/// Receives the board side of every link opened on a [`MemoryChannel`]
#[derive(Debug)]
pub struct MemoryListener {
    links: mpsc::UnboundedReceiver<MemoryLink>,
}

impl MemoryListener {
    /// Wait for the next link; `None` once the channel is dropped
    pub async fn accept(&mut self) -> Option<MemoryLink> {
        self.links.recv().await
    }
}

/// Create an in-memory channel and the listener for its far ends
pub fn memory_channel() -> (MemoryChannel, MemoryListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MemoryChannel {
            links: tx,
            available: AtomicBool::new(true),
            buffer_size: 1024,
        },
        MemoryListener { links: rx },
    )
}

impl MemoryChannel {
    /// Make subsequent opens fail (unplugged adapter) or succeed again
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl ByteChannel for MemoryChannel {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open(&self, endpoint: &str, bitrate: u32) -> io::Result<BoxedStream> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not available", endpoint),
            ));
        }

        let (host, board) = tokio::io::duplex(self.buffer_size);
        self.links
            .send(MemoryLink {
                endpoint: endpoint.to_string(),
                bitrate,
                stream: board,
            })
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("nothing is listening on {}", endpoint),
                )
            })?;
        debug!("Opened memory link {} at {} baud", endpoint, bitrate);
        Ok(Box::new(host))
    }
}
