//! Simulated bus
//!
//! Serves the board side of every in-memory link a [`chem_bus::MemoryChannel`]
//! opens. Requests are unframed with device-role framing, routed to the
//! addressed board, and answered in device-role frames (with the CRC trailer
//! on protocol version 1).

use std::io;
use std::sync::Arc;

use chem_bus::{memory_channel, MemoryChannel, MemoryListener};
use chem_protocol::{create_transport, AppMessage, BoardId, Role, TransportKind};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::board::VirtualBoard;

/// Boards sharing one simulated line
///
/// Cheap to clone; clones share the same boards, so tests can change a
/// board while links are being served.
#[derive(Debug, Clone)]
pub struct SimulatedBus {
    transport: TransportKind,
    crc: bool,
    boards: Arc<Mutex<Vec<VirtualBoard>>>,
}

impl SimulatedBus {
    pub fn new(transport: TransportKind, crc: bool) -> Self {
        Self {
            transport,
            crc,
            boards: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add a board (replacing one with the same id)
    pub fn add_board(&self, board: VirtualBoard) {
        let mut boards = self.boards.lock();
        boards.retain(|b| b.id() != board.id());
        boards.push(board);
    }

    pub fn with_board(self, board: VirtualBoard) -> Self {
        self.add_board(board);
        self
    }

    /// Modify a board in place; returns false if there is no such board
    pub fn update_board(&self, id: u8, f: impl FnOnce(&mut VirtualBoard)) -> bool {
        match self.boards.lock().iter_mut().find(|b| b.id() == BoardId::new(id)) {
            Some(board) => {
                f(board);
                true
            }
            None => false,
        }
    }

    /// Requests received by a board so far
    pub fn requests(&self, id: u8) -> Option<u64> {
        self.boards
            .lock()
            .iter()
            .find(|b| b.id() == BoardId::new(id))
            .map(VirtualBoard::requests)
    }

    /// Create an in-memory channel whose links this bus serves
    pub fn attach(self) -> (MemoryChannel, JoinHandle<()>) {
        let (channel, listener) = memory_channel();
        let task = self.spawn(listener);
        (channel, task)
    }

    /// Serve every link opened on the listener until its channel is dropped
    pub fn spawn(self, mut listener: MemoryListener) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(link) = listener.accept().await {
                info!("Simulated bus serving {} at {} baud", link.endpoint, link.bitrate);
                let bus = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = bus.serve(link.stream).await {
                        warn!("Simulated link {} ended: {}", link.endpoint, e);
                    }
                });
            }
            debug!("Simulated bus listener closed");
        })
    }

    /// Answer requests on one stream until it closes
    pub async fn serve<S>(&self, mut stream: S) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framer = create_transport(self.transport, Role::Device, self.crc);
        let addressed = matches!(
            self.transport,
            TransportKind::PointToMultipoint | TransportKind::PointToMultipointFwu
        );
        let mut buf = [0u8; 256];

        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }

            let mut replies = Vec::new();
            for &byte in &buf[..n] {
                if let Some(request) = framer.on_byte_received(byte) {
                    if let Some(answer) = self.route(&request, addressed) {
                        replies.extend(framer.to_wire(&answer));
                    }
                }
            }
            if !replies.is_empty() {
                stream.write_all(&replies).await?;
                stream.flush().await?;
            }
        }
    }

    fn route(&self, request: &AppMessage, addressed: bool) -> Option<AppMessage> {
        let now = Instant::now();
        let mut boards = self.boards.lock();
        let board = if addressed {
            boards.iter_mut().find(|b| b.id() == request.board_id())?
        } else {
            boards.first_mut()?
        };
        let payload = board.handle(request.payload(), now)?;
        let id = if addressed { board.id() } else { BoardId::UNDEFINED };
        Some(AppMessage::new(id, payload))
    }
}

#[cfg(test)]
mod tests {
    use chem_protocol::BoardType;

    use super::*;

    async fn exchange(bus: &SimulatedBus, request: &[u8]) -> Vec<u8> {
        let (mut host, board) = tokio::io::duplex(1024);
        let server = bus.clone();
        tokio::spawn(async move { server.serve(board).await });
        host.write_all(request).await.unwrap();

        let mut answer = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            host.read_exact(&mut byte).await.unwrap();
            answer.push(byte[0]);
            if byte[0] == b')' || byte[0] == b'}' {
                return answer;
            }
        }
    }

    #[tokio::test]
    async fn test_multipoint_routing() {
        let bus = SimulatedBus::new(TransportKind::PointToMultipoint, false)
            .with_board(VirtualBoard::new(1, BoardType::DualGas, 2))
            .with_board(VirtualBoard::new(3, BoardType::SingleGas, 1));
        assert_eq!(exchange(&bus, b"[003T][003T]").await, b"(003T0101)");
        assert_eq!(bus.requests(3), Some(2));
        assert_eq!(bus.requests(1), Some(0));
    }

    #[tokio::test]
    async fn test_point_to_point_answers_first_board() {
        let bus = SimulatedBus::new(TransportKind::PointToPoint, false)
            .with_board(VirtualBoard::new(0, BoardType::Ndir, 1));
        assert_eq!(exchange(&bus, b"{T}").await, b"{T0701}");
    }

    #[tokio::test]
    async fn test_crc_answers() {
        let bus = SimulatedBus::new(TransportKind::PointToMultipoint, true)
            .with_board(VirtualBoard::new(5, BoardType::QuadGas, 4));
        let answer = exchange(&bus, b"[105T]").await;
        // Version, id, payload, 8 hex CRC digits
        assert!(answer.starts_with(b"(105T0304"));
        assert_eq!(answer.len(), "(105T0304".len() + 8 + 1);
    }

    #[test]
    fn test_update_board() {
        let bus = SimulatedBus::new(TransportKind::PointToMultipoint, false)
            .with_board(VirtualBoard::new(2, BoardType::Pid, 1));
        assert!(bus.update_board(2, |b| b.set_silent(true)));
        assert!(!bus.update_board(9, |b| b.set_silent(true)));
    }
}
