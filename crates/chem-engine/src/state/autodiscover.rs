//! Autodiscover state
//!
//! Probes every board id with a board type request, then asks each board
//! that answered for its firmware and serial, then asks every channel for
//! its attributes. Each wait ends early once everything has answered and
//! otherwise gives up at its timeout, keeping whatever arrived.

use chem_protocol::{AppMessage, BoardId, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::StateContext;
use crate::events::EngineEvent;

/// Progress through discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryPhase {
    StartDiscoveringBoards,
    WaitBoardAnswers { deadline: Instant },
    InquiryBoardsInfo,
    WaitBoardsInfoAnswers { deadline: Instant },
    InquiryChannels,
    WaitChannelsAnswers { deadline: Instant },
    CollectionReady,
    Terminated,
}

#[derive(Debug)]
pub struct Autodiscover {
    phase: DiscoveryPhase,
}

impl Autodiscover {
    pub fn new() -> Self {
        Self {
            phase: DiscoveryPhase::StartDiscoveringBoards,
        }
    }

    pub fn phase(&self) -> DiscoveryPhase {
        self.phase
    }

    pub fn is_terminated(&self) -> bool {
        self.phase == DiscoveryPhase::Terminated
    }

    /// Start over with an empty inventory
    pub fn enter(&mut self, ctx: &mut StateContext<'_>, _now: Instant) {
        ctx.inventory.clear();
        self.phase = DiscoveryPhase::StartDiscoveringBoards;
        info!("[{}] Discovering boards", ctx.bus);
    }

    pub fn inquire(&mut self, ctx: &mut StateContext<'_>, now: Instant) -> Vec<AppMessage> {
        loop {
            match self.phase {
                DiscoveryPhase::StartDiscoveringBoards => {
                    let candidates: Vec<BoardId> = if ctx.is_addressed() {
                        BoardId::all().collect()
                    } else {
                        vec![BoardId::new(0)]
                    };
                    let requests = candidates
                        .into_iter()
                        .map(|id| ctx.request(id, Command::BoardType(None)))
                        .collect();
                    self.phase = DiscoveryPhase::WaitBoardAnswers {
                        deadline: now + ctx.config.board_discovery_timeout(),
                    };
                    return requests;
                }

                DiscoveryPhase::WaitBoardAnswers { deadline } => {
                    let expected = if ctx.is_addressed() {
                        usize::from(BoardId::MAX_BOARDS)
                    } else {
                        1
                    };
                    let found = ctx.inventory.board_count();
                    if found < expected && now < deadline {
                        return Vec::new();
                    }
                    info!("[{}] {} board(s) answered", ctx.bus, found);
                    self.phase = DiscoveryPhase::InquiryBoardsInfo;
                }

                DiscoveryPhase::InquiryBoardsInfo => {
                    let boards = ctx.inventory.boards();
                    if boards.is_empty() {
                        self.phase = DiscoveryPhase::CollectionReady;
                        continue;
                    }
                    let requests = boards
                        .iter()
                        .flat_map(|b| {
                            [
                                ctx.request(b.id, Command::FirmwareVersion(None)),
                                ctx.request(b.id, Command::BoardSerial(None)),
                            ]
                        })
                        .collect();
                    self.phase = DiscoveryPhase::WaitBoardsInfoAnswers {
                        deadline: now + ctx.config.board_info_timeout(),
                    };
                    return requests;
                }

                DiscoveryPhase::WaitBoardsInfoAnswers { deadline } => {
                    let missing = ctx.inventory.boards_missing_info();
                    if missing > 0 {
                        if now < deadline {
                            return Vec::new();
                        }
                        warn!(
                            "[{}] Board info incomplete for {} board(s), continuing",
                            ctx.bus, missing
                        );
                        ctx.timed_out("wait_boards_info_answers", missing);
                    }
                    self.phase = DiscoveryPhase::InquiryChannels;
                }

                DiscoveryPhase::InquiryChannels => {
                    let mut requests = Vec::new();
                    for board in ctx.inventory.boards() {
                        for channel in 0..board.channel_count() {
                            ctx.inventory.ensure_sensor(board.id, channel);
                            requests.extend(
                                channel_inquiry(channel)
                                    .into_iter()
                                    .map(|c| ctx.request(board.id, c)),
                            );
                        }
                    }
                    if requests.is_empty() {
                        self.phase = DiscoveryPhase::CollectionReady;
                        continue;
                    }
                    self.phase = DiscoveryPhase::WaitChannelsAnswers {
                        deadline: now + ctx.config.channel_info_timeout(),
                    };
                    return requests;
                }

                DiscoveryPhase::WaitChannelsAnswers { deadline } => {
                    let missing = ctx.inventory.sensors_missing_info();
                    if missing > 0 {
                        if now < deadline {
                            return Vec::new();
                        }
                        warn!(
                            "[{}] Channel info incomplete for {} channel(s), continuing",
                            ctx.bus, missing
                        );
                        ctx.timed_out("wait_channels_answers", missing);
                    }
                    self.phase = DiscoveryPhase::CollectionReady;
                }

                DiscoveryPhase::CollectionReady => {
                    ctx.inventory.sort_sensors();
                    info!(
                        "[{}] Discovery finished: {} board(s), {} channel(s)",
                        ctx.bus,
                        ctx.inventory.board_count(),
                        ctx.inventory.sensor_count()
                    );
                    self.phase = DiscoveryPhase::Terminated;
                }

                DiscoveryPhase::Terminated => return Vec::new(),
            }
        }
    }

    pub fn evaluate_answer(&mut self, ctx: &mut StateContext<'_>, message: &AppMessage) {
        let Some(command) = Command::decode(message.payload()) else {
            debug!("[{}] Ignoring undecodable answer {}", ctx.bus, message);
            return;
        };
        let board = message.board_id();

        if let Command::BoardType(Some(info)) = command {
            let accepting = matches!(
                self.phase,
                DiscoveryPhase::StartDiscoveringBoards | DiscoveryPhase::WaitBoardAnswers { .. }
            );
            if accepting && BoardId::addressable(board.as_u8()).is_ok() {
                if ctx.inventory.discover_board(board, info) {
                    debug!(
                        "[{}] Board {} is {} with {} channel(s)",
                        ctx.bus,
                        board,
                        info.board_type.name(),
                        info.channels
                    );
                    let bus = ctx.bus.to_string();
                    ctx.emit(EngineEvent::BoardDiscovered {
                        bus,
                        board,
                        channels: info.channels,
                    });
                }
                return;
            }
        }

        ctx.apply_answer(board, &command);
    }
}

impl Default for Autodiscover {
    fn default() -> Self {
        Self::new()
    }
}

/// Requests for every attribute of a channel
pub(crate) fn channel_inquiry(channel: u8) -> [Command; 5] {
    [
        Command::ChannelName { channel, name: None },
        Command::ChannelSerial {
            channel,
            serial: None,
        },
        Command::SamplingPeriod {
            channel,
            period_ms: None,
        },
        Command::Units {
            channel,
            units: None,
        },
        Command::Enabled {
            channel,
            enabled: None,
        },
    ]
}
