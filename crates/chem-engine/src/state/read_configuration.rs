//! ReadConfiguration state
//!
//! Folds the static configuration into what discovery found:
//!
//! 1. boards and channels known only from configuration are added
//! 2. names and serials are read again, plus any attribute still unknown
//! 3. host-local pseudo-sensors are appended
//! 4. configured values are applied as overrides; a configured sampling
//!    period that differs from the board's is written and read back

use std::collections::HashSet;

use chem_protocol::{AppMessage, BoardId, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::StateContext;
use crate::events::EngineEvent;
use crate::model::{Board, Sensor};

/// Progress through configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationPhase {
    MergeStatic,
    InquireNames,
    WaitNames { deadline: Instant },
    AppendHostLocal,
    ApplyOverrides,
    VerifyWrites { deadline: Instant },
    Terminated,
}

/// A request still waiting for its answer: board, channel, answer id
type Outstanding = (BoardId, u8, char);

#[derive(Debug)]
pub struct ReadConfiguration {
    phase: ConfigurationPhase,
    outstanding: HashSet<Outstanding>,
}

impl ReadConfiguration {
    pub fn new() -> Self {
        Self {
            phase: ConfigurationPhase::MergeStatic,
            outstanding: HashSet::new(),
        }
    }

    pub fn phase(&self) -> ConfigurationPhase {
        self.phase
    }

    pub fn is_terminated(&self) -> bool {
        self.phase == ConfigurationPhase::Terminated
    }

    pub fn enter(&mut self, ctx: &mut StateContext<'_>, _now: Instant) {
        self.phase = ConfigurationPhase::MergeStatic;
        self.outstanding.clear();
        info!("[{}] Reading configuration", ctx.bus);
    }

    pub fn inquire(&mut self, ctx: &mut StateContext<'_>, now: Instant) -> Vec<AppMessage> {
        loop {
            match self.phase {
                ConfigurationPhase::MergeStatic => {
                    merge_static(ctx);
                    self.phase = ConfigurationPhase::InquireNames;
                }

                ConfigurationPhase::InquireNames => {
                    let requests = self.inquire_names(ctx);
                    if requests.is_empty() {
                        self.phase = ConfigurationPhase::AppendHostLocal;
                        continue;
                    }
                    self.phase = ConfigurationPhase::WaitNames {
                        deadline: now + ctx.config.configuration_timeout(),
                    };
                    return requests;
                }

                ConfigurationPhase::WaitNames { deadline } => {
                    if !self.outstanding.is_empty() {
                        if now < deadline {
                            return Vec::new();
                        }
                        warn!(
                            "[{}] {} channel attribute(s) unanswered, continuing",
                            ctx.bus,
                            self.outstanding.len()
                        );
                        ctx.timed_out("wait_names", self.outstanding.len());
                        self.outstanding.clear();
                    }
                    self.phase = ConfigurationPhase::AppendHostLocal;
                }

                ConfigurationPhase::AppendHostLocal => {
                    for kind in ctx.bus_config.host_local.enabled() {
                        if ctx.inventory.insert_sensor(Sensor::host_local(kind)) {
                            debug!("[{}] Added host-local sensor {}", ctx.bus, kind.name());
                        }
                    }
                    self.phase = ConfigurationPhase::ApplyOverrides;
                }

                ConfigurationPhase::ApplyOverrides => {
                    let requests = self.apply_overrides(ctx);
                    ctx.inventory.sort_sensors();
                    if requests.is_empty() {
                        self.finish(ctx);
                        continue;
                    }
                    self.phase = ConfigurationPhase::VerifyWrites {
                        deadline: now + ctx.config.configuration_timeout(),
                    };
                    return requests;
                }

                ConfigurationPhase::VerifyWrites { deadline } => {
                    if !self.outstanding.is_empty() {
                        if now < deadline {
                            return Vec::new();
                        }
                        warn!(
                            "[{}] {} configuration write(s) not verified",
                            ctx.bus,
                            self.outstanding.len()
                        );
                        ctx.timed_out("verify_writes", self.outstanding.len());
                        self.outstanding.clear();
                    }
                    report_mismatches(ctx);
                    self.finish(ctx);
                }

                ConfigurationPhase::Terminated => return Vec::new(),
            }
        }
    }

    pub fn evaluate_answer(&mut self, ctx: &mut StateContext<'_>, message: &AppMessage) {
        let Some(command) = Command::decode(message.payload()) else {
            debug!("[{}] Ignoring undecodable answer {}", ctx.bus, message);
            return;
        };
        let board = message.board_id();
        ctx.apply_answer(board, &command);

        if let Some(channel) = command.channel() {
            if !command.is_query() && !command.is_write() {
                self.outstanding.remove(&(board, channel, command.id()));
            }
        }
    }

    fn inquire_names(&mut self, ctx: &StateContext<'_>) -> Vec<AppMessage> {
        let mut requests = Vec::new();
        for sensor in ctx.inventory.sensors() {
            if sensor.is_host_local() {
                continue;
            }
            let channel = sensor.channel;
            let mut commands = vec![
                Command::ChannelName { channel, name: None },
                Command::ChannelSerial {
                    channel,
                    serial: None,
                },
            ];
            if !sensor.units.is_set() {
                commands.push(Command::Units {
                    channel,
                    units: None,
                });
            }
            if !sensor.sampling_period_ms.is_set() {
                commands.push(Command::SamplingPeriod {
                    channel,
                    period_ms: None,
                });
            }
            if !sensor.enabled.is_set() {
                commands.push(Command::Enabled {
                    channel,
                    enabled: None,
                });
            }
            for command in commands {
                self.outstanding.insert((sensor.board, channel, command.id()));
                requests.push(ctx.request(sensor.board, command));
            }
        }
        requests
    }

    fn apply_overrides(&mut self, ctx: &mut StateContext<'_>) -> Vec<AppMessage> {
        let mut requests = Vec::new();
        self.outstanding.clear();

        let bus_config = ctx.bus_config;
        for configured in &bus_config.sensors {
            let (board, channel) = configured.key();
            let mut write_period = None;
            let found = ctx.inventory.update_sensor(board, channel, |sensor| {
                if let Some(name) = &configured.name {
                    sensor.name.set_override(name.clone());
                }
                if let Some(serial) = &configured.serial {
                    sensor.serial.set_override(serial.clone());
                }
                if let Some(units) = &configured.units {
                    sensor.units.set_override(units.clone());
                }
                if let Some(expression) = &configured.expression {
                    sensor.expression.set_override(expression.clone());
                }
                if let Some(enabled) = configured.enabled {
                    sensor.enabled.set_override(enabled);
                }
                if let Some(period) = configured.sampling_period_ms {
                    sensor.sampling_period_ms.set_override(period);
                    if !sensor.is_host_local()
                        && sensor.sampling_period_ms.discovered_value() != Some(&period)
                    {
                        write_period = Some(period);
                    }
                }
            });
            if !found {
                continue;
            }
            let bus = ctx.bus.to_string();
            ctx.emit(EngineEvent::SensorUpdated {
                bus,
                board,
                channel,
            });

            if let Some(period_ms) = write_period {
                let write = Command::SetSamplingPeriod { channel, period_ms };
                debug!(
                    "[{}] Writing sampling period {} ms to {}/{}",
                    ctx.bus, period_ms, board, channel
                );
                if let Some(readback) = write.readback() {
                    self.outstanding.insert((board, channel, readback.id()));
                    requests.push(ctx.request(board, write));
                    requests.push(ctx.request(board, readback));
                }
            }
        }
        requests
    }

    fn finish(&mut self, ctx: &StateContext<'_>) {
        info!(
            "[{}] Configuration ready: {} channel(s)",
            ctx.bus,
            ctx.inventory.sensor_count()
        );
        self.phase = ConfigurationPhase::Terminated;
    }
}

impl Default for ReadConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

/// Add boards and channels that only the configuration knows about
fn merge_static(ctx: &StateContext<'_>) {
    let bus_config = ctx.bus_config;
    for configured in &bus_config.boards {
        let id = configured.board_id();
        let apply = |board: &mut Board| {
            board.board_type.set_override(configured.board_type());
            board.channels.set_override(configured.channels);
            if let Some(firmware) = &configured.firmware {
                board.firmware.set_override(firmware.clone());
            }
            if let Some(serial) = &configured.serial {
                board.serial.set_override(serial.clone());
            }
        };
        if ctx.inventory.board(id).is_some() {
            ctx.inventory.update_board(id, apply);
        } else {
            let mut board = Board::new(id);
            apply(&mut board);
            ctx.inventory.insert_board(board);
            debug!("[{}] Added configured board {}", ctx.bus, id);
        }
        for channel in 0..configured.channels {
            ctx.inventory.ensure_sensor(id, channel);
        }
    }

    for configured in &bus_config.sensors {
        let (board, channel) = configured.key();
        if ctx.inventory.ensure_sensor(board, channel) {
            debug!("[{}] Added configured channel {}/{}", ctx.bus, board, channel);
        }
    }
    ctx.inventory.sort_sensors();
}

/// Warn about written sampling periods the board did not take
fn report_mismatches(ctx: &StateContext<'_>) {
    for sensor in ctx.inventory.sensors() {
        if let (Some(configured), Some(read)) = (
            sensor.sampling_period_ms.override_value(),
            sensor.sampling_period_ms.discovered_value(),
        ) {
            if configured != read && !sensor.is_host_local() {
                warn!(
                    "[{}] Channel {}/{} reports sampling period {} ms, configured {} ms",
                    ctx.bus, sensor.board, sensor.channel, read, configured
                );
            }
        }
    }
}
