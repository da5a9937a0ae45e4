//! Sampling state
//!
//! Every enabled channel is polled on its own schedule, three times per
//! sampling period so a fresh sample is never missed by much. Channels with
//! a conversion expression are read in the legacy fixed-point form and fed
//! through it; the others are read pre-scaled by the firmware.

use std::collections::HashMap;

use chem_protocol::{AppMessage, BoardId, Command};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::StateContext;
use crate::events::EngineEvent;
use crate::expression::Expression;
use crate::model::{HostLocalKind, SampleValue, Sensor};

type ChannelKey = (BoardId, u8);

#[derive(Debug)]
pub struct Sampling {
    entered: Option<Instant>,
    next_due: HashMap<ChannelKey, Instant>,
    /// Parsed expression and its source by channel, `None` when it does not parse
    expressions: HashMap<ChannelKey, (String, Option<Expression>)>,
}

impl Sampling {
    pub fn new() -> Self {
        Self {
            entered: None,
            next_due: HashMap::new(),
            expressions: HashMap::new(),
        }
    }

    pub fn enter(&mut self, ctx: &mut StateContext<'_>, now: Instant) {
        self.entered = Some(now);
        self.next_due.clear();
        self.expressions.clear();
        let enabled = ctx
            .inventory
            .sensors()
            .iter()
            .filter(|s| s.is_enabled())
            .count();
        debug!("[{}] Sampling {} enabled channel(s)", ctx.bus, enabled);
    }

    pub fn inquire(&mut self, ctx: &mut StateContext<'_>, now: Instant) -> Vec<AppMessage> {
        let mut requests = Vec::new();
        for sensor in ctx.inventory.sensors() {
            if !sensor.is_enabled() {
                continue;
            }
            let interval = ctx.config.poll_interval(sensor.sampling_period_ms.get());
            let due = self.next_due.entry(sensor.key()).or_insert(now);
            if now < *due {
                continue;
            }
            *due += interval;
            if *due <= now {
                *due = now + interval;
            }

            if let Some(kind) = sensor.host_local_kind() {
                self.sample_host_local(ctx, &sensor, kind, now);
            } else {
                let channel = sensor.channel;
                let command = if sensor.expression.is_set() {
                    Command::LastSample {
                        channel,
                        sample: None,
                    }
                } else {
                    Command::LastSampleHiRes {
                        channel,
                        sample: None,
                    }
                };
                requests.push(ctx.request(sensor.board, command));
            }
        }
        requests
    }

    pub fn evaluate_answer(&mut self, ctx: &mut StateContext<'_>, message: &AppMessage) {
        let Some(command) = Command::decode(message.payload()) else {
            debug!("[{}] Ignoring undecodable answer {}", ctx.bus, message);
            return;
        };
        let board = message.board_id();

        match command {
            Command::LastSample {
                channel,
                sample: Some(raw),
            } => {
                let Some(sensor) = ctx.inventory.sensor(board, channel) else {
                    return;
                };
                let value = f64::from(raw.value);
                let evaluated = self.evaluate(ctx.bus, &sensor, value);
                accept(
                    ctx,
                    board,
                    channel,
                    SampleValue {
                        value,
                        evaluated,
                        timestamp: raw.timestamp,
                    },
                );
            }
            Command::LastSampleHiRes {
                channel,
                sample: Some(sample),
            } => {
                let value = f64::from(sample.value);
                accept(
                    ctx,
                    board,
                    channel,
                    SampleValue {
                        value,
                        evaluated: value,
                        timestamp: sample.timestamp,
                    },
                );
            }
            other => {
                ctx.apply_answer(board, &other);
            }
        }
    }

    fn sample_host_local(
        &mut self,
        ctx: &mut StateContext<'_>,
        sensor: &Sensor,
        kind: HostLocalKind,
        now: Instant,
    ) {
        let Some(value) = ctx.telemetry.read(kind) else {
            trace!("[{}] No reading for {}", ctx.bus, kind.name());
            return;
        };
        let since_entered = self
            .entered
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default();
        let evaluated = self.evaluate(ctx.bus, sensor, value);
        accept(
            ctx,
            sensor.board,
            sensor.channel,
            SampleValue {
                value,
                evaluated,
                timestamp: since_entered.as_millis() as u32,
            },
        );
    }

    /// Apply the channel's expression, falling back to the raw value
    fn evaluate(&mut self, bus: &str, sensor: &Sensor, value: f64) -> f64 {
        let Some(source) = sensor.expression.value() else {
            return value;
        };
        let key = sensor.key();
        let stale = self
            .expressions
            .get(&key)
            .map_or(true, |(cached, _)| cached != source);
        if stale {
            let parsed = match Expression::parse(source) {
                Ok(expression) => Some(expression),
                Err(e) => {
                    warn!(
                        "[{}] Expression {:?} for {}/{} does not parse: {}",
                        bus, source, sensor.board, sensor.channel, e
                    );
                    None
                }
            };
            self.expressions.insert(key, (source.clone(), parsed));
        }
        match self.expressions.get(&key) {
            Some((_, Some(expression))) => expression.evaluate_or_raw(value),
            _ => value,
        }
    }
}

impl Default for Sampling {
    fn default() -> Self {
        Self::new()
    }
}

fn accept(ctx: &mut StateContext<'_>, board: BoardId, channel: u8, sample: SampleValue) {
    if ctx.inventory.record_sample(board, channel, sample) {
        trace!(
            "[{}] {}/{} = {} (t={})",
            ctx.bus,
            board,
            channel,
            sample.evaluated,
            sample.timestamp
        );
        let bus = ctx.bus.to_string();
        ctx.emit(EngineEvent::SampleAccepted {
            bus,
            board,
            channel,
            sample,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chem_protocol::{HiResSample, RawSample};

    use super::*;
    use crate::config::BusConfig;
    use crate::state::test_support::{answer, decoded, Harness};

    fn harness_with_channel(period_ms: u32, expression: Option<&str>) -> Harness {
        let harness = Harness::new(BusConfig::new("bus", "mem:bus"));
        let id = BoardId::new(1);
        harness.inventory.ensure_sensor(id, 0);
        harness.inventory.update_sensor(id, 0, |s| {
            s.sampling_period_ms.set_discovered(period_ms);
            if let Some(expression) = expression {
                s.expression.set_override(expression.to_string());
            }
        });
        harness
    }

    fn sample_events(harness: &Harness) -> Vec<SampleValue> {
        harness
            .events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::SampleAccepted { sample, .. } => Some(*sample),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_polls_at_a_third_of_the_period() {
        let mut harness = harness_with_channel(900, None);
        let mut state = Sampling::new();
        let start = Instant::now();
        state.enter(&mut harness.ctx(), start);

        let mut polled_at = Vec::new();
        for tick in 0..=20u64 {
            let now = start + Duration::from_millis(tick * 100);
            if !state.inquire(&mut harness.ctx(), now).is_empty() {
                polled_at.push(tick * 100);
            }
        }
        assert_eq!(polled_at, vec![0, 300, 600, 900, 1200, 1500, 1800]);
    }

    #[test]
    fn test_short_period_raised_to_default() {
        let mut harness = harness_with_channel(60, None);
        let mut state = Sampling::new();
        let start = Instant::now();
        state.enter(&mut harness.ctx(), start);

        let polled_at: Vec<u64> = (0..=5u64)
            .filter(|tick| {
                let now = start + Duration::from_millis(tick * 100);
                !state.inquire(&mut harness.ctx(), now).is_empty()
            })
            .map(|tick| tick * 100)
            .collect();
        // Every 500 ms / 3 on a 100 ms tick
        assert_eq!(polled_at, vec![0, 200, 400, 500]);
    }

    #[test]
    fn test_unchanged_timestamp_not_reemitted() {
        let mut harness = harness_with_channel(900, None);
        let mut state = Sampling::new();
        let start = Instant::now();
        state.enter(&mut harness.ctx(), start);

        let requests = decoded(&state.inquire(&mut harness.ctx(), start));
        assert_eq!(
            requests,
            vec![(
                BoardId::new(1),
                Command::LastSampleHiRes {
                    channel: 0,
                    sample: None
                }
            )]
        );

        let reply = |value: f32, timestamp: u32| {
            answer(
                1,
                Command::LastSampleHiRes {
                    channel: 0,
                    sample: Some(HiResSample { value, timestamp }),
                },
            )
        };
        state.evaluate_answer(&mut harness.ctx(), &reply(1.5, 100));
        state.evaluate_answer(&mut harness.ctx(), &reply(1.5, 100));
        state.evaluate_answer(&mut harness.ctx(), &reply(1.75, 101));

        let samples = sample_events(&harness);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].evaluated, 1.5);
        assert_eq!(samples[1].timestamp, 101);
    }

    #[test]
    fn test_expression_uses_legacy_sample() {
        let mut harness = harness_with_channel(900, Some("x / 10"));
        let mut state = Sampling::new();
        let start = Instant::now();
        state.enter(&mut harness.ctx(), start);

        let requests = decoded(&state.inquire(&mut harness.ctx(), start));
        assert_eq!(requests[0].1.id(), 'l');

        state.evaluate_answer(
            &mut harness.ctx(),
            &answer(
                1,
                Command::LastSample {
                    channel: 0,
                    sample: Some(RawSample {
                        value: -250,
                        timestamp: 5,
                    }),
                },
            ),
        );
        let sample = harness.inventory.sensor(BoardId::new(1), 0).unwrap().sample.unwrap();
        assert_eq!(sample.value, -250.0);
        assert_eq!(sample.evaluated, -25.0);
    }

    #[test]
    fn test_bad_expression_keeps_raw_value() {
        let mut harness = harness_with_channel(900, Some("x * * 2"));
        let mut state = Sampling::new();
        let start = Instant::now();
        state.enter(&mut harness.ctx(), start);
        state.evaluate_answer(
            &mut harness.ctx(),
            &answer(
                1,
                Command::LastSample {
                    channel: 0,
                    sample: Some(RawSample {
                        value: 42,
                        timestamp: 1,
                    }),
                },
            ),
        );
        assert_eq!(sample_events(&harness)[0].evaluated, 42.0);
    }

    #[test]
    fn test_disabled_channel_not_polled() {
        let mut harness = harness_with_channel(900, None);
        harness
            .inventory
            .update_sensor(BoardId::new(1), 0, |s| s.enabled.set_override(false));
        let mut state = Sampling::new();
        let start = Instant::now();
        state.enter(&mut harness.ctx(), start);
        assert!(state.inquire(&mut harness.ctx(), start).is_empty());
    }

    #[test]
    fn test_host_local_read_directly() {
        let mut harness = Harness::new(BusConfig::new("bus", "mem:bus"));
        harness
            .inventory
            .insert_sensor(Sensor::host_local(HostLocalKind::Voltage));
        harness.telemetry.set(HostLocalKind::Voltage, 12.4);

        let mut state = Sampling::new();
        let start = Instant::now();
        state.enter(&mut harness.ctx(), start);
        assert!(state.inquire(&mut harness.ctx(), start).is_empty());
        state.inquire(&mut harness.ctx(), start + Duration::from_millis(200));

        let samples = sample_events(&harness);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].evaluated, 12.4);
        assert_eq!(samples[1].timestamp, 200);
    }
}
