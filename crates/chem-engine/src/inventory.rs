//! Board and sensor collections
//!
//! Boards and sensors sit behind separate locks: the rx pump, the engine
//! tick and snapshot readers touch them concurrently, and every access
//! holds a lock only for the duration of one read or update.

use std::collections::BTreeMap;

use chem_protocol::{BoardId, BoardTypeInfo, Command};
use parking_lot::RwLock;

use crate::model::{Board, SampleValue, Sensor};

/// What an answer refreshed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerTarget {
    Board(BoardId),
    Sensor(BoardId, u8),
}

/// Discovered boards and channels of one bus
#[derive(Debug, Default)]
pub struct Inventory {
    boards: RwLock<BTreeMap<BoardId, Board>>,
    sensors: RwLock<Vec<Sensor>>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything (start of a full re-discovery)
    pub fn clear(&self) {
        self.boards.write().clear();
        self.sensors.write().clear();
    }

    // -------------------------------------------------------------------------
    // Boards
    // -------------------------------------------------------------------------

    pub fn boards(&self) -> Vec<Board> {
        self.boards.read().values().cloned().collect()
    }

    pub fn board(&self, id: BoardId) -> Option<Board> {
        self.boards.read().get(&id).cloned()
    }

    pub fn board_count(&self) -> usize {
        self.boards.read().len()
    }

    /// Record a board type answer; returns true if the board is new
    pub fn discover_board(&self, id: BoardId, info: BoardTypeInfo) -> bool {
        let mut boards = self.boards.write();
        let is_new = !boards.contains_key(&id);
        let board = boards.entry(id).or_insert_with(|| Board::new(id));
        board.board_type.set_discovered(info.board_type);
        board.channels.set_discovered(info.channels);
        is_new
    }

    /// Insert a board unless one with the same id exists; returns true if inserted
    pub fn insert_board(&self, board: Board) -> bool {
        let mut boards = self.boards.write();
        if boards.contains_key(&board.id) {
            return false;
        }
        boards.insert(board.id, board);
        true
    }

    /// Modify a board in place; returns false if it is unknown
    pub fn update_board(&self, id: BoardId, f: impl FnOnce(&mut Board)) -> bool {
        match self.boards.write().get_mut(&id) {
            Some(board) => {
                f(board);
                true
            }
            None => false,
        }
    }

    /// Boards still missing firmware or serial
    pub fn boards_missing_info(&self) -> usize {
        self.boards
            .read()
            .values()
            .filter(|b| !b.is_info_complete())
            .count()
    }

    // -------------------------------------------------------------------------
    // Sensors
    // -------------------------------------------------------------------------

    pub fn sensors(&self) -> Vec<Sensor> {
        self.sensors.read().clone()
    }

    pub fn sensor(&self, board: BoardId, channel: u8) -> Option<Sensor> {
        self.sensors
            .read()
            .iter()
            .find(|s| s.key() == (board, channel))
            .cloned()
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.read().len()
    }

    /// Add an empty channel record unless it exists; returns true if added
    pub fn ensure_sensor(&self, board: BoardId, channel: u8) -> bool {
        self.insert_sensor(Sensor::new(board, channel))
    }

    /// Add a channel record unless one with the same key exists
    pub fn insert_sensor(&self, sensor: Sensor) -> bool {
        let mut sensors = self.sensors.write();
        if sensors.iter().any(|s| s.key() == sensor.key()) {
            return false;
        }
        sensors.push(sensor);
        true
    }

    /// Modify a channel in place; returns false if it is unknown
    pub fn update_sensor(&self, board: BoardId, channel: u8, f: impl FnOnce(&mut Sensor)) -> bool {
        match self
            .sensors
            .write()
            .iter_mut()
            .find(|s| s.key() == (board, channel))
        {
            Some(sensor) => {
                f(sensor);
                true
            }
            None => false,
        }
    }

    /// Order channels by (board id, channel)
    pub fn sort_sensors(&self) {
        self.sensors.write().sort_by_key(|s| s.key());
    }

    /// Channels with at least one attribute still unknown
    pub fn sensors_missing_info(&self) -> usize {
        self.sensors
            .read()
            .iter()
            .filter(|s| !s.is_host_local() && !s.is_info_complete())
            .count()
    }

    // -------------------------------------------------------------------------
    // Answers
    // -------------------------------------------------------------------------

    /// Store the data carried by an attribute answer
    ///
    /// Returns what was refreshed, or `None` for requests, write echoes,
    /// samples and answers from boards or channels not in the inventory.
    pub fn apply_answer(&self, board: BoardId, command: &Command) -> Option<AnswerTarget> {
        match command {
            Command::BoardType(Some(info)) => {
                let info = *info;
                self.update_board(board, |b| {
                    b.board_type.set_discovered(info.board_type);
                    b.channels.set_discovered(info.channels);
                })
                .then_some(AnswerTarget::Board(board))
            }
            Command::FirmwareVersion(Some(version)) => self
                .update_board(board, |b| b.firmware.set_discovered(version.clone()))
                .then_some(AnswerTarget::Board(board)),
            Command::BoardSerial(Some(serial)) => self
                .update_board(board, |b| b.serial.set_discovered(serial.clone()))
                .then_some(AnswerTarget::Board(board)),
            Command::ChannelName {
                channel,
                name: Some(name),
            } => self.apply_channel(board, *channel, |s| s.name.set_discovered(name.clone())),
            Command::ChannelSerial {
                channel,
                serial: Some(serial),
            } => self.apply_channel(board, *channel, |s| s.serial.set_discovered(serial.clone())),
            Command::Units {
                channel,
                units: Some(units),
            } => self.apply_channel(board, *channel, |s| s.units.set_discovered(units.clone())),
            Command::SamplingPeriod {
                channel,
                period_ms: Some(period),
            } => self.apply_channel(board, *channel, |s| {
                s.sampling_period_ms.set_discovered(*period)
            }),
            Command::Enabled {
                channel,
                enabled: Some(enabled),
            } => self.apply_channel(board, *channel, |s| s.enabled.set_discovered(*enabled)),
            Command::Prescaler {
                channel,
                value: Some(value),
            } => self.apply_channel(board, *channel, |s| s.prescaler.set_discovered(*value)),
            _ => None,
        }
    }

    fn apply_channel(
        &self,
        board: BoardId,
        channel: u8,
        f: impl FnOnce(&mut Sensor),
    ) -> Option<AnswerTarget> {
        self.update_sensor(board, channel, f)
            .then_some(AnswerTarget::Sensor(board, channel))
    }

    /// Store a sample unless its timestamp matches the stored one
    ///
    /// Returns true if the sample was accepted.
    pub fn record_sample(&self, board: BoardId, channel: u8, sample: SampleValue) -> bool {
        let mut accepted = false;
        self.update_sensor(board, channel, |s| {
            if s.sample.map(|prev| prev.timestamp) != Some(sample.timestamp) {
                s.sample = Some(sample);
                accepted = true;
            }
        });
        accepted
    }
}

#[cfg(test)]
mod tests {
    use chem_protocol::BoardType;

    use super::*;

    fn info(channels: u8) -> BoardTypeInfo {
        BoardTypeInfo {
            board_type: BoardType::DualGas,
            channels,
        }
    }

    #[test]
    fn test_discover_board_once() {
        let inventory = Inventory::new();
        assert!(inventory.discover_board(BoardId::new(1), info(2)));
        assert!(!inventory.discover_board(BoardId::new(1), info(2)));
        assert_eq!(inventory.board_count(), 1);
        assert_eq!(inventory.boards_missing_info(), 1);
    }

    #[test]
    fn test_apply_answers() {
        let inventory = Inventory::new();
        let id = BoardId::new(1);
        inventory.discover_board(id, info(2));
        inventory.ensure_sensor(id, 1);

        let firmware = Command::decode("V312E3400").unwrap();
        assert_eq!(inventory.apply_answer(id, &firmware), Some(AnswerTarget::Board(id)));
        assert_eq!(inventory.board(id).unwrap().firmware.get().as_deref(), Some("1.4"));

        let period = Command::SamplingPeriod {
            channel: 1,
            period_ms: Some(900),
        };
        assert_eq!(
            inventory.apply_answer(id, &period),
            Some(AnswerTarget::Sensor(id, 1))
        );
        assert_eq!(inventory.sensor(id, 1).unwrap().sampling_period_ms.get(), Some(900));

        // Unknown channel and request forms are ignored
        let other = Command::SamplingPeriod {
            channel: 5,
            period_ms: Some(900),
        };
        assert_eq!(inventory.apply_answer(id, &other), None);
        let request = Command::SamplingPeriod {
            channel: 1,
            period_ms: None,
        };
        assert_eq!(inventory.apply_answer(id, &request), None);
    }

    #[test]
    fn test_sort_sensors() {
        let inventory = Inventory::new();
        inventory.ensure_sensor(BoardId::new(3), 0);
        inventory.ensure_sensor(BoardId::HOST_LOCAL, 2);
        inventory.ensure_sensor(BoardId::new(1), 1);
        inventory.ensure_sensor(BoardId::new(1), 0);
        inventory.sort_sensors();
        let keys: Vec<_> = inventory.sensors().iter().map(|s| s.key()).collect();
        assert_eq!(
            keys,
            vec![
                (BoardId::new(1), 0),
                (BoardId::new(1), 1),
                (BoardId::new(3), 0),
                (BoardId::HOST_LOCAL, 2),
            ]
        );
    }

    #[test]
    fn test_sample_dedup_by_timestamp() {
        let inventory = Inventory::new();
        let id = BoardId::new(2);
        inventory.ensure_sensor(id, 0);
        let sample = SampleValue {
            value: 10.0,
            evaluated: 1.0,
            timestamp: 7,
        };
        assert!(inventory.record_sample(id, 0, sample));
        assert!(!inventory.record_sample(id, 0, SampleValue { value: 11.0, ..sample }));
        assert!(inventory.record_sample(id, 0, SampleValue { timestamp: 8, ..sample }));
        assert_eq!(inventory.sensor(id, 0).unwrap().sample.unwrap().timestamp, 8);
    }
}
