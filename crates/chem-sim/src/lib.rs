//! Sensor Board Simulation Library
//!
//! Simulated boards for exercising the bus and the engine without hardware:
//!
//! - **VirtualBoard**: answers the board command set from in-memory state,
//!   producing a new sample once per sampling period
//! - **SimulatedBus**: serves the board side of in-memory links with
//!   device-role framing
//!
//! # Example
//!
//! ```rust
//! use chem_protocol::{BoardType, TransportKind};
//! use chem_sim::{SimulatedBus, VirtualBoard};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let sim = SimulatedBus::new(TransportKind::PointToMultipoint, true)
//!     .with_board(VirtualBoard::new(1, BoardType::DualGas, 2));
//! let (channel, _task) = sim.attach();
//! // Hand `channel` to a chem_bus::SensorBus and connect to any `mem:` endpoint
//! # drop(channel);
//! # }
//! ```

pub mod board;
pub mod bus;

use chem_protocol::{BoardType, TransportKind};

pub use board::{VirtualBoard, VirtualBoardConfig, VirtualChannel};
pub use bus::SimulatedBus;

/// A small line of boards: a dual-gas board at 1 and an environmental board at 3
pub fn demo_bus(transport: TransportKind, crc: bool) -> SimulatedBus {
    let mut gas = VirtualBoard::new(1, BoardType::DualGas, 0);
    gas.set_firmware("2.3");
    let mut env = VirtualBoard::new(3, BoardType::Environmental, 0);
    env.set_firmware("1.7");

    let gas = with_channels(
        gas,
        [
            ("CO", "ppm", 1000, 350),
            ("NO2", "ppb", 2000, 120),
        ],
    );
    let env = with_channels(env, [("Temperature", "degC", 5000, 215)]);

    SimulatedBus::new(transport, crc).with_board(gas).with_board(env)
}

fn with_channels<const N: usize>(
    mut board: VirtualBoard,
    channels: [(&str, &str, u32, i32); N],
) -> VirtualBoard {
    let id = board.id().as_u8();
    for (name, units, period, base) in channels {
        board.push_channel(VirtualChannel {
            name: name.to_string(),
            units: units.to_string(),
            serial: format!("{}-{:02}", name, id),
            sampling_period_ms: period,
            base_raw: base,
            ..VirtualChannel::default()
        });
    }
    board
}
