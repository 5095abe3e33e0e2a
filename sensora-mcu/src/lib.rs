//! Sensora MCU Library
//!
//! Capability traits the Sensora runtime is built on. A board crate
//! implements these on top of its network stack, MQTT client, flash store
//! and UART:
//! - [`Board`]: network join, board info and stats
//! - [`Transport`]: MQTT connect, publish, subscribe
//! - [`Storage`]: fixed-size config records
//! - [`SerialPort`]: raw byte stream used for provisioning
//! - [`Clock`]: monotonic milliseconds
//!
//! The [`sim`] module has in-memory implementations of all of them.

pub mod board;
pub mod clock;
pub mod serial;
pub mod sim;
pub mod storage;
pub mod transport;

pub use board::*;
pub use clock::*;
pub use serial::*;
pub use storage::*;
pub use transport::*;

/// All capabilities of one device, handed to the state machines as a unit
#[derive(Debug)]
pub struct Hardware<B, T, S, P, C> {
    pub board: B,
    pub transport: T,
    pub storage: S,
    pub serial: P,
    pub clock: C,
}

impl<B, T, S, P, C> Hardware<B, T, S, P, C>
where
    B: Board,
    T: Transport,
    S: Storage,
    P: SerialPort,
    C: Clock,
{
    pub fn new(board: B, transport: T, storage: S, serial: P, clock: C) -> Self {
        Self {
            board,
            transport,
            storage,
            serial,
            clock,
        }
    }
}
