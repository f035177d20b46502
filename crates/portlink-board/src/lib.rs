//! Board side of the portlink bridge.
//!
//! Two independent port command machines parse opcode streams and execute
//! them against a peripheral backend; a channel multiplexer frames their
//! replies into the shared 5-byte-header protocol. The provided backend is
//! a simulator, so a full board can be served over a Unix socket or TCP
//! with `BoardSession`.

pub mod error;
pub mod machine;
pub mod mux;
pub mod peripherals;
pub mod session;

pub use error::{BoardError, Result};
pub use machine::{PortMachine, PortMode, PortState, ARG_SIZE, BUF_SIZE};
pub use mux::ChannelMux;
pub use peripherals::{Peripherals, Pull, SimPeripherals};
pub use session::BoardSession;
