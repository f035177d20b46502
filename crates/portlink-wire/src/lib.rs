//! Wire protocol for the portlink bridge.
//!
//! Both halves of the link share this vocabulary:
//! - A fixed 5-byte header multiplexing three logical channels (USB/board,
//!   Port A, Port B) over one transport — marker byte, channel flag bitmask,
//!   and one payload-length byte per channel.
//! - A single-byte opcode table with fixed argument counts per command.
//! - Reply markers, including the asynchronous event range for pin changes
//!   and UART receive data.

pub mod error;
pub mod header;
pub mod opcode;
pub mod reply;

pub use error::{Result, WireError};
pub use header::{
    Channel, Header, HEADER_SIZE, NUM_CHANNELS, REQUEST_MARKER, RESPONSE_MARKER,
};
