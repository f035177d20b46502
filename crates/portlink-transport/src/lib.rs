//! Byte-stream transports for the portlink bridge.
//!
//! The bridge protocol runs over any bidirectional byte stream. This crate
//! provides the two transports portlink supports — Unix domain sockets and
//! TCP — behind one `LinkStream` type, plus endpoint parsing and a listener
//! for the board/simulator side.

pub mod endpoint;
pub mod error;
pub mod listener;
pub mod stream;

pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use listener::{connect, LinkListener};
#[cfg(unix)]
pub use stream::stream_pair;
pub use stream::LinkStream;
