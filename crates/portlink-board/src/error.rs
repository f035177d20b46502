use portlink_transport::TransportError;
use portlink_wire::WireError;

/// Errors that can occur on the board side of the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    /// Reply accumulation exceeded the fixed per-port buffer capacity.
    #[error("reply buffer overflow ({len} bytes, capacity {cap})")]
    BufferOverflow { len: usize, cap: usize },

    /// A command chunk larger than the per-port buffer was delivered.
    #[error("command chunk too large ({len} bytes, capacity {cap})")]
    CommandTooLarge { len: usize, cap: usize },

    /// Frame-level error on the inbound stream.
    #[error("frame error: {0}")]
    Wire(#[from] WireError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An I/O error occurred on the session stream.
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BoardError>;
