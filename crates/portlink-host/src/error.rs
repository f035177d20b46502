use std::time::Duration;

use portlink_transport::TransportError;
use portlink_wire::WireError;

/// Errors that can occur on the host side of the bridge.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Frame-level error on the response stream.
    #[error("frame error: {0}")]
    Wire(#[from] WireError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An I/O error occurred on the link stream.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A reply byte arrived with no commands pending.
    #[error("unexpected reply byte 0x{byte:02x} with no commands pending")]
    UnexpectedReply { byte: u8 },

    /// No response arrived within the configured deadline.
    #[error("no response within {0:?}")]
    ReadTimeout(Duration),

    /// The header exchange retry bound was exceeded.
    #[error("header exchange failed after {attempts} attempts")]
    TooManyRetries { attempts: u32 },

    /// A capability check failed, or the coprocessor rejected a command.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The bridge or port session is closed/faulted and must be reopened.
    #[error("bridge session closed")]
    Closed,
}

impl HostError {
    pub(crate) fn unsupported(reason: impl Into<String>) -> Self {
        HostError::UnsupportedOperation(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, HostError>;
