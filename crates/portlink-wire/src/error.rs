use crate::header::HEADER_SIZE;

/// Errors that can occur while encoding or decoding bridge frames.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The header is not exactly five bytes.
    #[error("malformed frame: header must be {HEADER_SIZE} bytes, got {0}")]
    HeaderLength(usize),

    /// The header marker is neither the request nor the response marker.
    #[error("malformed frame: unknown marker byte 0x{0:02x}")]
    Marker(u8),
}

pub type Result<T> = std::result::Result<T, WireError>;
