use bytes::{BufMut, BytesMut};

use crate::error::{Result, WireError};

/// Frame header: marker (1) + channel flags (1) + per-channel lengths (3) = 5 bytes.
pub const HEADER_SIZE: usize = 5;

/// Marker byte for requester → board frames.
pub const REQUEST_MARKER: u8 = 0x53;

/// Marker byte for board → requester frames.
pub const RESPONSE_MARKER: u8 = 0xCA;

/// Number of logical channels multiplexed over the bridge.
pub const NUM_CHANNELS: usize = 3;

/// One of the three fixed logical lanes sharing a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Board-internal/USB channel (reserved).
    Usb,
    /// Physical port A.
    PortA,
    /// Physical port B.
    PortB,
}

impl Channel {
    /// Fixed index of this channel within the header.
    pub fn index(self) -> usize {
        match self {
            Channel::Usb => 0,
            Channel::PortA => 1,
            Channel::PortB => 2,
        }
    }

    /// All channels in header order.
    pub const ALL: [Channel; NUM_CHANNELS] = [Channel::Usb, Channel::PortA, Channel::PortB];
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Usb => write!(f, "usb"),
            Channel::PortA => write!(f, "A"),
            Channel::PortB => write!(f, "B"),
        }
    }
}

/// A decoded 5-byte bridge header.
///
/// Wire format:
/// ```text
/// ┌────────────┬────────────────────┬───────────────────────────┐
/// │ Marker (1) │ Flags (1)          │ Lengths (3)               │
/// │ 0x53/0xCA  │ bits 0-2 writable  │ USB, Port A, Port B       │
/// │            │ bits 4-6 opened    │ payload bytes, 0-255 each │
/// └────────────┴────────────────────┴───────────────────────────┘
/// ```
///
/// Length bytes are trusted at this layer; the multiplexer validates them
/// against the payload it actually buffers. A channel needing more than 255
/// bytes spans multiple frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// `REQUEST_MARKER` or `RESPONSE_MARKER`.
    pub marker: u8,
    /// Per-channel "writable" flags, bits 0-2.
    pub writable: u8,
    /// Per-channel "opened" flags, bits 4-6 of the wire byte, stored 0-2 here.
    pub opened: u8,
    /// Per-channel payload lengths in header order (USB, Port A, Port B).
    pub lengths: [u8; NUM_CHANNELS],
}

impl Header {
    /// A request header with the given per-channel payload lengths.
    pub fn request(writable: u8, opened: u8, lengths: [u8; NUM_CHANNELS]) -> Self {
        Self {
            marker: REQUEST_MARKER,
            writable,
            opened,
            lengths,
        }
    }

    /// A response header with the given per-channel payload lengths.
    pub fn response(writable: u8, opened: u8, lengths: [u8; NUM_CHANNELS]) -> Self {
        Self {
            marker: RESPONSE_MARKER,
            writable,
            opened,
            lengths,
        }
    }

    /// Encode into the 5-byte wire form.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let flags = (self.writable & 0x07) | ((self.opened & 0x07) << 4);
        [
            self.marker,
            flags,
            self.lengths[0],
            self.lengths[1],
            self.lengths[2],
        ]
    }

    /// Append the wire form to a buffer.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.put_slice(&self.encode());
    }

    /// Decode a header from exactly five bytes.
    ///
    /// Fails if the input is not exactly [`HEADER_SIZE`] bytes or the marker
    /// byte is unknown. Length bytes are not validated here.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HEADER_SIZE {
            return Err(WireError::HeaderLength(bytes.len()));
        }
        let marker = bytes[0];
        if marker != REQUEST_MARKER && marker != RESPONSE_MARKER {
            return Err(WireError::Marker(marker));
        }
        Ok(Self {
            marker,
            writable: bytes[1] & 0x07,
            opened: (bytes[1] >> 4) & 0x07,
            lengths: [bytes[2], bytes[3], bytes[4]],
        })
    }

    /// Payload length announced for a channel.
    pub fn len(&self, channel: Channel) -> usize {
        self.lengths[channel.index()] as usize
    }

    /// Total payload length announced across all channels.
    pub fn total_len(&self) -> usize {
        self.lengths.iter().map(|&l| l as usize).sum()
    }

    /// Whether the "writable" flag is set for a channel.
    pub fn is_writable(&self, channel: Channel) -> bool {
        self.writable & (1 << channel.index()) != 0
    }

    /// Whether the "opened" flag is set for a channel.
    pub fn is_opened(&self, channel: Channel) -> bool {
        self.opened & (1 << channel.index()) != 0
    }

    /// Set the "writable" flag for a channel.
    pub fn set_writable(&mut self, channel: Channel, on: bool) {
        if on {
            self.writable |= 1 << channel.index();
        } else {
            self.writable &= !(1 << channel.index());
        }
    }

    /// Set the "opened" flag for a channel.
    pub fn set_opened(&mut self, channel: Channel, on: bool) {
        if on {
            self.opened |= 1 << channel.index();
        } else {
            self.opened &= !(1 << channel.index());
        }
    }
}
