//! Host side of the portlink bridge.
//!
//! The bridge master owns one transport stream and both ports. Commands are
//! queued per port, shipped in 5-byte-header frames, and matched against
//! replies strictly in submission order; unsolicited pin-change and UART
//! events are dispatched through explicit subscription registries.
//!
//! ```no_run
//! use portlink_host::{Bridge, PortName};
//!
//! let endpoint: portlink_transport::Endpoint = "/run/portlink/board.sock".parse()?;
//! let mut bridge = Bridge::connect(&endpoint)?;
//! bridge.set_high(PortName::A, 2)?;
//! let level = bridge.read_pin(PortName::A, 2)?;
//! assert!(level);
//! # Ok::<(), portlink_host::HostError>(())
//! ```

pub mod bridge;
pub mod bus;
pub mod demux;
pub mod error;
pub mod pin;
pub mod port;
pub mod timing;

pub use bridge::{Bridge, BridgeConfig};
pub use bus::{I2c, Spi, SpiConfig, Uart};
pub use demux::{PortEvent, Reply, ReplyCallback, ReplyDemux};
pub use error::{HostError, Result};
pub use pin::{Pin, PinCaps, PinEvent, PullMode};
pub use port::{Port, PortName};
pub use timing::{pwm_settings, PwmSettings, ANALOG_RESOLUTION};
