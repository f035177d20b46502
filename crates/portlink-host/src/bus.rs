//! Peripheral front-ends: SPI, I2C, and UART command builders.
//!
//! Each front-end validates its configuration synchronously, computes the
//! coprocessor's register values, and expands high-level operations into
//! the opcode sequences the port machine executes. They operate on a
//! [`Port`] passed per call; the port owns all queued state.

use crate::demux::ReplyCallback;
use crate::error::{HostError, Result};
use crate::port::Port;
use crate::timing::{i2c_baud, spi_clock_settings, uart_baud_setting};
use portlink_wire::opcode;

/// An I2C device handle: a 7-bit address plus the bus frequency.
#[derive(Debug, Clone, Copy)]
pub struct I2c {
    address: u8,
    frequency: u32,
}

impl I2c {
    /// Default bus frequency: 100 kHz.
    pub const DEFAULT_FREQUENCY: u32 = 100_000;

    /// Create a device handle and enable the I2C bus on the port if it is
    /// not enabled yet.
    ///
    /// The SERCOM supports 100 kHz and 400 kHz without clock modification;
    /// anything else is rejected.
    pub fn new(port: &mut Port, address: u8, frequency: u32) -> Result<Self> {
        if frequency != 100_000 && frequency != 400_000 {
            return Err(HostError::unsupported(
                "I2C frequency must be 100kHz or 400kHz",
            ));
        }

        if !port.i2c_enabled() {
            port.command(&[opcode::ENABLE_I2C, i2c_baud(frequency)], None)?;
            port.set_i2c_enabled(true);
        }

        Ok(Self { address, frequency })
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    /// The baud register value sent to the coprocessor.
    pub fn baudrate(&self) -> u8 {
        i2c_baud(self.frequency)
    }

    /// Write `data` to the device: START (write), TX, STOP.
    pub fn send(&self, port: &mut Port, data: &[u8], callback: Option<ReplyCallback>) -> Result<()> {
        port.command(&[opcode::START, self.address << 1], None)?;
        port.tx(data, None)?;
        port.command(&[opcode::STOP], callback)
    }

    /// Read `len` bytes from the device: START (read), RX, STOP.
    pub fn read(&self, port: &mut Port, len: usize, callback: ReplyCallback) -> Result<()> {
        port.command(&[opcode::START, self.address << 1 | 1], None)?;
        port.rx(len, callback)?;
        port.command(&[opcode::STOP], None)
    }

    /// Write `tx` then read `rx_len` bytes with a repeated start.
    pub fn transfer(
        &self,
        port: &mut Port,
        tx: &[u8],
        rx_len: usize,
        callback: ReplyCallback,
    ) -> Result<()> {
        if !tx.is_empty() {
            port.command(&[opcode::START, self.address << 1], None)?;
            port.tx(tx, None)?;
        }
        port.command(&[opcode::START, self.address << 1 | 1], None)?;
        port.rx(rx_len, callback)?;
        port.command(&[opcode::STOP], None)
    }
}

/// SPI bus configuration.
#[derive(Debug, Clone, Copy)]
pub struct SpiConfig {
    /// Clock speed in Hz, 368..=24_000_000. Default 2 MHz.
    pub clock_speed: u32,
    /// Clock polarity.
    pub cpol: bool,
    /// Clock phase.
    pub cpha: bool,
    /// Chip-select pin driven around each transfer, if any.
    pub chip_select: Option<u8>,
    /// Whether chip select is active-high (default active-low).
    pub cs_active_high: bool,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            clock_speed: 2_000_000,
            cpol: false,
            cpha: false,
            chip_select: None,
            cs_active_high: false,
        }
    }
}

impl SpiConfig {
    /// Set cpol/cpha from a standard SPI data mode (0-3).
    pub fn with_data_mode(mut self, mode: u8) -> Self {
        self.cpol = mode & 0x1 != 0;
        self.cpha = mode & 0x2 != 0;
        self
    }
}

/// An enabled SPI bus on a port.
#[derive(Debug, Clone, Copy)]
pub struct Spi {
    chip_select: Option<u8>,
    cs_active_high: bool,
}

impl Spi {
    /// Enable SPI on the port with the given configuration.
    pub fn new(port: &mut Port, config: SpiConfig) -> Result<Self> {
        let (clock_reg, clock_div) = spi_clock_settings(config.clock_speed)?;

        let spi = Self {
            chip_select: config.chip_select,
            cs_active_high: config.cs_active_high,
        };
        // Park chip select in its inactive state before the bus comes up.
        spi.deassert_cs(port)?;

        let mode = (config.cpol as u8) | ((config.cpha as u8) << 1);
        port.command(&[opcode::ENABLE_SPI, mode, clock_reg, clock_div], None)?;
        Ok(spi)
    }

    fn assert_cs(&self, port: &mut Port) -> Result<()> {
        if let Some(pin) = self.chip_select {
            port.output(pin, self.cs_active_high, None)?;
        }
        Ok(())
    }

    fn deassert_cs(&self, port: &mut Port) -> Result<()> {
        if let Some(pin) = self.chip_select {
            port.output(pin, !self.cs_active_high, None)?;
        }
        Ok(())
    }

    /// Transmit-only transfer.
    pub fn send(&self, port: &mut Port, data: &[u8], callback: Option<ReplyCallback>) -> Result<()> {
        self.assert_cs(port)?;
        port.tx(data, callback)?;
        self.deassert_cs(port)
    }

    /// Receive-only transfer.
    pub fn receive(&self, port: &mut Port, len: usize, callback: ReplyCallback) -> Result<()> {
        self.assert_cs(port)?;
        port.rx(len, callback)?;
        self.deassert_cs(port)
    }

    /// Full-duplex transfer.
    pub fn transfer(&self, port: &mut Port, data: &[u8], callback: ReplyCallback) -> Result<()> {
        self.assert_cs(port)?;
        port.txrx(data, callback)?;
        self.deassert_cs(port)
    }

    /// Disable the SPI bus.
    pub fn disable(self, port: &mut Port) -> Result<()> {
        port.command(&[opcode::DISABLE_SPI], None)
    }
}

/// An enabled UART on a port.
#[derive(Debug, Clone, Copy)]
pub struct Uart {
    baudrate: u32,
}

impl Uart {
    /// Enable the UART at the given baud rate (9600..=115200).
    pub fn new(port: &mut Port, baudrate: u32) -> Result<Self> {
        if !(9600..=115_200).contains(&baudrate) {
            return Err(HostError::unsupported(
                "UART baudrate must be between 9600 and 115200",
            ));
        }
        let setting = uart_baud_setting(baudrate);
        port.command(
            &[
                opcode::ENABLE_UART,
                (setting >> 8) as u8,
                (setting & 0xFF) as u8,
            ],
            None,
        )?;
        Ok(Self { baudrate })
    }

    pub fn baudrate(&self) -> u32 {
        self.baudrate
    }

    /// Queue data for transmission. Received data arrives through the
    /// port's UART subscription ([`Port::on_uart`]).
    pub fn write(&self, port: &mut Port, data: &[u8], callback: Option<ReplyCallback>) -> Result<()> {
        port.tx(data, callback)
    }

    /// Disable the UART.
    pub fn disable(self, port: &mut Port) -> Result<()> {
        port.command(&[opcode::DISABLE_UART], None)
    }
}
