use std::cell::RefCell;
use std::io::{ErrorKind, Read, Write};
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::demux::Reply;
use crate::error::{HostError, Result};
use crate::port::{level_from_reply, Port, PortName};
use crate::timing::{pwm_settings, PwmSettings, ANALOG_RESOLUTION};
use portlink_transport::{Endpoint, LinkStream};
use portlink_wire::{Channel, Header, WireError, HEADER_SIZE, RESPONSE_MARKER};

/// Only TCC bank 0 is driven; this may be expanded to enable PWM on more
/// pins.
const PWM_TCC_ID: u8 = 0;

/// Maximum payload bytes one frame carries per channel.
const FRAME_BUDGET: usize = u8::MAX as usize;

/// Tuning knobs for the bridge's header exchange.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Deadline for each blocking read of a response.
    pub read_timeout: Duration,
    /// Retry bound for header delivery.
    pub max_retries: u32,
    /// Base backoff between header delivery retries (scales linearly).
    pub retry_backoff: Duration,
    /// Number of frame exchanges a blocking helper performs while waiting
    /// for its reply before giving up.
    pub poll_attempts: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            max_retries: 15,
            retry_backoff: Duration::from_millis(2),
            poll_attempts: 50,
        }
    }
}

/// Host-side bridge master.
///
/// Owns the transport stream and both ports. Each [`exchange`](Self::exchange)
/// performs one half-duplex frame cycle: request header and queued command
/// payload out, response header and reply payload in, reply bytes dispatched
/// to each port's demultiplexer. Nothing else touches the stream.
pub struct Bridge {
    stream: LinkStream,
    port_a: Port,
    port_b: Port,
    pwm_bank: Option<PwmSettings>,
    config: BridgeConfig,
    closed: bool,
}

impl Bridge {
    /// Connect to a board at the given endpoint.
    pub fn connect(endpoint: &Endpoint) -> Result<Self> {
        Self::connect_with_config(endpoint, BridgeConfig::default())
    }

    /// Connect with explicit configuration.
    pub fn connect_with_config(endpoint: &Endpoint, config: BridgeConfig) -> Result<Self> {
        let stream = portlink_transport::connect(endpoint)?;
        Self::from_stream(stream, config)
    }

    /// Build a bridge over an already connected stream.
    pub fn from_stream(stream: LinkStream, config: BridgeConfig) -> Result<Self> {
        stream.set_read_timeout(Some(config.read_timeout))?;
        stream.set_write_timeout(Some(config.read_timeout))?;
        Ok(Self {
            stream,
            port_a: Port::new(PortName::A),
            port_b: Port::new(PortName::B),
            pwm_bank: None,
            config,
            closed: false,
        })
    }

    pub fn port(&self, name: PortName) -> &Port {
        match name {
            PortName::A => &self.port_a,
            PortName::B => &self.port_b,
        }
    }

    pub fn port_mut(&mut self, name: PortName) -> &mut Port {
        match name {
            PortName::A => &mut self.port_a,
            PortName::B => &mut self.port_b,
        }
    }

    /// Perform one frame exchange, even when no command bytes are queued —
    /// an empty exchange polls the board for buffered replies and async
    /// events.
    pub fn exchange(&mut self) -> Result<()> {
        if self.closed {
            return Err(HostError::Closed);
        }

        let chunk_a = self.port_a.take_outgoing(FRAME_BUDGET);
        let chunk_b = self.port_b.take_outgoing(FRAME_BUDGET);

        let mut header = Header::request(0, 0, [0, chunk_a.len() as u8, chunk_b.len() as u8]);
        header.set_opened(Channel::PortA, true);
        header.set_opened(Channel::PortB, true);
        header.set_writable(Channel::PortA, !chunk_a.is_empty());
        header.set_writable(Channel::PortB, !chunk_b.is_empty());

        self.write_with_retry(&header.encode())?;
        if !chunk_a.is_empty() || !chunk_b.is_empty() {
            trace!(len_a = chunk_a.len(), len_b = chunk_b.len(), "sending command payload");
            self.stream.write_all(&chunk_a)?;
            self.stream.write_all(&chunk_b)?;
            self.stream.flush()?;
        }

        let response = self.read_response_header()?;
        let len_usb = response.len(Channel::Usb);
        let len_a = response.len(Channel::PortA);
        let len_b = response.len(Channel::PortB);

        let mut payload = vec![0u8; len_usb + len_a + len_b];
        self.read_exact_timed(&mut payload)?;

        // The USB slice is the reserved board channel; ports follow it.
        let slice_a = &payload[len_usb..len_usb + len_a];
        let slice_b = &payload[len_usb + len_a..];
        if !slice_a.is_empty() {
            self.port_a.process_incoming(slice_a)?;
        }
        if !slice_b.is_empty() {
            self.port_b.process_incoming(slice_b)?;
        }
        Ok(())
    }

    /// Keep exchanging until both ports have flushed their queued commands.
    pub fn flush(&mut self) -> Result<()> {
        while self.port_a.has_outgoing() || self.port_b.has_outgoing() {
            self.exchange()?;
        }
        Ok(())
    }

    fn write_with_retry(&mut self, bytes: &[u8]) -> Result<()> {
        let mut attempts = 0u32;
        loop {
            let result = self
                .stream
                .write_all(bytes)
                .and_then(|()| self.stream.flush());
            match result {
                Ok(()) => return Ok(()),
                Err(err) if is_retryable(&err) => {
                    attempts += 1;
                    if attempts >= self.config.max_retries {
                        return Err(HostError::TooManyRetries { attempts });
                    }
                    debug!(attempts, "header delivery retry");
                    std::thread::sleep(self.config.retry_backoff * attempts);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn read_response_header(&mut self) -> Result<Header> {
        let mut buf = [0u8; HEADER_SIZE];
        self.read_exact_timed(&mut buf)?;
        let header = Header::decode(&buf)?;
        if header.marker != RESPONSE_MARKER {
            return Err(WireError::Marker(header.marker).into());
        }
        Ok(header)
    }

    fn read_exact_timed(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.stream.read_exact(buf).map_err(|err| {
            if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) {
                HostError::ReadTimeout(self.config.read_timeout)
            } else {
                err.into()
            }
        })
    }

    /// Exchange frames until the slot is filled or the poll budget runs out.
    fn wait_for<T>(&mut self, slot: Rc<RefCell<Option<Result<T>>>>) -> Result<T> {
        for _ in 0..self.config.poll_attempts {
            if let Some(result) = slot.borrow_mut().take() {
                return result;
            }
            self.exchange()?;
        }
        if let Some(result) = slot.borrow_mut().take() {
            return result;
        }
        Err(HostError::ReadTimeout(self.config.read_timeout))
    }

    /// Drive a pin high and flush.
    pub fn set_high(&mut self, name: PortName, pin: u8) -> Result<()> {
        self.port_mut(name).high(pin, None)?;
        self.flush()
    }

    /// Drive a pin low and flush.
    pub fn set_low(&mut self, name: PortName, pin: u8) -> Result<()> {
        self.port_mut(name).low(pin, None)?;
        self.flush()
    }

    /// Toggle a pin and flush.
    pub fn toggle(&mut self, name: PortName, pin: u8) -> Result<()> {
        self.port_mut(name).toggle(pin, None)?;
        self.flush()
    }

    /// Read a pin level, blocking until the reply arrives.
    pub fn read_pin(&mut self, name: PortName, pin: u8) -> Result<bool> {
        let slot = Rc::new(RefCell::new(None));
        let filled = Rc::clone(&slot);
        self.port_mut(name).read(
            pin,
            Box::new(move |result| {
                *filled.borrow_mut() = Some(result.and_then(|reply| {
                    level_from_reply(&reply)
                        .ok_or_else(|| HostError::unsupported("expected a HIGH/LOW reply"))
                }));
            }),
        )?;
        self.wait_for(slot)
    }

    /// Sample the ADC, blocking until the reply arrives. Returns the level
    /// scaled to 0.0..1.0.
    pub fn analog_read(&mut self, name: PortName, pin: u8) -> Result<f64> {
        let slot = Rc::new(RefCell::new(None));
        let filled = Rc::clone(&slot);
        self.port_mut(name).analog_read(
            pin,
            Box::new(move |result| {
                *filled.borrow_mut() = Some(result.and_then(|reply| match reply {
                    Reply::Data(data) if data.len() == 2 => {
                        let raw = u16::from_le_bytes([data[0], data[1]]);
                        Ok(f64::from(raw) / f64::from(ANALOG_RESOLUTION))
                    }
                    _ => Err(HostError::unsupported("expected a 2-byte DATA reply")),
                }));
            }),
        )?;
        self.wait_for(slot)
    }

    /// Drive the DAC (port B pin 7) and flush.
    pub fn analog_write(&mut self, name: PortName, pin: u8, value: f64) -> Result<()> {
        self.port_mut(name).analog_write(pin, value)?;
        self.flush()
    }

    /// Round-trip an ECHO sync byte, blocking until it comes back. Useful
    /// as a liveness probe.
    pub fn ping(&mut self, name: PortName) -> Result<()> {
        let slot = Rc::new(RefCell::new(None));
        let filled = Rc::clone(&slot);
        self.port_mut(name).sync(Some(Box::new(move |result| {
            *filled.borrow_mut() = Some(result.map(|_| ()));
        })))?;
        self.wait_for(slot)
    }

    /// Configure the PWM bank frequency shared by both ports' PWM pins.
    pub fn pwm_frequency(&mut self, frequency: u32) -> Result<()> {
        let settings = pwm_settings(frequency)?;
        self.pwm_bank = Some(settings);

        let packet = [
            portlink_wire::opcode::PWM_PERIOD,
            (settings.prescalar_index << 4) | PWM_TCC_ID,
            (settings.period >> 8) as u8,
            (settings.period & 0xFF) as u8,
        ];
        // The bank is board-wide; either port's machine programs it.
        self.port_a.command(&packet, None)?;
        self.flush()
    }

    /// Set a pin's PWM duty cycle against the configured bank frequency.
    pub fn pwm_duty_cycle(&mut self, name: PortName, pin: u8, duty_cycle: f64) -> Result<()> {
        let period = self.pwm_bank.map_or(0, |s| s.period);
        self.port_mut(name).pwm_duty_cycle(pin, duty_cycle, period)?;
        self.flush()
    }

    /// Tear down the transport. Pending reply entries on both ports are
    /// abandoned without their callbacks being invoked; callers must treat
    /// closure as an implicit abort of outstanding operations.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.port_a.abandon();
        self.port_b.abandon();
        self.stream.shutdown()?;
        Ok(())
    }
}

fn is_retryable(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}
