use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::demux::{PortEvent, Reply, ReplyCallback, ReplyDemux};
use crate::error::{HostError, Result};
use crate::pin::{Pin, PinCaps, PinEvent, PullMode, PINS_PER_PORT};
use portlink_wire::{opcode, Channel};

/// Name of a physical port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortName {
    A,
    B,
}

impl PortName {
    pub fn channel(self) -> Channel {
        match self {
            PortName::A => Channel::PortA,
            PortName::B => Channel::PortB,
        }
    }
}

impl std::fmt::Display for PortName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortName::A => write!(f, "A"),
            PortName::B => write!(f, "B"),
        }
    }
}

/// Handler for received UART data.
pub type UartHandler = Box<dyn FnMut(&[u8])>;
/// Handler for async event bytes outside the pin/UART ranges.
pub type AsyncHandler = Box<dyn FnMut(u8)>;

/// Marker byte used for the ECHO-based write barrier.
const SYNC_BYTE: u8 = 0x88;

/// One physical port as seen from the host: accumulates outgoing command
/// bytes for the next frame exchange, owns the reply demultiplexer, the
/// eight pins, and the event subscription registries.
///
/// Capability violations are rejected synchronously here, before any bytes
/// are queued.
pub struct Port {
    name: PortName,
    out_buf: BytesMut,
    demux: ReplyDemux,
    pins: Vec<Pin>,
    uart_handlers: Vec<UartHandler>,
    async_handlers: Vec<AsyncHandler>,
    i2c_enabled: bool,
    faulted: bool,
}

impl Port {
    pub fn new(name: PortName) -> Self {
        let full_adc = name == PortName::B;
        let pins = (0..PINS_PER_PORT)
            .map(|i| Pin::new(i, PinCaps::for_pin(i, full_adc)))
            .collect();
        Self {
            name,
            out_buf: BytesMut::new(),
            demux: ReplyDemux::new(),
            pins,
            uart_handlers: Vec::new(),
            async_handlers: Vec::new(),
            i2c_enabled: false,
            faulted: false,
        }
    }

    pub fn name(&self) -> PortName {
        self.name
    }

    /// Pin accessor for capability queries.
    pub fn pin(&self, index: u8) -> Result<&Pin> {
        self.pins
            .get(index as usize)
            .ok_or_else(|| HostError::unsupported(format!("no pin {index}; pins are 0-7")))
    }

    fn check_open(&self) -> Result<()> {
        if self.faulted {
            return Err(HostError::Closed);
        }
        Ok(())
    }

    fn check_pin(&self, index: u8) -> Result<()> {
        self.pin(index).map(|_| ())
    }

    /// Queue a command and register its reply expectation.
    pub fn submit(
        &mut self,
        op: u8,
        args: &[u8],
        expected_size: usize,
        callback: ReplyCallback,
    ) -> Result<()> {
        self.check_open()?;
        self.out_buf.put_u8(op);
        self.out_buf.put_slice(args);
        self.demux.enqueue(expected_size, callback);
        trace!(port = %self.name, op = opcode::name(op), expected_size, "submitted");
        Ok(())
    }

    fn write_raw(&mut self, data: &[u8]) {
        self.out_buf.put_slice(data);
    }

    /// Queue an ECHO round-trip as a write barrier: the callback fires once
    /// everything queued before it has been executed.
    pub fn sync(&mut self, callback: Option<ReplyCallback>) -> Result<()> {
        self.check_open()?;
        if let Some(callback) = callback {
            self.write_raw(&[opcode::ECHO, 1, SYNC_BYTE]);
            self.demux.enqueue(1, callback);
        }
        Ok(())
    }

    /// Queue raw command bytes followed by an optional sync barrier.
    pub fn command(&mut self, data: &[u8], callback: Option<ReplyCallback>) -> Result<()> {
        self.check_open()?;
        self.write_raw(data);
        self.sync(callback)
    }

    /// Queue raw command bytes expecting a single status byte back.
    pub fn status(&mut self, data: &[u8], callback: ReplyCallback) -> Result<()> {
        self.check_open()?;
        self.write_raw(data);
        self.demux.enqueue(0, callback);
        Ok(())
    }

    /// Queue a transmit-only transfer. The protocol caps a single TX at 255
    /// bytes, so larger buffers are split into consecutive commands.
    pub fn tx(&mut self, data: &[u8], callback: Option<ReplyCallback>) -> Result<()> {
        self.check_open()?;
        if data.is_empty() {
            return Err(HostError::unsupported("tx buffer must be non-empty"));
        }
        for chunk in data.chunks(u8::MAX as usize) {
            self.write_raw(&[opcode::TX, chunk.len() as u8]);
            self.write_raw(chunk);
        }
        self.sync(callback)
    }

    /// Queue a receive-only transfer of `len` bytes.
    pub fn rx(&mut self, len: usize, callback: ReplyCallback) -> Result<()> {
        self.check_open()?;
        if len == 0 || len > u8::MAX as usize {
            return Err(HostError::unsupported("rx length must be within 1-255"));
        }
        self.write_raw(&[opcode::RX, len as u8]);
        self.demux.enqueue(len, callback);
        Ok(())
    }

    /// Queue a full-duplex transfer.
    pub fn txrx(&mut self, data: &[u8], callback: ReplyCallback) -> Result<()> {
        self.check_open()?;
        if data.is_empty() || data.len() > u8::MAX as usize {
            return Err(HostError::unsupported(
                "txrx buffer length must be within 1-255",
            ));
        }
        self.write_raw(&[opcode::TXRX, data.len() as u8]);
        self.write_raw(data);
        self.demux.enqueue(data.len(), callback);
        Ok(())
    }

    pub fn high(&mut self, pin: u8, callback: Option<ReplyCallback>) -> Result<()> {
        self.check_pin(pin)?;
        self.command(&[opcode::GPIO_HIGH, pin], callback)
    }

    pub fn low(&mut self, pin: u8, callback: Option<ReplyCallback>) -> Result<()> {
        self.check_pin(pin)?;
        self.command(&[opcode::GPIO_LOW, pin], callback)
    }

    pub fn toggle(&mut self, pin: u8, callback: Option<ReplyCallback>) -> Result<()> {
        self.check_pin(pin)?;
        self.command(&[opcode::GPIO_TOGGLE, pin], callback)
    }

    pub fn output(&mut self, pin: u8, level: bool, callback: Option<ReplyCallback>) -> Result<()> {
        if level {
            self.high(pin, callback)
        } else {
            self.low(pin, callback)
        }
    }

    pub fn input(&mut self, pin: u8, callback: Option<ReplyCallback>) -> Result<()> {
        self.check_pin(pin)?;
        self.command(&[opcode::GPIO_INPUT, pin], callback)
    }

    /// Read a pin, configuring it as an input first.
    pub fn read(&mut self, pin: u8, callback: ReplyCallback) -> Result<()> {
        self.check_pin(pin)?;
        self.status(&[opcode::GPIO_IN, pin], callback)
    }

    /// Read a pin without touching its direction.
    pub fn raw_read(&mut self, pin: u8, callback: ReplyCallback) -> Result<()> {
        self.check_pin(pin)?;
        self.status(&[opcode::GPIO_RAW_READ, pin], callback)
    }

    /// Configure a pin's internal pull resistor.
    pub fn pull(
        &mut self,
        pin: u8,
        mode: PullMode,
        callback: Option<ReplyCallback>,
    ) -> Result<()> {
        if !self.pin(pin)?.caps().pull {
            return Err(HostError::unsupported(format!(
                "internal pull resistors are not available on pin {pin}; use pins 2-7"
            )));
        }
        self.command(&[opcode::GPIO_PULL, pin | (mode.wire_mode() << 4)], callback)
    }

    /// Sample the ADC. The callback receives a DATA reply with two bytes,
    /// little-endian, out of [`crate::timing::ANALOG_RESOLUTION`].
    pub fn analog_read(&mut self, pin: u8, callback: ReplyCallback) -> Result<()> {
        if !self.pin(pin)?.caps().adc {
            return Err(HostError::unsupported(format!(
                "analog read is not supported on pin {pin}; \
                 port A supports pins 4 and 7, port B supports all pins"
            )));
        }
        self.check_open()?;
        self.write_raw(&[opcode::ANALOG_READ, pin]);
        self.demux.enqueue(2, callback);
        Ok(())
    }

    /// Drive the DAC. Only pin 7 of port B has one.
    pub fn analog_write(&mut self, pin: u8, value: f64) -> Result<()> {
        if self.name != PortName::B || pin != 7 {
            return Err(HostError::unsupported(
                "analog write can only be used on pin 7 of port B",
            ));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(HostError::unsupported(
                "analog write level must be between 0 and 1",
            ));
        }
        self.check_open()?;
        let data = (value * f64::from(0x3FFu16)) as u16;
        self.write_raw(&[opcode::ANALOG_WRITE, (data >> 8) as u8, (data & 0xFF) as u8]);
        Ok(())
    }

    /// Set a PWM duty cycle against the configured bank period.
    pub fn pwm_duty_cycle(&mut self, pin: u8, duty_cycle: f64, period: u16) -> Result<()> {
        if !self.pin(pin)?.caps().pwm {
            return Err(HostError::unsupported(format!(
                "PWM is not supported on pin {pin}; use pin 5 or 6"
            )));
        }
        if !(0.0..=1.0).contains(&duty_cycle) {
            return Err(HostError::unsupported(
                "PWM duty cycle must be between 0 and 1",
            ));
        }
        if period == 0 {
            return Err(HostError::unsupported(
                "PWM frequency is not configured; set the bank frequency before the duty cycle",
            ));
        }
        self.check_open()?;
        let ticks = (duty_cycle * f64::from(period)).floor() as u16;
        self.write_raw(&[
            opcode::PWM_DUTY_CYCLE,
            pin,
            (ticks >> 8) as u8,
            (ticks & 0xFF) as u8,
        ]);
        Ok(())
    }

    /// Subscribe to a pin event, arming the pin's interrupt on the wire.
    pub fn watch(&mut self, pin: u8, event: PinEvent, handler: crate::pin::PinHandler) -> Result<()> {
        self.check_open()?;
        self.check_pin(pin)?;
        self.pins[pin as usize].arm(event)?;
        self.write_raw(&[opcode::GPIO_INT, pin | (event.wire_mode() << 4)]);
        self.pins[pin as usize].subscribe(event, handler);
        Ok(())
    }

    /// Disarm a pin's interrupt and drop its subscriptions.
    pub fn unwatch(&mut self, pin: u8) -> Result<()> {
        self.check_open()?;
        self.check_pin(pin)?;
        for event in [
            PinEvent::Rise,
            PinEvent::Fall,
            PinEvent::Change,
            PinEvent::High,
            PinEvent::Low,
        ] {
            self.pins[pin as usize].unsubscribe_all(event);
        }
        self.pins[pin as usize].disarm();
        self.write_raw(&[opcode::GPIO_INT, pin]);
        Ok(())
    }

    /// Subscribe to received UART data.
    pub fn on_uart(&mut self, handler: UartHandler) {
        self.uart_handlers.push(handler);
    }

    /// Subscribe to async event bytes outside the pin/UART ranges.
    pub fn on_async(&mut self, handler: AsyncHandler) {
        self.async_handlers.push(handler);
    }

    pub(crate) fn i2c_enabled(&self) -> bool {
        self.i2c_enabled
    }

    pub(crate) fn set_i2c_enabled(&mut self, on: bool) {
        self.i2c_enabled = on;
    }

    /// Whether command bytes are waiting for the next frame exchange.
    pub fn has_outgoing(&self) -> bool {
        !self.out_buf.is_empty()
    }

    /// Number of commands still awaiting replies.
    pub fn pending_replies(&self) -> usize {
        self.demux.pending()
    }

    /// Take up to `max` outgoing bytes for one frame. Commands may split at
    /// arbitrary byte boundaries; the port machine parses across frames.
    pub(crate) fn take_outgoing(&mut self, max: usize) -> Bytes {
        let n = self.out_buf.len().min(max);
        self.out_buf.split_to(n).freeze()
    }

    /// Feed reply bytes received for this port and dispatch the resulting
    /// events through the subscription registries.
    ///
    /// A demultiplexer fault poisons the port: subsequent submissions fail
    /// with [`HostError::Closed`] until the port is reopened.
    pub fn process_incoming(&mut self, data: &[u8]) -> Result<()> {
        let events = match self.demux.feed(data, &mut self.pins) {
            Ok(events) => events,
            Err(err) => {
                self.faulted = true;
                return Err(err);
            }
        };

        for event in events {
            match event {
                PortEvent::Pin { pin, event, level } => {
                    self.pins[pin as usize].dispatch(event, level);
                    // A fired level interrupt was disarmed by the demux;
                    // tell the coprocessor to stop watching the line too.
                    if event.is_one_shot() {
                        self.write_raw(&[opcode::GPIO_INT, pin]);
                    }
                }
                PortEvent::UartRx(data) => {
                    for handler in self.uart_handlers.iter_mut() {
                        handler(&data);
                    }
                }
                PortEvent::Async(byte) => {
                    for handler in self.async_handlers.iter_mut() {
                        handler(byte);
                    }
                }
            }
        }
        Ok(())
    }

    /// Abandon all pending replies without invoking their callbacks and
    /// mark the port unusable. Called on close/teardown.
    pub fn abandon(&mut self) {
        self.demux.abandon();
        self.faulted = true;
    }
}

/// Map a single-byte HIGH/LOW reply to a boolean level.
pub fn level_from_reply(reply: &Reply) -> Option<bool> {
    match reply {
        Reply::High => Some(true),
        Reply::Low => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn discard() -> ReplyCallback {
        Box::new(|_| {})
    }

    #[test]
    fn submit_queues_bytes_and_expectation() {
        let mut port = Port::new(PortName::A);
        port.submit(opcode::ANALOG_READ, &[4], 2, discard()).unwrap();
        assert!(port.has_outgoing());
        assert_eq!(port.pending_replies(), 1);
        assert_eq!(port.take_outgoing(255).as_ref(), &[opcode::ANALOG_READ, 4]);
    }

    #[test]
    fn command_without_callback_skips_sync() {
        let mut port = Port::new(PortName::A);
        port.high(2, None).unwrap();
        assert_eq!(port.take_outgoing(255).as_ref(), &[opcode::GPIO_HIGH, 2]);
        assert_eq!(port.pending_replies(), 0);
    }

    #[test]
    fn command_with_callback_appends_echo_barrier() {
        let mut port = Port::new(PortName::A);
        port.high(2, Some(discard())).unwrap();
        assert_eq!(
            port.take_outgoing(255).as_ref(),
            &[opcode::GPIO_HIGH, 2, opcode::ECHO, 1, SYNC_BYTE]
        );
        assert_eq!(port.pending_replies(), 1);
    }

    #[test]
    fn tx_chunks_large_buffers() {
        let mut port = Port::new(PortName::A);
        let data = vec![0xEE; 300];
        port.tx(&data, None).unwrap();
        let wire = port.take_outgoing(usize::MAX);
        assert_eq!(wire[0], opcode::TX);
        assert_eq!(wire[1], 255);
        assert_eq!(wire[2 + 255], opcode::TX);
        assert_eq!(wire[2 + 255 + 1], 45);
        assert_eq!(wire.len(), 2 + 255 + 2 + 45);
    }

    #[test]
    fn tx_rejects_empty_buffer() {
        let mut port = Port::new(PortName::A);
        assert!(matches!(
            port.tx(&[], None),
            Err(HostError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn rx_rejects_out_of_range_lengths() {
        let mut port = Port::new(PortName::A);
        assert!(port.rx(0, discard()).is_err());
        assert!(port.rx(256, discard()).is_err());
        assert!(port.rx(255, discard()).is_ok());
    }

    #[test]
    fn analog_read_rejects_non_adc_pin_on_port_a() {
        let mut port = Port::new(PortName::A);
        let err = port.analog_read(0, discard()).unwrap_err();
        assert!(matches!(err, HostError::UnsupportedOperation(_)));
        assert!(!port.has_outgoing(), "no bytes may be queued on rejection");

        // Port B samples on every pin.
        let mut port = Port::new(PortName::B);
        port.analog_read(0, discard()).unwrap();
        assert!(port.has_outgoing());
    }

    #[test]
    fn analog_write_restricted_to_b7() {
        let mut port = Port::new(PortName::A);
        assert!(port.analog_write(7, 0.5).is_err());

        let mut port = Port::new(PortName::B);
        assert!(port.analog_write(6, 0.5).is_err());
        assert!(port.analog_write(7, 1.5).is_err());
        port.analog_write(7, 0.5).unwrap();
        let wire = port.take_outgoing(255);
        assert_eq!(wire[0], opcode::ANALOG_WRITE);
        assert_eq!(((wire[1] as u16) << 8) | wire[2] as u16, 0x1FF);
    }

    #[test]
    fn pwm_requires_configured_period() {
        let mut port = Port::new(PortName::A);
        let err = port.pwm_duty_cycle(5, 0.5, 0).unwrap_err();
        assert!(matches!(err, HostError::UnsupportedOperation(_)));

        port.pwm_duty_cycle(5, 0.5, 9600).unwrap();
        let wire = port.take_outgoing(255);
        assert_eq!(wire.as_ref(), &[opcode::PWM_DUTY_CYCLE, 5, 0x12, 0xC0]);
    }

    #[test]
    fn pwm_rejects_non_pwm_pin() {
        let mut port = Port::new(PortName::A);
        assert!(port.pwm_duty_cycle(3, 0.5, 9600).is_err());
    }

    #[test]
    fn pull_rejects_unsupported_pin() {
        let mut port = Port::new(PortName::A);
        assert!(port.pull(0, PullMode::PullUp, None).is_err());
        port.pull(3, PullMode::PullUp, None).unwrap();
        let wire = port.take_outgoing(255);
        assert_eq!(wire.as_ref(), &[opcode::GPIO_PULL, 3 | (1 << 4)]);
    }

    #[test]
    fn watch_arms_interrupt_on_wire() {
        let mut port = Port::new(PortName::A);
        port.watch(2, PinEvent::Rise, Box::new(|_| {})).unwrap();
        let wire = port.take_outgoing(255);
        assert_eq!(wire.as_ref(), &[opcode::GPIO_INT, 2 | (1 << 4)]);
        assert_eq!(port.pin(2).unwrap().interrupt_mode(), Some(PinEvent::Change));
    }

    #[test]
    fn watch_rejects_non_interrupt_pin() {
        let mut port = Port::new(PortName::A);
        let err = port.watch(3, PinEvent::Rise, Box::new(|_| {})).unwrap_err();
        assert!(matches!(err, HostError::UnsupportedOperation(_)));
        assert!(!port.has_outgoing());
    }

    #[test]
    fn incoming_events_reach_subscribers() {
        let mut port = Port::new(PortName::A);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        port.watch(2, PinEvent::Change, Box::new(move |level| s.borrow_mut().push(level)))
            .unwrap();
        port.take_outgoing(255);

        port.process_incoming(&[portlink_wire::reply::encode_pin_change(2, true)])
            .unwrap();
        port.process_incoming(&[portlink_wire::reply::encode_pin_change(2, false)])
            .unwrap();
        assert_eq!(*seen.borrow(), vec![true, false]);
    }

    #[test]
    fn uart_handler_receives_chunks() {
        let mut port = Port::new(PortName::A);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        port.on_uart(Box::new(move |data| s.borrow_mut().extend_from_slice(data)));

        port.process_incoming(&[portlink_wire::reply::ASYNC_UART_RX, 2, 0x10, 0x20])
            .unwrap();
        assert_eq!(*seen.borrow(), vec![0x10, 0x20]);
    }

    #[test]
    fn fault_poisons_the_port() {
        let mut port = Port::new(PortName::A);
        let err = port
            .process_incoming(&[portlink_wire::reply::HIGH])
            .unwrap_err();
        assert!(matches!(err, HostError::UnexpectedReply { .. }));

        let err = port.high(2, None).unwrap_err();
        assert!(matches!(err, HostError::Closed));
    }
}
