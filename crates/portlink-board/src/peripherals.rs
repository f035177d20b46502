use std::collections::VecDeque;

/// Pull resistor configuration for a GPIO pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pull {
    Down,
    Up,
    #[default]
    Float,
}

impl Pull {
    /// Decode the high-nibble wire encoding. Unknown values are ignored by
    /// the command machine, matching the coprocessor's behavior.
    pub fn from_wire(mode: u8) -> Option<Self> {
        match mode {
            0 => Some(Pull::Down),
            1 => Some(Pull::Up),
            2 => Some(Pull::Float),
            _ => None,
        }
    }
}

/// Peripheral-execution backend a port's command machine dispatches into.
///
/// Each method corresponds to one hardware action. Implementations complete
/// synchronously; bus transfers started from the machine's async phase are
/// applied before the machine observes the completion.
pub trait Peripherals {
    fn pin_input(&mut self, pin: u8);
    fn pin_output(&mut self, pin: u8);
    fn pin_read(&mut self, pin: u8) -> bool;
    fn pin_high(&mut self, pin: u8);
    fn pin_low(&mut self, pin: u8);
    fn pin_toggle(&mut self, pin: u8);
    fn pin_pull(&mut self, pin: u8, pull: Pull);
    /// Arm (mode 1-5) or disarm (mode 0) an external interrupt on a pin.
    fn pin_interrupt(&mut self, pin: u8, mode: u8);

    fn adc_read(&mut self, pin: u8) -> u16;
    fn dac_write(&mut self, value: u16);

    fn pwm_duty_cycle(&mut self, pin: u8, duty: u16);
    fn pwm_period(&mut self, tcc: u8, prescalar: u8, period: u16);

    fn spi_enable(&mut self, mode: u8, clock_reg: u8, clock_div: u8);
    fn spi_disable(&mut self);
    fn spi_write(&mut self, data: &[u8]);
    fn spi_read(&mut self, len: usize) -> Vec<u8>;
    fn spi_transfer(&mut self, data: &[u8]) -> Vec<u8>;

    fn i2c_enable(&mut self, baud: u8);
    fn i2c_disable(&mut self);
    fn i2c_start(&mut self, addr: u8);
    fn i2c_stop(&mut self);
    fn i2c_write(&mut self, byte: u8);
    fn i2c_read(&mut self) -> u8;

    fn uart_enable(&mut self, baud: u16);
    fn uart_disable(&mut self);
    fn uart_write(&mut self, data: &[u8]);
}

#[derive(Debug, Clone, Copy, Default)]
struct SimPin {
    output: bool,
    level: bool,
    pull: Pull,
    interrupt_mode: u8,
}

/// Simulated peripheral backend.
///
/// Pin, ADC, and bus behavior is table-driven so tests and the simulator CLI
/// can script it: ADC values are settable per pin, SPI reads/transfers come
/// from a programmable response queue (falling back to loopback for
/// transfers and zeros for reads), I2C reads pop a programmable byte queue,
/// and UART writes can be looped back as receive data.
pub struct SimPeripherals {
    pins: [SimPin; 8],
    adc: [u16; 8],
    dac: Option<u16>,
    spi_rx: VecDeque<u8>,
    i2c_rx: VecDeque<u8>,
    i2c_log: Vec<u8>,
    uart_loopback: bool,
    uart_rx: VecDeque<Vec<u8>>,
    uart_tx_log: Vec<u8>,
}

impl Default for SimPeripherals {
    fn default() -> Self {
        Self::new()
    }
}

impl SimPeripherals {
    pub fn new() -> Self {
        Self {
            pins: [SimPin::default(); 8],
            adc: [0; 8],
            dac: None,
            spi_rx: VecDeque::new(),
            i2c_rx: VecDeque::new(),
            i2c_log: Vec::new(),
            uart_loopback: true,
            uart_rx: VecDeque::new(),
            uart_tx_log: Vec::new(),
        }
    }

    /// Set the value the ADC will report for a pin.
    pub fn set_adc(&mut self, pin: u8, value: u16) {
        self.adc[(pin & 0x07) as usize] = value;
    }

    /// Set a pin's input level, as if driven externally.
    pub fn set_level(&mut self, pin: u8, level: bool) {
        self.pins[(pin & 0x07) as usize].level = level;
    }

    /// Queue bytes for subsequent SPI reads/transfers.
    pub fn queue_spi(&mut self, data: &[u8]) {
        self.spi_rx.extend(data.iter().copied());
    }

    /// Queue bytes for subsequent I2C reads.
    pub fn queue_i2c(&mut self, data: &[u8]) {
        self.i2c_rx.extend(data.iter().copied());
    }

    /// Enable or disable UART loopback (TX data re-queued as RX).
    pub fn set_uart_loopback(&mut self, on: bool) {
        self.uart_loopback = on;
    }

    /// Pop the next pending UART receive chunk, if any.
    pub fn pop_uart_rx(&mut self) -> Option<Vec<u8>> {
        self.uart_rx.pop_front()
    }

    /// Return a chunk to the front of the UART receive queue.
    pub fn requeue_uart_rx(&mut self, data: Vec<u8>) {
        self.uart_rx.push_front(data);
    }

    /// Queue data to be delivered as UART receive bytes.
    pub fn push_uart_rx(&mut self, data: Vec<u8>) {
        self.uart_rx.push_back(data);
    }

    pub fn level(&self, pin: u8) -> bool {
        self.pins[(pin & 0x07) as usize].level
    }

    pub fn is_output(&self, pin: u8) -> bool {
        self.pins[(pin & 0x07) as usize].output
    }

    pub fn pull(&self, pin: u8) -> Pull {
        self.pins[(pin & 0x07) as usize].pull
    }

    pub fn interrupt_mode(&self, pin: u8) -> u8 {
        self.pins[(pin & 0x07) as usize].interrupt_mode
    }

    pub fn dac(&self) -> Option<u16> {
        self.dac
    }

    pub fn i2c_written(&self) -> &[u8] {
        &self.i2c_log
    }

    pub fn uart_written(&self) -> &[u8] {
        &self.uart_tx_log
    }
}

impl Peripherals for SimPeripherals {
    fn pin_input(&mut self, pin: u8) {
        self.pins[(pin & 0x07) as usize].output = false;
    }

    fn pin_output(&mut self, pin: u8) {
        self.pins[(pin & 0x07) as usize].output = true;
    }

    fn pin_read(&mut self, pin: u8) -> bool {
        self.pins[(pin & 0x07) as usize].level
    }

    fn pin_high(&mut self, pin: u8) {
        let pin = &mut self.pins[(pin & 0x07) as usize];
        pin.level = true;
        pin.output = true;
    }

    fn pin_low(&mut self, pin: u8) {
        let pin = &mut self.pins[(pin & 0x07) as usize];
        pin.level = false;
        pin.output = true;
    }

    fn pin_toggle(&mut self, pin: u8) {
        let pin = &mut self.pins[(pin & 0x07) as usize];
        pin.level = !pin.level;
        pin.output = true;
    }

    fn pin_pull(&mut self, pin: u8, pull: Pull) {
        self.pins[(pin & 0x07) as usize].pull = pull;
    }

    fn pin_interrupt(&mut self, pin: u8, mode: u8) {
        self.pins[(pin & 0x07) as usize].interrupt_mode = mode;
    }

    fn adc_read(&mut self, pin: u8) -> u16 {
        self.adc[(pin & 0x07) as usize]
    }

    fn dac_write(&mut self, value: u16) {
        self.dac = Some(value);
    }

    fn pwm_duty_cycle(&mut self, _pin: u8, _duty: u16) {}

    fn pwm_period(&mut self, _tcc: u8, _prescalar: u8, _period: u16) {}

    fn spi_enable(&mut self, _mode: u8, _clock_reg: u8, _clock_div: u8) {}

    fn spi_disable(&mut self) {}

    fn spi_write(&mut self, _data: &[u8]) {}

    fn spi_read(&mut self, len: usize) -> Vec<u8> {
        (0..len)
            .map(|_| self.spi_rx.pop_front().unwrap_or(0x00))
            .collect()
    }

    fn spi_transfer(&mut self, data: &[u8]) -> Vec<u8> {
        // Programmed bytes win; otherwise the bus loops TX back to RX.
        data.iter()
            .map(|&b| self.spi_rx.pop_front().unwrap_or(b))
            .collect()
    }

    fn i2c_enable(&mut self, _baud: u8) {}

    fn i2c_disable(&mut self) {}

    fn i2c_start(&mut self, _addr: u8) {}

    fn i2c_stop(&mut self) {}

    fn i2c_write(&mut self, byte: u8) {
        self.i2c_log.push(byte);
    }

    fn i2c_read(&mut self) -> u8 {
        self.i2c_rx.pop_front().unwrap_or(0xFF)
    }

    fn uart_enable(&mut self, _baud: u16) {}

    fn uart_disable(&mut self) {}

    fn uart_write(&mut self, data: &[u8]) {
        self.uart_tx_log.extend_from_slice(data);
        if self.uart_loopback && !data.is_empty() {
            self.uart_rx.push_back(data.to_vec());
        }
    }
}
