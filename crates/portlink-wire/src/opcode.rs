//! Port command opcodes.
//!
//! Each command sent to a port's command machine is a single opcode byte
//! followed by a fixed number of argument bytes. Streaming opcodes
//! (ECHO/TX/RX/TXRX) take a length argument and are followed by up to that
//! many payload bytes, which may span multiple frames.

pub const NOP: u8 = 0x00;
pub const FLUSH: u8 = 0x01;
pub const ECHO: u8 = 0x02;
pub const GPIO_IN: u8 = 0x03;
pub const GPIO_HIGH: u8 = 0x04;
pub const GPIO_LOW: u8 = 0x05;
pub const GPIO_CFG: u8 = 0x06;
pub const GPIO_WAIT: u8 = 0x07;
pub const GPIO_INT: u8 = 0x08;
pub const ENABLE_SPI: u8 = 0x0A;
pub const DISABLE_SPI: u8 = 0x0B;
pub const ENABLE_I2C: u8 = 0x0C;
pub const DISABLE_I2C: u8 = 0x0D;
pub const ENABLE_UART: u8 = 0x0E;
pub const DISABLE_UART: u8 = 0x0F;
pub const TX: u8 = 0x10;
pub const RX: u8 = 0x11;
pub const TXRX: u8 = 0x12;
pub const START: u8 = 0x13;
pub const STOP: u8 = 0x14;
pub const GPIO_TOGGLE: u8 = 0x15;
pub const GPIO_INPUT: u8 = 0x16;
pub const GPIO_RAW_READ: u8 = 0x17;
pub const ANALOG_READ: u8 = 0x18;
pub const ANALOG_WRITE: u8 = 0x19;
pub const GPIO_PULL: u8 = 0x1A;
pub const PWM_DUTY_CYCLE: u8 = 0x1B;
pub const PWM_PERIOD: u8 = 0x1C;

/// Number of argument bytes a command consumes before dispatch.
///
/// Returns `None` for opcodes the protocol does not define.
pub fn arg_count(opcode: u8) -> Option<u8> {
    match opcode {
        NOP | FLUSH | DISABLE_SPI | DISABLE_I2C | DISABLE_UART | STOP => Some(0),

        // Length argument:
        ECHO | TX | RX | TXRX => Some(1),

        // Pin argument:
        GPIO_IN | GPIO_HIGH | GPIO_LOW | GPIO_TOGGLE | GPIO_WAIT | GPIO_INT | GPIO_CFG
        | GPIO_INPUT | GPIO_RAW_READ | ANALOG_READ | GPIO_PULL => Some(1),

        ANALOG_WRITE => Some(2),

        // Config argument:
        ENABLE_SPI => Some(3),      // mode, clock register, clock divider
        ENABLE_I2C => Some(1),      // baud register
        ENABLE_UART => Some(2),     // baud register hi/lo
        START => Some(1),           // i2c address
        PWM_DUTY_CYCLE => Some(3),  // pin, duty hi/lo
        PWM_PERIOD => Some(3),      // tcc | prescalar, period hi/lo

        _ => None,
    }
}

/// Whether an opcode's payload is processed incrementally across frames.
pub fn is_streaming(opcode: u8) -> bool {
    matches!(opcode, ECHO | TX | RX | TXRX)
}

/// Human-readable opcode name for diagnostics.
pub fn name(opcode: u8) -> &'static str {
    match opcode {
        NOP => "NOP",
        FLUSH => "FLUSH",
        ECHO => "ECHO",
        GPIO_IN => "GPIO_IN",
        GPIO_HIGH => "GPIO_HIGH",
        GPIO_LOW => "GPIO_LOW",
        GPIO_CFG => "GPIO_CFG",
        GPIO_WAIT => "GPIO_WAIT",
        GPIO_INT => "GPIO_INT",
        ENABLE_SPI => "ENABLE_SPI",
        DISABLE_SPI => "DISABLE_SPI",
        ENABLE_I2C => "ENABLE_I2C",
        DISABLE_I2C => "DISABLE_I2C",
        ENABLE_UART => "ENABLE_UART",
        DISABLE_UART => "DISABLE_UART",
        TX => "TX",
        RX => "RX",
        TXRX => "TXRX",
        START => "START",
        STOP => "STOP",
        GPIO_TOGGLE => "GPIO_TOGGLE",
        GPIO_INPUT => "GPIO_INPUT",
        GPIO_RAW_READ => "GPIO_RAW_READ",
        ANALOG_READ => "ANALOG_READ",
        ANALOG_WRITE => "ANALOG_WRITE",
        GPIO_PULL => "GPIO_PULL",
        PWM_DUTY_CYCLE => "PWM_DUTY_CYCLE",
        PWM_PERIOD => "PWM_PERIOD",
        _ => "UNKNOWN",
    }
}
