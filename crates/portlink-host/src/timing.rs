//! Clock and scaling math for the coprocessor's peripherals.
//!
//! All values derive from the coprocessor's 48 MHz reference clock. The
//! formulas mirror the firmware's register layouts; only the numeric
//! results travel over the wire.

use crate::error::{HostError, Result};

/// Reference clock of the coprocessor, in ticks per second.
pub const TICKS_PER_SECOND: f64 = 48e6;

/// ADC/analog sample resolution (12 bits).
pub const ANALOG_RESOLUTION: u16 = 4096;

/// Maximum number of ticks before a PWM period completes.
pub const PWM_MAX_PERIOD: u32 = 0xFFFF;

/// Actual lowest frequency is ~0.72 Hz but 1 Hz is easier to remember.
pub const PWM_MIN_FREQUENCY: u32 = 1;

/// 5000 is the max because any higher and the resolution drops below 7%
/// (0xFFFF / 5000 ~ 13), which gets too coarse to be useful.
pub const PWM_MAX_FREQUENCY: u32 = 5000;

/// Available TCC clock prescalars.
pub const PWM_PRESCALARS: [u32; 8] = [1, 2, 4, 8, 16, 64, 256, 1024];

/// PWM bank configuration derived from a requested frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmSettings {
    /// Index into [`PWM_PRESCALARS`].
    pub prescalar_index: u8,
    /// Period in prescaled ticks.
    pub period: u16,
}

/// Find the prescalar/period pair for a PWM frequency.
///
/// Walks the prescalars from fastest to slowest until the period fits in
/// sixteen bits.
pub fn pwm_settings(frequency: u32) -> Result<PwmSettings> {
    if !(PWM_MIN_FREQUENCY..=PWM_MAX_FREQUENCY).contains(&frequency) {
        return Err(HostError::unsupported(format!(
            "PWM frequency must be between {PWM_MIN_FREQUENCY} and {PWM_MAX_FREQUENCY} Hz"
        )));
    }

    for (index, prescalar) in PWM_PRESCALARS.iter().enumerate() {
        let period = (TICKS_PER_SECOND / f64::from(*prescalar) / f64::from(frequency)).floor();
        if period <= f64::from(PWM_MAX_PERIOD) {
            return Ok(PwmSettings {
                prescalar_index: index as u8,
                period: period as u16,
            });
        }
    }

    Err(HostError::unsupported(
        "no prescalar/period pair matches the requested PWM frequency",
    ))
}

/// Compute the I2C baud register for a bus frequency.
///
/// 15 ns is the max SCL rise time: f = 48e6 / (2*(5+baud) + 48e6*1.5e-8).
pub fn i2c_baud(frequency: u32) -> u8 {
    let baud = ((TICKS_PER_SECOND / f64::from(frequency) - TICKS_PER_SECOND * 1.5e-8) / 2.0 - 5.0)
        .floor();
    baud.clamp(0.0, 255.0) as u8
}

/// Compute the UART baud register for a baud rate.
///
/// baud_reg = 65536 * (1 - samples_per_bit * (f_wanted / f_ref)), with 16
/// samples per bit.
pub fn uart_baud_setting(baud: u32) -> u16 {
    (65536.0 * (1.0 - 16.0 * (f64::from(baud) / TICKS_PER_SECOND))).floor() as u16
}

/// SPI clock register and divider for a requested clock speed.
///
/// f_baud = f_ref / (2 * (reg + 1)); below 93750 Hz a clock divider is
/// needed, and with a max divider of 255 the slowest clock is 368 Hz.
pub fn spi_clock_settings(clock_speed: u32) -> Result<(u8, u8)> {
    if !(368..=24_000_000).contains(&clock_speed) {
        return Err(HostError::unsupported(
            "SPI clock must be between 368Hz and 24MHz",
        ));
    }

    let speed = f64::from(clock_speed);
    let mut clock_reg = (TICKS_PER_SECOND / (2.0 * speed) - 1.0).floor();
    let clock_div;

    if clock_reg > 255.0 {
        let div = (TICKS_PER_SECOND / (speed * (2.0 * 255.0 + 2.0))).floor();
        if div > 255.0 {
            clock_reg = (clock_reg / 255.0).floor().max(1.0);
            clock_div = 255.0;
        } else {
            clock_reg = 255.0;
            clock_div = div;
        }
    } else {
        clock_div = 1.0;
    }

    Ok((clock_reg as u8, clock_div as u8))
}
