// PCA9685 16-channel PWM expander over I2C
//
// The driver only ever talks to an expander through `PwmExpander`, so the
// bus can be swapped for a recording fake in tests.

use std::fmt::Debug;

use embedded_hal::i2c::I2c;
use pwm_pca9685::{Address, Channel, Error as PwmError, Pca9685};
use rppal::i2c::I2c as RppalI2c;
use tracing::debug;

use super::conversion::{FULL_OFF, FULL_ON, prescale_for};

/// Minimal command surface of a PWM expander board
pub trait PwmExpander {
    type Error: Debug;

    /// Set the shared output frequency of the chip (wakes it if asleep)
    fn set_frequency(&mut self, freq_hz: u32) -> Result<(), Self::Error>;

    /// Set one channel's duty in ticks: 0 is fully off, `FULL_ON` is fully on
    fn set_duty(&mut self, channel: u8, ticks: u16) -> Result<(), Self::Error>;

    /// Give the bus handle back. Channel outputs are left as last written.
    fn release(self);
}

/// Board used on the car: a PCA9685 on a Linux i2c-dev bus
pub type BoardExpander = Pca9685Expander<RppalI2c>;

/// Open `/dev/i2c-<bus>` and bind a PCA9685 at `address` on it.
///
/// No bus traffic happens here; the first transaction is `set_frequency`.
pub fn open_board(bus: u8, address: u8) -> Result<BoardExpander, String> {
    let i2c = RppalI2c::with_bus(bus).map_err(|e| format!("cannot open /dev/i2c-{}: {}", bus, e))?;
    Pca9685Expander::new(i2c, address).map_err(|e| format!("{:?}", e))
}

/// [`PwmExpander`] over the `pwm-pca9685` driver for any embedded-hal I2C bus
pub struct Pca9685Expander<I2C> {
    pwm: Pca9685<I2C>,
    address: u8,
}

impl<I2C, E> Pca9685Expander<I2C>
where
    I2C: I2c<Error = E>,
    E: Debug,
{
    pub fn new(i2c: I2C, address: u8) -> Result<Self, PwmError<E>> {
        let pwm = Pca9685::new(i2c, Address::from(address))?;
        Ok(Self { pwm, address })
    }
}

impl<I2C, E> PwmExpander for Pca9685Expander<I2C>
where
    I2C: I2c<Error = E>,
    E: Debug,
{
    type Error = PwmError<E>;

    fn set_frequency(&mut self, freq_hz: u32) -> Result<(), Self::Error> {
        let prescale = prescale_for(freq_hz);
        debug!(
            "PCA9685 0x{:02X}: {} Hz (prescale {})",
            self.address, freq_hz, prescale
        );
        self.pwm.enable()?;
        self.pwm.set_prescale(prescale)
    }

    fn set_duty(&mut self, channel: u8, ticks: u16) -> Result<(), Self::Error> {
        let ch = channel_from_index(channel).ok_or(PwmError::InvalidInputData)?;
        match ticks {
            FULL_OFF => self.pwm.set_channel_full_off(ch),
            t if t >= FULL_ON => {
                // Full-off wins over full-on, so rewrite all four registers first
                self.pwm.set_channel_on_off(ch, 0, 0)?;
                self.pwm.set_channel_full_on(ch, 0)
            }
            t => self.pwm.set_channel_on_off(ch, 0, t),
        }
    }

    fn release(self) {
        debug!("Releasing PCA9685 0x{:02X}", self.address);
        drop(self.pwm.destroy());
    }
}

/// Map a raw channel index to the driver's channel type
pub fn channel_from_index(index: u8) -> Option<Channel> {
    let ch = match index {
        0 => Channel::C0,
        1 => Channel::C1,
        2 => Channel::C2,
        3 => Channel::C3,
        4 => Channel::C4,
        5 => Channel::C5,
        6 => Channel::C6,
        7 => Channel::C7,
        8 => Channel::C8,
        9 => Channel::C9,
        10 => Channel::C10,
        11 => Channel::C11,
        12 => Channel::C12,
        13 => Channel::C13,
        14 => Channel::C14,
        15 => Channel::C15,
        _ => return None,
    };
    Some(ch)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_from_index() {
        assert!(matches!(channel_from_index(0), Some(Channel::C0)));
        assert!(matches!(channel_from_index(7), Some(Channel::C7)));
        assert!(matches!(channel_from_index(15), Some(Channel::C15)));
        assert!(channel_from_index(16).is_none());
    }
}
