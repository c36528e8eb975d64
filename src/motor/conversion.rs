// Unit conversions between drive commands and PCA9685 tick values.
// Everything here is pure: no bus access, no state.

/// PCA9685 counter resolution (12 bit)
pub const PWM_RESOLUTION: u16 = 4096;

/// Tick value that drives a channel fully on (written with the full-on bit)
pub const FULL_ON: u16 = PWM_RESOLUTION;

/// Tick value that drives a channel fully off
pub const FULL_OFF: u16 = 0;

/// PCA9685 internal oscillator
const OSCILLATOR_HZ: f32 = 25_000_000.0;

/// Prescale register bounds accepted by the chip
const PRESCALE_MIN: u8 = 3;
const PRESCALE_MAX: u8 = 255;

/// Direction of an H-bridge channel pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
    /// Both inputs low
    Brake,
}

impl Direction {
    /// Levels for (IN1, IN2)
    pub fn pins(self) -> (bool, bool) {
        match self {
            Direction::Forward => (true, false),
            Direction::Reverse => (false, true),
            Direction::Brake => (false, false),
        }
    }
}

/// Clamp a throttle command to [-1.0, 1.0]. NaN is treated as a stop.
pub fn clamp_throttle(speed: f32) -> f32 {
    if speed.is_nan() {
        return 0.0;
    }
    speed.clamp(-1.0, 1.0)
}

/// Split a throttle value into bridge direction and duty ticks
pub fn throttle_to_drive(speed: f32) -> (Direction, u16) {
    let speed = clamp_throttle(speed);
    let direction = if speed > 0.0 {
        Direction::Forward
    } else if speed < 0.0 {
        Direction::Reverse
    } else {
        Direction::Brake
    };
    (direction, duty_ticks(speed.abs()))
}

/// Map a duty fraction in [0, 1] onto the counter resolution
pub fn duty_ticks(fraction: f32) -> u16 {
    let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
    (fraction * PWM_RESOLUTION as f32) as u16
}

/// Tick value for a binary direction pin
pub fn digital_ticks(on: bool) -> u16 {
    if on { FULL_ON } else { FULL_OFF }
}

/// Convert a servo pulse width to ticks for the given PWM frequency.
///
/// At 50 Hz the period is 20 000 us, so `ticks = us / 20000 * 4096`.
pub fn pulse_us_to_ticks(us: u16, freq_hz: u32) -> u16 {
    let period_us = 1_000_000.0 / freq_hz as f32;
    let ticks = (us as f32 / period_us) * PWM_RESOLUTION as f32;
    (ticks as u16).min(FULL_ON)
}

/// Clamp a pulse width to `[min_us, max_us]`, accepting any caller integer
pub fn clamp_pulse_us(us: i32, min_us: u16, max_us: u16) -> u16 {
    us.clamp(min_us as i32, max_us as i32) as u16
}

/// Map a normalized steering value linearly onto `[min_us, max_us]`.
///
/// -1.0 gives `min_us`, +1.0 gives `max_us`, 0.0 the midpoint. NaN maps to the midpoint.
pub fn normalized_to_us(value: f32, min_us: u16, max_us: u16) -> u16 {
    let value = if value.is_nan() { 0.0 } else { value.clamp(-1.0, 1.0) };
    let span = (max_us - min_us) as f32;
    let us = min_us as f32 + (value + 1.0) / 2.0 * span;
    clamp_pulse_us(us.round() as i32, min_us, max_us)
}

/// Prescale register value for a target output frequency
pub fn prescale_for(freq_hz: u32) -> u8 {
    let freq_hz = freq_hz.max(1) as f32;
    let prescale = (OSCILLATOR_HZ / (PWM_RESOLUTION as f32 * freq_hz)).round() - 1.0;
    prescale.clamp(PRESCALE_MIN as f32, PRESCALE_MAX as f32) as u8
}
