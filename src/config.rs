// Bus addresses, channel wiring, frequencies and teleop tuning
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

// I2C bus the two PCA9685 boards hang off (/dev/i2c-1)
pub const I2C_BUS: u8 = 1;

// PCA9685 addresses
pub const STEERING_ADDR: u8 = 0x40;
pub const MOTOR_ADDR: u8 = 0x60;

// PWM frequencies
pub const STEERING_FREQ_HZ: u32 = 50; // standard RC servo period (20 ms)
pub const MOTOR_FREQ_HZ: u32 = 1000;

// Motor wiring on the motor expander (TB6612FNG inputs)
pub const MOTOR_A: MotorChannels = MotorChannels { pwm: 7, in1: 5, in2: 6 };
pub const MOTOR_B: MotorChannels = MotorChannels { pwm: 0, in1: 2, in2: 1 };

// Servo channel on the steering expander
pub const STEERING_CHANNEL: u8 = 0;

// Hard steering clamp, in microseconds
pub const STEERING_MIN_US: u16 = 1000;
pub const STEERING_MAX_US: u16 = 2400;
pub const STEERING_CENTER_US: u16 = 1700;

// Calibrated servo end stops used by teleop (narrower than the clamp)
pub const STEER_LEFT_US: u16 = 1400;
pub const STEER_RIGHT_US: u16 = 2000;
pub const STEER_STEP_US: u16 = 100;

// Teleop throttle handling
pub const THROTTLE_STEP: f32 = 0.05;
pub const MAX_THROTTLE: f32 = 0.5; // safety cap, not the driver's 1.0 clamp
pub const PRESET_LEVELS: u8 = 5;

// Key poll interval for the teleop loop
pub const POLL_INTERVAL_MS: u64 = 20;

/// Highest channel index on a PCA9685
pub const MAX_CHANNEL: u8 = 15;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// One DC motor: speed channel plus two direction pins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorChannels {
    pub pwm: u8,
    pub in1: u8,
    pub in2: u8,
}

impl MotorChannels {
    pub fn as_array(&self) -> [u8; 3] {
        [self.pwm, self.in1, self.in2]
    }
}

/// Hard clamp applied to every steering pulse before it reaches the servo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SteeringLimits {
    pub min_us: u16,
    pub max_us: u16,
}

impl Default for SteeringLimits {
    fn default() -> Self {
        Self {
            min_us: STEERING_MIN_US,
            max_us: STEERING_MAX_US,
        }
    }
}

/// Wiring and bus settings for the driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub bus: u8,
    pub steering_address: u8,
    pub motor_address: u8,
    pub steering_channel: u8,
    pub motor_a: MotorChannels,
    pub motor_b: MotorChannels,
    pub steering_freq_hz: u32,
    pub motor_freq_hz: u32,
    pub steering_limits: SteeringLimits,
    pub steering_center_us: u16,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            bus: I2C_BUS,
            steering_address: STEERING_ADDR,
            motor_address: MOTOR_ADDR,
            steering_channel: STEERING_CHANNEL,
            motor_a: MOTOR_A,
            motor_b: MOTOR_B,
            steering_freq_hz: STEERING_FREQ_HZ,
            motor_freq_hz: MOTOR_FREQ_HZ,
            steering_limits: SteeringLimits::default(),
            steering_center_us: STEERING_CENTER_US,
        }
    }
}

impl DriveConfig {
    /// Check channel indices, limits and frequencies before any hardware is touched
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.steering_channel > MAX_CHANNEL {
            return Err(ConfigError::Invalid(format!(
                "steering channel {} out of range 0..={}",
                self.steering_channel, MAX_CHANNEL
            )));
        }

        let mut motor_channels = [self.motor_a.as_array(), self.motor_b.as_array()].concat();
        if let Some(&ch) = motor_channels.iter().find(|&&ch| ch > MAX_CHANNEL) {
            return Err(ConfigError::Invalid(format!(
                "motor channel {} out of range 0..={}",
                ch, MAX_CHANNEL
            )));
        }
        motor_channels.sort_unstable();
        if motor_channels.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(ConfigError::Invalid(format!(
                "motor channels must be distinct, got A={:?} B={:?}",
                self.motor_a, self.motor_b
            )));
        }

        let SteeringLimits { min_us, max_us } = self.steering_limits;
        if min_us >= max_us {
            return Err(ConfigError::Invalid(format!(
                "steering limits inverted: min {}us >= max {}us",
                min_us, max_us
            )));
        }
        if !(min_us..=max_us).contains(&self.steering_center_us) {
            return Err(ConfigError::Invalid(format!(
                "steering center {}us outside limits [{}, {}]",
                self.steering_center_us, min_us, max_us
            )));
        }

        if self.steering_freq_hz == 0 || self.motor_freq_hz == 0 {
            return Err(ConfigError::Invalid("PWM frequency must be non-zero".into()));
        }

        Ok(())
    }
}

/// Servo positions measured on the car, independent of the hard clamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SteeringCalibration {
    pub left_us: u16,
    pub center_us: u16,
    pub right_us: u16,
}

impl Default for SteeringCalibration {
    fn default() -> Self {
        Self {
            left_us: STEER_LEFT_US,
            center_us: STEERING_CENTER_US,
            right_us: STEER_RIGHT_US,
        }
    }
}

/// Keyboard teleop tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeleopConfig {
    pub throttle_step: f32,
    pub max_throttle: f32,
    pub steer_step_us: u16,
    pub calibration: SteeringCalibration,
    pub poll_interval_ms: u64,
}

impl Default for TeleopConfig {
    fn default() -> Self {
        Self {
            throttle_step: THROTTLE_STEP,
            max_throttle: MAX_THROTTLE,
            steer_step_us: STEER_STEP_US,
            calibration: SteeringCalibration::default(),
            poll_interval_ms: POLL_INTERVAL_MS,
        }
    }
}

impl TeleopConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.max_throttle > 0.0 && self.max_throttle <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "max throttle {} must be in (0, 1]",
                self.max_throttle
            )));
        }
        if !(self.throttle_step > 0.0 && self.throttle_step <= self.max_throttle) {
            return Err(ConfigError::Invalid(format!(
                "throttle step {} must be in (0, {}]",
                self.throttle_step, self.max_throttle
            )));
        }
        let SteeringCalibration {
            left_us,
            center_us,
            right_us,
        } = self.calibration;
        if !(left_us <= center_us && center_us <= right_us) {
            return Err(ConfigError::Invalid(format!(
                "steering calibration must satisfy left <= center <= right, got {}/{}/{}",
                left_us, center_us, right_us
            )));
        }
        Ok(())
    }
}

/// Everything that can be read from a settings file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub drive: DriveConfig,
    pub teleop: TeleopConfig,
}

impl Settings {
    /// Load settings from a JSON file; missing fields fall back to the defaults above
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Parse an I2C address given as hex ("0x40") or decimal ("64")
pub fn parse_address(s: &str) -> Result<u8, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    };
    let addr = parsed.map_err(|e| format!("invalid I2C address '{}': {}", s, e))?;
    // 7-bit addressing, 0x00-0x02 and 0x78-0x7F are reserved
    if !(0x03..=0x77).contains(&addr) {
        return Err(format!("I2C address 0x{:02X} outside 0x03..=0x77", addr));
    }
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        DriveConfig::default().validate().unwrap();
        TeleopConfig::default().validate().unwrap();
    }

    #[test]
    fn test_default_center_is_midpoint_of_clamp() {
        let limits = SteeringLimits::default();
        assert_eq!((limits.min_us + limits.max_us) / 2, STEERING_CENTER_US);
    }

    #[test]
    fn test_rejects_shared_motor_channel() {
        let config = DriveConfig {
            motor_b: MotorChannels { pwm: 7, in1: 2, in2: 1 },
            ..DriveConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_out_of_range_channel() {
        let config = DriveConfig {
            steering_channel: 16,
            ..DriveConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_center_outside_limits() {
        let config = DriveConfig {
            steering_center_us: 2500,
            ..DriveConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_teleop_cap() {
        let config = TeleopConfig {
            max_throttle: 1.5,
            ..TeleopConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_settings_file_keeps_defaults() {
        let settings = Settings::from_json(
            r#"{ "drive": { "motor_address": 97 }, "teleop": { "max_throttle": 0.3 } }"#,
        )
        .unwrap();
        assert_eq!(settings.drive.motor_address, 0x61);
        assert_eq!(settings.drive.steering_address, STEERING_ADDR);
        assert_eq!(settings.drive.motor_a, MOTOR_A);
        assert_eq!(settings.teleop.max_throttle, 0.3);
        assert_eq!(settings.teleop.calibration, SteeringCalibration::default());
    }

    #[test]
    fn test_malformed_settings_file() {
        assert!(matches!(
            Settings::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x40"), Ok(0x40));
        assert_eq!(parse_address("0X60"), Ok(0x60));
        assert_eq!(parse_address("96"), Ok(0x60));
        assert!(parse_address("0x00").is_err());
        assert!(parse_address("0x80").is_err());
        assert!(parse_address("forty").is_err());
    }
}
