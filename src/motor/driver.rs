// Throttle and steering driver for the JetRacer chassis
//
// Two PCA9685 boards: one drives the steering servo, the other drives both DC
// motors through a TB6612FNG. Both motors always get the same command.
//
// Getters report the last *commanded* values. The boards have no read path
// for them, so nothing here is measured.
//
// Single owner only: a throttle command is several channel writes, and a
// second writer interleaving with them could leave the motors out of step.
// Wrap the driver in a mutex if it has to be shared.

use std::fmt;

use tracing::{debug, info, warn};

use super::conversion::{
    Direction, clamp_pulse_us, clamp_throttle, digital_ticks, normalized_to_us, pulse_us_to_ticks,
    throttle_to_drive,
};
use super::pca9685::{BoardExpander, PwmExpander, open_board};
use crate::config::{ConfigError, DriveConfig, MotorChannels, SteeringLimits};
use crate::messages::DriveState;

/// Which of the two boards an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expander {
    Steering,
    Motor,
}

impl fmt::Display for Expander {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expander::Steering => write!(f, "steering"),
            Expander::Motor => write!(f, "motor"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("Failed to initialize {expander} expander at 0x{address:02X}: {reason}")]
    Initialization {
        expander: Expander,
        address: u8,
        reason: String,
    },

    #[error("Write to {expander} expander channel {channel} failed: {reason}")]
    Bus {
        expander: Expander,
        channel: u8,
        reason: String,
    },

    #[error("Invalid drive configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Driver has been shut down")]
    Released,
}

pub type Result<T> = std::result::Result<T, DriveError>;

/// Driver as wired on the car
pub type JetRacer = CarDriver<BoardExpander, BoardExpander>;

/// Owns both expander handles and the commanded drive state
pub struct CarDriver<S, M>
where
    S: PwmExpander,
    M: PwmExpander,
{
    steering: Option<S>,
    motor: Option<M>,
    steering_address: u8,
    motor_address: u8,
    steering_channel: u8,
    motors: [MotorChannels; 2],
    steering_freq_hz: u32,
    limits: SteeringLimits,
    state: DriveState,
}

impl JetRacer {
    /// Open both boards on the configured bus and bring them to a safe state
    pub fn open(config: &DriveConfig) -> Result<Self> {
        info!(
            "Opening /dev/i2c-{}: steering 0x{:02X}, motor 0x{:02X}",
            config.bus, config.steering_address, config.motor_address
        );

        let steering = open_board(config.bus, config.steering_address).map_err(|reason| {
            DriveError::Initialization {
                expander: Expander::Steering,
                address: config.steering_address,
                reason,
            }
        })?;
        let motor = open_board(config.bus, config.motor_address).map_err(|reason| {
            DriveError::Initialization {
                expander: Expander::Motor,
                address: config.motor_address,
                reason,
            }
        })?;

        Self::with_expanders(steering, motor, config)
    }
}

impl<S, M> CarDriver<S, M>
where
    S: PwmExpander,
    M: PwmExpander,
{
    /// Initialize the given boards: set both frequencies, brake both motors and
    /// center the steering.
    ///
    /// Any failure here is an [`DriveError::Initialization`]; nothing is retried.
    pub fn with_expanders(steering: S, motor: M, config: &DriveConfig) -> Result<Self> {
        config.validate()?;

        let mut driver = Self {
            steering: Some(steering),
            motor: Some(motor),
            steering_address: config.steering_address,
            motor_address: config.motor_address,
            steering_channel: config.steering_channel,
            motors: [config.motor_a, config.motor_b],
            steering_freq_hz: config.steering_freq_hz,
            limits: config.steering_limits,
            state: DriveState {
                throttle: 0.0,
                steering_us: config.steering_center_us,
            },
        };

        if let Err(e) = driver.init_hardware(config) {
            // Leave the boards as they are; the handles are just closed
            driver.release_handles();
            return Err(e);
        }

        info!(
            "JetRacer initialized - Steering: 0x{:02X}, Motor: 0x{:02X}",
            config.steering_address, config.motor_address
        );
        Ok(driver)
    }

    fn init_hardware(&mut self, config: &DriveConfig) -> Result<()> {
        let steering_address = self.steering_address;
        let motor_address = self.motor_address;

        self.steering_board()?
            .set_frequency(config.steering_freq_hz)
            .map_err(|e| DriveError::Initialization {
                expander: Expander::Steering,
                address: steering_address,
                reason: format!("{:?}", e),
            })?;
        self.motor_board()?
            .set_frequency(config.motor_freq_hz)
            .map_err(|e| DriveError::Initialization {
                expander: Expander::Motor,
                address: motor_address,
                reason: format!("{:?}", e),
            })?;

        // Safe state: braked, zero duty, wheels straight
        self.write_throttle(0.0)
            .and_then(|_| self.write_steering(config.steering_center_us))
            .map_err(|e| match e {
                DriveError::Bus {
                    expander, reason, ..
                } => DriveError::Initialization {
                    address: match expander {
                        Expander::Steering => steering_address,
                        Expander::Motor => motor_address,
                    },
                    expander,
                    reason,
                },
                other => other,
            })
    }

    /// Drive both motors at `speed` in [-1.0, 1.0]; out-of-range values are clamped.
    ///
    /// Returns the throttle actually applied.
    pub fn set_throttle(&mut self, speed: f32) -> Result<f32> {
        let applied = clamp_throttle(speed);
        if speed.is_nan() {
            warn!("Throttle NaN treated as stop");
        } else if applied != speed {
            debug!("Throttle {} clamped to {}", speed, applied);
        }
        self.write_throttle(applied)?;
        self.state.throttle = applied;
        Ok(applied)
    }

    /// Set the steering pulse width; clamped to the configured limits.
    ///
    /// Returns the pulse width actually applied.
    pub fn set_steering_us(&mut self, us: i32) -> Result<u16> {
        let applied = clamp_pulse_us(us, self.limits.min_us, self.limits.max_us);
        if applied as i32 != us {
            debug!("Steering {}us clamped to {}us", us, applied);
        }
        self.write_steering(applied)?;
        self.state.steering_us = applied;
        Ok(applied)
    }

    /// Steer with a value in [-1.0, 1.0] mapped linearly onto the steering limits
    /// (-1.0 is the minimum pulse, +1.0 the maximum).
    pub fn set_steering_normalized(&mut self, value: f32) -> Result<u16> {
        let us = normalized_to_us(value, self.limits.min_us, self.limits.max_us);
        self.set_steering_us(us as i32)
    }

    /// Brake both motors. Steering is left where it is.
    pub fn stop(&mut self) -> Result<()> {
        self.set_throttle(0.0).map(|_| ())
    }

    /// Stop the motors and close both boards. Calling it again does nothing.
    ///
    /// The boards are released even if the stop fails; the stop error is returned.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.is_released() {
            debug!("Shutdown requested on released driver, nothing to do");
            return Ok(());
        }

        info!("Shutting down JetRacer...");
        let stopped = self.stop();
        self.release_handles();

        match stopped {
            Ok(()) => {
                info!("JetRacer shutdown complete");
                Ok(())
            }
            Err(e) => {
                warn!("Motors may still be driven, stop failed during shutdown: {}", e);
                Err(e)
            }
        }
    }

    /// Last commanded throttle
    pub fn throttle(&self) -> f32 {
        self.state.throttle
    }

    /// Last commanded steering pulse width
    pub fn steering_us(&self) -> u16 {
        self.state.steering_us
    }

    pub fn state(&self) -> DriveState {
        self.state
    }

    pub fn is_released(&self) -> bool {
        self.steering.is_none() && self.motor.is_none()
    }

    fn release_handles(&mut self) {
        if let Some(steering) = self.steering.take() {
            steering.release();
        }
        if let Some(motor) = self.motor.take() {
            motor.release();
        }
    }

    fn steering_board(&mut self) -> Result<&mut S> {
        self.steering.as_mut().ok_or(DriveError::Released)
    }

    fn motor_board(&mut self) -> Result<&mut M> {
        self.motor.as_mut().ok_or(DriveError::Released)
    }

    /// Same direction and duty on both motor triples
    fn write_throttle(&mut self, speed: f32) -> Result<()> {
        let (direction, duty) = throttle_to_drive(speed);
        let motors = self.motors;
        debug!("Throttle {:+.2}: {:?}, duty {} ticks", speed, direction, duty);

        for channels in motors {
            self.drive_motor(channels, direction, duty)?;
        }
        Ok(())
    }

    fn drive_motor(&mut self, channels: MotorChannels, direction: Direction, duty: u16) -> Result<()> {
        let (in1, in2) = direction.pins();
        self.write_motor_channel(channels.in1, digital_ticks(in1))?;
        self.write_motor_channel(channels.in2, digital_ticks(in2))?;
        self.write_motor_channel(channels.pwm, duty)
    }

    fn write_motor_channel(&mut self, channel: u8, ticks: u16) -> Result<()> {
        self.motor_board()?
            .set_duty(channel, ticks)
            .map_err(|e| DriveError::Bus {
                expander: Expander::Motor,
                channel,
                reason: format!("{:?}", e),
            })
    }

    fn write_steering(&mut self, us: u16) -> Result<()> {
        let ticks = pulse_us_to_ticks(us, self.steering_freq_hz);
        let channel = self.steering_channel;
        debug!("Steering {}us -> {} ticks on channel {}", us, ticks, channel);

        self.steering_board()?
            .set_duty(channel, ticks)
            .map_err(|e| DriveError::Bus {
                expander: Expander::Steering,
                channel,
                reason: format!("{:?}", e),
            })
    }
}

impl<S, M> Drop for CarDriver<S, M>
where
    S: PwmExpander,
    M: PwmExpander,
{
    fn drop(&mut self) {
        // Stop the motors if the owner never called shutdown (early return, panic)
        if let Err(e) = self.shutdown() {
            warn!("Failed to stop motors on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::conversion::{FULL_ON, PWM_RESOLUTION};
    use crate::motor::pca9685::fake::{FakeExpander, Op};

    fn init() -> (CarDriver<FakeExpander, FakeExpander>, FakeExpander, FakeExpander) {
        let steering = FakeExpander::new();
        let motor = FakeExpander::new();
        let driver =
            CarDriver::with_expanders(steering.clone(), motor.clone(), &DriveConfig::default())
                .unwrap();
        steering.clear();
        motor.clear();
        (driver, steering, motor)
    }

    #[test]
    fn test_initialize_sets_frequencies_and_safe_state() {
        let steering = FakeExpander::new();
        let motor = FakeExpander::new();
        let driver =
            CarDriver::with_expanders(steering.clone(), motor.clone(), &DriveConfig::default())
                .unwrap();

        assert_eq!(steering.ops()[0], Op::Frequency(50));
        assert_eq!(motor.ops()[0], Op::Frequency(1000));

        // Motor A: AIN1=5, AIN2=6, PWMA=7; Motor B: BIN1=2, BIN2=1, PWMB=0
        assert_eq!(
            &motor.ops()[1..],
            &[
                Op::Duty(5, 0),
                Op::Duty(6, 0),
                Op::Duty(7, 0),
                Op::Duty(2, 0),
                Op::Duty(1, 0),
                Op::Duty(0, 0),
            ]
        );
        assert_eq!(steering.duty(0), Some(348));

        assert_eq!(driver.throttle(), 0.0);
        assert_eq!(driver.steering_us(), 1700);
    }

    #[test]
    fn test_throttle_roundtrip_is_clamped() {
        let (mut driver, _, _) = init();
        for (input, expected) in [(0.3, 0.3), (1.5, 1.0), (-2.0, -1.0), (-0.25, -0.25)] {
            assert_eq!(driver.set_throttle(input).unwrap(), expected);
            assert_eq!(driver.throttle(), expected);
        }
    }

    #[test]
    fn test_steering_roundtrip_is_clamped() {
        let (mut driver, _, _) = init();
        for (input, expected) in [(1800, 1800), (500, 1000), (-40, 1000), (3000, 2400), (2400, 2400)] {
            assert_eq!(driver.set_steering_us(input).unwrap(), expected);
            assert_eq!(driver.steering_us(), expected);
        }
    }

    #[test]
    fn test_steering_writes_ticks() {
        let (mut driver, steering, _) = init();
        driver.set_steering_us(1000).unwrap();
        assert_eq!(steering.ops(), vec![Op::Duty(0, 204)]);
    }

    #[test]
    fn test_normalized_steering() {
        let (mut driver, _, _) = init();
        driver.set_steering_normalized(-1.0).unwrap();
        assert_eq!(driver.steering_us(), 1000);
        driver.set_steering_normalized(0.0).unwrap();
        assert_eq!(driver.steering_us(), 1700);
        driver.set_steering_normalized(1.0).unwrap();
        assert_eq!(driver.steering_us(), 2400);
        driver.set_steering_normalized(4.0).unwrap();
        assert_eq!(driver.steering_us(), 2400);
    }

    #[test]
    fn test_zero_throttle_brakes_both_motors() {
        let (mut driver, _, motor) = init();
        driver.set_throttle(0.7).unwrap();
        driver.set_throttle(0.0).unwrap();

        assert_eq!(driver.throttle(), 0.0);
        for ch in [5, 6, 2, 1] {
            assert_eq!(motor.duty(ch), Some(0), "direction pin {} not low", ch);
        }
        assert_eq!(motor.duty(7), Some(0));
        assert_eq!(motor.duty(0), Some(0));
    }

    #[test]
    fn test_forward_and_reverse_are_synchronized() {
        let (mut driver, _, motor) = init();

        driver.set_throttle(0.5).unwrap();
        let forward = motor.ops();
        motor.clear();
        driver.set_throttle(-0.5).unwrap();
        let reverse = motor.ops();

        let half = PWM_RESOLUTION / 2;
        assert_eq!(
            forward,
            vec![
                Op::Duty(5, FULL_ON),
                Op::Duty(6, 0),
                Op::Duty(7, half),
                Op::Duty(2, FULL_ON),
                Op::Duty(1, 0),
                Op::Duty(0, half),
            ]
        );
        assert_eq!(
            reverse,
            vec![
                Op::Duty(5, 0),
                Op::Duty(6, FULL_ON),
                Op::Duty(7, half),
                Op::Duty(2, 0),
                Op::Duty(1, FULL_ON),
                Op::Duty(0, half),
            ]
        );
    }

    #[test]
    fn test_direction_pins_are_binary() {
        let (mut driver, _, motor) = init();
        for speed in [0.01, 0.33, -0.8, 1.0, -1.0, 0.0] {
            driver.set_throttle(speed).unwrap();
        }
        for op in motor.ops() {
            if let Op::Duty(ch, ticks) = op {
                if [5, 6, 2, 1].contains(&ch) {
                    assert!(ticks == 0 || ticks == FULL_ON, "pin {} at {}", ch, ticks);
                }
            }
        }
    }

    #[test]
    fn test_stop_keeps_steering() {
        let (mut driver, steering, _) = init();
        driver.set_steering_us(2000).unwrap();
        driver.set_throttle(0.4).unwrap();
        steering.clear();

        driver.stop().unwrap();

        assert_eq!(driver.throttle(), 0.0);
        assert_eq!(driver.steering_us(), 2000);
        assert!(steering.ops().is_empty());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let (mut driver, steering, motor) = init();
        driver.set_throttle(0.5).unwrap();
        motor.clear();

        driver.shutdown().unwrap();
        let after_first = motor.ops();
        assert_eq!(after_first.len(), 7); // six brake writes + release
        assert_eq!(after_first.last(), Some(&Op::Release));
        assert_eq!(steering.ops(), vec![Op::Release]);

        driver.shutdown().unwrap();
        assert_eq!(motor.ops(), after_first);
        assert_eq!(steering.ops(), vec![Op::Release]);
        assert!(driver.is_released());
    }

    #[test]
    fn test_commands_after_shutdown_are_rejected() {
        let (mut driver, _, _) = init();
        driver.shutdown().unwrap();
        assert!(matches!(driver.set_throttle(0.2), Err(DriveError::Released)));
        assert!(matches!(driver.set_steering_us(1500), Err(DriveError::Released)));
        assert_eq!(driver.throttle(), 0.0);
    }

    #[test]
    fn test_drop_stops_motors() {
        let (mut driver, _, motor) = init();
        driver.set_throttle(-0.6).unwrap();
        motor.clear();
        drop(driver);

        let ops = motor.ops();
        assert_eq!(ops.last(), Some(&Op::Release));
        assert_eq!(motor.duty(7), Some(0));
        assert_eq!(motor.duty(0), Some(0));
    }

    #[test]
    fn test_clamped_scenario() {
        let (mut driver, _, _) = init();
        driver.set_throttle(1.5).unwrap();
        assert_eq!(driver.throttle(), 1.0);
        driver.set_steering_us(500).unwrap();
        assert_eq!(driver.steering_us(), 1000);
        driver.shutdown().unwrap();
    }

    #[test]
    fn test_init_failure_touches_no_channel() {
        let steering = FakeExpander::failing_at(0);
        let motor = FakeExpander::new();
        let result =
            CarDriver::with_expanders(steering.clone(), motor.clone(), &DriveConfig::default());

        match result {
            Err(DriveError::Initialization {
                expander, address, ..
            }) => {
                assert_eq!(expander, Expander::Steering);
                assert_eq!(address, 0x40);
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("initialization should fail"),
        }
        assert_eq!(steering.ops(), vec![Op::Release]);
        assert_eq!(motor.ops(), vec![Op::Release]);
    }

    #[test]
    fn test_invalid_config_fails_before_bus_traffic() {
        let steering = FakeExpander::new();
        let motor = FakeExpander::new();
        let config = DriveConfig {
            steering_channel: 42,
            ..DriveConfig::default()
        };
        let result = CarDriver::with_expanders(steering.clone(), motor.clone(), &config);
        assert!(matches!(result, Err(DriveError::Config(_))));
        assert!(steering.ops().is_empty());
        assert!(motor.ops().is_empty());
    }

    #[test]
    fn test_bus_failure_propagates_and_keeps_state() {
        let steering = FakeExpander::new();
        // frequency + 6 safe-state writes succeed, then fail mid-throttle on motor B
        let motor = FakeExpander::failing_at(1 + 6 + 4);
        let mut driver =
            CarDriver::with_expanders(steering, motor.clone(), &DriveConfig::default()).unwrap();

        let err = driver.set_throttle(0.5).unwrap_err();
        assert!(matches!(
            err,
            DriveError::Bus {
                expander: Expander::Motor,
                channel: 1,
                ..
            }
        ));
        assert_eq!(driver.throttle(), 0.0);
    }
}
