// Keyboard teleop: W/S throttle, A/D steer, 0-5 presets, SPACE stop, Q quit
//
// Blocking read-key / act / render cycle. The loop owns the driver and shuts
// it down on every way out, including errors, before reporting them.

use std::io::{self, Write};
use std::time::Duration;

use crossterm::event::{self, Event, KeyEvent, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing::{error, info, warn};

use crate::config::{PRESET_LEVELS, TeleopConfig};
use crate::messages::DriveCommand;
use crate::motor::{CarDriver, DriveError, PwmExpander};

#[derive(Debug, thiserror::Error)]
pub enum TeleopError {
    #[error("Drive error: {0}")]
    Drive(#[from] DriveError),

    #[error("Terminal error: {0}")]
    Terminal(#[from] io::Error),
}

/// Where keypresses come from
pub trait KeySource {
    /// Wait up to one poll interval for a key; `None` if nothing was pressed
    fn next_key(&mut self) -> io::Result<Option<KeyEvent>>;
}

/// Keys read from the controlling terminal
pub struct TerminalKeys {
    poll_interval: Duration,
}

impl TerminalKeys {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

impl KeySource for TerminalKeys {
    fn next_key(&mut self) -> io::Result<Option<KeyEvent>> {
        if event::poll(self.poll_interval)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Release {
                    return Ok(Some(key));
                }
            }
        }
        Ok(None)
    }
}

/// Raw terminal mode for as long as the guard lives
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn enable() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!("Failed to restore terminal mode: {}", e);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Local throttle/steering targets. Teleop is the driver's only writer, so
/// these mirror the driver's commanded state.
pub struct Teleop {
    config: TeleopConfig,
    throttle: f32,
    steering_us: u16,
    last_command: Option<DriveCommand>,
}

impl Teleop {
    pub fn new(config: TeleopConfig) -> Self {
        let steering_us = config.calibration.center_us;
        Self {
            config,
            throttle: 0.0,
            steering_us,
            last_command: None,
        }
    }

    pub fn throttle(&self) -> f32 {
        self.throttle
    }

    pub fn steering_us(&self) -> u16 {
        self.steering_us
    }

    /// Act on one command
    pub fn apply<S, M>(
        &mut self,
        cmd: DriveCommand,
        driver: &mut CarDriver<S, M>,
    ) -> Result<Flow, DriveError>
    where
        S: PwmExpander,
        M: PwmExpander,
    {
        let cap = self.config.max_throttle;
        let step = self.config.throttle_step;
        let calibration = self.config.calibration;
        self.last_command = Some(cmd);

        match cmd {
            DriveCommand::ThrottleUp => {
                self.throttle = driver.set_throttle(snap((self.throttle + step).min(cap)))?;
            }
            DriveCommand::ThrottleDown => {
                self.throttle = driver.set_throttle(snap((self.throttle - step).max(-cap)))?;
            }
            DriveCommand::SteerLeft => {
                let target = self
                    .steering_us
                    .saturating_sub(self.config.steer_step_us)
                    .max(calibration.left_us);
                self.steering_us = driver.set_steering_us(target as i32)?;
            }
            DriveCommand::SteerRight => {
                let target = self
                    .steering_us
                    .saturating_add(self.config.steer_step_us)
                    .min(calibration.right_us);
                self.steering_us = driver.set_steering_us(target as i32)?;
            }
            DriveCommand::Preset(level) => {
                let level = level.min(PRESET_LEVELS);
                let target = cap * level as f32 / PRESET_LEVELS as f32;
                self.throttle = driver.set_throttle(snap(target))?;
            }
            DriveCommand::EmergencyStop => {
                warn!("Emergency stop");
                self.throttle = driver.set_throttle(0.0)?;
                self.steering_us = driver.set_steering_us(calibration.center_us as i32)?;
            }
            DriveCommand::Quit => {
                info!("Quitting...");
                return Ok(Flow::Exit);
            }
            DriveCommand::Interrupt => {
                warn!("Emergency stop - Ctrl+C detected");
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    /// Redraw the one-line status
    pub fn render<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let label = match self.last_command {
            Some(DriveCommand::EmergencyStop) => "EMERGENCY STOP",
            _ => "",
        };
        write!(
            out,
            "\r  Throttle: {:+.2} ({:+4}%)  Steering: {:4}us  {:<14}",
            self.throttle,
            (self.throttle * 100.0).round() as i32,
            self.steering_us,
            label
        )?;
        out.flush()
    }

    fn drive_loop<S, M, K, W>(
        &mut self,
        driver: &mut CarDriver<S, M>,
        keys: &mut K,
        out: &mut W,
    ) -> Result<(), TeleopError>
    where
        S: PwmExpander,
        M: PwmExpander,
        K: KeySource,
        W: Write,
    {
        self.steering_us = driver.set_steering_us(self.config.calibration.center_us as i32)?;
        self.render(out)?;

        loop {
            let Some(key) = keys.next_key()? else {
                continue;
            };
            let Some(cmd) = DriveCommand::from_key(&key) else {
                continue;
            };

            if self.apply(cmd, driver)? == Flow::Exit {
                write!(out, "\r\n")?;
                out.flush()?;
                return Ok(());
            }
            self.render(out)?;
        }
    }
}

/// Drive the car from `keys` until quit, then shut the driver down.
///
/// Shutdown runs on every exit path; a loop error is returned after it.
pub fn run<S, M, K, W>(
    mut driver: CarDriver<S, M>,
    config: TeleopConfig,
    keys: &mut K,
    out: &mut W,
) -> Result<(), TeleopError>
where
    S: PwmExpander,
    M: PwmExpander,
    K: KeySource,
    W: Write,
{
    info!("Controls: W/S=throttle, A/D=steer, 0-5=preset, SPACE=stop, Q=quit");
    info!(
        "Throttle step {:.2}, cap {:.2}",
        config.throttle_step, config.max_throttle
    );

    let mut teleop = Teleop::new(config);
    let result = teleop.drive_loop(&mut driver, keys, out);
    if let Err(e) = &result {
        error!("Teleop loop failed, stopping car: {}", e);
    }

    let shutdown = driver.shutdown();
    result?;
    shutdown?;
    info!("Keyboard control terminated safely");
    Ok(())
}

/// Run teleop on the controlling terminal (raw mode, stdout status line)
pub fn run_terminal<S, M>(driver: CarDriver<S, M>, config: TeleopConfig) -> Result<(), TeleopError>
where
    S: PwmExpander,
    M: PwmExpander,
{
    let mut keys = TerminalKeys::new(Duration::from_millis(config.poll_interval_ms));
    let mut stdout = io::stdout();
    let _raw = RawModeGuard::enable()?;
    run(driver, config, &mut keys, &mut stdout)
}

/// Keep the accumulator on a clean grid so repeated steps don't drift
fn snap(value: f32) -> f32 {
    (value * 1000.0).round() / 1000.0
}
