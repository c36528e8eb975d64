// Commands from the keyboard and the commanded drive state

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::config::PRESET_LEVELS;

/// Last commanded throttle and steering, as held by the driver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveState {
    pub throttle: f32,
    pub steering_us: u16,
}

/// Teleop command decoded from one keypress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveCommand {
    ThrottleUp,
    ThrottleDown,
    SteerLeft,
    SteerRight,
    /// Throttle to `n / PRESET_LEVELS` of the safety cap
    Preset(u8),
    EmergencyStop,
    Quit,
    /// Ctrl+C: leave the loop like `Quit`
    Interrupt,
}

impl DriveCommand {
    /// Map a key event to a command. Releases and unbound keys give `None`.
    pub fn from_key(key: &KeyEvent) -> Option<Self> {
        if key.kind == KeyEventKind::Release {
            return None;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return match key.code {
                KeyCode::Char('c') | KeyCode::Char('C') => Some(DriveCommand::Interrupt),
                _ => None,
            };
        }

        let cmd = match key.code {
            KeyCode::Char('w') | KeyCode::Char('W') | KeyCode::Up => DriveCommand::ThrottleUp,
            KeyCode::Char('s') | KeyCode::Char('S') | KeyCode::Down => DriveCommand::ThrottleDown,
            KeyCode::Char('a') | KeyCode::Char('A') | KeyCode::Left => DriveCommand::SteerLeft,
            KeyCode::Char('d') | KeyCode::Char('D') | KeyCode::Right => DriveCommand::SteerRight,
            KeyCode::Char(' ') => DriveCommand::EmergencyStop,
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => DriveCommand::Quit,
            KeyCode::Char(c) => {
                let level = c.to_digit(10)? as u8;
                if level > PRESET_LEVELS {
                    return None;
                }
                DriveCommand::Preset(level)
            }
            _ => return None,
        };
        Some(cmd)
    }
}
