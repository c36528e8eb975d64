// Motor control module for the JetRacer chassis
//
// Provides:
// - Unit conversions (throttle / pulse width -> PCA9685 ticks)
// - PCA9685 expander access behind the `PwmExpander` trait
// - High-level throttle and steering driver

pub mod conversion;
mod driver;
pub mod pca9685;

pub use conversion::Direction;
pub use driver::{CarDriver, DriveError, Expander, JetRacer};
pub use pca9685::{BoardExpander, Pca9685Expander, PwmExpander};
