// JetRacer drive stack: PCA9685 throttle/steering driver and keyboard teleop

pub mod config;
pub mod messages;
pub mod motor;
pub mod teleop;
