use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use jetracer_drive::config::{Settings, parse_address};
use jetracer_drive::motor::JetRacer;
use jetracer_drive::teleop;

/// Keyboard teleoperation for the JetRacer
///
/// SAFETY: make sure the car is on blocks or in a clear area before driving.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON settings file (wiring, limits, teleop tuning)
    #[arg(long)]
    config: Option<PathBuf>,

    /// I2C bus number (/dev/i2c-N)
    #[arg(long)]
    bus: Option<u8>,

    /// Steering PCA9685 address, e.g. 0x40
    #[arg(long, value_parser = parse_address)]
    steering_addr: Option<u8>,

    /// Motor PCA9685 address, e.g. 0x60
    #[arg(long, value_parser = parse_address)]
    motor_addr: Option<u8>,

    /// Teleop throttle cap in (0, 1]
    #[arg(long)]
    max_throttle: Option<f32>,
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut settings = match &args.config {
        Some(path) => {
            info!("Loading settings from {}", path.display());
            Settings::load(path)?
        }
        None => Settings::default(),
    };

    // Flags win over the settings file
    if let Some(bus) = args.bus {
        settings.drive.bus = bus;
    }
    if let Some(addr) = args.steering_addr {
        settings.drive.steering_address = addr;
    }
    if let Some(addr) = args.motor_addr {
        settings.drive.motor_address = addr;
    }
    if let Some(cap) = args.max_throttle {
        settings.teleop.max_throttle = cap;
    }
    settings.teleop.validate()?;

    let driver = JetRacer::open(&settings.drive)?;
    teleop::run_terminal(driver, settings.teleop)?;
    Ok(())
}

fn main() {
    // Setup logging (set RUST_LOG=info or debug); stderr keeps the status line on stdout clean
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("\r\nJetRacer error: {}", e);
        std::process::exit(1);
    }
}
