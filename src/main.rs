//! wl-cloak entry point

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use wl_cloak::config::Config;
use wl_cloak::engine;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "wl-cloak")]
#[command(version, about = "Anti-fingerprinting input obfuscation daemon", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum per-event delay in milliseconds
    #[arg(long, env = "WL_CLOAK_MAX_DELAY")]
    max_delay: Option<u64>,

    /// Crosshair arm length in pixels
    #[arg(long)]
    cursor_radius: Option<i32>,

    /// Directory scanned for input devices
    #[arg(long)]
    device_dir: Option<PathBuf>,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(max_delay) = args.max_delay {
        config.obfuscation.max_delay_ms = max_delay;
    }
    if let Some(radius) = args.cursor_radius {
        config.overlay.cursor_radius = radius;
    }
    if let Some(device_dir) = args.device_dir {
        config.input.device_dir = device_dir;
    }
    config.validate()?;

    engine::run(config)
}

fn init_logging(args: &Args) {
    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wl_cloak={level},warn")));

    // Diagnostics belong on stderr; stdout stays silent
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
