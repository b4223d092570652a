//! `airq`: command-line interface for BLE air-quality sensors.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scan` | Scan for nearby sensors |
//! | `monitor` | Connect and stream telemetry, optionally persisting snapshots |
//! | `led` | Switch a sensor's LED on or off |
//! | `simulate` | Stream telemetry from a simulated sensor |
//! | `config` | Manage CLI configuration |
//!
//! # Configuration
//!
//! Settings are read from `~/.config/airq/config.toml` (or platform
//! equivalent). Command-line flags override the file, and `AIRQ_DEVICE`
//! provides the default device.

mod cli;
mod commands;
mod config;
mod format;
mod sink;
mod util;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::{
    MonitorArgs, SimulateArgs, cmd_config, cmd_led, cmd_monitor, cmd_scan, cmd_simulate,
};
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load();

    match cli.command {
        Commands::Scan { timeout, format } => {
            cmd_scan(timeout, format, cli.output.as_ref(), cli.quiet).await?;
        }
        Commands::Monitor {
            device,
            store,
            format,
            count,
        } => {
            let args = MonitorArgs {
                device: &device,
                store: &store,
                format,
                count,
                quiet: cli.quiet,
            };
            cmd_monitor(args, &config).await?;
        }
        Commands::Led { device, state } => {
            cmd_led(&device, state, cli.quiet, &config).await?;
        }
        Commands::Simulate {
            store,
            interval,
            duration,
            format,
        } => {
            let args = SimulateArgs {
                store: &store,
                interval,
                duration,
                format,
                quiet: cli.quiet,
            };
            cmd_simulate(args, &config).await?;
        }
        Commands::Config { action } => cmd_config(action, &config)?,
    }

    Ok(())
}
