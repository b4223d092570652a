//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use airq_core::AutoStoreTrigger;

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Auto-store trigger as accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TriggerArg {
    /// Periodic timer and telemetry arrival
    Both,
    /// Periodic timer only
    Timer,
    /// Telemetry arrival only
    Arrival,
}

impl From<TriggerArg> for AutoStoreTrigger {
    fn from(arg: TriggerArg) -> Self {
        match arg {
            TriggerArg::Both => AutoStoreTrigger::TimerAndArrival,
            TriggerArg::Timer => AutoStoreTrigger::Timer,
            TriggerArg::Arrival => AutoStoreTrigger::Arrival,
        }
    }
}

/// Reusable device connection arguments
#[derive(Debug, Clone, Args)]
pub struct DeviceArgs {
    /// Device identifier (MAC address, UUID or advertised name), or use AIRQ_DEVICE env var
    #[arg(short, long, env = "AIRQ_DEVICE")]
    pub device: Option<String>,

    /// How long to scan for the device, in seconds
    #[arg(long, default_value = "10")]
    pub scan_timeout: u64,

    /// Abandon a connection attempt after this many seconds
    #[arg(short = 'T', long)]
    pub connect_timeout: Option<u64>,
}

/// Reusable auto-store arguments
#[derive(Debug, Clone, Args)]
pub struct AutoStoreArgs {
    /// Persist telemetry snapshots while connected
    #[arg(short, long)]
    pub auto_store: bool,

    /// Minimum seconds between persisted snapshots
    #[arg(long)]
    pub store_interval: Option<u64>,

    /// What triggers a persisted snapshot
    #[arg(long, value_enum)]
    pub trigger: Option<TriggerArg>,

    /// File that persisted snapshots are appended to (JSON lines)
    #[arg(long)]
    pub persist: Option<PathBuf>,
}

#[derive(Parser)]
#[command(name = "airq")]
#[command(author, version, about = "CLI for BLE air-quality sensors", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby sensors
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Connect to a sensor and stream its telemetry
    Monitor {
        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        store: AutoStoreArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Number of readings to print before exiting (0 for unlimited)
        #[arg(short = 'n', long, default_value = "0")]
        count: u32,
    },

    /// Switch a sensor's LED on or off
    Led {
        #[command(flatten)]
        device: DeviceArgs,

        /// LED state (on/off)
        #[arg(value_parser = parse_bool_arg, action = clap::ArgAction::Set)]
        state: bool,
    },

    /// Stream telemetry from a simulated sensor (no hardware required)
    Simulate {
        #[command(flatten)]
        store: AutoStoreArgs,

        /// Seconds between simulated notifications (1-30)
        #[arg(short, long, default_value = "5")]
        interval: u64,

        /// Stop after this many seconds (0 for unlimited)
        #[arg(long, default_value = "0")]
        duration: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration subcommands
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init,
}

/// Parse boolean argument with flexible input
pub fn parse_bool_arg(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" | "enable" | "enabled" => Ok(true),
        "false" | "no" | "off" | "0" | "disable" | "disabled" => Ok(false),
        _ => Err(format!(
            "Invalid value '{}'. Use: on/off, true/false, yes/no, 1/0",
            s
        )),
    }
}
