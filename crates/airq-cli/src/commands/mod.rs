//! Command implementations for the CLI.

mod config;
mod led;
mod monitor;
mod scan;
mod simulate;

pub use config::cmd_config;
pub use led::cmd_led;
pub use monitor::{MonitorArgs, cmd_monitor};
pub use scan::cmd_scan;
pub use simulate::{SimulateArgs, cmd_simulate};
