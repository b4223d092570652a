//! Scan command implementation.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use airq_core::{BtleRadio, Engine, EngineConfig};

use crate::cli::OutputFormat;
use crate::format::{format_scan_json, format_scan_text};
use crate::util::write_output;

pub async fn cmd_scan(
    timeout: u64,
    format: OutputFormat,
    output: Option<&PathBuf>,
    quiet: bool,
) -> Result<()> {
    let (radio, radio_events) = BtleRadio::new()
        .await
        .context("Failed to initialise Bluetooth adapter")?;
    let handle = Engine::new(radio, EngineConfig::default())?.spawn(radio_events);

    if !quiet && format == OutputFormat::Text {
        eprintln!("Scanning for sensors ({}s)...", timeout);
    }
    handle
        .start_scan()
        .await
        .context("Failed to scan for sensors")?;
    tokio::time::sleep(Duration::from_secs(timeout)).await;

    let peripherals = handle.snapshot().peripherals;
    info!(found = peripherals.len(), "Scan finished");
    handle.stop_scan().await.ok();
    handle.shutdown().await.ok();

    let content = match format {
        OutputFormat::Text => format_scan_text(&peripherals),
        OutputFormat::Json => format_scan_json(&peripherals)?,
    };
    write_output(output, &content)
}
