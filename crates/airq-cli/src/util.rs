//! Utility functions for CLI operations.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tokio::time::timeout;
use tracing::info;

use airq_core::{ConnectionState, DiscoveredPeripheral, EngineHandle};

/// Get device identifier, with helpful error message.
pub fn require_device(device: Option<String>) -> Result<String> {
    device.ok_or_else(|| {
        anyhow!(
            "No device specified. Use --device <ID> or set AIRQ_DEVICE environment variable.\n\
             Run 'airq scan' to find nearby sensors."
        )
    })
}

/// Whether `peripheral` is the one the user asked for, by identifier or name.
pub fn matches_device(peripheral: &DiscoveredPeripheral, wanted: &str) -> bool {
    peripheral.id.eq_ignore_ascii_case(wanted)
        || peripheral
            .display_name()
            .is_some_and(|name| name.eq_ignore_ascii_case(wanted))
}

/// Scan until `wanted` is discovered and return its identifier.
pub async fn find_device(
    handle: &EngineHandle,
    wanted: &str,
    scan_timeout: Duration,
) -> Result<String> {
    handle
        .start_scan()
        .await
        .context("Failed to start scanning")?;

    let found = timeout(
        scan_timeout,
        handle.wait_for(|s| s.peripherals.iter().any(|p| matches_device(p, wanted))),
    )
    .await;

    let snapshot = match found {
        Ok(snapshot) => snapshot?,
        Err(_) => {
            handle.stop_scan().await.ok();
            bail!(
                "Device '{}' not found within {}s.\n\
                 Make sure the sensor is powered on and in range.",
                wanted,
                scan_timeout.as_secs()
            );
        }
    };

    snapshot
        .peripherals
        .iter()
        .find(|p| matches_device(p, wanted))
        .map(|p| p.id.clone())
        .ok_or_else(|| anyhow!("Device '{}' disappeared from the registry", wanted))
}

/// Connect to `id` and wait until the link is up.
pub async fn connect(handle: &EngineHandle, id: &str) -> Result<()> {
    handle
        .connect(id)
        .await
        .with_context(|| format!("Failed to connect to {}", id))?;

    match handle.wait_for_connection().await? {
        ConnectionState::Connected => {
            info!(peripheral = %id, "Connected");
            Ok(())
        }
        other => bail!("Connection to {} failed: {}", id, other),
    }
}

/// Write output to file or stdout
pub fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}
