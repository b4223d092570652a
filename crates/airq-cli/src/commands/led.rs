//! LED command implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::timeout;

use airq_core::{BtleRadio, CharacteristicRole, Engine};

use crate::cli::{AutoStoreArgs, DeviceArgs};
use crate::config::{Config, engine_config, resolve_device};
use crate::util::{connect, find_device, require_device};

/// How long to wait for the LED characteristic after connecting.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn cmd_led(device: &DeviceArgs, on: bool, quiet: bool, config: &Config) -> Result<()> {
    let wanted = require_device(resolve_device(device.device.clone(), config))?;
    let no_store = AutoStoreArgs {
        auto_store: false,
        store_interval: None,
        trigger: None,
        persist: None,
    };
    let engine_config = engine_config(Some(device), &no_store, config)?;

    let (radio, radio_events) = BtleRadio::new()
        .await
        .context("Failed to initialise Bluetooth adapter")?;
    let handle = Engine::new(radio, engine_config)?.spawn(radio_events);

    let id = find_device(&handle, &wanted, Duration::from_secs(device.scan_timeout)).await?;
    connect(&handle, &id).await?;

    timeout(
        DISCOVERY_TIMEOUT,
        handle.wait_for(|s| {
            s.session
                .as_ref()
                .is_some_and(|session| session.characteristics.contains_key(&CharacteristicRole::LedControl))
        }),
    )
    .await
    .context("Sensor does not expose an LED characteristic")??;

    handle
        .set_led(on)
        .await
        .context("Failed to write LED state")?;
    if !quiet {
        println!("LED {}", if on { "on" } else { "off" });
    }

    handle.disconnect().await.ok();
    handle.shutdown().await.ok();
    Ok(())
}
