//! Simulate command implementation.
//!
//! Runs the full engine against a scripted radio and a random-walk sensor,
//! so telemetry output and auto-store can be tried without hardware.

use std::time::Duration;

use anyhow::{Context, Result};

use airq_core::simulator;
use airq_core::{DiscoveredPeripheral, Engine, MockRadio, Simulator};

use crate::cli::{AutoStoreArgs, OutputFormat};
use crate::commands::monitor::{StreamOptions, stream_telemetry, with_persistence};
use crate::config::{Config, engine_config};
use crate::util::connect;

/// Identifier of the simulated sensor.
const SIMULATED_ID: &str = "SIM-0001";
const SIMULATED_NAME: &str = "Simulated AirQ";

pub struct SimulateArgs<'a> {
    pub store: &'a AutoStoreArgs,
    pub interval: u64,
    pub duration: u64,
    pub format: OutputFormat,
    pub quiet: bool,
}

pub async fn cmd_simulate(args: SimulateArgs<'_>, config: &Config) -> Result<()> {
    let interval = Duration::from_secs(args.interval);
    simulator::validate_interval(interval)?;
    let engine_config = engine_config(None, args.store, config)?;

    let (radio, radio_events) = MockRadio::responsive();
    radio.advertise(DiscoveredPeripheral::new(
        SIMULATED_ID,
        Some(SIMULATED_NAME),
        Some(-40),
    ));
    let notifications = radio
        .event_sender()
        .context("Simulated radio has no event channel")?;

    let (engine, persist_path) =
        with_persistence(Engine::new(radio, engine_config)?, args.store, config)?;
    let handle = engine.spawn(radio_events);

    handle.start_scan().await?;
    handle
        .wait_for(|s| s.peripherals.iter().any(|p| p.id == SIMULATED_ID))
        .await?;
    connect(&handle, SIMULATED_ID).await?;
    if let Some(path) = &persist_path {
        handle.set_auto_store(true).await?;
        if !args.quiet {
            eprintln!("Auto-store enabled, writing to {}", path.display());
        }
    }
    if !args.quiet && args.format == OutputFormat::Text {
        eprintln!(
            "Simulating {} every {}s (Ctrl-C to stop)",
            SIMULATED_NAME, args.interval
        );
    }

    let simulation = Simulator::new().spawn(SIMULATED_ID, notifications, interval)?;
    let options = StreamOptions {
        format: args.format,
        count: 0,
        duration: (args.duration > 0).then(|| Duration::from_secs(args.duration)),
        quiet: args.quiet,
    };
    let result = stream_telemetry(&handle, &options).await;

    simulation.stop().await;
    handle.disconnect().await.ok();
    handle.shutdown().await.ok();
    result.map(|_| ())
}
