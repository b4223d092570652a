//! Monitor command implementation.
//!
//! Connects to a sensor, prints every telemetry notification and, when
//! auto-store is enabled, appends throttled snapshots to a JSON-lines file.

use std::path::PathBuf;
use std::pin::pin;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use time::OffsetDateTime;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::sleep;
use tracing::{info, warn};

use airq_core::{
    BtleRadio, ConnectionState, DisconnectReason, Engine, EngineEvent, EngineHandle, RadioLink,
};

use crate::cli::{AutoStoreArgs, DeviceArgs, OutputFormat};
use crate::config::{Config, engine_config, resolve_auto_store, resolve_device, resolve_persist_path};
use crate::format::{format_telemetry_json, format_telemetry_text};
use crate::sink::JsonLinesSink;
use crate::util::{connect, find_device, require_device};

pub struct MonitorArgs<'a> {
    pub device: &'a DeviceArgs,
    pub store: &'a AutoStoreArgs,
    pub format: OutputFormat,
    pub count: u32,
    pub quiet: bool,
}

pub async fn cmd_monitor(args: MonitorArgs<'_>, config: &Config) -> Result<()> {
    let wanted = require_device(resolve_device(args.device.device.clone(), config))?;
    let engine_config = engine_config(Some(args.device), args.store, config)?;

    let (radio, radio_events) = BtleRadio::new()
        .await
        .context("Failed to initialise Bluetooth adapter")?;
    let (engine, persist_path) = with_persistence(
        Engine::new(radio, engine_config)?,
        args.store,
        config,
    )?;
    let handle = engine.spawn(radio_events);

    if !args.quiet {
        eprintln!("Looking for {}...", wanted);
    }
    let id = find_device(&handle, &wanted, Duration::from_secs(args.device.scan_timeout)).await?;
    connect(&handle, &id).await?;
    if let Some(path) = &persist_path {
        handle.set_auto_store(true).await?;
        if !args.quiet {
            eprintln!("Auto-store enabled, writing to {}", path.display());
        }
    }

    let options = StreamOptions {
        format: args.format,
        count: args.count,
        duration: None,
        quiet: args.quiet,
    };
    let result = stream_telemetry(&handle, &options).await;

    handle.disconnect().await.ok();
    handle.shutdown().await.ok();
    result.map(|_| ())
}

/// Attach a JSON-lines sink if auto-store is requested.
///
/// Returns the engine and the path snapshots are written to.
pub(crate) fn with_persistence<R: RadioLink + 'static>(
    engine: Engine<R>,
    store: &AutoStoreArgs,
    config: &Config,
) -> Result<(Engine<R>, Option<PathBuf>)> {
    if !resolve_auto_store(store, config) {
        return Ok((engine, None));
    }
    let path = resolve_persist_path(store, config);
    let sink = JsonLinesSink::open(&path)?;
    Ok((engine.with_persist_sink(sink), Some(path)))
}

pub(crate) struct StreamOptions {
    pub format: OutputFormat,
    /// Stop after this many readings (0 for unlimited).
    pub count: u32,
    /// Stop after this long.
    pub duration: Option<Duration>,
    pub quiet: bool,
}

/// Print engine events until interrupted, disconnected, or a limit is reached.
///
/// Returns the number of telemetry readings printed.
pub(crate) async fn stream_telemetry(handle: &EngineHandle, options: &StreamOptions) -> Result<u32> {
    let mut events = handle.subscribe();
    let mut ctrl_c = pin!(tokio::signal::ctrl_c());
    let mut deadline = pin!(async {
        match options.duration {
            Some(duration) => sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    });
    let mut received = 0;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                if !options.quiet {
                    eprintln!("\nShutting down...");
                }
                break;
            }
            _ = &mut deadline => {
                info!("Run duration reached");
                break;
            }
            event = events.recv() => match event {
                Ok(EngineEvent::Telemetry { id, value }) => {
                    let now = OffsetDateTime::now_utc();
                    let line = match options.format {
                        OutputFormat::Text => format_telemetry_text(&value, now),
                        OutputFormat::Json => format_telemetry_json(&id, &value, now)?,
                    };
                    println!("{}", line);
                    received += 1;
                    if options.count > 0 && received >= options.count {
                        break;
                    }
                }
                Ok(EngineEvent::ButtonChanged { pressed, .. }) => {
                    if !options.quiet {
                        eprintln!("Button {}", if pressed { "pressed" } else { "released" });
                    }
                }
                Ok(EngineEvent::PersistRequested { id }) => {
                    info!(sensor = %id, "Snapshot persisted");
                }
                Ok(EngineEvent::PayloadDropped { error, .. }) => {
                    warn!("Dropped notification: {}", error);
                }
                Ok(EngineEvent::StateChanged {
                    to: ConnectionState::Disconnected(reason),
                    ..
                }) => match reason {
                    DisconnectReason::UserRequested => break,
                    other => bail!("Sensor disconnected: {}", other),
                },
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Output fell behind, skipped events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    Ok(received)
}
