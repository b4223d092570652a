//! Example: Monitoring a Simulated Sensor
//!
//! This example runs the full engine against a scripted radio and a
//! simulated sensor, so it works without any Bluetooth hardware. It scans,
//! connects, enables auto-store and prints every event for half a minute.
//!
//! Run with: `cargo run --example monitor`

use std::time::Duration;

use airq_core::autostore::channel_sink;
use airq_core::{
    DiscoveredPeripheral, Engine, EngineConfig, EngineEvent, MockRadio, Simulator, forward_events,
};
use tokio::sync::mpsc;

const SENSOR: &str = "SIM-0001";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let (radio, radio_events) = MockRadio::responsive();
    radio.advertise(DiscoveredPeripheral::new(SENSOR, Some("Simulated AirQ"), Some(-42)));

    let (persist_tx, mut persist_rx) = mpsc::unbounded_channel();
    let engine = Engine::new(radio.clone(), EngineConfig::default())?
        .with_persist_sink(channel_sink(persist_tx));
    let printer = forward_events(engine.subscribe(), |event| match event {
        EngineEvent::Telemetry { value, .. } => println!("  telemetry: {:?}", value),
        EngineEvent::StateChanged { from, to } => println!("  state: {} -> {}", from, to),
        other => println!("  {:?}", other),
    });
    let handle = engine.spawn(radio_events);

    handle.start_scan().await?;
    handle
        .wait_for(|s| s.peripherals.iter().any(|p| p.id == SENSOR))
        .await?;
    handle.connect(SENSOR).await?;
    println!("Connection: {}", handle.wait_for_connection().await?);
    handle.set_auto_store(true).await?;

    let Some(events) = radio.event_sender() else {
        return Ok(());
    };
    let simulation = Simulator::new().spawn(SENSOR, events, Duration::from_secs(2))?;

    let collector = tokio::spawn(async move {
        while let Some(request) = persist_rx.recv().await {
            println!(
                "Persist {} at {}: pm2.5={:.1} temp={:.1}",
                request.sensor_id,
                request.requested_at,
                request.snapshot.particulate.pm2_5,
                request.snapshot.environmental.temperature
            );
        }
    });

    tokio::time::sleep(Duration::from_secs(30)).await;
    simulation.stop().await;
    handle.disconnect().await?;
    handle.shutdown().await?;
    drop(handle);

    let _ = printer.await;
    let _ = collector.await;
    Ok(())
}
