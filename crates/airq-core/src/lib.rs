//! BLE central engine for air-quality sensors.
//!
//! This crate discovers nearby sensors, runs one connection session at a
//! time through an explicit state machine, decodes telemetry notifications,
//! and optionally asks a persistence sink to store snapshots on a
//! rate-limited schedule.
//!
//! # Features
//!
//! - **Discovery**: deduplicated registry of advertising peripherals
//! - **Connection lifecycle**: `idle → scanning → connecting → connected → disconnecting → disconnected`
//! - **Telemetry**: particulate, environmental and gas readings decoded from notifications
//! - **Auto-store**: throttled persist requests driven by a timer, by arrivals, or both
//! - **LED control**: write to the peripheral's LED characteristic and watch its button
//! - **Simulation**: synthetic telemetry for running without hardware
//!
//! # Architecture
//!
//! The [`ConnectionStateMachine`] is synchronous and owns all state. The
//! [`Engine`] runs it on one task, feeding it radio events, caller requests
//! and timer ticks in arrival order, and publishes an [`EngineSnapshot`]
//! after every input. The platform BLE stack sits behind the [`RadioLink`]
//! trait: [`BtleRadio`] drives real hardware via btleplug, [`MockRadio`]
//! scripts it for tests.
//!
//! # Platform Differences
//!
//! On macOS peripherals are identified by a CoreBluetooth UUID that is
//! stable per host but not across machines. On Linux and Windows the
//! Bluetooth address is used.
//!
//! # Quick Start
//!
//! ```no_run
//! use airq_core::{BtleRadio, Engine, EngineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (radio, radio_events) = BtleRadio::new().await?;
//!     let engine = Engine::new(radio, EngineConfig::default())?.spawn(radio_events);
//!
//!     engine.start_scan().await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!
//!     let Some(sensor) = engine.snapshot().peripherals.first().cloned() else {
//!         return Ok(());
//!     };
//!     engine.connect(&sensor.id).await?;
//!     println!("{}", engine.wait_for_connection().await?);
//!     Ok(())
//! }
//! ```

pub mod autostore;
pub mod btle;
pub mod engine;
pub mod error;
pub mod events;
pub mod machine;
pub mod mock;
pub mod radio;
pub mod registry;
pub mod simulator;
pub mod telemetry;
pub mod util;

// Core exports
pub use autostore::{
    AutoStoreConfig, AutoStoreScheduler, AutoStoreTrigger, PersistRequest, PersistSink,
    TickSource, channel_sink,
};
pub use btle::BtleRadio;
pub use engine::{Engine, EngineConfig, EngineHandle, EngineSnapshot, forward_events};
pub use error::{Error, Result};
pub use events::{
    DisconnectReason, EngineEvent, EventDispatcher, EventReceiver, EventSender, RadioCommand,
    RadioEvent,
};
pub use machine::{CharacteristicRole, ConnectionSession, ConnectionState, ConnectionStateMachine};
pub use mock::MockRadio;
pub use radio::RadioLink;
pub use registry::{AdvertisementValue, DeviceRegistry, DiscoveredPeripheral};
pub use simulator::{SimulatedAir, SimulationHandle, Simulator};
pub use telemetry::TelemetryStore;
pub use util::{create_identifier, format_peripheral_id};

// Re-export from airq-types
pub use airq_types::uuid as uuids;
pub use airq_types::{
    EnvironmentalReading, GasReading, ParticulateReading, TelemetryCategory, TelemetrySnapshot,
    TelemetryValue,
};
