//! Platform-agnostic types for BLE air-quality sensors.
//!
//! This crate provides the shared vocabulary of the workspace: the
//! well-known service and characteristic UUIDs, the typed telemetry records,
//! and the codec that decodes raw notification payloads into them.
//!
//! # Features
//!
//! - Telemetry records for particulate, environmental and gas measurements
//! - Fixed-layout little-endian `f32` payload decoding
//! - UUID constants for the sensor's GATT services and characteristics
//! - Error types for payload decoding
//!
//! # Example
//!
//! ```
//! use airq_types::{TelemetryCategory, TelemetryValue};
//!
//! let payload = airq_types::codec::encode(&[21.5, 40.0]);
//! let value = TelemetryValue::decode(TelemetryCategory::Environmental, &payload).unwrap();
//! assert_eq!(value.category(), TelemetryCategory::Environmental);
//! ```

pub mod codec;
pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{
    EnvironmentalReading, GasReading, ParticulateReading, TelemetryCategory, TelemetrySnapshot,
    TelemetryValue,
};
pub use uuid as uuids;
