//! Output formatting for scan results and telemetry.

use anyhow::{Context, Result};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use airq_core::{DiscoveredPeripheral, TelemetryValue};

/// One telemetry reading as printed in JSON output.
#[derive(Debug, Serialize)]
pub struct TelemetryLine<'a> {
    pub sensor: &'a str,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
    #[serde(flatten)]
    pub value: TelemetryValue,
}

pub fn format_scan_text(peripherals: &[DiscoveredPeripheral]) -> String {
    if peripherals.is_empty() {
        return "No sensors found.\n\n\
                Make sure:\n  \
                - The sensor is powered on and advertising\n  \
                - Bluetooth is enabled on this computer\n  \
                - The sensor is within range\n"
            .to_string();
    }

    let mut out = format!("Found {} sensor(s):\n\n", peripherals.len());
    for peripheral in peripherals {
        let rssi = peripheral
            .rssi
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "N/A".to_string());
        out.push_str(&format!(
            "  {}\n    Identifier: {}\n    RSSI: {}\n",
            peripheral.display_name().unwrap_or("Unknown"),
            peripheral.id,
            rssi
        ));
    }
    out
}

pub fn format_scan_json(peripherals: &[DiscoveredPeripheral]) -> Result<String> {
    let json =
        serde_json::to_string_pretty(peripherals).context("Failed to serialize scan results")?;
    Ok(json + "\n")
}

pub fn format_telemetry_text(value: &TelemetryValue, received_at: OffsetDateTime) -> String {
    let time = received_at
        .format(&Rfc3339)
        .unwrap_or_else(|_| received_at.to_string());
    let body = match value {
        TelemetryValue::Particulate(p) => format!(
            "PM1 {:.1}  PM2.5 {:.1}  PM4 {:.1}  PM10 {:.1} µg/m³",
            p.pm1, p.pm2_5, p.pm4, p.pm10
        ),
        TelemetryValue::Environmental(e) => format!(
            "Temperature {:.1} °C  Humidity {:.1} %",
            e.temperature, e.humidity
        ),
        TelemetryValue::Gas(g) => format!(
            "VOC {:.0}  NOx {:.0}  CO2 {:.0} ppm",
            g.voc_index, g.nox_index, g.co2
        ),
    };
    format!("[{}] {:<13} {}", time, value.category(), body)
}

pub fn format_telemetry_json(
    sensor: &str,
    value: &TelemetryValue,
    received_at: OffsetDateTime,
) -> Result<String> {
    let line = TelemetryLine {
        sensor,
        received_at,
        value: *value,
    };
    serde_json::to_string(&line).context("Failed to serialize telemetry")
}
