//! Bluetooth UUIDs for the air-quality sensor peripheral.
//!
//! These identifiers must match the reference peripheral firmware exactly.

use uuid::{Uuid, uuid};

// --- Air-quality service ---

/// Air-quality telemetry service.
pub const AIR_QUALITY_SERVICE: Uuid = uuid!("12345678-1234-5678-1234-56789abcdef0");

/// Particulate matter characteristic (pm1, pm2.5, pm4, pm10).
pub const PARTICULATE: Uuid = uuid!("12345678-1234-5678-1234-56789abcdef1");

/// Environmental characteristic (temperature, relative humidity).
pub const ENVIRONMENTAL: Uuid = uuid!("12345678-1234-5678-1234-56789abcdef2");

/// Gas characteristic (VOC index, NOx index, CO2).
pub const GAS: Uuid = uuid!("12345678-1234-5678-1234-56789abcdef3");

/// The telemetry characteristics requested when the air-quality service is found.
pub const TELEMETRY_CHARACTERISTICS: [Uuid; 3] = [PARTICULATE, ENVIRONMENTAL, GAS];

// --- LED control service ---

/// LED control service.
pub const LED_SERVICE: Uuid = uuid!("19b10010-e8f2-537e-4f6c-d104768a1214");

/// LED characteristic (write `1` for on, `0` for off).
pub const LED: Uuid = uuid!("19b10011-e8f2-537e-4f6c-d104768a1214");

/// Button characteristic (notifies on press/release).
pub const BUTTON: Uuid = uuid!("19b10012-e8f2-537e-4f6c-d104768a1214");

/// The characteristics requested when the LED service is found.
pub const LED_CHARACTERISTICS: [Uuid; 2] = [LED, BUTTON];
