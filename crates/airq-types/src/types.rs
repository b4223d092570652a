//! Core types for air-quality telemetry.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::codec::{self, ENVIRONMENTAL_LAYOUT, GAS_LAYOUT, PARTICULATE_LAYOUT};
use crate::error::ParseResult;

/// Category of telemetry carried by one characteristic.
///
/// Each category is updated independently: a notification on one
/// characteristic never alters the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TelemetryCategory {
    /// Particulate matter concentrations.
    Particulate,
    /// Temperature and relative humidity.
    Environmental,
    /// VOC index, NOx index and CO2.
    Gas,
}

impl TelemetryCategory {
    /// All categories, in wire order of their characteristic UUIDs.
    pub const ALL: [TelemetryCategory; 3] = [
        TelemetryCategory::Particulate,
        TelemetryCategory::Environmental,
        TelemetryCategory::Gas,
    ];

    /// Returns the characteristic UUID that carries this category.
    ///
    /// ```
    /// use airq_types::{TelemetryCategory, uuids};
    ///
    /// assert_eq!(TelemetryCategory::Gas.characteristic(), uuids::GAS);
    /// ```
    #[must_use]
    pub fn characteristic(&self) -> uuid::Uuid {
        match self {
            TelemetryCategory::Particulate => crate::uuid::PARTICULATE,
            TelemetryCategory::Environmental => crate::uuid::ENVIRONMENTAL,
            TelemetryCategory::Gas => crate::uuid::GAS,
        }
    }

    /// Look up the category carried by a characteristic UUID.
    #[must_use]
    pub fn from_characteristic(uuid: &uuid::Uuid) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|category| category.characteristic() == *uuid)
    }

    /// Minimum payload length for this category.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        match self {
            TelemetryCategory::Particulate => PARTICULATE_LAYOUT.min_len(),
            TelemetryCategory::Environmental => ENVIRONMENTAL_LAYOUT.min_len(),
            TelemetryCategory::Gas => GAS_LAYOUT.min_len(),
        }
    }
}

impl fmt::Display for TelemetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryCategory::Particulate => write!(f, "particulate"),
            TelemetryCategory::Environmental => write!(f, "environmental"),
            TelemetryCategory::Gas => write!(f, "gas"),
        }
    }
}

/// Particulate matter concentrations in µg/m³.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParticulateReading {
    /// PM1.0 concentration.
    pub pm1: f32,
    /// PM2.5 concentration.
    pub pm2_5: f32,
    /// PM4.0 concentration.
    pub pm4: f32,
    /// PM10 concentration.
    pub pm10: f32,
}

impl ParticulateReading {
    /// Decode from a particulate notification payload.
    ///
    /// The byte format is four little-endian `f32`s:
    /// - bytes 0-3: pm1
    /// - bytes 4-7: pm2.5
    /// - bytes 8-11: pm4
    /// - bytes 12-15: pm10
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MalformedPayload`](crate::ParseError::MalformedPayload)
    /// if `data` has fewer than 16 bytes.
    #[must_use = "parsing returns a Result that should be handled"]
    pub fn from_bytes(data: &[u8]) -> ParseResult<Self> {
        let [pm1, pm2_5, pm4, pm10] = codec::decode(&PARTICULATE_LAYOUT, data)?;
        Ok(Self {
            pm1,
            pm2_5,
            pm4,
            pm10,
        })
    }

    /// Encode in the wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        codec::encode(&[self.pm1, self.pm2_5, self.pm4, self.pm10])
    }
}

/// Temperature and relative humidity.
///
/// Humidity is produced by the device in the 0-100 range; this type does not
/// clamp it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EnvironmentalReading {
    /// Temperature in degrees Celsius.
    pub temperature: f32,
    /// Relative humidity in percent.
    pub humidity: f32,
}

impl EnvironmentalReading {
    /// Decode from an environmental notification payload (8 bytes).
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MalformedPayload`](crate::ParseError::MalformedPayload)
    /// if `data` has fewer than 8 bytes.
    #[must_use = "parsing returns a Result that should be handled"]
    pub fn from_bytes(data: &[u8]) -> ParseResult<Self> {
        let [temperature, humidity] = codec::decode(&ENVIRONMENTAL_LAYOUT, data)?;
        Ok(Self {
            temperature,
            humidity,
        })
    }

    /// Encode in the wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        codec::encode(&[self.temperature, self.humidity])
    }
}

/// Gas sensor indices and CO2 concentration.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GasReading {
    /// VOC index (1-500).
    pub voc_index: f32,
    /// NOx index (1-500).
    pub nox_index: f32,
    /// CO2 concentration in ppm.
    pub co2: f32,
}

impl GasReading {
    /// Decode from a gas notification payload (12 bytes).
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MalformedPayload`](crate::ParseError::MalformedPayload)
    /// if `data` has fewer than 12 bytes.
    #[must_use = "parsing returns a Result that should be handled"]
    pub fn from_bytes(data: &[u8]) -> ParseResult<Self> {
        let [voc_index, nox_index, co2] = codec::decode(&GAS_LAYOUT, data)?;
        Ok(Self {
            voc_index,
            nox_index,
            co2,
        })
    }

    /// Encode in the wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        codec::encode(&[self.voc_index, self.nox_index, self.co2])
    }
}

/// One decoded measurement set for a single category.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "category", rename_all = "snake_case"))]
pub enum TelemetryValue {
    /// Particulate sample.
    Particulate(ParticulateReading),
    /// Environmental sample.
    Environmental(EnvironmentalReading),
    /// Gas sample.
    Gas(GasReading),
}

impl TelemetryValue {
    /// Decode a payload for the given category.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MalformedPayload`](crate::ParseError::MalformedPayload)
    /// if `data` is shorter than the category's layout.
    pub fn decode(category: TelemetryCategory, data: &[u8]) -> ParseResult<Self> {
        match category {
            TelemetryCategory::Particulate => {
                ParticulateReading::from_bytes(data).map(TelemetryValue::Particulate)
            }
            TelemetryCategory::Environmental => {
                EnvironmentalReading::from_bytes(data).map(TelemetryValue::Environmental)
            }
            TelemetryCategory::Gas => GasReading::from_bytes(data).map(TelemetryValue::Gas),
        }
    }

    /// The category of this value.
    pub fn category(&self) -> TelemetryCategory {
        match self {
            TelemetryValue::Particulate(_) => TelemetryCategory::Particulate,
            TelemetryValue::Environmental(_) => TelemetryCategory::Environmental,
            TelemetryValue::Gas(_) => TelemetryCategory::Gas,
        }
    }

    /// The zero-valued default for a category.
    pub fn zero(category: TelemetryCategory) -> Self {
        match category {
            TelemetryCategory::Particulate => TelemetryValue::Particulate(Default::default()),
            TelemetryCategory::Environmental => {
                TelemetryValue::Environmental(Default::default())
            }
            TelemetryCategory::Gas => TelemetryValue::Gas(Default::default()),
        }
    }
}

/// Latest value of every telemetry category.
///
/// Categories that never received a sample hold their zero default and a
/// `None` update time.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TelemetrySnapshot {
    /// Latest particulate sample.
    pub particulate: ParticulateReading,
    /// Latest environmental sample.
    pub environmental: EnvironmentalReading,
    /// Latest gas sample.
    pub gas: GasReading,
    /// When the particulate sample was recorded.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339::option"))]
    pub particulate_at: Option<OffsetDateTime>,
    /// When the environmental sample was recorded.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339::option"))]
    pub environmental_at: Option<OffsetDateTime>,
    /// When the gas sample was recorded.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339::option"))]
    pub gas_at: Option<OffsetDateTime>,
}

impl TelemetrySnapshot {
    /// Overwrite the sample for the value's category.
    pub fn apply(&mut self, value: TelemetryValue, at: OffsetDateTime) {
        match value {
            TelemetryValue::Particulate(v) => {
                self.particulate = v;
                self.particulate_at = Some(at);
            }
            TelemetryValue::Environmental(v) => {
                self.environmental = v;
                self.environmental_at = Some(at);
            }
            TelemetryValue::Gas(v) => {
                self.gas = v;
                self.gas_at = Some(at);
            }
        }
    }

    /// Latest value for a category.
    pub fn get(&self, category: TelemetryCategory) -> TelemetryValue {
        match category {
            TelemetryCategory::Particulate => TelemetryValue::Particulate(self.particulate),
            TelemetryCategory::Environmental => {
                TelemetryValue::Environmental(self.environmental)
            }
            TelemetryCategory::Gas => TelemetryValue::Gas(self.gas),
        }
    }

    /// When a category was last updated.
    pub fn updated_at(&self, category: TelemetryCategory) -> Option<OffsetDateTime> {
        match category {
            TelemetryCategory::Particulate => self.particulate_at,
            TelemetryCategory::Environmental => self.environmental_at,
            TelemetryCategory::Gas => self.gas_at,
        }
    }

    /// Whether any category has ever been updated.
    pub fn has_data(&self) -> bool {
        self.particulate_at.is_some() || self.environmental_at.is_some() || self.gas_at.is_some()
    }
}
