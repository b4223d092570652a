//! Deduplicated registry of peripherals seen during a scan.
//!
//! The registry keeps the first sighting of each identifier. Rediscovery
//! never mutates an existing entry, and peripherals without a usable name
//! are never admitted.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Placeholder name some platforms report for peripherals that never
/// advertised a local name.
pub const PLACEHOLDER_NAME: &str = "Unknown";

/// One raw advertisement metadata value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AdvertisementValue {
    /// Opaque payload bytes (manufacturer or service data).
    Bytes(Vec<u8>),
    /// Text value.
    Text(String),
    /// A list of advertised service UUIDs.
    Uuids(Vec<Uuid>),
    /// Integer value such as a TX power level.
    Integer(i64),
}

/// A peripheral reported by the radio layer during scanning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredPeripheral {
    /// Stable identifier (address on Linux/Windows, CoreBluetooth UUID on macOS).
    pub id: String,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Signal strength in dBm. More negative means weaker.
    pub rssi: Option<i16>,
    /// Raw advertisement metadata.
    #[serde(default)]
    pub advertisement: BTreeMap<String, AdvertisementValue>,
}

impl DiscoveredPeripheral {
    /// Create a peripheral with no advertisement metadata.
    pub fn new(id: impl Into<String>, name: Option<&str>, rssi: Option<i16>) -> Self {
        Self {
            id: id.into(),
            name: name.map(str::to_string),
            rssi,
            advertisement: BTreeMap::new(),
        }
    }

    /// Attach an advertisement metadata entry.
    #[must_use]
    pub fn with_advertisement(mut self, key: impl Into<String>, value: AdvertisementValue) -> Self {
        self.advertisement.insert(key.into(), value);
        self
    }

    /// The display name, if it is usable.
    ///
    /// Empty, whitespace-only and placeholder names resolve to `None`.
    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty() && *name != PLACEHOLDER_NAME)
    }
}

/// In-memory collection of discovered peripherals, in discovery order.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    entries: Vec<DiscoveredPeripheral>,
    index: HashMap<String, usize>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a peripheral unless it is unnamed or already known.
    ///
    /// Returns `true` if the peripheral was admitted.
    pub fn on_discovered(&mut self, peripheral: DiscoveredPeripheral) -> bool {
        if peripheral.display_name().is_none() {
            return false;
        }
        if self.index.contains_key(&peripheral.id) {
            return false;
        }
        self.index.insert(peripheral.id.clone(), self.entries.len());
        self.entries.push(peripheral);
        true
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// Look up a peripheral by identifier.
    pub fn get(&self, id: &str) -> Option<&DiscoveredPeripheral> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    /// Whether the identifier is known.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &DiscoveredPeripheral> {
        self.entries.iter()
    }

    /// Copy of all entries in discovery order.
    pub fn snapshot(&self) -> Vec<DiscoveredPeripheral> {
        self.entries.clone()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn arb_peripheral() -> impl Strategy<Value = DiscoveredPeripheral> {
        (
            "[A-D]",
            proptest::option::of(prop_oneof![
                Just(String::new()),
                Just("Unknown".to_string()),
                Just("  ".to_string()),
                "[a-z]{1,6}",
            ]),
            proptest::option::of(-100i16..0),
        )
            .prop_map(|(id, name, rssi)| DiscoveredPeripheral {
                id,
                name,
                rssi,
                advertisement: BTreeMap::new(),
            })
    }

    proptest! {
        #[test]
        fn registry_never_holds_duplicates_or_unnamed(
            sightings in proptest::collection::vec(arb_peripheral(), 0..40)
        ) {
            let mut registry = DeviceRegistry::new();
            for p in sightings {
                registry.on_discovered(p);
            }

            let mut seen = HashSet::new();
            for p in registry.iter() {
                prop_assert!(seen.insert(p.id.clone()));
                prop_assert!(p.display_name().is_some());
            }
            prop_assert_eq!(seen.len(), registry.len());
        }

        #[test]
        fn registry_keeps_first_named_sighting(
            sightings in proptest::collection::vec(arb_peripheral(), 0..40)
        ) {
            let mut registry = DeviceRegistry::new();
            for p in &sightings {
                registry.on_discovered(p.clone());
            }

            for p in registry.iter() {
                let first = sightings
                    .iter()
                    .find(|s| s.id == p.id && s.display_name().is_some())
                    .unwrap();
                prop_assert_eq!(first, p);
            }
        }
    }
}
