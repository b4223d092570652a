//! Latest-value cache of decoded telemetry.
//!
//! The store has a single writer (the engine loop). Readers hold a
//! [`watch::Receiver`] and always observe a whole [`TelemetrySnapshot`],
//! never a partially applied update.

use time::OffsetDateTime;
use tokio::sync::watch;

use airq_types::{TelemetryCategory, TelemetrySnapshot, TelemetryValue};

/// Latest telemetry value per category.
#[derive(Debug)]
pub struct TelemetryStore {
    current: TelemetrySnapshot,
    sender: watch::Sender<TelemetrySnapshot>,
}

impl TelemetryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(TelemetrySnapshot::default());
        Self {
            current: TelemetrySnapshot::default(),
            sender,
        }
    }

    /// Overwrite the latest sample for the value's category, stamped now.
    pub fn record(&mut self, value: TelemetryValue) {
        self.record_at(value, OffsetDateTime::now_utc());
    }

    /// Overwrite the latest sample for the value's category.
    pub fn record_at(&mut self, value: TelemetryValue, at: OffsetDateTime) {
        self.current.apply(value, at);
        self.sender.send_replace(self.current);
    }

    /// Latest value for a category, or its zero default.
    pub fn current(&self, category: TelemetryCategory) -> TelemetryValue {
        self.current.get(category)
    }

    /// Copy of every category's latest value.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.current
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<TelemetrySnapshot> {
        self.sender.subscribe()
    }

    /// Drop all values back to their zero defaults.
    pub fn reset(&mut self) {
        self.current = TelemetrySnapshot::default();
        self.sender.send_replace(self.current);
    }
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airq_types::{EnvironmentalReading, GasReading, ParticulateReading};

    #[test]
    fn test_current_defaults_to_zero() {
        let store = TelemetryStore::new();
        assert_eq!(
            store.current(TelemetryCategory::Gas),
            TelemetryValue::Gas(GasReading::default())
        );
    }

    #[test]
    fn test_record_overwrites_one_category() {
        let mut store = TelemetryStore::new();
        let gas = TelemetryValue::Gas(GasReading {
            voc_index: 100.0,
            nox_index: 1.0,
            co2: 500.0,
        });
        store.record(gas);
        store.record(TelemetryValue::Gas(GasReading {
            voc_index: 110.0,
            nox_index: 2.0,
            co2: 520.0,
        }));

        assert!(matches!(
            store.current(TelemetryCategory::Gas),
            TelemetryValue::Gas(g) if g.co2 == 520.0
        ));
        assert_eq!(
            store.current(TelemetryCategory::Particulate),
            TelemetryValue::Particulate(ParticulateReading::default())
        );
        assert!(store.snapshot().gas_at.is_some());
        assert!(store.snapshot().particulate_at.is_none());
    }

    #[test]
    fn test_subscribers_see_whole_snapshots() {
        let mut store = TelemetryStore::new();
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());

        store.record_at(
            TelemetryValue::Environmental(EnvironmentalReading {
                temperature: 21.0,
                humidity: 40.0,
            }),
            OffsetDateTime::UNIX_EPOCH,
        );

        assert!(rx.has_changed().unwrap());
        let snapshot = *rx.borrow_and_update();
        assert_eq!(snapshot.environmental.temperature, 21.0);
        assert_eq!(snapshot.environmental_at, Some(OffsetDateTime::UNIX_EPOCH));
    }

    #[test]
    fn test_reset() {
        let mut store = TelemetryStore::new();
        store.record(TelemetryValue::zero(TelemetryCategory::Particulate));
        assert!(store.snapshot().has_data());
        store.reset();
        assert!(!store.snapshot().has_data());
    }
}
