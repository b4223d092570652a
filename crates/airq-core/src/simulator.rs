//! Synthetic telemetry for running the engine without hardware.
//!
//! The [`Simulator`] random-walks plausible air-quality values and emits them
//! as characteristic notifications in the peripheral's wire format. Combined
//! with a responsive [`MockRadio`](crate::mock::MockRadio) it exercises the
//! whole pipeline: decoding, the telemetry store and auto-store.
//!
//! Each step moves the values by a small bounded amount:
//!
//! | Value | Start | Step | Bounds |
//! |-------|-------|------|--------|
//! | PM2.5 | 20 µg/m³ | ±2 | ≥ 0 |
//! | Temperature | 22 °C | ±0.3 | none |
//! | Humidity | 50 % | ±1 | 0-100 |
//! | VOC index | 100 | ±5 | 1-500 |
//! | NOx index | 1 | ±1 | 1-500 |
//! | CO2 | 600 ppm | ±15 | ≥ 400 |
//!
//! PM1, PM4 and PM10 are derived from PM2.5 with fixed ratios.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use airq_types::{
    EnvironmentalReading, GasReading, ParticulateReading, TelemetryCategory,
};

use crate::error::{Error, Result};
use crate::events::RadioEvent;

/// Default time between simulated notifications.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
/// Shortest accepted interval.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);
/// Longest accepted interval.
pub const MAX_INTERVAL: Duration = Duration::from_secs(30);

/// Check that a simulation interval lies within 1-30 seconds.
pub fn validate_interval(interval: Duration) -> Result<()> {
    if !(MIN_INTERVAL..=MAX_INTERVAL).contains(&interval) {
        return Err(Error::invalid_config(format!(
            "simulation interval must be between {}s and {}s, got {:?}",
            MIN_INTERVAL.as_secs(),
            MAX_INTERVAL.as_secs(),
            interval
        )));
    }
    Ok(())
}

/// Current simulated air.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedAir {
    pub pm2_5: f32,
    pub temperature: f32,
    pub humidity: f32,
    pub voc_index: f32,
    pub nox_index: f32,
    pub co2: f32,
}

impl Default for SimulatedAir {
    fn default() -> Self {
        Self {
            pm2_5: 20.0,
            temperature: 22.0,
            humidity: 50.0,
            voc_index: 100.0,
            nox_index: 1.0,
            co2: 600.0,
        }
    }
}

impl SimulatedAir {
    pub fn particulate(&self) -> ParticulateReading {
        ParticulateReading {
            pm1: self.pm2_5 * 0.6,
            pm2_5: self.pm2_5,
            pm4: self.pm2_5 * 1.2,
            pm10: self.pm2_5 * 1.5,
        }
    }

    pub fn environmental(&self) -> EnvironmentalReading {
        EnvironmentalReading {
            temperature: self.temperature,
            humidity: self.humidity,
        }
    }

    pub fn gas(&self) -> GasReading {
        GasReading {
            voc_index: self.voc_index,
            nox_index: self.nox_index,
            co2: self.co2,
        }
    }

    /// Notification payloads for every telemetry characteristic.
    pub fn payloads(&self) -> [(Uuid, Vec<u8>); 3] {
        [
            (
                TelemetryCategory::Particulate.characteristic(),
                self.particulate().to_bytes(),
            ),
            (
                TelemetryCategory::Environmental.characteristic(),
                self.environmental().to_bytes(),
            ),
            (TelemetryCategory::Gas.characteristic(), self.gas().to_bytes()),
        ]
    }
}

/// Random-walk telemetry generator.
#[derive(Debug)]
pub struct Simulator<G = StdRng> {
    air: SimulatedAir,
    rng: G,
}

impl Simulator<StdRng> {
    /// Start from the default air with an OS-seeded generator.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Start from the default air with a reproducible generator.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }
}

impl Default for Simulator<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: Rng> Simulator<G> {
    pub fn with_rng(rng: G) -> Self {
        Self {
            air: SimulatedAir::default(),
            rng,
        }
    }

    pub fn air(&self) -> SimulatedAir {
        self.air
    }

    /// Advance one step and return the new air.
    pub fn step(&mut self) -> SimulatedAir {
        let rng = &mut self.rng;
        let air = &mut self.air;

        air.pm2_5 = (air.pm2_5 + rng.random_range(-2.0..=2.0)).max(0.0);
        air.temperature += rng.random_range(-0.3..=0.3);
        air.humidity = (air.humidity + rng.random_range(-1.0..=1.0)).clamp(0.0, 100.0);
        air.voc_index = (air.voc_index + rng.random_range(-5.0..=5.0)).clamp(1.0, 500.0);
        air.nox_index = (air.nox_index + rng.random_range(-1.0..=1.0)).clamp(1.0, 500.0);
        air.co2 = (air.co2 + rng.random_range(-15.0..=15.0)).max(400.0);

        *air
    }
}

impl<G: Rng + Send + 'static> Simulator<G> {
    /// Emit one step of notifications for `peripheral_id` every `period`.
    ///
    /// The first notifications are sent after one full period.
    pub fn spawn(
        mut self,
        peripheral_id: impl Into<String>,
        events: mpsc::UnboundedSender<RadioEvent>,
        period: Duration,
    ) -> Result<SimulationHandle> {
        validate_interval(period)?;
        let id = peripheral_id.into();
        let token = CancellationToken::new();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticks = interval(period);
            ticks.tick().await;
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticks.tick() => {
                        let air = self.step();
                        debug!(pm2_5 = air.pm2_5, temperature = air.temperature, "Simulated step");
                        for (characteristic, value) in air.payloads() {
                            let event = RadioEvent::CharacteristicValueUpdated {
                                id: id.clone(),
                                characteristic,
                                value,
                            };
                            if events.send(event).is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(SimulationHandle {
            token,
            handle: Some(handle),
        })
    }
}

/// A running simulation. Dropping the handle stops it.
#[derive(Debug)]
pub struct SimulationHandle {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SimulationHandle {
    /// Stop the simulation and wait for its task to finish.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for SimulationHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airq_types::{TelemetryValue, uuids};

    #[test]
    fn test_interval_validation() {
        assert!(validate_interval(Duration::from_secs(5)).is_ok());
        assert!(validate_interval(Duration::from_secs(1)).is_ok());
        assert!(validate_interval(Duration::from_secs(30)).is_ok());
        assert!(validate_interval(Duration::from_millis(500)).is_err());
        assert!(validate_interval(Duration::from_secs(31)).is_err());
    }

    #[test]
    fn test_walk_stays_in_bounds() {
        let mut sim = Simulator::seeded(7);
        for _ in 0..10_000 {
            let air = sim.step();
            assert!(air.pm2_5 >= 0.0);
            assert!((0.0..=100.0).contains(&air.humidity));
            assert!((1.0..=500.0).contains(&air.voc_index));
            assert!((1.0..=500.0).contains(&air.nox_index));
            assert!(air.co2 >= 400.0);
        }
    }

    #[test]
    fn test_step_size_is_bounded() {
        let mut sim = Simulator::seeded(42);
        let mut previous = sim.air();
        for _ in 0..1_000 {
            let air = sim.step();
            assert!((air.temperature - previous.temperature).abs() <= 0.3 + 1e-4);
            assert!((air.pm2_5 - previous.pm2_5).abs() <= 2.0 + 1e-4);
            previous = air;
        }
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let mut a = Simulator::seeded(1);
        let mut b = Simulator::seeded(1);
        for _ in 0..10 {
            assert_eq!(a.step(), b.step());
        }
    }

    #[test]
    fn test_payloads_decode() {
        let air = SimulatedAir::default();
        let payloads = air.payloads();
        assert_eq!(payloads[0].0, uuids::PARTICULATE);

        let value =
            TelemetryValue::decode(TelemetryCategory::Particulate, &payloads[0].1).unwrap();
        assert!(matches!(value, TelemetryValue::Particulate(p) if p.pm2_5 == 20.0));

        let value = TelemetryValue::decode(TelemetryCategory::Environmental, &payloads[1].1).unwrap();
        assert!(matches!(value, TelemetryValue::Environmental(e) if e.humidity == 50.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_emits_notifications() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = Simulator::seeded(3)
            .spawn("SIM", tx, Duration::from_secs(5))
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            RadioEvent::CharacteristicValueUpdated { ref id, characteristic, .. }
                if id == "SIM" && characteristic == uuids::PARTICULATE
        ));
        assert!(handle.is_running());
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_spawn_rejects_bad_interval() {
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(
            Simulator::seeded(3)
                .spawn("SIM", tx, Duration::from_millis(10))
                .is_err()
        );
    }
}
