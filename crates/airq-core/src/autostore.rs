//! Rate-limited "persist now" policy.
//!
//! The [`AutoStoreScheduler`] decides when the current telemetry should be
//! handed to a persistence collaborator. Two triggers can fire an emission:
//!
//! - a periodic timer, started through an injected [`TickSource`]
//! - the arrival of a new telemetry sample
//!
//! Both triggers share one last-emission timestamp, so no two emissions are
//! ever less than [`AutoStoreConfig::min_interval`] apart. Which triggers are
//! active is selected by [`AutoStoreTrigger`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use airq_types::TelemetrySnapshot;

use crate::error::{Error, Result};

/// Default minimum interval between emissions.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(5);

/// Smallest accepted minimum interval.
pub const MIN_INTERVAL_FLOOR: Duration = Duration::from_millis(1);

/// Which events may trigger an emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoStoreTrigger {
    /// Both the periodic timer and telemetry arrival.
    #[default]
    TimerAndArrival,
    /// Only the periodic timer.
    Timer,
    /// Only telemetry arrival.
    Arrival,
}

impl AutoStoreTrigger {
    pub fn uses_timer(&self) -> bool {
        matches!(self, Self::TimerAndArrival | Self::Timer)
    }

    pub fn uses_arrival(&self) -> bool {
        matches!(self, Self::TimerAndArrival | Self::Arrival)
    }
}

impl fmt::Display for AutoStoreTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimerAndArrival => write!(f, "timer_and_arrival"),
            Self::Timer => write!(f, "timer"),
            Self::Arrival => write!(f, "arrival"),
        }
    }
}

impl FromStr for AutoStoreTrigger {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "timer_and_arrival" | "both" => Ok(Self::TimerAndArrival),
            "timer" => Ok(Self::Timer),
            "arrival" => Ok(Self::Arrival),
            other => Err(Error::invalid_config(format!(
                "unknown auto-store trigger '{}' (expected timer_and_arrival, timer or arrival)",
                other
            ))),
        }
    }
}

/// Auto-store policy options.
///
/// ```
/// use std::time::Duration;
/// use airq_core::autostore::{AutoStoreConfig, AutoStoreTrigger};
///
/// let config = AutoStoreConfig::builder()
///     .min_interval(Duration::from_secs(10))
///     .trigger(AutoStoreTrigger::Timer)
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoStoreConfig {
    /// Minimum time between two emissions, and the timer period.
    /// Default: 5 seconds.
    pub min_interval: Duration,
    /// Active triggers. Default: timer and arrival.
    pub trigger: AutoStoreTrigger,
}

impl Default for AutoStoreConfig {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
            trigger: AutoStoreTrigger::default(),
        }
    }
}

impl AutoStoreConfig {
    /// Create a new builder for AutoStoreConfig.
    pub fn builder() -> AutoStoreConfigBuilder {
        AutoStoreConfigBuilder::default()
    }

    /// Validate the options and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.min_interval < MIN_INTERVAL_FLOOR {
            return Err(Error::invalid_config("min_interval must be at least 1ms"));
        }
        Ok(())
    }
}

/// Builder for AutoStoreConfig.
#[derive(Debug, Clone, Default)]
pub struct AutoStoreConfigBuilder {
    config: AutoStoreConfig,
}

impl AutoStoreConfigBuilder {
    #[must_use]
    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.config.min_interval = interval;
        self
    }

    #[must_use]
    pub fn trigger(mut self, trigger: AutoStoreTrigger) -> Self {
        self.config.trigger = trigger;
        self
    }

    #[must_use]
    pub fn build(self) -> AutoStoreConfig {
        self.config
    }
}

/// The "persist now" signal handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistRequest {
    /// Identifier of the connected sensor.
    pub sensor_id: String,
    /// Display name of the sensor, if it was discovered with one.
    pub sensor_name: Option<String>,
    /// Telemetry at the moment of emission.
    pub snapshot: TelemetrySnapshot,
    /// Wall-clock time of the emission.
    #[serde(with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,
}

/// Receiver of persist signals.
///
/// Implemented for any `FnMut(PersistRequest) + Send` closure; use
/// [`channel_sink`] to forward requests to a channel instead.
pub trait PersistSink: Send {
    fn persist(&mut self, request: PersistRequest);
}

impl<F> PersistSink for F
where
    F: FnMut(PersistRequest) + Send,
{
    fn persist(&mut self, request: PersistRequest) {
        self(request)
    }
}

/// A sink forwarding every request to an unbounded channel.
///
/// Requests are silently dropped once the receiver is gone.
pub fn channel_sink(sender: mpsc::UnboundedSender<PersistRequest>) -> impl PersistSink {
    move |request: PersistRequest| {
        let _ = sender.send(request);
    }
}

/// Starts periodic timers for the scheduler.
///
/// Each tick must be routed back to [`AutoStoreScheduler::on_tick`] with the
/// same `generation`. Cancelling the returned token stops the timer.
pub trait TickSource: Send {
    fn start(&mut self, generation: u64, period: Duration) -> CancellationToken;
}

/// A tick source that never ticks. Ticks are delivered by the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualTicks;

impl TickSource for ManualTicks {
    fn start(&mut self, _generation: u64, _period: Duration) -> CancellationToken {
        CancellationToken::new()
    }
}

/// The auto-store gate and its timer.
pub struct AutoStoreScheduler {
    config: AutoStoreConfig,
    enabled: bool,
    last_emission: Option<Instant>,
    generation: u64,
    timer: Option<CancellationToken>,
    ticks: Box<dyn TickSource>,
    sink: Option<Box<dyn PersistSink>>,
    emissions: u64,
}

impl fmt::Debug for AutoStoreScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoStoreScheduler")
            .field("config", &self.config)
            .field("enabled", &self.enabled)
            .field("last_emission", &self.last_emission)
            .field("generation", &self.generation)
            .field("timer_running", &self.timer.is_some())
            .field("emissions", &self.emissions)
            .finish()
    }
}

impl AutoStoreScheduler {
    /// Create a disabled scheduler whose timer never ticks on its own.
    pub fn new(config: AutoStoreConfig) -> Self {
        Self {
            config,
            enabled: false,
            last_emission: None,
            generation: 0,
            timer: None,
            ticks: Box::new(ManualTicks),
            sink: None,
            emissions: 0,
        }
    }

    /// Use `ticks` to start the periodic timer.
    pub fn set_tick_source(&mut self, ticks: Box<dyn TickSource>) {
        self.ticks = ticks;
    }

    /// Deliver emissions to `sink`.
    pub fn set_sink(&mut self, sink: Box<dyn PersistSink>) {
        self.sink = Some(sink);
    }

    pub fn config(&self) -> &AutoStoreConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Generation of the currently running timer.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When the last emission happened, if any since enabling.
    pub fn last_emission(&self) -> Option<Instant> {
        self.last_emission
    }

    /// Total emissions since creation.
    pub fn emissions(&self) -> u64 {
        self.emissions
    }

    /// Enable or disable the scheduler.
    ///
    /// Enabling an enabled scheduler is a no-op. Disabling cancels the timer
    /// and clears the last-emission timestamp.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled == self.enabled {
            return;
        }
        if enabled {
            self.enabled = true;
            self.generation += 1;
            if self.config.trigger.uses_timer() {
                self.timer = Some(self.ticks.start(self.generation, self.config.min_interval));
            }
            info!(
                interval = ?self.config.min_interval,
                trigger = %self.config.trigger,
                "Auto-store enabled"
            );
        } else {
            self.stop();
            info!("Auto-store disabled");
        }
    }

    /// Disable unconditionally and clear all gate state.
    pub fn force_disable(&mut self) {
        if self.enabled || self.timer.is_some() {
            debug!("Auto-store force-disabled");
        }
        self.stop();
    }

    fn stop(&mut self) {
        self.enabled = false;
        self.last_emission = None;
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }

    /// Timer trigger. Returns `true` if a request was emitted.
    ///
    /// Ticks from a cancelled timer (an older generation) are ignored.
    pub fn on_tick(
        &mut self,
        generation: u64,
        now: Instant,
        request: impl FnOnce() -> Option<PersistRequest>,
    ) -> bool {
        if !self.enabled || !self.config.trigger.uses_timer() {
            return false;
        }
        if generation != self.generation {
            debug!(generation, current = self.generation, "Ignoring stale auto-store tick");
            return false;
        }
        self.try_emit(now, request)
    }

    /// Arrival trigger. Returns `true` if a request was emitted.
    pub fn on_telemetry_arrived(
        &mut self,
        now: Instant,
        request: impl FnOnce() -> Option<PersistRequest>,
    ) -> bool {
        if !self.enabled || !self.config.trigger.uses_arrival() {
            return false;
        }
        self.try_emit(now, request)
    }

    fn try_emit(&mut self, now: Instant, request: impl FnOnce() -> Option<PersistRequest>) -> bool {
        if let Some(last) = self.last_emission
            && now.saturating_duration_since(last) < self.config.min_interval
        {
            return false;
        }
        let Some(request) = request() else {
            return false;
        };

        self.last_emission = Some(now);
        self.emissions += 1;
        debug!(sensor = %request.sensor_id, "Auto-store emitting persist request");
        if let Some(sink) = self.sink.as_mut() {
            sink.persist(request);
        }
        true
    }
}
