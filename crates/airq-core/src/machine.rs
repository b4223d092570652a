//! The connection lifecycle of a single peripheral.
//!
//! [`ConnectionStateMachine`] owns every piece of mutable engine state: the
//! device registry, the connection session, the telemetry store and the
//! auto-store scheduler. It is driven from exactly one place, either caller
//! operations ([`start_scan`](ConnectionStateMachine::start_scan),
//! [`connect`](ConnectionStateMachine::connect), ...) or radio events through
//! [`handle_event`](ConnectionStateMachine::handle_event), and talks to the
//! platform through a [`RadioLink`].
//!
//! ```text
//!            start_scan             connect
//!   Idle ───────────────▶ Scanning ─────────▶ Connecting ──Connected──▶ Connected
//!    ▲  ◀─────────────────    │                 │    │                     │
//!    │       stop_scan        │ connect         │    │ disconnect()        │ disconnect()
//!    │                        ▼                 │    ▼                     ▼
//!    │                    Connecting            │  Disconnecting ◀─────────┘
//!    │                                          │    │
//!    │                     ConnectFailed /      │    │ Disconnected / ConnectFailed
//!    │                     Disconnected         ▼    ▼
//!    └─────────────────────────────────────  Disconnected(reason)
//! ```
//!
//! Events naming a peripheral other than the session target are ignored.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use airq_types::uuids::{self, AIR_QUALITY_SERVICE, LED_SERVICE};
use airq_types::{TelemetryCategory, TelemetryValue};

use crate::autostore::{AutoStoreConfig, AutoStoreScheduler, PersistRequest, PersistSink, TickSource};
use crate::error::{Error, Result};
use crate::events::{DisconnectReason, EngineEvent, EventDispatcher, RadioCommand, RadioEvent};
use crate::radio::RadioLink;
use crate::registry::{DeviceRegistry, DiscoveredPeripheral};
use crate::telemetry::TelemetryStore;

/// Lifecycle state of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    Connected,
    Disconnecting,
    /// Terminal state of one connection attempt.
    Disconnected(DisconnectReason),
}

impl ConnectionState {
    /// Whether a connection session exists in this state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Disconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Scanning => write!(f, "scanning"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnecting => write!(f, "disconnecting"),
            ConnectionState::Disconnected(reason) => write!(f, "disconnected ({})", reason),
        }
    }
}

/// Semantic role of a characteristic on the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacteristicRole {
    Particulate,
    Environmental,
    Gas,
    LedControl,
    Button,
}

impl From<TelemetryCategory> for CharacteristicRole {
    fn from(category: TelemetryCategory) -> Self {
        match category {
            TelemetryCategory::Particulate => Self::Particulate,
            TelemetryCategory::Environmental => Self::Environmental,
            TelemetryCategory::Gas => Self::Gas,
        }
    }
}

impl CharacteristicRole {
    pub const ALL: [CharacteristicRole; 5] = [
        Self::Particulate,
        Self::Environmental,
        Self::Gas,
        Self::LedControl,
        Self::Button,
    ];

    /// Map a characteristic UUID to its role.
    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        if let Some(category) = TelemetryCategory::from_characteristic(uuid) {
            return Some(category.into());
        }
        [Self::LedControl, Self::Button]
            .into_iter()
            .find(|role| role.uuid() == *uuid)
    }

    /// The characteristic UUID for this role.
    pub fn uuid(&self) -> Uuid {
        match self {
            Self::LedControl => uuids::LED,
            Self::Button => uuids::BUTTON,
            Self::Particulate => TelemetryCategory::Particulate.characteristic(),
            Self::Environmental => TelemetryCategory::Environmental.characteristic(),
            Self::Gas => TelemetryCategory::Gas.characteristic(),
        }
    }

    /// The service this role's characteristic belongs to.
    pub fn service(&self) -> Uuid {
        match self {
            Self::Particulate | Self::Environmental | Self::Gas => AIR_QUALITY_SERVICE,
            Self::LedControl | Self::Button => LED_SERVICE,
        }
    }

    /// Telemetry category carried by this role, if any.
    pub fn telemetry_category(&self) -> Option<TelemetryCategory> {
        match self {
            Self::Particulate => Some(TelemetryCategory::Particulate),
            Self::Environmental => Some(TelemetryCategory::Environmental),
            Self::Gas => Some(TelemetryCategory::Gas),
            Self::LedControl | Self::Button => None,
        }
    }

    /// Whether the central subscribes to notifications for this role.
    pub fn is_notifying(&self) -> bool {
        !matches!(self, Self::LedControl)
    }
}

/// The single active or pending connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSession {
    /// Identifier of the target peripheral.
    pub target: String,
    /// Name the target was discovered with, if it was discovered.
    pub name: Option<String>,
    /// Connection attempt number, increasing across sessions.
    pub attempt: u64,
    /// Services reported by discovery.
    pub services: BTreeSet<Uuid>,
    /// Resolved characteristic handles.
    pub characteristics: BTreeMap<CharacteristicRole, Uuid>,
    /// Roles with notifications enabled.
    pub subscribed: BTreeSet<CharacteristicRole>,
}

impl ConnectionSession {
    fn new(target: String, name: Option<String>, attempt: u64) -> Self {
        Self {
            target,
            name,
            attempt,
            services: BTreeSet::new(),
            characteristics: BTreeMap::new(),
            subscribed: BTreeSet::new(),
        }
    }
}

/// Connection lifecycle, discovery registry, telemetry cache and auto-store
/// policy behind one serial entry point.
pub struct ConnectionStateMachine<R> {
    radio: R,
    state: ConnectionState,
    state_before_scan: ConnectionState,
    adapter_powered: Option<bool>,
    resume_scan_on_power_on: bool,
    auto_scan_on_power_on: bool,
    registry: DeviceRegistry,
    session: Option<ConnectionSession>,
    attempts: u64,
    telemetry: TelemetryStore,
    autostore: AutoStoreScheduler,
    malformed_payloads: u64,
    events: EventDispatcher,
}

impl<R: fmt::Debug> fmt::Debug for ConnectionStateMachine<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionStateMachine")
            .field("radio", &self.radio)
            .field("state", &self.state)
            .field("session", &self.session)
            .field("adapter_powered", &self.adapter_powered)
            .field("registry_len", &self.registry.len())
            .field("autostore", &self.autostore)
            .finish()
    }
}

impl<R: RadioLink> ConnectionStateMachine<R> {
    /// Create an idle machine.
    pub fn new(radio: R, auto_store: AutoStoreConfig, events: EventDispatcher) -> Self {
        Self {
            radio,
            state: ConnectionState::Idle,
            state_before_scan: ConnectionState::Idle,
            adapter_powered: None,
            resume_scan_on_power_on: false,
            auto_scan_on_power_on: false,
            registry: DeviceRegistry::new(),
            session: None,
            attempts: 0,
            telemetry: TelemetryStore::new(),
            autostore: AutoStoreScheduler::new(auto_store),
            malformed_payloads: 0,
            events,
        }
    }

    /// Start scanning whenever the adapter reports it is powered on.
    pub fn set_auto_scan_on_power_on(&mut self, enabled: bool) {
        self.auto_scan_on_power_on = enabled;
    }

    /// Use `ticks` to drive the auto-store timer.
    pub fn set_tick_source(&mut self, ticks: Box<dyn TickSource>) {
        self.autostore.set_tick_source(ticks);
    }

    /// Deliver auto-store emissions to `sink`.
    pub fn set_persist_sink(&mut self, sink: Box<dyn PersistSink>) {
        self.autostore.set_sink(sink);
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn session(&self) -> Option<&ConnectionSession> {
        self.session.as_ref()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn telemetry(&self) -> &TelemetryStore {
        &self.telemetry
    }

    pub fn autostore(&self) -> &AutoStoreScheduler {
        &self.autostore
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Last known adapter power state, `None` until the first report.
    pub fn adapter_powered(&self) -> Option<bool> {
        self.adapter_powered
    }

    /// Number of notification payloads dropped as malformed.
    pub fn malformed_payloads(&self) -> u64 {
        self.malformed_payloads
    }

    // --- Caller operations ---

    /// Begin scanning, clearing the registry.
    ///
    /// Idempotent while already scanning.
    pub fn start_scan(&mut self) -> Result<()> {
        if self.adapter_powered == Some(false) {
            return Err(Error::AdapterUnavailable);
        }
        match self.state {
            ConnectionState::Scanning => return Ok(()),
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Disconnecting => {
                return Err(Error::SessionActive {
                    state: self.state.clone(),
                });
            }
            ConnectionState::Idle | ConnectionState::Disconnected(_) => {}
        }

        self.radio.submit(RadioCommand::ScanForPeripherals)?;
        self.registry.clear();
        self.state_before_scan = self.state.clone();
        self.transition(ConnectionState::Scanning);
        Ok(())
    }

    /// Stop scanning and return to the state held before the scan.
    ///
    /// Idempotent when not scanning.
    pub fn stop_scan(&mut self) -> Result<()> {
        if self.state != ConnectionState::Scanning {
            return Ok(());
        }
        self.radio.submit(RadioCommand::StopScan)?;
        self.resume_scan_on_power_on = false;
        self.transition(self.state_before_scan.clone());
        Ok(())
    }

    /// Request a connection to `id`.
    ///
    /// Returns the attempt number of the new session. The outcome is
    /// reported later through state changes.
    pub fn connect(&mut self, id: &str) -> Result<u64> {
        if self.state.is_active() {
            return Err(Error::SessionActive {
                state: self.state.clone(),
            });
        }
        if self.adapter_powered == Some(false) {
            return Err(Error::AdapterUnavailable);
        }
        if !self.radio.resolve(id) {
            return Err(Error::peripheral_not_found(id));
        }

        if self.state == ConnectionState::Scanning {
            self.radio.submit(RadioCommand::StopScan)?;
            self.resume_scan_on_power_on = false;
        }
        self.radio.submit(RadioCommand::Connect { id: id.to_string() })?;

        self.attempts += 1;
        let name = self
            .registry
            .get(id)
            .and_then(|p| p.display_name())
            .map(str::to_string);
        self.session = Some(ConnectionSession::new(id.to_string(), name, self.attempts));
        self.telemetry.reset();
        info!(peripheral = %id, attempt = self.attempts, "Connecting");
        self.transition(ConnectionState::Connecting);
        Ok(self.attempts)
    }

    /// Tear down the active connection or cancel a pending one.
    ///
    /// No-op unless connecting or connected.
    pub fn disconnect(&mut self) -> Result<()> {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Ok(());
        }
        let Some(target) = self.session.as_ref().map(|s| s.target.clone()) else {
            return Ok(());
        };

        self.radio
            .submit(RadioCommand::CancelConnection { id: target })?;
        self.autostore.force_disable();
        self.transition(ConnectionState::Disconnecting);
        Ok(())
    }

    /// Enable or disable auto-store.
    ///
    /// Enabling requires a connecting or connected session.
    pub fn set_auto_store(&mut self, enabled: bool) -> Result<()> {
        if enabled
            && !matches!(
                self.state,
                ConnectionState::Connecting | ConnectionState::Connected
            )
        {
            return Err(Error::NotConnected);
        }
        self.autostore.set_enabled(enabled);
        Ok(())
    }

    /// Switch the peripheral's LED on or off.
    pub fn set_led(&mut self, on: bool) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }
        let session = self.session.as_ref().ok_or(Error::NotConnected)?;
        let characteristic = *session
            .characteristics
            .get(&CharacteristicRole::LedControl)
            .ok_or(Error::CharacteristicNotFound {
                role: CharacteristicRole::LedControl,
            })?;

        debug!(on, "Writing LED state");
        self.radio.submit(RadioCommand::WriteValue {
            id: session.target.clone(),
            characteristic,
            value: vec![u8::from(on)],
        })
    }

    /// Auto-store timer tick. Returns `true` if a persist request was emitted.
    pub fn auto_store_tick(&mut self, generation: u64, now: Instant) -> bool {
        let emitted = self
            .autostore
            .on_tick(generation, now, || persist_request(&self.session, &self.telemetry));
        if emitted {
            self.announce_persist();
        }
        emitted
    }

    /// The connect deadline of `attempt` expired.
    ///
    /// Returns `true` if the attempt was still pending and has been abandoned.
    pub fn connect_timed_out(&mut self, attempt: u64) -> bool {
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        if self.state != ConnectionState::Connecting || session.attempt != attempt {
            return false;
        }

        let target = session.target.clone();
        warn!(peripheral = %target, attempt, "Connect timed out");
        self.issue(RadioCommand::CancelConnection { id: target });
        self.finish(DisconnectReason::TimedOut);
        true
    }

    // --- Radio events ---

    /// Apply one radio event.
    pub fn handle_event(&mut self, event: RadioEvent) {
        self.handle_event_at(event, Instant::now());
    }

    /// Apply one radio event observed at `now`.
    pub fn handle_event_at(&mut self, event: RadioEvent, now: Instant) {
        if let Some(id) = event.session_id() {
            let matches = self.session.as_ref().is_some_and(|s| s.target == id);
            if !matches {
                debug!(peripheral = %id, kind = event.kind(), "Ignoring event for foreign peripheral");
                return;
            }
        }

        match event {
            RadioEvent::AdapterStateChanged { powered_on } => self.on_adapter_state(powered_on),
            RadioEvent::Discovered(peripheral) => self.on_discovered(peripheral),
            RadioEvent::Connected { .. } => self.on_connected(),
            RadioEvent::ConnectFailed { error, .. } => self.on_connect_failed(error),
            RadioEvent::Disconnected { error, .. } => self.on_disconnected(error),
            RadioEvent::ServicesDiscovered { services, .. } => self.on_services(services),
            RadioEvent::CharacteristicsDiscovered {
                service,
                characteristics,
                ..
            } => self.on_characteristics(service, characteristics),
            RadioEvent::CharacteristicValueUpdated {
                characteristic,
                value,
                ..
            } => self.on_value(characteristic, &value, now),
        }
    }

    fn on_adapter_state(&mut self, powered_on: bool) {
        let previous = self.adapter_powered.replace(powered_on);
        if previous == Some(powered_on) {
            return;
        }
        info!(powered_on, "Adapter state changed");
        self.events.send(EngineEvent::AdapterStateChanged { powered_on });

        if !powered_on {
            if self.state == ConnectionState::Scanning {
                warn!("Adapter powered off, scanning halted");
                self.resume_scan_on_power_on = true;
                self.transition(self.state_before_scan.clone());
            }
            return;
        }

        let idle = matches!(
            self.state,
            ConnectionState::Idle | ConnectionState::Disconnected(_)
        );
        if idle && (self.resume_scan_on_power_on || self.auto_scan_on_power_on) {
            self.resume_scan_on_power_on = false;
            if let Err(e) = self.start_scan() {
                warn!(error = %e, "Failed to start scan after power on");
            }
        }
    }

    fn on_discovered(&mut self, peripheral: DiscoveredPeripheral) {
        if self.state != ConnectionState::Scanning {
            return;
        }
        if self.registry.on_discovered(peripheral.clone()) {
            info!(
                peripheral = %peripheral.id,
                name = peripheral.display_name().unwrap_or_default(),
                rssi = ?peripheral.rssi,
                "Discovered peripheral"
            );
            self.events.send(EngineEvent::Discovered { peripheral });
        }
    }

    fn on_connected(&mut self) {
        if self.state != ConnectionState::Connecting {
            debug!(state = %self.state, "Ignoring connected event");
            return;
        }
        let Some(target) = self.target() else {
            return;
        };
        self.transition(ConnectionState::Connected);
        self.issue(RadioCommand::DiscoverServices { id: target });
    }

    fn on_connect_failed(&mut self, error: Option<String>) {
        match self.state {
            ConnectionState::Connecting => {
                warn!(error = ?error, "Connection attempt failed");
                self.finish(DisconnectReason::ConnectFailed(error));
            }
            ConnectionState::Disconnecting => self.finish(DisconnectReason::UserRequested),
            _ => debug!(state = %self.state, "Ignoring connect failure"),
        }
    }

    fn on_disconnected(&mut self, error: Option<String>) {
        match self.state {
            ConnectionState::Disconnecting => self.finish(DisconnectReason::UserRequested),
            ConnectionState::Connecting | ConnectionState::Connected => {
                warn!(error = ?error, "Peripheral disconnected");
                self.finish(DisconnectReason::RemoteOrError(error));
            }
            _ => debug!(state = %self.state, "Ignoring disconnect"),
        }
    }

    fn on_services(&mut self, services: Vec<Uuid>) {
        if self.state != ConnectionState::Connected {
            return;
        }
        let Some(target) = self.target() else {
            return;
        };

        for service in services {
            if let Some(session) = self.session.as_mut() {
                session.services.insert(service);
            }
            let wanted: &[Uuid] = if service == AIR_QUALITY_SERVICE {
                &uuids::TELEMETRY_CHARACTERISTICS
            } else if service == LED_SERVICE {
                &uuids::LED_CHARACTERISTICS
            } else {
                debug!(%service, "Ignoring unknown service");
                continue;
            };
            debug!(%service, "Discovering characteristics");
            self.issue(RadioCommand::DiscoverCharacteristics {
                id: target.clone(),
                service,
                characteristics: wanted.to_vec(),
            });
        }
    }

    fn on_characteristics(&mut self, service: Uuid, characteristics: Vec<Uuid>) {
        if self.state != ConnectionState::Connected {
            return;
        }
        let Some(target) = self.target() else {
            return;
        };

        for characteristic in characteristics {
            let Some(role) = CharacteristicRole::from_uuid(&characteristic)
                .filter(|role| role.service() == service)
            else {
                debug!(%service, %characteristic, "Ignoring unknown characteristic");
                continue;
            };

            let Some(session) = self.session.as_mut() else {
                return;
            };
            session.characteristics.insert(role, characteristic);
            if !role.is_notifying() || session.subscribed.contains(&role) {
                continue;
            }
            session.subscribed.insert(role);

            debug!(?role, %characteristic, "Subscribing");
            self.issue(RadioCommand::SetNotify {
                id: target.clone(),
                characteristic,
                enabled: true,
            });
            self.events.send(EngineEvent::Subscribed {
                id: target.clone(),
                role,
            });
        }
    }

    fn on_value(&mut self, characteristic: Uuid, value: &[u8], now: Instant) {
        if self.state != ConnectionState::Connected {
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let Some(role) = CharacteristicRole::from_uuid(&characteristic)
            .filter(|role| session.subscribed.contains(role))
        else {
            debug!(%characteristic, "Ignoring value for unsubscribed characteristic");
            return;
        };
        let target = session.target.clone();

        if role == CharacteristicRole::Button {
            let pressed = value.first().is_some_and(|b| *b != 0);
            debug!(pressed, "Button changed");
            self.events
                .send(EngineEvent::ButtonChanged { id: target, pressed });
            return;
        }
        let Some(category) = role.telemetry_category() else {
            return;
        };

        match TelemetryValue::decode(category, value) {
            Ok(decoded) => {
                self.telemetry.record_at(decoded, OffsetDateTime::now_utc());
                self.events.send(EngineEvent::Telemetry {
                    id: target,
                    value: decoded,
                });
                let emitted = self
                    .autostore
                    .on_telemetry_arrived(now, || persist_request(&self.session, &self.telemetry));
                if emitted {
                    self.announce_persist();
                }
            }
            Err(e) => {
                self.malformed_payloads += 1;
                warn!(%category, error = %e, "Dropping malformed payload");
                self.events.send(EngineEvent::PayloadDropped {
                    id: target,
                    characteristic,
                    error: e.to_string(),
                });
            }
        }
    }

    // --- Helpers ---

    fn target(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.target.clone())
    }

    fn issue(&mut self, command: RadioCommand) {
        if let Err(e) = self.radio.submit(command) {
            warn!(error = %e, "Radio command failed to queue");
        }
    }

    fn finish(&mut self, reason: DisconnectReason) {
        self.autostore.force_disable();
        self.session = None;
        self.transition(ConnectionState::Disconnected(reason));
    }

    fn announce_persist(&self) {
        if let Some(id) = self.target() {
            self.events.send(EngineEvent::PersistRequested { id });
        }
    }

    fn transition(&mut self, to: ConnectionState) {
        if self.state == to {
            return;
        }
        let from = std::mem::replace(&mut self.state, to.clone());
        info!(%from, %to, "State changed");
        self.events.send(EngineEvent::StateChanged { from, to });
    }
}

fn persist_request(
    session: &Option<ConnectionSession>,
    telemetry: &TelemetryStore,
) -> Option<PersistRequest> {
    let session = session.as_ref()?;
    Some(PersistRequest {
        sensor_id: session.target.clone(),
        sensor_name: session.name.clone(),
        snapshot: telemetry.snapshot(),
        requested_at: OffsetDateTime::now_utc(),
    })
}
