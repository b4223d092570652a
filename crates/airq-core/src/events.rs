//! Radio-layer events and commands, and the engine's outbound event system.
//!
//! The platform radio layer talks to the engine in two directions:
//!
//! - [`RadioEvent`]s flow in (scan results, connection callbacks, GATT
//!   discovery results, characteristic notifications).
//! - [`RadioCommand`]s flow out (scan, connect, discover, subscribe, write).
//!
//! Consumers of the engine observe it through [`EngineEvent`]s broadcast by
//! an [`EventDispatcher`].

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use airq_types::TelemetryValue;

use crate::machine::{CharacteristicRole, ConnectionState};
use crate::registry::DiscoveredPeripheral;

/// Events delivered by the platform radio layer.
///
/// The engine consumes these serially through
/// [`ConnectionStateMachine::handle_event`](crate::machine::ConnectionStateMachine::handle_event).
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    /// The adapter was powered on or off.
    AdapterStateChanged { powered_on: bool },
    /// A peripheral was seen during scanning.
    Discovered(DiscoveredPeripheral),
    /// A connection to the peripheral was established.
    Connected { id: String },
    /// A connection attempt failed.
    ConnectFailed { id: String, error: Option<String> },
    /// The link to the peripheral was torn down.
    Disconnected { id: String, error: Option<String> },
    /// Service discovery completed.
    ServicesDiscovered { id: String, services: Vec<Uuid> },
    /// Characteristic discovery for one service completed.
    CharacteristicsDiscovered {
        id: String,
        service: Uuid,
        characteristics: Vec<Uuid>,
    },
    /// A characteristic notified a new value.
    CharacteristicValueUpdated {
        id: String,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

impl RadioEvent {
    /// The peripheral this event refers to, if it is session-scoped.
    ///
    /// Adapter state changes and scan results are not tied to a session.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            RadioEvent::AdapterStateChanged { .. } | RadioEvent::Discovered(_) => None,
            RadioEvent::Connected { id }
            | RadioEvent::ConnectFailed { id, .. }
            | RadioEvent::Disconnected { id, .. }
            | RadioEvent::ServicesDiscovered { id, .. }
            | RadioEvent::CharacteristicsDiscovered { id, .. }
            | RadioEvent::CharacteristicValueUpdated { id, .. } => Some(id),
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            RadioEvent::AdapterStateChanged { .. } => "adapter_state_changed",
            RadioEvent::Discovered(_) => "discovered",
            RadioEvent::Connected { .. } => "connected",
            RadioEvent::ConnectFailed { .. } => "connect_failed",
            RadioEvent::Disconnected { .. } => "disconnected",
            RadioEvent::ServicesDiscovered { .. } => "services_discovered",
            RadioEvent::CharacteristicsDiscovered { .. } => "characteristics_discovered",
            RadioEvent::CharacteristicValueUpdated { .. } => "characteristic_value_updated",
        }
    }
}

/// Requests issued to the platform radio layer.
///
/// All commands are asynchronous: completion is reported later as a
/// [`RadioEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCommand {
    /// Start scanning for any peripheral.
    ScanForPeripherals,
    /// Stop scanning.
    StopScan,
    /// Connect to a peripheral.
    Connect { id: String },
    /// Cancel a pending or established connection.
    CancelConnection { id: String },
    /// Discover all services offered by the peripheral.
    DiscoverServices { id: String },
    /// Discover the listed characteristics of one service.
    DiscoverCharacteristics {
        id: String,
        service: Uuid,
        characteristics: Vec<Uuid>,
    },
    /// Enable or disable notifications on a characteristic.
    SetNotify {
        id: String,
        characteristic: Uuid,
        enabled: bool,
    },
    /// Write a value to a characteristic (with response).
    WriteValue {
        id: String,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

/// Reason a connection reached the terminal disconnected state.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "message", rename_all = "snake_case")]
#[non_exhaustive]
pub enum DisconnectReason {
    /// The caller requested the disconnect.
    UserRequested,
    /// The connection attempt failed.
    ConnectFailed(Option<String>),
    /// The peripheral or the link dropped the connection.
    RemoteOrError(Option<String>),
    /// The connection attempt exceeded the configured connect timeout.
    TimedOut,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserRequested => write!(f, "user requested"),
            Self::ConnectFailed(Some(msg)) => write!(f, "connect failed: {}", msg),
            Self::ConnectFailed(None) => write!(f, "connect failed"),
            Self::RemoteOrError(Some(msg)) => write!(f, "remote or error: {}", msg),
            Self::RemoteOrError(None) => write!(f, "remote or error"),
            Self::TimedOut => write!(f, "connect timed out"),
        }
    }
}

/// Events emitted by the engine.
///
/// All events are serializable for logging, persistence, and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum EngineEvent {
    /// The adapter was powered on or off.
    AdapterStateChanged { powered_on: bool },
    /// A named peripheral was admitted to the registry.
    Discovered { peripheral: DiscoveredPeripheral },
    /// The connection state machine changed state.
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Notifications were enabled for a characteristic.
    Subscribed { id: String, role: CharacteristicRole },
    /// A telemetry sample was decoded and recorded.
    Telemetry { id: String, value: TelemetryValue },
    /// A notification payload was dropped because it could not be decoded.
    PayloadDropped {
        id: String,
        characteristic: Uuid,
        error: String,
    },
    /// The peripheral's button changed state.
    ButtonChanged { id: String, pressed: bool },
    /// The auto-store scheduler asked the persistence collaborator to store.
    PersistRequested { id: String },
}

/// Sender for engine events.
pub type EventSender = broadcast::Sender<EngineEvent>;

/// Receiver for engine events.
pub type EventReceiver = broadcast::Receiver<EngineEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: EngineEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
