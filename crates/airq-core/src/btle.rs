//! [`RadioLink`] backed by the platform Bluetooth stack via btleplug.
//!
//! Two background tasks bridge btleplug's async API to the engine's
//! command/event model:
//!
//! - an **event pump** translating adapter [`CentralEvent`]s (discoveries,
//!   disconnects, power changes) into [`RadioEvent`]s
//! - a **command executor** performing [`RadioCommand`]s against the adapter
//!   and its peripherals and reporting each outcome as a [`RadioEvent`]
//!
//! btleplug discovers every characteristic in one pass, so per-service
//! characteristic requests are answered from the already discovered set.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    PeripheralProperties, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{RadioCommand, RadioEvent};
use crate::radio::RadioLink;
use crate::registry::{AdvertisementValue, DiscoveredPeripheral};
use crate::util::{create_identifier, format_peripheral_id};

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters.into_iter().next().ok_or(Error::AdapterUnavailable)
}

/// Peripherals seen by the adapter, indexed both ways.
#[derive(Default)]
struct Known {
    by_identifier: HashMap<String, Peripheral>,
    by_peripheral: HashMap<PeripheralId, String>,
    forwarders: Forwarders,
}

/// Cancellation tokens of the notification forwarders, at most one per peripheral.
#[derive(Debug, Default)]
struct Forwarders(HashMap<String, CancellationToken>);

impl Forwarders {
    /// Register a forwarder for `id`, stopping the one it replaces.
    fn replace(&mut self, id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.0.insert(id.to_string(), token.clone()) {
            debug!(peripheral = %id, "Replacing notification forwarder");
            previous.cancel();
        }
        token
    }

    fn stop(&mut self, id: &str) {
        if let Some(token) = self.0.remove(id) {
            token.cancel();
        }
    }

    fn stop_all(&mut self) {
        for (_, token) in self.0.drain() {
            token.cancel();
        }
    }
}

type SharedKnown = Arc<RwLock<Known>>;

fn read_known<T>(known: &SharedKnown, f: impl FnOnce(&Known) -> T) -> T {
    match known.read() {
        Ok(guard) => f(&*guard),
        Err(poisoned) => f(&*poisoned.into_inner()),
    }
}

fn write_known<T>(known: &SharedKnown, f: impl FnOnce(&mut Known) -> T) -> T {
    match known.write() {
        Ok(mut guard) => f(&mut *guard),
        Err(poisoned) => f(&mut *poisoned.into_inner()),
    }
}

/// Radio layer for real hardware.
///
/// Dropping the radio stops both background tasks.
pub struct BtleRadio {
    commands: mpsc::UnboundedSender<RadioCommand>,
    known: SharedKnown,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for BtleRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = read_known(&self.known, |k| k.by_identifier.len());
        f.debug_struct("BtleRadio")
            .field("known_peripherals", &count)
            .finish()
    }
}

impl BtleRadio {
    /// Open the first adapter.
    ///
    /// Returns the radio and the receiver of its events, to be handed to
    /// [`Engine::spawn`](crate::engine::Engine::spawn).
    pub async fn new() -> Result<(Self, mpsc::UnboundedReceiver<RadioEvent>)> {
        let adapter = get_adapter().await?;
        Self::with_adapter(adapter).await
    }

    /// Drive a specific adapter.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn with_adapter(
        adapter: Adapter,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RadioEvent>)> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let known = SharedKnown::default();
        let shutdown = CancellationToken::new();

        let central_events = adapter.events().await?;

        // Peripherals the platform already knows are connectable without a scan
        for peripheral in adapter.peripherals().await? {
            register(&known, &peripheral).await;
        }

        match adapter.adapter_state().await {
            Ok(state) => {
                let _ = event_tx.send(RadioEvent::AdapterStateChanged {
                    powered_on: is_powered_on(&state),
                });
            }
            Err(e) => debug!(error = %e, "Adapter state unavailable"),
        }

        let pump = EventPump {
            adapter: adapter.clone(),
            known: known.clone(),
            events: event_tx.clone(),
        };
        tokio::spawn(pump.run(central_events, shutdown.clone()));

        let executor = CommandExecutor {
            adapter,
            known: known.clone(),
            events: event_tx,
            pending_connect: None,
        };
        tokio::spawn(executor.run(command_rx, shutdown.clone()));

        info!("Bluetooth radio ready");
        Ok((
            Self {
                commands: command_tx,
                known,
                shutdown,
            },
            event_rx,
        ))
    }
}

impl RadioLink for BtleRadio {
    fn resolve(&self, id: &str) -> bool {
        read_known(&self.known, |k| k.by_identifier.contains_key(id))
    }

    fn submit(&self, command: RadioCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::AdapterUnavailable)
    }
}

impl Drop for BtleRadio {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn is_powered_on(state: &CentralState) -> bool {
    matches!(state, CentralState::PoweredOn)
}

/// Record a peripheral and return its identifier.
async fn register(
    known: &SharedKnown,
    peripheral: &Peripheral,
) -> (String, Option<PeripheralProperties>) {
    let pid = peripheral.id();
    let properties = peripheral.properties().await.ok().flatten();
    let identifier = properties
        .as_ref()
        .map(|p| create_identifier(&p.address.to_string(), &pid))
        .unwrap_or_else(|| format_peripheral_id(&pid));

    write_known(known, |k| {
        k.by_identifier
            .insert(identifier.clone(), peripheral.clone());
        k.by_peripheral.insert(pid, identifier.clone());
    });
    (identifier, properties)
}

/// Flatten advertisement properties into string-keyed metadata.
fn advertisement_metadata(properties: &PeripheralProperties) -> BTreeMap<String, AdvertisementValue> {
    let mut metadata = BTreeMap::new();
    for (company, data) in &properties.manufacturer_data {
        metadata.insert(
            format!("manufacturer_data.{:04x}", company),
            AdvertisementValue::Bytes(data.clone()),
        );
    }
    for (service, data) in &properties.service_data {
        metadata.insert(
            format!("service_data.{}", service),
            AdvertisementValue::Bytes(data.clone()),
        );
    }
    if !properties.services.is_empty() {
        metadata.insert(
            "services".to_string(),
            AdvertisementValue::Uuids(properties.services.clone()),
        );
    }
    if let Some(tx_power) = properties.tx_power_level {
        metadata.insert(
            "tx_power_level".to_string(),
            AdvertisementValue::Integer(i64::from(tx_power)),
        );
    }
    if let Some(name) = &properties.local_name {
        metadata.insert("local_name".to_string(), AdvertisementValue::Text(name.clone()));
    }
    metadata
}

struct EventPump {
    adapter: Adapter,
    known: SharedKnown,
    events: mpsc::UnboundedSender<RadioEvent>,
}

impl EventPump {
    async fn run(
        self,
        mut central_events: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
        shutdown: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = central_events.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if self.translate(event).await.is_err() {
                break;
            }
        }
        debug!("Bluetooth event pump stopped");
    }

    /// Returns `Err` once the engine side has gone away.
    async fn translate(&self, event: CentralEvent) -> std::result::Result<(), ()> {
        let radio_event = match event {
            CentralEvent::DeviceDiscovered(pid) | CentralEvent::DeviceUpdated(pid) => {
                let Ok(peripheral) = self.adapter.peripheral(&pid).await else {
                    return Ok(());
                };
                let (id, properties) = register(&self.known, &peripheral).await;
                let Some(properties) = properties else {
                    return Ok(());
                };
                RadioEvent::Discovered(DiscoveredPeripheral {
                    id,
                    name: properties.local_name.clone(),
                    rssi: properties.rssi,
                    advertisement: advertisement_metadata(&properties),
                })
            }
            CentralEvent::DeviceDisconnected(pid) => {
                let Some(id) = write_known(&self.known, |k| {
                    let id = k.by_peripheral.get(&pid).cloned()?;
                    k.forwarders.stop(&id);
                    Some(id)
                }) else {
                    return Ok(());
                };
                RadioEvent::Disconnected { id, error: None }
            }
            CentralEvent::StateUpdate(state) => RadioEvent::AdapterStateChanged {
                powered_on: is_powered_on(&state),
            },
            other => {
                debug!(event = ?other, "Ignoring central event");
                return Ok(());
            }
        };
        self.events.send(radio_event).map_err(|_| ())
    }
}

struct CommandExecutor {
    adapter: Adapter,
    known: SharedKnown,
    events: mpsc::UnboundedSender<RadioEvent>,
    pending_connect: Option<(String, JoinHandle<()>)>,
}

impl CommandExecutor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<RadioCommand>,
        shutdown: CancellationToken,
    ) {
        loop {
            let command = tokio::select! {
                _ = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            debug!(?command, "Executing radio command");
            self.execute(command).await;
        }

        write_known(&self.known, |k| k.forwarders.stop_all());
        debug!("Bluetooth command executor stopped");
    }

    fn peripheral(&self, id: &str) -> Option<Peripheral> {
        read_known(&self.known, |k| k.by_identifier.get(id).cloned())
    }

    fn emit(&self, event: RadioEvent) {
        let _ = self.events.send(event);
    }

    async fn execute(&mut self, command: RadioCommand) {
        match command {
            RadioCommand::ScanForPeripherals => {
                if let Err(e) = self.adapter.start_scan(ScanFilter::default()).await {
                    warn!(error = %e, "Failed to start scan");
                }
            }
            RadioCommand::StopScan => {
                if let Err(e) = self.adapter.stop_scan().await {
                    warn!(error = %e, "Failed to stop scan");
                }
            }
            RadioCommand::Connect { id } => self.connect(id),
            RadioCommand::CancelConnection { id } => self.cancel(id).await,
            RadioCommand::DiscoverServices { id } => self.discover_services(id).await,
            RadioCommand::DiscoverCharacteristics {
                id,
                service,
                characteristics,
            } => self.discover_characteristics(id, service, characteristics),
            RadioCommand::SetNotify {
                id,
                characteristic,
                enabled,
            } => self.set_notify(id, characteristic, enabled).await,
            RadioCommand::WriteValue {
                id,
                characteristic,
                value,
            } => self.write(id, characteristic, value).await,
        }
    }

    /// Connect in a separate task so a later cancel can abort it.
    fn connect(&mut self, id: String) {
        let Some(peripheral) = self.peripheral(&id) else {
            self.emit(RadioEvent::ConnectFailed {
                id,
                error: Some("peripheral no longer known to the adapter".to_string()),
            });
            return;
        };
        if let Some((_, previous)) = self.pending_connect.take() {
            previous.abort();
        }

        let events = self.events.clone();
        let token = write_known(&self.known, |k| k.forwarders.replace(&id));
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            match peripheral.connect().await {
                Ok(()) => {
                    info!(peripheral = %task_id, "Connected");
                    match peripheral.notifications().await {
                        Ok(stream) => {
                            tokio::spawn(forward_notifications(
                                task_id.clone(),
                                stream,
                                events.clone(),
                                token,
                            ));
                        }
                        Err(e) => warn!(error = %e, "Notification stream unavailable"),
                    }
                    let _ = events.send(RadioEvent::Connected { id: task_id });
                }
                Err(e) => {
                    let _ = events.send(RadioEvent::ConnectFailed {
                        id: task_id,
                        error: Some(e.to_string()),
                    });
                }
            }
        });
        self.pending_connect = Some((id, handle));
    }

    async fn cancel(&mut self, id: String) {
        if let Some((pending, handle)) = self.pending_connect.take() {
            if pending == id {
                handle.abort();
            } else {
                self.pending_connect = Some((pending, handle));
            }
        }
        write_known(&self.known, |k| k.forwarders.stop(&id));

        if let Some(peripheral) = self.peripheral(&id)
            && let Err(e) = peripheral.disconnect().await
        {
            debug!(peripheral = %id, error = %e, "Disconnect reported an error");
        }
        self.emit(RadioEvent::Disconnected { id, error: None });
    }

    async fn discover_services(&mut self, id: String) {
        let Some(peripheral) = self.peripheral(&id) else {
            return;
        };
        match peripheral.discover_services().await {
            Ok(()) => {
                let services: Vec<Uuid> = peripheral.services().iter().map(|s| s.uuid).collect();
                debug!(count = services.len(), "Services discovered");
                self.emit(RadioEvent::ServicesDiscovered { id, services });
            }
            Err(e) => {
                warn!(error = %e, "Service discovery failed, dropping connection");
                write_known(&self.known, |k| k.forwarders.stop(&id));
                let _ = peripheral.disconnect().await;
                self.emit(RadioEvent::Disconnected {
                    id,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    fn discover_characteristics(&self, id: String, service: Uuid, wanted: Vec<Uuid>) {
        let Some(peripheral) = self.peripheral(&id) else {
            return;
        };
        let characteristics: Vec<Uuid> = peripheral
            .services()
            .iter()
            .filter(|s| s.uuid == service)
            .flat_map(|s| s.characteristics.iter().map(|c| c.uuid))
            .filter(|uuid| wanted.is_empty() || wanted.contains(uuid))
            .collect();
        self.emit(RadioEvent::CharacteristicsDiscovered {
            id,
            service,
            characteristics,
        });
    }

    fn characteristic(&self, id: &str, uuid: Uuid) -> Option<(Peripheral, Characteristic)> {
        let peripheral = self.peripheral(id)?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)?;
        Some((peripheral, characteristic))
    }

    async fn set_notify(&self, id: String, uuid: Uuid, enabled: bool) {
        let Some((peripheral, characteristic)) = self.characteristic(&id, uuid) else {
            warn!(%uuid, "Cannot change notifications: characteristic not found");
            return;
        };
        let result = if enabled {
            peripheral.subscribe(&characteristic).await
        } else {
            peripheral.unsubscribe(&characteristic).await
        };
        if let Err(e) = result {
            warn!(%uuid, error = %e, "Failed to change notifications");
        }
    }

    async fn write(&self, id: String, uuid: Uuid, value: Vec<u8>) {
        let Some((peripheral, characteristic)) = self.characteristic(&id, uuid) else {
            warn!(%uuid, "Cannot write: characteristic not found");
            return;
        };
        if let Err(e) = peripheral
            .write(&characteristic, &value, WriteType::WithResponse)
            .await
        {
            warn!(%uuid, error = %e, "Write failed");
        }
    }
}

async fn forward_notifications(
    id: String,
    mut stream: std::pin::Pin<Box<dyn futures::Stream<Item = btleplug::api::ValueNotification> + Send>>,
    events: mpsc::UnboundedSender<RadioEvent>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            notification = stream.next() => {
                let Some(notification) = notification else {
                    break;
                };
                let event = RadioEvent::CharacteristicValueUpdated {
                    id: id.clone(),
                    characteristic: notification.uuid,
                    value: notification.value,
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        }
    }
    debug!(peripheral = %id, "Notification forwarding stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advertisement_metadata() {
        let mut properties = PeripheralProperties::default();
        properties.local_name = Some("AirQ".to_string());
        properties.tx_power_level = Some(-4);
        properties.manufacturer_data.insert(0x004c, vec![1, 2, 3]);
        properties.services = vec![airq_types::uuids::AIR_QUALITY_SERVICE];

        let metadata = advertisement_metadata(&properties);
        assert_eq!(
            metadata.get("manufacturer_data.004c"),
            Some(&AdvertisementValue::Bytes(vec![1, 2, 3]))
        );
        assert_eq!(
            metadata.get("tx_power_level"),
            Some(&AdvertisementValue::Integer(-4))
        );
        assert_eq!(
            metadata.get("services"),
            Some(&AdvertisementValue::Uuids(vec![
                airq_types::uuids::AIR_QUALITY_SERVICE
            ]))
        );
        assert!(metadata.contains_key("local_name"));
    }

    #[test]
    fn test_forwarder_replaced_on_reconnect() {
        let mut forwarders = Forwarders::default();
        let first = forwarders.replace("AA:BB:CC:DD:EE:01");
        let other = forwarders.replace("AA:BB:CC:DD:EE:02");
        assert!(!first.is_cancelled());

        let second = forwarders.replace("AA:BB:CC:DD:EE:01");
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(!other.is_cancelled());
        assert_eq!(forwarders.0.len(), 2);
    }

    #[test]
    fn test_forwarder_stopped_on_disconnect() {
        let mut forwarders = Forwarders::default();
        let token = forwarders.replace("AA:BB:CC:DD:EE:01");
        let other = forwarders.replace("AA:BB:CC:DD:EE:02");

        forwarders.stop("AA:BB:CC:DD:EE:01");
        assert!(token.is_cancelled());
        assert!(!other.is_cancelled());
        forwarders.stop("AA:BB:CC:DD:EE:01");

        forwarders.stop_all();
        assert!(other.is_cancelled());
        assert!(forwarders.0.is_empty());
    }

    #[tokio::test]
    async fn test_replaced_forwarder_stops() {
        let mut forwarders = Forwarders::default();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (values_tx, values_rx) =
            futures::channel::mpsc::unbounded::<btleplug::api::ValueNotification>();

        let first = tokio::spawn(forward_notifications(
            "AA:BB:CC:DD:EE:01".to_string(),
            Box::pin(values_rx),
            events_tx,
            forwarders.replace("AA:BB:CC:DD:EE:01"),
        ));
        let _second = forwarders.replace("AA:BB:CC:DD:EE:01");
        first.await.unwrap();

        drop(values_tx);
        assert!(events_rx.try_recv().is_err());
    }

    #[test]
    fn test_power_state_mapping() {
        assert!(is_powered_on(&CentralState::PoweredOn));
        assert!(!is_powered_on(&CentralState::PoweredOff));
        assert!(!is_powered_on(&CentralState::Unknown));
    }
}
