//! Mock radio implementation for testing.
//!
//! [`MockRadio`] implements [`RadioLink`] without any BLE hardware. It
//! records every submitted command so tests can assert on them, and can
//! optionally play the part of a well-behaved air-quality peripheral by
//! answering commands with the [`RadioEvent`]s real hardware would produce.
//!
//! # Features
//!
//! - **Command log**: inspect everything the engine asked the radio to do
//! - **Responder mode**: scripted replies for scan, connect, discovery and disconnect
//! - **Failure injection**: make `submit` fail to exercise error paths

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::sync::mpsc;
use tracing::debug;

use airq_types::uuids::{AIR_QUALITY_SERVICE, LED_SERVICE};

use crate::error::{Error, Result};
use crate::events::{RadioCommand, RadioEvent};
use crate::radio::RadioLink;
use crate::registry::DiscoveredPeripheral;

#[derive(Debug, Default)]
struct Inner {
    peripherals: RwLock<Vec<DiscoveredPeripheral>>,
    resolvable: RwLock<HashSet<String>>,
    commands: Mutex<Vec<RadioCommand>>,
    should_fail: AtomicBool,
    responder: Option<mpsc::UnboundedSender<RadioEvent>>,
}

/// A scripted radio layer.
///
/// Clones share state, so a test can keep a clone for inspection while the
/// engine owns another.
///
/// # Example
///
/// ```
/// use airq_core::events::RadioCommand;
/// use airq_core::mock::MockRadio;
/// use airq_core::radio::RadioLink;
///
/// let radio = MockRadio::new();
/// radio.add_peripheral("AA:BB:CC:DD:EE:FF");
/// assert!(radio.resolve("AA:BB:CC:DD:EE:FF"));
///
/// radio.submit(RadioCommand::ScanForPeripherals).unwrap();
/// assert_eq!(radio.commands(), vec![RadioCommand::ScanForPeripherals]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockRadio {
    inner: Arc<Inner>,
}

impl MockRadio {
    /// Create a radio that records commands but never answers them.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a radio that answers commands like a real peripheral would.
    ///
    /// Events are delivered on the returned receiver, which is normally
    /// handed to the engine as its radio event source.
    pub fn responsive() -> (Self, mpsc::UnboundedReceiver<RadioEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let radio = Self {
            inner: Arc::new(Inner {
                responder: Some(tx),
                ..Default::default()
            }),
        };
        (radio, rx)
    }

    /// Make an identifier resolvable without advertising it.
    pub fn add_peripheral(&self, id: &str) {
        write(&self.inner.resolvable).insert(id.to_string());
    }

    /// Advertise a peripheral during scans and make it resolvable.
    pub fn advertise(&self, peripheral: DiscoveredPeripheral) {
        self.add_peripheral(&peripheral.id);
        write(&self.inner.peripherals).push(peripheral);
    }

    /// Forget a peripheral.
    pub fn remove_peripheral(&self, id: &str) {
        write(&self.inner.resolvable).remove(id);
        write(&self.inner.peripherals).retain(|p| p.id != id);
    }

    /// Make subsequent `submit` calls fail.
    pub fn set_should_fail(&self, fail: bool) {
        self.inner.should_fail.store(fail, Ordering::SeqCst);
    }

    /// All commands submitted so far.
    pub fn commands(&self) -> Vec<RadioCommand> {
        lock(&self.inner.commands).clone()
    }

    /// The most recently submitted command.
    pub fn last_command(&self) -> Option<RadioCommand> {
        lock(&self.inner.commands).last().cloned()
    }

    pub fn clear_commands(&self) {
        lock(&self.inner.commands).clear();
    }

    /// Inject an event as if the radio had produced it.
    ///
    /// Only meaningful for radios created with [`responsive`](Self::responsive).
    pub fn emit(&self, event: RadioEvent) {
        if let Some(tx) = &self.inner.responder {
            let _ = tx.send(event);
        }
    }

    /// A sender into the responder's event stream, for feeding simulated
    /// notifications.
    pub fn event_sender(&self) -> Option<mpsc::UnboundedSender<RadioEvent>> {
        self.inner.responder.clone()
    }

    fn respond(&self, command: &RadioCommand) {
        if self.inner.responder.is_none() {
            return;
        }
        match command {
            RadioCommand::ScanForPeripherals => {
                let peripherals = self
                    .inner
                    .peripherals
                    .read()
                    .map(|p| p.clone())
                    .unwrap_or_else(|e| e.into_inner().clone());
                for peripheral in peripherals {
                    self.emit(RadioEvent::Discovered(peripheral));
                }
            }
            RadioCommand::Connect { id } => {
                if self.resolve(id) {
                    self.emit(RadioEvent::Connected { id: id.clone() });
                } else {
                    self.emit(RadioEvent::ConnectFailed {
                        id: id.clone(),
                        error: Some("peripheral went away".to_string()),
                    });
                }
            }
            RadioCommand::CancelConnection { id } => {
                self.emit(RadioEvent::Disconnected {
                    id: id.clone(),
                    error: None,
                });
            }
            RadioCommand::DiscoverServices { id } => {
                self.emit(RadioEvent::ServicesDiscovered {
                    id: id.clone(),
                    services: vec![AIR_QUALITY_SERVICE, LED_SERVICE],
                });
            }
            RadioCommand::DiscoverCharacteristics {
                id,
                service,
                characteristics,
            } => {
                self.emit(RadioEvent::CharacteristicsDiscovered {
                    id: id.clone(),
                    service: *service,
                    characteristics: characteristics.clone(),
                });
            }
            RadioCommand::StopScan
            | RadioCommand::SetNotify { .. }
            | RadioCommand::WriteValue { .. } => {}
        }
    }
}

impl RadioLink for MockRadio {
    fn resolve(&self, id: &str) -> bool {
        self.inner
            .resolvable
            .read()
            .map(|ids| ids.contains(id))
            .unwrap_or_else(|e| e.into_inner().contains(id))
    }

    fn submit(&self, command: RadioCommand) -> Result<()> {
        if self.inner.should_fail.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("mock radio failure")));
        }
        debug!(?command, "Mock radio command");
        lock(&self.inner.commands).push(command.clone());
        self.respond(&command);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
