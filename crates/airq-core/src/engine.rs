//! The serial event loop that owns the connection state machine.
//!
//! Every input (radio events, caller commands, auto-store timer ticks and
//! connect deadlines) is funnelled through one task and applied to the
//! [`ConnectionStateMachine`] in arrival order. After each input the engine
//! publishes an [`EngineSnapshot`] on a `watch` channel, so observers always
//! see a fully applied transition and never need a lock.
//!
//! ```no_run
//! use airq_core::engine::{Engine, EngineConfig};
//! use airq_core::mock::MockRadio;
//!
//! # async fn example() -> airq_core::Result<()> {
//! let (radio, radio_events) = MockRadio::responsive();
//! let handle = Engine::new(radio, EngineConfig::default())?.spawn(radio_events);
//!
//! handle.start_scan().await?;
//! let snapshot = handle.snapshot();
//! println!("state: {}", snapshot.state);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use airq_types::TelemetrySnapshot;

use crate::autostore::{AutoStoreConfig, PersistSink, TickSource};
use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventDispatcher, EventReceiver, RadioEvent};
use crate::machine::{ConnectionSession, ConnectionState, ConnectionStateMachine};
use crate::radio::RadioLink;
use crate::registry::DiscoveredPeripheral;

/// Engine options.
///
/// ```
/// use std::time::Duration;
/// use airq_core::engine::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .connect_timeout(Duration::from_secs(15))
///     .auto_scan_on_power_on(true)
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Auto-store policy.
    pub auto_store: AutoStoreConfig,
    /// Abandon a connection attempt that has not completed in this time.
    /// Default: `None` (wait for the platform to report an outcome).
    pub connect_timeout: Option<Duration>,
    /// Capacity of the engine event broadcast channel.
    /// Default: 256 events.
    pub event_capacity: usize,
    /// Start scanning as soon as the adapter reports it is powered on.
    /// Default: false.
    pub auto_scan_on_power_on: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_store: AutoStoreConfig::default(),
            connect_timeout: None,
            event_capacity: 256,
            auto_scan_on_power_on: false,
        }
    }
}

impl EngineConfig {
    /// Create a new builder for EngineConfig.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Validate the options and return an error if invalid.
    ///
    /// Checks that:
    /// - the auto-store options are valid
    /// - `event_capacity` is > 0
    /// - `connect_timeout`, if set, is > 0
    pub fn validate(&self) -> Result<()> {
        self.auto_store.validate()?;
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be > 0"));
        }
        if self.connect_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::invalid_config("connect_timeout must be > 0"));
        }
        Ok(())
    }
}

/// Builder for EngineConfig.
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    #[must_use]
    pub fn auto_store(mut self, auto_store: AutoStoreConfig) -> Self {
        self.config.auto_store = auto_store;
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    #[must_use]
    pub fn auto_scan_on_power_on(mut self, enabled: bool) -> Self {
        self.config.auto_scan_on_power_on = enabled;
        self
    }

    #[must_use]
    pub fn build(self) -> EngineConfig {
        self.config
    }
}

/// Consistent view of the engine after one applied input.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct EngineSnapshot {
    pub state: ConnectionState,
    pub session: Option<ConnectionSession>,
    /// Registry contents in discovery order.
    pub peripherals: Vec<DiscoveredPeripheral>,
    pub telemetry: TelemetrySnapshot,
    pub adapter_powered: Option<bool>,
    pub auto_store_enabled: bool,
    /// Persist requests emitted since the engine started.
    pub persist_requests: u64,
    /// Notification payloads dropped as malformed.
    pub malformed_payloads: u64,
}

impl EngineSnapshot {
    fn capture<R: RadioLink>(machine: &ConnectionStateMachine<R>) -> Self {
        Self {
            state: machine.state().clone(),
            session: machine.session().cloned(),
            peripherals: machine.registry().snapshot(),
            telemetry: machine.telemetry().snapshot(),
            adapter_powered: machine.adapter_powered(),
            auto_store_enabled: machine.autostore().is_enabled(),
            persist_requests: machine.autostore().emissions(),
            malformed_payloads: machine.malformed_payloads(),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T>>;

#[derive(Debug)]
enum Command {
    StartScan(Reply<()>),
    StopScan(Reply<()>),
    Connect(String, Reply<u64>),
    Disconnect(Reply<()>),
    SetAutoStore(bool, Reply<()>),
    SetLed(bool, Reply<()>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug)]
enum Input {
    Command(Command),
    AutoStoreTick(u64),
    ConnectDeadline(u64),
}

/// Starts auto-store timers as tasks that feed ticks back into the engine queue.
struct QueueTicks {
    inputs: mpsc::WeakUnboundedSender<Input>,
}

impl TickSource for QueueTicks {
    fn start(&mut self, generation: u64, period: Duration) -> CancellationToken {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let inputs = self.inputs.clone();

        tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        debug!(generation, "Auto-store timer cancelled");
                        break;
                    }
                    _ = ticks.tick() => {
                        let Some(inputs) = inputs.upgrade() else {
                            break;
                        };
                        if inputs.send(Input::AutoStoreTick(generation)).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        token
    }
}

/// The engine before it starts running.
pub struct Engine<R> {
    machine: ConnectionStateMachine<R>,
    config: EngineConfig,
    events: EventDispatcher,
    inputs_tx: mpsc::UnboundedSender<Input>,
    inputs_rx: mpsc::UnboundedReceiver<Input>,
}

impl<R: RadioLink + 'static> Engine<R> {
    /// Create an engine driving `radio`.
    pub fn new(radio: R, config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let events = EventDispatcher::new(config.event_capacity);
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let mut machine =
            ConnectionStateMachine::new(radio, config.auto_store.clone(), events.clone());
        machine.set_auto_scan_on_power_on(config.auto_scan_on_power_on);
        machine.set_tick_source(Box::new(QueueTicks {
            inputs: inputs_tx.downgrade(),
        }));

        Ok(Self {
            machine,
            config,
            events,
            inputs_tx,
            inputs_rx,
        })
    }

    /// Deliver auto-store emissions to `sink`.
    #[must_use]
    pub fn with_persist_sink(mut self, sink: impl PersistSink + 'static) -> Self {
        self.machine.set_persist_sink(Box::new(sink));
        self
    }

    /// Subscribe to engine events before the engine starts.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Start the event loop, consuming `radio_events` as the radio's event source.
    ///
    /// The loop stops when every [`EngineHandle`] has been dropped or
    /// [`EngineHandle::shutdown`] is called.
    pub fn spawn(self, radio_events: mpsc::UnboundedReceiver<RadioEvent>) -> EngineHandle {
        let Engine {
            machine,
            config,
            events,
            inputs_tx,
            inputs_rx,
        } = self;

        let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot::capture(&machine));
        let handle = EngineHandle {
            inputs: inputs_tx.clone(),
            snapshot: snapshot_rx,
            telemetry: machine.telemetry().subscribe(),
            events,
        };

        // Only handles hold strong senders, so dropping the last one stops the loop
        let runner = Runner {
            machine,
            connect_timeout: config.connect_timeout,
            inputs: inputs_tx.downgrade(),
            snapshot: snapshot_tx,
            deadline: None,
        };
        tokio::spawn(runner.run(inputs_rx, radio_events));
        handle
    }
}

struct Runner<R> {
    machine: ConnectionStateMachine<R>,
    connect_timeout: Option<Duration>,
    inputs: mpsc::WeakUnboundedSender<Input>,
    snapshot: watch::Sender<EngineSnapshot>,
    deadline: Option<CancellationToken>,
}

impl<R: RadioLink> Runner<R> {
    async fn run(
        mut self,
        mut inputs: mpsc::UnboundedReceiver<Input>,
        mut radio_events: mpsc::UnboundedReceiver<RadioEvent>,
    ) {
        info!("Engine started");

        let shutdown_reply = loop {
            tokio::select! {
                input = inputs.recv() => match input {
                    Some(input) => {
                        if let Some(reply) = self.apply(input) {
                            break Some(reply);
                        }
                    }
                    None => {
                        debug!("All engine handles dropped");
                        break None;
                    }
                },
                Some(event) = radio_events.recv() => {
                    debug!(kind = event.kind(), "Radio event");
                    self.machine.handle_event(event);
                }
            }
            self.settle();
        };

        if let Err(e) = self.machine.disconnect() {
            warn!(error = %e, "Failed to disconnect during shutdown");
        }
        if let Err(e) = self.machine.stop_scan() {
            warn!(error = %e, "Failed to stop scan during shutdown");
        }
        self.settle();
        drop(inputs);
        info!("Engine stopped");

        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    /// Cancel a stale connect deadline and publish the current snapshot.
    ///
    /// Must run before a reply is sent.
    fn settle(&mut self) {
        if self.machine.state() != &ConnectionState::Connecting
            && let Some(deadline) = self.deadline.take()
        {
            deadline.cancel();
        }

        let next = EngineSnapshot::capture(&self.machine);
        self.snapshot.send_if_modified(|current| {
            if *current != next {
                *current = next;
                true
            } else {
                false
            }
        });
    }

    /// Apply one queued input. Returns the reply channel of a shutdown request.
    fn apply(&mut self, input: Input) -> Option<oneshot::Sender<()>> {
        match input {
            Input::AutoStoreTick(generation) => {
                self.machine.auto_store_tick(generation, Instant::now());
            }
            Input::ConnectDeadline(attempt) => {
                self.machine.connect_timed_out(attempt);
            }
            Input::Command(command) => return self.apply_command(command),
        }
        None
    }

    fn apply_command(&mut self, command: Command) -> Option<oneshot::Sender<()>> {
        match command {
            Command::StartScan(reply) => {
                let result = self.machine.start_scan();
                self.reply(reply, result);
            }
            Command::StopScan(reply) => {
                let result = self.machine.stop_scan();
                self.reply(reply, result);
            }
            Command::Connect(id, reply) => {
                let result = self.machine.connect(&id);
                if let Ok(attempt) = result {
                    self.arm_deadline(attempt);
                }
                self.reply(reply, result);
            }
            Command::Disconnect(reply) => {
                let result = self.machine.disconnect();
                self.reply(reply, result);
            }
            Command::SetAutoStore(enabled, reply) => {
                let result = self.machine.set_auto_store(enabled);
                self.reply(reply, result);
            }
            Command::SetLed(on, reply) => {
                let result = self.machine.set_led(on);
                self.reply(reply, result);
            }
            Command::Shutdown(reply) => {
                info!("Engine shutdown requested");
                return Some(reply);
            }
        }
        None
    }

    fn reply<T>(&mut self, reply: Reply<T>, result: Result<T>) {
        self.settle();
        let _ = reply.send(result);
    }

    fn arm_deadline(&mut self, attempt: u64) {
        let Some(timeout) = self.connect_timeout else {
            return;
        };
        if let Some(previous) = self.deadline.take() {
            previous.cancel();
        }

        let token = CancellationToken::new();
        let task_token = token.clone();
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = task_token.cancelled() => {}
                _ = sleep(timeout) => {
                    if let Some(inputs) = inputs.upgrade() {
                        let _ = inputs.send(Input::ConnectDeadline(attempt));
                    }
                }
            }
        });
        self.deadline = Some(token);
    }
}

/// Cloneable caller-side API of a running engine.
///
/// Operations are requests: they return once the engine has accepted or
/// rejected them, and their outcome is observed through
/// [`snapshot`](Self::snapshot), [`watch_snapshot`](Self::watch_snapshot) or
/// [`subscribe`](Self::subscribe).
#[derive(Debug, Clone)]
pub struct EngineHandle {
    inputs: mpsc::UnboundedSender<Input>,
    snapshot: watch::Receiver<EngineSnapshot>,
    telemetry: watch::Receiver<TelemetrySnapshot>,
    events: EventDispatcher,
}

impl EngineHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.inputs
            .send(Input::Command(make(tx)))
            .map_err(|_| Error::EngineStopped)?;
        rx.await.map_err(|_| Error::EngineStopped)?
    }

    /// Begin scanning.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn start_scan(&self) -> Result<()> {
        self.request(Command::StartScan).await
    }

    /// Stop scanning.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn stop_scan(&self) -> Result<()> {
        self.request(Command::StopScan).await
    }

    /// Request a connection. Returns the attempt number.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn connect(&self, id: &str) -> Result<u64> {
        let id = id.to_string();
        self.request(|reply| Command::Connect(id, reply)).await
    }

    /// Disconnect or cancel a pending connection.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn disconnect(&self) -> Result<()> {
        self.request(Command::Disconnect).await
    }

    /// Enable or disable auto-store.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn set_auto_store(&self, enabled: bool) -> Result<()> {
        self.request(|reply| Command::SetAutoStore(enabled, reply))
            .await
    }

    /// Switch the peripheral LED.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn set_led(&self, on: bool) -> Result<()> {
        self.request(|reply| Command::SetLed(on, reply)).await
    }

    /// Stop the engine loop, disconnecting any active session.
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.inputs
            .send(Input::Command(Command::Shutdown(tx)))
            .map_err(|_| Error::EngineStopped)?;
        rx.await.map_err(|_| Error::EngineStopped)
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver of snapshot changes.
    pub fn watch_snapshot(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot.clone()
    }

    /// Receiver of telemetry changes only.
    pub fn watch_telemetry(&self) -> watch::Receiver<TelemetrySnapshot> {
        self.telemetry.clone()
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Wait until a snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&EngineSnapshot) -> bool,
    ) -> Result<EngineSnapshot> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(predicate)
            .await
            .map_err(|_| Error::EngineStopped)?;
        Ok(snapshot.clone())
    }

    /// Wait until the connection reaches `Connected` or a terminal state.
    pub async fn wait_for_connection(&self) -> Result<ConnectionState> {
        let snapshot = self
            .wait_for(|s| {
                matches!(
                    s.state,
                    ConnectionState::Connected | ConnectionState::Disconnected(_)
                )
            })
            .await?;
        Ok(snapshot.state)
    }

    /// Whether the engine loop is still accepting requests.
    pub fn is_running(&self) -> bool {
        !self.inputs.is_closed()
    }
}

/// Forward engine events to a callback until the engine stops.
///
/// Lagged receivers skip the missed events and continue.
pub fn forward_events(
    mut events: EventReceiver,
    mut callback: impl FnMut(EngineEvent) + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => callback(event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Event receiver lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
