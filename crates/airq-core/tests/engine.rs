//! End-to-end tests for the engine loop driven by a scripted radio.
//!
//! These run without hardware. Timing-sensitive tests use tokio's paused
//! clock so that multi-second schedules complete instantly.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout};

use airq_core::autostore::{AutoStoreConfig, AutoStoreTrigger, PersistRequest, channel_sink};
use airq_core::{
    DisconnectReason, DiscoveredPeripheral, Engine, EngineConfig, EngineEvent, EngineHandle,
    EngineSnapshot, Error, MockRadio, RadioCommand, RadioEvent, Simulator, TelemetryCategory,
    uuids,
};
use airq_core::{ConnectionState, EnvironmentalReading, GasReading, ParticulateReading};

const SENSOR: &str = "AA:BB:CC:DD:EE:01";
const WAIT: Duration = Duration::from_secs(30);

async fn wait(
    handle: &EngineHandle,
    predicate: impl FnMut(&EngineSnapshot) -> bool,
) -> EngineSnapshot {
    timeout(WAIT, handle.wait_for(predicate))
        .await
        .expect("timed out waiting for engine state")
        .unwrap()
}

fn fully_subscribed(snapshot: &EngineSnapshot) -> bool {
    snapshot.state == ConnectionState::Connected
        && snapshot
            .session
            .as_ref()
            .is_some_and(|s| s.subscribed.len() == 4)
}

fn notification(characteristic: uuid::Uuid, value: Vec<u8>) -> RadioEvent {
    RadioEvent::CharacteristicValueUpdated {
        id: SENSOR.to_string(),
        characteristic,
        value,
    }
}

fn environmental(temperature: f32, humidity: f32) -> RadioEvent {
    notification(
        uuids::ENVIRONMENTAL,
        EnvironmentalReading {
            temperature,
            humidity,
        }
        .to_bytes(),
    )
}

fn responsive_radio() -> (MockRadio, mpsc::UnboundedReceiver<RadioEvent>) {
    let (radio, events) = MockRadio::responsive();
    radio.advertise(DiscoveredPeripheral::new(SENSOR, Some("AirQ-1"), Some(-48)));
    radio.advertise(DiscoveredPeripheral::new(
        "AA:BB:CC:DD:EE:02",
        Some("AirQ-2"),
        Some(-71),
    ));
    // Unnamed advertisers never reach the registry
    radio.advertise(DiscoveredPeripheral::new(
        "AA:BB:CC:DD:EE:03",
        None,
        Some(-80),
    ));
    (radio, events)
}

/// Scan, connect and wait until every notifying characteristic is subscribed.
async fn connect(handle: &EngineHandle) {
    handle.start_scan().await.unwrap();
    wait(handle, |s| s.peripherals.len() == 2).await;
    handle.connect(SENSOR).await.unwrap();
    wait(handle, fully_subscribed).await;
}

async fn connected_engine(
    config: EngineConfig,
) -> (EngineHandle, MockRadio, mpsc::UnboundedReceiver<PersistRequest>) {
    let (radio, events) = responsive_radio();
    let (persist_tx, persist_rx) = mpsc::unbounded_channel();
    let handle = Engine::new(radio.clone(), config)
        .unwrap()
        .with_persist_sink(channel_sink(persist_tx))
        .spawn(events);
    connect(&handle).await;
    (handle, radio, persist_rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<PersistRequest>) -> Vec<PersistRequest> {
    let mut requests = Vec::new();
    while let Ok(request) = rx.try_recv() {
        requests.push(request);
    }
    requests
}

// =============================================================================
// Discovery and connection lifecycle
// =============================================================================

#[tokio::test]
async fn test_scan_populates_registry() {
    let (radio, events) = responsive_radio();
    let handle = Engine::new(radio, EngineConfig::default())
        .unwrap()
        .spawn(events);

    handle.start_scan().await.unwrap();
    let snapshot = wait(&handle, |s| s.peripherals.len() == 2).await;

    assert_eq!(snapshot.state, ConnectionState::Scanning);
    assert_eq!(snapshot.peripherals[0].id, SENSOR);
    assert_eq!(snapshot.peripherals[0].display_name(), Some("AirQ-1"));
    assert_eq!(snapshot.peripherals[1].display_name(), Some("AirQ-2"));
    assert!(!snapshot.peripherals.iter().any(|p| p.id == "AA:BB:CC:DD:EE:03"));

    handle.stop_scan().await.unwrap();
    let snapshot = wait(&handle, |s| s.state == ConnectionState::Idle).await;
    assert_eq!(snapshot.peripherals.len(), 2);
}

#[tokio::test]
async fn test_connect_subscribes_to_all_notifying_characteristics() {
    let (handle, radio, _persist) = connected_engine(EngineConfig::default()).await;

    let snapshot = handle.snapshot();
    let session = snapshot.session.unwrap();
    assert_eq!(session.target, SENSOR);
    assert_eq!(session.name.as_deref(), Some("AirQ-1"));
    assert_eq!(session.attempt, 1);

    let commands = radio.commands();
    assert!(commands.contains(&RadioCommand::StopScan));
    let notifies = commands
        .iter()
        .filter(|c| matches!(c, RadioCommand::SetNotify { enabled: true, .. }))
        .count();
    assert_eq!(notifies, 4);
    assert!(!commands.iter().any(|c| matches!(
        c,
        RadioCommand::SetNotify { characteristic, .. } if *characteristic == uuids::LED
    )));
}

#[tokio::test]
async fn test_connect_rejected_while_session_active() {
    let (handle, _radio, _persist) = connected_engine(EngineConfig::default()).await;

    let result = handle.connect("AA:BB:CC:DD:EE:02").await;
    assert!(matches!(result, Err(Error::SessionActive { .. })));
    let result = handle.start_scan().await;
    assert!(matches!(result, Err(Error::SessionActive { .. })));
}

#[tokio::test]
async fn test_connect_to_unknown_peripheral() {
    let (radio, events) = responsive_radio();
    let handle = Engine::new(radio, EngineConfig::default())
        .unwrap()
        .spawn(events);

    let result = handle.connect("FF:FF:FF:FF:FF:FF").await;
    assert!(matches!(result, Err(Error::PeripheralNotFound(_))));
    assert_eq!(handle.snapshot().state, ConnectionState::Idle);
}

#[tokio::test]
async fn test_user_disconnect() {
    let (handle, radio, _persist) = connected_engine(EngineConfig::default()).await;

    handle.disconnect().await.unwrap();
    let snapshot = wait(&handle, |s| {
        matches!(s.state, ConnectionState::Disconnected(_))
    })
    .await;

    assert_eq!(
        snapshot.state,
        ConnectionState::Disconnected(DisconnectReason::UserRequested)
    );
    assert!(snapshot.session.is_none());
    assert!(radio.commands().contains(&RadioCommand::CancelConnection {
        id: SENSOR.to_string()
    }));

    // A new session can start from the terminal state
    handle.start_scan().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_while_connecting() {
    let radio = MockRadio::new();
    radio.add_peripheral(SENSOR);
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = Engine::new(radio.clone(), EngineConfig::default())
        .unwrap()
        .spawn(rx);

    handle.connect(SENSOR).await.unwrap();
    assert_eq!(handle.snapshot().state, ConnectionState::Connecting);

    handle.disconnect().await.unwrap();
    assert_eq!(handle.snapshot().state, ConnectionState::Disconnecting);
    assert_eq!(
        radio.last_command(),
        Some(RadioCommand::CancelConnection {
            id: SENSOR.to_string()
        })
    );

    // The platform reports the cancelled attempt as a failure
    tx.send(RadioEvent::ConnectFailed {
        id: SENSOR.to_string(),
        error: Some("cancelled".to_string()),
    })
    .unwrap();
    let snapshot = wait(&handle, |s| {
        matches!(s.state, ConnectionState::Disconnected(_))
    })
    .await;
    assert_eq!(
        snapshot.state,
        ConnectionState::Disconnected(DisconnectReason::UserRequested)
    );
}

#[tokio::test]
async fn test_remote_disconnect() {
    let (handle, radio, _persist) = connected_engine(EngineConfig::default()).await;
    handle.set_auto_store(true).await.unwrap();

    radio.emit(RadioEvent::Disconnected {
        id: SENSOR.to_string(),
        error: Some("link lost".to_string()),
    });
    let snapshot = wait(&handle, |s| {
        matches!(s.state, ConnectionState::Disconnected(_))
    })
    .await;

    assert_eq!(
        snapshot.state,
        ConnectionState::Disconnected(DisconnectReason::RemoteOrError(Some(
            "link lost".to_string()
        )))
    );
    assert!(!snapshot.auto_store_enabled);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_connecting_cancels_auto_store_timer() {
    let radio = MockRadio::new();
    radio.add_peripheral(SENSOR);
    let (tx, rx) = mpsc::unbounded_channel();
    let (persist_tx, mut persist_rx) = mpsc::unbounded_channel();
    let handle = Engine::new(radio, EngineConfig::default())
        .unwrap()
        .with_persist_sink(channel_sink(persist_tx))
        .spawn(rx);

    handle.connect(SENSOR).await.unwrap();
    handle.set_auto_store(true).await.unwrap();
    assert!(handle.snapshot().auto_store_enabled);

    handle.disconnect().await.unwrap();
    assert!(!handle.snapshot().auto_store_enabled);
    tx.send(RadioEvent::ConnectFailed {
        id: SENSOR.to_string(),
        error: None,
    })
    .unwrap();
    wait(&handle, |s| matches!(s.state, ConnectionState::Disconnected(_))).await;

    sleep(Duration::from_secs(30)).await;
    assert!(drain(&mut persist_rx).is_empty());
    assert_eq!(handle.snapshot().persist_requests, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reconnect_after_remote_disconnect() {
    let (handle, radio, _persist) = connected_engine(EngineConfig::default()).await;

    for attempt in 2..=20 {
        radio.emit(RadioEvent::Disconnected {
            id: SENSOR.to_string(),
            error: Some("link lost".to_string()),
        });
        wait(&handle, |s| matches!(s.state, ConnectionState::Disconnected(_))).await;

        assert_eq!(handle.connect(SENSOR).await.unwrap(), attempt);
        // The accepted request is visible before the reply arrives
        assert!(!matches!(
            handle.snapshot().state,
            ConnectionState::Disconnected(_)
        ));
        let state = timeout(WAIT, handle.wait_for_connection())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, ConnectionState::Connected, "attempt {attempt}");
        wait(&handle, fully_subscribed).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    let radio = MockRadio::new();
    radio.add_peripheral(SENSOR);
    let (_tx, rx) = mpsc::unbounded_channel();
    let config = EngineConfig::builder()
        .connect_timeout(Duration::from_secs(10))
        .build();
    let handle = Engine::new(radio.clone(), config).unwrap().spawn(rx);

    let start = Instant::now();
    handle.connect(SENSOR).await.unwrap();
    let state = timeout(WAIT, handle.wait_for_connection())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(state, ConnectionState::Disconnected(DisconnectReason::TimedOut));
    assert!(start.elapsed() >= Duration::from_secs(10));
    assert_eq!(
        radio.last_command(),
        Some(RadioCommand::CancelConnection {
            id: SENSOR.to_string()
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_does_not_fire_after_connect() {
    let config = EngineConfig::builder()
        .connect_timeout(Duration::from_secs(10))
        .build();
    let (handle, _radio, _persist) = connected_engine(config).await;

    sleep(Duration::from_secs(30)).await;
    assert_eq!(handle.snapshot().state, ConnectionState::Connected);
}

// =============================================================================
// Telemetry
// =============================================================================

#[tokio::test]
async fn test_notifications_update_telemetry() {
    let (handle, radio, _persist) = connected_engine(EngineConfig::default()).await;
    let mut telemetry = handle.watch_telemetry();

    radio.emit(notification(
        uuids::PARTICULATE,
        ParticulateReading {
            pm1: 4.0,
            pm2_5: 8.5,
            pm4: 10.0,
            pm10: 12.0,
        }
        .to_bytes(),
    ));
    radio.emit(notification(
        uuids::GAS,
        GasReading {
            voc_index: 110.0,
            nox_index: 2.0,
            co2: 640.0,
        }
        .to_bytes(),
    ));

    let snapshot = timeout(WAIT, telemetry.wait_for(|t| t.gas_at.is_some()))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(snapshot.particulate.pm2_5, 8.5);
    assert_eq!(snapshot.gas.co2, 640.0);
    assert!(snapshot.updated_at(TelemetryCategory::Environmental).is_none());
}

#[tokio::test]
async fn test_malformed_payload_is_dropped() {
    let (handle, radio, _persist) = connected_engine(EngineConfig::default()).await;
    let mut events = handle.subscribe();

    radio.emit(notification(uuids::GAS, vec![0x01, 0x02, 0x03]));
    let snapshot = wait(&handle, |s| s.malformed_payloads == 1).await;

    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert!(!snapshot.telemetry.has_data());
    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert!(matches!(event, EngineEvent::PayloadDropped { characteristic, .. } if characteristic == uuids::GAS));
}

#[tokio::test]
async fn test_notifications_from_foreign_peripheral_ignored() {
    let (handle, radio, _persist) = connected_engine(EngineConfig::default()).await;

    radio.emit(RadioEvent::CharacteristicValueUpdated {
        id: "AA:BB:CC:DD:EE:02".to_string(),
        characteristic: uuids::ENVIRONMENTAL,
        value: EnvironmentalReading {
            temperature: 30.0,
            humidity: 20.0,
        }
        .to_bytes(),
    });
    radio.emit(environmental(21.0, 45.0));

    let snapshot = wait(&handle, |s| s.telemetry.has_data()).await;
    assert_eq!(snapshot.telemetry.environmental.temperature, 21.0);
}

#[tokio::test]
async fn test_telemetry_reset_on_new_session() {
    let (handle, radio, _persist) = connected_engine(EngineConfig::default()).await;
    radio.emit(environmental(21.0, 45.0));
    wait(&handle, |s| s.telemetry.has_data()).await;

    handle.disconnect().await.unwrap();
    wait(&handle, |s| matches!(s.state, ConnectionState::Disconnected(_))).await;

    connect(&handle).await;
    let snapshot = handle.snapshot();
    assert!(!snapshot.telemetry.has_data());
    assert_eq!(snapshot.session.unwrap().attempt, 2);
}

// =============================================================================
// Auto-store
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_auto_store_rate_limits_frequent_arrivals() {
    let (handle, radio, mut persist) = connected_engine(EngineConfig::default()).await;
    handle.set_auto_store(true).await.unwrap();

    // One notification per second for 30 seconds
    for i in 0..30 {
        radio.emit(environmental(20.0 + i as f32 * 0.1, 50.0));
        sleep(Duration::from_secs(1)).await;
    }

    let requests = drain(&mut persist);
    assert!(
        (5..=7).contains(&requests.len()),
        "expected at most one request per 5s, got {}",
        requests.len()
    );
    assert_eq!(handle.snapshot().persist_requests, requests.len() as u64);
    for request in &requests {
        assert_eq!(request.sensor_id, SENSOR);
        assert_eq!(request.sensor_name.as_deref(), Some("AirQ-1"));
    }
}

#[tokio::test(start_paused = true)]
async fn test_auto_store_timer_only() {
    let config = EngineConfig::builder()
        .auto_store(
            AutoStoreConfig::builder()
                .trigger(AutoStoreTrigger::Timer)
                .build(),
        )
        .build();
    let (handle, radio, mut persist) = connected_engine(config).await;
    radio.emit(environmental(22.0, 40.0));
    wait(&handle, |s| s.telemetry.has_data()).await;

    handle.set_auto_store(true).await.unwrap();
    sleep(Duration::from_millis(16_500)).await;

    let requests = drain(&mut persist);
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].snapshot.environmental.temperature, 22.0);
}

#[tokio::test(start_paused = true)]
async fn test_auto_store_stops_on_disable() {
    let (handle, _radio, mut persist) = connected_engine(EngineConfig::default()).await;

    handle.set_auto_store(true).await.unwrap();
    sleep(Duration::from_millis(5_500)).await;
    assert_eq!(drain(&mut persist).len(), 1);

    handle.set_auto_store(false).await.unwrap();
    sleep(Duration::from_secs(30)).await;
    assert!(drain(&mut persist).is_empty());
    assert!(!handle.snapshot().auto_store_enabled);
}

#[tokio::test]
async fn test_auto_store_requires_session() {
    let (radio, events) = responsive_radio();
    let handle = Engine::new(radio, EngineConfig::default())
        .unwrap()
        .spawn(events);

    let result = handle.set_auto_store(true).await;
    assert!(matches!(result, Err(Error::NotConnected)));
    // Disabling is always accepted
    handle.set_auto_store(false).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_simulated_sensor_drives_auto_store() {
    let (handle, radio, mut persist) = connected_engine(EngineConfig::default()).await;
    handle.set_auto_store(true).await.unwrap();

    let simulation = Simulator::seeded(11)
        .spawn(SENSOR, radio.event_sender().unwrap(), Duration::from_secs(2))
        .unwrap();
    sleep(Duration::from_millis(20_500)).await;
    simulation.stop().await;

    let snapshot = handle.snapshot();
    assert!(snapshot.telemetry.particulate_at.is_some());
    assert!(snapshot.telemetry.gas_at.is_some());
    let requests = drain(&mut persist);
    assert!((4..=5).contains(&requests.len()), "got {}", requests.len());
}

// =============================================================================
// LED and button
// =============================================================================

#[tokio::test]
async fn test_led_write() {
    let (handle, radio, _persist) = connected_engine(EngineConfig::default()).await;

    handle.set_led(true).await.unwrap();
    assert_eq!(
        radio.last_command(),
        Some(RadioCommand::WriteValue {
            id: SENSOR.to_string(),
            characteristic: uuids::LED,
            value: vec![1],
        })
    );

    handle.set_led(false).await.unwrap();
    assert!(matches!(
        radio.last_command(),
        Some(RadioCommand::WriteValue { value, .. }) if value == vec![0]
    ));
}

#[tokio::test]
async fn test_led_requires_connection() {
    let (radio, events) = responsive_radio();
    let handle = Engine::new(radio, EngineConfig::default())
        .unwrap()
        .spawn(events);
    assert!(matches!(
        handle.set_led(true).await,
        Err(Error::NotConnected)
    ));
}

#[tokio::test]
async fn test_button_notifications() {
    let (handle, radio, _persist) = connected_engine(EngineConfig::default()).await;
    let mut events = handle.subscribe();

    radio.emit(notification(uuids::BUTTON, vec![1]));
    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert!(matches!(
        event,
        EngineEvent::ButtonChanged { pressed: true, ref id } if id == SENSOR
    ));
}

// =============================================================================
// Adapter power
// =============================================================================

#[tokio::test]
async fn test_power_cycle_resumes_scan() {
    let (radio, events) = responsive_radio();
    let handle = Engine::new(radio.clone(), EngineConfig::default())
        .unwrap()
        .spawn(events);

    radio.emit(RadioEvent::AdapterStateChanged { powered_on: true });
    wait(&handle, |s| s.adapter_powered == Some(true)).await;
    handle.start_scan().await.unwrap();

    radio.emit(RadioEvent::AdapterStateChanged { powered_on: false });
    let snapshot = wait(&handle, |s| s.adapter_powered == Some(false)).await;
    assert_eq!(snapshot.state, ConnectionState::Idle);
    assert!(matches!(
        handle.start_scan().await,
        Err(Error::AdapterUnavailable)
    ));

    radio.emit(RadioEvent::AdapterStateChanged { powered_on: true });
    let snapshot = wait(&handle, |s| s.state == ConnectionState::Scanning).await;
    assert_eq!(snapshot.adapter_powered, Some(true));
}

#[tokio::test]
async fn test_auto_scan_on_power_on() {
    let (radio, events) = responsive_radio();
    let config = EngineConfig::builder().auto_scan_on_power_on(true).build();
    let handle = Engine::new(radio.clone(), config).unwrap().spawn(events);

    radio.emit(RadioEvent::AdapterStateChanged { powered_on: true });
    let snapshot = wait(&handle, |s| s.peripherals.len() == 2).await;
    assert_eq!(snapshot.state, ConnectionState::Scanning);
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_disconnects() {
    let (handle, radio, _persist) = connected_engine(EngineConfig::default()).await;

    handle.shutdown().await.unwrap();
    tokio::task::yield_now().await;

    assert!(radio.commands().contains(&RadioCommand::CancelConnection {
        id: SENSOR.to_string()
    }));
    assert!(!handle.is_running());
    assert!(matches!(
        handle.start_scan().await,
        Err(Error::EngineStopped)
    ));
}
