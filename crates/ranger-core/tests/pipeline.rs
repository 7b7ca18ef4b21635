//! End-to-end pipeline tests driven through the mock transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use ranger_core::uuids::{BATTERY_LEVEL, BATTERY_SERVICE, RANGE_MEASUREMENT, RANGE_SERVICE};
use ranger_core::{
    ConnectionState, MockCall, MockTransport, PowerState, Ranger, TransportEvent,
};

/// Generous bound so a wedged pipeline fails the test instead of hanging.
const WAIT: Duration = Duration::from_secs(5);

async fn wait_for_state(ranger: &Ranger, state: ConnectionState) {
    let mut watch = ranger.state_watch();
    timeout(WAIT, watch.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for state {state}"))
        .unwrap();
}

fn happy_mock() -> (Arc<MockTransport>, ranger_core::DeviceHandle) {
    let device = MockTransport::device();
    let mock = Arc::new(
        MockTransport::new()
            .with_scan_results(vec![device.clone()])
            .with_known_devices(vec![device.clone()])
            .with_read_response(RANGE_MEASUREMENT, vec![0x10, 0x00])
            .with_read_response(BATTERY_LEVEL, vec![0x5A]),
    );
    (mock, device)
}

#[tokio::test]
async fn test_scan_connect_and_stream() {
    let (mock, _device) = happy_mock();
    let ranger = Ranger::new(Arc::clone(&mock)).unwrap();

    ranger.start();
    wait_for_state(&ranger, ConnectionState::Connected).await;

    let mut range = ranger.range_watch();
    let range = *timeout(WAIT, range.wait_for(|r| r.is_some()))
        .await
        .expect("no range published")
        .unwrap();
    assert_eq!(range, Some(16));

    let mut battery = ranger.battery_watch();
    let battery = *timeout(WAIT, battery.wait_for(|b| b.is_some()))
        .await
        .expect("no battery published")
        .unwrap();
    assert_eq!(battery, Some(90));

    let calls = mock.calls().await;
    assert!(calls.contains(&MockCall::StartScan(RANGE_SERVICE)));
    assert!(calls.contains(&MockCall::StopScan));
    assert!(calls.contains(&MockCall::SetNotify(RANGE_MEASUREMENT, true)));
    assert!(calls.contains(&MockCall::SetNotify(BATTERY_LEVEL, true)));
}

#[tokio::test]
async fn test_state_sequence_through_happy_path() {
    let (mock, _device) = happy_mock();
    let ranger = Ranger::new(Arc::clone(&mock)).unwrap();
    let mut events = ranger.subscribe();

    ranger.start();
    wait_for_state(&ranger, ConnectionState::Connected).await;

    let mut states = Vec::new();
    while states.len() < 4 {
        match timeout(WAIT, events.recv()).await.expect("event stream dried up") {
            Ok(ranger_core::RangerEvent::StateChanged(state)) => states.push(state),
            Ok(_) => {}
            Err(err) => panic!("event channel failed: {err}"),
        }
    }
    assert_eq!(
        states,
        vec![
            ConnectionState::Starting,
            ConnectionState::Scanning,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_cancels_and_stops() {
    let device = MockTransport::device();
    let mock = Arc::new(
        MockTransport::new()
            .with_scan_results(vec![device.clone()])
            .with_silent_connect(),
    );
    let ranger = Ranger::new(Arc::clone(&mock)).unwrap();

    ranger.start();
    wait_for_state(&ranger, ConnectionState::Connecting).await;
    // Nothing answers; only the 12 second watchdog can resolve this. The
    // outer bound must sit beyond it so the paused clock reaches the
    // watchdog first.
    let mut watch = ranger.state_watch();
    timeout(
        Duration::from_secs(60),
        watch.wait_for(|s| *s == ConnectionState::Stopped),
    )
    .await
    .expect("watchdog never fired")
    .unwrap();

    let calls = mock.calls().await;
    assert!(calls.contains(&MockCall::CancelConnect(device.identity.clone())));
    assert!(!calls.iter().any(|c| matches!(c, MockCall::DiscoverServices(..))));
}

#[tokio::test]
async fn test_unsolicited_disconnect_stops_and_keeps_identity() {
    let (mock, device) = happy_mock();
    let ranger = Ranger::new(Arc::clone(&mock)).unwrap();

    ranger.start();
    wait_for_state(&ranger, ConnectionState::Connected).await;

    mock.emit(TransportEvent::Disconnected {
        device: device.identity.clone(),
        reason: None,
    });
    wait_for_state(&ranger, ConnectionState::Stopped).await;
    assert_eq!(ranger.range(), None);
    assert_eq!(ranger.battery(), None);

    // The cached identity survives the disconnect: the next session goes
    // through retrieve, not a second scan.
    ranger.start();
    wait_for_state(&ranger, ConnectionState::Connected).await;

    let calls = mock.calls().await;
    let scans = calls
        .iter()
        .filter(|c| matches!(c, MockCall::StartScan(_)))
        .count();
    assert_eq!(scans, 1);
    assert!(calls.contains(&MockCall::RetrieveKnown(device.identity.clone())));
}

#[tokio::test]
async fn test_failed_reconnect_falls_back_to_scan() {
    let (mock, device) = happy_mock();
    let ranger = Ranger::new(Arc::clone(&mock)).unwrap();

    ranger.start();
    wait_for_state(&ranger, ConnectionState::Connected).await;
    mock.emit(TransportEvent::Disconnected {
        device: device.identity.clone(),
        reason: None,
    });
    wait_for_state(&ranger, ConnectionState::Stopped).await;

    // Refuse the direct reconnect; the fallback scan's attempt succeeds.
    mock.set_connect_refusals(1);
    ranger.start();
    wait_for_state(&ranger, ConnectionState::Connected).await;

    let calls = mock.calls().await;
    let retrieve = calls
        .iter()
        .position(|c| matches!(c, MockCall::RetrieveKnown(_)))
        .expect("reconnect was not attempted");
    let cancel = calls
        .iter()
        .position(|c| matches!(c, MockCall::CancelConnect(_)))
        .expect("failed attempt was not cancelled");
    let fallback_scan = calls
        .iter()
        .rposition(|c| matches!(c, MockCall::StartScan(_)))
        .expect("no scan recorded");
    assert!(retrieve < cancel);
    assert!(cancel < fallback_scan, "fallback scan must follow the failed reconnect");
}

#[tokio::test]
async fn test_stale_connect_event_does_not_fake_connection() {
    let (mock, device) = happy_mock();
    let ranger = Ranger::new(Arc::clone(&mock)).unwrap();

    ranger.start();
    wait_for_state(&ranger, ConnectionState::Connected).await;
    mock.emit(TransportEvent::Disconnected {
        device: device.identity.clone(),
        reason: None,
    });
    wait_for_state(&ranger, ConnectionState::Stopped).await;

    // A success reply from the torn-down session arrives late, and every
    // real attempt of the next session is refused: first the direct
    // reconnect, then the fallback scan's attempt.
    mock.emit(TransportEvent::Connected {
        device: device.identity.clone(),
    });
    mock.set_connect_refusals(2);

    let mut events = ranger.subscribe();
    ranger.start();
    let mut states = Vec::new();
    loop {
        match timeout(WAIT, events.recv()).await.expect("pipeline wedged") {
            Ok(ranger_core::RangerEvent::StateChanged(state)) => {
                let done = state == ConnectionState::Stopped;
                states.push(state);
                if done {
                    break;
                }
            }
            Ok(_) => {}
            Err(err) => panic!("event channel failed: {err}"),
        }
    }
    assert!(
        !states.contains(&ConnectionState::Connected),
        "stale success event produced a connection: {states:?}"
    );
}

#[tokio::test]
async fn test_foreign_peripheral_events_are_ignored() {
    let (mock, device) = happy_mock();
    let ranger = Ranger::new(Arc::clone(&mock)).unwrap();

    ranger.start();
    wait_for_state(&ranger, ConnectionState::Connected).await;

    // Another peripheral's faulted disconnect must not unwind our session.
    mock.emit(TransportEvent::Disconnected {
        device: "someone-else".to_string(),
        reason: Some("gone".to_string()),
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ranger.state(), ConnectionState::Connected);

    // Our own still does.
    mock.emit(TransportEvent::Disconnected {
        device: device.identity.clone(),
        reason: None,
    });
    wait_for_state(&ranger, ConnectionState::Stopped).await;
}

#[tokio::test]
async fn test_stop_while_scanning_prevents_connect() {
    let mock = Arc::new(MockTransport::new());
    let ranger = Ranger::new(Arc::clone(&mock)).unwrap();

    ranger.start();
    wait_for_state(&ranger, ConnectionState::Scanning).await;
    ranger.stop();
    wait_for_state(&ranger, ConnectionState::Stopped).await;

    let calls = mock.calls().await;
    assert!(calls.contains(&MockCall::StopScan));
    assert!(!calls.iter().any(|c| matches!(c, MockCall::Connect(_))));
}

#[tokio::test]
async fn test_powered_off_radio_stops_without_scanning() {
    let mock = Arc::new(MockTransport::new().with_power_on_attach(PowerState::PoweredOff));
    let ranger = Ranger::new(Arc::clone(&mock)).unwrap();

    ranger.start();
    wait_for_state(&ranger, ConnectionState::Stopped).await;

    let calls = mock.calls().await;
    assert!(!calls.iter().any(|c| matches!(c, MockCall::StartScan(_))));
}

#[tokio::test]
async fn test_stop_when_stopped_is_a_no_op() {
    let mock = Arc::new(MockTransport::new());
    let ranger = Ranger::new(Arc::clone(&mock)).unwrap();
    let mut events = ranger.subscribe();

    ranger.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ranger.state(), ConnectionState::Initialized);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_repeated_start_runs_one_session() {
    let (mock, _device) = happy_mock();
    let ranger = Ranger::new(Arc::clone(&mock)).unwrap();

    ranger.start();
    ranger.start();
    wait_for_state(&ranger, ConnectionState::Connected).await;

    let calls = mock.calls().await;
    let attaches = calls.iter().filter(|c| **c == MockCall::Attach).count();
    assert_eq!(attaches, 1);
}

#[tokio::test]
async fn test_invalid_payload_is_dropped() {
    let device = MockTransport::device();
    let mock = Arc::new(MockTransport::new().with_scan_results(vec![device.clone()]));
    let ranger = Ranger::new(Arc::clone(&mock)).unwrap();

    ranger.start();
    wait_for_state(&ranger, ConnectionState::Connected).await;

    // Wrong lengths: ignored without error or publication.
    mock.emit(TransportEvent::ValueUpdated {
        characteristic: RANGE_MEASUREMENT,
        payload: vec![0x10],
    });
    mock.emit(TransportEvent::ValueUpdated {
        characteristic: BATTERY_LEVEL,
        payload: vec![0x5A, 0x00],
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ranger.state(), ConnectionState::Connected);
    assert_eq!(ranger.range(), None);
    assert_eq!(ranger.battery(), None);

    mock.emit(TransportEvent::ValueUpdated {
        characteristic: RANGE_MEASUREMENT,
        payload: vec![0x2A, 0x00],
    });
    let mut range = ranger.range_watch();
    let range = *timeout(WAIT, range.wait_for(|r| r.is_some()))
        .await
        .expect("valid payload was not published")
        .unwrap();
    assert_eq!(range, Some(42));
}

#[tokio::test]
async fn test_discovery_failure_aborts_to_stopped() {
    let device = MockTransport::device();
    let mock = Arc::new(
        MockTransport::new()
            .with_scan_results(vec![device.clone()])
            .with_manual_discovery(),
    );
    let ranger = Ranger::new(Arc::clone(&mock)).unwrap();

    ranger.start();
    wait_for_state(&ranger, ConnectionState::Connected).await;
    mock.emit(TransportEvent::DiscoveryFailed {
        device: device.identity.clone(),
        detail: "gatt error".to_string(),
    });
    wait_for_state(&ranger, ConnectionState::Stopped).await;
}

#[tokio::test]
async fn test_manual_discovery_resolves_in_steps() {
    let device = MockTransport::device();
    let mock = Arc::new(
        MockTransport::new()
            .with_scan_results(vec![device.clone()])
            .with_manual_discovery(),
    );
    let ranger = Ranger::new(Arc::clone(&mock)).unwrap();

    ranger.start();
    wait_for_state(&ranger, ConnectionState::Connected).await;
    // Connected is entered before discovery completes; notifications only
    // get enabled after both services and both characteristics resolve.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!mock
        .calls()
        .await
        .iter()
        .any(|c| matches!(c, MockCall::SetNotify(..))));

    mock.emit(TransportEvent::ServicesDiscovered {
        device: device.identity.clone(),
        services: vec![RANGE_SERVICE, BATTERY_SERVICE],
    });
    mock.emit(TransportEvent::CharacteristicsDiscovered {
        service: RANGE_SERVICE,
        characteristics: vec![RANGE_MEASUREMENT],
    });
    mock.emit(TransportEvent::CharacteristicsDiscovered {
        service: BATTERY_SERVICE,
        characteristics: vec![BATTERY_LEVEL],
    });

    timeout(WAIT, async {
        loop {
            let calls = mock.calls().await;
            if calls.contains(&MockCall::SetNotify(RANGE_MEASUREMENT, true))
                && calls.contains(&MockCall::SetNotify(BATTERY_LEVEL, true))
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscriptions were never enabled");
}
