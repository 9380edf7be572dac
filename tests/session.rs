use std::sync::Arc;
use futures::channel::mpsc::UnboundedReceiver;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use sync_remote::config::types::Config;
use sync_remote::device::codec::Command;
use sync_remote::device::constants::{MOTOR_SERVICE_UUID, MOTOR_WRITE_UUID};
use sync_remote::device::facade::SessionFacade;
use sync_remote::device::mock::{MockPermission, MockRadio, RecordedWrite};
use sync_remote::device::types::{
    ConnectionState, PeripheralId, PeripheralRef, ScanState, SessionEvent, WriteTarget,
};
use sync_remote::error::SessionError;

struct Session {
    facade: SessionFacade,
    events: UnboundedReceiver<SessionEvent>,
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

async fn start(radio: &Arc<MockRadio>, permission: MockPermission) -> Session {
    let cancel = CancellationToken::new();
    let (facade, events, handle) = SessionFacade::start(
        radio.clone(),
        Arc::new(permission),
        &Config::default(),
        cancel.clone(),
    ).await.unwrap();

    Session { facade, events, handle, cancel }
}

async fn wait_for(events: &mut UnboundedReceiver<SessionEvent>, expected: SessionEvent) {
    while let Some(event) = events.next().await {
        if event == expected {
            return;
        }
    }
    panic!("event stream ended before {:?}", expected);
}

fn sync_device(id: &str) -> PeripheralRef {
    PeripheralRef::new(id, "SYNC")
}

async fn connected(radio: &Arc<MockRadio>) -> (Session, PeripheralRef) {
    let session = start(radio, MockPermission::granted()).await;
    let device = sync_device("a");

    session.facade.scan().await.unwrap();
    radio.advertise(device.clone());
    session.facade.connect(&device.id).await.unwrap();
    (session, device)
}

#[tokio::test]
async fn test_scan_connect_send_disconnect() {
    let radio = Arc::new(MockRadio::new());
    let mut session = start(&radio, MockPermission::granted()).await;
    let a = sync_device("a");

    assert_eq!(session.facade.scan().await, Ok(ScanState::Scanning));
    radio.advertise(a.clone());
    radio.advertise(PeripheralRef::new("b", "OTHER"));
    radio.advertise(a.clone());
    assert_eq!(session.facade.devices().await, Ok(vec![a.clone()]));

    assert_eq!(session.facade.connect(&a.id).await, Ok(a.clone()));

    let mut states = Vec::new();
    while states.last() != Some(&ConnectionState::Ready) {
        if let Some(SessionEvent::ConnectionStateChange(state)) = session.events.next().await {
            states.push(state);
        }
    }
    assert_eq!(states, vec![ConnectionState::Connecting, ConnectionState::Discovering, ConnectionState::Ready]);

    assert_eq!(session.facade.send(Command::Forward).await, Ok(()));
    assert_eq!(radio.writes(), vec![RecordedWrite {
        peripheral: a.id.clone(),
        target: WriteTarget { service: MOTOR_SERVICE_UUID, characteristic: MOTOR_WRITE_UUID },
        payload: "AQM=".to_string(),
    }]);

    assert_eq!(session.facade.disconnect().await, Ok(()));
    let status = session.facade.status().await.unwrap();
    assert_eq!(status.connection, ConnectionState::Disconnected);
    assert_eq!(status.peripheral, None);
    assert_eq!(radio.connected(), None);
    assert_eq!(radio.disconnects(), 1);
}

#[tokio::test]
async fn test_connect_stops_scan() {
    let radio = Arc::new(MockRadio::new());
    let (session, _) = connected(&radio).await;

    assert!(!radio.is_scanning());
    assert_eq!(session.facade.status().await.unwrap().scan, ScanState::Idle);
}

#[tokio::test]
async fn test_toggle_breathing_failure_keeps_mode() {
    let radio = Arc::new(MockRadio::new());
    let (session, _) = connected(&radio).await;

    radio.fail_write(Some("gatt error"));
    assert_eq!(
        session.facade.toggle_breathing().await,
        Err(SessionError::WriteFailed("gatt error".to_string()))
    );
    assert_eq!(radio.writes().last().unwrap().payload, "AQEB");
    assert!(!session.facade.status().await.unwrap().breathing);

    radio.fail_write(None);
    assert_eq!(session.facade.toggle_breathing().await, Ok(true));
    assert!(session.facade.status().await.unwrap().breathing);

    assert_eq!(session.facade.toggle_breathing().await, Ok(false));
    assert_eq!(radio.writes().last().unwrap().payload, "AQAB");
    assert!(!session.facade.status().await.unwrap().breathing);
}

#[tokio::test]
async fn test_send_before_ready_is_not_connected() {
    let radio = Arc::new(MockRadio::new());
    let mut session = start(&radio, MockPermission::granted()).await;
    let a = sync_device("a");

    session.facade.scan().await.unwrap();
    radio.advertise(a.clone());
    radio.hold_connect();

    let connecting = tokio::spawn({
        let facade = session.facade.clone();
        let id = a.id.clone();
        async move { facade.connect(&id).await }
    });
    wait_for(&mut session.events, SessionEvent::ConnectionStateChange(ConnectionState::Connecting)).await;

    assert_eq!(session.facade.send(Command::Forward).await, Err(SessionError::NotConnected));
    assert_eq!(session.facade.connect(&a.id).await, Err(SessionError::InvalidState));
    assert!(session.facade.status().await.unwrap().busy);

    radio.release_connect();
    assert_eq!(connecting.await.unwrap(), Ok(a));
    assert!(radio.writes().is_empty());
}

#[tokio::test]
async fn test_disconnect_cancels_connect() {
    let radio = Arc::new(MockRadio::new());
    let mut session = start(&radio, MockPermission::granted()).await;
    let a = sync_device("a");

    session.facade.scan().await.unwrap();
    radio.advertise(a.clone());
    radio.hold_connect();

    let connecting = tokio::spawn({
        let facade = session.facade.clone();
        let id = a.id.clone();
        async move { facade.connect(&id).await }
    });
    wait_for(&mut session.events, SessionEvent::ConnectionStateChange(ConnectionState::Connecting)).await;

    assert_eq!(session.facade.disconnect().await, Ok(()));
    assert_eq!(
        connecting.await.unwrap(),
        Err(SessionError::ConnectionFailed("cancelled by disconnect".to_string()))
    );

    let status = session.facade.status().await.unwrap();
    assert_eq!(status.connection, ConnectionState::Disconnected);
    assert!(!status.busy);
}

#[tokio::test]
async fn test_disconnect_twice_is_idempotent() {
    let radio = Arc::new(MockRadio::new());
    let (session, _) = connected(&radio).await;

    assert_eq!(session.facade.disconnect().await, Ok(()));
    assert_eq!(session.facade.disconnect().await, Ok(()));
    assert_eq!(radio.disconnects(), 1);

    let fresh = start(&Arc::new(MockRadio::new()), MockPermission::granted()).await;
    assert_eq!(fresh.facade.disconnect().await, Ok(()));
    assert_eq!(fresh.facade.disconnect().await, Ok(()));
}

#[tokio::test]
async fn test_scan_while_scanning_keeps_devices() {
    let radio = Arc::new(MockRadio::new());
    let session = start(&radio, MockPermission::granted()).await;

    session.facade.scan().await.unwrap();
    radio.advertise(sync_device("a"));

    assert_eq!(session.facade.scan().await, Ok(ScanState::Scanning));
    assert_eq!(session.facade.devices().await, Ok(vec![sync_device("a")]));
    assert_eq!(radio.scan_starts(), 1);
}

#[tokio::test]
async fn test_scan_without_permission() {
    let radio = Arc::new(MockRadio::new());
    let mut session = start(&radio, MockPermission::denied()).await;

    assert_eq!(session.facade.scan().await, Err(SessionError::PermissionDenied));
    assert_eq!(session.facade.status().await.unwrap().scan, ScanState::Idle);
    assert_eq!(radio.scan_starts(), 0);
    assert!(session.events.try_next().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_scan_stops_after_timeout() {
    let radio = Arc::new(MockRadio::new());
    let mut session = start(&radio, MockPermission::granted()).await;

    let started = Instant::now();
    session.facade.scan().await.unwrap();
    wait_for(&mut session.events, SessionEvent::ScanStateChange(ScanState::Idle)).await;

    assert!(started.elapsed() >= Duration::from_millis(5000));
    assert!(!radio.is_scanning());
}

#[tokio::test]
async fn test_radio_failure_ends_scan() {
    let radio = Arc::new(MockRadio::new());
    let mut session = start(&radio, MockPermission::granted()).await;

    session.facade.scan().await.unwrap();
    radio.fail_radio("adapter powered off");

    wait_for(
        &mut session.events,
        SessionEvent::Failure(SessionError::RadioError("adapter powered off".to_string())),
    ).await;
    assert_eq!(session.facade.status().await.unwrap().scan, ScanState::Idle);
}

#[tokio::test]
async fn test_event_stream_end_is_radio_failure() {
    let radio = Arc::new(MockRadio::new());
    let mut session = start(&radio, MockPermission::granted()).await;

    session.facade.scan().await.unwrap();
    radio.close_events();

    wait_for(
        &mut session.events,
        SessionEvent::Failure(SessionError::RadioError("adapter event stream ended".to_string())),
    ).await;
    assert_eq!(session.facade.status().await.unwrap().scan, ScanState::Idle);
}

#[tokio::test]
async fn test_event_stream_end_while_idle() {
    let radio = Arc::new(MockRadio::new());
    let mut session = start(&radio, MockPermission::granted()).await;

    radio.close_events();
    wait_for(
        &mut session.events,
        SessionEvent::Failure(SessionError::RadioError("adapter event stream ended".to_string())),
    ).await;

    assert_eq!(
        session.facade.scan().await,
        Err(SessionError::RadioError("adapter event stream ended".to_string()))
    );
    assert_eq!(radio.scan_starts(), 0);
    assert_eq!(session.facade.status().await.unwrap().scan, ScanState::Idle);
}

#[tokio::test]
async fn test_event_stream_end_drops_connection() {
    let radio = Arc::new(MockRadio::new());
    let (mut session, device) = connected(&radio).await;

    radio.close_events();
    wait_for(
        &mut session.events,
        SessionEvent::Failure(SessionError::RadioError("adapter event stream ended".to_string())),
    ).await;

    assert_eq!(session.facade.status().await.unwrap().connection, ConnectionState::Disconnected);
    assert_eq!(session.facade.send(Command::Stop).await, Err(SessionError::NotConnected));
    assert_eq!(
        session.facade.connect(&device.id).await,
        Err(SessionError::RadioError("adapter event stream ended".to_string()))
    );
}

#[tokio::test]
async fn test_radio_failure_while_idle_is_reported() {
    let radio = Arc::new(MockRadio::new());
    let mut session = start(&radio, MockPermission::granted()).await;

    radio.fail_radio("adapter powered off");
    wait_for(
        &mut session.events,
        SessionEvent::Failure(SessionError::RadioError("adapter powered off".to_string())),
    ).await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_scan_before_timeout() {
    let radio = Arc::new(MockRadio::new());
    let mut session = start(&radio, MockPermission::granted()).await;

    session.facade.scan().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(session.facade.stop_scan().await, Ok(ScanState::Idle));
    assert_eq!(session.facade.stop_scan().await, Ok(ScanState::Idle));

    assert_eq!(session.events.next().await, Some(SessionEvent::ScanStateChange(ScanState::Scanning)));
    assert_eq!(session.events.next().await, Some(SessionEvent::ScanStateChange(ScanState::Idle)));

    // well past the original scan window
    tokio::time::sleep(Duration::from_millis(10_000)).await;
    assert!(session.events.try_next().is_err());
    assert!(!radio.is_scanning());
    assert_eq!(radio.scan_starts(), 1);
}

#[tokio::test]
async fn test_connect_to_unknown_peripheral() {
    let radio = Arc::new(MockRadio::new());
    let session = start(&radio, MockPermission::granted()).await;

    assert_eq!(
        session.facade.connect(&PeripheralId::new("zzz")).await,
        Err(SessionError::ConnectionFailed("peripheral zzz was not discovered".to_string()))
    );
}

#[tokio::test]
async fn test_connect_failure_resets_session() {
    let radio = Arc::new(MockRadio::new());
    let session = start(&radio, MockPermission::granted()).await;
    let a = sync_device("a");

    session.facade.scan().await.unwrap();
    radio.advertise(a.clone());
    radio.fail_connect("out of range");

    assert_eq!(
        session.facade.connect(&a.id).await,
        Err(SessionError::ConnectionFailed("out of range".to_string()))
    );
    let status = session.facade.status().await.unwrap();
    assert_eq!(status.connection, ConnectionState::Disconnected);
    assert!(!status.busy);
}

#[tokio::test]
async fn test_discovery_failure_releases_link() {
    let radio = Arc::new(MockRadio::new());
    let session = start(&radio, MockPermission::granted()).await;
    let a = sync_device("a");

    session.facade.scan().await.unwrap();
    radio.advertise(a.clone());
    radio.fail_discovery("gatt busy");

    assert_eq!(
        session.facade.connect(&a.id).await,
        Err(SessionError::ConnectionFailed("gatt busy".to_string()))
    );
    let status = session.facade.status().await.unwrap();
    assert_eq!(status.connection, ConnectionState::Disconnected);
    assert_eq!(status.peripheral, None);

    // the link is released in the background
    for _ in 0..100 {
        if radio.disconnects() == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(radio.disconnects(), 1);
    assert_eq!(radio.connected(), None);
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_write_times_out() {
    let radio = Arc::new(MockRadio::new());
    let (session, _) = connected(&radio).await;

    radio.hold_write();
    let started = Instant::now();
    assert_eq!(
        session.facade.send(Command::Forward).await,
        Err(SessionError::WriteFailed("timed out".to_string()))
    );
    assert!(started.elapsed() >= Duration::from_millis(2000));
    assert!(!session.facade.status().await.unwrap().busy);
}

#[tokio::test]
async fn test_disconnect_cancels_write() {
    let radio = Arc::new(MockRadio::new());
    let (session, _) = connected(&radio).await;

    radio.hold_write();
    let sending = tokio::spawn({
        let facade = session.facade.clone();
        async move { facade.send(Command::Reverse).await }
    });
    while radio.writes().is_empty() {
        tokio::task::yield_now().await;
    }

    assert_eq!(session.facade.disconnect().await, Ok(()));
    assert_eq!(
        sending.await.unwrap(),
        Err(SessionError::WriteFailed("cancelled by disconnect".to_string()))
    );
    assert_eq!(radio.connected(), None);
    assert_eq!(session.facade.status().await.unwrap().connection, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_link_lost() {
    let radio = Arc::new(MockRadio::new());
    let (mut session, device) = connected(&radio).await;

    radio.drop_link(&device.id);
    wait_for(
        &mut session.events,
        SessionEvent::Failure(SessionError::ConnectionFailed("link lost".to_string())),
    ).await;

    assert_eq!(session.facade.status().await.unwrap().connection, ConnectionState::Disconnected);
    assert_eq!(session.facade.send(Command::Stop).await, Err(SessionError::NotConnected));
}

#[tokio::test]
async fn test_unknown_command_is_rejected() {
    let radio = Arc::new(MockRadio::new());
    let (session, _) = connected(&radio).await;

    assert!(matches!(
        session.facade.send(Command::SetMotorSpeed(80)).await,
        Err(SessionError::UnknownCommand(_))
    ));
    assert!(radio.writes().is_empty());
}

#[tokio::test]
async fn test_teardown_releases_radio() {
    let radio = Arc::new(MockRadio::new());
    let (session, _) = connected(&radio).await;
    assert!(radio.connected().is_some());

    session.cancel.cancel();
    session.handle.await.unwrap();

    assert_eq!(radio.connected(), None);
    assert_eq!(radio.disconnects(), 1);
    assert_eq!(session.facade.status().await, Err(SessionError::SessionClosed));
}

#[tokio::test]
async fn test_dropping_facade_tears_down() {
    let radio = Arc::new(MockRadio::new());
    let (session, _) = connected(&radio).await;

    let Session { facade, handle, .. } = session;
    drop(facade);
    handle.await.unwrap();

    assert_eq!(radio.connected(), None);
}
