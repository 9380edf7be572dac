use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::future::pending;
use futures::StreamExt;
use tokio::sync::Notify;

use crate::device::adapter::{PermissionGate, RadioAdapter};
use crate::device::constants::{MOTOR_ANGLE_UUID, MOTOR_SERVICE_UUID, MOTOR_WRITE_UUID};
use crate::device::types::{
    AdapterEvent, AdapterEventStream, PeripheralId, PeripheralRef, ServiceInfo, WriteTarget,
};
use crate::error::AdapterError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub peripheral: PeripheralId,
    pub target: WriteTarget,
    pub payload: String,
}

#[derive(Debug, Default)]
struct MockState {
    scanning: bool,
    scan_starts: usize,
    connected: Option<PeripheralId>,
    services: Vec<ServiceInfo>,
    writes: Vec<RecordedWrite>,
    disconnects: usize,
    hold_connect: bool,
    hold_write: bool,
    deny_scan: bool,
    fail_scan: Option<String>,
    fail_connect: Option<String>,
    fail_discovery: Option<String>,
    fail_write: Option<String>,
}

/// In-memory radio adapter for tests and for driving a UI without hardware.
///
/// Events are pushed by the test (`advertise`, `drop_link`, `fail_radio`) and delivered through the
/// stream returned from `events()`. Every write attempt is recorded, including failed ones.
pub struct MockRadio {
    state: Mutex<MockState>,
    events: Mutex<Vec<UnboundedSender<AdapterEvent>>>,
    release_connect: Notify,
}

impl MockRadio {
    pub fn new() -> Self {
        let state = MockState {
            services: vec![ServiceInfo {
                uuid: MOTOR_SERVICE_UUID,
                characteristics: vec![MOTOR_WRITE_UUID, MOTOR_ANGLE_UUID],
            }],
            ..MockState::default()
        };

        MockRadio {
            state: Mutex::new(state),
            events: Mutex::new(Vec::new()),
            release_connect: Notify::new(),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("Failed to lock MockRadio state")
    }

    fn emit(&self, event: AdapterEvent) {
        let mut senders = self.events.lock().expect("Failed to lock MockRadio senders");
        senders.retain(|sender| sender.unbounded_send(event.clone()).is_ok());
    }

    pub fn advertise(&self, peripheral: PeripheralRef) {
        self.emit(AdapterEvent::Advertisement(peripheral));
    }

    pub fn drop_link(&self, peripheral: &PeripheralId) {
        let mut state = self.state();
        if state.connected.as_ref() == Some(peripheral) {
            state.connected = None;
        }
        drop(state);
        self.emit(AdapterEvent::Disconnected(peripheral.clone()));
    }

    pub fn fail_radio(&self, reason: &str) {
        self.state().scanning = false;
        self.emit(AdapterEvent::RadioFailure(reason.to_string()));
    }

    /// Closes every event stream handed out so far.
    pub fn close_events(&self) {
        self.events.lock().expect("Failed to lock MockRadio senders").clear();
    }

    pub fn set_services(&self, services: Vec<ServiceInfo>) {
        self.state().services = services;
    }

    pub fn deny_scan(&self) {
        self.state().deny_scan = true;
    }

    pub fn fail_scan(&self, reason: &str) {
        self.state().fail_scan = Some(reason.to_string());
    }

    pub fn fail_connect(&self, reason: &str) {
        self.state().fail_connect = Some(reason.to_string());
    }

    pub fn fail_discovery(&self, reason: &str) {
        self.state().fail_discovery = Some(reason.to_string());
    }

    pub fn fail_write(&self, reason: Option<&str>) {
        self.state().fail_write = reason.map(str::to_string);
    }

    /// Makes `connect` wait until [`MockRadio::release_connect`] is called.
    pub fn hold_connect(&self) {
        self.state().hold_connect = true;
    }

    /// Makes every following write hang without an acknowledgement.
    pub fn hold_write(&self) {
        self.state().hold_write = true;
    }

    pub fn release_connect(&self) {
        self.state().hold_connect = false;
        self.release_connect.notify_one();
    }

    pub fn is_scanning(&self) -> bool {
        self.state().scanning
    }

    pub fn scan_starts(&self) -> usize {
        self.state().scan_starts
    }

    pub fn connected(&self) -> Option<PeripheralId> {
        self.state().connected.clone()
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.state().writes.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.state().disconnects
    }
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RadioAdapter for MockRadio {
    async fn events(&self) -> Result<AdapterEventStream, AdapterError> {
        let (sender, receiver) = unbounded();
        self.events.lock().expect("Failed to lock MockRadio senders").push(sender);
        Ok(receiver.boxed())
    }

    async fn start_scan(&self) -> Result<(), AdapterError> {
        let mut state = self.state();
        if state.deny_scan {
            return Err(AdapterError::PermissionDenied);
        }
        if let Some(reason) = &state.fail_scan {
            return Err(AdapterError::Other(reason.clone()));
        }
        state.scanning = true;
        state.scan_starts += 1;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        self.state().scanning = false;
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralId) -> Result<(), AdapterError> {
        let hold = self.state().hold_connect;
        if hold {
            self.release_connect.notified().await;
        }

        let mut state = self.state();
        if let Some(reason) = &state.fail_connect {
            return Err(AdapterError::Other(reason.clone()));
        }
        state.connected = Some(peripheral.clone());
        Ok(())
    }

    async fn discover_services(&self, peripheral: &PeripheralId) -> Result<Vec<ServiceInfo>, AdapterError> {
        let state = self.state();
        if let Some(reason) = &state.fail_discovery {
            return Err(AdapterError::Other(reason.clone()));
        }
        if state.connected.as_ref() != Some(peripheral) {
            return Err(AdapterError::UnknownPeripheral(peripheral.to_string()));
        }
        Ok(state.services.clone())
    }

    async fn write_with_response(
        &self,
        peripheral: &PeripheralId,
        target: &WriteTarget,
        payload: &str,
    ) -> Result<(), AdapterError> {
        let hold = {
            let mut state = self.state();
            state.writes.push(RecordedWrite {
                peripheral: peripheral.clone(),
                target: *target,
                payload: payload.to_string(),
            });

            if let Some(reason) = &state.fail_write {
                return Err(AdapterError::Other(reason.clone()));
            }
            if state.connected.as_ref() != Some(peripheral) {
                return Err(AdapterError::UnknownPeripheral(peripheral.to_string()));
            }
            state.hold_write
        };

        if hold {
            pending::<()>().await;
        }
        Ok(())
    }

    async fn disconnect(&self, _peripheral: &PeripheralId) -> Result<(), AdapterError> {
        let mut state = self.state();
        state.connected = None;
        state.disconnects += 1;
        Ok(())
    }
}

/// Permission gate with a fixed answer that counts how often it was asked.
pub struct MockPermission {
    granted: bool,
    requests: AtomicUsize,
}

impl MockPermission {
    pub fn granted() -> Self {
        MockPermission { granted: true, requests: AtomicUsize::new(0) }
    }

    pub fn denied() -> Self {
        MockPermission { granted: false, requests: AtomicUsize::new(0) }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionGate for MockPermission {
    async fn check_and_request(&self) -> bool {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.granted
    }
}
