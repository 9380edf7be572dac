use std::fmt;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::SessionError;

/// Opaque, stable identifier of a peripheral as reported by the radio adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        PeripheralId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A discovered peripheral. Identity is the id; the name is what it advertised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralRef {
    pub id: PeripheralId,
    pub name: String,
}

impl PeripheralRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        PeripheralRef { id: PeripheralId::new(id), name: name.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Discovering,
    Ready,
    Disconnecting,
}

/// A GATT service and the uuids of its characteristics, as enumerated after connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

/// The characteristic that motor commands are written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteTarget {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl WriteTarget {
    pub fn is_offered_by(&self, services: &[ServiceInfo]) -> bool {
        services.iter().any(|service| {
            service.uuid == self.service && service.characteristics.contains(&self.characteristic)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    Advertisement(PeripheralRef),
    Disconnected(PeripheralId),
    RadioFailure(String),
}

pub type AdapterEventStream = BoxStream<'static, AdapterEvent>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ScanStateChange(ScanState),
    Discovered(PeripheralRef),
    ConnectionStateChange(ConnectionState),
    BreathingChange(bool),
    Failure(SessionError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub scan: ScanState,
    pub connection: ConnectionState,
    pub peripheral: Option<PeripheralRef>,
    pub breathing: bool,
    // an adapter operation (connect or write) is in flight
    pub busy: bool,
}
