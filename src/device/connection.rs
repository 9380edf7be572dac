use std::sync::Arc;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{info, warn};
use tokio::time::{sleep, Duration};

use crate::device::adapter::RadioAdapter;
use crate::device::codec::{encode, frame_for_transport, Command};
use crate::device::types::{ConnectionState, PeripheralId, PeripheralRef, ServiceInfo, WriteTarget};
use crate::error::{AdapterError, SessionError};

pub type LinkStep = BoxFuture<'static, Result<(), AdapterError>>;
pub type DiscoveryStep = BoxFuture<'static, Result<Vec<ServiceInfo>, AdapterError>>;
pub type WriteStep = BoxFuture<'static, Result<(), AdapterError>>;

/// The single connection to a peripheral.
///
/// Adapter calls that take a while (link, discovery, write) are handed out as futures so that the
/// owner can run them off its event loop; their results are fed back through the `on_*` methods,
/// which perform the state transitions.
pub struct ConnectionSession<A: RadioAdapter> {
    adapter: Arc<A>,
    target: WriteTarget,
    write_deadline: Duration,
    disconnect_deadline: Duration,
    state: ConnectionState,
    peripheral: Option<PeripheralRef>,
}

impl<A: RadioAdapter> ConnectionSession<A> {
    pub fn new(adapter: Arc<A>, target: WriteTarget, write_deadline: Duration, disconnect_deadline: Duration) -> Self {
        ConnectionSession {
            adapter,
            target,
            write_deadline,
            disconnect_deadline,
            state: ConnectionState::Disconnected,
            peripheral: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn peripheral(&self) -> Option<&PeripheralRef> {
        self.peripheral.as_ref()
    }

    /// True if `id` is the peripheral this session is (becoming) connected to.
    pub fn is_linked_to(&self, id: &PeripheralId) -> bool {
        self.state != ConnectionState::Disconnected
            && self.peripheral.as_ref().map(|p| &p.id) == Some(id)
    }

    pub fn begin_connect(&mut self, peripheral: PeripheralRef) -> Result<LinkStep, SessionError> {
        if self.state != ConnectionState::Disconnected {
            return Err(SessionError::InvalidState);
        }

        info!("Connecting to peripheral {} ({})...", peripheral.name, peripheral.id);
        let adapter = self.adapter.clone();
        let id = peripheral.id.clone();
        self.state = ConnectionState::Connecting;
        self.peripheral = Some(peripheral);

        Ok(async move { adapter.connect(&id).await }.boxed())
    }

    pub fn on_link_result(&mut self, result: Result<(), AdapterError>) -> Result<DiscoveryStep, SessionError> {
        if self.state != ConnectionState::Connecting {
            return Err(SessionError::InvalidState);
        }
        if let Err(err) = result {
            return Err(self.fail_connect(err));
        }

        let adapter = self.adapter.clone();
        let id = self.peripheral_id()?;
        info!("Connected; Discovering services...");
        self.state = ConnectionState::Discovering;

        Ok(async move { adapter.discover_services(&id).await }.boxed())
    }

    pub fn on_discovery_result(&mut self, result: Result<Vec<ServiceInfo>, AdapterError>) -> Result<PeripheralRef, SessionError> {
        if self.state != ConnectionState::Discovering {
            return Err(SessionError::InvalidState);
        }

        let services = match result {
            Ok(services) => services,
            Err(err) => {
                self.release_link();
                return Err(self.fail_connect(err));
            },
        };

        if !self.target.is_offered_by(&services) {
            self.release_link();
            return Err(self.fail_connect(AdapterError::MissingCharacteristic));
        }

        let peripheral = self.peripheral.clone().ok_or(SessionError::InvalidState)?;
        info!(
            "Peripheral ready, writing to characteristic {:?} {:?}",
            self.target.service,
            self.target.characteristic
        );
        self.state = ConnectionState::Ready;
        Ok(peripheral)
    }

    pub fn begin_send(&self, command: &Command) -> Result<WriteStep, SessionError> {
        if self.state != ConnectionState::Ready {
            return Err(SessionError::NotConnected);
        }

        let payload = frame_for_transport(encode(command)?);
        let adapter = self.adapter.clone();
        let id = self.peripheral_id()?;
        let target = self.target;
        let deadline = self.write_deadline;

        Ok(async move {
            tokio::select! {
                _ = sleep(deadline) => Err(AdapterError::TimedOut),
                result = adapter.write_with_response(&id, &target, &payload) => result,
            }
        }.boxed())
    }

    pub fn on_write_result(&self, result: Result<(), AdapterError>) -> Result<(), SessionError> {
        result.map_err(|err| {
            warn!("Failed to send to write characteristic: {:?}", err);
            SessionError::WriteFailed(err.to_string())
        })
    }

    /// Moves to `Disconnecting` and returns the peripheral to release, or None if already
    /// disconnected.
    pub fn begin_disconnect(&mut self) -> Option<PeripheralId> {
        match self.state {
            ConnectionState::Disconnected => None,
            ConnectionState::Disconnecting => self.peripheral.as_ref().map(|p| p.id.clone()),
            _ => {
                self.state = ConnectionState::Disconnecting;
                self.peripheral.as_ref().map(|p| p.id.clone())
            },
        }
    }

    /// Best effort: the session ends up disconnected whatever the adapter reports.
    pub async fn finish_disconnect(&mut self, id: &PeripheralId) {
        tokio::select! {
            _ = sleep(self.disconnect_deadline) => {
                warn!("Disconnecting from peripheral took too long");
            }
            result = self.adapter.disconnect(id) => {
                if let Err(err) = result {
                    warn!("Failed to disconnect from peripheral: {:?}", err);
                }
            }
        }

        info!("Disconnected from peripheral {}", id);
        self.reset();
    }

    pub async fn disconnect(&mut self) {
        if let Some(id) = self.begin_disconnect() {
            self.finish_disconnect(&id).await;
        }
    }

    /// The peripheral went away without being asked to.
    pub fn on_link_lost(&mut self) -> SessionError {
        warn!("Connection lost");
        self.reset();
        SessionError::ConnectionFailed("link lost".to_string())
    }

    fn fail_connect(&mut self, err: AdapterError) -> SessionError {
        warn!("Connecting to peripheral failed: {:?}", err);
        self.reset();
        SessionError::ConnectionFailed(err.to_string())
    }

    // the link is up at the adapter level, so it has to be torn down even though the session
    // never became ready
    fn release_link(&self) {
        if let Some(peripheral) = &self.peripheral {
            let adapter = self.adapter.clone();
            let id = peripheral.id.clone();
            tokio::spawn(async move {
                if let Err(err) = adapter.disconnect(&id).await {
                    warn!("Failed to release link to {}: {:?}", id, err);
                }
            });
        }
    }

    fn peripheral_id(&self) -> Result<PeripheralId, SessionError> {
        self.peripheral.as_ref().map(|p| p.id.clone()).ok_or(SessionError::InvalidState)
    }

    fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.peripheral = None;
    }
}
