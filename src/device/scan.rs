use std::sync::Arc;
use futures::future::pending;
use log::{debug, info, warn};
use tokio::time::{sleep_until, Duration, Instant};

use crate::device::adapter::{PermissionGate, RadioAdapter};
use crate::device::registry::DeviceRegistry;
use crate::device::types::{PeripheralId, PeripheralRef, ScanState};
use crate::error::SessionError;

/// Owns the single scan session: permission gate, time box, and the registry it fills.
pub struct ScanController<A: RadioAdapter, P: PermissionGate> {
    adapter: Arc<A>,
    permission: Arc<P>,
    name_filter: String,
    timeout: Duration,
    state: ScanState,
    started_at: Option<Instant>,
    deadline: Option<Instant>,
    registry: DeviceRegistry,
}

impl<A: RadioAdapter, P: PermissionGate> ScanController<A, P> {
    pub fn new(adapter: Arc<A>, permission: Arc<P>, name_filter: &str, timeout: Duration) -> Self {
        ScanController {
            adapter,
            permission,
            name_filter: name_filter.to_string(),
            timeout,
            state: ScanState::Idle,
            started_at: None,
            deadline: None,
            registry: DeviceRegistry::new(),
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn devices(&self) -> Vec<PeripheralRef> {
        self.registry.list()
    }

    pub fn device(&self, id: &PeripheralId) -> Option<&PeripheralRef> {
        self.registry.get(id)
    }

    pub async fn start(&mut self) -> Result<ScanState, SessionError> {
        if self.state == ScanState::Scanning {
            return Ok(self.state);
        }

        if !self.permission.check_and_request().await {
            warn!("Bluetooth permission has not been granted");
            return Err(SessionError::PermissionDenied);
        }

        if let Err(err) = self.adapter.start_scan().await {
            warn!("Scanning failed {:?}", err);
            if err.is_permission_denied() {
                return Err(SessionError::PermissionDenied);
            }
            return Err(SessionError::RadioError(err.to_string()));
        }

        info!("Scanning for {:?} for {:?}...", self.name_filter, self.timeout);
        let now = Instant::now();
        self.registry.reset();
        self.state = ScanState::Scanning;
        self.started_at = Some(now);
        self.deadline = Some(now + self.timeout);
        Ok(self.state)
    }

    /// Returns true if the advertisement added a new peripheral to the registry.
    pub fn on_advertisement(&mut self, peripheral: PeripheralRef) -> bool {
        if self.state != ScanState::Scanning {
            return false;
        }

        let added = self.registry.on_advertisement(peripheral.clone(), &self.name_filter);
        if added {
            info!("Discovered {} ({})", peripheral.name, peripheral.id);
        } else {
            debug!("Ignoring advertisement from {} ({})", peripheral.name, peripheral.id);
        }
        added
    }

    pub async fn stop(&mut self) -> ScanState {
        if self.state == ScanState::Idle {
            return self.state;
        }

        if let Err(err) = self.adapter.stop_scan().await {
            warn!("Failed to stop scanning: {:?}", err);
        }

        info!("Scan stopped, {} device(s) found", self.registry.list().len());
        self.enter_idle();
        self.state
    }

    /// A radio failure ends the scan. The error is returned if a scan was running.
    pub fn on_radio_failure(&mut self, reason: &str) -> Option<SessionError> {
        if self.state != ScanState::Scanning {
            return None;
        }

        warn!("Radio failure while scanning: {}", reason);
        self.enter_idle();
        Some(SessionError::RadioError(reason.to_string()))
    }

    /// Resolves when the scan window elapses. Never resolves while idle.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => pending::<()>().await,
        }
    }

    fn enter_idle(&mut self) {
        self.state = ScanState::Idle;
        self.started_at = None;
        self.deadline = None;
    }
}
