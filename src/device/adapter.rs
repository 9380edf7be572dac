use async_trait::async_trait;

use crate::device::types::{AdapterEventStream, PeripheralId, ServiceInfo, WriteTarget};
use crate::error::AdapterError;

/// The narrow set of radio capabilities the session core needs.
///
/// There is exactly one adapter instance per process. It is shared by the scan controller and the
/// connection session as an `Arc`.
#[async_trait]
pub trait RadioAdapter: Send + Sync + 'static {
    /// Advertisement, disconnect and failure notifications for the lifetime of the adapter.
    async fn events(&self) -> Result<AdapterEventStream, AdapterError>;

    async fn start_scan(&self) -> Result<(), AdapterError>;

    async fn stop_scan(&self) -> Result<(), AdapterError>;

    async fn connect(&self, peripheral: &PeripheralId) -> Result<(), AdapterError>;

    async fn discover_services(&self, peripheral: &PeripheralId) -> Result<Vec<ServiceInfo>, AdapterError>;

    /// Writes a base64 framed value and resolves once the peripheral acknowledged it.
    async fn write_with_response(
        &self,
        peripheral: &PeripheralId,
        target: &WriteTarget,
        payload: &str,
    ) -> Result<(), AdapterError>;

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<(), AdapterError>;
}

#[async_trait]
pub trait PermissionGate: Send + Sync + 'static {
    async fn check_and_request(&self) -> bool;
}

/// Desktop platforms enforce the Bluetooth grant when a scan starts; a refusal surfaces as
/// `btleplug::Error::PermissionDenied` from the adapter.
pub struct PlatformPermission;

#[async_trait]
impl PermissionGate for PlatformPermission {
    async fn check_and_request(&self) -> bool {
        true
    }
}
