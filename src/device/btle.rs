use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use btleplug::api::{Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::future::ready;
use futures::{stream, StreamExt};
use log::{debug, info, warn};

use crate::device::adapter::RadioAdapter;
use crate::device::types::{
    AdapterEvent, AdapterEventStream, PeripheralId, PeripheralRef, ServiceInfo, WriteTarget,
};
use crate::error::AdapterError;

type PeripheralTable = Arc<Mutex<HashMap<PeripheralId, Peripheral>>>;

/// Radio adapter backed by btleplug, using every bluetooth adapter the platform reports.
pub struct BtleAdapter {
    adapters: Vec<Adapter>,
    peripherals: PeripheralTable,
}

impl BtleAdapter {
    pub async fn new() -> Result<Self, AdapterError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;

        if adapters.is_empty() {
            return Err(AdapterError::NoAdapter);
        }
        for adapter in &adapters {
            info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        }

        Ok(BtleAdapter {
            adapters,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn peripheral(&self, id: &PeripheralId) -> Result<Peripheral, AdapterError> {
        let peripherals = self.peripherals.lock().expect("Failed to lock peripheral table");
        peripherals.get(id).cloned().ok_or_else(|| AdapterError::UnknownPeripheral(id.to_string()))
    }
}

/// Anything but powered on means the radio can no longer scan or hold a link.
fn radio_failure_for(state: CentralState) -> Option<String> {
    match state {
        CentralState::PoweredOn => None,
        CentralState::PoweredOff => Some("adapter powered off".to_string()),
        other => Some(format!("adapter state {:?}", other)),
    }
}

async fn resolve_event(adapter: Adapter, peripherals: PeripheralTable, event: CentralEvent) -> Option<AdapterEvent> {
    match event {
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
            let peripheral = match adapter.peripheral(&id).await {
                Ok(peripheral) => peripheral,
                Err(err) => {
                    warn!("Failed to query BLE adapter for peripheral: {}", err);
                    return None;
                },
            };

            let properties = match peripheral.properties().await {
                Ok(Some(properties)) => properties,
                Ok(None) => {
                    debug!("Peripheral has no properties");
                    return None;
                },
                Err(err) => {
                    warn!("Could not query peripheral for properties: {:?}", err);
                    return None;
                },
            };

            // nameless advertisements can never match the name filter
            let name = properties.local_name?;
            let id = PeripheralId::new(id.to_string());
            peripherals
                .lock()
                .expect("Failed to lock peripheral table")
                .insert(id.clone(), peripheral);

            Some(AdapterEvent::Advertisement(PeripheralRef { id, name }))
        },
        CentralEvent::DeviceDisconnected(id) => {
            Some(AdapterEvent::Disconnected(PeripheralId::new(id.to_string())))
        },
        CentralEvent::StateUpdate(state) => {
            info!("Adapter state changed to {:?}", state);
            radio_failure_for(state).map(AdapterEvent::RadioFailure)
        },
        _ => None,
    }
}

#[async_trait]
impl RadioAdapter for BtleAdapter {
    async fn events(&self) -> Result<AdapterEventStream, AdapterError> {
        let mut streams = Vec::with_capacity(self.adapters.len());

        for adapter in &self.adapters {
            let events = adapter.events().await?;
            let adapter = adapter.clone();
            let peripherals = self.peripherals.clone();

            streams.push(
                events
                    .then(move |event| resolve_event(adapter.clone(), peripherals.clone(), event))
                    .filter_map(ready)
                    .boxed(),
            );
        }

        Ok(stream::select_all(streams).boxed())
    }

    async fn start_scan(&self) -> Result<(), AdapterError> {
        // names are matched by the registry, some peripherals do not advertise their services
        for adapter in &self.adapters {
            adapter.start_scan(ScanFilter::default()).await?;
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        for adapter in &self.adapters {
            adapter.stop_scan().await?;
        }
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralId) -> Result<(), AdapterError> {
        self.peripheral(peripheral)?.connect().await?;
        Ok(())
    }

    async fn discover_services(&self, peripheral: &PeripheralId) -> Result<Vec<ServiceInfo>, AdapterError> {
        let peripheral = self.peripheral(peripheral)?;
        peripheral.discover_services().await?;

        Ok(peripheral
            .services()
            .into_iter()
            .map(|service| ServiceInfo {
                uuid: service.uuid,
                characteristics: service.characteristics.iter().map(|c| c.uuid).collect(),
            })
            .collect())
    }

    async fn write_with_response(
        &self,
        peripheral: &PeripheralId,
        target: &WriteTarget,
        payload: &str,
    ) -> Result<(), AdapterError> {
        let peripheral = self.peripheral(peripheral)?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == target.service && c.uuid == target.characteristic)
            .ok_or(AdapterError::MissingCharacteristic)?;

        // btleplug takes raw bytes, the framing only exists for the session's transport contract
        let value = BASE64_STANDARD.decode(payload)?;
        peripheral.write(&characteristic, &value, WriteType::WithResponse).await?;
        Ok(())
    }

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<(), AdapterError> {
        self.peripheral(peripheral)?.disconnect().await?;
        Ok(())
    }
}
