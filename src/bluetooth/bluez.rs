// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! BlueZ GATT client backend.

use async_trait::async_trait;
use bluer::gatt::remote::Characteristic;
use bluer::{
    Adapter, AdapterEvent as BluezEvent, AdapterProperty, Address, DeviceEvent, DeviceProperty,
    DiscoveryFilter, DiscoveryTransport, Session,
};
use futures::{pin_mut, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::adapter::{
    AdapterEvent, AdapterState, BleAdapter, BleError, CharacteristicHandle, Peripheral,
    PeripheralId,
};
use super::ble_constants::config::ADAPTER_EVENT_BUFFER;

const SERVICES_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct Tasks {
    scan: Option<JoinHandle<()>>,
    links: HashMap<PeripheralId, Vec<JoinHandle<()>>>,
    characteristics: HashMap<CharacteristicHandle, Characteristic>,
}

impl Tasks {
    /// Forget everything held for `peripheral` and hand back its tasks.
    fn take_link(&mut self, peripheral: &PeripheralId) -> Vec<JoinHandle<()>> {
        self.characteristics
            .retain(|handle, _| &handle.peripheral != peripheral);
        self.links.remove(peripheral).unwrap_or_default()
    }
}

/// BLE central backed by the default BlueZ adapter.
pub struct BluezAdapter {
    _session: Session,
    adapter: Adapter,
    events: mpsc::Sender<AdapterEvent>,
    tasks: Arc<Mutex<Tasks>>,
    power_task: JoinHandle<()>,
}

impl BluezAdapter {
    /// Open a BlueZ session on the default adapter.
    pub async fn new() -> Result<(Self, mpsc::Receiver<AdapterEvent>), BleError> {
        info!("Initializing BlueZ central...");
        let session = Session::new().await.map_err(gatt_err)?;
        let adapter = session.default_adapter().await.map_err(gatt_err)?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        let (events, rx) = mpsc::channel(ADAPTER_EVENT_BUFFER);

        let powered = adapter.is_powered().await.map_err(gatt_err)?;
        let _ = events.try_send(AdapterEvent::StateChanged(power_state(powered)));

        let power_task = tokio::spawn(watch_power(adapter.clone(), events.clone()));

        Ok((
            Self {
                _session: session,
                adapter,
                events,
                tasks: Arc::new(Mutex::new(Tasks::default())),
                power_task,
            },
            rx,
        ))
    }

    fn device(&self, peripheral: &PeripheralId) -> Result<bluer::Device, BleError> {
        let address: Address = peripheral
            .as_str()
            .parse()
            .map_err(|_| BleError::UnknownPeripheral(peripheral.clone()))?;
        self.adapter.device(address).map_err(gatt_err)
    }

    fn track(&self, peripheral: &PeripheralId, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .links
            .entry(peripheral.clone())
            .or_default()
            .push(task);
    }

    fn release(&self, peripheral: &PeripheralId) {
        let stale = self.tasks.lock().take_link(peripheral);
        for task in stale {
            task.abort();
        }
    }
}

impl Drop for BluezAdapter {
    fn drop(&mut self) {
        self.power_task.abort();
        let mut tasks = self.tasks.lock();
        if let Some(scan) = tasks.scan.take() {
            scan.abort();
        }
        for (_, handles) in tasks.links.drain() {
            handles.into_iter().for_each(|t| t.abort());
        }
    }
}

fn gatt_err(e: bluer::Error) -> BleError {
    BleError::Gatt(e.to_string())
}

fn power_state(powered: bool) -> AdapterState {
    if powered {
        AdapterState::PoweredOn
    } else {
        AdapterState::PoweredOff
    }
}

async fn watch_power(adapter: Adapter, events: mpsc::Sender<AdapterEvent>) {
    let stream = match adapter.events().await {
        Ok(stream) => stream,
        Err(e) => {
            error!("Cannot watch adapter power: {}", e);
            return;
        }
    };
    pin_mut!(stream);

    while let Some(event) = stream.next().await {
        if let BluezEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
            if events
                .send(AdapterEvent::StateChanged(power_state(powered)))
                .await
                .is_err()
            {
                break;
            }
        }
    }
}

async fn advertised(adapter: &Adapter, address: Address, service: Uuid) -> Option<Peripheral> {
    let device = adapter.device(address).ok()?;
    let uuids: HashSet<Uuid> = device.uuids().await.ok().flatten().unwrap_or_default();
    if !uuids.contains(&service) {
        return None;
    }

    Some(Peripheral {
        id: PeripheralId::new(address.to_string()),
        local_name: device.name().await.ok().flatten(),
        rssi: device.rssi().await.ok().flatten(),
    })
}

#[async_trait]
impl BleAdapter for BluezAdapter {
    async fn start_scanning(&self, service: Uuid) -> Result<(), BleError> {
        if !self.adapter.is_powered().await.map_err(gatt_err)? {
            return Err(BleError::NotPowered);
        }

        let filter = DiscoveryFilter {
            uuids: HashSet::from([service]),
            transport: DiscoveryTransport::Le,
            ..Default::default()
        };
        self.adapter
            .set_discovery_filter(filter)
            .await
            .map_err(|e| BleError::Scan(e.to_string()))?;
        let stream = self
            .adapter
            .discover_devices()
            .await
            .map_err(|e| BleError::Scan(e.to_string()))?;

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            pin_mut!(stream);
            while let Some(event) = stream.next().await {
                let BluezEvent::DeviceAdded(address) = event else {
                    continue;
                };
                if let Some(peripheral) = advertised(&adapter, address, service).await {
                    debug!("Discovered {}", peripheral.id);
                    if events.send(AdapterEvent::Discovered(peripheral)).await.is_err() {
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.tasks.lock().scan.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn stop_scanning(&self) -> Result<(), BleError> {
        // Dropping the discovery stream ends the BlueZ discovery session.
        if let Some(scan) = self.tasks.lock().scan.take() {
            scan.abort();
        }
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralId) -> Result<(), BleError> {
        let device = self.device(peripheral)?;
        device
            .connect()
            .await
            .map_err(|e| BleError::Connection(e.to_string()))?;

        let stream = device.events().await.map_err(gatt_err)?;
        let events = self.events.clone();
        let tasks = self.tasks.clone();
        let id = peripheral.clone();
        self.track(
            peripheral,
            tokio::spawn(async move {
                pin_mut!(stream);
                while let Some(event) = stream.next().await {
                    if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
                        info!("{} disconnected", id);
                        // Drop the link's handles before anyone can write through them.
                        let stale = tasks.lock().take_link(&id);
                        let _ = events.send(AdapterEvent::Disconnected(id)).await;
                        // Includes this task, which has nothing left to await.
                        stale.into_iter().for_each(|t| t.abort());
                        break;
                    }
                }
            }),
        );
        Ok(())
    }

    async fn discover_characteristic(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Option<CharacteristicHandle>, BleError> {
        let device = self.device(peripheral)?;

        let resolved = tokio::time::timeout(SERVICES_RESOLVE_TIMEOUT, async {
            while !device.is_services_resolved().await.map_err(gatt_err)? {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Ok::<_, BleError>(())
        })
        .await;
        match resolved {
            Ok(result) => result?,
            Err(_) => return Err(BleError::Gatt("service resolution timed out".to_string())),
        }

        for remote_service in device.services().await.map_err(gatt_err)? {
            if remote_service.uuid().await.map_err(gatt_err)? != service {
                continue;
            }
            for remote_char in remote_service.characteristics().await.map_err(gatt_err)? {
                if remote_char.uuid().await.map_err(gatt_err)? == characteristic {
                    let handle = CharacteristicHandle {
                        peripheral: peripheral.clone(),
                        service,
                        uuid: characteristic,
                    };
                    self.tasks
                        .lock()
                        .characteristics
                        .insert(handle.clone(), remote_char);
                    return Ok(Some(handle));
                }
            }
        }

        warn!("Characteristic {} not found on {}", characteristic, peripheral);
        Ok(None)
    }

    async fn subscribe(&self, characteristic: &CharacteristicHandle) -> Result<(), BleError> {
        let remote = self
            .tasks
            .lock()
            .characteristics
            .get(characteristic)
            .cloned()
            .ok_or(BleError::Disconnected)?;

        let stream = remote.notify().await.map_err(gatt_err)?;
        let events = self.events.clone();
        let handle = characteristic.clone();
        self.track(
            &characteristic.peripheral,
            tokio::spawn(async move {
                pin_mut!(stream);
                while let Some(data) = stream.next().await {
                    let event = AdapterEvent::Notification {
                        characteristic: handle.clone(),
                        data,
                    };
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
                debug!("Notification stream for {} ended", handle.uuid);
            }),
        );
        Ok(())
    }

    async fn write(&self, characteristic: &CharacteristicHandle, data: &[u8]) -> Result<(), BleError> {
        let remote = self
            .tasks
            .lock()
            .characteristics
            .get(characteristic)
            .cloned()
            .ok_or(BleError::Disconnected)?;
        remote.write(data).await.map_err(gatt_err)
    }

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<(), BleError> {
        self.release(peripheral);
        let device = self.device(peripheral)?;
        device
            .disconnect()
            .await
            .map_err(|e| BleError::Connection(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_take_link_only_touches_that_peripheral() {
        let mut tasks = Tasks::default();
        let first = PeripheralId::new("AA:BB:CC:DD:EE:01");
        let second = PeripheralId::new("AA:BB:CC:DD:EE:02");
        for id in [&first, &first, &second] {
            tasks
                .links
                .entry(id.clone())
                .or_default()
                .push(tokio::spawn(std::future::pending::<()>()));
        }

        let taken = tasks.take_link(&first);
        assert_eq!(taken.len(), 2);
        assert!(!tasks.links.contains_key(&first));
        assert_eq!(tasks.links[&second].len(), 1);
        assert!(tasks.take_link(&first).is_empty());

        taken.into_iter().for_each(|t| t.abort());
        tasks.take_link(&second).into_iter().for_each(|t| t.abort());
    }
}
