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

//! In-process BLE adapter simulator.
//!
//! Stands in for a radio in tests: peripherals are registered up front,
//! advertisements and notifications are injected by the test, and every
//! scan, connect and write the transport performs is recorded. Clones share
//! the same simulated adapter, so a test keeps one clone as its controller
//! while the transport owns another.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use super::adapter::{
    AdapterEvent, AdapterState, BleAdapter, BleError, CharacteristicHandle, Peripheral,
    PeripheralId,
};
use super::ble_constants::config::ADAPTER_EVENT_BUFFER;
use super::frame::chunk_message;
use crate::error::TransportError;

#[derive(Debug)]
struct SimPeripheral {
    local_name: Option<String>,
    service: Uuid,
    characteristic: Uuid,
    connected: bool,
    subscribed: bool,
}

#[derive(Debug)]
struct SimState {
    powered: bool,
    scanning: bool,
    scan_starts: usize,
    scan_filter: Option<Uuid>,
    peripherals: HashMap<PeripheralId, SimPeripheral>,
    connects: Vec<PeripheralId>,
    writes: Vec<Vec<u8>>,
    fail_connect: bool,
    fail_subscribe: bool,
    hold_subscribe: Option<Arc<Notify>>,
    mtu: Option<usize>,
}

/// A simulated BLE adapter.
#[derive(Clone)]
pub struct SimAdapter {
    state: Arc<Mutex<SimState>>,
    events: mpsc::Sender<AdapterEvent>,
    written: Arc<Notify>,
}

impl SimAdapter {
    /// Create a powered simulated adapter and its event stream.
    pub fn new() -> (Self, mpsc::Receiver<AdapterEvent>) {
        let (events, rx) = mpsc::channel(ADAPTER_EVENT_BUFFER);
        let state = SimState {
            powered: true,
            scanning: false,
            scan_starts: 0,
            scan_filter: None,
            peripherals: HashMap::new(),
            connects: Vec::new(),
            writes: Vec::new(),
            fail_connect: false,
            fail_subscribe: false,
            hold_subscribe: None,
            mtu: None,
        };
        let adapter = Self {
            state: Arc::new(Mutex::new(state)),
            events,
            written: Arc::new(Notify::new()),
        };
        (adapter, rx)
    }

    /// Register a peripheral exposing one characteristic inside one service.
    pub fn add_peripheral(&self, id: &str, local_name: Option<&str>, service: Uuid, characteristic: Uuid) {
        self.state.lock().peripherals.insert(
            PeripheralId::new(id),
            SimPeripheral {
                local_name: local_name.map(str::to_string),
                service,
                characteristic,
                connected: false,
                subscribed: false,
            },
        );
    }

    /// Reject writes larger than `mtu` bytes.
    pub fn set_mtu(&self, mtu: usize) {
        self.state.lock().mtu = Some(mtu);
    }

    pub fn fail_next_connect(&self) {
        self.state.lock().fail_connect = true;
    }

    pub fn fail_next_subscribe(&self) {
        self.state.lock().fail_subscribe = true;
    }

    /// Make subscriptions wait until [`SimAdapter::release_subscribe`].
    pub fn hold_subscribe(&self) {
        self.state.lock().hold_subscribe = Some(Arc::new(Notify::new()));
    }

    pub fn release_subscribe(&self) {
        if let Some(hold) = self.state.lock().hold_subscribe.take() {
            hold.notify_one();
        }
    }

    pub async fn power_on(&self) {
        self.state.lock().powered = true;
        self.emit(AdapterEvent::StateChanged(AdapterState::PoweredOn)).await;
    }

    pub async fn power_off(&self) {
        {
            let mut state = self.state.lock();
            state.powered = false;
            state.scanning = false;
        }
        self.emit(AdapterEvent::StateChanged(AdapterState::PoweredOff)).await;
    }

    /// Advertise a registered peripheral. Only seen while a matching scan runs.
    pub async fn advertise(&self, id: &str) -> bool {
        let peripheral = {
            let state = self.state.lock();
            let id = PeripheralId::new(id);
            match state.peripherals.get(&id) {
                Some(p) if state.scanning && state.scan_filter == Some(p.service) => Peripheral {
                    id,
                    local_name: p.local_name.clone(),
                    rssi: Some(-50),
                },
                _ => return false,
            }
        };
        self.emit(AdapterEvent::Discovered(peripheral)).await;
        true
    }

    /// Send one raw notification from a subscribed peripheral.
    pub async fn notify(&self, id: &str, data: Vec<u8>) -> bool {
        let characteristic = {
            let state = self.state.lock();
            let id = PeripheralId::new(id);
            match state.peripherals.get(&id) {
                Some(p) if p.connected && p.subscribed => CharacteristicHandle {
                    peripheral: id,
                    service: p.service,
                    uuid: p.characteristic,
                },
                _ => return false,
            }
        };
        self.emit(AdapterEvent::Notification {
            characteristic,
            data,
        })
        .await;
        true
    }

    /// Fragment `message` and send it as notifications.
    pub async fn notify_message(&self, id: &str, message: &[u8], fragment_size: usize) -> Result<(), TransportError> {
        for fragment in chunk_message(message, fragment_size)? {
            if !self.notify(id, fragment).await {
                return Err(TransportError::Adapter(BleError::Disconnected));
            }
        }
        Ok(())
    }

    /// Drop the link from the peripheral side.
    pub async fn drop_link(&self, id: &str) {
        let id = PeripheralId::new(id);
        if let Some(p) = self.state.lock().peripherals.get_mut(&id) {
            p.connected = false;
            p.subscribed = false;
        }
        self.emit(AdapterEvent::Disconnected(id)).await;
    }

    pub fn is_scanning(&self) -> bool {
        self.state.lock().scanning
    }

    pub fn scan_starts(&self) -> usize {
        self.state.lock().scan_starts
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.state
            .lock()
            .peripherals
            .get(&PeripheralId::new(id))
            .is_some_and(|p| p.connected)
    }

    /// Every connect attempt, in order.
    pub fn connects(&self) -> Vec<PeripheralId> {
        self.state.lock().connects.clone()
    }

    /// Every successful write, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    /// Wait until at least `count` writes have been recorded.
    pub async fn wait_for_writes(&self, count: usize) -> Vec<Vec<u8>> {
        loop {
            let notified = self.written.notified();
            let writes = self.writes();
            if writes.len() >= count {
                return writes;
            }
            notified.await;
        }
    }

    async fn emit(&self, event: AdapterEvent) {
        let _ = self.events.send(event).await;
    }

    /// For events raised from inside adapter calls, which run on the state
    /// machine task that drains the channel.
    fn emit_now(&self, event: AdapterEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!("Simulated event dropped: {}", e);
        }
    }
}

#[async_trait]
impl BleAdapter for SimAdapter {
    async fn start_scanning(&self, service: Uuid) -> Result<(), BleError> {
        let mut state = self.state.lock();
        if !state.powered {
            return Err(BleError::NotPowered);
        }
        state.scanning = true;
        state.scan_starts += 1;
        state.scan_filter = Some(service);
        Ok(())
    }

    async fn stop_scanning(&self) -> Result<(), BleError> {
        self.state.lock().scanning = false;
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralId) -> Result<(), BleError> {
        let mut state = self.state.lock();
        state.connects.push(peripheral.clone());
        if std::mem::take(&mut state.fail_connect) {
            return Err(BleError::Connection("simulated connect failure".to_string()));
        }
        let p = state
            .peripherals
            .get_mut(peripheral)
            .ok_or_else(|| BleError::UnknownPeripheral(peripheral.clone()))?;
        p.connected = true;
        Ok(())
    }

    async fn discover_characteristic(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Option<CharacteristicHandle>, BleError> {
        let state = self.state.lock();
        let p = state
            .peripherals
            .get(peripheral)
            .ok_or_else(|| BleError::UnknownPeripheral(peripheral.clone()))?;
        if !p.connected {
            return Err(BleError::Disconnected);
        }

        Ok((p.service == service && p.characteristic == characteristic).then(|| {
            CharacteristicHandle {
                peripheral: peripheral.clone(),
                service,
                uuid: characteristic,
            }
        }))
    }

    async fn subscribe(&self, characteristic: &CharacteristicHandle) -> Result<(), BleError> {
        let hold = self.state.lock().hold_subscribe.clone();
        if let Some(hold) = hold {
            debug!("Subscription held");
            hold.notified().await;
        }

        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_subscribe) {
            return Err(BleError::Gatt("simulated subscribe failure".to_string()));
        }
        match state.peripherals.get_mut(&characteristic.peripheral) {
            Some(p) if p.connected => {
                p.subscribed = true;
                Ok(())
            }
            _ => Err(BleError::Disconnected),
        }
    }

    async fn write(&self, characteristic: &CharacteristicHandle, data: &[u8]) -> Result<(), BleError> {
        {
            let mut state = self.state.lock();
            if let Some(mtu) = state.mtu {
                if data.len() > mtu {
                    return Err(BleError::MtuExceeded {
                        size: data.len(),
                        mtu,
                    });
                }
            }
            match state.peripherals.get(&characteristic.peripheral) {
                Some(p) if p.connected => {}
                _ => return Err(BleError::Disconnected),
            }
            state.writes.push(data.to_vec());
        }
        self.written.notify_waiters();
        Ok(())
    }

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<(), BleError> {
        {
            let mut state = self.state.lock();
            let p = state
                .peripherals
                .get_mut(peripheral)
                .ok_or_else(|| BleError::UnknownPeripheral(peripheral.clone()))?;
            p.connected = false;
            p.subscribed = false;
        }
        self.emit_now(AdapterEvent::Disconnected(peripheral.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::ble_constants::parse_uuid;

    fn sim() -> (SimAdapter, mpsc::Receiver<AdapterEvent>, Uuid, Uuid) {
        let (sim, rx) = SimAdapter::new();
        let service = parse_uuid("ec00").unwrap();
        let characteristic = parse_uuid("ec0e").unwrap();
        sim.add_peripheral("p1", Some("echo"), service, characteristic);
        (sim, rx, service, characteristic)
    }

    #[tokio::test]
    async fn test_advertise_requires_matching_scan() {
        let (sim, mut rx, service, _) = sim();
        assert!(!sim.advertise("p1").await);

        sim.start_scanning(parse_uuid("ffff").unwrap()).await.unwrap();
        assert!(!sim.advertise("p1").await);

        sim.start_scanning(service).await.unwrap();
        assert!(sim.advertise("p1").await);
        match rx.recv().await {
            Some(AdapterEvent::Discovered(p)) => {
                assert_eq!(p.id, PeripheralId::new("p1"));
                assert_eq!(p.local_name.as_deref(), Some("echo"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_scan_requires_power() {
        let (sim, _rx, service, _) = sim();
        sim.power_off().await;
        assert_eq!(sim.start_scanning(service).await, Err(BleError::NotPowered));
    }

    #[tokio::test]
    async fn test_write_mtu_enforcement() {
        let (sim, _rx, service, characteristic) = sim();
        let id = PeripheralId::new("p1");
        sim.connect(&id).await.unwrap();
        let handle = sim
            .discover_characteristic(&id, service, characteristic)
            .await
            .unwrap()
            .unwrap();

        sim.set_mtu(10);
        sim.write(&handle, &[0u8; 10]).await.unwrap();
        assert_eq!(
            sim.write(&handle, &[0u8; 11]).await,
            Err(BleError::MtuExceeded { size: 11, mtu: 10 })
        );
        assert_eq!(sim.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_notify_requires_subscription() {
        let (sim, mut rx, service, characteristic) = sim();
        let id = PeripheralId::new("p1");
        sim.connect(&id).await.unwrap();
        assert!(!sim.notify("p1", vec![0x00, 0x80]).await);

        let handle = sim
            .discover_characteristic(&id, service, characteristic)
            .await
            .unwrap()
            .unwrap();
        sim.subscribe(&handle).await.unwrap();
        assert!(sim.notify("p1", vec![0x00, 0x80]).await);
        assert!(matches!(rx.recv().await, Some(AdapterEvent::Notification { .. })));
    }

    #[tokio::test]
    async fn test_disconnect_raises_event() {
        let (sim, mut rx, _, _) = sim();
        let id = PeripheralId::new("p1");
        sim.connect(&id).await.unwrap();
        sim.disconnect(&id).await.unwrap();

        assert!(!sim.is_connected("p1"));
        assert_eq!(rx.recv().await, Some(AdapterEvent::Disconnected(id)));
    }
}
