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

//! BLE adapter capability interface.
//!
//! The transport only talks to the radio through [`BleAdapter`] and the
//! [`AdapterEvent`] stream that accompanies it. Backends: the in-process
//! simulator and, with the `bluez` feature, BlueZ.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BleError {
    #[error("Adapter not powered")]
    NotPowered,

    #[error("Scan error: {0}")]
    Scan(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("GATT error: {0}")]
    Gatt(String),

    #[error("Write of {size} bytes exceeds MTU of {mtu}")]
    MtuExceeded { size: usize, mtu: usize },

    #[error("Unknown peripheral: {0}")]
    UnknownPeripheral(PeripheralId),

    #[error("Peripheral disconnected")]
    Disconnected,
}

/// Adapter power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    PoweredOn,
    PoweredOff,
    Unauthorized,
    Unsupported,
    Unknown,
}

/// Stable identifier of a peripheral (a MAC address for real radios).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralId(pub String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A discovered peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peripheral {
    pub id: PeripheralId,
    /// Advertised local name, if any.
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
}

/// A characteristic resolved on a connected peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    pub peripheral: PeripheralId,
    pub service: Uuid,
    pub uuid: Uuid,
}

/// Events delivered by the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// Adapter power state changed.
    StateChanged(AdapterState),
    /// A peripheral was seen while scanning.
    Discovered(Peripheral),
    /// Notification data from a subscribed characteristic.
    Notification {
        characteristic: CharacteristicHandle,
        data: Vec<u8>,
    },
    /// A peripheral dropped its link (remote or local initiated).
    Disconnected(PeripheralId),
}

/// Capabilities the transport needs from a BLE stack.
#[async_trait]
pub trait BleAdapter: Send + Sync + 'static {
    /// Start scanning for peripherals advertising `service`.
    async fn start_scanning(&self, service: Uuid) -> Result<(), BleError>;

    async fn stop_scanning(&self) -> Result<(), BleError>;

    async fn connect(&self, peripheral: &PeripheralId) -> Result<(), BleError>;

    /// Resolve `characteristic` inside `service`, `Ok(None)` if absent.
    async fn discover_characteristic(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Option<CharacteristicHandle>, BleError>;

    /// Enable notifications. Data then arrives as [`AdapterEvent::Notification`].
    async fn subscribe(&self, characteristic: &CharacteristicHandle) -> Result<(), BleError>;

    async fn write(&self, characteristic: &CharacteristicHandle, data: &[u8]) -> Result<(), BleError>;

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<(), BleError>;
}
