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

//! Link state shared between the state machine and transport handles.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::bluetooth::{CharacteristicHandle, PeripheralId};

/// Lifecycle state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    DiscoveringCharacteristic,
    Subscribing,
    Ready,
    Disconnecting,
    Faulted,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Scanning => "Scanning",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::DiscoveringCharacteristic => "DiscoveringCharacteristic",
            ConnectionState::Subscribing => "Subscribing",
            ConnectionState::Ready => "Ready",
            ConnectionState::Disconnecting => "Disconnecting",
            ConnectionState::Faulted => "Faulted",
        }
    }

    /// Whether a new connection attempt may start from this state.
    pub fn accepts_connection(&self) -> bool {
        matches!(self, ConnectionState::Idle | ConnectionState::Scanning)
    }
}

/// Snapshot of the link, written only by the state machine.
#[derive(Debug)]
pub struct LinkState {
    pub connection_state: RwLock<ConnectionState>,

    /// Connected peripheral.
    pub peripheral: RwLock<Option<PeripheralId>>,

    /// Resolved RPC characteristic.
    pub characteristic: RwLock<Option<CharacteristicHandle>>,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            connection_state: RwLock::new(ConnectionState::Idle),
            peripheral: RwLock::new(None),
            characteristic: RwLock::new(None),
        }
    }
}

impl LinkState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.connection_state.write() = state;
    }

    pub fn get_state(&self) -> ConnectionState {
        *self.connection_state.read()
    }

    pub fn set_peripheral(&self, peripheral: Option<PeripheralId>) {
        *self.peripheral.write() = peripheral;
    }

    pub fn get_peripheral(&self) -> Option<PeripheralId> {
        self.peripheral.read().clone()
    }

    pub fn set_characteristic(&self, characteristic: Option<CharacteristicHandle>) {
        *self.characteristic.write() = characteristic;
    }

    /// True whenever a peripheral or characteristic handle is held.
    pub fn is_active(&self) -> bool {
        self.peripheral.read().is_some() || self.characteristic.read().is_some()
    }

    pub fn clear(&self) {
        self.set_peripheral(None);
        self.set_characteristic(None);
        self.set_state(ConnectionState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_tracks_handles() {
        let link = LinkState::new();
        assert!(!link.is_active());
        assert_eq!(link.get_state(), ConnectionState::Idle);

        link.set_peripheral(Some(PeripheralId::new("p1")));
        assert!(link.is_active());

        link.set_state(ConnectionState::Ready);
        link.clear();
        assert!(!link.is_active());
        assert_eq!(link.get_state(), ConnectionState::Idle);
    }

    #[test]
    fn test_accepts_connection() {
        assert!(ConnectionState::Idle.accepts_connection());
        assert!(ConnectionState::Scanning.accepts_connection());
        assert!(!ConnectionState::Connecting.accepts_connection());
        assert!(!ConnectionState::Ready.accepts_connection());
    }
}
