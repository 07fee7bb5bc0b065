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

//! Bluetooth LE central side of the transport.
//!
//! Fragment framing and reassembly, the connection state machine and the
//! adapter backends it drives.

pub mod adapter;
pub mod ble_constants;
#[cfg(feature = "bluez")]
pub mod bluez;
pub(crate) mod connection;
pub mod frame;
pub mod gate;
pub mod protocol;
pub mod reassembler;
pub mod scanner;
pub mod simulated;

pub use adapter::{
    AdapterEvent, AdapterState, BleAdapter, BleError, CharacteristicHandle, Peripheral,
    PeripheralId,
};
pub use ble_constants::parse_uuid;
#[cfg(feature = "bluez")]
pub use bluez::BluezAdapter;
pub use connection::TransportEvent;
pub use frame::{chunk_message, decode_fragment, encode_fragment, encode_header, Fragment};
pub use gate::{ReadinessGate, ReadyWaiter};
pub use reassembler::{MessageReassembler, ReassemblyState};
pub use simulated::SimAdapter;
