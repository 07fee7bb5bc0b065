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

//! RPC message transport over a single BLE GATT characteristic.
//!
//! Inbound messages arrive as notifications carrying a 2-byte fragment
//! header and are reassembled before JSON decoding. Outbound messages are
//! written whole. Sends are held back until the characteristic subscription
//! of the current link has completed.

pub mod bluetooth;
pub mod config;
pub mod error;
pub mod state;
pub mod transport;

pub use bluetooth::{BleAdapter, SimAdapter, TransportEvent};
pub use config::Config;
pub use error::TransportError;
pub use state::ConnectionState;
pub use transport::{Transport, TransportOptions};
