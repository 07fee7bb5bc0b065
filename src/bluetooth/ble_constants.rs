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

//! BLE identifiers and fragment framing constants.

use uuid::Uuid;

use crate::error::TransportError;

/// Default RPC service (16-bit short form).
pub const DEFAULT_SERVICE_UUID: &str = "ec00";

/// Default RPC characteristic (16-bit short form).
/// Properties: Write, Notify
pub const DEFAULT_CHARACTERISTIC_UUID: &str = "ec0e";

/// Bluetooth Base UUID (`00000000-0000-1000-8000-00805F9B34FB`).
pub const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Fragment header layout.
pub mod header {
    /// Size of the little-endian header at the start of every notification.
    pub const SIZE: usize = 2;

    /// Bits 0-14: cumulative byte offset of the fragment payload.
    pub const SEQUENCE_MASK: u16 = 0x7FFF;

    /// Bit 15: last fragment of the message.
    pub const END_FLAG: u16 = 0x8000;

    /// Largest offset a header can carry.
    pub const MAX_SEQUENCE: usize = SEQUENCE_MASK as usize;
}

/// Transport limits.
pub mod config {
    /// Default cap on a reassembled message.
    pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

    /// Capacity of an adapter's event channel.
    pub const ADAPTER_EVENT_BUFFER: usize = 64;
}

/// Parse a service or characteristic identifier.
///
/// Accepts 16-bit (`"ec00"`) and 32-bit short forms, which are expanded onto
/// the Bluetooth Base UUID, as well as full UUIDs with or without hyphens.
pub fn parse_uuid(id: &str) -> Result<Uuid, TransportError> {
    let trimmed = id.trim();
    let short = match trimmed.len() {
        4 | 8 => u32::from_str_radix(trimmed, 16).ok(),
        _ => None,
    };

    if let Some(short) = short {
        return Ok(Uuid::from_u128(BLUETOOTH_BASE_UUID | (u128::from(short) << 96)));
    }

    Uuid::parse_str(trimmed).map_err(|_| TransportError::InvalidUuid(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_uuid_expansion() {
        assert_eq!(
            parse_uuid("ec00").unwrap().to_string(),
            "0000ec00-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            parse_uuid("EC0E").unwrap().to_string(),
            "0000ec0e-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            parse_uuid("12345678").unwrap().to_string(),
            "12345678-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_full_uuid_forms() {
        let hyphenated = parse_uuid("a1b2c3d4-e5f6-7890-abcd-ef1234567890").unwrap();
        let simple = parse_uuid("a1b2c3d4e5f67890abcdef1234567890").unwrap();
        assert_eq!(hyphenated, simple);
    }

    #[test]
    fn test_invalid_uuid() {
        assert!(matches!(
            parse_uuid("not-a-uuid"),
            Err(TransportError::InvalidUuid(id)) if id == "not-a-uuid"
        ));
        assert!(parse_uuid("zz00").is_err());
    }
}
