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

//! RPC message payload encoding.
//!
//! Messages travel as UTF-8 JSON. Inbound they arrive reassembled from
//! fragments; outbound they are written whole, without a header.

use serde::Serialize;
use serde_json::Value;

use crate::error::TransportError;

/// Decode a reassembled message.
pub fn decode_message(bytes: &[u8]) -> Result<Value, TransportError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| TransportError::PayloadDecode(format!("invalid UTF-8: {}", e)))?;
    serde_json::from_str(text.trim()).map_err(|e| TransportError::PayloadDecode(e.to_string()))
}

/// Encode an outbound message.
pub fn encode_message<M: Serialize + ?Sized>(message: &M) -> Result<Vec<u8>, TransportError> {
    Ok(serde_json::to_vec(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_object() {
        let value = decode_message(br#"{"jsonrpc":"2.0","id":1,"result":"Hello"}"#).unwrap();
        assert_eq!(value["result"], "Hello");
        assert_eq!(value["id"], 1);
    }

    #[test]
    fn test_decode_tolerates_trailing_newline() {
        let value = decode_message(b"{\"method\":\"echo\"}\n").unwrap();
        assert_eq!(value, json!({"method": "echo"}));
    }

    #[test]
    fn test_invalid_utf8() {
        let err = decode_message(&[b'{', 0xFF, b'}']).unwrap_err();
        assert!(matches!(err, TransportError::PayloadDecode(ref msg) if msg.contains("UTF-8")));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            decode_message(b"{\"method\":"),
            Err(TransportError::PayloadDecode(_))
        ));
    }

    #[test]
    fn test_encode_has_no_framing() {
        let bytes = encode_message(&json!({"method": "echo", "params": ["hi"]})).unwrap();
        assert_eq!(bytes, br#"{"method":"echo","params":["hi"]}"#.to_vec());
    }
}
