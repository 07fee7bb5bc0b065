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

//! Fragment header codec.
//!
//! Every notification starts with a 2-byte little-endian header. The low 15
//! bits hold the byte offset of the fragment payload within the message, the
//! high bit marks the final fragment.

use super::ble_constants::header;
use crate::error::TransportError;

/// A decoded notification fragment borrowing its payload from the raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    /// Cumulative byte offset of `payload` within the message.
    pub sequence: u16,
    /// Set on the last fragment of a message.
    pub is_end: bool,
    pub payload: &'a [u8],
}

/// Decode one raw notification.
pub fn decode_fragment(raw: &[u8]) -> Result<Fragment<'_>, TransportError> {
    if raw.len() < header::SIZE {
        return Err(TransportError::MalformedFragment { len: raw.len() });
    }

    let value = u16::from_le_bytes([raw[0], raw[1]]);
    Ok(Fragment {
        sequence: value & header::SEQUENCE_MASK,
        is_end: value & header::END_FLAG != 0,
        payload: &raw[header::SIZE..],
    })
}

/// Encode a fragment header. Offsets above 15 bits are truncated.
pub fn encode_header(sequence: u16, is_end: bool) -> [u8; header::SIZE] {
    let mut value = sequence & header::SEQUENCE_MASK;
    if is_end {
        value |= header::END_FLAG;
    }
    value.to_le_bytes()
}

/// Build a complete fragment from a header and payload.
pub fn encode_fragment(sequence: u16, is_end: bool, payload: &[u8]) -> Vec<u8> {
    let mut fragment = Vec::with_capacity(header::SIZE + payload.len());
    fragment.extend_from_slice(&encode_header(sequence, is_end));
    fragment.extend_from_slice(payload);
    fragment
}

/// Split a message into notification fragments of at most `fragment_size`
/// bytes (header included).
///
/// An empty message produces a single end-flagged fragment with no payload.
pub fn chunk_message(data: &[u8], fragment_size: usize) -> Result<Vec<Vec<u8>>, TransportError> {
    if fragment_size <= header::SIZE {
        return Err(TransportError::InvalidFragmentSize(fragment_size));
    }

    if data.is_empty() {
        return Ok(vec![encode_fragment(0, true, &[])]);
    }

    let chunk_size = fragment_size - header::SIZE;
    let last_offset = (data.len() - 1) / chunk_size * chunk_size;
    if last_offset > header::MAX_SEQUENCE {
        return Err(TransportError::MessageTooLarge {
            size: data.len(),
            limit: (header::MAX_SEQUENCE / chunk_size + 1) * chunk_size,
        });
    }

    let mut packets = Vec::with_capacity(data.len().div_ceil(chunk_size));
    let mut offset = 0;

    while offset < data.len() {
        let end = (offset + chunk_size).min(data.len());
        let is_last = end == data.len();
        packets.push(encode_fragment(offset as u16, is_last, &data[offset..end]));
        offset = end;
    }

    Ok(packets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_first_fragment() {
        let fragment = decode_fragment(&[0x00, 0x00, b'H', b'e']).unwrap();
        assert_eq!(fragment.sequence, 0);
        assert!(!fragment.is_end);
        assert_eq!(fragment.payload, b"He");
    }

    #[test]
    fn test_decode_end_flag_and_offset() {
        // 0x8004: end flag, offset 4
        let fragment = decode_fragment(&[0x04, 0x80, b'o']).unwrap();
        assert_eq!(fragment.sequence, 4);
        assert!(fragment.is_end);
        assert_eq!(fragment.payload, b"o");

        // Offset uses both bytes, little-endian
        let fragment = decode_fragment(&[0x34, 0x12]).unwrap();
        assert_eq!(fragment.sequence, 0x1234);
        assert!(!fragment.is_end);
        assert!(fragment.payload.is_empty());
    }

    #[test]
    fn test_decode_too_short() {
        assert!(matches!(
            decode_fragment(&[]),
            Err(TransportError::MalformedFragment { len: 0 })
        ));
        assert!(matches!(
            decode_fragment(&[0x80]),
            Err(TransportError::MalformedFragment { len: 1 })
        ));
    }

    #[test]
    fn test_encode_header() {
        assert_eq!(encode_header(0, false), [0x00, 0x00]);
        assert_eq!(encode_header(4, true), [0x04, 0x80]);
        assert_eq!(encode_header(0x7FFF, true), [0xFF, 0xFF]);
        // Offset never leaks into the end flag
        assert_eq!(encode_header(0xFFFF, false), [0xFF, 0x7F]);
    }

    #[test]
    fn test_chunk_message_offsets() {
        let packets = chunk_message(b"Hello", 4).unwrap();
        assert_eq!(
            packets,
            vec![
                vec![0x00, 0x00, b'H', b'e'],
                vec![0x02, 0x00, b'l', b'l'],
                vec![0x04, 0x80, b'o'],
            ]
        );
    }

    #[test]
    fn test_chunk_message_single_and_empty() {
        let packets = chunk_message(b"hi", 20).unwrap();
        assert_eq!(packets, vec![vec![0x00, 0x80, b'h', b'i']]);

        let packets = chunk_message(b"", 20).unwrap();
        assert_eq!(packets, vec![vec![0x00, 0x80]]);
    }

    #[test]
    fn test_chunk_message_rejects_tiny_fragments() {
        assert!(matches!(
            chunk_message(b"abc", 2),
            Err(TransportError::InvalidFragmentSize(2))
        ));
    }

    #[test]
    fn test_chunk_message_sequence_limit() {
        // Last fragment starts exactly at the largest representable offset.
        let data = vec![0u8; 0x7FFF + 1];
        let packets = chunk_message(&data, 3).unwrap();
        let last = decode_fragment(packets.last().unwrap()).unwrap();
        assert_eq!(last.sequence, 0x7FFF);
        assert!(last.is_end);

        let data = vec![0u8; 0x7FFF + 2];
        assert!(matches!(
            chunk_message(&data, 3),
            Err(TransportError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_chunk_message_reported_limit_is_exact() {
        // Three payload bytes per fragment: the last offset must be a
        // multiple of 3 no larger than 0x7FFF, so 32766 + 3 bytes fit.
        assert!(chunk_message(&vec![0u8; 32769], 5).is_ok());
        assert!(matches!(
            chunk_message(&vec![0u8; 32770], 5),
            Err(TransportError::MessageTooLarge { size: 32770, limit: 32769 })
        ));
    }
}
