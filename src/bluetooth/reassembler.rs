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

//! BLE notification reassembly logic.

use tracing::{debug, warn};

use super::ble_constants::config;
use super::frame::decode_fragment;
use crate::error::TransportError;

/// Progress of the message currently being reassembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyState {
    /// No message in progress.
    Empty,
    /// At least one fragment of a message has been applied.
    Accumulating,
}

/// Reassembles offset-sequenced notifications into complete messages.
///
/// Fragments must arrive in order. Any fault discards the partial message and
/// the buffer starts over at offset 0; it never tries to resynchronise.
#[derive(Debug)]
pub struct MessageReassembler {
    buffer: Vec<u8>,
    expected_seq: usize,
    in_progress: bool,
    max_message_size: usize,
}

impl MessageReassembler {
    /// Create a new message reassembler.
    pub fn new() -> Self {
        Self::with_limit(config::DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a reassembler that rejects messages above `max_message_size` bytes.
    pub fn with_limit(max_message_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(512),
            expected_seq: 0,
            in_progress: false,
            max_message_size,
        }
    }

    /// Process one raw notification.
    ///
    /// Returns `Ok(Some(message))` once the end-flagged fragment arrives,
    /// `Ok(None)` while the message is still incomplete.
    pub fn ingest(&mut self, raw: &[u8]) -> Result<Option<Vec<u8>>, TransportError> {
        let fragment = match decode_fragment(raw) {
            Ok(fragment) => fragment,
            Err(e) => {
                warn!("{}", e);
                self.reset();
                return Err(e);
            }
        };

        if usize::from(fragment.sequence) != self.expected_seq {
            warn!(
                "Sequence error: expected offset {}, got {}",
                self.expected_seq, fragment.sequence
            );
            let err = TransportError::SequenceMismatch {
                expected: self.expected_seq,
                actual: fragment.sequence,
            };
            self.reset();
            return Err(err);
        }

        let size = self.buffer.len() + fragment.payload.len();
        if size > self.max_message_size {
            warn!(
                "Message exceeds {} bytes, dropping",
                self.max_message_size
            );
            self.reset();
            return Err(TransportError::MessageTooLarge {
                size,
                limit: self.max_message_size,
            });
        }

        self.buffer.extend_from_slice(fragment.payload);
        self.expected_seq += fragment.payload.len();
        self.in_progress = true;

        if fragment.is_end {
            debug!("Message reassembly complete: {} bytes", self.buffer.len());
            let message = std::mem::take(&mut self.buffer);
            self.reset();
            return Ok(Some(message));
        }

        Ok(None)
    }

    /// Reset the reassembler state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected_seq = 0;
        self.in_progress = false;
    }

    pub fn state(&self) -> ReassemblyState {
        if self.in_progress {
            ReassemblyState::Accumulating
        } else {
            ReassemblyState::Empty
        }
    }

    /// Check if reassembly is in progress.
    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    /// Offset the next fragment must carry.
    pub fn expected_sequence(&self) -> usize {
        self.expected_seq
    }

    /// Get current buffer size.
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for MessageReassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::frame::{chunk_message, encode_fragment};

    #[test]
    fn test_hello_in_three_fragments() {
        let mut reassembler = MessageReassembler::new();

        assert_eq!(reassembler.ingest(&encode_fragment(0, false, b"He")).unwrap(), None);
        assert_eq!(reassembler.state(), ReassemblyState::Accumulating);
        assert_eq!(reassembler.expected_sequence(), 2);

        assert_eq!(reassembler.ingest(&encode_fragment(2, false, b"ll")).unwrap(), None);
        assert_eq!(reassembler.expected_sequence(), 4);

        let result = reassembler.ingest(&encode_fragment(4, true, b"o")).unwrap();
        assert_eq!(result, Some(b"Hello".to_vec()));
        assert_eq!(reassembler.state(), ReassemblyState::Empty);
        assert_eq!(reassembler.expected_sequence(), 0);
    }

    #[test]
    fn test_single_fragment_message() {
        let mut reassembler = MessageReassembler::new();
        let result = reassembler.ingest(&[0x00, 0x80, b'{', b'}']).unwrap();
        assert_eq!(result, Some(b"{}".to_vec()));
        assert!(!reassembler.is_in_progress());
    }

    #[test]
    fn test_gap_is_sequence_mismatch() {
        let mut reassembler = MessageReassembler::new();
        assert!(reassembler.ingest(&encode_fragment(0, false, b"AB")).unwrap().is_none());

        let result = reassembler.ingest(&encode_fragment(3, true, b"CD"));
        assert!(matches!(
            result,
            Err(TransportError::SequenceMismatch { expected: 2, actual: 3 })
        ));
        assert_eq!(reassembler.state(), ReassemblyState::Empty);
        assert_eq!(reassembler.expected_sequence(), 0);
        assert_eq!(reassembler.buffer_size(), 0);
    }

    #[test]
    fn test_recovers_after_mismatch() {
        let mut reassembler = MessageReassembler::new();
        assert!(reassembler.ingest(&encode_fragment(0, false, b"AB")).unwrap().is_none());
        assert!(reassembler.ingest(&encode_fragment(9, false, b"CD")).is_err());

        // The continuation of the broken message is itself out of sequence.
        assert!(reassembler.ingest(&encode_fragment(11, true, b"EF")).is_err());

        // A fresh message starting at offset 0 goes through.
        let result = reassembler.ingest(&encode_fragment(0, true, b"ok")).unwrap();
        assert_eq!(result, Some(b"ok".to_vec()));
    }

    #[test]
    fn test_continuation_without_start() {
        let mut reassembler = MessageReassembler::new();
        assert!(matches!(
            reassembler.ingest(&encode_fragment(5, true, b"x")),
            Err(TransportError::SequenceMismatch { expected: 0, actual: 5 })
        ));
    }

    #[test]
    fn test_malformed_fragment_resets() {
        let mut reassembler = MessageReassembler::new();
        assert!(reassembler.ingest(&encode_fragment(0, false, b"AB")).unwrap().is_none());

        assert!(matches!(
            reassembler.ingest(&[0x02]),
            Err(TransportError::MalformedFragment { len: 1 })
        ));
        assert_eq!(reassembler.state(), ReassemblyState::Empty);
        assert_eq!(reassembler.expected_sequence(), 0);
    }

    #[test]
    fn test_message_size_limit() {
        let mut reassembler = MessageReassembler::with_limit(4);
        assert!(reassembler.ingest(&encode_fragment(0, false, b"abc")).unwrap().is_none());

        assert!(matches!(
            reassembler.ingest(&encode_fragment(3, true, b"de")),
            Err(TransportError::MessageTooLarge { size: 5, limit: 4 })
        ));
        assert_eq!(reassembler.state(), ReassemblyState::Empty);
    }

    #[test]
    fn test_empty_fragments_do_not_advance() {
        let mut reassembler = MessageReassembler::new();
        assert!(reassembler.ingest(&encode_fragment(0, false, b"")).unwrap().is_none());
        assert!(reassembler.is_in_progress());
        assert_eq!(reassembler.expected_sequence(), 0);

        let result = reassembler.ingest(&encode_fragment(0, true, b"z")).unwrap();
        assert_eq!(result, Some(b"z".to_vec()));
    }

    #[test]
    fn test_arbitrary_fragment_sizes() {
        let original: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

        for fragment_size in [3, 4, 7, 20, 23, 185, 512, 2000] {
            let packets = chunk_message(&original, fragment_size).unwrap();
            let mut reassembler = MessageReassembler::new();

            let mut completed = Vec::new();
            for packet in &packets {
                if let Some(message) = reassembler.ingest(packet).unwrap() {
                    completed.push(message);
                }
            }

            assert_eq!(completed, vec![original.clone()], "fragment size {}", fragment_size);
            assert_eq!(reassembler.state(), ReassemblyState::Empty);
        }
    }

    #[test]
    fn test_back_to_back_messages() {
        let mut reassembler = MessageReassembler::new();
        let mut completed = Vec::new();

        for message in [&b"first message"[..], b"second", b""] {
            for packet in chunk_message(message, 6).unwrap() {
                if let Some(done) = reassembler.ingest(&packet).unwrap() {
                    completed.push(done);
                }
            }
        }

        assert_eq!(
            completed,
            vec![b"first message".to_vec(), b"second".to_vec(), Vec::new()]
        );
    }
}
