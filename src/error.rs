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

//! Transport error types.

use thiserror::Error;

use crate::bluetooth::BleError;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Malformed fragment: {len} bytes is shorter than the header")]
    MalformedFragment { len: usize },

    #[error("Sequence mismatch: expected offset {expected}, got {actual}")]
    SequenceMismatch { expected: usize, actual: u16 },

    #[error("Message of {size} bytes exceeds limit of {limit}")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("Fragment size {0} leaves no room for payload")]
    InvalidFragmentSize(usize),

    #[error("Payload decode error: {0}")]
    PayloadDecode(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Already active")]
    AlreadyActive,

    #[error("Already inactive")]
    AlreadyInactive,

    #[error("Outbound message of {size} bytes exceeds write limit of {limit}")]
    WriteTooLarge { size: usize, limit: usize },

    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid UUID: {0}")]
    InvalidUuid(String),

    #[error(transparent)]
    Adapter(#[from] BleError),

    #[error("Operation timed out")]
    Timeout,

    #[error("Transport closed")]
    Closed,
}
