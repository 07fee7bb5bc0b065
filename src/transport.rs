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

//! RPC-facing transport handle.
//!
//! [`Transport::spawn`] starts the connection state machine on its own task
//! and returns a cloneable handle plus the event stream. The machine stops
//! once every handle is dropped.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

use crate::bluetooth::ble_constants::{config, parse_uuid};
use crate::bluetooth::connection::{Command, ConnectionMachine, WriteOutcome};
use crate::bluetooth::protocol::encode_message;
use crate::bluetooth::{
    AdapterEvent, BleAdapter, PeripheralId, ReadinessGate, ReadyWaiter, TransportEvent,
};
use crate::error::TransportError;
use crate::state::{ConnectionState, LinkState};

const COMMAND_BUFFER: usize = 16;

/// Settings for a transport instance.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Service advertised by the peripheral and used as scan filter.
    pub service: Uuid,
    /// RPC characteristic inside `service`.
    pub characteristic: Uuid,
    /// Upper bound for a reassembled inbound message.
    pub max_message_size: usize,
    /// Reject outbound messages above this size. Unchecked when `None`.
    pub max_write_size: Option<usize>,
}

impl TransportOptions {
    /// Options for the given service and characteristic, in short or full form.
    pub fn new(service: &str, characteristic: &str) -> Result<Self, TransportError> {
        Ok(Self {
            service: parse_uuid(service)?,
            characteristic: parse_uuid(characteristic)?,
            max_message_size: config::DEFAULT_MAX_MESSAGE_SIZE,
            max_write_size: None,
        })
    }

    pub fn with_max_write_size(mut self, limit: usize) -> Self {
        self.max_write_size = Some(limit);
        self
    }

    pub fn with_max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = limit;
        self
    }
}

/// Handle to a running transport.
#[derive(Clone)]
pub struct Transport {
    commands: mpsc::Sender<Command>,
    waiter: ReadyWaiter,
    link: Arc<LinkState>,
    max_write_size: Option<usize>,
}

impl Transport {
    /// Spawn the state machine over `adapter` and its event stream.
    ///
    /// The event channel is unbounded: an undrained receiver never holds up
    /// `start`, `close` or `send`. Must be called from within a tokio runtime.
    pub fn spawn<A: BleAdapter>(
        adapter: A,
        adapter_events: mpsc::Receiver<AdapterEvent>,
        options: TransportOptions,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let gate = ReadinessGate::new();
        let waiter = gate.waiter();
        let link = LinkState::new();

        let machine = ConnectionMachine::new(
            adapter,
            options.service,
            options.characteristic,
            options.max_message_size,
            gate,
            link.clone(),
            event_tx,
        );
        tokio::spawn(machine.run(command_rx, adapter_events));

        let transport = Self {
            commands: command_tx,
            waiter,
            link,
            max_write_size: options.max_write_size,
        };
        (transport, event_rx)
    }

    /// Begin scanning for the peripheral.
    pub async fn start(&self) -> Result<(), TransportError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Start { reply }).await?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    /// Disconnect from the current peripheral.
    pub async fn close(&self) -> Result<(), TransportError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Close { reply }).await?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    /// Serialize `message` to JSON and write it once the link is ready.
    pub async fn send<M: Serialize + ?Sized>(&self, message: &M) -> Result<(), TransportError> {
        self.send_bytes(encode_message(message)?).await
    }

    /// Like [`Transport::send`], failing with [`TransportError::Timeout`]
    /// when the write has not completed within `timeout`.
    pub async fn send_timeout<M: Serialize + ?Sized>(
        &self,
        message: &M,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let data = encode_message(message)?;
        tokio::time::timeout(timeout, self.send_bytes(data))
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    /// Write an already encoded message in a single write.
    ///
    /// Suspends until the link is ready. If the link drops before the write
    /// is taken, waits for the next ready link and writes there.
    pub async fn send_bytes(&self, data: Vec<u8>) -> Result<(), TransportError> {
        if let Some(limit) = self.max_write_size {
            if data.len() > limit {
                return Err(TransportError::WriteTooLarge {
                    size: data.len(),
                    limit,
                });
            }
        }

        let mut data = data;
        loop {
            let epoch = self.waiter.wait().await?;
            let (reply, rx) = oneshot::channel();
            self.request(Command::Write { data, reply }).await?;

            match rx.await.map_err(|_| TransportError::Closed)? {
                WriteOutcome::Written => return Ok(()),
                WriteOutcome::Failed(e) => return Err(e),
                WriteOutcome::NotReady(returned) => {
                    debug!("Link from epoch {} went away before write, waiting", epoch);
                    data = returned;
                }
            }
        }
    }

    /// Wait until the link is ready and return its epoch.
    pub async fn ready(&self) -> Result<u64, TransportError> {
        self.waiter.wait().await
    }

    /// True whenever a peripheral or characteristic handle is held.
    pub fn is_active(&self) -> bool {
        self.link.is_active()
    }

    pub fn state(&self) -> ConnectionState {
        self.link.get_state()
    }

    pub fn peripheral(&self) -> Option<PeripheralId> {
        self.link.get_peripheral()
    }

    /// Current readiness epoch; advances on every disconnect.
    pub fn epoch(&self) -> u64 {
        self.waiter.epoch()
    }

    async fn request(&self, command: Command) -> Result<(), TransportError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::SimAdapter;

    #[test]
    fn test_options_from_short_uuids() {
        let options = TransportOptions::new("ec00", "ec0e").unwrap();
        assert_eq!(
            options.service.to_string(),
            "0000ec00-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(options.max_write_size, None);
        assert_eq!(options.max_message_size, config::DEFAULT_MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_options_reject_bad_uuid() {
        assert!(matches!(
            TransportOptions::new("not-a-uuid", "ec0e"),
            Err(TransportError::InvalidUuid(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_write_rejected_before_link() {
        let (sim, events) = SimAdapter::new();
        let options = TransportOptions::new("ec00", "ec0e")
            .unwrap()
            .with_max_write_size(4);
        let (transport, _events) = Transport::spawn(sim, events, options);

        assert!(matches!(
            transport.send_bytes(b"12345".to_vec()).await,
            Err(TransportError::WriteTooLarge { size: 5, limit: 4 })
        ));
        assert_eq!(transport.state(), ConnectionState::Idle);
        assert!(!transport.is_active());
    }

    #[tokio::test]
    async fn test_send_timeout_while_idle() {
        let (sim, events) = SimAdapter::new();
        let options = TransportOptions::new("ec00", "ec0e").unwrap();
        let (transport, _events) = Transport::spawn(sim, events, options);

        let result = transport
            .send_timeout(&serde_json::json!({"method": "echo"}), Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(TransportError::Timeout)));
    }
}
