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

//! Connection state machine.
//!
//! A single task owns the peripheral and characteristic handles, the
//! reassembly buffer and the readiness gate. Adapter events and API commands
//! are processed one at a time, each as a named transition from the current
//! [`ConnectionState`].

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::adapter::{AdapterEvent, AdapterState, BleAdapter, CharacteristicHandle, Peripheral, PeripheralId};
use super::gate::ReadinessGate;
use super::protocol::decode_message;
use super::reassembler::MessageReassembler;
use super::scanner::{ScanAction, Scanner};
use crate::error::TransportError;
use crate::state::{ConnectionState, LinkState};

/// Events emitted by the transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// Link established, characteristic discovery under way.
    Connected { peripheral: PeripheralId },
    /// Subscribed; sends are released for this epoch.
    Ready { epoch: u64 },
    /// A fully reassembled, JSON-decoded inbound message.
    Message(serde_json::Value),
    /// Link closed.
    Disconnected { peripheral: PeripheralId },
    /// A reported fault. The link state tells whether it survived.
    Error(TransportError),
}

/// Requests from transport handles.
pub(crate) enum Command {
    Start {
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Close {
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Write {
        data: Vec<u8>,
        reply: oneshot::Sender<WriteOutcome>,
    },
}

#[derive(Debug)]
pub(crate) enum WriteOutcome {
    Written,
    /// The link dropped before the write was taken; the data is handed back.
    NotReady(Vec<u8>),
    Failed(TransportError),
}

pub(crate) struct ConnectionMachine<A: BleAdapter> {
    adapter: A,
    service: Uuid,
    characteristic_uuid: Uuid,
    max_message_size: usize,
    state: ConnectionState,
    peripheral: Option<PeripheralId>,
    characteristic: Option<CharacteristicHandle>,
    reassembler: Option<MessageReassembler>,
    scanner: Scanner,
    gate: ReadinessGate,
    link: Arc<LinkState>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
}

impl<A: BleAdapter> ConnectionMachine<A> {
    pub(crate) fn new(
        adapter: A,
        service: Uuid,
        characteristic_uuid: Uuid,
        max_message_size: usize,
        gate: ReadinessGate,
        link: Arc<LinkState>,
        event_tx: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            adapter,
            service,
            characteristic_uuid,
            max_message_size,
            state: ConnectionState::Idle,
            peripheral: None,
            characteristic: None,
            reassembler: None,
            scanner: Scanner::new(),
            gate,
            link,
            event_tx,
        }
    }

    /// Run until every transport handle is dropped.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<AdapterEvent>,
    ) {
        info!("Connection state machine started");
        let mut events_open = true;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("Adapter event stream ended");
                        events_open = false;
                    }
                },
            }
        }

        info!("Connection state machine stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { reply } => {
                let _ = reply.send(self.start().await);
            }
            Command::Close { reply } => {
                let _ = reply.send(self.close().await);
            }
            Command::Write { data, reply } => {
                let _ = reply.send(self.write(data).await);
            }
        }
    }

    pub(crate) async fn handle_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::StateChanged(state) => self.on_state_change(state).await,
            AdapterEvent::Discovered(peripheral) => self.on_discovered(peripheral).await,
            AdapterEvent::Notification {
                characteristic,
                data,
            } => self.on_notification(&characteristic, &data),
            AdapterEvent::Disconnected(peripheral) => self.on_peripheral_disconnected(peripheral),
        }
    }

    async fn start(&mut self) -> Result<(), TransportError> {
        if self.state != ConnectionState::Idle {
            return Err(TransportError::AlreadyActive);
        }

        if self.scanner.arm() {
            self.begin_scan().await
        } else {
            info!("Adapter powered off, scanning starts on power-on");
            Ok(())
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(peripheral) = self.peripheral.clone() else {
            return Err(TransportError::AlreadyInactive);
        };

        self.set_state(ConnectionState::Disconnecting);
        let result = self.adapter.disconnect(&peripheral).await;
        if let Err(ref e) = result {
            warn!("Disconnect from {} reported: {}", peripheral, e);
        }
        self.teardown();
        result.map_err(Into::into)
    }

    async fn write(&mut self, data: Vec<u8>) -> WriteOutcome {
        let characteristic = match (self.state, &self.characteristic) {
            (ConnectionState::Ready, Some(characteristic)) => characteristic.clone(),
            _ => return WriteOutcome::NotReady(data),
        };

        debug!("Writing {} bytes", data.len());
        match self.adapter.write(&characteristic, &data).await {
            Ok(()) => WriteOutcome::Written,
            Err(e) => {
                error!("Write failed: {}", e);
                WriteOutcome::Failed(e.into())
            }
        }
    }

    async fn on_state_change(&mut self, state: AdapterState) {
        info!("Adapter state: {:?}", state);
        match self.scanner.on_state_change(state, self.state.accepts_connection()) {
            ScanAction::Start => {
                if let Err(e) = self.begin_scan().await {
                    self.emit(TransportEvent::Error(e));
                }
            }
            ScanAction::Stop => self.end_scan().await,
            ScanAction::Nothing => {}
        }
    }

    async fn begin_scan(&mut self) -> Result<(), TransportError> {
        self.adapter.start_scanning(self.service).await?;
        self.scanner.set_scanning(true);
        self.set_state(ConnectionState::Scanning);
        info!("Scanning for service {}", self.service);
        Ok(())
    }

    async fn end_scan(&mut self) {
        if let Err(e) = self.adapter.stop_scanning().await {
            warn!("Failed to stop scanning: {}", e);
        }
        self.scanner.set_scanning(false);
        if self.state == ConnectionState::Scanning {
            self.set_state(ConnectionState::Idle);
        }
    }

    async fn on_discovered(&mut self, peripheral: Peripheral) {
        if !self.state.accepts_connection() || !self.scanner.accept_discovery() {
            debug!("Ignoring discovered peripheral {}", peripheral.id);
            return;
        }

        // The first peripheral scanned wins.
        if let Err(e) = self.adapter.stop_scanning().await {
            warn!("Failed to stop scanning: {}", e);
        }
        self.connect_and_setup(peripheral).await;
    }

    async fn connect_and_setup(&mut self, peripheral: Peripheral) {
        let id = peripheral.id;
        info!(
            "Connecting to '{}' {}",
            peripheral.local_name.as_deref().unwrap_or(""),
            id
        );
        self.set_state(ConnectionState::Connecting);

        if let Err(e) = self.adapter.connect(&id).await {
            error!("Connect to {} failed: {}", id, e);
            self.set_state(ConnectionState::Idle);
            self.emit(TransportEvent::Error(TransportError::Connection(format!(
                "connect to {} failed: {}",
                id, e
            ))));
            return;
        }

        info!("Connected to {}", id);
        self.peripheral = Some(id.clone());
        self.link.set_peripheral(Some(id.clone()));
        self.set_state(ConnectionState::DiscoveringCharacteristic);
        self.emit(TransportEvent::Connected {
            peripheral: id.clone(),
        });

        let characteristic = match self
            .adapter
            .discover_characteristic(&id, self.service, self.characteristic_uuid)
            .await
        {
            Ok(Some(characteristic)) => characteristic,
            Ok(None) => {
                let reason = format!(
                    "characteristic {} not found on {}",
                    self.characteristic_uuid, id
                );
                return self.fault(reason).await;
            }
            Err(e) => return self.fault(format!("discovery on {} failed: {}", id, e)).await,
        };

        self.characteristic = Some(characteristic.clone());
        self.link.set_characteristic(Some(characteristic.clone()));
        self.set_state(ConnectionState::Subscribing);

        let epoch = self.gate.epoch();
        if let Err(e) = self.adapter.subscribe(&characteristic).await {
            return self.fault(format!("subscribe on {} failed: {}", id, e)).await;
        }

        self.reassembler = Some(MessageReassembler::with_limit(self.max_message_size));
        self.set_state(ConnectionState::Ready);
        if self.gate.resolve(epoch) {
            info!("Subscribed for notifications");
            self.emit(TransportEvent::Ready { epoch });
        }
    }

    /// Setup failed on a connected peripheral: report, drop the link, go idle.
    async fn fault(&mut self, reason: String) {
        error!("{}", reason);
        self.set_state(ConnectionState::Faulted);
        self.emit(TransportEvent::Error(TransportError::Connection(reason)));

        if let Some(peripheral) = self.peripheral.clone() {
            if let Err(e) = self.adapter.disconnect(&peripheral).await {
                warn!("Disconnect from {} reported: {}", peripheral, e);
            }
        }
        self.teardown();
    }

    fn on_notification(&mut self, characteristic: &CharacteristicHandle, data: &[u8]) {
        if self.characteristic.as_ref() != Some(characteristic) {
            debug!("Ignoring notification from {}", characteristic.uuid);
            return;
        }
        let Some(reassembler) = self.reassembler.as_mut() else {
            debug!("Notification before subscription completed, dropping");
            return;
        };

        match reassembler.ingest(data) {
            Ok(Some(message)) => self.deliver(&message),
            Ok(None) => {}
            Err(e) => self.emit(TransportEvent::Error(e)),
        }
    }

    fn deliver(&self, message: &[u8]) {
        match decode_message(message) {
            Ok(value) => {
                debug!("Received: {}", value);
                self.emit(TransportEvent::Message(value));
            }
            Err(e) => {
                warn!("Dropping message: {}", e);
                self.emit(TransportEvent::Error(e));
            }
        }
    }

    fn on_peripheral_disconnected(&mut self, peripheral: PeripheralId) {
        if self.peripheral.as_ref() != Some(&peripheral) {
            debug!("Ignoring disconnect of {}", peripheral);
            return;
        }

        if self.reassembler.as_ref().is_some_and(|r| r.is_in_progress()) {
            warn!("Link lost mid-message, discarding partial data");
        }
        self.teardown();
    }

    /// Release the link: new gate epoch, buffer dropped, handles cleared.
    fn teardown(&mut self) {
        let epoch = self.gate.reset();
        self.reassembler = None;
        self.characteristic = None;
        self.link.clear();
        self.set_state(ConnectionState::Idle);

        if let Some(peripheral) = self.peripheral.take() {
            info!("Disconnected from {} (next epoch {})", peripheral, epoch);
            self.emit(TransportEvent::Disconnected { peripheral });
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        debug!("{} -> {}", self.state.as_str(), state.as_str());
        self.state = state;
        self.link.set_state(state);
    }

    fn emit(&self, event: TransportEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }
}
