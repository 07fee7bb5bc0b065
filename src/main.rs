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

//! Echo client: connects to the first RPC peripheral found and sends an
//! `echo` request on every ready link.

use anyhow::Result;
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ble_rpc_transport::bluetooth::BluezAdapter;
use ble_rpc_transport::{Config, ConnectionState, Transport, TransportError, TransportEvent};

/// Scan again once the link has fallen back to idle.
async fn rescan(transport: &Transport) {
    if transport.state() != ConnectionState::Idle {
        return;
    }
    match transport.start().await {
        Ok(()) | Err(TransportError::AlreadyActive) => {}
        Err(e) => error!("Failed to restart scan: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ble_rpc_transport=info".parse()?),
        )
        .init();

    info!("Starting BLE RPC echo v{}...", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    let options = config.options()?;
    info!(
        "Configuration loaded: service {}, characteristic {}",
        options.service, options.characteristic
    );

    let (adapter, adapter_events) = BluezAdapter::new().await?;
    let (transport, mut events) = Transport::spawn(adapter, adapter_events, options);
    transport.start().await?;

    let mut next_id: u64 = 1;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("Transport stopped");
                    break;
                };
                match event {
                    TransportEvent::Connected { peripheral } => info!("Connected to {}", peripheral),
                    TransportEvent::Ready { epoch } => {
                        let request = json!({
                            "jsonrpc": "2.0",
                            "id": next_id,
                            "method": "echo",
                            "params": ["Hello"],
                        });
                        next_id += 1;
                        info!("Link ready (epoch {}), sending {}", epoch, request);
                        let sender = transport.clone();
                        tokio::spawn(async move {
                            if let Err(e) = sender.send(&request).await {
                                error!("Send failed: {}", e);
                            }
                        });
                    }
                    TransportEvent::Message(message) => info!("Reply: {}", message),
                    TransportEvent::Disconnected { peripheral } => {
                        info!("Disconnected from {}", peripheral);
                        rescan(&transport).await;
                    }
                    TransportEvent::Error(e) => {
                        warn!("Transport error: {}", e);
                        rescan(&transport).await;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    if transport.is_active() {
        if let Err(e) = transport.close().await {
            warn!("Close reported: {}", e);
        }
    }

    Ok(())
}
