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

//! Link readiness gate.
//!
//! One epoch per connect/subscribe cycle. An epoch resolves at most once and
//! a disconnect moves the gate to a fresh pending epoch, so a resolution can
//! only ever release waiters of the link it was issued for.

use tokio::sync::watch;

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Epoch {
    id: u64,
    ready: bool,
}

/// Owning side of the gate, held by the connection state machine.
#[derive(Debug)]
pub struct ReadinessGate {
    tx: watch::Sender<Epoch>,
}

impl ReadinessGate {
    /// Create a gate in pending epoch 0.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Epoch { id: 0, ready: false });
        Self { tx }
    }

    /// Current epoch id.
    pub fn epoch(&self) -> u64 {
        self.tx.borrow().id
    }

    pub fn is_ready(&self) -> bool {
        self.tx.borrow().ready
    }

    /// Resolve `epoch` if it is still current and pending.
    ///
    /// Returns `false` for a stale epoch or an epoch already resolved.
    pub fn resolve(&self, epoch: u64) -> bool {
        self.tx.send_if_modified(|current| {
            if current.id == epoch && !current.ready {
                current.ready = true;
                true
            } else {
                false
            }
        })
    }

    /// Start a new pending epoch and return its id.
    pub fn reset(&self) -> u64 {
        self.tx.send_modify(|current| {
            current.id += 1;
            current.ready = false;
        });
        self.epoch()
    }

    /// Create a waiter bound to this gate.
    pub fn waiter(&self) -> ReadyWaiter {
        ReadyWaiter {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Waiting side of the gate, handed out to senders.
#[derive(Debug, Clone)]
pub struct ReadyWaiter {
    rx: watch::Receiver<Epoch>,
}

impl ReadyWaiter {
    /// Suspend until the current epoch resolves and return its id.
    ///
    /// A waiter still pending when the link drops keeps waiting for the next
    /// epoch. Fails with [`TransportError::Closed`] once the gate is dropped.
    pub async fn wait(&self) -> Result<u64, TransportError> {
        let mut rx = self.rx.clone();
        let epoch = rx
            .wait_for(|epoch| epoch.ready)
            .await
            .map_err(|_| TransportError::Closed)?;
        Ok(epoch.id)
    }

    pub fn epoch(&self) -> u64 {
        self.rx.borrow().id
    }

    pub fn is_ready(&self) -> bool {
        self.rx.borrow().ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_resolves_once_per_epoch() {
        let gate = ReadinessGate::new();
        assert!(!gate.is_ready());

        assert!(gate.resolve(0));
        assert!(gate.is_ready());
        assert!(!gate.resolve(0), "second resolve is a no-op");

        assert_eq!(gate.waiter().wait().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reset_gives_pending_gate() {
        let gate = ReadinessGate::new();
        gate.resolve(0);

        assert_eq!(gate.reset(), 1);
        assert!(!gate.is_ready());

        let waiter = gate.waiter();
        assert!(!waiter.is_ready());
        assert!(timeout(Duration::from_millis(20), waiter.wait()).await.is_err());
    }

    #[tokio::test]
    async fn test_stale_resolution_is_ignored() {
        let gate = ReadinessGate::new();
        let stale = gate.epoch();
        gate.reset();

        assert!(!gate.resolve(stale));
        assert!(!gate.is_ready());
        assert!(gate.resolve(gate.epoch()));
    }

    #[tokio::test]
    async fn test_pending_waiter_follows_new_epoch() {
        let gate = ReadinessGate::new();
        let waiter = gate.waiter();
        let handle = tokio::spawn(async move { waiter.wait().await });

        tokio::task::yield_now().await;
        let epoch = gate.reset();
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        gate.resolve(epoch);
        assert_eq!(handle.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dropped_gate_closes_waiters() {
        let gate = ReadinessGate::new();
        let waiter = gate.waiter();
        drop(gate);

        assert!(matches!(waiter.wait().await, Err(TransportError::Closed)));
    }
}
