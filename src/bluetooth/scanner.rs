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

//! Scan on/off decisions.

use super::adapter::AdapterState;

/// What the connection state machine should do with the adapter's scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanAction {
    Start,
    Stop,
    Nothing,
}

/// Tracks power state and scan activity.
///
/// Power-driven scanning only applies once the transport is armed by
/// `start()`. Before that, power changes are recorded and nothing else.
#[derive(Debug, Default)]
pub struct Scanner {
    armed: bool,
    powered: Option<bool>,
    scanning: bool,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm power-driven scanning. Returns whether a scan should start now,
    /// which is the case unless the adapter is known to be off.
    pub fn arm(&mut self) -> bool {
        self.armed = true;
        self.powered != Some(false)
    }

    /// React to a power change. `idle` is whether the link is free for a new
    /// connection attempt.
    pub fn on_state_change(&mut self, state: AdapterState, idle: bool) -> ScanAction {
        let powered = state == AdapterState::PoweredOn;
        self.powered = Some(powered);

        if powered {
            if self.armed && idle && !self.scanning {
                ScanAction::Start
            } else {
                ScanAction::Nothing
            }
        } else if self.scanning {
            ScanAction::Stop
        } else {
            ScanAction::Nothing
        }
    }

    /// Whether a discovery should be taken. The first accepted discovery ends
    /// the scan; the caller must stop the adapter's scan.
    pub fn accept_discovery(&mut self) -> bool {
        if !self.armed {
            return false;
        }
        self.scanning = false;
        true
    }

    pub fn set_scanning(&mut self, scanning: bool) {
        self.scanning = scanning;
    }
}
