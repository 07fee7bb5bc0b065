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

//! Configuration module.
//!
//! Handles loading and saving transport settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::bluetooth::ble_constants::{config, DEFAULT_CHARACTERISTIC_UUID, DEFAULT_SERVICE_UUID};
use crate::transport::TransportOptions;

const APP_DIR: &str = "ble-rpc-transport";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Service the peripheral advertises, short or full form.
    pub service_uuid: String,

    /// RPC characteristic inside the service.
    pub characteristic_uuid: String,

    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,

    /// Largest outbound write accepted, in bytes. Unlimited when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_write_size: Option<usize>,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            service_uuid: DEFAULT_SERVICE_UUID.to_string(),
            characteristic_uuid: DEFAULT_CHARACTERISTIC_UUID.to_string(),
            max_message_size: config::DEFAULT_MAX_MESSAGE_SIZE,
            max_write_size: None,
        }
    }
}

impl Config {
    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a specific file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Transport options described by this configuration.
    pub fn options(&self) -> Result<TransportOptions> {
        let bt = &self.bluetooth;
        let mut options = TransportOptions::new(&bt.service_uuid, &bt.characteristic_uuid)?
            .with_max_message_size(bt.max_message_size);
        options.max_write_size = bt.max_write_size;
        Ok(options)
    }
}
