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
//! Handles loading and saving application settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bluetooth::LinkConfig;
use crate::location::FixRequest;

const APP_DIR: &str = "wristband-companion";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for storage and settings.
    #[serde(skip)]
    pub data_dir: PathBuf,

    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// Location source settings.
    pub location: LocationConfig,

    pub coordinator: CoordinatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// How long a scan for the wristband may run.
    pub scan_timeout_secs: u64,

    /// Adapter to use, e.g. "hci0". Defaults to the system default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            scan_timeout_secs: 30,
            adapter: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// File or FIFO to read fixes from. Without it, fixes only come from
    /// the console.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_path: Option<PathBuf>,

    pub min_interval_secs: u64,

    pub min_distance_meters: f32,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            fix_path: None,
            min_interval_secs: 5,
            min_distance_meters: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Resend a failed ON/OFF on later fixes while it is still wanted.
    pub retry_failed_commands: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            retry_failed_commands: true,
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Config {
    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_dir = config_dir();
        std::fs::create_dir_all(&config_dir)?;

        let mut config = Self::load_from(&config_dir.join("config.toml"))?;

        // Set data directory
        config.data_dir = data_dir();
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(config)
    }

    /// Load from `path`, writing the defaults there if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            let content = toml::to_string_pretty(&config)?;
            std::fs::write(path, content)?;
            Ok(config)
        }
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            scan_timeout: Duration::from_secs(self.bluetooth.scan_timeout_secs),
        }
    }

    pub fn fix_request(&self) -> FixRequest {
        FixRequest {
            min_interval: Duration::from_secs(self.location.min_interval_secs),
            min_distance_meters: self.location.min_distance_meters,
        }
    }
}
