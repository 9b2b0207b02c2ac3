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

//! Storage for the remembered wristband address.

use anyhow::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use super::AddressStore;

/// The peripheral found by the last successful scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SavedPeripheral {
    address: String,
    saved_at: chrono::DateTime<chrono::Local>,
}

/// JSON-backed peripheral store.
pub struct PeripheralStore {
    path: PathBuf,
    saved: RwLock<Option<SavedPeripheral>>,
}

impl PeripheralStore {
    /// Create or open the store.
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join("peripheral.json");
        let saved = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Some(serde_json::from_str(&content)?)
        } else {
            None
        };

        Ok(Self {
            path,
            saved: RwLock::new(saved),
        })
    }

    fn save(&self, record: &SavedPeripheral) -> Result<()> {
        let content = serde_json::to_string_pretty(record)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl AddressStore for PeripheralStore {
    fn saved_address(&self) -> Result<Option<String>> {
        Ok(self.saved.read().as_ref().map(|p| p.address.clone()))
    }

    fn set_saved_address(&self, address: &str) -> Result<()> {
        let record = SavedPeripheral {
            address: address.to_string(),
            saved_at: chrono::Local::now(),
        };
        self.save(&record)?;
        *self.saved.write() = Some(record);
        info!("Saved peripheral address {}", address);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.saved.write() = None;
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        info!("Forgot saved peripheral");
        Ok(())
    }
}
