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

//! Application state management.

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::geofence::ActuatorState;

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Scanning,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Scanning => "Scanning...",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Error => "Error",
        }
    }
}

/// Last fix the coordinator evaluated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastFix {
    pub latitude: f64,
    pub longitude: f64,
    pub received_at: DateTime<Local>,
}

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// Current connection status.
    pub connection_status: RwLock<ConnectionStatus>,

    /// Address of the connected wristband.
    pub peripheral_address: RwLock<Option<String>>,

    /// Actuator state as last decided by the evaluator.
    pub actuator_state: RwLock<ActuatorState>,

    /// Whether the manual override is holding the alert off.
    pub override_active: RwLock<bool>,

    pub last_fix: RwLock<Option<LastFix>>,

    pub last_error: RwLock<Option<String>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            connection_status: RwLock::new(ConnectionStatus::Disconnected),
            peripheral_address: RwLock::new(None),
            actuator_state: RwLock::new(ActuatorState::Off),
            override_active: RwLock::new(false),
            last_fix: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_connected(&self, address: Option<String>) {
        *self.connection_status.write() = ConnectionStatus::Connected;
        *self.peripheral_address.write() = address;
    }

    pub fn set_disconnected(&self) {
        *self.connection_status.write() = ConnectionStatus::Disconnected;
        *self.peripheral_address.write() = None;
    }

    pub fn set_scanning(&self) {
        *self.connection_status.write() = ConnectionStatus::Scanning;
    }

    pub fn set_error(&self, message: String) {
        *self.connection_status.write() = ConnectionStatus::Error;
        *self.last_error.write() = Some(message);
    }

    /// Record a failure without touching the connection status.
    pub fn set_last_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    pub fn set_actuator(&self, state: ActuatorState, override_active: bool) {
        *self.actuator_state.write() = state;
        *self.override_active.write() = override_active;
    }

    pub fn set_last_fix(&self, latitude: f64, longitude: f64) {
        *self.last_fix.write() = Some(LastFix {
            latitude,
            longitude,
            received_at: Local::now(),
        });
    }

    pub fn get_status(&self) -> ConnectionStatus {
        *self.connection_status.read()
    }

    pub fn get_address(&self) -> Option<String> {
        self.peripheral_address.read().clone()
    }

    pub fn get_actuator_state(&self) -> ActuatorState {
        *self.actuator_state.read()
    }

    pub fn is_override_active(&self) -> bool {
        *self.override_active.read()
    }

    pub fn get_last_fix(&self) -> Option<LastFix> {
        *self.last_fix.read()
    }

    pub fn get_last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// One-line description for the console.
    pub fn summary(&self) -> String {
        let mut summary = match self.get_address() {
            Some(address) => format!("{} ({})", self.get_status().as_str(), address),
            None => self.get_status().as_str().to_string(),
        };

        summary.push_str(&format!(", alert {}", self.get_actuator_state().as_str()));
        if self.is_override_active() {
            summary.push_str(" (override)");
        }

        match self.get_last_fix() {
            Some(fix) => summary.push_str(&format!(
                ", last fix {:.5},{:.5} at {}",
                fix.latitude,
                fix.longitude,
                fix.received_at.format("%H:%M:%S")
            )),
            None => summary.push_str(", no fix yet"),
        }

        if let Some(error) = self.get_last_error() {
            summary.push_str(&format!(", last error: {}", error));
        }
        summary
    }
}
