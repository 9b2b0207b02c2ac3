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

//! BLE service and characteristic UUIDs of the wristband.

use uuid::Uuid;

/// Alert GATT service UUID (Nordic UART Service).
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// Alert RX characteristic UUID (we write actuator commands here).
/// Properties: Write
pub const ALERT_RX_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// Link timing constants.
pub mod config {
    use std::time::Duration;

    /// Default upper bound for a discovery scan.
    pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(30);

    /// How long to wait for BlueZ to finish resolving services.
    pub const SERVICE_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

    /// Poll interval while waiting for service resolution.
    pub const SERVICE_RESOLVE_POLL: Duration = Duration::from_millis(250);
}

/// Actuator command written to the alert characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCommand {
    On,
    Off,
}

impl ActuatorCommand {
    /// ASCII token sent over the air.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActuatorCommand::On => "ON",
            ActuatorCommand::Off => "OFF",
        }
    }

    pub fn as_bytes(&self) -> &'static [u8] {
        self.as_str().as_bytes()
    }
}

impl std::fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
