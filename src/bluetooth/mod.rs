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

//! Bluetooth communication module.
//!
//! Acts as a BLE central for the wristband: scans for the alert service,
//! keeps one GATT connection and writes actuator commands to it.

pub mod ble_constants;
mod bluez;
mod link;
mod transport;

pub use ble_constants::{ActuatorCommand, ALERT_RX_UUID, SERVICE_UUID};
pub use bluez::BluezTransport;
pub use link::{
    transport_channel, ConnectResult, ConnectionState, LinkConfig, LinkEvent, PeripheralLink,
    TransportChannel,
};
pub use transport::{RadioStatus, Resolution, ScanFeed, ScanHandle, Transport, TransportEvent};
