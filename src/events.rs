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

//! Messages into and out of the coordinator.

use tokio::sync::mpsc;
use tracing::debug;

use crate::bluetooth::ActuatorCommand;
use crate::geofence::LocationFix;

/// Reported to whoever watches the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// The wristband connection came up (true) or went away (false).
    ConnectionStateChanged(bool),
    /// An actuator write failed.
    CommandFailed {
        command: ActuatorCommand,
        reason: String,
    },
    /// Any other non-fatal failure.
    Error(String),
}

/// External requests handled by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Report the connection if up, otherwise look for the wristband.
    ScanOrReport,
    /// Report the current connection state.
    StatusReport,
    /// Silence the alert until the wearer leaves every region.
    ForceOff,
    /// Evaluate a fix entered by hand.
    Fix(LocationFix),
    /// Disconnect and stop.
    Shutdown,
}

/// Fire-and-forget sender for [`StatusEvent`]s.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    tx: mpsc::Sender<StatusEvent>,
}

impl StatusReporter {
    pub fn new(tx: mpsc::Sender<StatusEvent>) -> Self {
        Self { tx }
    }

    /// Create a reporter and the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StatusEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Deliver an event. A full or closed channel drops it.
    pub fn emit(&self, event: StatusEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!("Status event dropped: {}", e);
        }
    }
}
