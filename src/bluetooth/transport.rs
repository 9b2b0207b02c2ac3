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

//! Radio abstraction used by the peripheral link.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

use crate::error::LinkError;

/// Events pushed by a transport into the link's event queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Transport-level connection is up.
    Connected { address: String },
    /// Transport-level connection went away.
    Disconnected { address: String },
    /// A connect attempt failed before reaching `Connected`.
    ConnectFailed { address: String, reason: String },
}

/// Whether the radio can scan right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioStatus {
    Ready,
    /// Radio off or absent.
    Unavailable,
    /// Scanning needs location services that are switched off.
    LocationServiceDisabled,
}

/// Outcome of looking up the alert service on a connected peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Not attempted yet for the current connection.
    Pending,
    Resolved,
    ServiceMissing,
    CharacteristicMissing,
}

/// A running scan.
///
/// Matches arrive on an internal channel; stopping sends a one-shot signal
/// to the transport. Stopping twice is harmless and dropping the handle
/// stops the scan.
pub struct ScanHandle {
    matches: mpsc::Receiver<String>,
    stop_tx: Option<oneshot::Sender<()>>,
}

/// Transport side of a [`ScanHandle`].
pub struct ScanFeed {
    pub matches: mpsc::Sender<String>,
    pub stop_rx: oneshot::Receiver<()>,
}

impl ScanHandle {
    /// Create a connected handle/feed pair.
    pub fn channel() -> (Self, ScanFeed) {
        let (match_tx, match_rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = oneshot::channel();
        (
            Self {
                matches: match_rx,
                stop_tx: Some(stop_tx),
            },
            ScanFeed {
                matches: match_tx,
                stop_rx,
            },
        )
    }

    /// Wait for the next matching address. `None` once the transport ends the scan.
    pub async fn next_match(&mut self) -> Option<String> {
        self.matches.recv().await
    }

    /// Stop the scan. Returns `true` only for the call that actually stopped it.
    pub fn stop(&mut self) -> bool {
        match self.stop_tx.take() {
            Some(tx) => {
                let _ = tx.send(());
                debug!("Scan stop signalled");
                true
            }
            None => false,
        }
    }
}

impl Drop for ScanHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Platform radio used by [`super::PeripheralLink`].
///
/// Implementations report connection changes through the event sender they
/// were built with, never by calling back into the link.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Check whether scanning is currently possible.
    async fn radio_status(&self) -> Result<RadioStatus, LinkError>;

    /// Start an active scan for advertisements carrying `service`.
    async fn start_scan(&self, service: Uuid) -> Result<ScanHandle, LinkError>;

    /// Bring up a connection. Success must also be reported as
    /// [`TransportEvent::Connected`]; failures are only returned.
    async fn connect(&self, address: &str) -> Result<(), LinkError>;

    /// Look up the service and characteristic on the connected peripheral.
    async fn resolve(&self, service: Uuid, characteristic: Uuid) -> Result<Resolution, LinkError>;

    /// Write `payload` to a characteristic of the connected peripheral.
    async fn write(&self, service: Uuid, characteristic: Uuid, payload: &[u8])
        -> Result<(), LinkError>;

    /// Tear down the connection.
    async fn disconnect(&self) -> Result<(), LinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_handle_stop_is_idempotent() {
        let (mut handle, feed) = ScanHandle::channel();
        assert!(handle.stop());
        assert!(!handle.stop());
        assert!(feed.stop_rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_scan_handle_drop_stops() {
        let (handle, feed) = ScanHandle::channel();
        drop(handle);
        assert!(feed.stop_rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_scan_handle_delivers_matches() {
        let (mut handle, feed) = ScanHandle::channel();
        feed.matches.send("AA:BB:CC:DD:EE:FF".into()).await.unwrap();
        drop(feed);
        assert_eq!(handle.next_match().await.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(handle.next_match().await, None);
    }
}
