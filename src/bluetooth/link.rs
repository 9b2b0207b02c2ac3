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

//! Connection to the wristband.
//!
//! [`PeripheralLink`] keeps at most one connection to the peripheral and
//! exposes a single write primitive for actuator commands. Transport events
//! are consumed by a dedicated pump task, which is the only place that moves
//! the link into `Connected` or back to `Disconnected` (apart from an
//! explicit [`PeripheralLink::disconnect`]).

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::ble_constants::{config, ActuatorCommand, ALERT_RX_UUID, SERVICE_UUID};
use super::transport::{RadioStatus, Resolution, Transport, TransportEvent};
use crate::error::{LinkError, SendError};
use crate::storage::AddressStore;

/// Connection state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// How [`PeripheralLink::discover`] reached the peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectResult {
    /// Connected straight to a known address.
    DirectConnect(String),
    /// Found by scanning; the address has been saved.
    Discovered(String),
}

impl ConnectResult {
    pub fn address(&self) -> &str {
        match self {
            ConnectResult::DirectConnect(address) | ConnectResult::Discovered(address) => address,
        }
    }
}

/// Events delivered to the link's owner.
#[derive(Debug)]
pub enum LinkEvent {
    /// Entered `Connected` (true) or `Disconnected` (false).
    ConnectionStateChanged(bool),
    /// A background discovery finished.
    DiscoveryFinished(Result<ConnectResult, LinkError>),
}

/// Link settings.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub scan_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            scan_timeout: config::DEFAULT_SCAN_TIMEOUT,
        }
    }
}

struct LinkState {
    connection: ConnectionState,
    address: Option<String>,
    resolution: Resolution,
}

struct LinkInner {
    transport: Arc<dyn Transport>,
    addresses: Arc<dyn AddressStore>,
    state: RwLock<LinkState>,
    scanning: AtomicBool,
    config: LinkConfig,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
    transport_tx: mpsc::Sender<TransportEvent>,
}

impl LinkInner {
    fn notify(&self, connected: bool) {
        if self
            .event_tx
            .send(LinkEvent::ConnectionStateChanged(connected))
            .is_err()
        {
            debug!("Link observer gone, dropping state change");
        }
    }
}

/// Clears the scanning flag when a scan ends, however it ends.
struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Queue a transport reports into. The link consumes the receiving end.
pub struct TransportChannel {
    tx: mpsc::Sender<TransportEvent>,
    rx: mpsc::Receiver<TransportEvent>,
}

impl TransportChannel {
    /// Sender to hand to the transport.
    pub fn sender(&self) -> mpsc::Sender<TransportEvent> {
        self.tx.clone()
    }
}

/// Create the queue a transport reports into.
pub fn transport_channel() -> TransportChannel {
    let (tx, rx) = mpsc::channel(32);
    TransportChannel { tx, rx }
}

/// Handle to the wristband connection. Cheap to clone.
#[derive(Clone)]
pub struct PeripheralLink {
    inner: Arc<LinkInner>,
}

impl PeripheralLink {
    /// Create a link and start its event pump.
    ///
    /// `channel` must be the queue the transport was built with; the link
    /// also uses it to report failed connects.
    pub fn new(
        transport: Arc<dyn Transport>,
        channel: TransportChannel,
        addresses: Arc<dyn AddressStore>,
        event_tx: mpsc::UnboundedSender<LinkEvent>,
        config: LinkConfig,
    ) -> Self {
        let inner = Arc::new(LinkInner {
            transport,
            addresses,
            state: RwLock::new(LinkState {
                connection: ConnectionState::Disconnected,
                address: None,
                resolution: Resolution::Pending,
            }),
            scanning: AtomicBool::new(false),
            config,
            event_tx,
            transport_tx: channel.tx,
        });

        tokio::spawn(run_event_pump(Arc::downgrade(&inner), channel.rx));

        Self { inner }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.read().connection
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Address of the current or pending connection.
    pub fn address(&self) -> Option<String> {
        self.inner.state.read().address.clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.scanning.load(Ordering::SeqCst)
    }

    /// Find the wristband and connect to it.
    ///
    /// With a known address this connects directly. Otherwise it scans for
    /// the alert service, saves the first match and connects to it.
    pub async fn discover(&self, known_address: Option<&str>) -> Result<ConnectResult, LinkError> {
        if let Some(address) = known_address {
            info!("Connecting to saved peripheral {}", address);
            self.connect(address);
            return Ok(ConnectResult::DirectConnect(address.to_string()));
        }

        if self.inner.scanning.swap(true, Ordering::SeqCst) {
            warn!("Scan requested while another scan is running");
            return Err(LinkError::ScanInProgress);
        }
        let _guard = ScanGuard(&self.inner.scanning);

        let address = self.scan_for_peripheral().await?;

        if let Err(e) = self.inner.addresses.set_saved_address(&address) {
            error!("Failed to save peripheral address {}: {}", address, e);
        }

        self.connect(&address);
        Ok(ConnectResult::Discovered(address))
    }

    async fn scan_for_peripheral(&self) -> Result<String, LinkError> {
        match self.inner.transport.radio_status().await? {
            RadioStatus::Ready => {}
            RadioStatus::Unavailable => {
                warn!("Bluetooth is disabled");
                return Err(LinkError::AdapterUnavailable);
            }
            RadioStatus::LocationServiceDisabled => {
                warn!("Location services are off, cannot scan");
                return Err(LinkError::LocationServiceDisabled);
            }
        }

        let mut scan = self.inner.transport.start_scan(SERVICE_UUID).await?;
        info!("Started BLE scan for service {}", SERVICE_UUID);

        let outcome = tokio::time::timeout(self.inner.config.scan_timeout, scan.next_match()).await;
        scan.stop();

        match outcome {
            Ok(Some(address)) => {
                info!("Found peripheral {}", address);
                Ok(address)
            }
            Ok(None) => Err(LinkError::Transport(
                "scan ended before a peripheral was found".to_string(),
            )),
            Err(_) => {
                info!(
                    "Stopped BLE scan after {}s timeout",
                    self.inner.config.scan_timeout.as_secs()
                );
                Err(LinkError::ScanTimeout)
            }
        }
    }

    /// Start connecting to `address` without waiting for the outcome.
    ///
    /// Ignored while a connect is pending or a connection is up.
    pub fn connect(&self, address: &str) {
        {
            let mut state = self.inner.state.write();
            match state.connection {
                ConnectionState::Connecting => {
                    debug!("Connect already pending, ignoring request for {}", address);
                    return;
                }
                ConnectionState::Connected => {
                    debug!("Already connected, ignoring request for {}", address);
                    return;
                }
                ConnectionState::Disconnected => {
                    state.connection = ConnectionState::Connecting;
                    state.address = Some(address.to_string());
                    state.resolution = Resolution::Pending;
                }
            }
        }

        info!("Connecting to {}", address);
        let inner = self.inner.clone();
        let address = address.to_string();
        tokio::spawn(async move {
            if let Err(e) = inner.transport.connect(&address).await {
                warn!("Connect to {} failed: {}", address, e);
                let _ = inner
                    .transport_tx
                    .send(TransportEvent::ConnectFailed {
                        address,
                        reason: e.to_string(),
                    })
                    .await;
            }
        });
    }

    /// Write an actuator command to the wristband.
    ///
    /// If the alert service was missing earlier, it is looked up again
    /// before giving up, so a later call can succeed without reconnecting.
    pub async fn send_command(&self, command: ActuatorCommand) -> Result<(), SendError> {
        let (connection, resolution) = {
            let state = self.inner.state.read();
            (state.connection, state.resolution)
        };

        if connection != ConnectionState::Connected {
            warn!("Cannot send '{}': not connected", command);
            return Err(SendError::NotConnected);
        }

        let resolution = match resolution {
            Resolution::Resolved => Resolution::Resolved,
            _ => self.resolve().await,
        };
        match resolution {
            Resolution::Resolved => {}
            Resolution::Pending | Resolution::ServiceMissing => {
                error!("Service {} not found on device", SERVICE_UUID);
                return Err(SendError::ServiceMissing);
            }
            Resolution::CharacteristicMissing => {
                error!(
                    "Found service, but characteristic {} is missing",
                    ALERT_RX_UUID
                );
                return Err(SendError::CharacteristicMissing);
            }
        }

        self.inner
            .transport
            .write(SERVICE_UUID, ALERT_RX_UUID, command.as_bytes())
            .await
            .map_err(|e| SendError::Write(e.to_string()))?;

        info!("Alert payload '{}' sent", command);
        Ok(())
    }

    /// Look up the alert service and remember the result for this connection.
    async fn resolve(&self) -> Resolution {
        let resolution = match self.inner.transport.resolve(SERVICE_UUID, ALERT_RX_UUID).await {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!("Service resolution failed: {}", e);
                Resolution::Pending
            }
        };

        let mut state = self.inner.state.write();
        if state.connection == ConnectionState::Connected {
            state.resolution = resolution;
        }
        resolution
    }

    /// Tear down the connection.
    ///
    /// Always ends `Disconnected` and always notifies, even if the
    /// transport reports an error.
    pub async fn disconnect(&self) {
        if let Err(e) = self.inner.transport.disconnect().await {
            warn!("Transport disconnect failed: {}", e);
        }

        {
            let mut state = self.inner.state.write();
            state.connection = ConnectionState::Disconnected;
            state.resolution = Resolution::Pending;
        }
        info!("Disconnected from peripheral");
        self.inner.notify(false);
    }
}

/// Apply transport events to the link state, one at a time.
async fn run_event_pump(inner: Weak<LinkInner>, mut transport_rx: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = transport_rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let link = PeripheralLink { inner };
        handle_transport_event(&link, event).await;
    }
    debug!("Link event pump stopped");
}

async fn handle_transport_event(link: &PeripheralLink, event: TransportEvent) {
    match event {
        TransportEvent::Connected { address } => {
            let accepted = {
                let mut state = link.inner.state.write();
                match state.connection {
                    ConnectionState::Connecting => {
                        state.connection = ConnectionState::Connected;
                        state.address = Some(address.clone());
                        state.resolution = Resolution::Pending;
                        Some(true)
                    }
                    ConnectionState::Connected => Some(false),
                    ConnectionState::Disconnected => None,
                }
            };

            match accepted {
                Some(true) => {
                    info!("Connected to GATT server {}", address);
                    link.inner.notify(true);
                    match link.resolve().await {
                        Resolution::Resolved => info!("Services discovered"),
                        other => warn!("Alert service not usable yet: {:?}", other),
                    }
                }
                Some(false) => debug!("Duplicate connect event for {}", address),
                None => {
                    // Connection came up after an explicit disconnect.
                    warn!("Dropping stale connection to {}", address);
                    if let Err(e) = link.inner.transport.disconnect().await {
                        warn!("Failed to drop stale connection: {}", e);
                    }
                }
            }
        }
        TransportEvent::Disconnected { address } => {
            if mark_disconnected(link) {
                info!("Disconnected from GATT server {}", address);
                link.inner.notify(false);
            }
        }
        TransportEvent::ConnectFailed { address, reason } => {
            if mark_disconnected(link) {
                warn!("Connection to {} failed: {}", address, reason);
                link.inner.notify(false);
            }
        }
    }
}

/// Move to `Disconnected`. Returns whether that was a transition.
fn mark_disconnected(link: &PeripheralLink) -> bool {
    let mut state = link.inner.state.write();
    if state.connection == ConnectionState::Disconnected {
        return false;
    }
    state.connection = ConnectionState::Disconnected;
    state.resolution = Resolution::Pending;
    true
}
