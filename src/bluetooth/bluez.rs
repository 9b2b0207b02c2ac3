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

//! BlueZ transport for the wristband link.

use anyhow::Result;
use async_trait::async_trait;
use bluer::gatt::remote::Characteristic;
use bluer::{
    Adapter, AdapterEvent, Address, AddressType, Device, DeviceEvent, DeviceProperty,
    DiscoveryFilter, DiscoveryTransport,
};
use futures::{Stream, StreamExt};
use std::collections::HashSet;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::ble_constants::config;
use super::transport::{RadioStatus, Resolution, ScanFeed, ScanHandle, Transport, TransportEvent};
use crate::error::LinkError;

/// Result of looking for the alert characteristic.
enum Lookup {
    Found(Characteristic),
    ServiceMissing,
    CharacteristicMissing,
}

struct ConnectedDevice {
    device: Device,
    monitor: JoinHandle<()>,
    /// Characteristic found by the last successful lookup, keyed by UUIDs.
    alert: Option<(Uuid, Uuid, Characteristic)>,
}

/// BLE central backed by BlueZ over D-Bus.
pub struct BluezTransport {
    adapter: Adapter,
    events: mpsc::Sender<TransportEvent>,
    connected: Mutex<Option<ConnectedDevice>>,
}

impl BluezTransport {
    /// Open a BlueZ session on the named adapter, or the default one.
    pub async fn new(adapter_name: Option<&str>, events: mpsc::Sender<TransportEvent>) -> Result<Self> {
        info!("Initializing BlueZ transport...");

        let session = bluer::Session::new().await?;
        info!("BlueZ session created");

        let adapter = match adapter_name {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        info!("Using Bluetooth adapter: {}", adapter.name());

        // Ensure adapter is powered on
        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            if let Err(e) = adapter.set_powered(true).await {
                warn!("Could not power on adapter: {}", e);
            }
        }

        Ok(Self {
            adapter,
            events,
            connected: Mutex::new(None),
        })
    }

    async fn current_device(&self) -> Option<Device> {
        self.connected.lock().await.as_ref().map(|c| c.device.clone())
    }

    async fn cached_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Option<Characteristic> {
        let connected = self.connected.lock().await;
        cached_for(connected.as_ref()?.alert.as_ref(), service, characteristic)
    }

    /// Remember `ch` if `device` is still the connected one.
    async fn cache_characteristic(
        &self,
        device: &Device,
        service: Uuid,
        characteristic: Uuid,
        ch: Characteristic,
    ) {
        if let Some(connected) = self.connected.lock().await.as_mut() {
            if connected.device.address() == device.address() {
                connected.alert = Some((service, characteristic, ch));
            }
        }
    }

    /// Wait until BlueZ has finished service discovery for `device`.
    async fn wait_services_resolved(device: &Device) -> Result<(), LinkError> {
        let deadline = tokio::time::Instant::now() + config::SERVICE_RESOLVE_TIMEOUT;
        while !device.is_services_resolved().await? {
            if tokio::time::Instant::now() >= deadline {
                warn!("Timed out waiting for service discovery");
                break;
            }
            tokio::time::sleep(config::SERVICE_RESOLVE_POLL).await;
        }
        Ok(())
    }

    async fn lookup(device: &Device, service: Uuid, characteristic: Uuid) -> Result<Lookup, LinkError> {
        Self::wait_services_resolved(device).await?;

        let services = device.services().await?;
        for remote in &services {
            if remote.uuid().await? != service {
                continue;
            }
            for ch in remote.characteristics().await? {
                if ch.uuid().await? == characteristic {
                    return Ok(Lookup::Found(ch));
                }
            }
            return Ok(Lookup::CharacteristicMissing);
        }

        for remote in &services {
            if let Ok(uuid) = remote.uuid().await {
                debug!("Available service UUID: {}", uuid);
            }
        }
        Ok(Lookup::ServiceMissing)
    }
}

#[async_trait]
impl Transport for BluezTransport {
    async fn radio_status(&self) -> Result<RadioStatus, LinkError> {
        match self.adapter.is_powered().await {
            Ok(true) => Ok(RadioStatus::Ready),
            Ok(false) => Ok(RadioStatus::Unavailable),
            Err(e) => {
                warn!("Adapter status unavailable: {}", e);
                Ok(RadioStatus::Unavailable)
            }
        }
    }

    async fn start_scan(&self, service: Uuid) -> Result<ScanHandle, LinkError> {
        let filter = DiscoveryFilter {
            uuids: HashSet::from([service]),
            transport: DiscoveryTransport::Le,
            ..Default::default()
        };
        self.adapter.set_discovery_filter(filter).await?;

        // Property changes come back as `DeviceAdded` too, so a cached
        // device is picked up once it starts advertising.
        let stream = self.adapter.discover_devices_with_changes().await?;
        let (handle, feed) = ScanHandle::channel();
        tokio::spawn(scan_loop(self.adapter.clone(), stream, service, feed));

        Ok(handle)
    }

    async fn connect(&self, address: &str) -> Result<(), LinkError> {
        let addr: Address = address
            .parse()
            .map_err(|_| LinkError::Transport(format!("invalid device address: {}", address)))?;

        let device = self.adapter.device(addr)?;
        let device = match device.connect().await {
            Ok(()) => device,
            Err(e)
                if matches!(
                    e.kind,
                    bluer::ErrorKind::DoesNotExist | bluer::ErrorKind::Internal(_)
                ) =>
            {
                // Not cached by BlueZ yet (no scan this session).
                debug!("Device {} unknown to BlueZ, connecting by address", addr);
                self.adapter.connect_device(addr, AddressType::LePublic).await?
            }
            Err(e) => return Err(e.into()),
        };
        info!("Connected to {}", addr);

        let monitor = tokio::spawn(monitor_device(
            device.clone(),
            address.to_string(),
            self.events.clone(),
        ));
        if let Some(previous) = self
            .connected
            .lock()
            .await
            .replace(ConnectedDevice {
                device,
                monitor,
                alert: None,
            })
        {
            previous.monitor.abort();
        }

        let _ = self
            .events
            .send(TransportEvent::Connected {
                address: address.to_string(),
            })
            .await;
        Ok(())
    }

    async fn resolve(&self, service: Uuid, characteristic: Uuid) -> Result<Resolution, LinkError> {
        let Some(device) = self.current_device().await else {
            return Ok(Resolution::Pending);
        };

        Ok(match Self::lookup(&device, service, characteristic).await? {
            Lookup::Found(ch) => {
                self.cache_characteristic(&device, service, characteristic, ch)
                    .await;
                Resolution::Resolved
            }
            Lookup::ServiceMissing => Resolution::ServiceMissing,
            Lookup::CharacteristicMissing => Resolution::CharacteristicMissing,
        })
    }

    async fn write(&self, service: Uuid, characteristic: Uuid, payload: &[u8]) -> Result<(), LinkError> {
        if let Some(ch) = self.cached_characteristic(service, characteristic).await {
            ch.write(payload).await?;
            return Ok(());
        }

        let device = self
            .current_device()
            .await
            .ok_or_else(|| LinkError::Transport("no connected device".to_string()))?;

        match Self::lookup(&device, service, characteristic).await? {
            Lookup::Found(ch) => {
                ch.write(payload).await?;
                self.cache_characteristic(&device, service, characteristic, ch)
                    .await;
                Ok(())
            }
            Lookup::ServiceMissing => Err(LinkError::Transport(format!(
                "service {} not found",
                service
            ))),
            Lookup::CharacteristicMissing => Err(LinkError::Transport(format!(
                "characteristic {} not found",
                characteristic
            ))),
        }
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        let Some(connected) = self.connected.lock().await.take() else {
            return Ok(());
        };
        connected.monitor.abort();
        connected.device.disconnect().await?;
        info!("Disconnected from {}", connected.device.address());
        Ok(())
    }
}

/// Forward advertisements carrying `service` until stopped.
async fn scan_loop<S>(adapter: Adapter, stream: S, service: Uuid, feed: ScanFeed)
where
    S: Stream<Item = AdapterEvent> + Send + 'static,
{
    let ScanFeed {
        matches,
        mut stop_rx,
    } = feed;
    let mut stream = Box::pin(stream);

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                debug!("Discovery stopped");
                break;
            }
            event = stream.next() => match event {
                Some(AdapterEvent::DeviceAdded(addr)) => {
                    if seen_advertising(&adapter, addr, service).await {
                        info!("Found device: {}", addr);
                        if matches.send(addr.to_string()).await.is_err() {
                            break;
                        }
                    }
                }
                Some(_) => {}
                None => {
                    warn!("Discovery stream ended");
                    break;
                }
            }
        }
    }
    // Dropping the stream ends discovery on the adapter.
}

/// Whether `addr` is advertising `service` in this discovery.
async fn seen_advertising(adapter: &Adapter, addr: Address, service: Uuid) -> bool {
    let Ok(device) = adapter.device(addr) else {
        return false;
    };
    let rssi = match device.rssi().await {
        Ok(rssi) => rssi,
        Err(e) => {
            debug!("Could not read RSSI of {}: {}", addr, e);
            return false;
        }
    };
    let uuids = match device.uuids().await {
        Ok(uuids) => uuids,
        Err(e) => {
            debug!("Could not read UUIDs of {}: {}", addr, e);
            return false;
        }
    };
    is_live_match(rssi, uuids.as_ref(), service)
}

fn cached_for<T: Clone>(alert: Option<&(Uuid, Uuid, T)>, service: Uuid, characteristic: Uuid) -> Option<T> {
    match alert? {
        (s, c, ch) if *s == service && *c == characteristic => Some(ch.clone()),
        _ => None,
    }
}

/// BlueZ replays devices it already knows when discovery starts. Those have
/// no RSSI until an advertisement is actually received.
fn is_live_match(rssi: Option<i16>, uuids: Option<&HashSet<Uuid>>, service: Uuid) -> bool {
    rssi.is_some() && uuids.is_some_and(|uuids| uuids.contains(&service))
}

/// Report when BlueZ drops the connection.
async fn monitor_device(device: Device, address: String, events: mpsc::Sender<TransportEvent>) {
    let stream = match device.events().await {
        Ok(stream) => stream,
        Err(e) => {
            error!("Cannot watch {} for disconnects: {}", address, e);
            return;
        }
    };
    let mut stream = Box::pin(stream);

    while let Some(event) = stream.next().await {
        if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
            let _ = events.send(TransportEvent::Disconnected { address }).await;
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{ALERT_RX_UUID, SERVICE_UUID};

    #[test]
    fn test_live_match_needs_rssi_and_service() {
        let advertised = HashSet::from([SERVICE_UUID]);
        let other = HashSet::from([Uuid::from_u128(0x180d)]);

        assert!(is_live_match(Some(-60), Some(&advertised), SERVICE_UUID));
        // Cached from an earlier session, not advertising now.
        assert!(!is_live_match(None, Some(&advertised), SERVICE_UUID));
        assert!(!is_live_match(Some(-60), Some(&other), SERVICE_UUID));
        assert!(!is_live_match(Some(-60), None, SERVICE_UUID));
    }

    #[test]
    fn test_cached_characteristic_is_keyed_by_uuids() {
        let entry = (SERVICE_UUID, ALERT_RX_UUID, "alert");
        assert_eq!(
            cached_for(Some(&entry), SERVICE_UUID, ALERT_RX_UUID),
            Some("alert")
        );
        assert_eq!(cached_for(Some(&entry), SERVICE_UUID, SERVICE_UUID), None);
        assert_eq!(cached_for::<&str>(None, SERVICE_UUID, ALERT_RX_UUID), None);
    }
}
