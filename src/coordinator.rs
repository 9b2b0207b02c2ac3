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

//! Glue between location fixes, the geofence evaluator and the wristband.
//!
//! [`CoordinatorLoop`] runs as a single task. Fixes, external triggers and
//! link events are handled one at a time, so evaluator state needs no lock.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bluetooth::{
    ActuatorCommand, LinkConfig, LinkEvent, PeripheralLink, Transport, TransportChannel,
};
use crate::error::SourceError;
use crate::events::{StatusEvent, StatusReporter, Trigger};
use crate::geofence::{ActuatorState, Decision, GeofenceEvaluator, LocationFix};
use crate::location::FixUpdate;
use crate::state::AppState;
use crate::storage::{AddressStore, RegionSource};

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub link: LinkConfig,
    /// Resend a failed command on later fixes while it is still wanted.
    pub retry_failed_commands: bool,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            retry_failed_commands: true,
        }
    }
}

enum Input {
    Fix(Option<FixUpdate>),
    Trigger(Option<Trigger>),
    Link(Option<LinkEvent>),
}

/// Owns the evaluator and the wristband link.
pub struct CoordinatorLoop {
    link: PeripheralLink,
    link_event_tx: mpsc::UnboundedSender<LinkEvent>,
    link_events: mpsc::UnboundedReceiver<LinkEvent>,
    evaluator: GeofenceEvaluator,
    regions: Arc<dyn RegionSource>,
    addresses: Arc<dyn AddressStore>,
    status: StatusReporter,
    state: Arc<AppState>,
    retry_failed_commands: bool,
    pending_retry: Option<ActuatorCommand>,
    discovery: Option<JoinHandle<()>>,
}

impl CoordinatorLoop {
    /// Build the coordinator and the link it drives.
    ///
    /// `channel` must be the queue `transport` reports into.
    pub fn new(
        transport: Arc<dyn Transport>,
        channel: TransportChannel,
        regions: Arc<dyn RegionSource>,
        addresses: Arc<dyn AddressStore>,
        status: StatusReporter,
        state: Arc<AppState>,
        options: CoordinatorOptions,
    ) -> Self {
        let (link_event_tx, link_events) = mpsc::unbounded_channel();
        let link = PeripheralLink::new(
            transport,
            channel,
            addresses.clone(),
            link_event_tx.clone(),
            options.link,
        );

        Self {
            link,
            link_event_tx,
            link_events,
            evaluator: GeofenceEvaluator::new(),
            regions,
            addresses,
            status,
            state,
            retry_failed_commands: options.retry_failed_commands,
            pending_retry: None,
            discovery: None,
        }
    }

    pub fn link(&self) -> &PeripheralLink {
        &self.link
    }

    pub fn evaluator(&self) -> &GeofenceEvaluator {
        &self.evaluator
    }

    /// Command the evaluator currently wants on the wristband.
    fn desired_command(&self) -> ActuatorCommand {
        match self.evaluator.state() {
            ActuatorState::On => ActuatorCommand::On,
            ActuatorState::Off => ActuatorCommand::Off,
        }
    }

    fn sync_actuator_state(&self) {
        self.state
            .set_actuator(self.evaluator.state(), self.evaluator.is_override_active());
    }

    fn report_error(&self, message: String) {
        self.state.set_last_error(message.clone());
        self.status.emit(StatusEvent::Error(message));
    }

    /// Reconnect to the remembered wristband, if there is one.
    pub fn start(&self) {
        match self.addresses.saved_address() {
            Ok(Some(address)) => {
                info!("Reconnecting to saved wristband {}", address);
                self.link.connect(&address);
            }
            Ok(None) => info!("No saved wristband, waiting for a scan request"),
            Err(e) => {
                error!("Failed to read saved wristband address: {}", e);
                self.report_error(format!("failed to read saved address: {}", e));
            }
        }
    }

    /// Evaluate one fix and drive the wristband accordingly.
    pub async fn handle_fix(&mut self, fix: LocationFix) {
        let regions = match self.regions.list_regions() {
            Ok(regions) => regions,
            Err(e) => {
                error!("Failed to load regions, skipping fix: {}", e);
                self.report_error(format!("failed to load regions: {}", e));
                return;
            }
        };

        self.state.set_last_fix(fix.latitude, fix.longitude);
        let decision = self.evaluator.evaluate(&fix, &regions);
        self.sync_actuator_state();

        match decision {
            Decision::TurnOn => self.send(ActuatorCommand::On).await,
            Decision::TurnOff => self.send(ActuatorCommand::Off).await,
            Decision::NoChange => self.retry_pending().await,
        }
    }

    async fn send(&mut self, command: ActuatorCommand) {
        self.pending_retry = None;
        match self.link.send_command(command).await {
            Ok(()) => debug!("Wristband acknowledged {}", command),
            Err(e) => {
                warn!("Failed to send {}: {}", command, e);
                self.state.set_last_error(format!("{} failed: {}", command, e));
                self.status.emit(StatusEvent::CommandFailed {
                    command,
                    reason: e.to_string(),
                });
                if self.retry_failed_commands {
                    self.pending_retry = Some(command);
                }
            }
        }
    }

    /// Resend a failed command if the evaluator still wants it.
    async fn retry_pending(&mut self) {
        let Some(command) = self.pending_retry else {
            return;
        };
        if command != self.desired_command() {
            debug!("Dropping stale retry of {}", command);
            self.pending_retry = None;
            return;
        }
        if !self.link.is_connected() {
            debug!("Holding retry of {} until the wristband reconnects", command);
            return;
        }

        info!("Retrying {}", command);
        self.send(command).await;
    }

    /// Report the connection if up, otherwise start looking for the wristband.
    pub fn request_scan_or_report(&mut self) {
        if self.link.is_connected() {
            self.status.emit(StatusEvent::ConnectionStateChanged(true));
            return;
        }
        if self.discovery.as_ref().is_some_and(|task| !task.is_finished()) {
            info!("Discovery already running");
            return;
        }

        // Always scan; the saved address is only for the start-up reconnect.
        self.state.set_scanning();

        let link = self.link.clone();
        let tx = self.link_event_tx.clone();
        self.discovery = Some(tokio::spawn(async move {
            let result = link.discover(None).await;
            let _ = tx.send(LinkEvent::DiscoveryFinished(result));
        }));
    }

    pub fn request_status_report(&self) {
        self.status
            .emit(StatusEvent::ConnectionStateChanged(self.link.is_connected()));
    }

    /// Silence the alert until the wearer leaves every region.
    pub async fn request_force_off(&mut self) {
        self.evaluator.force_off();
        self.sync_actuator_state();

        self.pending_retry = None;
        if let Err(e) = self.link.send_command(ActuatorCommand::Off).await {
            warn!("Failed to send OFF after manual override: {}", e);
            if self.retry_failed_commands {
                self.pending_retry = Some(ActuatorCommand::Off);
            }
        }
    }

    pub async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::ConnectionStateChanged(true) => {
                self.state.set_connected(self.link.address());
                self.status.emit(StatusEvent::ConnectionStateChanged(true));
                self.retry_pending().await;
            }
            LinkEvent::ConnectionStateChanged(false) => {
                self.state.set_disconnected();
                self.status.emit(StatusEvent::ConnectionStateChanged(false));
            }
            LinkEvent::DiscoveryFinished(Ok(result)) => {
                info!("Discovery finished, connecting to {}", result.address());
            }
            LinkEvent::DiscoveryFinished(Err(e)) => {
                error!("Discovery failed: {}", e);
                if self.link.is_connected() {
                    self.report_error(e.to_string());
                } else {
                    self.state.set_error(e.to_string());
                    self.status.emit(StatusEvent::Error(e.to_string()));
                }
            }
        }
    }

    async fn handle_trigger(&mut self, trigger: Trigger) {
        match trigger {
            Trigger::ScanOrReport => self.request_scan_or_report(),
            Trigger::StatusReport => self.request_status_report(),
            Trigger::ForceOff => self.request_force_off().await,
            Trigger::Fix(fix) => self.handle_fix(fix).await,
            Trigger::Shutdown => {}
        }
    }

    fn handle_source_error(&self, err: SourceError) {
        match err {
            SourceError::Malformed(line) => warn!("Ignoring malformed fix: {}", line),
            other => {
                error!("Location source failed: {}", other);
                self.report_error(format!("location source: {}", other));
            }
        }
    }

    /// Run until a shutdown trigger arrives or the trigger channel closes.
    ///
    /// Without a fix stream the coordinator still serves triggers, including
    /// fixes entered by hand.
    pub async fn run(
        mut self,
        mut fixes: Option<mpsc::Receiver<FixUpdate>>,
        mut triggers: mpsc::Receiver<Trigger>,
    ) {
        self.start();

        loop {
            let input = tokio::select! {
                update = next_fix(&mut fixes) => Input::Fix(update),
                trigger = triggers.recv() => Input::Trigger(trigger),
                event = self.link_events.recv() => Input::Link(event),
            };

            match input {
                Input::Fix(Some(Ok(fix))) => self.handle_fix(fix).await,
                Input::Fix(Some(Err(e))) => self.handle_source_error(e),
                Input::Fix(None) => {
                    info!("Location source closed");
                    fixes = None;
                }
                Input::Trigger(Some(Trigger::Shutdown)) | Input::Trigger(None) => break,
                Input::Trigger(Some(trigger)) => self.handle_trigger(trigger).await,
                Input::Link(Some(event)) => self.handle_link_event(event).await,
                Input::Link(None) => {}
            }
        }

        self.shutdown(fixes).await;
    }

    async fn shutdown(&mut self, fixes: Option<mpsc::Receiver<FixUpdate>>) {
        info!("Shutting down coordinator");
        drop(fixes);
        if let Some(task) = self.discovery.take() {
            task.abort();
        }
        self.link.disconnect().await;

        // Relay the final transition.
        while let Ok(event) = self.link_events.try_recv() {
            if let LinkEvent::ConnectionStateChanged(connected) = event {
                self.status.emit(StatusEvent::ConnectionStateChanged(connected));
            }
        }
        self.state.set_disconnected();
    }
}

async fn next_fix(fixes: &mut Option<mpsc::Receiver<FixUpdate>>) -> Option<FixUpdate> {
    match fixes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{
        transport_channel, RadioStatus, Resolution, ScanFeed, ScanHandle, TransportEvent,
    };
    use crate::error::LinkError;
    use crate::geofence::Region;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    struct FakeTransport {
        events: mpsc::Sender<TransportEvent>,
        connect_ok: AtomicBool,
        write_ok: AtomicBool,
        scan_feed: Mutex<Option<ScanFeed>>,
        writes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn radio_status(&self) -> Result<RadioStatus, LinkError> {
            Ok(RadioStatus::Ready)
        }

        async fn start_scan(&self, _service: Uuid) -> Result<ScanHandle, LinkError> {
            let (handle, feed) = ScanHandle::channel();
            *self.scan_feed.lock() = Some(feed);
            Ok(handle)
        }

        async fn connect(&self, address: &str) -> Result<(), LinkError> {
            if !self.connect_ok.load(Ordering::SeqCst) {
                return Err(LinkError::Transport("page timeout".into()));
            }
            let _ = self
                .events
                .send(TransportEvent::Connected {
                    address: address.to_string(),
                })
                .await;
            Ok(())
        }

        async fn resolve(&self, _s: Uuid, _c: Uuid) -> Result<Resolution, LinkError> {
            Ok(Resolution::Resolved)
        }

        async fn write(&self, _s: Uuid, _c: Uuid, payload: &[u8]) -> Result<(), LinkError> {
            if !self.write_ok.load(Ordering::SeqCst) {
                return Err(LinkError::Transport("gatt error".into()));
            }
            self.writes
                .lock()
                .push(String::from_utf8_lossy(payload).into_owned());
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), LinkError> {
            Ok(())
        }
    }

    struct FixedRegions(Mutex<anyhow::Result<Vec<Region>>>);

    impl RegionSource for FixedRegions {
        fn list_regions(&self) -> anyhow::Result<Vec<Region>> {
            match &*self.0.lock() {
                Ok(regions) => Ok(regions.clone()),
                Err(e) => Err(anyhow::anyhow!("{}", e)),
            }
        }
    }

    #[derive(Default)]
    struct MemoryAddresses(Mutex<Option<String>>);

    impl AddressStore for MemoryAddresses {
        fn saved_address(&self) -> anyhow::Result<Option<String>> {
            Ok(self.0.lock().clone())
        }

        fn set_saved_address(&self, address: &str) -> anyhow::Result<()> {
            *self.0.lock() = Some(address.to_string());
            Ok(())
        }

        fn clear(&self) -> anyhow::Result<()> {
            *self.0.lock() = None;
            Ok(())
        }
    }

    struct Harness {
        coordinator: CoordinatorLoop,
        transport: Arc<FakeTransport>,
        regions: Arc<FixedRegions>,
        addresses: Arc<MemoryAddresses>,
        status: mpsc::Receiver<StatusEvent>,
    }

    fn harness(retry_failed_commands: bool) -> Harness {
        let channel = transport_channel();
        let transport = Arc::new(FakeTransport {
            events: channel.sender(),
            connect_ok: AtomicBool::new(true),
            write_ok: AtomicBool::new(true),
            scan_feed: Mutex::new(None),
            writes: Mutex::new(Vec::new()),
        });
        let regions = Arc::new(FixedRegions(Mutex::new(Ok(vec![Region::new(
            1, "Home", 40.0, -75.0, 50.0,
        )]))));
        let addresses = Arc::new(MemoryAddresses::default());
        let (reporter, status) = StatusReporter::channel(32);

        let coordinator = CoordinatorLoop::new(
            transport.clone(),
            channel,
            regions.clone(),
            addresses.clone(),
            reporter,
            AppState::new(),
            CoordinatorOptions {
                link: LinkConfig {
                    scan_timeout: Duration::from_millis(200),
                },
                retry_failed_commands,
            },
        );

        Harness {
            coordinator,
            transport,
            regions,
            addresses,
            status,
        }
    }

    const INSIDE: (f64, f64) = (40.0003, -75.0);
    const OUTSIDE: (f64, f64) = (40.0010, -75.0);

    fn fix(point: (f64, f64)) -> LocationFix {
        LocationFix::now(point.0, point.1)
    }

    /// Connect and feed the resulting link event through the coordinator.
    async fn connect(h: &mut Harness) {
        h.coordinator.link().connect("AA:BB:CC:DD:EE:FF");
        pump_link_event(h).await;
        assert!(h.coordinator.link().is_connected());
    }

    async fn pump_link_event(h: &mut Harness) {
        let event = tokio::time::timeout(Duration::from_secs(2), h.coordinator.link_events.recv())
            .await
            .expect("timed out waiting for link event")
            .expect("link events closed");
        h.coordinator.handle_link_event(event).await;
        // Let the link's own resolve step finish.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn drain(status: &mut mpsc::Receiver<StatusEvent>) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        while let Ok(event) = status.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_enter_and_exit_sends_commands() {
        let mut h = harness(true);
        connect(&mut h).await;

        h.coordinator.handle_fix(fix(INSIDE)).await;
        h.coordinator.handle_fix(fix(INSIDE)).await;
        h.coordinator.handle_fix(fix(OUTSIDE)).await;
        h.coordinator.handle_fix(fix(OUTSIDE)).await;

        assert_eq!(h.transport.writes.lock().as_slice(), &["ON", "OFF"]);
        assert_eq!(
            drain(&mut h.status),
            vec![StatusEvent::ConnectionStateChanged(true)]
        );
    }

    #[tokio::test]
    async fn test_send_failure_is_reported_not_reverted() {
        let mut h = harness(false);

        // Not connected: the decision still flips the evaluator.
        h.coordinator.handle_fix(fix(INSIDE)).await;
        assert_eq!(h.coordinator.evaluator().state(), ActuatorState::On);
        assert_eq!(
            drain(&mut h.status),
            vec![StatusEvent::CommandFailed {
                command: ActuatorCommand::On,
                reason: "peripheral is not connected".into(),
            }]
        );

        // Without reconciliation the failed ON is never resent.
        connect(&mut h).await;
        h.coordinator.handle_fix(fix(INSIDE)).await;
        assert!(h.transport.writes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_command_is_retried_on_later_fix() {
        let mut h = harness(true);
        connect(&mut h).await;

        h.transport.write_ok.store(false, Ordering::SeqCst);
        h.coordinator.handle_fix(fix(INSIDE)).await;
        assert!(matches!(
            drain(&mut h.status).last(),
            Some(StatusEvent::CommandFailed { command: ActuatorCommand::On, .. })
        ));

        h.transport.write_ok.store(true, Ordering::SeqCst);
        h.coordinator.handle_fix(fix(INSIDE)).await;
        h.coordinator.handle_fix(fix(INSIDE)).await;
        // Retried once, then the pending retry is cleared.
        assert_eq!(h.transport.writes.lock().as_slice(), &["ON"]);
    }

    #[tokio::test]
    async fn test_stale_retry_is_dropped() {
        let mut h = harness(true);
        connect(&mut h).await;

        h.transport.write_ok.store(false, Ordering::SeqCst);
        h.coordinator.handle_fix(fix(INSIDE)).await;
        h.transport.write_ok.store(true, Ordering::SeqCst);

        // Leaving replaces the failed ON with a fresh OFF.
        h.coordinator.handle_fix(fix(OUTSIDE)).await;
        h.coordinator.handle_fix(fix(OUTSIDE)).await;
        assert_eq!(h.transport.writes.lock().as_slice(), &["OFF"]);
    }

    #[tokio::test]
    async fn test_retry_waits_for_reconnect() {
        let mut h = harness(true);
        h.coordinator.handle_fix(fix(INSIDE)).await;
        h.coordinator.handle_fix(fix(INSIDE)).await;
        assert!(h.transport.writes.lock().is_empty());

        connect(&mut h).await;
        assert_eq!(h.transport.writes.lock().as_slice(), &["ON"]);
    }

    #[tokio::test]
    async fn test_region_read_failure_skips_fix() {
        let mut h = harness(true);
        connect(&mut h).await;
        drain(&mut h.status);

        *h.regions.0.lock() = Err(anyhow::anyhow!("database is locked"));
        h.coordinator.handle_fix(fix(INSIDE)).await;

        assert_eq!(h.coordinator.evaluator().state(), ActuatorState::Off);
        assert!(h.transport.writes.lock().is_empty());
        assert!(matches!(
            drain(&mut h.status).as_slice(),
            [StatusEvent::Error(message)] if message.contains("database is locked")
        ));
    }

    #[tokio::test]
    async fn test_force_off() {
        let mut h = harness(true);
        connect(&mut h).await;

        h.coordinator.handle_fix(fix(INSIDE)).await;
        h.coordinator.request_force_off().await;
        assert!(h.coordinator.evaluator().is_override_active());

        h.coordinator.handle_fix(fix(INSIDE)).await;
        h.coordinator.handle_fix(fix(OUTSIDE)).await;
        h.coordinator.handle_fix(fix(INSIDE)).await;
        assert_eq!(h.transport.writes.lock().as_slice(), &["ON", "OFF", "ON"]);
    }

    #[tokio::test]
    async fn test_force_off_while_disconnected_is_quiet() {
        let mut h = harness(false);
        h.coordinator.request_force_off().await;
        assert!(drain(&mut h.status).is_empty());
        assert!(h.coordinator.evaluator().is_override_active());
    }

    #[tokio::test]
    async fn test_status_report() {
        let mut h = harness(true);
        h.coordinator.request_status_report();
        assert_eq!(
            drain(&mut h.status),
            vec![StatusEvent::ConnectionStateChanged(false)]
        );

        connect(&mut h).await;
        drain(&mut h.status);
        h.coordinator.request_status_report();
        h.coordinator.request_scan_or_report();
        assert_eq!(
            drain(&mut h.status),
            vec![
                StatusEvent::ConnectionStateChanged(true),
                StatusEvent::ConnectionStateChanged(true)
            ]
        );
        assert!(h.transport.scan_feed.lock().is_none());
    }

    #[tokio::test]
    async fn test_scan_discovers_and_connects() {
        let mut h = harness(true);
        h.coordinator.request_scan_or_report();

        let feed = loop {
            if let Some(feed) = h.transport.scan_feed.lock().take() {
                break feed;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        feed.matches.send("C0:FF:EE:00:11:22".into()).await.unwrap();

        // Discovery result and the connection, in either order.
        pump_link_event(&mut h).await;
        pump_link_event(&mut h).await;

        assert!(h.coordinator.link().is_connected());
        assert_eq!(
            h.addresses.saved_address().unwrap().as_deref(),
            Some("C0:FF:EE:00:11:22")
        );
        assert_eq!(
            drain(&mut h.status),
            vec![StatusEvent::ConnectionStateChanged(true)]
        );
    }

    #[tokio::test]
    async fn test_scan_request_scans_even_with_saved_address() {
        let mut h = harness(true);
        h.addresses.set_saved_address("AA:BB:CC:DD:EE:FF").unwrap();
        h.transport.connect_ok.store(false, Ordering::SeqCst);

        // The saved wristband is gone.
        h.coordinator.start();
        pump_link_event(&mut h).await;
        assert!(!h.coordinator.link().is_connected());

        h.transport.connect_ok.store(true, Ordering::SeqCst);
        h.coordinator.request_scan_or_report();
        let feed = loop {
            if let Some(feed) = h.transport.scan_feed.lock().take() {
                break feed;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        feed.matches.send("C0:FF:EE:00:11:22".into()).await.unwrap();

        pump_link_event(&mut h).await;
        pump_link_event(&mut h).await;
        assert!(h.coordinator.link().is_connected());
        assert_eq!(
            h.addresses.saved_address().unwrap().as_deref(),
            Some("C0:FF:EE:00:11:22")
        );
    }

    #[tokio::test]
    async fn test_scan_timeout_is_reported() {
        let mut h = harness(true);
        h.coordinator.request_scan_or_report();
        pump_link_event(&mut h).await;
        assert_eq!(
            drain(&mut h.status),
            vec![StatusEvent::Error(LinkError::ScanTimeout.to_string())]
        );
    }

    async fn wait_for_writes(transport: &FakeTransport, count: usize) {
        for _ in 0..200 {
            if transport.writes.lock().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} writes", count);
    }

    #[tokio::test]
    async fn test_run_reconnects_saved_and_disconnects_on_shutdown() {
        let Harness {
            coordinator,
            transport,
            addresses,
            mut status,
            ..
        } = harness(true);
        addresses.set_saved_address("AA:BB:CC:DD:EE:FF").unwrap();

        let (fix_tx, fix_rx) = mpsc::channel(4);
        let (trigger_tx, trigger_rx) = mpsc::channel(4);
        let task = tokio::spawn(coordinator.run(Some(fix_rx), trigger_rx));

        let first = tokio::time::timeout(Duration::from_secs(2), status.recv())
            .await
            .unwrap();
        assert_eq!(first, Some(StatusEvent::ConnectionStateChanged(true)));

        fix_tx
            .send(Err(SourceError::Malformed("junk".into())))
            .await
            .unwrap();
        fix_tx.send(Ok(fix(INSIDE))).await.unwrap();
        wait_for_writes(&transport, 1).await;

        // The fix stream ending does not stop the loop.
        drop(fix_tx);
        trigger_tx.send(Trigger::Fix(fix(OUTSIDE))).await.unwrap();
        wait_for_writes(&transport, 2).await;

        trigger_tx.send(Trigger::Shutdown).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(transport.writes.lock().as_slice(), &["ON", "OFF"]);
        assert_eq!(
            status.recv().await,
            Some(StatusEvent::ConnectionStateChanged(false))
        );
    }
}
