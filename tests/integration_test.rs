//! Integration tests for the full fix-to-wristband flow.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use wristband_companion::bluetooth::{
    transport_channel, LinkConfig, RadioStatus, Resolution, ScanFeed, ScanHandle, Transport,
    TransportEvent, SERVICE_UUID,
};
use wristband_companion::console::{Console, ConsoleCommand};
use wristband_companion::coordinator::{CoordinatorLoop, CoordinatorOptions};
use wristband_companion::error::LinkError;
use wristband_companion::events::{StatusEvent, StatusReporter};
use wristband_companion::location::{FixRequest, FixSource, LineFixSource};
use wristband_companion::state::{AppState, ConnectionStatus};
use wristband_companion::storage::{AddressStore, PeripheralStore, RegionStore};

/// Wristband that connects instantly and records every write.
struct FakeWristband {
    events: mpsc::Sender<TransportEvent>,
    scan_feed: Mutex<Option<ScanFeed>>,
    scanned_for: Mutex<Option<Uuid>>,
    writes: Mutex<Vec<String>>,
}

#[async_trait]
impl Transport for FakeWristband {
    async fn radio_status(&self) -> Result<RadioStatus, LinkError> {
        Ok(RadioStatus::Ready)
    }

    async fn start_scan(&self, service: Uuid) -> Result<ScanHandle, LinkError> {
        let (handle, feed) = ScanHandle::channel();
        *self.scanned_for.lock() = Some(service);
        *self.scan_feed.lock() = Some(feed);
        Ok(handle)
    }

    async fn connect(&self, address: &str) -> Result<(), LinkError> {
        let _ = self
            .events
            .send(TransportEvent::Connected {
                address: address.to_string(),
            })
            .await;
        Ok(())
    }

    async fn resolve(&self, _service: Uuid, _ch: Uuid) -> Result<Resolution, LinkError> {
        Ok(Resolution::Resolved)
    }

    async fn write(&self, _service: Uuid, _ch: Uuid, payload: &[u8]) -> Result<(), LinkError> {
        self.writes
            .lock()
            .push(String::from_utf8_lossy(payload).into_owned());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        Ok(())
    }
}

struct Daemon {
    coordinator: CoordinatorLoop,
    wristband: Arc<FakeWristband>,
    regions: RegionStore,
    peripherals: Arc<PeripheralStore>,
    state: Arc<AppState>,
    status: mpsc::Receiver<StatusEvent>,
}

fn daemon(data_dir: &std::path::Path) -> Daemon {
    let channel = transport_channel();
    let wristband = Arc::new(FakeWristband {
        events: channel.sender(),
        scan_feed: Mutex::new(None),
        scanned_for: Mutex::new(None),
        writes: Mutex::new(Vec::new()),
    });
    let regions = RegionStore::new(data_dir).unwrap();
    let peripherals = Arc::new(PeripheralStore::new(data_dir).unwrap());
    let state = AppState::new();
    let (reporter, status) = StatusReporter::channel(32);

    let coordinator = CoordinatorLoop::new(
        wristband.clone(),
        channel,
        Arc::new(regions.clone()),
        peripherals.clone(),
        reporter,
        state.clone(),
        CoordinatorOptions {
            link: LinkConfig {
                scan_timeout: Duration::from_secs(5),
            },
            retry_failed_commands: true,
        },
    );

    Daemon {
        coordinator,
        wristband,
        regions,
        peripherals,
        state,
        status,
    }
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn test_console_scan_and_geofence_flow() {
    let dir = tempfile::tempdir().unwrap();
    let Daemon {
        coordinator,
        wristband,
        regions,
        peripherals,
        state,
        mut status,
    } = daemon(dir.path());

    let (trigger_tx, trigger_rx) = mpsc::channel(16);
    let console = Console::new(trigger_tx, regions.clone(), peripherals.clone(), state.clone());
    let task = tokio::spawn(coordinator.run(None, trigger_rx));

    let run = |line: &str| ConsoleCommand::parse(line).unwrap();
    console.execute(run("add 40.0 -75.0 50 Home")).await.unwrap();
    console.execute(run("scan")).await.unwrap();

    // Advertise once the scan is running.
    wait_until("scan start", || wristband.scan_feed.lock().is_some()).await;
    assert_eq!(*wristband.scanned_for.lock(), Some(SERVICE_UUID));
    let feed = wristband.scan_feed.lock().take().unwrap();
    feed.matches.send("C0:FF:EE:00:11:22".into()).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), status.recv())
        .await
        .unwrap();
    assert_eq!(event, Some(StatusEvent::ConnectionStateChanged(true)));
    assert_eq!(state.get_status(), ConnectionStatus::Connected);

    console.execute(run("fix 40.0003 -75.0")).await.unwrap();
    wait_until("ON", || wristband.writes.lock().len() == 1).await;

    console.execute(run("off")).await.unwrap();
    wait_until("OFF", || wristband.writes.lock().len() == 2).await;

    // Override holds while inside, clears on leaving, and re-arms.
    console.execute(run("fix 40.0003 -75.0")).await.unwrap();
    console.execute(run("fix 40.0010 -75.0")).await.unwrap();
    console.execute(run("fix 40.0003 -75.0")).await.unwrap();
    wait_until("second ON", || wristband.writes.lock().len() == 3).await;

    console.execute(run("quit")).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(wristband.writes.lock().as_slice(), &["ON", "OFF", "ON"]);

    // The discovered address survives a restart.
    let reloaded = PeripheralStore::new(dir.path()).unwrap();
    assert_eq!(
        reloaded.saved_address().unwrap().as_deref(),
        Some("C0:FF:EE:00:11:22")
    );
}

#[tokio::test]
async fn test_file_fixes_with_saved_wristband() {
    let dir = tempfile::tempdir().unwrap();
    let Daemon {
        coordinator,
        wristband,
        regions,
        peripherals,
        ..
    } = daemon(dir.path());

    regions.insert_region("Office", 51.5074, -0.1278, 100.0).unwrap();
    regions.insert_region("Home", 40.0, -75.0, 50.0).unwrap();
    peripherals.set_saved_address("AA:BB:CC:DD:EE:FF").unwrap();

    let mut fixes = tempfile::NamedTempFile::new().unwrap();
    writeln!(fixes, r#"{{"lat": 40.0003, "lng": -75.0}}"#).unwrap();
    writeln!(fixes, "garbage").unwrap();
    writeln!(fixes, "40.0002,-75.0").unwrap();
    fixes.flush().unwrap();

    let rx = LineFixSource::new(fixes.path())
        .subscribe(FixRequest::default())
        .await
        .unwrap();

    let (trigger_tx, trigger_rx) = mpsc::channel(4);
    let task = tokio::spawn(coordinator.run(Some(rx), trigger_rx));

    // Whether the first fix beats the reconnect or not, ON is delivered once.
    wait_until("ON", || !wristband.writes.lock().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    trigger_tx
        .send(wristband_companion::events::Trigger::Shutdown)
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(wristband.writes.lock().as_slice(), &["ON"]);
    assert!(wristband.scan_feed.lock().is_none());
}
