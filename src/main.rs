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

//! Wristband Companion daemon

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wristband_companion::bluetooth::{transport_channel, BluezTransport};
use wristband_companion::config::Config;
use wristband_companion::console::{spawn_stdin_reader, Console};
use wristband_companion::coordinator::{CoordinatorLoop, CoordinatorOptions};
use wristband_companion::events::{StatusEvent, StatusReporter, Trigger};
use wristband_companion::location::{FixSource, LineFixSource};
use wristband_companion::state::AppState;
use wristband_companion::storage::{PeripheralStore, RegionStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wristband_companion=info".parse()?),
        )
        .init();

    info!(
        "Starting Wristband Companion v{}...",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    // Initialize storage
    let regions = RegionStore::new(&config.data_dir)?;
    info!("Region storage initialized ({} regions)", regions.count()?);
    let peripherals = Arc::new(PeripheralStore::new(&config.data_dir)?);

    // Create application state
    let state = AppState::new();

    // Initialize BLE central
    let channel = transport_channel();
    let transport = Arc::new(
        BluezTransport::new(config.bluetooth.adapter.as_deref(), channel.sender()).await?,
    );

    let (status, mut status_rx) = StatusReporter::channel(32);
    let coordinator = CoordinatorLoop::new(
        transport,
        channel,
        Arc::new(regions.clone()),
        peripherals.clone(),
        status,
        state.clone(),
        CoordinatorOptions {
            link: config.link_config(),
            retry_failed_commands: config.coordinator.retry_failed_commands,
        },
    );

    // Subscribe to location fixes
    let fixes = match &config.location.fix_path {
        Some(path) => match LineFixSource::new(path).subscribe(config.fix_request()).await {
            Ok(rx) => Some(rx),
            Err(e) => {
                error!("Cannot read fixes from {}: {}", path.display(), e);
                None
            }
        },
        None => {
            info!("No fix_path configured; enter fixes with 'fix <lat> <lng>'");
            None
        }
    };

    // Log status events
    tokio::spawn(async move {
        while let Some(event) = status_rx.recv().await {
            match event {
                StatusEvent::ConnectionStateChanged(true) => info!("Wristband connected"),
                StatusEvent::ConnectionStateChanged(false) => info!("Wristband disconnected"),
                StatusEvent::CommandFailed { command, reason } => {
                    warn!("Command {} failed: {}", command, reason)
                }
                StatusEvent::Error(e) => error!("{}", e),
            }
        }
    });

    // Operator console
    let (trigger_tx, trigger_rx) = mpsc::channel::<Trigger>(16);
    let console = Console::new(trigger_tx.clone(), regions, peripherals, state.clone());
    tokio::spawn(console.run(spawn_stdin_reader()));

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
            let _ = trigger_tx.send(Trigger::Shutdown).await;
        }
    });

    info!("Ready. Type 'scan', 'status', 'off' or 'quit'.");
    coordinator.run(fixes, trigger_rx).await;

    info!("Goodbye");
    Ok(())
}
