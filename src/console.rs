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

//! Operator console.
//!
//! Reads commands from a line stream (stdin for the daemon) and turns them
//! into coordinator triggers or region store edits.

use anyhow::Result;
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::events::Trigger;
use crate::geofence::LocationFix;
use crate::state::AppState;
use crate::storage::{AddressStore, PeripheralStore, RegionSource, RegionStore};

/// Console command types.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    /// Report the connection or scan for the wristband.
    Scan,
    /// Print the current state.
    Status,
    /// Silence the alert.
    Off,
    /// Evaluate a hand-entered fix.
    Fix { latitude: f64, longitude: f64 },
    /// List saved regions.
    Regions,
    /// Save a region.
    Add {
        latitude: f64,
        longitude: f64,
        radius_meters: f32,
        name: String,
    },
    /// Delete a region by id.
    Remove(i64),
    /// Forget the saved wristband.
    Forget,
    /// Shut the daemon down.
    Quit,
}

impl ConsoleCommand {
    /// Parse one console line. The verb is case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        let mut words = s.split_whitespace();
        let verb = words.next()?.to_uppercase();
        let args: Vec<&str> = words.collect();

        match (verb.as_str(), args.as_slice()) {
            ("SCAN", []) => Some(Self::Scan),
            ("STATUS", []) => Some(Self::Status),
            ("OFF", []) => Some(Self::Off),
            ("FIX", [lat, lng]) => Some(Self::Fix {
                latitude: lat.parse().ok()?,
                longitude: lng.parse().ok()?,
            }),
            ("REGIONS", []) => Some(Self::Regions),
            ("ADD", [lat, lng, radius, name @ ..]) if !name.is_empty() => Some(Self::Add {
                latitude: lat.parse().ok()?,
                longitude: lng.parse().ok()?,
                radius_meters: radius.parse().ok()?,
                name: name.join(" "),
            }),
            ("REMOVE", [id]) => Some(Self::Remove(id.parse().ok()?)),
            ("FORGET", []) => Some(Self::Forget),
            ("QUIT" | "EXIT", []) => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Executes console commands.
pub struct Console {
    triggers: mpsc::Sender<Trigger>,
    regions: RegionStore,
    peripherals: Arc<PeripheralStore>,
    state: Arc<AppState>,
}

impl Console {
    pub fn new(
        triggers: mpsc::Sender<Trigger>,
        regions: RegionStore,
        peripherals: Arc<PeripheralStore>,
        state: Arc<AppState>,
    ) -> Self {
        Self {
            triggers,
            regions,
            peripherals,
            state,
        }
    }

    /// Run one command. Returns the text to show the operator.
    pub async fn execute(&self, command: ConsoleCommand) -> Result<String> {
        let reply = match command {
            ConsoleCommand::Scan => {
                self.triggers.send(Trigger::ScanOrReport).await?;
                "Looking for the wristband...".to_string()
            }
            ConsoleCommand::Status => {
                self.triggers.send(Trigger::StatusReport).await?;
                self.state.summary()
            }
            ConsoleCommand::Off => {
                self.triggers.send(Trigger::ForceOff).await?;
                "Alert silenced until you leave all regions".to_string()
            }
            ConsoleCommand::Fix {
                latitude,
                longitude,
            } => {
                let fix = LocationFix::now(latitude, longitude);
                if !fix.is_valid() {
                    anyhow::bail!("coordinates out of range: {}, {}", latitude, longitude);
                }
                self.triggers.send(Trigger::Fix(fix)).await?;
                format!("Fix {:.5},{:.5} queued", latitude, longitude)
            }
            ConsoleCommand::Regions => {
                let regions = self.regions.list_regions()?;
                if regions.is_empty() {
                    "No regions saved".to_string()
                } else {
                    regions
                        .iter()
                        .map(|r| {
                            format!(
                                "{:>4}  {:<20} {:.5},{:.5}  {}m",
                                r.id, r.name, r.latitude, r.longitude, r.radius_meters
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            ConsoleCommand::Add {
                latitude,
                longitude,
                radius_meters,
                name,
            } => {
                let region = self
                    .regions
                    .insert_region(&name, latitude, longitude, radius_meters)?;
                format!("Saved region {} ({})", region.id, region.name)
            }
            ConsoleCommand::Remove(id) => {
                self.regions.delete_region(id)?;
                format!("Removed region {}", id)
            }
            ConsoleCommand::Forget => {
                self.peripherals.clear()?;
                "Forgot the saved wristband".to_string()
            }
            ConsoleCommand::Quit => {
                self.triggers.send(Trigger::Shutdown).await?;
                "Shutting down".to_string()
            }
        };
        Ok(reply)
    }

    /// Handle lines until `quit` or until the line stream closes.
    pub async fn run(self, mut lines: mpsc::Receiver<String>) {
        while let Some(line) = lines.recv().await {
            if line.trim().is_empty() {
                continue;
            }

            let Some(command) = ConsoleCommand::parse(&line) else {
                warn!("Unknown console command: {}", line.trim());
                continue;
            };
            let quit = command == ConsoleCommand::Quit;

            match self.execute(command).await {
                Ok(reply) => println!("{}", reply),
                Err(e) => {
                    error!("Console command failed: {}", e);
                    println!("Error: {}", e);
                }
            }
            if quit {
                return;
            }
        }
        info!("Console input closed");
    }
}

/// Read stdin on its own thread so a pending read never holds up shutdown.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}
