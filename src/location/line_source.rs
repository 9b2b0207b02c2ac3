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

//! Fixes read line by line from a file or named pipe.
//!
//! Each line is either a JSON object such as
//! `{"latitude": 40.0, "longitude": -75.0}` (`lat`, `lng` and `lon` are
//! accepted too) or a plain `lat,lng` pair. Blank lines and lines starting
//! with `#` are ignored. A FIFO is reopened whenever its writer goes away, so
//! a location provider can restart without restarting the daemon.

use async_trait::async_trait;
use serde::Deserialize;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{FixRequest, FixSource, FixUpdate};
use crate::error::SourceError;
use crate::geofence::{distance_meters, LocationFix};

#[derive(Debug, Deserialize)]
struct FixLine {
    #[serde(alias = "lat")]
    latitude: f64,
    #[serde(alias = "lng", alias = "lon")]
    longitude: f64,
}

/// Parse one line into a fix stamped with the current time.
pub fn parse_fix_line(line: &str) -> Result<LocationFix, SourceError> {
    let line = line.trim();

    let (latitude, longitude) = if line.starts_with('{') {
        let parsed: FixLine = serde_json::from_str(line)
            .map_err(|e| SourceError::Malformed(format!("{}: {}", line, e)))?;
        (parsed.latitude, parsed.longitude)
    } else {
        let mut parts = line.split(',').map(str::trim);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(lat), Some(lng), None) => (parse_coordinate(lat, line)?, parse_coordinate(lng, line)?),
            _ => return Err(SourceError::Malformed(format!("expected 'lat,lng': {}", line))),
        }
    };

    let fix = LocationFix::now(latitude, longitude);
    if !fix.is_valid() {
        return Err(SourceError::Malformed(format!(
            "coordinates out of range: {}, {}",
            latitude, longitude
        )));
    }
    Ok(fix)
}

fn parse_coordinate(value: &str, line: &str) -> Result<f64, SourceError> {
    value
        .parse::<f64>()
        .map_err(|_| SourceError::Malformed(format!("not a number '{}' in: {}", value, line)))
}

fn open_error(err: io::Error) -> SourceError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => SourceError::PermissionDenied,
        _ => SourceError::Io(err),
    }
}

/// Reads fixes from a file or FIFO.
#[derive(Debug, Clone)]
pub struct LineFixSource {
    path: PathBuf,
}

impl LineFixSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FixSource for LineFixSource {
    async fn subscribe(&self, request: FixRequest) -> Result<mpsc::Receiver<FixUpdate>, SourceError> {
        let metadata = tokio::fs::metadata(&self.path).await.map_err(open_error)?;
        let is_fifo = metadata.file_type().is_fifo();

        // Opening a FIFO blocks until a writer shows up, so that happens in
        // the reader task. Regular files are opened here to surface errors.
        let first = if is_fifo {
            None
        } else {
            Some(File::open(&self.path).await.map_err(open_error)?)
        };

        info!(
            "Reading location fixes from {} (interval hint {}s, min distance {}m)",
            self.path.display(),
            request.min_interval.as_secs(),
            request.min_distance_meters
        );

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(read_fixes(self.path.clone(), first, is_fifo, request, tx));
        Ok(rx)
    }
}

async fn read_fixes(
    path: PathBuf,
    mut first: Option<File>,
    is_fifo: bool,
    request: FixRequest,
    tx: mpsc::Sender<FixUpdate>,
) {
    let mut last: Option<LocationFix> = None;

    loop {
        let file = match first.take() {
            Some(file) => file,
            None => {
                tokio::select! {
                    _ = tx.closed() => break,
                    opened = File::open(&path) => match opened {
                        Ok(file) => file,
                        Err(e) => {
                            let _ = tx.send(Err(open_error(e))).await;
                            break;
                        }
                    }
                }
            }
        };

        let mut lines = BufReader::new(file).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(SourceError::Io(e))).await;
                    return;
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let update = parse_fix_line(trimmed);
            if let Ok(fix) = &update {
                if too_close(last.as_ref(), fix, request.min_distance_meters) {
                    debug!("Skipping fix within {}m of the last one", request.min_distance_meters);
                    continue;
                }
                last = Some(*fix);
            }

            if tx.send(update).await.is_err() {
                debug!("Fix subscriber gone, closing {}", path.display());
                return;
            }
        }

        if !is_fifo {
            info!("Reached end of {}", path.display());
            break;
        }
        debug!("Writer closed {}, reopening", path.display());
    }
}

fn too_close(last: Option<&LocationFix>, fix: &LocationFix, min_distance: f32) -> bool {
    if min_distance <= 0.0 {
        return false;
    }
    match last {
        Some(last) => {
            distance_meters(last.latitude, last.longitude, fix.latitude, fix.longitude)
                < f64::from(min_distance)
        }
        None => false,
    }
}
