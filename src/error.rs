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

//! Error types shared by the link, the fix source and the coordinator.
//!
//! None of these are fatal: the coordinator logs them, reports them on the
//! status channel and keeps waiting for the next trigger or fix.

use thiserror::Error;

/// Errors raised while discovering or connecting to the peripheral.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The Bluetooth radio is powered off or missing.
    #[error("Bluetooth adapter is unavailable or powered off")]
    AdapterUnavailable,

    /// The platform refuses to scan until location services are on.
    #[error("location services must be enabled to scan for BLE devices")]
    LocationServiceDisabled,

    /// No advertisement carrying the service appeared in time.
    #[error("no matching peripheral found before the scan timed out")]
    ScanTimeout,

    /// The platform rejected the scan request.
    #[error("permission denied while scanning")]
    PermissionDenied,

    /// A scan is already running.
    #[error("a scan is already in progress")]
    ScanInProgress,

    /// Any other transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors raised by a single actuator write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("peripheral is not connected")]
    NotConnected,

    #[error("alert service not found on peripheral")]
    ServiceMissing,

    #[error("alert characteristic not found on peripheral")]
    CharacteristicMissing,

    #[error("characteristic write failed: {0}")]
    Write(String),
}

/// Errors raised by a location fix source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("permission denied opening location source")]
    PermissionDenied,

    #[error("malformed fix: {0}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<bluer::Error> for LinkError {
    fn from(err: bluer::Error) -> Self {
        match err.kind {
            bluer::ErrorKind::NotAuthorized | bluer::ErrorKind::NotPermitted => {
                LinkError::PermissionDenied
            }
            bluer::ErrorKind::NotReady => LinkError::AdapterUnavailable,
            _ => LinkError::Transport(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            SendError::NotConnected.to_string(),
            "peripheral is not connected"
        );
        assert_eq!(
            LinkError::Transport("boom".into()).to_string(),
            "transport error: boom"
        );
    }

    #[test]
    fn test_source_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "pipe closed");
        let err: SourceError = io.into();
        assert!(matches!(err, SourceError::Io(_)));
    }
}
