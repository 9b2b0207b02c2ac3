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

//! Location fix sources.

mod line_source;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::SourceError;
use crate::geofence::LocationFix;

pub use line_source::{parse_fix_line, LineFixSource};

/// One delivery from a fix source.
pub type FixUpdate = Result<LocationFix, SourceError>;

/// Delivery hints passed to a source. Sources may deliver more or less often.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixRequest {
    pub min_interval: Duration,
    pub min_distance_meters: f32,
}

impl Default for FixRequest {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(5),
            min_distance_meters: 0.0,
        }
    }
}

/// Something that produces location fixes.
#[async_trait]
pub trait FixSource: Send + Sync {
    /// Start delivering fixes. The stream ends when the receiver is dropped
    /// or the source runs dry.
    async fn subscribe(&self, request: FixRequest) -> Result<mpsc::Receiver<FixUpdate>, SourceError>;
}
