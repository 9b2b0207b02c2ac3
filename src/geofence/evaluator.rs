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

//! Alert decision state machine.
//!
//! Fires `TurnOn` once per stay inside a region and `TurnOff` once per
//! departure. A manual override (`force_off`) suppresses re-arming until a
//! fix lands outside every region.

use tracing::{debug, info};

use super::distance::distance_meters;
use super::region::{LocationFix, Region};

/// Actuator state as last decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActuatorState {
    #[default]
    Off,
    On,
}

impl ActuatorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActuatorState::Off => "off",
            ActuatorState::On => "on",
        }
    }
}

/// What the caller should do with the actuator after a fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    NoChange,
    TurnOn,
    TurnOff,
}

/// Geofence evaluator.
#[derive(Debug, Default)]
pub struct GeofenceEvaluator {
    state: ActuatorState,
    manual_override: bool,
    matched_region: Option<i64>,
}

impl GeofenceEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate one fix against a region snapshot.
    ///
    /// Regions are checked in snapshot order and the first one containing
    /// the fix wins, even if a later one is closer.
    pub fn evaluate(&mut self, fix: &LocationFix, regions: &[Region]) -> Decision {
        let matched = regions.iter().find(|region| {
            let distance =
                distance_meters(fix.latitude, fix.longitude, region.latitude, region.longitude);
            debug!("Distance to {}: {:.1}m", region.name, distance);
            distance <= f64::from(region.radius_meters)
        });
        self.matched_region = matched.map(|region| region.id);

        match matched {
            Some(region) => {
                if self.state == ActuatorState::Off && !self.manual_override {
                    info!("Within radius of {}, turning alert on", region.name);
                    self.state = ActuatorState::On;
                    Decision::TurnOn
                } else {
                    Decision::NoChange
                }
            }
            None => {
                if self.manual_override {
                    debug!("Left all regions, clearing manual override");
                }
                self.manual_override = false;
                if self.state == ActuatorState::On {
                    info!("Exited all regions, turning alert off");
                    self.state = ActuatorState::Off;
                    Decision::TurnOff
                } else {
                    Decision::NoChange
                }
            }
        }
    }

    /// User silenced the alert. Stays silenced until the wearer leaves every region.
    pub fn force_off(&mut self) {
        info!("Manual override engaged");
        self.state = ActuatorState::Off;
        self.manual_override = true;
    }

    pub fn state(&self) -> ActuatorState {
        self.state
    }

    pub fn is_override_active(&self) -> bool {
        self.manual_override
    }

    /// Id of the region that matched the last fix.
    pub fn matched_region(&self) -> Option<i64> {
        self.matched_region
    }
}
