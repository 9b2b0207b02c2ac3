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

//! Geofence evaluation.
//!
//! Decides when the wristband alert goes on or off from location fixes and
//! the saved regions.

mod distance;
mod evaluator;
mod region;

pub use distance::distance_meters;
pub use evaluator::{ActuatorState, Decision, GeofenceEvaluator};
pub use region::{LocationFix, Region};
