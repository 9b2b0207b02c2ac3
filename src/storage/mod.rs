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

//! Persistent stores: saved regions and the remembered peripheral.

mod peripheral;
mod regions;

use anyhow::Result;

use crate::geofence::Region;

pub use peripheral::PeripheralStore;
pub use regions::RegionStore;

/// Read side of the region store, queried once per fix.
pub trait RegionSource: Send + Sync {
    /// Full snapshot in evaluation order.
    fn list_regions(&self) -> Result<Vec<Region>>;
}

/// Remembered peripheral address.
pub trait AddressStore: Send + Sync {
    fn saved_address(&self) -> Result<Option<String>>;
    fn set_saved_address(&self, address: &str) -> Result<()>;
    /// Forget the address so start-up no longer reconnects to it.
    fn clear(&self) -> Result<()>;
}
