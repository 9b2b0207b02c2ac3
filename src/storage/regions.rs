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

//! Region storage using SQLite.

use anyhow::{anyhow, bail, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::RegionSource;
use crate::geofence::Region;

/// Saved regions database.
#[derive(Clone)]
pub struct RegionStore {
    conn: Arc<Mutex<Connection>>,
}

impl RegionStore {
    /// Create or open the regions database.
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("locations.db");
        info!("Opening regions database: {:?}", db_path);

        Self::from_connection(Connection::open(&db_path)?)
    }

    /// In-memory store, mostly for tests.
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS locations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                radius_meters REAL NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Add a region and return it with its assigned id.
    pub fn insert_region(
        &self,
        name: &str,
        latitude: f64,
        longitude: f64,
        radius_meters: f32,
    ) -> Result<Region> {
        if radius_meters.is_nan() || radius_meters < 0.0 {
            bail!("Radius must be a non-negative number, got {}", radius_meters);
        }
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            bail!("Coordinates out of range: {}, {}", latitude, longitude);
        }

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO locations (name, latitude, longitude, radius_meters) VALUES (?1, ?2, ?3, ?4)",
            params![name, latitude, longitude, radius_meters as f64],
        )?;
        let id = conn.last_insert_rowid();
        info!("Saved region '{}' (id {})", name, id);

        Ok(Region::new(id, name, latitude, longitude, radius_meters))
    }

    /// Delete a region by id.
    pub fn delete_region(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM locations WHERE id = ?1", [id])?;
        if removed == 0 {
            return Err(anyhow!("No region with id {}", id));
        }
        info!("Deleted region {}", id);
        Ok(())
    }

    /// Get total region count.
    pub fn count(&self) -> Result<u32> {
        let conn = self.conn.lock();
        let count: u32 = conn.query_row("SELECT COUNT(*) FROM locations", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl RegionSource for RegionStore {
    fn list_regions(&self) -> Result<Vec<Region>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, latitude, longitude, radius_meters
             FROM locations
             ORDER BY id ASC",
        )?;

        let regions = stmt
            .query_map([], |row| {
                let radius: f64 = row.get(4)?;
                Ok(Region {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    latitude: row.get(2)?,
                    longitude: row.get(3)?,
                    radius_meters: radius as f32,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(regions)
    }
}
