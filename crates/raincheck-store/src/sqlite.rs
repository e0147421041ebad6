//! SQLite-backed storage.
//!
//! `Database` holds favorites, the last-known forecast per favorite, recently
//! viewed cities and a small key/value table used for settings and the alert
//! cooldown. Change notification goes through `tokio::sync::watch`.

use parking_lot::Mutex;
use raincheck_weather::forecast::ForecastSink;
use raincheck_weather::{CachedForecast, Location};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tokio::sync::watch;

use crate::store::{KeyValueStore, LocationStore, SettingsStore, StoreError, StoreResult};

const KEY_ALERTS_ENABLED: &str = "settings.alerts_enabled";
const KEY_USE_FAHRENHEIT: &str = "settings.use_fahrenheit";

/// SQLite database shared by every store trait.
pub struct Database {
    conn: Mutex<Connection>,
    saved_tx: watch::Sender<Vec<Location>>,
    alerts_enabled_tx: watch::Sender<bool>,
    use_fahrenheit_tx: watch::Sender<bool>,
}

impl Database {
    /// Open the database at `path`, creating the file, its directory and the schema as needed.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let conn = Connection::open(path)?;
        tracing::debug!("Opened database at {}", path.display());
        Self::from_connection(conn)
    }

    /// Create an in-memory database.
    pub fn in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        init_schema(&conn)?;

        let saved = query_saved(&conn)?;
        let alerts_enabled = read_flag(&conn, KEY_ALERTS_ENABLED)?;
        let use_fahrenheit = read_flag(&conn, KEY_USE_FAHRENHEIT)?;

        Ok(Self {
            conn: Mutex::new(conn),
            saved_tx: watch::Sender::new(saved),
            alerts_enabled_tx: watch::Sender::new(alerts_enabled),
            use_fahrenheit_tx: watch::Sender::new(use_fahrenheit),
        })
    }

    /// Last-known forecast values of a saved location.
    pub fn cached_forecast(&self, location_id: i64) -> StoreResult<Option<CachedForecast>> {
        let conn = self.conn.lock();
        let cached = conn
            .query_row(
                "SELECT location_id, timestamp_ms, current_temperature_c, next_hour_rain_pct
                 FROM weather_cache WHERE location_id = ?1",
                params![location_id],
                |row| {
                    Ok(CachedForecast {
                        location_id: row.get(0)?,
                        timestamp_ms: row.get(1)?,
                        current_temperature_c: row.get(2)?,
                        next_hour_rain_pct: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(cached)
    }

    /// Recently viewed cities, newest first.
    pub fn list_recent(&self, limit: usize) -> StoreResult<Vec<Location>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT 0, name, country, admin1, latitude, longitude
             FROM recent_cities ORDER BY last_visited_ms DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_location)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Re-read the saved list and notify observers if it changed.
    fn publish_saved(&self, conn: &Connection) -> StoreResult<()> {
        let saved = query_saved(conn)?;
        self.saved_tx.send_if_modified(|current| {
            if *current == saved {
                false
            } else {
                *current = saved;
                true
            }
        });
        Ok(())
    }

    /// The write has already committed; observers just miss this update.
    fn publish_saved_after_commit(&self, conn: &Connection) {
        if let Err(e) = self.publish_saved(conn) {
            tracing::warn!("Favorites changed but could not be re-read: {}", e);
        }
    }

    fn set_flag(&self, key: &str, value: bool, tx: &watch::Sender<bool>) -> StoreResult<()> {
        self.set_i64(key, i64::from(value))?;
        tx.send_if_modified(|current| {
            let changed = *current != value;
            *current = value;
            changed
        });
        Ok(())
    }
}

fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS cities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            country TEXT,
            admin1 TEXT,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_cities_identity
            ON cities(name, latitude, longitude);

        CREATE TABLE IF NOT EXISTS weather_cache (
            location_id INTEGER PRIMARY KEY,
            timestamp_ms INTEGER NOT NULL,
            current_temperature_c REAL NOT NULL,
            next_hour_rain_pct INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS recent_cities (
            name TEXT NOT NULL,
            country TEXT,
            admin1 TEXT,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            last_visited_ms INTEGER NOT NULL,
            PRIMARY KEY (name, latitude, longitude)
        );

        CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn row_to_location(row: &rusqlite::Row) -> rusqlite::Result<Location> {
    Ok(Location {
        id: row.get(0)?,
        name: row.get(1)?,
        country: row.get(2)?,
        admin1: row.get(3)?,
        latitude: row.get(4)?,
        longitude: row.get(5)?,
    })
}

fn query_saved(conn: &Connection) -> StoreResult<Vec<Location>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, country, admin1, latitude, longitude FROM cities ORDER BY name",
    )?;
    let rows = stmt.query_map([], row_to_location)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn read_i64(conn: &Connection, key: &str) -> StoreResult<Option<i64>> {
    let value = conn
        .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
        .optional()?;
    Ok(value)
}

fn read_flag(conn: &Connection, key: &str) -> StoreResult<bool> {
    Ok(read_i64(conn, key)?.is_some_and(|v| v != 0))
}

impl LocationStore for Database {
    fn list_saved(&self) -> StoreResult<Vec<Location>> {
        query_saved(&self.conn.lock())
    }

    fn observe_saved(&self) -> watch::Receiver<Vec<Location>> {
        self.saved_tx.subscribe()
    }

    fn save(&self, location: &Location) -> StoreResult<i64> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO cities (name, country, admin1, latitude, longitude)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                location.name,
                location.country,
                location.admin1,
                location.latitude,
                location.longitude
            ],
        )?;

        let id: i64 = conn.query_row(
            "SELECT id FROM cities WHERE name = ?1 AND latitude = ?2 AND longitude = ?3 LIMIT 1",
            params![location.name, location.latitude, location.longitude],
            |row| row.get(0),
        )?;

        if inserted > 0 {
            tracing::info!("Saved favorite {} (id {})", location.name, id);
            self.publish_saved_after_commit(&conn);
        }
        Ok(id)
    }

    fn delete(&self, location: &Location) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let mut removed = conn.execute(
            "DELETE FROM cities WHERE name = ?1 AND latitude = ?2 AND longitude = ?3",
            params![location.name, location.latitude, location.longitude],
        )?;
        if removed == 0 && location.is_saved() {
            removed = conn.execute("DELETE FROM cities WHERE id = ?1", params![location.id])?;
        }

        if removed == 0 {
            return Ok(false);
        }

        conn.execute(
            "DELETE FROM weather_cache WHERE location_id NOT IN (SELECT id FROM cities)",
            [],
        )?;
        tracing::info!("Deleted favorite {}", location.name);
        self.publish_saved_after_commit(&conn);
        Ok(true)
    }
}

impl SettingsStore for Database {
    fn alerts_enabled(&self) -> StoreResult<bool> {
        read_flag(&self.conn.lock(), KEY_ALERTS_ENABLED)
    }

    fn set_alerts_enabled(&self, enabled: bool) -> StoreResult<()> {
        self.set_flag(KEY_ALERTS_ENABLED, enabled, &self.alerts_enabled_tx)
    }

    fn observe_alerts_enabled(&self) -> watch::Receiver<bool> {
        self.alerts_enabled_tx.subscribe()
    }

    fn use_fahrenheit(&self) -> StoreResult<bool> {
        read_flag(&self.conn.lock(), KEY_USE_FAHRENHEIT)
    }

    fn set_use_fahrenheit(&self, enabled: bool) -> StoreResult<()> {
        self.set_flag(KEY_USE_FAHRENHEIT, enabled, &self.use_fahrenheit_tx)
    }

    fn observe_use_fahrenheit(&self) -> watch::Receiver<bool> {
        self.use_fahrenheit_tx.subscribe()
    }
}

impl KeyValueStore for Database {
    fn get_i64(&self, key: &str) -> StoreResult<Option<i64>> {
        read_i64(&self.conn.lock(), key)
    }

    fn set_i64(&self, key: &str, value: i64) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<bool> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }
}

impl ForecastSink for Database {
    fn store_forecast(&self, cached: &CachedForecast) -> anyhow::Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO weather_cache
                 (location_id, timestamp_ms, current_temperature_c, next_hour_rain_pct)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                cached.location_id,
                cached.timestamp_ms,
                cached.current_temperature_c,
                cached.next_hour_rain_pct
            ],
        )?;
        Ok(())
    }

    fn record_recent(&self, location: &Location, visited_at_ms: i64) -> anyhow::Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO recent_cities
                 (name, country, admin1, latitude, longitude, last_visited_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                location.name,
                location.country,
                location.admin1,
                location.latitude,
                location.longitude,
                visited_at_ms
            ],
        )?;
        Ok(())
    }
}
