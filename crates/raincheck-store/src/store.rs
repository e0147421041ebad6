//! Storage traits and error types.
//!
//! This module defines the narrow interfaces the alert pipeline and the
//! command line consume, independent of the SQLite implementation.

use raincheck_core::error::{DatabaseError, RusqliteErrorExt};
use raincheck_weather::Location;
use thiserror::Error;
use tokio::sync::watch;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database query or connection failure.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Filesystem or other storage failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl StoreError {
    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.into_database_error())
    }
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Saved (favorite) locations.
pub trait LocationStore: Send + Sync {
    /// Saved locations ordered by name.
    fn list_saved(&self) -> StoreResult<Vec<Location>>;

    /// Receiver of the saved list; fires only when the list changes.
    fn observe_saved(&self) -> watch::Receiver<Vec<Location>>;

    /// Save `location` and return its id.
    ///
    /// Saving a location that already exists on `(name, latitude, longitude)`
    /// returns the existing id and changes nothing.
    fn save(&self, location: &Location) -> StoreResult<i64>;

    /// Delete by `(name, latitude, longitude)`, falling back to the id.
    ///
    /// Returns `true` if a row was removed.
    fn delete(&self, location: &Location) -> StoreResult<bool>;
}

/// User preference flags. Both default to `false`.
pub trait SettingsStore: Send + Sync {
    fn alerts_enabled(&self) -> StoreResult<bool>;
    fn set_alerts_enabled(&self, enabled: bool) -> StoreResult<()>;
    fn observe_alerts_enabled(&self) -> watch::Receiver<bool>;

    fn use_fahrenheit(&self) -> StoreResult<bool>;
    fn set_use_fahrenheit(&self, enabled: bool) -> StoreResult<()>;
    fn observe_use_fahrenheit(&self) -> watch::Receiver<bool>;
}

/// Integer values under string keys.
pub trait KeyValueStore: Send + Sync {
    fn get_i64(&self, key: &str) -> StoreResult<Option<i64>>;
    fn set_i64(&self, key: &str, value: i64) -> StoreResult<()>;

    /// Remove `key`. Returns `true` if it existed.
    fn remove(&self, key: &str) -> StoreResult<bool>;
}
