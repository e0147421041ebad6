//! Local persistence for Raincheck
//!
//! Favorites, settings, cached forecasts and recent cities in SQLite.

pub mod sqlite;
pub mod store;

pub use sqlite::Database;
pub use store::{KeyValueStore, LocationStore, SettingsStore, StoreError, StoreResult};
