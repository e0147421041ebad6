//! Global anti-spam gate between two rain notifications.
//!
//! - First alert always allowed.
//! - Inside the window, alerts are suppressed.
//! - State is updated explicitly via `mark_notified` after a successful send.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use raincheck_store::{KeyValueStore, StoreResult};
use std::sync::Arc;

/// Key of the last notification time (epoch millis) in the key/value table.
pub const LAST_NOTIFY_KEY: &str = "alerts.last_notify_ts";

/// Default window between two notifications.
pub fn default_window() -> TimeDelta {
    TimeDelta::hours(2)
}

pub trait CooldownStore: Send + Sync {
    /// True iff nothing was recorded or at least one window has passed since.
    fn is_allowed(&self, now: DateTime<Utc>) -> StoreResult<bool>;

    fn mark_notified(&self, now: DateTime<Utc>) -> StoreResult<()>;

    /// Forget the last notification. Returns `true` if one was recorded.
    fn clear(&self) -> StoreResult<bool>;

    fn last_notified(&self) -> StoreResult<Option<DateTime<Utc>>>;
}

fn window_passed(last: Option<DateTime<Utc>>, now: DateTime<Utc>, window: TimeDelta) -> bool {
    match last {
        None => true,
        Some(ts) => now.signed_duration_since(ts) >= window,
    }
}

/// Cooldown kept in the key/value table, shared by every run of the process and across restarts.
pub struct PersistentCooldownStore {
    kv: Arc<dyn KeyValueStore>,
    window: TimeDelta,
}

impl PersistentCooldownStore {
    /// Negative windows are treated as zero (no cooldown).
    pub fn new(kv: Arc<dyn KeyValueStore>, window: TimeDelta) -> Self {
        Self {
            kv,
            window: window.max(TimeDelta::zero()),
        }
    }
}

impl CooldownStore for PersistentCooldownStore {
    fn is_allowed(&self, now: DateTime<Utc>) -> StoreResult<bool> {
        Ok(window_passed(self.last_notified()?, now, self.window))
    }

    fn mark_notified(&self, now: DateTime<Utc>) -> StoreResult<()> {
        self.kv.set_i64(LAST_NOTIFY_KEY, now.timestamp_millis())
    }

    fn clear(&self) -> StoreResult<bool> {
        self.kv.remove(LAST_NOTIFY_KEY)
    }

    fn last_notified(&self) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self
            .kv
            .get_i64(LAST_NOTIFY_KEY)?
            .and_then(DateTime::from_timestamp_millis))
    }
}

/// In-process cooldown.
#[derive(Debug)]
pub struct MemoryCooldownStore {
    last: Mutex<Option<DateTime<Utc>>>,
    window: TimeDelta,
}

impl MemoryCooldownStore {
    pub fn new(window: TimeDelta) -> Self {
        Self {
            last: Mutex::new(None),
            window: window.max(TimeDelta::zero()),
        }
    }
}

impl Default for MemoryCooldownStore {
    fn default() -> Self {
        Self::new(default_window())
    }
}

impl CooldownStore for MemoryCooldownStore {
    fn is_allowed(&self, now: DateTime<Utc>) -> StoreResult<bool> {
        Ok(window_passed(*self.last.lock(), now, self.window))
    }

    fn mark_notified(&self, now: DateTime<Utc>) -> StoreResult<()> {
        *self.last.lock() = Some(now);
        Ok(())
    }

    fn clear(&self) -> StoreResult<bool> {
        Ok(self.last.lock().take().is_some())
    }

    fn last_notified(&self) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(*self.last.lock())
    }
}
