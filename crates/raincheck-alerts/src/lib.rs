//! Background rain alerts for Raincheck
//!
//! A run fetches forecasts for saved locations, applies the rain threshold,
//! respects a global cooldown window and posts at most one notification per
//! eligible location. [`AlertTrigger`] repeats runs on a timer with backoff and
//! accepts one-shot runs with test overrides.

pub mod cooldown;
pub mod notifier;
pub mod policy;
pub mod scheduler;
pub mod trigger;

pub use cooldown::{CooldownStore, MemoryCooldownStore, PersistentCooldownStore};
pub use notifier::{ConsoleNotifier, Notifier, NotifyError, WebhookNotifier};
pub use policy::{decide, AlertDecision, DEFAULT_RAIN_THRESHOLD_PCT};
pub use scheduler::{AlertScheduler, RunOutcome, RunOverrides, RunReport};
pub use trigger::{AlertTrigger, Backoff, TriggerConfig};
