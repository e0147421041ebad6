//! One alert run: fetch, policy, cooldown and dispatch over the saved locations.
//!
//! Targets are processed one at a time. A fetch failure for any target ends the
//! whole run: retryable failures ask the trigger for a backoff re-run, terminal
//! ones end the run as a success without alerting.

use chrono::{DateTime, Utc};
use raincheck_store::{LocationStore, SettingsStore};
use raincheck_weather::{FetchError, ForecastClient, Location};
use std::sync::Arc;

use crate::cooldown::CooldownStore;
use crate::notifier::{NotifyError, Notifier};
use crate::policy;

/// Caller-supplied parameters for manual verification runs. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOverrides {
    pub forced_probability_pct: Option<u8>,
    /// Check every saved location instead of only the first
    pub send_to_all_saved: bool,
    pub bypass_cooldown: bool,
    pub bypass_alerts_enabled_check: bool,
}

impl RunOverrides {
    /// Production run: no overrides.
    pub fn production() -> Self {
        Self::default()
    }

    /// Test run defaults: 85 %, all favorites, no cooldown, ignore the alerts setting.
    pub fn test_mode() -> Self {
        Self {
            forced_probability_pct: Some(85),
            send_to_all_saved: true,
            bypass_cooldown: true,
            bypass_alerts_enabled_check: true,
        }
    }
}

/// What the trigger should do after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// Re-run later with backoff
    Retry,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Locations whose forecast was fetched successfully
    pub checked: usize,
    /// Names of the locations notified, in order
    pub notified: Vec<String>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            outcome: RunOutcome::Success,
            checked: 0,
            notified: Vec::new(),
        }
    }
}

pub struct AlertScheduler {
    locations: Arc<dyn LocationStore>,
    settings: Arc<dyn SettingsStore>,
    forecasts: ForecastClient,
    cooldown: Arc<dyn CooldownStore>,
    notifier: Arc<dyn Notifier>,
    threshold_pct: u8,
    clock: fn() -> DateTime<Utc>,
}

impl AlertScheduler {
    pub fn new(
        locations: Arc<dyn LocationStore>,
        settings: Arc<dyn SettingsStore>,
        forecasts: ForecastClient,
        cooldown: Arc<dyn CooldownStore>,
        notifier: Arc<dyn Notifier>,
        threshold_pct: u8,
    ) -> Self {
        Self {
            locations,
            settings,
            forecasts,
            cooldown,
            notifier,
            threshold_pct,
            clock: Utc::now,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cooldown(&self) -> &Arc<dyn CooldownStore> {
        &self.cooldown
    }

    /// Execute one run with `overrides`.
    pub async fn run(&self, overrides: &RunOverrides) -> RunReport {
        let mut report = RunReport::new();

        if !overrides.bypass_alerts_enabled_check && !self.alerts_enabled() {
            tracing::debug!("Rain alerts are disabled, skipping run");
            return report;
        }

        let favorites = match self.locations.list_saved() {
            Ok(favorites) => favorites,
            Err(e) => {
                tracing::warn!("Failed to list saved locations: {}", e);
                Vec::new()
            }
        };
        let targets: Vec<Location> = if overrides.send_to_all_saved {
            favorites
        } else {
            favorites.into_iter().take(1).collect()
        };
        if targets.is_empty() {
            tracing::debug!("No saved locations, nothing to check");
            return report;
        }

        for city in &targets {
            let snapshot = match self.forecasts.fetch(city).await {
                Ok(snapshot) => snapshot,
                Err(FetchError::Retryable(e)) => {
                    tracing::warn!("Forecast for {} failed ({}), retrying run later", city.name, e);
                    report.outcome = RunOutcome::Retry;
                    return report;
                }
                Err(FetchError::Terminal(e)) => {
                    tracing::warn!("Forecast for {} failed ({}), ending run", city.name, e);
                    return report;
                }
            };
            report.checked += 1;

            let decision =
                policy::decide(&snapshot, self.threshold_pct, overrides.forced_probability_pct);
            tracing::debug!(
                "City={} nextHour={} (threshold={})",
                city.name,
                decision.probability_used,
                self.threshold_pct
            );
            if !decision.eligible {
                continue;
            }

            if !overrides.bypass_cooldown && !self.cooldown_allows() {
                tracing::debug!("Cooldown active, no notification for {}", city.name);
                continue;
            }

            if !self.notifier.permission_granted() {
                tracing::warn!("Notification permission missing, cannot notify {}", city.name);
                continue;
            }

            let sent = match self.notifier.send(&city.name, decision.probability_used).await {
                Ok(sent) => sent,
                Err(NotifyError::PermissionRevoked) => {
                    tracing::warn!("Permission revoked while notifying {}", city.name);
                    false
                }
                Err(e) => {
                    tracing::warn!("Notification for {} failed: {}", city.name, e);
                    false
                }
            };
            tracing::debug!(
                "notifyRain city={}, prob={}, sent={}",
                city.name,
                decision.probability_used,
                sent
            );

            if sent {
                report.notified.push(city.name.clone());
                if !overrides.bypass_cooldown {
                    if let Err(e) = self.cooldown.mark_notified((self.clock)()) {
                        tracing::warn!("Failed to record notification time: {}", e);
                    }
                }
            }
        }

        tracing::info!(
            "Alert run done: checked={} notified={}",
            report.checked,
            report.notified.len()
        );
        report
    }

    fn alerts_enabled(&self) -> bool {
        self.settings.alerts_enabled().unwrap_or_else(|e| {
            tracing::warn!("Failed to read alerts setting: {}", e);
            false
        })
    }

    /// An unreadable cooldown counts as active.
    fn cooldown_allows(&self) -> bool {
        self.cooldown.is_allowed((self.clock)()).unwrap_or_else(|e| {
            tracing::warn!("Failed to read cooldown: {}", e);
            false
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::cooldown::MemoryCooldownStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use raincheck_store::Database;
    use raincheck_weather::provider::{ForecastDto, ForecastProvider, HourlyDto, ProviderError};

    /// Answers by latitude: `Ok(pct)` as the only hourly point, or an HTTP status.
    #[derive(Default)]
    pub(crate) struct FakeProvider {
        pub answers: Mutex<Vec<(f64, Result<i64, u16>)>>,
        pub calls: Mutex<Vec<f64>>,
    }

    impl FakeProvider {
        pub fn answer(self, latitude: f64, answer: Result<i64, u16>) -> Self {
            self.answers.lock().push((latitude, answer));
            self
        }
    }

    #[async_trait]
    impl ForecastProvider for FakeProvider {
        async fn fetch(&self, latitude: f64, _longitude: f64) -> Result<ForecastDto, ProviderError> {
            self.calls.lock().push(latitude);
            let answer = self
                .answers
                .lock()
                .iter()
                .find(|(lat, _)| *lat == latitude)
                .map(|(_, a)| *a)
                .unwrap_or(Ok(0));

            match answer {
                Ok(pct) => Ok(ForecastDto {
                    hourly: Some(HourlyDto {
                        time: vec!["2000-01-01T00:00".to_string()],
                        temperature_2m: vec![Some(10.0)],
                        precipitation_probability: vec![Some(pct)],
                    }),
                    ..Default::default()
                }),
                Err(status) => Err(ProviderError::Http {
                    status,
                    body: String::new(),
                }),
            }
        }
    }

    pub(crate) struct FakeNotifier {
        pub granted: bool,
        pub revoke_on_send: bool,
        pub sent: Mutex<Vec<(String, u8)>>,
    }

    impl FakeNotifier {
        pub fn granted() -> Self {
            Self {
                granted: true,
                revoke_on_send: false,
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        fn permission_granted(&self) -> bool {
            self.granted
        }

        async fn send(&self, location_name: &str, probability_pct: u8) -> Result<bool, NotifyError> {
            if self.revoke_on_send {
                return Err(NotifyError::PermissionRevoked);
            }
            self.sent.lock().push((location_name.to_string(), probability_pct));
            Ok(true)
        }
    }

    pub(crate) struct Fixture {
        pub db: Arc<Database>,
        pub provider: Arc<FakeProvider>,
        pub notifier: Arc<FakeNotifier>,
        pub cooldown: Arc<MemoryCooldownStore>,
    }

    impl Fixture {
        pub fn new(provider: FakeProvider, notifier: FakeNotifier, cities: &[(&str, f64)]) -> Self {
            let db = Arc::new(Database::in_memory().unwrap());
            for (name, lat) in cities {
                db.save(&Location::new(*name, *lat, 15.0)).unwrap();
            }
            db.set_alerts_enabled(true).unwrap();

            Self {
                db,
                provider: Arc::new(provider),
                notifier: Arc::new(notifier),
                cooldown: Arc::new(MemoryCooldownStore::default()),
            }
        }

        pub fn scheduler(&self, threshold_pct: u8) -> AlertScheduler {
            AlertScheduler::new(
                self.db.clone(),
                self.db.clone(),
                ForecastClient::new(self.provider.clone()),
                self.cooldown.clone(),
                self.notifier.clone(),
                threshold_pct,
            )
        }

        pub fn sent_names(&self) -> Vec<String> {
            self.notifier.sent.lock().iter().map(|(n, _)| n.clone()).collect()
        }
    }

    #[tokio::test]
    async fn test_retryable_failure_aborts_whole_run() {
        let fx = Fixture::new(
            FakeProvider::default().answer(1.0, Err(503)).answer(2.0, Ok(95)),
            FakeNotifier::granted(),
            &[("CityA", 1.0), ("CityB", 2.0)],
        );

        let report = fx.scheduler(60).run(&RunOverrides { send_to_all_saved: true, ..Default::default() }).await;

        assert_eq!(report.outcome, RunOutcome::Retry);
        assert_eq!(*fx.provider.calls.lock(), vec![1.0]);
        assert!(fx.sent_names().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_failure_ends_run_successfully() {
        let fx = Fixture::new(
            FakeProvider::default().answer(1.0, Err(404)).answer(2.0, Ok(95)),
            FakeNotifier::granted(),
            &[("CityA", 1.0), ("CityB", 2.0)],
        );

        let report = fx.scheduler(60).run(&RunOverrides { send_to_all_saved: true, ..Default::default() }).await;

        assert_eq!(report.outcome, RunOutcome::Success);
        assert_eq!(*fx.provider.calls.lock(), vec![1.0]);
        assert!(fx.sent_names().is_empty());
    }

    #[tokio::test]
    async fn test_forced_probability_with_bypassed_cooldown_notifies_all() {
        let fx = Fixture::new(
            FakeProvider::default().answer(1.0, Ok(0)).answer(2.0, Ok(0)),
            FakeNotifier::granted(),
            &[("CityA", 1.0), ("CityB", 2.0)],
        );
        let overrides = RunOverrides {
            forced_probability_pct: Some(92),
            send_to_all_saved: true,
            bypass_cooldown: true,
            bypass_alerts_enabled_check: false,
        };

        let report = fx.scheduler(80).run(&overrides).await;

        assert_eq!(report.outcome, RunOutcome::Success);
        assert_eq!(
            *fx.notifier.sent.lock(),
            vec![("CityA".to_string(), 92), ("CityB".to_string(), 92)]
        );
        assert_eq!(fx.cooldown.last_notified().unwrap(), None);
    }

    #[tokio::test]
    async fn test_global_cooldown_suppresses_later_targets() {
        let fx = Fixture::new(
            FakeProvider::default().answer(1.0, Ok(90)).answer(2.0, Ok(90)),
            FakeNotifier::granted(),
            &[("CityA", 1.0), ("CityB", 2.0)],
        );
        let scheduler = fx.scheduler(60);
        let all = RunOverrides { send_to_all_saved: true, ..Default::default() };

        let report = scheduler.run(&all).await;
        assert_eq!(report.notified, vec!["CityA".to_string()]);
        assert_eq!(report.checked, 2);
        assert!(fx.cooldown.last_notified().unwrap().is_some());

        let again = scheduler.run(&all).await;
        assert!(again.notified.is_empty());
        assert_eq!(fx.sent_names(), vec!["CityA".to_string()]);
    }

    #[tokio::test]
    async fn test_alerts_disabled_skips_without_fetching() {
        let fx = Fixture::new(
            FakeProvider::default().answer(1.0, Ok(90)),
            FakeNotifier::granted(),
            &[("CityA", 1.0)],
        );
        fx.db.set_alerts_enabled(false).unwrap();

        let report = fx.scheduler(60).run(&RunOverrides::production()).await;

        assert_eq!(report.outcome, RunOutcome::Success);
        assert!(fx.provider.calls.lock().is_empty());

        let bypass = RunOverrides { bypass_alerts_enabled_check: true, ..Default::default() };
        let report = fx.scheduler(60).run(&bypass).await;
        assert_eq!(report.notified, vec!["CityA".to_string()]);
    }

    #[tokio::test]
    async fn test_production_run_checks_only_first_favorite() {
        let fx = Fixture::new(
            FakeProvider::default().answer(1.0, Ok(10)).answer(2.0, Ok(99)),
            FakeNotifier::granted(),
            &[("Alingsås", 1.0), ("Borås", 2.0)],
        );

        let report = fx.scheduler(60).run(&RunOverrides::production()).await;

        assert_eq!(report.checked, 1);
        assert_eq!(*fx.provider.calls.lock(), vec![1.0]);
        assert!(report.notified.is_empty());
    }

    #[tokio::test]
    async fn test_ineligible_target_does_not_consult_cooldown() {
        let fx = Fixture::new(
            FakeProvider::default().answer(1.0, Ok(59)),
            FakeNotifier::granted(),
            &[("CityA", 1.0)],
        );

        let report = fx.scheduler(60).run(&RunOverrides::production()).await;

        assert!(report.notified.is_empty());
        assert_eq!(fx.cooldown.last_notified().unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_permission_skips_without_marking() {
        let notifier = FakeNotifier {
            granted: false,
            ..FakeNotifier::granted()
        };
        let fx = Fixture::new(FakeProvider::default().answer(1.0, Ok(90)), notifier, &[("CityA", 1.0)]);

        let report = fx.scheduler(60).run(&RunOverrides::production()).await;

        assert_eq!(report.outcome, RunOutcome::Success);
        assert!(report.notified.is_empty());
        assert_eq!(fx.cooldown.last_notified().unwrap(), None);
    }

    #[tokio::test]
    async fn test_permission_revoked_during_send_is_skip() {
        let notifier = FakeNotifier {
            revoke_on_send: true,
            ..FakeNotifier::granted()
        };
        let fx = Fixture::new(
            FakeProvider::default().answer(1.0, Ok(90)).answer(2.0, Ok(90)),
            notifier,
            &[("CityA", 1.0), ("CityB", 2.0)],
        );

        let report = fx.scheduler(60).run(&RunOverrides { send_to_all_saved: true, ..Default::default() }).await;

        assert_eq!(report.outcome, RunOutcome::Success);
        assert_eq!(report.checked, 2);
        assert!(report.notified.is_empty());
        assert_eq!(fx.cooldown.last_notified().unwrap(), None);
    }

    #[tokio::test]
    async fn test_no_favorites_is_success() {
        let fx = Fixture::new(FakeProvider::default(), FakeNotifier::granted(), &[]);
        let report = fx.scheduler(60).run(&RunOverrides::test_mode()).await;
        assert_eq!(report, RunReport::new());
    }

    #[tokio::test]
    async fn test_cooldown_marked_with_clock_time() {
        let fx = Fixture::new(
            FakeProvider::default().answer(1.0, Ok(90)),
            FakeNotifier::granted(),
            &[("CityA", 1.0)],
        );
        let fixed = || DateTime::from_timestamp_millis(1_717_232_400_000).unwrap_or_default();

        fx.scheduler(60).with_clock(fixed).run(&RunOverrides::production()).await;

        assert_eq!(
            fx.cooldown.last_notified().unwrap().map(|t| t.timestamp_millis()),
            Some(1_717_232_400_000)
        );
    }
}
