//! Periodic and one-shot execution of alert runs.
//!
//! Periodic and one-shot work are separate identities; each runs at most one
//! alert run at a time. Every run waits for the connectivity signal first.
//! Re-enqueuing a one-shot replaces an instance that has not started yet.
//! Cancelling reaches every unfinished one-shot, but a run already in
//! progress completes.

use raincheck_core::config::AlertsConfig;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::scheduler::{AlertScheduler, RunOutcome, RunOverrides, RunReport};

const PENDING: u8 = 0;
const STARTED: u8 = 1;
const REPLACED: u8 = 2;

/// Timing of periodic work and of retries.
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// Period between two scheduled runs
    pub interval: Duration,
    /// Window at the end of each period in which the run may fire
    pub flex: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// Runs a one-shot may make before giving up; `None` retries until cancelled
    pub one_shot_max_attempts: Option<u32>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self::from_alerts(&AlertsConfig::default())
    }
}

impl TriggerConfig {
    pub fn from_alerts(config: &AlertsConfig) -> Self {
        let minutes = |m: u32| Duration::from_secs(u64::from(m) * 60);
        Self {
            interval: minutes(config.check_interval_minutes),
            flex: minutes(config.flex_minutes),
            backoff_initial: minutes(config.backoff_initial_minutes),
            backoff_max: minutes(config.backoff_max_minutes),
            one_shot_max_attempts: None,
        }
    }

    pub fn with_one_shot_max_attempts(mut self, attempts: u32) -> Self {
        self.one_shot_max_attempts = Some(attempts.max(1));
        self
    }

    /// Delay from one finished periodic run to the start of the next flex window.
    pub fn period_delay(&self) -> Duration {
        self.interval.saturating_sub(self.flex)
    }
}

/// Exponential backoff between retries of a failed run.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            attempt: 0,
        }
    }

    /// Calculate the delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // initial * 2^attempt, capped
        let factor = 2u64.saturating_pow(attempt);
        let delay_ms = (self.initial.as_millis() as u64).saturating_mul(factor);
        let capped = delay_ms.min(self.max.as_millis() as u64);
        Duration::from_millis(capped)
    }

    /// Delay before the next retry; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

struct Periodic {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct OneShot {
    token: CancellationToken,
    state: Arc<AtomicU8>,
    handle: JoinHandle<Option<RunReport>>,
}

/// Drives [`AlertScheduler`] runs on a timer and on demand.
pub struct AlertTrigger {
    scheduler: Arc<AlertScheduler>,
    config: TriggerConfig,
    online: watch::Receiver<bool>,
    one_shot_lock: Arc<AsyncMutex<()>>,
    periodic: parking_lot::Mutex<Option<Periodic>>,
    /// Unfinished one-shots in enqueue order; the last one is the current.
    one_shots: parking_lot::Mutex<Vec<OneShot>>,
}

impl AlertTrigger {
    /// `online` reports network connectivity; runs wait while it is `false`.
    pub fn new(
        scheduler: Arc<AlertScheduler>,
        config: TriggerConfig,
        online: watch::Receiver<bool>,
    ) -> Self {
        Self {
            scheduler,
            config,
            online,
            one_shot_lock: Arc::new(AsyncMutex::new(())),
            periodic: parking_lot::Mutex::new(None),
            one_shots: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Start periodic runs, replacing any existing schedule. The first run fires right away.
    pub fn schedule(&self) {
        let token = CancellationToken::new();
        let handle = tokio::spawn(periodic_loop(
            self.scheduler.clone(),
            self.config.clone(),
            self.online.clone(),
            token.clone(),
        ));

        if let Some(previous) = self.periodic.lock().replace(Periodic { token, handle }) {
            previous.token.cancel();
        }
        tracing::info!(
            "Periodic rain check scheduled every {:?} (flex {:?})",
            self.config.interval,
            self.config.flex
        );
    }

    /// Enqueue a production one-shot run.
    pub fn run_once(&self) {
        self.enqueue_once(RunOverrides::production());
    }

    /// Enqueue a one-shot run with test overrides, see [`RunOverrides::test_mode`].
    pub fn run_once_test(&self, overrides: RunOverrides) {
        self.enqueue_once(overrides);
    }

    fn enqueue_once(&self, overrides: RunOverrides) {
        let mut live = self.one_shots.lock();
        live.retain(|o| !o.handle.is_finished());

        for previous in live.iter() {
            let replaced = previous
                .state
                .compare_exchange(PENDING, REPLACED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
            if replaced {
                previous.token.cancel();
                tracing::debug!("Replaced pending one-shot run");
            }
        }

        let token = CancellationToken::new();
        let state = Arc::new(AtomicU8::new(PENDING));
        let handle = tokio::spawn(one_shot_task(
            self.scheduler.clone(),
            self.config.clone(),
            self.online.clone(),
            self.one_shot_lock.clone(),
            state.clone(),
            token.clone(),
            overrides,
        ));

        live.push(OneShot {
            token,
            state,
            handle,
        });
    }

    /// Wait for the most recently enqueued one-shot.
    ///
    /// Returns its last report, or `None` if it was replaced, cancelled or never enqueued.
    pub async fn wait_one_shot(&self) -> Option<RunReport> {
        let handle = self.one_shots.lock().pop().map(|o| o.handle)?;
        match handle.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("One-shot run failed: {}", e);
                None
            }
        }
    }

    /// Stop periodic and one-shot work. A run already in progress completes.
    pub fn cancel(&self) {
        let (periodic, one_shots) = self.take_work();
        if let Some(periodic) = periodic {
            periodic.token.cancel();
        }
        for one_shot in one_shots {
            one_shot.token.cancel();
        }
        tracing::info!("Rain check work cancelled");
    }

    /// Cancel all work and wait for in-progress runs to finish.
    pub async fn shutdown(&self) {
        let (periodic, one_shots) = self.take_work();

        if let Some(periodic) = periodic {
            periodic.token.cancel();
            if let Err(e) = periodic.handle.await {
                tracing::warn!("Periodic rain check ended abnormally: {}", e);
            }
        }
        for one_shot in &one_shots {
            one_shot.token.cancel();
        }
        for one_shot in one_shots {
            if let Err(e) = one_shot.handle.await {
                tracing::warn!("One-shot rain check ended abnormally: {}", e);
            }
        }
    }

    fn take_work(&self) -> (Option<Periodic>, Vec<OneShot>) {
        (
            self.periodic.lock().take(),
            std::mem::take(&mut *self.one_shots.lock()),
        )
    }

    /// Forget the last notification time. Returns `true` if one was recorded.
    pub fn clear_cooldown(&self) -> bool {
        match self.scheduler.cooldown().clear() {
            Ok(had) => had,
            Err(e) => {
                tracing::warn!("Failed to clear cooldown: {}", e);
                false
            }
        }
    }

    /// Time of the last notification in epoch millis.
    pub fn last_notify_timestamp(&self) -> Option<i64> {
        match self.scheduler.cooldown().last_notified() {
            Ok(last) => last.map(|t| t.timestamp_millis()),
            Err(e) => {
                tracing::warn!("Failed to read cooldown: {}", e);
                None
            }
        }
    }
}

/// Wait until connectivity is up. `false` if cancelled or the signal went away.
async fn wait_online(online: &mut watch::Receiver<bool>, cancel: &CancellationToken) -> bool {
    if *online.borrow() {
        return true;
    }
    tracing::debug!("Waiting for network connectivity");

    tokio::select! {
        _ = cancel.cancelled() => false,
        up = async { online.wait_for(|up| *up).await.is_ok() } => {
            if !up {
                tracing::warn!("Connectivity signal closed while offline");
            }
            up
        }
    }
}

/// Sleep for `delay` unless cancelled first.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

async fn periodic_loop(
    scheduler: Arc<AlertScheduler>,
    config: TriggerConfig,
    mut online: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new(config.backoff_initial, config.backoff_max);
    let mut delay = Duration::ZERO;

    loop {
        if !sleep_or_cancel(delay, &cancel).await || !wait_online(&mut online, &cancel).await {
            break;
        }

        let report = scheduler.run(&RunOverrides::production()).await;
        delay = match report.outcome {
            RunOutcome::Retry => {
                let delay = backoff.next_delay();
                tracing::info!("Periodic run will retry in {:?}", delay);
                delay
            }
            RunOutcome::Success => {
                backoff.reset();
                config.period_delay()
            }
        };
    }
    tracing::debug!("Periodic rain check stopped");
}

async fn one_shot_task(
    scheduler: Arc<AlertScheduler>,
    config: TriggerConfig,
    mut online: watch::Receiver<bool>,
    lock: Arc<AsyncMutex<()>>,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
    overrides: RunOverrides,
) -> Option<RunReport> {
    let _guard = tokio::select! {
        biased;
        _ = cancel.cancelled() => return None,
        guard = lock.lock_owned() => guard,
    };
    if cancel.is_cancelled() || !wait_online(&mut online, &cancel).await {
        return None;
    }
    if state
        .compare_exchange(PENDING, STARTED, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return None;
    }

    let mut backoff = Backoff::new(config.backoff_initial, config.backoff_max);
    let mut attempts = 0u32;
    loop {
        let report = scheduler.run(&overrides).await;
        attempts = attempts.saturating_add(1);
        if report.outcome == RunOutcome::Success {
            return Some(report);
        }
        if config.one_shot_max_attempts.is_some_and(|max| attempts >= max) {
            tracing::warn!("One-shot run gave up after {} attempt(s)", attempts);
            return Some(report);
        }

        let delay = backoff.next_delay();
        tracing::info!("One-shot run will retry in {:?}", delay);
        if !sleep_or_cancel(delay, &cancel).await || !wait_online(&mut online, &cancel).await {
            return Some(report);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::scheduler::tests::{FakeNotifier, FakeProvider, Fixture};
    use raincheck_store::SettingsStore;

    const MINUTE: Duration = Duration::from_secs(60);

    fn trigger(fx: &Fixture, online: watch::Receiver<bool>) -> AlertTrigger {
        trigger_with(fx, online, TriggerConfig::default())
    }

    fn trigger_with(
        fx: &Fixture,
        online: watch::Receiver<bool>,
        config: TriggerConfig,
    ) -> AlertTrigger {
        AlertTrigger::new(Arc::new(fx.scheduler(60)), config, online)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(30 * MINUTE, 300 * MINUTE);
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs() / 60).collect();
        assert_eq!(delays, vec![30, 60, 120, 240, 300, 300]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), 30 * MINUTE);
        assert_eq!(backoff.delay_for_attempt(200), 300 * MINUTE);
    }

    #[test]
    fn test_trigger_config_from_alerts() {
        let config = TriggerConfig::default();
        assert_eq!(config.interval, 180 * MINUTE);
        assert_eq!(config.period_delay(), 150 * MINUTE);
        assert_eq!(config.backoff_initial, 30 * MINUTE);
    }

    #[tokio::test]
    async fn test_run_once_test_bypasses_gates() {
        let fx = Fixture::new(
            FakeProvider::default(),
            FakeNotifier::granted(),
            &[("CityA", 1.0), ("CityB", 2.0)],
        );
        fx.db.set_alerts_enabled(false).unwrap();
        let (_tx, online) = watch::channel(true);
        let trigger = trigger(&fx, online);

        trigger.run_once_test(RunOverrides::test_mode());
        let report = trigger.wait_one_shot().await.unwrap();

        assert_eq!(report.notified, vec!["CityA".to_string(), "CityB".to_string()]);
        assert!(fx.notifier.sent.lock().iter().all(|(_, pct)| *pct == 85));
        assert_eq!(trigger.last_notify_timestamp(), None);
    }

    #[tokio::test]
    async fn test_one_shot_waits_for_connectivity() {
        let fx = Fixture::new(
            FakeProvider::default().answer(1.0, Ok(90)),
            FakeNotifier::granted(),
            &[("CityA", 1.0)],
        );
        let (tx, online) = watch::channel(false);
        let trigger = trigger(&fx, online);

        trigger.run_once();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(fx.provider.calls.lock().is_empty());

        tx.send(true).unwrap();
        let report = trigger.wait_one_shot().await.unwrap();

        assert_eq!(report.notified, vec!["CityA".to_string()]);
        assert!(trigger.last_notify_timestamp().is_some());
        assert!(trigger.clear_cooldown());
        assert!(!trigger.clear_cooldown());
        assert_eq!(trigger.last_notify_timestamp(), None);
    }

    #[tokio::test]
    async fn test_pending_one_shot_is_replaced() {
        let fx = Fixture::new(
            FakeProvider::default(),
            FakeNotifier::granted(),
            &[("CityA", 1.0), ("CityB", 2.0)],
        );
        let (tx, online) = watch::channel(false);
        let trigger = trigger(&fx, online);

        trigger.run_once_test(RunOverrides::test_mode());
        trigger.run_once_test(RunOverrides {
            forced_probability_pct: Some(95),
            ..RunOverrides::test_mode()
        });
        tx.send(true).unwrap();
        trigger.wait_one_shot().await.unwrap();

        assert_eq!(
            *fx.notifier.sent.lock(),
            vec![("CityA".to_string(), 95), ("CityB".to_string(), 95)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_retries_with_backoff_until_cancelled() {
        let fx = Fixture::new(
            FakeProvider::default().answer(1.0, Err(503)),
            FakeNotifier::granted(),
            &[("CityA", 1.0)],
        );
        let (_tx, online) = watch::channel(true);
        let trigger = trigger(&fx, online);

        trigger.schedule();
        // Runs at 0, 30 and 90 minutes; the next one is due at 210.
        tokio::time::sleep(100 * MINUTE).await;
        assert_eq!(fx.provider.calls.lock().len(), 3);

        trigger.cancel();
        tokio::time::sleep(600 * MINUTE).await;
        assert_eq!(fx.provider.calls.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_success_waits_for_next_window() {
        let fx = Fixture::new(
            FakeProvider::default().answer(1.0, Ok(10)),
            FakeNotifier::granted(),
            &[("CityA", 1.0)],
        );
        let (_tx, online) = watch::channel(true);
        let trigger = trigger(&fx, online);

        trigger.schedule();
        tokio::time::sleep(160 * MINUTE).await;
        assert_eq!(fx.provider.calls.lock().len(), 2);

        trigger.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_one_shot_waiting_to_retry() {
        let fx = Fixture::new(
            FakeProvider::default().answer(1.0, Err(503)),
            FakeNotifier::granted(),
            &[("CityA", 1.0)],
        );
        let (_tx, online) = watch::channel(true);
        let trigger = trigger(&fx, online);

        trigger.run_once();
        tokio::time::sleep(MINUTE).await;
        assert_eq!(fx.provider.calls.lock().len(), 1);

        // The first run is backing off, so this one queues behind it.
        trigger.run_once();
        tokio::time::sleep(MINUTE).await;

        trigger.cancel();
        tokio::time::sleep(1000 * MINUTE).await;
        assert_eq!(fx.provider.calls.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_awaits_every_started_one_shot() {
        let fx = Fixture::new(
            FakeProvider::default().answer(1.0, Err(503)),
            FakeNotifier::granted(),
            &[("CityA", 1.0)],
        );
        let (_tx, online) = watch::channel(true);
        let trigger = trigger(&fx, online);

        trigger.run_once();
        tokio::time::sleep(MINUTE).await;
        trigger.run_once_test(RunOverrides::test_mode());
        tokio::time::sleep(MINUTE).await;

        trigger.shutdown().await;
        assert!(trigger.wait_one_shot().await.is_none());

        tokio::time::sleep(1000 * MINUTE).await;
        assert_eq!(fx.provider.calls.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_gives_up_after_max_attempts() {
        let fx = Fixture::new(
            FakeProvider::default().answer(1.0, Err(503)),
            FakeNotifier::granted(),
            &[("CityA", 1.0)],
        );
        let (_tx, online) = watch::channel(true);
        let config = TriggerConfig::default().with_one_shot_max_attempts(2);
        let trigger = trigger_with(&fx, online, config);

        trigger.run_once();
        let report = trigger.wait_one_shot().await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Retry);
        assert_eq!(fx.provider.calls.lock().len(), 2);
    }
}
