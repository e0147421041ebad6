//! Forecast fetching with typed failure classification.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Timelike, Utc};
use raincheck_core::error::{AppError, WeatherError};
use std::sync::Arc;
use thiserror::Error;

use crate::format::Language;
use crate::provider::{ForecastDto, ForecastProvider, ProviderError};
use crate::retry::RetryDecision;
use crate::types::{clamp_pct, CachedForecast, DaySummary, ForecastSnapshot, HourPoint, Location};

/// Hourly points kept in a snapshot.
pub const MAX_HOURLY_POINTS: usize = 24;
/// Days kept in a snapshot.
pub const MAX_DAILY_POINTS: usize = 5;

const LOCAL_TIMESTAMP_FORMATS: [&str; 3] =
    ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];
const OFFSET_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M%:z";

/// Why a forecast fetch failed, from the point of view of a re-run.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Server error or network/IO failure; a later run may succeed.
    #[error("Retryable forecast failure: {0}")]
    Retryable(#[source] ProviderError),

    /// Client error, malformed response or anything unexpected.
    #[error("Terminal forecast failure: {0}")]
    Terminal(#[source] ProviderError),
}

impl FetchError {
    pub fn classify(err: ProviderError) -> Self {
        match err.retry_decision() {
            RetryDecision::Transient => FetchError::Retryable(err),
            RetryDecision::Permanent => FetchError::Terminal(err),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Retryable(_))
    }

    /// Error text for the details view.
    pub fn user_message(&self, language: Language) -> &'static str {
        match language {
            Language::Swedish => "Kunde inte hämta prognos",
            Language::English => "Could not load forecast",
        }
    }
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Retryable(e) => AppError::Network(e.into_network_error()),
            FetchError::Terminal(e) => AppError::Weather(WeatherError::Rejected(e.to_string())),
        }
    }
}

/// Best-effort persistence of fetch results.
pub trait ForecastSink: Send + Sync {
    /// Replace the cached forecast of a saved location.
    fn store_forecast(&self, cached: &CachedForecast) -> anyhow::Result<()>;

    /// Insert or refresh the location in the recently viewed list.
    fn record_recent(&self, location: &Location, visited_at_ms: i64) -> anyhow::Result<()>;
}

/// Fetches forecasts and turns raw payloads into [`ForecastSnapshot`]s.
#[derive(Clone)]
pub struct ForecastClient {
    provider: Arc<dyn ForecastProvider>,
    sink: Option<Arc<dyn ForecastSink>>,
}

impl ForecastClient {
    pub fn new(provider: Arc<dyn ForecastProvider>) -> Self {
        Self {
            provider,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ForecastSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Fetch the forecast for `location`, evaluated against the local clock.
    ///
    /// # Errors
    /// Returns [`FetchError::Retryable`] for 5xx and transport failures and
    /// [`FetchError::Terminal`] for everything else.
    pub async fn fetch(&self, location: &Location) -> Result<ForecastSnapshot, FetchError> {
        let dto = self
            .provider
            .fetch(location.latitude, location.longitude)
            .await
            .map_err(|e| {
                tracing::warn!("Forecast error ({}): {}", location.name, e);
                FetchError::classify(e)
            })?;

        let snapshot = snapshot_from_dto(&dto, &Local::now());
        self.persist(location, &snapshot);
        Ok(snapshot)
    }

    fn persist(&self, location: &Location, snapshot: &ForecastSnapshot) {
        let Some(sink) = &self.sink else {
            return;
        };
        let now_ms = Utc::now().timestamp_millis();

        if let Err(e) = sink.record_recent(location, now_ms) {
            tracing::warn!("Failed to record recent city {}: {}", location.name, e);
        }

        if location.is_saved() {
            let cached = CachedForecast {
                location_id: location.id,
                timestamp_ms: now_ms,
                current_temperature_c: snapshot.current_temperature_c,
                next_hour_rain_pct: snapshot.next_hour_rain_probability_pct,
            };
            if let Err(e) = sink.store_forecast(&cached) {
                tracing::warn!("Failed to cache forecast for {}: {}", location.name, e);
            }
        }
    }
}

/// Map a raw payload to a snapshot, choosing the next hour relative to `now`.
pub fn snapshot_from_dto<Tz: TimeZone>(dto: &ForecastDto, now: &DateTime<Tz>) -> ForecastSnapshot {
    let current_temp = dto
        .current
        .as_ref()
        .and_then(|c| c.temperature_2m)
        .unwrap_or(0.0);

    let (hourly, next_hour) = match &dto.hourly {
        Some(h) if !h.time.is_empty() => {
            let prob_at = |i: usize| clamp_pct(h.precipitation_probability.get(i).copied().flatten().unwrap_or(0));

            let points = h
                .time
                .iter()
                .take(MAX_HOURLY_POINTS)
                .enumerate()
                .map(|(i, ts)| HourPoint {
                    time_iso: ts.clone(),
                    temperature_c: h.temperature_2m.get(i).copied().flatten().unwrap_or(current_temp),
                    rain_probability_pct: prob_at(i),
                })
                .collect();

            let idx = next_hour_index(&h.time, now);
            let prob = prob_at(idx);
            tracing::debug!(
                "nextHour idx={} ts={} prob={}",
                idx,
                h.time.get(idx).map(String::as_str).unwrap_or(""),
                prob
            );
            (points, prob)
        }
        _ => (Vec::new(), 0),
    };

    let daily = match &dto.daily {
        Some(d) => d
            .time
            .iter()
            .take(MAX_DAILY_POINTS)
            .enumerate()
            .map(|(i, date)| DaySummary {
                date_iso: date.clone(),
                t_min_c: d.temperature_2m_min.get(i).copied().flatten().unwrap_or(0.0),
                t_max_c: d.temperature_2m_max.get(i).copied().flatten().unwrap_or(0.0),
                rain_probability_max_pct: clamp_pct(
                    d.precipitation_probability_max.get(i).copied().flatten().unwrap_or(0),
                ),
                weather_code: d.weathercode.get(i).copied().flatten().unwrap_or(0),
            })
            .collect(),
        None => Vec::new(),
    };

    ForecastSnapshot {
        current_temperature_c: current_temp,
        next_hour_rain_probability_pct: next_hour,
        hourly,
        daily,
    }
}

/// Index of the first timestamp strictly after the start of the current hour.
///
/// Falls back to 0 when no timestamp qualifies. Unparseable timestamps never qualify.
pub fn next_hour_index<Tz: TimeZone>(times: &[String], now: &DateTime<Tz>) -> usize {
    let zone = now.timezone();
    let local_now = now.naive_local();
    let hour_start = local_now
        .date()
        .and_hms_opt(local_now.hour(), 0, 0)
        .unwrap_or(local_now);

    times
        .iter()
        .position(|ts| parse_local_timestamp(ts, &zone).is_some_and(|t| t > hour_start))
        .unwrap_or(0)
}

/// Parse a local (`2024-01-01T10:00`) or offset-bearing timestamp into wall time of `zone`.
pub fn parse_local_timestamp<Tz: TimeZone>(ts: &str, zone: &Tz) -> Option<NaiveDateTime> {
    if let Some(local) = LOCAL_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(ts, fmt).ok())
    {
        return Some(local);
    }

    let with_offset = DateTime::parse_from_rfc3339(ts)
        .or_else(|_| DateTime::parse_from_str(ts, OFFSET_TIMESTAMP_FORMAT));

    match with_offset {
        Ok(dt) => Some(dt.with_timezone(zone).naive_local()),
        Err(_) => {
            tracing::warn!("Could not parse timestamp: '{}'", ts);
            None
        }
    }
}
