//! Open-Meteo forecast endpoint and its raw payload.

use async_trait::async_trait;
use raincheck_core::config::ApiConfig;
use raincheck_core::error::{NetworkError, ReqwestErrorExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

use crate::retry::{classify_error, classify_status, RetryDecision};

const CURRENT_FIELDS: &str = "temperature_2m";
const HOURLY_FIELDS: &str = "temperature_2m,precipitation_probability";
const DAILY_FIELDS: &str =
    "temperature_2m_max,temperature_2m_min,precipitation_probability_max,weathercode";

/// Raw forecast payload. Every field may be absent; series may be short or hold nulls.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForecastDto {
    #[serde(default)]
    pub current: Option<CurrentDto>,
    #[serde(default)]
    pub hourly: Option<HourlyDto>,
    #[serde(default)]
    pub daily: Option<DailyDto>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CurrentDto {
    #[serde(rename = "temperature_2m")]
    pub temperature_2m: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HourlyDto {
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(rename = "temperature_2m", default)]
    pub temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    pub precipitation_probability: Vec<Option<i64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DailyDto {
    /// ISO dates, `yyyy-MM-dd`
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(rename = "temperature_2m_max", default)]
    pub temperature_2m_max: Vec<Option<f64>>,
    #[serde(rename = "temperature_2m_min", default)]
    pub temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    pub precipitation_probability_max: Vec<Option<i64>>,
    #[serde(default)]
    pub weathercode: Vec<Option<i32>>,
}

/// Failures of the raw forecast request, before retry classification.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Request error: {0}")]
    Request(String),
}

impl ProviderError {
    pub fn retry_decision(&self) -> RetryDecision {
        match self {
            ProviderError::Http { status, .. } => match reqwest::StatusCode::from_u16(*status) {
                Ok(code) => classify_status(code),
                Err(_) => RetryDecision::Permanent,
            },
            ProviderError::Network(_) => RetryDecision::Transient,
            ProviderError::Decode(_) | ProviderError::Request(_) => RetryDecision::Permanent,
        }
    }

    pub fn into_network_error(self) -> NetworkError {
        match self {
            ProviderError::Http { status, body } => NetworkError::Status {
                status,
                message: body,
            },
            ProviderError::Network(msg) | ProviderError::Request(msg) => {
                NetworkError::Unreachable(msg)
            }
            ProviderError::Decode(msg) => NetworkError::InvalidResponse(msg),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return ProviderError::Http {
                status: status.as_u16(),
                body: err.to_string(),
            };
        }
        match classify_error(&err) {
            RetryDecision::Transient => ProviderError::Network(err.into_network_error().to_string()),
            RetryDecision::Permanent if err.is_decode() => ProviderError::Decode(err.to_string()),
            RetryDecision::Permanent => ProviderError::Request(err.to_string()),
        }
    }
}

/// Source of raw forecast payloads.
#[async_trait]
pub trait ForecastProvider: Send + Sync {
    async fn fetch(&self, latitude: f64, longitude: f64) -> Result<ForecastDto, ProviderError>;
}

/// Build the shared HTTP client: fixed timeouts, user agent and language header.
pub fn build_http_client(api: &ApiConfig, accept_language: &str) -> Result<Client, ProviderError> {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(accept_language) {
        headers.insert(ACCEPT_LANGUAGE, value);
    }

    Client::builder()
        .connect_timeout(Duration::from_secs(api.connect_timeout_secs))
        .timeout(Duration::from_secs(api.request_timeout_secs))
        .user_agent(api.user_agent.clone())
        .default_headers(headers)
        .build()
        .map_err(|e| ProviderError::Request(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct OpenMeteoProvider {
    client: Client,
    base_url: String,
}

impl OpenMeteoProvider {
    pub fn new(api: &ApiConfig, accept_language: &str) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_http_client(api, accept_language)?,
            base_url: api.forecast_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ForecastProvider for OpenMeteoProvider {
    #[instrument(skip(self), level = "debug")]
    async fn fetch(&self, latitude: f64, longitude: f64) -> Result<ForecastDto, ProviderError> {
        let url = format!("{}/v1/forecast", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("current", CURRENT_FIELDS.to_string()),
                ("hourly", HOURLY_FIELDS.to_string()),
                ("daily", DAILY_FIELDS.to_string()),
                ("timezone", "auto".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Forecast HTTP {} body={}", status.as_u16(), body);
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OpenMeteoProvider {
        OpenMeteoProvider::with_client(Client::new(), &server.uri())
    }

    #[tokio::test]
    async fn test_fetch_decodes_partial_payload() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("timezone", "auto"))
            .and(query_param("latitude", "59.33"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "current": {"temperature_2m": 4.5},
                "hourly": {
                    "time": ["2024-01-01T10:00", "2024-01-01T11:00"],
                    "temperature_2m": [4.0, null],
                    "precipitation_probability": [10]
                }
            })))
            .mount(&mock_server)
            .await;

        let dto = provider(&mock_server).fetch(59.33, 18.06).await.unwrap();

        assert_eq!(dto.current.unwrap().temperature_2m, Some(4.5));
        let hourly = dto.hourly.unwrap();
        assert_eq!(hourly.time.len(), 2);
        assert_eq!(hourly.temperature_2m, vec![Some(4.0), None]);
        assert!(dto.daily.is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&mock_server)
            .await;

        let err = provider(&mock_server).fetch(1.0, 2.0).await.unwrap_err();

        assert!(matches!(err, ProviderError::Http { status: 503, .. }));
        assert_eq!(err.retry_decision(), RetryDecision::Transient);
    }

    #[tokio::test]
    async fn test_client_error_is_terminal() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": true,
                "reason": "Latitude must be in range of -90 to 90°."
            })))
            .mount(&mock_server)
            .await;

        let err = provider(&mock_server).fetch(100.0, 2.0).await.unwrap_err();

        assert!(matches!(err, ProviderError::Http { status: 400, .. }));
        assert_eq!(err.retry_decision(), RetryDecision::Permanent);
    }

    #[tokio::test]
    async fn test_malformed_body_is_terminal() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&mock_server)
            .await;

        let err = provider(&mock_server).fetch(1.0, 2.0).await.unwrap_err();

        assert!(matches!(err, ProviderError::Decode(_)));
        assert_eq!(err.retry_decision(), RetryDecision::Permanent);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_retryable() {
        let provider = OpenMeteoProvider::with_client(Client::new(), "http://127.0.0.1:9");
        let err = provider.fetch(1.0, 2.0).await.unwrap_err();
        assert_eq!(err.retry_decision(), RetryDecision::Transient);
    }
}
