//! Forward geocoding: place name to candidate locations.
//! Uses the Open-Meteo geocoding API - free, no API key required.

use async_trait::async_trait;
use raincheck_core::config::ApiConfig;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

use crate::provider::{build_http_client, ProviderError};
use crate::types::Location;

/// One candidate returned by a geocoder, as delivered.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GeoPlace {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub admin1: Option<String>,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

impl GeoPlace {
    /// Clean a raw candidate into a transient [`Location`].
    ///
    /// Blank names are dropped, names are trimmed and blank regions become `None`.
    pub fn into_location(self) -> Option<Location> {
        let name = self.name.trim();
        if name.is_empty() {
            return None;
        }
        let non_blank = |s: Option<String>| s.filter(|v| !v.trim().is_empty());

        let mut location = Location::new(name, self.latitude, self.longitude);
        location.country = non_blank(self.country);
        location.admin1 = non_blank(self.admin1);
        Some(location)
    }
}

#[derive(Debug, Deserialize)]
struct GeoResponse {
    #[serde(default)]
    results: Vec<GeoPlace>,
}

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("Geocoding request failed: {0}")]
    Request(#[from] ProviderError),

    #[error("Geocoding HTTP {0}")]
    Status(u16),
}

/// Name search against a geocoding service in a given language.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn search(&self, query: &str, language: &str) -> Result<Vec<GeoPlace>, GeocodeError>;
}

#[derive(Debug, Clone)]
pub struct OpenMeteoGeocoder {
    client: Client,
    base_url: String,
    count: u32,
}

impl OpenMeteoGeocoder {
    pub fn new(api: &ApiConfig, accept_language: &str, count: u32) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_http_client(api, accept_language)?,
            base_url: api.geocoding_base_url.trim_end_matches('/').to_string(),
            count,
        })
    }

    pub fn with_client(client: Client, base_url: &str, count: u32) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            count,
        }
    }
}

#[async_trait]
impl Geocoder for OpenMeteoGeocoder {
    #[instrument(skip(self), level = "debug")]
    async fn search(&self, query: &str, language: &str) -> Result<Vec<GeoPlace>, GeocodeError> {
        let url = format!("{}/v1/search", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("name", query.to_string()),
                ("count", self.count.to_string()),
                ("language", language.to_string()),
                ("format", "json".to_string()),
            ])
            .send()
            .await
            .map_err(ProviderError::from)?;

        if !response.status().is_success() {
            return Err(GeocodeError::Status(response.status().as_u16()));
        }

        let body = response.text().await.map_err(ProviderError::from)?;
        let parsed: GeoResponse = serde_json::from_str(&body)
            .map_err(|e| GeocodeError::Request(ProviderError::Decode(e.to_string())))?;

        tracing::debug!("Geocoded '{}' ({}): {} results", query, language, parsed.results.len());
        Ok(parsed.results)
    }
}
