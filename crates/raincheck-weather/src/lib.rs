//! Weather data for Raincheck
//!
//! Forecasts and city search via the Open-Meteo APIs, with typed failure
//! classification and bilingual merged search results.

pub mod types;
pub mod retry;
pub mod provider;
pub mod forecast;
pub mod format;
pub mod geocode;
pub mod search;

pub use types::*;
pub use forecast::{FetchError, ForecastClient, ForecastSink};
pub use format::{Language, TemperatureUnit};
pub use geocode::{GeoPlace, Geocoder, OpenMeteoGeocoder};
pub use provider::{ForecastProvider, OpenMeteoProvider, ProviderError};
pub use search::{GeoMergeSearch, SearchSession};
