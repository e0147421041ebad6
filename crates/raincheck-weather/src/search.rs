//! City search across two geocoder languages.
//!
//! Both lookups run concurrently under one cancellation scope. Results are
//! merged by exact coordinate, with non-blank fields of the secondary language
//! winning, and sorted with primary-strength collation for the configured locale.

use icu_collator::{Collator, CollatorOptions, Strength};
use icu_locid::Locale;
use parking_lot::RwLock;
use raincheck_core::config::SearchConfig;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use unicode_normalization::UnicodeNormalization;

use crate::geocode::{GeoPlace, GeocodeError, Geocoder};
use crate::types::{CoordinateKey, Location};

/// Queries shorter than this (after normalization) never reach the geocoder.
pub const MIN_QUERY_CHARS: usize = 2;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Lookup task failed: {0}")]
    Task(#[from] JoinError),
}

/// Which of the two lookups a result belongs to.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Primary,
    Secondary,
}

type LookupOutcome = (Slot, String, Option<Result<Vec<GeoPlace>, GeocodeError>>);

pub struct GeoMergeSearch {
    geocoder: Arc<dyn Geocoder>,
    primary_language: String,
    secondary_language: String,
    collation_locale: String,
}

impl GeoMergeSearch {
    pub fn new(geocoder: Arc<dyn Geocoder>, config: &SearchConfig) -> Self {
        Self::with_languages(
            geocoder,
            &config.primary_language,
            &config.secondary_language,
            &config.collation_locale,
        )
    }

    pub fn with_languages(
        geocoder: Arc<dyn Geocoder>,
        primary_language: &str,
        secondary_language: &str,
        collation_locale: &str,
    ) -> Self {
        Self {
            geocoder,
            primary_language: primary_language.to_string(),
            secondary_language: secondary_language.to_string(),
            collation_locale: collation_locale.to_string(),
        }
    }

    /// Search without an external cancellation signal.
    pub async fn search(&self, query: &str) -> Vec<Location> {
        self.search_cancellable(query, &CancellationToken::new())
            .await
            .unwrap_or_default()
    }

    /// Search until done or until `cancel` fires.
    ///
    /// Returns `None` when cancelled; nothing is merged in that case. A failed
    /// lookup contributes no results, and a failure of the search as a whole
    /// yields an empty list.
    pub async fn search_cancellable(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Option<Vec<Location>> {
        let q = normalize_query(query);
        if q.chars().count() < MIN_QUERY_CHARS {
            return Some(Vec::new());
        }

        match self.lookup_both(&q, cancel).await {
            Ok(Some((primary, secondary))) => {
                let mut merged = merge_results(primary, secondary);
                sort_by_collation(&mut merged, &self.collation_locale);
                tracing::debug!("search('{}'): merged={}", q, merged.len());
                Some(merged)
            }
            Ok(None) => {
                tracing::debug!("search('{}') cancelled", q);
                None
            }
            Err(e) => {
                tracing::warn!("search('{}') failed: {}", q, e);
                Some(Vec::new())
            }
        }
    }

    async fn lookup_both(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<(Vec<Location>, Vec<Location>)>, SearchError> {
        let mut lookups: JoinSet<LookupOutcome> = JoinSet::new();

        for (slot, language) in [
            (Slot::Primary, &self.primary_language),
            (Slot::Secondary, &self.secondary_language),
        ] {
            let geocoder = Arc::clone(&self.geocoder);
            let query = query.to_string();
            let language = language.clone();
            let token = cancel.child_token();

            lookups.spawn(async move {
                let found = tokio::select! {
                    _ = token.cancelled() => None,
                    result = geocoder.search(&query, &language) => Some(result),
                };
                (slot, language, found)
            });
        }

        let mut primary = Vec::new();
        let mut secondary = Vec::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    lookups.abort_all();
                    return Ok(None);
                }
                next = lookups.join_next() => {
                    let Some(joined) = next else { break };
                    let (slot, language, found) = joined?;
                    let places = match found {
                        None => return Ok(None),
                        Some(Ok(places)) => places,
                        Some(Err(e)) => {
                            tracing::warn!("Geocode lookup ({}) failed: {}", language, e);
                            Vec::new()
                        }
                    };
                    let cleaned = places.into_iter().filter_map(GeoPlace::into_location).collect();
                    match slot {
                        Slot::Primary => primary = cleaned,
                        Slot::Secondary => secondary = cleaned,
                    }
                }
            }
        }

        Ok(Some((primary, secondary)))
    }
}

/// Canonical composed form, trimmed.
pub fn normalize_query(query: &str) -> String {
    query.nfc().collect::<String>().trim().to_string()
}

/// Merge two result lists keyed by exact coordinate, keeping first-seen order.
pub fn merge_results(primary: Vec<Location>, secondary: Vec<Location>) -> Vec<Location> {
    let mut merged: Vec<Location> = Vec::with_capacity(primary.len() + secondary.len());
    let mut by_coordinate: HashMap<CoordinateKey, usize> = HashMap::new();

    for location in primary {
        match by_coordinate.get(&location.coordinate_key()) {
            Some(&i) => merged[i] = location,
            None => {
                by_coordinate.insert(location.coordinate_key(), merged.len());
                merged.push(location);
            }
        }
    }

    for location in secondary {
        match by_coordinate.get(&location.coordinate_key()) {
            Some(&i) => merge_fields(&mut merged[i], location),
            None => {
                by_coordinate.insert(location.coordinate_key(), merged.len());
                merged.push(location);
            }
        }
    }

    merged
}

/// Overlay non-blank text fields of `other` onto `base`. Id and coordinates stay.
fn merge_fields(base: &mut Location, other: Location) {
    if !other.name.trim().is_empty() {
        base.name = other.name;
    }
    if let Some(country) = other.country.filter(|c| !c.trim().is_empty()) {
        base.country = Some(country);
    }
    if let Some(admin1) = other.admin1.filter(|a| !a.trim().is_empty()) {
        base.admin1 = Some(admin1);
    }
}

/// Sort by name with case- and accent-insensitive collation for `locale_tag`.
///
/// Falls back to lowercase ordering when no collator is available for the tag.
pub fn sort_by_collation(locations: &mut [Location], locale_tag: &str) {
    match primary_collator(locale_tag) {
        Some(collator) => locations.sort_by(|a, b| collator.compare(&a.name, &b.name)),
        None => locations.sort_by(|a, b| fallback_compare(&a.name, &b.name)),
    }
}

fn primary_collator(locale_tag: &str) -> Option<Collator> {
    let locale: Locale = match locale_tag.parse() {
        Ok(locale) => locale,
        Err(e) => {
            tracing::warn!("Invalid collation locale '{}': {}", locale_tag, e);
            return None;
        }
    };

    let mut options = CollatorOptions::new();
    options.strength = Some(Strength::Primary);

    match Collator::try_new(&(&locale).into(), options) {
        Ok(collator) => Some(collator),
        Err(e) => {
            tracing::warn!("No collator for '{}': {}", locale_tag, e);
            None
        }
    }
}

fn fallback_compare(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

/// Runs searches where each new query supersedes the one still in flight.
pub struct SearchSession {
    search: Arc<GeoMergeSearch>,
    current: RwLock<Option<CancellationToken>>,
}

impl SearchSession {
    pub fn new(search: Arc<GeoMergeSearch>) -> Self {
        Self {
            search,
            current: RwLock::new(None),
        }
    }

    /// Cancel the previous search and run `query`.
    ///
    /// Returns `None` if this call was itself superseded or cancelled.
    pub async fn search(&self, query: &str) -> Option<Vec<Location>> {
        let token = CancellationToken::new();
        if let Some(previous) = self.current.write().replace(token.clone()) {
            previous.cancel();
        }
        self.search.search_cancellable(query, &token).await
    }

    /// Cancel the in-flight search, if any.
    pub fn cancel(&self) {
        if let Some(token) = self.current.write().take() {
            token.cancel();
            tracing::debug!("Search cancelled");
        }
    }
}
