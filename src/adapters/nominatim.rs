use crate::domain::model::{LatLng, PostalAddress};
use crate::domain::ports::Geocoder;
use crate::utils::error::{MapError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_ENDPOINT: &str = "https://nominatim.openstreetmap.org/search";
pub const DEFAULT_USER_AGENT: &str = "service-area-map/0.1";

#[derive(Debug, Clone)]
pub struct NominatimSettings {
    pub endpoint: String,
    pub user_agent: String,
    pub timeout: Duration,
    /// 公開 Nominatim 服務要求每秒最多一次請求
    pub rate_limit: Duration,
    pub default_state: String,
    pub country: String,
}

impl Default for NominatimSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(10),
            rate_limit: Duration::from_millis(1100),
            default_state: "FL".to_string(),
            country: "USA".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

/// Geocoder for a Nominatim-compatible `/search` endpoint.
///
/// Answers are cached per lower-cased query string, including "no match",
/// so entries sharing an address cost one request. Requests are spaced by
/// `rate_limit` across every caller of the same instance.
pub struct NominatimGeocoder {
    client: Client,
    settings: NominatimSettings,
    cache: Mutex<HashMap<String, Option<LatLng>>>,
    last_request: tokio::sync::Mutex<Option<Instant>>,
    requests: AtomicUsize,
}

impl NominatimGeocoder {
    pub fn new(settings: NominatimSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            settings,
            cache: Mutex::new(HashMap::new()),
            last_request: tokio::sync::Mutex::new(None),
            requests: AtomicUsize::new(0),
        })
    }

    /// Number of HTTP requests actually sent.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Full query, e.g. "850 5th Ave S, Naples, FL, 34102, USA". The default
    /// state only applies when a city is known.
    pub fn query_for(&self, address: &PostalAddress) -> Option<String> {
        let has_city = address.city.as_deref().is_some_and(|c| !c.trim().is_empty());
        let default_state = has_city.then_some(self.settings.default_state.as_str());
        let joined = address.joined(default_state);
        if joined.is_empty() {
            return None;
        }
        Some(format!("{}, {}", joined, self.settings.country))
    }

    /// "city, state, USA", used when the street address finds nothing.
    pub fn fallback_query_for(&self, address: &PostalAddress) -> Option<String> {
        address.address_line.as_deref().filter(|s| !s.trim().is_empty())?;
        let city = address.city.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let state = address
            .state
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.settings.default_state.as_str());
        Some(format!("{}, {}, {}", city, state, self.settings.country))
    }

    async fn lookup(&self, query: &str) -> Result<Option<LatLng>> {
        let key = query.trim().to_lowercase();
        let cached = self.cache().get(&key).copied();
        if let Some(hit) = cached {
            tracing::debug!("Geocode cache hit for '{}'", query);
            return Ok(hit);
        }

        self.wait_turn().await;
        self.requests.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Geocoding '{}' via {}", query, self.settings.endpoint);

        let response = self
            .client
            .get(&self.settings.endpoint)
            .query(&[("format", "json"), ("q", query), ("limit", "1")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MapError::Geocode {
                message: format!("geocoding service returned {}", response.status()),
            });
        }

        let places: Vec<Place> = response.json().await?;
        let coords = match places.first() {
            Some(place) => Some(parse_place(place)?),
            None => None,
        };

        self.cache().insert(key, coords);
        Ok(coords)
    }

    /// 全域節流：持有鎖直到輪到本次請求
    async fn wait_turn(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.settings.rate_limit {
                tokio::time::sleep(self.settings.rate_limit - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, Option<LatLng>>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn parse_place(place: &Place) -> Result<LatLng> {
    let parse = |field: &str, value: &str| {
        value.trim().parse::<f64>().map_err(|_| MapError::Geocode {
            message: format!("invalid {} '{}' in geocoding response", field, value),
        })
    };
    Ok(LatLng::new(parse("lat", &place.lat)?, parse("lon", &place.lon)?))
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, address: &PostalAddress) -> Result<Option<LatLng>> {
        let Some(query) = self.query_for(address) else {
            return Ok(None);
        };

        if let Some(coords) = self.lookup(&query).await? {
            return Ok(Some(coords));
        }

        match self.fallback_query_for(address) {
            Some(fallback) => {
                tracing::debug!("No match for '{}', trying '{}'", query, fallback);
                self.lookup(&fallback).await
            }
            None => Ok(None),
        }
    }
}
