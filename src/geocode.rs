// src/geocode.rs
//
// Reverse geocoding for accepted events. Best-effort, single attempt: any
// failure falls back to the feed's own region string so enrichment can never
// stop a broadcast.

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, warn};

pub const UNKNOWN_DISTRICT: &str = "unknown";

const DEFAULT_GEOCODE_URL: &str = "https://api.bigdatacloud.net/data/reverse-geocode-client";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlace {
    pub province: String,
    pub district: String,
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<ResolvedPlace>;
}

/// BigDataCloud reverse-geocode-client wrapper. The endpoint is keyless and
/// answers with a subdivision (province) and locality (district).
pub struct BigDataCloudGeocoder {
    client: reqwest::Client,
    base_url: String,
}

impl BigDataCloudGeocoder {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_GEOCODE_URL.to_string(),
        }
    }

    /// Point at a different endpoint, for tests and local stubs.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for BigDataCloudGeocoder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(rename = "principalSubdivision", default)]
    principal_subdivision: Option<String>,
    #[serde(default)]
    locality: Option<String>,
}

#[async_trait]
impl Geocoder for BigDataCloudGeocoder {
    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<ResolvedPlace> {
        let response: GeocodeResponse = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("localityLanguage", "tr".to_string()),
            ])
            .send()
            .await
            .context("geocode request")?
            .error_for_status()
            .context("geocode non-2xx")?
            .json()
            .await
            .context("geocode body")?;

        let province = response
            .principal_subdivision
            .filter(|s| !s.trim().is_empty())
            .context("geocode response missing subdivision")?;
        let district = response
            .locality
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_DISTRICT.to_string());

        Ok(ResolvedPlace { province, district })
    }
}

/// Resolve with the uniform degradation path: on any geocoder failure the
/// province falls back to the feed region and the district is unknown.
pub async fn resolve_with_fallback(
    geocoder: &dyn Geocoder,
    latitude: f64,
    longitude: f64,
    region: &str,
) -> ResolvedPlace {
    match geocoder.reverse(latitude, longitude).await {
        Ok(place) => {
            debug!(
                province = %place.province,
                district = %place.district,
                "address resolved"
            );
            place
        }
        Err(e) => {
            counter!("geocode_fallback_total").increment(1);
            warn!(
                error = ?e,
                latitude,
                longitude,
                "reverse geocode failed, falling back to feed region"
            );
            ResolvedPlace {
                province: region.to_string(),
                district: UNKNOWN_DISTRICT.to_string(),
            }
        }
    }
}
