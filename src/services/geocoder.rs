//! Best-effort address geocoding.
//!
//! Lookups are bounded by a timeout; any failure leaves the folder location
//! unset instead of failing the folder write.

use crate::models::folder::GeoPoint;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

const USER_AGENT: &str = concat!("funicular/", env!("CARGO_PKG_VERSION"));

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve a free-text address. `Ok(None)` means the address is unknown.
    async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>>;
}

/// Resolve an address within `timeout`, logging and swallowing failures.
pub async fn locate(geocoder: &dyn Geocoder, address: &str, timeout: Duration) -> Option<GeoPoint> {
    match tokio::time::timeout(timeout, geocoder.geocode(address)).await {
        Ok(Ok(point)) => point,
        Ok(Err(err)) => {
            warn!("geocoding `{}` failed: {:#}", address, err);
            None
        }
        Err(_) => {
            warn!("geocoding `{}` timed out after {:?}", address, timeout);
            None
        }
    }
}

/// Geocoder backed by a Nominatim-compatible search API.
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

impl NominatimGeocoder {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("building geocoder HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>> {
        let places: Vec<NominatimPlace> = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("q", address), ("format", "json"), ("limit", "1")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(place) = places.into_iter().next() else {
            return Ok(None);
        };
        let latitude: f64 = place.lat.parse().context("parsing latitude")?;
        let longitude: f64 = place.lon.parse().context("parsing longitude")?;
        Ok(Some(GeoPoint {
            latitude,
            longitude,
        }))
    }
}

/// Used when no geocoder is configured: every address is unknown.
pub struct NoGeocoder;

#[async_trait]
impl Geocoder for NoGeocoder {
    async fn geocode(&self, _address: &str) -> Result<Option<GeoPoint>> {
        Ok(None)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Always answers with the same point.
    pub(crate) struct FixedGeocoder(pub GeoPoint);

    #[async_trait]
    impl Geocoder for FixedGeocoder {
        async fn geocode(&self, _address: &str) -> Result<Option<GeoPoint>> {
            Ok(Some(self.0))
        }
    }

    struct SlowGeocoder;

    #[async_trait]
    impl Geocoder for SlowGeocoder {
        async fn geocode(&self, _address: &str) -> Result<Option<GeoPoint>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Some(GeoPoint {
                latitude: 0.0,
                longitude: 0.0,
            }))
        }
    }

    struct FailingGeocoder;

    #[async_trait]
    impl Geocoder for FailingGeocoder {
        async fn geocode(&self, _address: &str) -> Result<Option<GeoPoint>> {
            anyhow::bail!("service unavailable")
        }
    }

    #[tokio::test]
    async fn timeout_leaves_location_unset() {
        let point = locate(&SlowGeocoder, "Piazza Navona, Roma", Duration::from_millis(20)).await;
        assert!(point.is_none());
    }

    #[tokio::test]
    async fn failure_leaves_location_unset() {
        let point = locate(&FailingGeocoder, "nowhere", Duration::from_secs(1)).await;
        assert!(point.is_none());
    }

    #[tokio::test]
    async fn success_passes_point_through() {
        let rome = GeoPoint {
            latitude: 41.899,
            longitude: 12.473,
        };
        let point = locate(&FixedGeocoder(rome), "Roma", Duration::from_secs(1)).await;
        assert_eq!(point, Some(rome));
    }
}
