use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::{
    error::{UpstreamService, WeatherError},
    model::{Coordinates, LocationQuery, WeatherSnapshot},
};

use super::{Geocoder, WeatherProvider};

const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";
const GEOCODING_PATH: &str = "/geo/1.0/direct";
const CURRENT_WEATHER_PATH: &str = "/data/2.5/weather";

/// OpenWeather geocoding and current-weather endpoints behind one key.
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenWeatherClient {
    /// Every request made by this client is bounded by `timeout`.
    pub fn new(api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for OpenWeather")?;

        Ok(Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            http,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<Q>(
        &self,
        service: UpstreamService,
        path: &str,
        query: &Q,
    ) -> Result<Value, WeatherError>
    where
        Q: serde::Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);

        let res = self
            .http
            .get(&url)
            .query(query)
            .query(&[("appid", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| WeatherError::upstream(service, describe(e)))?;

        let status = res.status();
        let body = res.text().await.map_err(|e| {
            WeatherError::upstream(
                service,
                format!("failed to read response body: {}", describe(e)),
            )
        })?;

        if !status.is_success() {
            tracing::warn!(
                service = %service,
                status = %status,
                body = %truncate_body(&body),
                "upstream returned an error status"
            );
            return Err(WeatherError::upstream(service, format!("status {status}")));
        }

        serde_json::from_str(&body).map_err(|e| {
            WeatherError::upstream(service, format!("response was not valid JSON: {e}"))
        })
    }
}

#[derive(Debug, Deserialize)]
struct GeoMatch {
    lat: f64,
    lon: f64,
}

#[async_trait]
impl Geocoder for OpenWeatherClient {
    async fn geocode(&self, query: &LocationQuery) -> Result<Coordinates, WeatherError> {
        let body = self
            .get_json(
                UpstreamService::Geocoding,
                GEOCODING_PATH,
                &[("q", query.as_str()), ("limit", "1")],
            )
            .await?;

        let matches: Vec<GeoMatch> = serde_json::from_value(body).map_err(|e| {
            WeatherError::upstream(
                UpstreamService::Geocoding,
                format!("unexpected response shape: {e}"),
            )
        })?;

        let first = matches
            .into_iter()
            .next()
            .ok_or_else(|| WeatherError::NoMatch(query.to_string()))?;

        tracing::debug!(location = %query, lat = first.lat, lon = first.lon, "geocoded location");

        Ok(Coordinates {
            lat: first.lat,
            lon: first.lon,
        })
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherClient {
    async fn current_weather(&self, at: Coordinates) -> Result<WeatherSnapshot, WeatherError> {
        let body = self
            .get_json(
                UpstreamService::Weather,
                CURRENT_WEATHER_PATH,
                &[("lat", at.lat), ("lon", at.lon)],
            )
            .await?;

        tracing::debug!(lat = at.lat, lon = at.lon, "fetched current weather");

        Ok(WeatherSnapshot::from_value(body))
    }
}

/// Error text without the request URL, which carries the API key.
fn describe(err: reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else {
        err.without_url().to_string()
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
