//! Location → geocode → weather fetch → persist → render.
//!
//! The web front end drives the steps one route at a time; [`Pipeline::run`]
//! chains them for one-shot callers. Each step logs the state it reached, and
//! a failing step logs the state it failed from before handing the error back.

use std::{fmt, sync::Arc};

use crate::{
    Config,
    error::{ExtractionError, WeatherError},
    model::{Coordinates, LocationQuery, WeatherReport, WeatherSnapshot},
    provider::{Geocoder, WeatherProvider, client_from_config},
    sink::{WeatherSink, sink_from_config},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    LocationReceived,
    Geocoded,
    WeatherFetched,
    Persisted,
    Rendered,
    Errored,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::LocationReceived => "location_received",
            Stage::Geocoded => "geocoded",
            Stage::WeatherFetched => "weather_fetched",
            Stage::Persisted => "persisted",
            Stage::Rendered => "rendered",
            Stage::Errored => "errored",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn failed<E: fmt::Display>(from: Stage, err: E) -> E {
    tracing::error!(from = %from, to = %Stage::Errored, error = %err, "weather lookup failed");
    err
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    geocoder: Arc<dyn Geocoder>,
    weather: Arc<dyn WeatherProvider>,
    sink: Arc<dyn WeatherSink>,
}

impl Pipeline {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        weather: Arc<dyn WeatherProvider>,
        sink: Arc<dyn WeatherSink>,
    ) -> Self {
        Self {
            geocoder,
            weather,
            sink,
        }
    }

    /// OpenWeather for both lookups, sink chosen by the persistence strategy.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = Arc::new(client_from_config(config)?);
        let sink = sink_from_config(&config.persistence)?;
        Ok(Self::new(client.clone(), client, sink))
    }

    pub fn receive_location(raw: Option<&str>) -> Result<LocationQuery, WeatherError> {
        let query = LocationQuery::parse(raw).map_err(|e| failed(Stage::Idle, e))?;
        tracing::info!(stage = %Stage::LocationReceived, location = %query, "location received");
        Ok(query)
    }

    pub async fn geocode(&self, query: &LocationQuery) -> Result<Coordinates, WeatherError> {
        let at = self
            .geocoder
            .geocode(query)
            .await
            .map_err(|e| failed(Stage::LocationReceived, e))?;
        tracing::info!(stage = %Stage::Geocoded, location = %query, lat = at.lat, lon = at.lon, "location geocoded");
        Ok(at)
    }

    pub async fn fetch_weather(&self, at: Coordinates) -> Result<WeatherSnapshot, WeatherError> {
        let snapshot = self
            .weather
            .current_weather(at)
            .await
            .map_err(|e| failed(Stage::Geocoded, e))?;
        tracing::info!(stage = %Stage::WeatherFetched, lat = at.lat, lon = at.lon, "weather fetched");
        Ok(snapshot)
    }

    /// Hand the snapshot to the sink.
    ///
    /// Only a validation failure stops the lookup; any other sink error is
    /// logged and the user still gets their result.
    pub async fn persist(&self, snapshot: &WeatherSnapshot) -> Result<(), WeatherError> {
        match self.sink.persist(snapshot).await {
            Ok(()) => {}
            Err(err @ WeatherError::Validation { .. }) => {
                return Err(failed(Stage::WeatherFetched, err));
            }
            Err(err) => {
                tracing::error!(stage = %Stage::WeatherFetched, error = %err, "persistence failed, continuing");
            }
        }
        tracing::info!(stage = %Stage::Persisted, "weather persisted");
        Ok(())
    }

    /// Derive display fields from the snapshot carried over from the fetch.
    pub fn present(snapshot: Option<&WeatherSnapshot>) -> Result<WeatherReport, ExtractionError> {
        let snapshot = snapshot
            .ok_or_else(|| ExtractionError::MissingField("weather_data".to_string()))
            .map_err(|e| failed(Stage::Persisted, e))?;
        let report = snapshot.report().map_err(|e| failed(Stage::Persisted, e))?;
        tracing::info!(stage = %Stage::Rendered, location = %report.location, "weather rendered");
        Ok(report)
    }

    /// Every step in one call.
    pub async fn run(&self, raw: Option<&str>) -> Result<WeatherReport, WeatherError> {
        let query = Self::receive_location(raw)?;
        let at = self.geocode(&query).await?;
        let snapshot = self.fetch_weather(at).await?;
        self.persist(&snapshot).await?;
        Ok(Self::present(Some(&snapshot))?)
    }
}
