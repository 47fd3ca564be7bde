//! Core library for the `weather-web` service.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Geocoding and current-weather clients
//! - Extraction of display fields from raw weather payloads
//! - Persistence sinks (Postgres, Cloud Storage + BigQuery, none)
//! - The lookup pipeline tying them together
//!
//! It is used by `weather-web`, but can also be reused by other binaries or services.

pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod sink;

pub use config::{Config, PersistenceStrategy};
pub use error::{ExtractionError, UpstreamService, WeatherError};
pub use model::{
    Coordinates, LocationQuery, PersistedWeatherRecord, SENTINEL, WeatherReport, WeatherSnapshot,
};
pub use pipeline::{Pipeline, Stage};
pub use provider::{Geocoder, WeatherProvider, client_from_config};
pub use sink::{DiscardSink, WeatherSink, sink_from_config};
