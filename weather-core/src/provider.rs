use crate::{
    Config, Coordinates, LocationQuery, WeatherSnapshot, error::WeatherError,
    provider::openweather::OpenWeatherClient,
};
use async_trait::async_trait;
use std::fmt::Debug;

pub mod openweather;

/// Resolves a place name to coordinates.
#[async_trait]
pub trait Geocoder: Send + Sync + Debug {
    async fn geocode(&self, query: &LocationQuery) -> Result<Coordinates, WeatherError>;
}

/// Fetches current conditions for a coordinate pair.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    async fn current_weather(&self, at: Coordinates) -> Result<WeatherSnapshot, WeatherError>;
}

/// Construct the OpenWeather client from config.
pub fn client_from_config(config: &Config) -> anyhow::Result<OpenWeatherClient> {
    let api_key = config.api_key()?;
    OpenWeatherClient::new(api_key.to_owned(), config.http_timeout())
        .map(|client| client.with_base_url(&config.http.base_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_from_config_errors_when_missing_api_key() {
        let cfg = Config::default();
        let err = client_from_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("No weather API key configured"));
    }

    #[test]
    fn client_from_config_works_when_key_is_set() {
        let mut cfg = Config::default();
        cfg.api_key = Some("KEY".to_string());
        cfg.http.base_url = "http://localhost:9999/".to_string();

        let client = client_from_config(&cfg).expect("client");
        assert_eq!(client.base_url(), "http://localhost:9999");
    }
}
