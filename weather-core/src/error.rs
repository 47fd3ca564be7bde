//! Error taxonomy for the lookup pipeline.
//!
//! Every failure a request can hit maps to exactly one [`WeatherError`]
//! variant. Handlers match on it at the HTTP boundary and turn it into a
//! redirect to the error page, so the `Display` text of each variant is what
//! the user ends up reading.

use std::fmt;

use thiserror::Error;

/// Outbound service a request was made to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamService {
    Geocoding,
    Weather,
}

impl UpstreamService {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamService::Geocoding => "Geocoding",
            UpstreamService::Weather => "Weather",
        }
    }
}

impl fmt::Display for UpstreamService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum WeatherError {
    /// Empty or absent location from the form.
    #[error("Error parsing geolocation data.")]
    Input,

    /// Transport failure, timeout or non-success response from a provider.
    #[error("Request to {service} API failed: {message}")]
    Upstream {
        service: UpstreamService,
        message: String,
    },

    /// The geocoder answered but had no match for the query.
    #[error("No location found matching '{0}'")]
    NoMatch(String),

    /// A field that must be persisted is missing or holds the sentinel.
    #[error("Missing or invalid data for {field}: '{value}'")]
    Validation { field: &'static str, value: String },

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// Store connection, write, upload or load-job failure.
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl WeatherError {
    pub fn upstream(service: UpstreamService, message: impl Into<String>) -> Self {
        WeatherError::Upstream {
            service,
            message: message.into(),
        }
    }

    pub fn persistence(message: impl fmt::Display) -> Self {
        WeatherError::Persistence(message.to_string())
    }
}

/// Failure to pull display fields out of a weather payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("Missing key: {0}")]
    MissingField(String),

    #[error("Wrong type: {0}")]
    WrongType(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Unknown error: {0}")]
    Unclassified(String),
}

impl From<serde_json::Error> for ExtractionError {
    fn from(err: serde_json::Error) -> Self {
        use serde_json::error::Category;

        match err.classify() {
            Category::Syntax | Category::Eof => ExtractionError::InvalidValue(err.to_string()),
            Category::Data => ExtractionError::WrongType(err.to_string()),
            Category::Io => ExtractionError::Unclassified(err.to_string()),
        }
    }
}
