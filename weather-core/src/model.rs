use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ExtractionError, WeatherError};

/// Placeholder shown (and refused by the direct-write store) for absent data.
pub const SENTINEL: &str = "N/A";

const KELVIN_OFFSET: f64 = 273.15;

/// A place name typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationQuery(String);

impl LocationQuery {
    /// Accept a raw form value. Absent or blank input is an [`WeatherError::Input`].
    pub fn parse(raw: Option<&str>) -> Result<Self, WeatherError> {
        match raw.map(str::trim) {
            Some(name) if !name.is_empty() => Ok(Self(name.to_owned())),
            _ => Err(WeatherError::Input),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocationQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// Raw current-weather payload as returned by the provider.
///
/// Nothing is extracted at fetch time: the staged-load sink wants the whole
/// document, and display extraction happens in [`WeatherSnapshot::report`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeatherSnapshot {
    raw: Value,
}

impl WeatherSnapshot {
    pub fn from_value(raw: Value) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Pull the display fields out of the payload.
    ///
    /// Absent keys (and JSON `null`) become [`SENTINEL`]; a value of the
    /// wrong shape is an error rather than a silent default.
    pub fn report(&self) -> Result<WeatherReport, ExtractionError> {
        let root = self.raw.as_object().ok_or_else(|| {
            ExtractionError::WrongType(format!(
                "weather payload is {}, expected an object",
                kind(&self.raw)
            ))
        })?;

        let clouds = match nested(root, "clouds", "all")? {
            Some(value) => scalar_text("clouds.all", value)?,
            None => SENTINEL.to_owned(),
        };

        let forecast = first_description(root)?;

        let wind_speed = match nested(root, "wind", "speed")? {
            Some(value) => number_text("wind.speed", value)?,
            None => SENTINEL.to_owned(),
        };

        let location = match member(root, "name") {
            Some(value) => string_text("name", value)?,
            None => SENTINEL.to_owned(),
        };

        let temp = match nested(root, "main", "feels_like")? {
            Some(value) => celsius_text(value)?,
            None => SENTINEL.to_owned(),
        };

        let observed_at = member(root, "dt")
            .and_then(Value::as_i64)
            .and_then(|ts| DateTime::from_timestamp(ts, 0));

        Ok(WeatherReport {
            clouds,
            forecast,
            wind_speed,
            location,
            temp,
            observed_at,
        })
    }
}

/// Display-ready fields of a snapshot. Any of the text fields may be [`SENTINEL`].
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReport {
    pub clouds: String,
    pub forecast: String,
    pub wind_speed: String,
    pub location: String,
    /// Feels-like temperature in Celsius, two decimals.
    pub temp: String,
    pub observed_at: Option<DateTime<Utc>>,
}

/// One row of the `weather_data` table.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedWeatherRecord {
    pub clouds: String,
    pub forecast: String,
    pub wind_speed: f64,
    pub location_name: String,
    pub temp: f64,
}

impl TryFrom<&WeatherReport> for PersistedWeatherRecord {
    type Error = WeatherError;

    fn try_from(report: &WeatherReport) -> Result<Self, Self::Error> {
        Ok(Self {
            clouds: required("clouds", &report.clouds)?,
            forecast: required("forecast", &report.forecast)?,
            wind_speed: numeric("wind_speed", &report.wind_speed)?,
            location_name: required("location_name", &report.location)?,
            temp: numeric("temp", &report.temp)?,
        })
    }
}

/// True for empty text and for the sentinel.
pub fn is_missing(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value == SENTINEL
}

fn required(field: &'static str, value: &str) -> Result<String, WeatherError> {
    if is_missing(value) {
        return Err(WeatherError::Validation {
            field,
            value: value.to_owned(),
        });
    }
    Ok(value.to_owned())
}

fn numeric(field: &'static str, value: &str) -> Result<f64, WeatherError> {
    required(field, value)?
        .trim()
        .parse::<f64>()
        .map_err(|_| WeatherError::Validation {
            field,
            value: value.to_owned(),
        })
}

fn member<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|value| !value.is_null())
}

fn nested<'a>(
    root: &'a Map<String, Value>,
    outer: &str,
    inner: &str,
) -> Result<Option<&'a Value>, ExtractionError> {
    match member(root, outer) {
        None => Ok(None),
        Some(Value::Object(obj)) => Ok(member(obj, inner)),
        Some(other) => Err(ExtractionError::WrongType(format!(
            "{outer} is {}, expected an object",
            kind(other)
        ))),
    }
}

fn first_description(root: &Map<String, Value>) -> Result<String, ExtractionError> {
    let entries = match member(root, "weather") {
        None => return Ok(SENTINEL.to_owned()),
        Some(Value::Array(entries)) => entries,
        Some(other) => {
            return Err(ExtractionError::WrongType(format!(
                "weather is {}, expected a list",
                kind(other)
            )));
        }
    };

    let Some(first) = entries.first() else {
        return Ok(SENTINEL.to_owned());
    };

    let Value::Object(first) = first else {
        return Err(ExtractionError::WrongType(format!(
            "weather[0] is {}, expected an object",
            kind(first)
        )));
    };

    match member(first, "description") {
        Some(value) => string_text("weather[0].description", value),
        None => Ok(SENTINEL.to_owned()),
    }
}

fn string_text(path: &str, value: &Value) -> Result<String, ExtractionError> {
    match value {
        Value::String(text) => Ok(text.clone()),
        other => Err(ExtractionError::WrongType(format!(
            "{path} is {}, expected a string",
            kind(other)
        ))),
    }
}

fn number_text(path: &str, value: &Value) -> Result<String, ExtractionError> {
    match value {
        Value::Number(n) => Ok(n.to_string()),
        other => Err(ExtractionError::WrongType(format!(
            "{path} is {}, expected a number",
            kind(other)
        ))),
    }
}

fn scalar_text(path: &str, value: &Value) -> Result<String, ExtractionError> {
    match value {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(text) => Ok(text.clone()),
        other => Err(ExtractionError::WrongType(format!(
            "{path} is {}, expected a number or string",
            kind(other)
        ))),
    }
}

fn celsius_text(value: &Value) -> Result<String, ExtractionError> {
    let kelvin = match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| {
            ExtractionError::InvalidValue(format!("main.feels_like {n} is not representable"))
        })?,
        other => {
            return Err(ExtractionError::WrongType(format!(
                "main.feels_like is {}, expected a number",
                kind(other)
            )));
        }
    };

    if kelvin < 0.0 {
        return Err(ExtractionError::InvalidValue(format!(
            "main.feels_like {kelvin} K is below absolute zero"
        )));
    }

    Ok(format!("{:.2}", kelvin - KELVIN_OFFSET))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
