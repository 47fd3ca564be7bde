//! Flat CSV staging of a raw weather payload.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde_json::Value;
use uuid::Uuid;

use crate::error::WeatherError;

/// Column separator for nested keys; BigQuery column names cannot hold dots.
const KEY_SEPARATOR: &str = "_";

/// Flatten a JSON document into `(column, cell)` pairs.
///
/// Nested objects become `parent_child` columns, arrays are kept as JSON
/// text and `null` is an empty cell. Columns are sorted by name.
pub fn flatten(value: &Value) -> Vec<(String, String)> {
    let mut row = Vec::new();
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(key.clone(), child, &mut row);
            }
        }
        other => row.push(("value".to_string(), cell_text(other))),
    }
    row.sort_by(|a, b| a.0.cmp(&b.0));
    row
}

fn flatten_into(prefix: String, value: &Value, row: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                flatten_into(format!("{prefix}{KEY_SEPARATOR}{key}"), child, row);
            }
        }
        other => row.push((prefix, cell_text(other))),
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// A header + single data row CSV on local disk, removed when dropped.
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
}

impl StagingFile {
    /// Write `row` to a uniquely named file under `dir`.
    pub fn create(dir: &Path, row: &[(String, String)]) -> Result<Self, WeatherError> {
        let staged = Self {
            path: dir.join(format!("weather-{}.csv", Uuid::new_v4().simple())),
        };
        write_csv(&staged.path, row)?;
        tracing::debug!(path = %staged.path.display(), columns = row.len(), "wrote staging file");
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<Vec<u8>, WeatherError> {
        fs::read(&self.path).map_err(|e| {
            WeatherError::persistence(format!(
                "failed to read staging file {}: {e}",
                self.path.display()
            ))
        })
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "staging file not removed");
        }
    }
}

fn write_csv(path: &Path, row: &[(String, String)]) -> Result<(), WeatherError> {
    let fail = |e: &dyn std::fmt::Display| {
        WeatherError::persistence(format!("failed to write staging file {}: {e}", path.display()))
    };

    let mut writer = csv::Writer::from_path(path).map_err(|e| fail(&e))?;
    writer
        .write_record(row.iter().map(|(column, _)| column.as_str()))
        .map_err(|e| fail(&e))?;
    writer
        .write_record(row.iter().map(|(_, cell)| cell.as_str()))
        .map_err(|e| fail(&e))?;
    writer.flush().map_err(|e| fail(&e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flatten_joins_nested_keys() {
        let row = flatten(&json!({
            "name": "London",
            "main": { "temp": 285.1, "feels_like": 284.0 },
            "coord": { "lat": 51.5, "lon": -0.12 },
            "weather": [{ "description": "light rain" }],
            "rain": null,
            "sys": {}
        }));

        let get = |column: &str| {
            row.iter()
                .find(|(c, _)| c == column)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("name"), Some("London"));
        assert_eq!(get("main_temp"), Some("285.1"));
        assert_eq!(get("coord_lon"), Some("-0.12"));
        assert_eq!(get("weather"), Some(r#"[{"description":"light rain"}]"#));
        assert_eq!(get("rain"), Some(""));
        assert_eq!(get("sys"), Some("{}"));
    }

    #[test]
    fn flatten_of_non_object_is_single_column() {
        assert_eq!(
            flatten(&json!(42)),
            vec![("value".to_string(), "42".to_string())]
        );
    }

    #[test]
    fn staging_file_holds_header_and_row_then_disappears() {
        let dir = tempfile::tempdir().unwrap();
        let row = flatten(&json!({ "name": "Paris, FR", "clouds": { "all": 0 } }));

        let path = {
            let staged = StagingFile::create(dir.path(), &row).expect("staged");
            let text = String::from_utf8(staged.read().unwrap()).unwrap();
            assert_eq!(text, "clouds_all,name\n0,\"Paris, FR\"\n");
            staged.path().to_path_buf()
        };

        assert!(!path.exists());
    }

    #[test]
    fn unwritable_directory_is_a_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");

        let err = StagingFile::create(&missing, &flatten(&json!({ "a": 1 }))).unwrap_err();
        assert!(matches!(err, WeatherError::Persistence(_)));
    }
}
