use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::PathBuf, str::FromStr, time::Duration};

/// Top-level configuration.
///
/// Read from `config.toml` in the platform config directory, then overlaid
/// with environment variables (see [`Config::apply_overrides`]).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// OpenWeather API key, used for both geocoding and weather.
    pub api_key: Option<String>,

    /// Key used to sign session cookies.
    pub session_secret: Option<String>,

    pub server: ServerConfig,
    pub http: HttpConfig,
    pub session: SessionConfig,
    pub log: LogConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Provider root; geocoding and weather paths are appended to it.
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openweathermap.org".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// When set, ERROR events are also appended to this file.
    pub error_file: Option<PathBuf>,
    /// Size at which the error file is rolled over to a single `.1` backup.
    pub max_bytes: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            error_file: None,
            max_bytes: 10_000,
        }
    }
}

/// Where fetched weather is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceStrategy {
    #[default]
    Postgres,
    Warehouse,
    None,
}

impl PersistenceStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistenceStrategy::Postgres => "postgres",
            PersistenceStrategy::Warehouse => "warehouse",
            PersistenceStrategy::None => "none",
        }
    }

    pub const fn all() -> &'static [PersistenceStrategy] {
        &[
            PersistenceStrategy::Postgres,
            PersistenceStrategy::Warehouse,
            PersistenceStrategy::None,
        ]
    }
}

impl fmt::Display for PersistenceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersistenceStrategy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "postgres" => Ok(PersistenceStrategy::Postgres),
            "warehouse" => Ok(PersistenceStrategy::Warehouse),
            "none" => Ok(PersistenceStrategy::None),
            _ => Err(anyhow!(
                "Unknown persistence strategy '{value}'. Supported: postgres, warehouse, none."
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PersistenceConfig {
    pub strategy: PersistenceStrategy,
    pub database: DatabaseConfig,
    pub warehouse: WarehouseConfig,
}

/// Connection settings for the relational store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub port: u16,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: None,
            user: None,
            password: None,
            host: "localhost".to_string(),
            port: 5432,
        }
    }
}

/// Cloud Storage staging and BigQuery load settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub project: Option<String>,
    pub bucket: Option<String>,
    /// Object name the staging CSV is uploaded to.
    pub object: String,
    pub dataset: String,
    pub table: String,
    /// BigQuery location for new datasets and job lookups.
    pub location: String,
    pub access_token: Option<String>,
    pub storage_url: String,
    pub bigquery_url: String,
    pub load_timeout_secs: u64,
    /// Directory for local staging files; the system temp dir when unset.
    pub staging_dir: Option<PathBuf>,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project: None,
            bucket: None,
            object: "output.csv".to_string(),
            dataset: "weather_dataset".to_string(),
            table: "weather_data".to_string(),
            location: "US".to_string(),
            access_token: None,
            storage_url: "https://storage.googleapis.com".to_string(),
            bigquery_url: "https://bigquery.googleapis.com".to_string(),
            load_timeout_secs: 120,
            staging_dir: None,
        }
    }
}

impl Config {
    /// Load the config file (if any), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = Self::load_file()?;
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load_file() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(path)
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-task", "weather-web")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Overlay values from `lookup` (normally the process environment).
    /// Unset and empty variables leave the current value alone.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = get("SECRET_KEY") {
            self.session_secret = Some(v);
        }
        if let Some(v) = get("WEATHER_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = get("WEATHER_API_URL") {
            self.http.base_url = v;
        }
        if let Some(v) = get("HTTP_TIMEOUT_SECS") {
            self.http.timeout_secs = parse_number("HTTP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("SESSION_TTL_SECS") {
            self.session.ttl_secs = parse_number("SESSION_TTL_SECS", &v)?;
        }
        if let Some(v) = get("ERROR_LOG") {
            self.log.error_file = Some(PathBuf::from(v));
        }
        if let Some(v) = get("ERROR_LOG_MAX_BYTES") {
            self.log.max_bytes = parse_number("ERROR_LOG_MAX_BYTES", &v)?;
        }
        if let Some(v) = get("PERSISTENCE") {
            self.persistence.strategy = v.parse()?;
        }

        let db = &mut self.persistence.database;
        if let Some(v) = get("DB_NAME") {
            db.name = Some(v);
        }
        if let Some(v) = get("DB_USER") {
            db.user = Some(v);
        }
        if let Some(v) = get("DB_PASS") {
            db.password = Some(v);
        }
        if let Some(v) = get("DB_HOST") {
            db.host = v;
        }
        if let Some(v) = get("DB_PORT") {
            db.port = parse_number("DB_PORT", &v)?;
        }

        let wh = &mut self.persistence.warehouse;
        if let Some(v) = get("GCP_PROJECT") {
            wh.project = Some(v);
        }
        if let Some(v) = get("GCS_BUCKET") {
            wh.bucket = Some(v);
        }
        if let Some(v) = get("GCS_OBJECT") {
            wh.object = v;
        }
        if let Some(v) = get("BQ_DATASET") {
            wh.dataset = v;
        }
        if let Some(v) = get("BQ_TABLE") {
            wh.table = v;
        }
        if let Some(v) = get("BQ_LOCATION") {
            wh.location = v;
        }
        if let Some(v) = get("GOOGLE_ACCESS_TOKEN") {
            wh.access_token = Some(v);
        }

        Ok(())
    }

    pub fn api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            anyhow!(
                "No weather API key configured.\n\
                 Hint: set API_KEY or run `weather-web configure` and enter your API key."
            )
        })
    }

    pub fn session_secret(&self) -> Result<&str> {
        self.session_secret.as_deref().ok_or_else(|| {
            anyhow!(
                "No session secret configured.\n\
                 Hint: set SECRET_KEY or run `weather-web configure`."
            )
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session.ttl_secs)
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{key} must be a non-negative integer, got '{value}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn api_key_errors_when_not_set() {
        let cfg = Config::default();
        let err = cfg.api_key().unwrap_err();

        assert!(err.to_string().contains("No weather API key configured"));
        assert!(err.to_string().contains("weather-web configure"));
    }

    #[test]
    fn defaults_are_sensible() {
        let cfg = Config::default();

        assert_eq!(cfg.server.bind, "127.0.0.1:5000");
        assert_eq!(cfg.http_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.session_ttl(), Duration::from_secs(300));
        assert_eq!(cfg.persistence.strategy, PersistenceStrategy::Postgres);
        assert_eq!(cfg.persistence.database.port, 5432);
        assert_eq!(cfg.persistence.warehouse.object, "output.csv");
        assert_eq!(cfg.log.error_file, None);
        assert_eq!(cfg.log.max_bytes, 10_000);
    }

    #[test]
    fn error_log_settings_come_from_environment() {
        let mut cfg = Config::default();
        cfg.apply_overrides(env(&[
            ("ERROR_LOG", "/var/log/weather/error.log"),
            ("ERROR_LOG_MAX_BYTES", "4096"),
        ]))
        .expect("overrides apply");

        assert_eq!(
            cfg.log.error_file.as_deref(),
            Some(std::path::Path::new("/var/log/weather/error.log"))
        );
        assert_eq!(cfg.log.max_bytes, 4096);
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut cfg = Config::default();
        cfg.api_key = Some("FILE_KEY".into());

        cfg.apply_overrides(env(&[
            ("API_KEY", "ENV_KEY"),
            ("SECRET_KEY", "s3cret"),
            ("DB_NAME", "weather"),
            ("DB_PORT", "6543"),
            ("PERSISTENCE", "warehouse"),
            ("GCS_BUCKET", "staging-bucket"),
            ("SESSION_TTL_SECS", "60"),
        ]))
        .expect("overrides apply");

        assert_eq!(cfg.api_key().unwrap(), "ENV_KEY");
        assert_eq!(cfg.session_secret().unwrap(), "s3cret");
        assert_eq!(cfg.persistence.database.name.as_deref(), Some("weather"));
        assert_eq!(cfg.persistence.database.port, 6543);
        assert_eq!(cfg.persistence.strategy, PersistenceStrategy::Warehouse);
        assert_eq!(cfg.persistence.warehouse.bucket.as_deref(), Some("staging-bucket"));
        assert_eq!(cfg.session_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn empty_environment_values_are_ignored() {
        let mut cfg = Config::default();
        cfg.api_key = Some("FILE_KEY".into());

        cfg.apply_overrides(env(&[("API_KEY", ""), ("DB_HOST", "  ")]))
            .expect("overrides apply");

        assert_eq!(cfg.api_key().unwrap(), "FILE_KEY");
        assert_eq!(cfg.persistence.database.host, "localhost");
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let mut cfg = Config::default();
        let err = cfg.apply_overrides(env(&[("DB_PORT", "five")])).unwrap_err();
        assert!(err.to_string().contains("DB_PORT"));
    }

    #[test]
    fn strategy_as_str_roundtrip() {
        for strategy in PersistenceStrategy::all() {
            let parsed: PersistenceStrategy = strategy.as_str().parse().expect("roundtrip");
            assert_eq!(*strategy, parsed);
        }

        let err = "sqlite".parse::<PersistenceStrategy>().unwrap_err();
        assert!(err.to_string().contains("Unknown persistence strategy"));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            api_key = "KEY"

            [persistence]
            strategy = "none"

            [persistence.database]
            name = "weather"
            "#,
        )
        .expect("parse");

        assert_eq!(cfg.api_key.as_deref(), Some("KEY"));
        assert_eq!(cfg.persistence.strategy, PersistenceStrategy::None);
        assert_eq!(cfg.persistence.database.name.as_deref(), Some("weather"));
        assert_eq!(cfg.persistence.database.host, "localhost");
        assert_eq!(cfg.http.base_url, "https://api.openweathermap.org");
    }
}
