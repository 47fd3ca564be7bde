use std::{fmt::Debug, sync::Arc};

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::{
    Connection,
    postgres::{PgConnectOptions, PgConnection},
};

use crate::{
    config::DatabaseConfig,
    error::WeatherError,
    model::{PersistedWeatherRecord, WeatherSnapshot},
};

use super::WeatherSink;

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS weather_data (
        id SERIAL PRIMARY KEY,
        location_name TEXT NOT NULL,
        wind_speed DOUBLE PRECISION,
        temp DOUBLE PRECISION,
        forecast TEXT NOT NULL,
        clouds TEXT NOT NULL
    )
"#;

const INSERT_SQL: &str = "INSERT INTO weather_data (clouds, forecast, wind_speed, location_name, temp) \
     VALUES ($1, $2, $3, $4, $5)";

/// An open connection to the relational store.
///
/// Obtained from a [`Connector`] for the duration of one sink call and always
/// handed back through [`StoreConnection::close`].
#[async_trait]
pub trait StoreConnection: Send {
    async fn ensure_table(&mut self) -> Result<(), WeatherError>;
    async fn insert(&mut self, record: &PersistedWeatherRecord) -> Result<(), WeatherError>;
    async fn close(self: Box<Self>) -> Result<(), WeatherError>;
}

#[async_trait]
pub trait Connector: Send + Sync + Debug {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, WeatherError>;
}

/// Opens plain Postgres connections, one per call.
#[derive(Debug, Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
}

impl PgConnector {
    pub fn from_config(db: &DatabaseConfig) -> anyhow::Result<Self> {
        let name = db.name.as_deref().ok_or_else(|| {
            anyhow!(
                "No database name configured.\n\
                 Hint: set DB_NAME or choose another persistence strategy (PERSISTENCE=none)."
            )
        })?;
        let user = db.user.as_deref().ok_or_else(|| {
            anyhow!("No database user configured.\nHint: set DB_USER.")
        })?;

        let mut options = PgConnectOptions::new()
            .host(&db.host)
            .port(db.port)
            .username(user)
            .database(name);
        if let Some(password) = db.password.as_deref() {
            options = options.password(password);
        }

        Ok(Self { options })
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, WeatherError> {
        let conn = PgConnection::connect_with(&self.options)
            .await
            .map_err(|e| WeatherError::persistence(format!("failed to connect to database: {e}")))?;
        Ok(Box::new(PgStoreConnection { conn }))
    }
}

struct PgStoreConnection {
    conn: PgConnection,
}

#[async_trait]
impl StoreConnection for PgStoreConnection {
    async fn ensure_table(&mut self) -> Result<(), WeatherError> {
        sqlx::query(CREATE_TABLE_SQL)
            .execute(&mut self.conn)
            .await
            .map_err(|e| WeatherError::persistence(format!("failed to create weather_data: {e}")))?;
        Ok(())
    }

    async fn insert(&mut self, record: &PersistedWeatherRecord) -> Result<(), WeatherError> {
        sqlx::query(INSERT_SQL)
            .bind(&record.clouds)
            .bind(&record.forecast)
            .bind(record.wind_speed)
            .bind(&record.location_name)
            .bind(record.temp)
            .execute(&mut self.conn)
            .await
            .map_err(|e| WeatherError::persistence(format!("failed to insert weather row: {e}")))?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), WeatherError> {
        self.conn
            .close()
            .await
            .map_err(|e| WeatherError::persistence(format!("failed to close connection: {e}")))
    }
}

/// Writes one validated row per lookup into `weather_data`.
#[derive(Debug, Clone)]
pub struct DirectWriteSink {
    connector: Arc<dyn Connector>,
}

impl DirectWriteSink {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl WeatherSink for DirectWriteSink {
    async fn persist(&self, snapshot: &WeatherSnapshot) -> Result<(), WeatherError> {
        let mut conn = self.connector.connect().await?;

        let outcome = write_snapshot(conn.as_mut(), snapshot).await;

        // Closed on every path; a close failure never hides the write outcome.
        if let Err(e) = conn.close().await {
            tracing::warn!(error = %e, "failed to close database connection");
        }

        outcome
    }
}

async fn write_snapshot(
    conn: &mut dyn StoreConnection,
    snapshot: &WeatherSnapshot,
) -> Result<(), WeatherError> {
    conn.ensure_table().await?;

    let report = snapshot.report()?;
    let record = PersistedWeatherRecord::try_from(&report)?;

    conn.insert(&record).await?;
    tracing::info!(location = %record.location_name, "saved weather to database");
    Ok(())
}
