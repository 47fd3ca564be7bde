//! Persistence of fetched weather.
//!
//! One [`WeatherSink`] is active per deployment, picked by
//! [`PersistenceStrategy`]:
//! - [`postgres::DirectWriteSink`] writes one validated row per lookup.
//! - [`warehouse::StagedLoadSink`] stages the raw payload as CSV in Cloud
//!   Storage and bulk-loads it into BigQuery.
//! - [`DiscardSink`] keeps nothing.

use std::{fmt::Debug, sync::Arc};

use anyhow::anyhow;
use async_trait::async_trait;

use crate::{
    config::{PersistenceConfig, PersistenceStrategy},
    error::WeatherError,
    model::WeatherSnapshot,
};

pub mod gcp;
pub mod postgres;
pub mod staging;
pub mod warehouse;

#[async_trait]
pub trait WeatherSink: Send + Sync + Debug {
    async fn persist(&self, snapshot: &WeatherSnapshot) -> Result<(), WeatherError>;
}

/// Sink for deployments without a datastore.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

#[async_trait]
impl WeatherSink for DiscardSink {
    async fn persist(&self, _snapshot: &WeatherSnapshot) -> Result<(), WeatherError> {
        tracing::debug!("persistence disabled, snapshot not stored");
        Ok(())
    }
}

/// Build the sink selected by `config.strategy`.
pub fn sink_from_config(config: &PersistenceConfig) -> anyhow::Result<Arc<dyn WeatherSink>> {
    let sink: Arc<dyn WeatherSink> = match config.strategy {
        PersistenceStrategy::Postgres => {
            let connector = postgres::PgConnector::from_config(&config.database)?;
            Arc::new(postgres::DirectWriteSink::new(Arc::new(connector)))
        }
        PersistenceStrategy::Warehouse => {
            let wh = &config.warehouse;
            let project = wh.project.as_deref().ok_or_else(|| {
                anyhow!("No GCP project configured.\nHint: set GCP_PROJECT for the warehouse strategy.")
            })?;
            let token = wh.access_token.as_deref().ok_or_else(|| {
                anyhow!(
                    "No Google access token configured.\n\
                     Hint: set GOOGLE_ACCESS_TOKEN (e.g. from `gcloud auth print-access-token`)."
                )
            })?;
            let credentials = gcp::GcpCredentials::new(project, token);

            let storage = gcp::CloudStorageClient::new(credentials.clone(), &wh.storage_url)?;
            let bigquery = gcp::BigQueryClient::new(credentials, &wh.bigquery_url, &wh.location)?
                .with_load_timeout(std::time::Duration::from_secs(wh.load_timeout_secs));

            Arc::new(warehouse::StagedLoadSink::new(
                warehouse::StagedLoadSettings::from_config(wh)?,
                Arc::new(storage),
                Arc::new(bigquery),
            ))
        }
        PersistenceStrategy::None => Arc::new(DiscardSink),
    };

    tracing::info!(strategy = %config.strategy, "persistence sink ready");
    Ok(sink)
}
