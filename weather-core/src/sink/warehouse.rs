use std::{path::PathBuf, sync::Arc};

use anyhow::anyhow;
use async_trait::async_trait;

use crate::{config::WarehouseConfig, error::WeatherError, model::WeatherSnapshot};

use super::{
    WeatherSink,
    gcp::{LoadRequest, ObjectStore, Warehouse},
    staging::{StagingFile, flatten},
};

#[derive(Debug, Clone)]
pub struct StagedLoadSettings {
    pub bucket: String,
    pub object: String,
    pub dataset: String,
    pub table: String,
    pub staging_dir: PathBuf,
}

impl StagedLoadSettings {
    pub fn from_config(config: &WarehouseConfig) -> anyhow::Result<Self> {
        let bucket = config.bucket.clone().ok_or_else(|| {
            anyhow!("No staging bucket configured.\nHint: set GCS_BUCKET for the warehouse strategy.")
        })?;

        Ok(Self {
            bucket,
            object: config.object.clone(),
            dataset: config.dataset.clone(),
            table: config.table.clone(),
            staging_dir: config
                .staging_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
        })
    }

    pub fn source_uri(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.object)
    }
}

/// Stages the raw payload as CSV in Cloud Storage and bulk-loads it.
#[derive(Debug, Clone)]
pub struct StagedLoadSink {
    settings: StagedLoadSettings,
    storage: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
}

impl StagedLoadSink {
    pub fn new(
        settings: StagedLoadSettings,
        storage: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        Self {
            settings,
            storage,
            warehouse,
        }
    }
}

#[async_trait]
impl WeatherSink for StagedLoadSink {
    async fn persist(&self, snapshot: &WeatherSnapshot) -> Result<(), WeatherError> {
        let s = &self.settings;

        let contents = {
            let staged = StagingFile::create(&s.staging_dir, &flatten(snapshot.raw()))?;
            staged.read()?
        };

        self.storage.ensure_bucket(&s.bucket).await?;
        self.storage.upload(&s.bucket, &s.object, contents).await?;

        self.warehouse.ensure_dataset(&s.dataset).await?;
        self.warehouse
            .load_csv(&LoadRequest {
                source_uri: s.source_uri(),
                dataset: s.dataset.clone(),
                table: s.table.clone(),
            })
            .await?;

        tracing::info!(dataset = %s.dataset, table = %s.table, "weather loaded into warehouse");
        Ok(())
    }
}
