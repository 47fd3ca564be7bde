//! Minimal Cloud Storage and BigQuery REST clients for the staged load.

use std::{fmt, fmt::Debug, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::error::WeatherError;

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Bucket-level operations the staged load needs.
#[async_trait]
pub trait ObjectStore: Send + Sync + Debug {
    /// Create `bucket` unless it already exists.
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), WeatherError>;
    async fn upload(&self, bucket: &str, object: &str, contents: Vec<u8>)
    -> Result<(), WeatherError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub source_uri: String,
    pub dataset: String,
    pub table: String,
}

#[async_trait]
pub trait Warehouse: Send + Sync + Debug {
    /// Create `dataset` unless it already exists.
    async fn ensure_dataset(&self, dataset: &str) -> Result<(), WeatherError>;
    /// Run a CSV load job and wait for it to finish.
    async fn load_csv(&self, request: &LoadRequest) -> Result<(), WeatherError>;
}

/// Project id plus an OAuth access token.
#[derive(Clone)]
pub struct GcpCredentials {
    project: String,
    token: String,
}

impl GcpCredentials {
    pub fn new(project: &str, token: &str) -> Self {
        Self {
            project: project.to_string(),
            token: token.to_string(),
        }
    }
}

impl Debug for GcpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcpCredentials")
            .field("project", &self.project)
            .field("token", &"<redacted>")
            .finish()
    }
}

fn http_client() -> anyhow::Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .context("Failed to build HTTP client for Google Cloud")
}

async fn send(request: RequestBuilder, what: &str) -> Result<Response, WeatherError> {
    request
        .send()
        .await
        .map_err(|e| WeatherError::persistence(format!("{what}: {}", e.without_url())))
}

async fn expect_success(res: Response, what: &str) -> Result<Response, WeatherError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    Err(WeatherError::persistence(format!(
        "{what}: status {status}: {}",
        body.chars().take(200).collect::<String>()
    )))
}

#[derive(Debug, Clone)]
pub struct CloudStorageClient {
    credentials: GcpCredentials,
    base_url: String,
    http: Client,
}

impl CloudStorageClient {
    pub fn new(credentials: GcpCredentials, base_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            credentials,
            base_url: base_url.trim_end_matches('/').to_string(),
            http: http_client()?,
        })
    }
}

#[async_trait]
impl ObjectStore for CloudStorageClient {
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), WeatherError> {
        let url = format!("{}/storage/v1/b/{bucket}", self.base_url);
        let res = send(
            self.http.get(&url).bearer_auth(&self.credentials.token),
            "bucket lookup failed",
        )
        .await?;

        if res.status() != StatusCode::NOT_FOUND {
            expect_success(res, "bucket lookup failed").await?;
            tracing::debug!(bucket, "bucket exists");
            return Ok(());
        }

        let url = format!("{}/storage/v1/b", self.base_url);
        let res = send(
            self.http
                .post(&url)
                .bearer_auth(&self.credentials.token)
                .query(&[("project", self.credentials.project.as_str())])
                .json(&json!({ "name": bucket })),
            "bucket creation failed",
        )
        .await?;
        expect_success(res, "bucket creation failed").await?;

        tracing::info!(bucket, "created bucket");
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        object: &str,
        contents: Vec<u8>,
    ) -> Result<(), WeatherError> {
        let url = format!("{}/upload/storage/v1/b/{bucket}/o", self.base_url);
        let res = send(
            self.http
                .post(&url)
                .bearer_auth(&self.credentials.token)
                .query(&[("uploadType", "media"), ("name", object)])
                .header(reqwest::header::CONTENT_TYPE, "text/csv")
                .body(contents),
            "upload failed",
        )
        .await?;
        expect_success(res, "upload failed").await?;

        tracing::info!(bucket, object, "uploaded staging file");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: JobReference,
    #[serde(default)]
    status: JobStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    #[serde(default)]
    state: String,
    error_result: Option<JobError>,
}

#[derive(Debug, Deserialize)]
struct JobError {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone)]
pub struct BigQueryClient {
    credentials: GcpCredentials,
    base_url: String,
    location: String,
    load_timeout: Duration,
    poll_interval: Duration,
    http: Client,
}

impl BigQueryClient {
    pub fn new(credentials: GcpCredentials, base_url: &str, location: &str) -> anyhow::Result<Self> {
        Ok(Self {
            credentials,
            base_url: base_url.trim_end_matches('/').to_string(),
            location: location.to_string(),
            load_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
            http: http_client()?,
        })
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn project_url(&self) -> String {
        format!(
            "{}/bigquery/v2/projects/{}",
            self.base_url, self.credentials.project
        )
    }

    async fn submit_load_job(&self, request: &LoadRequest) -> Result<Job, WeatherError> {
        let body = json!({
            "configuration": {
                "load": {
                    "sourceUris": [request.source_uri],
                    "destinationTable": {
                        "projectId": self.credentials.project,
                        "datasetId": request.dataset,
                        "tableId": request.table,
                    },
                    "sourceFormat": "CSV",
                    "skipLeadingRows": 1,
                    "autodetect": true,
                    "writeDisposition": "WRITE_APPEND",
                }
            }
        });

        let res = send(
            self.http
                .post(format!("{}/jobs", self.project_url()))
                .bearer_auth(&self.credentials.token)
                .json(&body),
            "load job submission failed",
        )
        .await?;
        parse_job(expect_success(res, "load job submission failed").await?).await
    }

    async fn poll_job(&self, job: &JobReference) -> Result<Job, WeatherError> {
        let location = job.location.as_deref().unwrap_or(&self.location);
        let res = send(
            self.http
                .get(format!("{}/jobs/{}", self.project_url(), job.job_id))
                .bearer_auth(&self.credentials.token)
                .query(&[("location", location)]),
            "load job lookup failed",
        )
        .await?;
        parse_job(expect_success(res, "load job lookup failed").await?).await
    }

    async fn wait_for(&self, mut job: Job) -> Result<(), WeatherError> {
        loop {
            if job.status.state == "DONE" {
                return match job.status.error_result {
                    Some(err) => Err(WeatherError::persistence(format!(
                        "load job {} failed: {} ({})",
                        job.job_reference.job_id, err.message, err.reason
                    ))),
                    None => Ok(()),
                };
            }
            tokio::time::sleep(self.poll_interval).await;
            job = self.poll_job(&job.job_reference).await?;
        }
    }
}

async fn parse_job(res: Response) -> Result<Job, WeatherError> {
    res.json::<Job>()
        .await
        .map_err(|e| WeatherError::persistence(format!("unexpected job response: {e}")))
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn ensure_dataset(&self, dataset: &str) -> Result<(), WeatherError> {
        let url = format!("{}/datasets/{dataset}", self.project_url());
        let res = send(
            self.http.get(&url).bearer_auth(&self.credentials.token),
            "dataset lookup failed",
        )
        .await?;

        if res.status() != StatusCode::NOT_FOUND {
            expect_success(res, "dataset lookup failed").await?;
            tracing::debug!(dataset, "dataset exists");
            return Ok(());
        }

        let body = json!({
            "datasetReference": {
                "projectId": self.credentials.project,
                "datasetId": dataset,
            },
            "location": self.location,
        });
        let res = send(
            self.http
                .post(format!("{}/datasets", self.project_url()))
                .bearer_auth(&self.credentials.token)
                .json(&body),
            "dataset creation failed",
        )
        .await?;
        expect_success(res, "dataset creation failed").await?;

        tracing::info!(dataset, "created dataset");
        Ok(())
    }

    async fn load_csv(&self, request: &LoadRequest) -> Result<(), WeatherError> {
        let job = self.submit_load_job(request).await?;
        let job_id = job.job_reference.job_id.clone();
        tracing::info!(job_id = %job_id, source = %request.source_uri, "submitted load job");

        tokio::time::timeout(self.load_timeout, self.wait_for(job))
            .await
            .map_err(|_| {
                WeatherError::persistence(format!(
                    "load job {job_id} timed out after {}s",
                    self.load_timeout.as_secs_f32()
                ))
            })??;

        tracing::info!(job_id = %job_id, table = %request.table, "load job completed");
        Ok(())
    }
}
