//! Scrapinghub (Scrapy Cloud) job queue client

use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client as ReqwestClient, Response};
use serde::Deserialize;
use serde_json::Value;
use std::pin::pin;
use std::time::Duration;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tracing::{debug, instrument};

use super::error::JobQueueError;
use super::{Job, JobQueue, JobSummary};

/// Default base URL of the jobs API
pub const DEFAULT_APP_URL: &str = "https://app.scrapinghub.com/api";

/// Default base URL of the items storage API
pub const DEFAULT_STORAGE_URL: &str = "https://storage.scrapinghub.com";

/// Default timeout for requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Deserialize)]
struct JobListResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    jobs: Vec<JobEntry>,
}

#[derive(Debug, Deserialize)]
struct JobEntry {
    #[serde(alias = "key")]
    id: String,
    #[serde(default, alias = "items")]
    items_scraped: u64,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Client for one Scrapinghub project
#[derive(Clone)]
pub struct ScrapinghubClient {
    client: ReqwestClient,
    api_key: String,
    project_id: String,
    app_url: String,
    storage_url: String,
}

impl std::fmt::Debug for ScrapinghubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrapinghubClient")
            .field("project_id", &self.project_id)
            .field("app_url", &self.app_url)
            .field("storage_url", &self.storage_url)
            .finish()
    }
}

impl ScrapinghubClient {
    /// Create a client authenticating with `api_key`
    pub fn new(
        api_key: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Result<Self, JobQueueError> {
        let client = ReqwestClient::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            project_id: project_id.into(),
            app_url: DEFAULT_APP_URL.to_string(),
            storage_url: DEFAULT_STORAGE_URL.to_string(),
        })
    }

    /// Point the client at other API hosts
    pub fn with_endpoints(mut self, app_url: impl Into<String>, storage_url: impl Into<String>) -> Self {
        self.app_url = app_url.into().trim_end_matches('/').to_string();
        self.storage_url = storage_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn list_jobs(&self, query: &[(&str, &str)]) -> Result<Vec<JobEntry>, JobQueueError> {
        let response = self
            .client
            .get(format!("{}/jobs/list.json", self.app_url))
            .basic_auth(&self.api_key, Some(""))
            .query(&[("project", self.project_id.as_str())])
            .query(query)
            .send()
            .await?;
        let listing: JobListResponse = check(response).await?.json().await?;
        if listing.status != "ok" {
            return Err(JobQueueError::Api {
                status: 200,
                message: listing.message.unwrap_or(listing.status),
            });
        }
        Ok(listing.jobs)
    }
}

#[async_trait]
impl JobQueue for ScrapinghubClient {
    #[instrument(skip(self))]
    async fn list_finished_jobs(&self, spider: &str) -> Result<Vec<JobSummary>, JobQueueError> {
        let jobs = self
            .list_jobs(&[("spider", spider), ("state", "finished")])
            .await?;
        debug!("Found {} finished jobs", jobs.len());
        Ok(jobs
            .into_iter()
            .map(|job| JobSummary {
                key: job.id,
                item_count: job.items_scraped,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn get_job(&self, key: &str) -> Result<Option<Box<dyn Job>>, JobQueueError> {
        let jobs = self.list_jobs(&[("job", key)]).await?;
        Ok(jobs
            .into_iter()
            .find(|job| job.id == key)
            .map(|job| {
                Box::new(ScrapinghubJob {
                    client: self.clone(),
                    key: job.id,
                }) as Box<dyn Job>
            }))
    }
}

/// A job of a Scrapinghub project
#[derive(Debug)]
pub struct ScrapinghubJob {
    client: ScrapinghubClient,
    key: String,
}

#[async_trait]
impl Job for ScrapinghubJob {
    fn key(&self) -> &str {
        &self.key
    }

    fn items(&self) -> BoxStream<'_, Result<Value, JobQueueError>> {
        Box::pin(try_stream! {
            let response = self
                .client
                .client
                .get(format!("{}/items/{}", self.client.storage_url, self.key))
                .basic_auth(&self.client.api_key, Some(""))
                .query(&[("format", "jl")])
                .send()
                .await?;
            let body = check(response)
                .await?
                .bytes_stream()
                .map_err(std::io::Error::other);
            let mut lines = pin!(FramedRead::new(StreamReader::new(body), LinesCodec::new()));

            while let Some(line) = lines.next().await {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                yield serde_json::from_str::<Value>(&line)?;
            }
        })
    }

    #[instrument(skip(self), fields(job = %self.key))]
    async fn delete(&self) -> Result<(), JobQueueError> {
        let response = self
            .client
            .client
            .post(format!("{}/jobs/delete.json", self.client.app_url))
            .basic_auth(&self.client.api_key, Some(""))
            .form(&[("project", self.client.project_id.as_str()), ("job", self.key.as_str())])
            .send()
            .await?;
        let result: StatusResponse = check(response).await?.json().await?;
        if result.status != "ok" {
            return Err(JobQueueError::Api {
                status: 200,
                message: result.message.unwrap_or(result.status),
            });
        }
        debug!("Deleted job");
        Ok(())
    }
}

async fn check(response: Response) -> Result<Response, JobQueueError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(JobQueueError::Api {
        status: status.as_u16(),
        message,
    })
}
