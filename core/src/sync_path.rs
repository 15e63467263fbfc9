//! The synchronous delivery path as seen by the pipeline: something that takes
//! a job and answers with raw JSON of unknown shape.

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::job::TranslationJob;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Error)]
pub enum SyncCallError {
    #[error("sync endpoint unreachable: {0}")]
    Transport(String),
    #[error("sync endpoint answered HTTP {status}")]
    Status { status: u16, body: String },
    #[error("sync response is not JSON: {0}")]
    Decode(String),
    #[error("sync call timed out after {0:?}")]
    TimedOut(Duration),
}

#[async_trait]
pub trait SyncPath: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, job: &TranslationJob) -> Result<Value, SyncCallError>;
}

/// Posts the job wire contract to a remote synchronous endpoint.
#[derive(Debug, Clone)]
pub struct HttpSyncPath {
    client: Client,
    endpoint: String,
}

impl HttpSyncPath {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, SyncCallError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|err| SyncCallError::Transport(format!("failed to build http client: {err}")))?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SyncPath for HttpSyncPath {
    fn name(&self) -> &str {
        "http"
    }

    async fn call(&self, job: &TranslationJob) -> Result<Value, SyncCallError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&job.to_request())
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    SyncCallError::TimedOut(DEFAULT_TIMEOUT)
                } else {
                    SyncCallError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| SyncCallError::Transport(format!("failed to read response body: {err}")))?;
        debug!("sync endpoint answered {} ({} bytes) for job {}", status, body.len(), job.job_id());

        if !status.is_success() {
            return Err(SyncCallError::Status {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|err| SyncCallError::Decode(err.to_string()))
    }
}
