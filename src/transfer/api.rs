//! Peer HTTP API transport
//!
//! Every call carries the bearer credential. Contract:
//! - `POST {base}/upload` multipart (file, task_id, timestamp) -> `{task_id}`
//! - `GET {base}/status/{task_id}` -> `{status, message?, manifest?}`
//! - `GET {base}/download/{task_id}` -> zip archive

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, multipart};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{RemoteRef, RemoteStatus, Result, TransferError, TransferTask, Transport};
use crate::config::{ApiSettings, TransferMode};
use crate::unpack::{BundleManifest, ResultBundle};

/// Upper bound on the pause between download attempts
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// HTTP transport configuration
#[derive(Debug, Clone)]
pub struct ApiTransportConfig {
    pub base_url: String,
    pub api_key: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub user_agent: String,
}

impl ApiTransportConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
            max_retries: 3,
            user_agent: "jobrelay/0.1.0".to_string(),
        }
    }

    pub fn from_config(settings: &ApiSettings) -> Result<Self> {
        let base_url = settings
            .base_url
            .clone()
            .ok_or_else(|| TransferError::Config("transfer.api.base_url is not set".into()))?;
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| TransferError::Config("PEER_API_KEY is not set".into()))?;

        let mut config = Self::new(base_url, api_key);
        config.connect_timeout = Duration::from_secs(settings.connect_timeout_secs);
        config.request_timeout = Duration::from_secs(settings.request_timeout_secs);
        config.max_retries = settings.max_retries;
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    manifest: Option<BundleManifest>,
}

impl StatusResponse {
    fn into_status(self) -> RemoteStatus {
        match self.status.as_str() {
            "completed" => RemoteStatus::Done {
                manifest: self.manifest,
            },
            "failed" | "error" => RemoteStatus::Failed(
                self.message
                    .unwrap_or_else(|| "peer reported failure".to_string()),
            ),
            _ => RemoteStatus::Pending,
        }
    }
}

/// Authenticated HTTP API client for the peer system
pub struct ApiTransport {
    client: Client,
    config: ApiTransportConfig,
}

impl ApiTransport {
    pub fn new(config: ApiTransportConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path)
    }

    async fn download_once(&self, remote: &RemoteRef) -> Result<Bytes> {
        let url = self.url(&format!("download/{}", remote.task_id));
        debug!(url, "Starting result download");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;

        let response = check_status(response).await?;
        let bytes = response.bytes().await?;
        debug!(url, size = bytes.len(), "Result download completed");
        Ok(bytes)
    }
}

#[async_trait]
impl Transport for ApiTransport {
    fn mode(&self) -> TransferMode {
        TransferMode::Api
    }

    async fn upload(&self, task: &TransferTask) -> Result<RemoteRef> {
        let data = tokio::fs::read(&task.source).await?;
        let size = data.len();

        let part = multipart::Part::bytes(data)
            .file_name(task.file_name())
            .mime_str(mime::APPLICATION_OCTET_STREAM.as_ref())?;
        let form = multipart::Form::new()
            .text("task_id", task.job_id.clone())
            .text("timestamp", chrono::Utc::now().to_rfc3339())
            .part("file", part);

        let response = self
            .client
            .post(self.url("upload"))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransferError::Upload(e.to_string()))?;

        let response = check_status(response).await?;
        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| TransferError::InvalidResponse(e.to_string()))?;

        info!(job_id = %task.job_id, task_id = %body.task_id, size, "Artifact uploaded to peer");
        Ok(RemoteRef::new(body.task_id))
    }

    async fn poll_status(&self, remote: &RemoteRef) -> Result<RemoteStatus> {
        let response = self
            .client
            .get(self.url(&format!("status/{}", remote.task_id)))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| TransferError::Status(e.to_string()))?;

        let response = check_status(response).await?;
        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| TransferError::InvalidResponse(e.to_string()))?;

        Ok(body.into_status())
    }

    /// Download the archive, retrying with exponential backoff
    async fn fetch(&self, remote: &RemoteRef) -> Result<ResultBundle> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.download_once(remote).await {
                Ok(archive) => {
                    if attempts > 1 {
                        debug!(task_id = %remote.task_id, attempts, "Download succeeded after retry");
                    }
                    return Ok(ResultBundle {
                        job_id: remote.task_id.clone(),
                        archive,
                        manifest: None,
                    });
                }
                Err(e) => {
                    if attempts >= self.config.max_retries.max(1) {
                        warn!(task_id = %remote.task_id, attempts, error = %e, "Download failed after retries");
                        return Err(TransferError::Download(format!(
                            "failed after {} attempts: {}",
                            attempts, e
                        )));
                    }

                    warn!(task_id = %remote.task_id, attempts, error = %e, "Download failed, retrying");

                    tokio::time::sleep(backoff_for(attempts)).await;
                }
            }
        }
    }
}

/// Exponential backoff (1s, 2s, 4s, ...) capped at `MAX_BACKOFF`
fn backoff_for(attempt: u32) -> Duration {
    let secs = 2u64
        .checked_pow(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX)
        .min(MAX_BACKOFF.as_secs());
    Duration::from_secs(secs)
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(TransferError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ApiTransportConfig::new("http://peer:8001/api/v1/", "key");
        assert_eq!(config.base_url, "http://peer:8001/api/v1");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        assert_eq!(backoff_for(1), Duration::from_secs(1));
        assert_eq!(backoff_for(3), Duration::from_secs(4));
        assert_eq!(backoff_for(6), MAX_BACKOFF);
        assert_eq!(backoff_for(65), MAX_BACKOFF);
        assert_eq!(backoff_for(u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn test_status_mapping() {
        let parse = |raw: &str| serde_json::from_str::<StatusResponse>(raw).unwrap().into_status();

        assert_eq!(parse(r#"{"status":"processing"}"#), RemoteStatus::Pending);
        assert_eq!(parse(r#"{"status":"received"}"#), RemoteStatus::Pending);
        assert_eq!(
            parse(r#"{"status":"failed","message":"bad input"}"#),
            RemoteStatus::Failed("bad input".into())
        );

        match parse(r#"{"status":"completed","manifest":{"task_id":"t","files":[]}}"#) {
            RemoteStatus::Done { manifest } => {
                assert_eq!(manifest.unwrap().task_id.as_deref(), Some("t"))
            }
            other => panic!("unexpected status {other:?}"),
        }
    }
}
