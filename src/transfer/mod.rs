//! Remote peer transfer
//!
//! A [`Transport`] moves a job's processing output to the peer system,
//! reports the peer's progress, and fetches the finished result bundle.
//! [`await_completion`] drives the bounded polling loop shared by every
//! transport.

mod api;
mod ftps;

pub use api::{ApiTransport, ApiTransportConfig};
pub use ftps::{FtpsTransport, FtpsTransportConfig};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{TransferConfig, TransferMode};
use crate::unpack::{BundleManifest, ResultBundle};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("upload failed: {0}")]
    Upload(String),

    #[error("status check failed: {0}")]
    Status(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("peer rejected request: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("peer reported failure: {0}")]
    Remote(String),

    #[error("peer did not finish after {attempts} status checks")]
    Timeout { attempts: u32 },

    #[error("transfer cancelled")]
    Cancelled,

    #[error("transport misconfigured: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("FTP error: {0}")]
    Ftp(#[from] suppaftp::FtpError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid peer response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, TransferError>;

/// Output artifact to ship for one job
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub source: PathBuf,
    pub job_id: String,
    pub mode: TransferMode,
}

impl TransferTask {
    pub fn file_name(&self) -> String {
        self.source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output.bin".to_string())
    }
}

/// Handle for a submission on the peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRef {
    pub task_id: String,
}

impl RemoteRef {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
        }
    }

    pub fn archive_name(&self) -> String {
        format!("{}_results.zip", self.task_id)
    }

    pub fn manifest_name(&self) -> String {
        format!("{}_manifest.json", self.task_id)
    }
}

/// Peer-side progress of a submission
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteStatus {
    Pending,
    Done { manifest: Option<BundleManifest> },
    Failed(String),
}

/// Capability set shared by all peer transports
#[async_trait]
pub trait Transport: Send + Sync {
    fn mode(&self) -> TransferMode;

    async fn upload(&self, task: &TransferTask) -> Result<RemoteRef>;

    async fn poll_status(&self, remote: &RemoteRef) -> Result<RemoteStatus>;

    async fn fetch(&self, remote: &RemoteRef) -> Result<ResultBundle>;
}

/// Fixed-interval, fixed-budget polling
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

/// Poll the peer until it finishes, fails, or the attempt budget runs out.
///
/// The first check happens immediately; `policy.interval` separates later
/// ones. A transport error during a check is logged and uses up that
/// attempt. `cancel` is observed before every check and while sleeping.
pub async fn await_completion(
    transport: &dyn Transport,
    remote: &RemoteRef,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> Result<Option<BundleManifest>> {
    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        match transport.poll_status(remote).await {
            Ok(RemoteStatus::Done { manifest }) => {
                info!(task_id = %remote.task_id, attempt, "Peer finished");
                return Ok(manifest);
            }
            Ok(RemoteStatus::Failed(reason)) => {
                warn!(task_id = %remote.task_id, attempt, %reason, "Peer reported failure");
                return Err(TransferError::Remote(reason));
            }
            Ok(RemoteStatus::Pending) => {
                debug!(task_id = %remote.task_id, attempt, "Peer still working");
            }
            Err(e) => {
                warn!(task_id = %remote.task_id, attempt, error = %e, "Status check failed");
            }
        }

        if attempt < policy.max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = tokio::time::sleep(policy.interval) => {}
            }
        }
    }

    Err(TransferError::Timeout {
        attempts: policy.max_attempts,
    })
}

/// Build the transport selected in configuration
pub fn build_transport(config: &TransferConfig) -> Result<Arc<dyn Transport>> {
    match config.mode {
        TransferMode::Api => {
            let api = ApiTransportConfig::from_config(&config.api)?;
            Ok(Arc::new(ApiTransport::new(api)?))
        }
        TransferMode::Ftps => {
            let ftps = FtpsTransportConfig::from_config(&config.ftps)?;
            Ok(Arc::new(FtpsTransport::new(ftps)?))
        }
    }
}
