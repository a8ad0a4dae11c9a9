//! Job intake
//!
//! [`JobDispatcher::submit`] stages a job's inputs on disk, hands the job
//! to the configured [`ExecutionSubstrate`] and returns the new job id
//! without waiting for any processing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::ProgressPublisher;
use crate::events::ProgressEvent;
use crate::executor::JobState;
use crate::observability::Metrics;
use crate::proto::JobTask;
use crate::queue::{QueueError, RedisQueue, RedisQueueError, TaskBroker};

#[derive(Debug, Error)]
pub enum SubstrateError {
    #[error("local queue: {0}")]
    Local(#[from] QueueError),

    #[error("redis queue: {0}")]
    Redis(#[from] RedisQueueError),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("execution substrate unavailable: {0}")]
    Unavailable(#[from] SubstrateError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to stage inputs: {0}")]
    Io(#[from] std::io::Error),
}

/// Somewhere jobs go to be executed
#[async_trait]
pub trait ExecutionSubstrate: Send + Sync {
    /// Accept a job for asynchronous execution
    async fn hand_off(&self, task: JobTask) -> Result<(), SubstrateError>;

    async fn health(&self) -> bool;

    fn name(&self) -> &'static str;
}

#[async_trait]
impl ExecutionSubstrate for TaskBroker {
    async fn hand_off(&self, task: JobTask) -> Result<(), SubstrateError> {
        self.enqueue(task).await?;
        Ok(())
    }

    async fn health(&self) -> bool {
        self.health_check().await
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[async_trait]
impl ExecutionSubstrate for RedisQueue {
    async fn hand_off(&self, task: JobTask) -> Result<(), SubstrateError> {
        self.push(&task).await?;
        Ok(())
    }

    async fn health(&self) -> bool {
        self.ping().await
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// One uploaded input file
#[derive(Debug, Clone)]
pub struct InputArtifact {
    pub filename: String,
    pub data: Bytes,
}

impl InputArtifact {
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }
}

/// Error code of the terminal event for a job the substrate refused
pub const DISPATCH_UNAVAILABLE: &str = "dispatch_unavailable";

pub struct JobDispatcher {
    substrate: Arc<dyn ExecutionSubstrate>,
    publisher: Arc<dyn ProgressPublisher>,
    staging_dir: PathBuf,
    metrics: Arc<Metrics>,
}

impl JobDispatcher {
    pub fn new(
        substrate: Arc<dyn ExecutionSubstrate>,
        publisher: Arc<dyn ProgressPublisher>,
        staging_dir: impl Into<PathBuf>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            substrate,
            publisher,
            staging_dir: staging_dir.into(),
            metrics,
        }
    }

    pub fn substrate(&self) -> &dyn ExecutionSubstrate {
        self.substrate.as_ref()
    }

    /// Stage inputs and enqueue a new job, returning its id
    pub async fn submit(
        &self,
        client_id: &str,
        inputs: Vec<InputArtifact>,
        params: String,
    ) -> Result<String, DispatchError> {
        let client_id = client_id.trim();
        if client_id.is_empty() {
            return Err(DispatchError::InvalidRequest("client_id is required".into()));
        }

        let job_id = Uuid::now_v7().to_string();
        let job_dir = self.staging_dir.join(&job_id);

        let staged = match stage_inputs(&job_dir, &inputs).await {
            Ok(staged) => staged,
            Err(e) => {
                discard(&job_dir).await;
                return Err(e.into());
            }
        };

        let task = JobTask {
            job_id: job_id.clone(),
            client_id: client_id.to_string(),
            inputs: staged
                .iter()
                .map(|path| path.to_string_lossy().into_owned())
                .collect(),
            params,
            submitted_at_ms: chrono::Utc::now().timestamp_millis().max(0) as u64,
            staging_dir: job_dir.to_string_lossy().into_owned(),
        };

        // `queued` goes out before any worker can see the job
        let queued = ProgressEvent::new(&job_id, client_id, JobState::Queued, "Job queued");
        self.announce(&queued).await;

        if let Err(e) = self.substrate.hand_off(task).await {
            warn!(job_id = %job_id, substrate = self.substrate.name(), error = %e, "Hand-off failed");
            discard(&job_dir).await;

            let failed = ProgressEvent::new(&job_id, client_id, JobState::Failed, e.to_string())
                .with_error_code(DISPATCH_UNAVAILABLE);
            self.announce(&failed).await;
            return Err(DispatchError::Unavailable(e));
        }

        self.metrics.job_submitted();
        info!(job_id = %job_id, client_id, inputs = staged.len(), "Job submitted");

        Ok(job_id)
    }

    /// Best-effort publish of a dispatcher-owned event
    async fn announce(&self, event: &ProgressEvent) {
        match self.publisher.publish(event).await {
            Ok(()) => self.metrics.event_published(),
            Err(e) => warn!(
                job_id = %event.job_id,
                state = event.state.as_str(),
                error = %e,
                "Failed to publish dispatch event"
            ),
        }
    }
}

/// Write inputs under `job_dir` with sanitized, unique names
async fn stage_inputs(job_dir: &Path, inputs: &[InputArtifact]) -> std::io::Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(job_dir).await?;

    let mut staged: Vec<PathBuf> = Vec::with_capacity(inputs.len());
    for (index, input) in inputs.iter().enumerate() {
        let mut name = sanitize_filename(&input.filename, index);
        if staged.iter().any(|path| path.ends_with(&name)) {
            name = format!("{index}_{name}");
        }

        let path = job_dir.join(&name);
        tokio::fs::write(&path, &input.data).await?;
        debug!(path = %path.display(), size = input.data.len(), "Input staged");
        staged.push(path);
    }

    Ok(staged)
}

async fn discard(job_dir: &Path) {
    match tokio::fs::remove_dir_all(job_dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %job_dir.display(), error = %e, "Failed to remove staged inputs"),
    }
}

/// Reduce a client-supplied name to a single safe path component
pub fn sanitize_filename(raw: &str, index: usize) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        format!("input_{index}")
    } else {
        cleaned.to_string()
    }
}
