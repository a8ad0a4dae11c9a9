//! Job executor
//!
//! Drives one job through processing, upload, remote polling and result
//! unpacking. Every state the job enters is announced with exactly one
//! [`ProgressEvent`], and every job ends with exactly one terminal event.

mod processor;
mod state;

pub use processor::{CommandProcessor, ProcessingError, Processor, output_dir};
pub use state::{JobState, Lifecycle, TransitionError};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bridge::ProgressPublisher;
use crate::events::ProgressEvent;
use crate::observability::Metrics;
use crate::proto::JobTask;
use crate::transfer::{PollPolicy, TransferError, TransferTask, Transport, await_completion};
use crate::unpack::{ResultSet, ResultUnpacker, UnpackError};

const PUBLISH_ATTEMPTS: u32 = 3;
const PUBLISH_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum JobError {
    #[error("processing failed: {0}")]
    Execution(#[from] ProcessingError),

    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("peer did not finish after {attempts} status checks")]
    RemoteTimeout { attempts: u32 },

    #[error("peer reported failure: {0}")]
    Remote(String),

    #[error("result bundle unusable: {0}")]
    BundleCorrupt(#[from] UnpackError),

    #[error("job aborted by shutdown")]
    Aborted,

    #[error("job crashed: {0}")]
    Crashed(String),
}

impl JobError {
    pub fn code(&self) -> &'static str {
        match self {
            JobError::Execution(_) => "execution_error",
            JobError::Transfer(_) => "transfer_error",
            JobError::RemoteTimeout { .. } => "remote_timeout",
            JobError::Remote(_) => "remote_error",
            JobError::BundleCorrupt(_) => "bundle_corrupt",
            JobError::Aborted => "aborted",
            JobError::Crashed(_) => "execution_error",
        }
    }

    /// Classify the end of a polling loop
    fn from_poll(err: TransferError) -> Self {
        match err {
            TransferError::Timeout { attempts } => JobError::RemoteTimeout { attempts },
            TransferError::Remote(reason) => JobError::Remote(reason),
            TransferError::Cancelled => JobError::Aborted,
            other => JobError::Transfer(other),
        }
    }
}

/// How a job ended
#[derive(Debug)]
pub enum JobOutcome {
    Completed(ResultSet),
    Failed(JobError),
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed(_))
    }
}

/// Shared by every job a process runs
pub struct JobExecutor {
    processor: Arc<dyn Processor>,
    transport: Arc<dyn Transport>,
    publisher: Arc<dyn ProgressPublisher>,
    unpacker: ResultUnpacker,
    policy: PollPolicy,
    metrics: Arc<Metrics>,
}

/// Per-job bookkeeping
struct JobRun<'a> {
    task: &'a JobTask,
    lifecycle: Lifecycle,
}

impl JobRun<'_> {
    fn event(&self, state: JobState, message: impl Into<String>) -> ProgressEvent {
        ProgressEvent::new(&self.task.job_id, &self.task.client_id, state, message)
    }
}

impl JobExecutor {
    pub fn new(
        processor: Arc<dyn Processor>,
        transport: Arc<dyn Transport>,
        publisher: Arc<dyn ProgressPublisher>,
        unpacker: ResultUnpacker,
        policy: PollPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            processor,
            transport,
            publisher,
            unpacker,
            policy,
            metrics,
        }
    }

    /// Run a job to its terminal state.
    ///
    /// Never returns an error: failures become the job's `error` event.
    pub async fn run(&self, task: &JobTask, cancel: &CancellationToken) -> JobOutcome {
        info!(job_id = %task.job_id, client_id = %task.client_id, "Job started");
        let mut run = JobRun {
            task,
            lifecycle: Lifecycle::new(),
        };

        let result = self.drive(&mut run, cancel).await;
        remove_staged(task).await;

        match result {
            Ok(results) => {
                let message = format!("Completed with {} result files", results.total_count);
                let event = run
                    .event(JobState::Completed, message)
                    .with_result(results.clone());
                self.emit_event(&mut run, event).await;
                self.metrics.job_completed();
                info!(job_id = %task.job_id, files = results.total_count, "Job completed");
                JobOutcome::Completed(results)
            }
            Err(e) => {
                let event = run
                    .event(JobState::Failed, e.to_string())
                    .with_error_code(e.code());
                self.emit_event(&mut run, event).await;
                self.metrics.job_failed();
                warn!(job_id = %task.job_id, code = e.code(), error = %e, "Job failed");
                JobOutcome::Failed(e)
            }
        }
    }

    /// Terminal event for a job whose executor task died unexpectedly
    pub async fn report_crash(&self, task: &JobTask, reason: &str) {
        error!(job_id = %task.job_id, reason, "Job executor crashed");
        remove_staged(task).await;

        let e = JobError::Crashed(reason.to_string());
        let event = ProgressEvent::new(&task.job_id, &task.client_id, JobState::Failed, e.to_string())
            .with_error_code(e.code());
        self.publish(&event).await;
        self.metrics.job_failed();
    }

    async fn drive(
        &self,
        run: &mut JobRun<'_>,
        cancel: &CancellationToken,
    ) -> Result<ResultSet, JobError> {
        let task = run.task;

        self.emit(run, JobState::Processing, "Processing inputs").await;
        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(JobError::Aborted),
            output = self.processor.process(task) => output?,
        };

        let transfer = TransferTask {
            source: output,
            job_id: task.job_id.clone(),
            mode: self.transport.mode(),
        };
        self.emit(
            run,
            JobState::Transferring,
            format!("Uploading {} to peer", transfer.file_name()),
        )
        .await;
        let remote = self.transport.upload(&transfer).await?;

        self.emit(
            run,
            JobState::AwaitingRemote,
            format!("Waiting for peer task {}", remote.task_id),
        )
        .await;
        let status_manifest =
            await_completion(self.transport.as_ref(), &remote, self.policy, cancel)
                .await
                .map_err(JobError::from_poll)?;

        self.emit(run, JobState::Finalizing, "Fetching result bundle").await;
        let mut bundle = self.transport.fetch(&remote).await?;
        bundle.job_id = task.job_id.clone();
        if bundle.manifest.is_none() {
            bundle.manifest = status_manifest;
        }

        let unpacker = self.unpacker.clone();
        let job_id = task.job_id.clone();
        let results = tokio::task::spawn_blocking(move || unpacker.unpack(&job_id, &bundle))
            .await
            .map_err(|e| UnpackError::Io(std::io::Error::other(e)))??;

        Ok(results)
    }

    async fn emit(&self, run: &mut JobRun<'_>, state: JobState, message: impl Into<String>) {
        let event = run.event(state, message);
        self.emit_event(run, event).await;
    }

    /// Enter the event's state and announce it; illegal moves are logged, not published
    async fn emit_event(&self, run: &mut JobRun<'_>, event: ProgressEvent) {
        if let Err(e) = run.lifecycle.advance(event.state) {
            error!(job_id = %run.task.job_id, error = %e, "State transition rejected");
            return;
        }
        self.publish(&event).await;
    }

    async fn publish(&self, event: &ProgressEvent) {
        for attempt in 1..=PUBLISH_ATTEMPTS {
            match self.publisher.publish(event).await {
                Ok(()) => {
                    self.metrics.event_published();
                    return;
                }
                Err(e) if attempt < PUBLISH_ATTEMPTS => {
                    warn!(job_id = %event.job_id, attempt, error = %e, "Publish failed, retrying");
                    tokio::time::sleep(PUBLISH_BACKOFF * attempt).await;
                }
                Err(e) => {
                    error!(
                        job_id = %event.job_id,
                        state = event.state.as_str(),
                        error = %e,
                        "Progress event dropped"
                    );
                }
            }
        }
    }
}

/// Best-effort removal of a job's staging directory
async fn remove_staged(task: &JobTask) {
    if task.staging_dir.is_empty() {
        return;
    }
    let dir = Path::new(&task.staging_dir);
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(job_id = %task.job_id, dir = %dir.display(), error = %e, "Failed to remove staged inputs")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferError;

    #[test]
    fn test_poll_errors_classified() {
        assert!(matches!(
            JobError::from_poll(TransferError::Timeout { attempts: 5 }),
            JobError::RemoteTimeout { attempts: 5 }
        ));
        assert!(matches!(
            JobError::from_poll(TransferError::Cancelled),
            JobError::Aborted
        ));
        assert_eq!(
            JobError::from_poll(TransferError::Remote("bad".into())).code(),
            "remote_error"
        );
    }

    #[test]
    fn test_error_messages_are_readable() {
        let e = JobError::RemoteTimeout { attempts: 3 };
        assert_eq!(e.to_string(), "peer did not finish after 3 status checks");
        assert_eq!(JobError::Aborted.code(), "aborted");
    }
}
