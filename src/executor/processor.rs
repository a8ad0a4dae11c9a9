//! Processing step: turns a job's staged inputs into one output artifact

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ProcessorConfig;
use crate::proto::JobTask;

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("failed to start processor: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("processor exited with {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },

    #[error("processor timed out after {0:?}")]
    Timeout(Duration),

    #[error("processor produced no output at {0}")]
    MissingOutput(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces the artifact that is shipped to the peer system
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, task: &JobTask) -> Result<PathBuf, ProcessingError>;
}

/// Directory inside a job's staging area that receives processing output
pub fn output_dir(task: &JobTask) -> PathBuf {
    Path::new(&task.staging_dir).join("output")
}

/// Runs a configured external program once per job
///
/// The program receives the staged input paths as trailing arguments and
/// these environment variables:
/// - `JOBRELAY_JOB_ID`
/// - `JOBRELAY_PARAMS` (client parameters, verbatim)
/// - `JOBRELAY_OUTPUT` (path the artifact must be written to)
#[derive(Debug, Clone)]
pub struct CommandProcessor {
    program: String,
    args: Vec<String>,
    output_name: String,
    timeout: Duration,
}

impl CommandProcessor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            output_name: "model_output.txt".to_string(),
            timeout: Duration::from_secs(3600),
        }
    }

    pub fn from_config(config: &ProcessorConfig) -> Option<Self> {
        let program = config.program.clone()?;
        let mut processor = Self::new(program, config.args.clone());
        processor.output_name = config.output_name.clone();
        processor.timeout = Duration::from_secs(config.timeout_secs);
        Some(processor)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Processor for CommandProcessor {
    async fn process(&self, task: &JobTask) -> Result<PathBuf, ProcessingError> {
        let out_dir = output_dir(task);
        tokio::fs::create_dir_all(&out_dir).await?;
        let output = out_dir.join(&self.output_name);

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .args(&task.inputs)
            .env("JOBRELAY_JOB_ID", &task.job_id)
            .env("JOBRELAY_PARAMS", &task.params)
            .env("JOBRELAY_OUTPUT", &output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(job_id = %task.job_id, program = %self.program, "Starting processor");
        let child = command.spawn().map_err(ProcessingError::Spawn)?;

        let finished = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProcessingError::Timeout(self.timeout))??;

        if !finished.status.success() {
            let stderr = String::from_utf8_lossy(&finished.stderr).trim().to_string();
            return Err(ProcessingError::Exit {
                code: finished.status.code(),
                stderr,
            });
        }

        if !tokio::fs::try_exists(&output).await? {
            return Err(ProcessingError::MissingOutput(output));
        }

        info!(job_id = %task.job_id, output = %output.display(), "Processing finished");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn task_in(dir: &TempDir) -> JobTask {
        JobTask {
            job_id: "job-1".to_string(),
            client_id: "c1".to_string(),
            params: "width=3".to_string(),
            staging_dir: dir.path().to_string_lossy().into_owned(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_command_writes_output() {
        let dir = TempDir::new().unwrap();
        let processor = CommandProcessor::new(
            "sh",
            vec!["-c".into(), "echo \"$JOBRELAY_PARAMS\" > \"$JOBRELAY_OUTPUT\"".into()],
        );

        let output = processor.process(&task_in(&dir)).await.unwrap();
        assert_eq!(output, dir.path().join("output").join("model_output.txt"));
        assert_eq!(std::fs::read_to_string(output).unwrap().trim(), "width=3");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let dir = TempDir::new().unwrap();
        let processor =
            CommandProcessor::new("sh", vec!["-c".into(), "echo broken >&2; exit 3".into()]);

        match processor.process(&task_in(&dir)).await {
            Err(ProcessingError::Exit { code, stderr }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_output_is_error() {
        let dir = TempDir::new().unwrap();
        let processor = CommandProcessor::new("true", vec![]);

        assert!(matches!(
            processor.process(&task_in(&dir)).await,
            Err(ProcessingError::MissingOutput(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_kills_processor() {
        let dir = TempDir::new().unwrap();
        let processor = CommandProcessor::new("sleep", vec!["5".into()])
            .with_timeout(Duration::from_millis(50));

        assert!(matches!(
            processor.process(&task_in(&dir)).await,
            Err(ProcessingError::Timeout(_))
        ));
    }
}
