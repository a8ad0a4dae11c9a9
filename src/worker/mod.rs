//! Job workers
//!
//! Two ways of feeding the [`JobExecutor`]:
//! - [`spawn_local_pool`]: one task per broker channel inside the serving
//!   process; each job is acked in the Fjall queue once it is terminal
//! - [`run_redis_worker`]: a standalone process popping jobs from the Redis
//!   list, running up to `max_inflight_jobs` concurrently
//!
//! Each job runs in its own tokio task so a panic is caught and reported
//! as the job's single `error` event.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::{self, BridgeError, ProgressPublisher};
use crate::config::{Config, ConfigError};
use crate::executor::{CommandProcessor, JobExecutor};
use crate::observability::Metrics;
use crate::proto::JobTask;
use crate::queue::{RedisConsumer, RedisQueueError, TaskBroker, TaskEnvelope};
use crate::transfer::{self, TransferError};
use crate::unpack::ResultUnpacker;

const POP_WAIT: Duration = Duration::from_secs(1);
const POP_ERROR_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("no processor program configured")]
    MissingProcessor,

    #[error("transport: {0}")]
    Transfer(#[from] TransferError),

    #[error("progress bridge: {0}")]
    Bridge(#[from] BridgeError),

    #[error("redis queue: {0}")]
    Queue(#[from] RedisQueueError),
}

/// Assemble the executor a job-running process uses
pub fn build_executor(
    config: &Config,
    publisher: Arc<dyn ProgressPublisher>,
    metrics: Arc<Metrics>,
) -> Result<JobExecutor, WorkerError> {
    config.validate_execution()?;

    let processor =
        CommandProcessor::from_config(&config.processor).ok_or(WorkerError::MissingProcessor)?;
    let transport = transfer::build_transport(&config.transfer)?;
    let unpacker = ResultUnpacker::new(
        &config.server.results_dir,
        &config.server.results_url_prefix,
    );

    info!(mode = ?transport.mode(), "Job executor ready");

    Ok(JobExecutor::new(
        Arc::new(processor),
        transport,
        publisher,
        unpacker,
        config.poll_policy(),
        metrics,
    ))
}

/// Run one job in its own task; a panic becomes the job's error event
pub async fn execute_guarded(
    executor: Arc<JobExecutor>,
    task: JobTask,
    cancel: CancellationToken,
) -> bool {
    let job = {
        let executor = executor.clone();
        let task = task.clone();
        tokio::spawn(async move { executor.run(&task, &cancel).await })
    };

    match job.await {
        Ok(outcome) => outcome.is_completed(),
        Err(e) => {
            let reason = if e.is_panic() {
                "executor panicked"
            } else {
                "executor task cancelled"
            };
            executor.report_crash(&task, reason).await;
            false
        }
    }
}

/// Spawn one worker loop per broker channel
pub fn spawn_local_pool(
    executor: Arc<JobExecutor>,
    broker: Arc<TaskBroker>,
    receivers: Vec<mpsc::UnboundedReceiver<TaskEnvelope>>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    receivers
        .into_iter()
        .enumerate()
        .map(|(worker_id, rx)| {
            tokio::spawn(local_worker(
                worker_id,
                executor.clone(),
                broker.clone(),
                rx,
                cancel.clone(),
            ))
        })
        .collect()
}

async fn local_worker(
    worker_id: usize,
    executor: Arc<JobExecutor>,
    broker: Arc<TaskBroker>,
    mut rx: mpsc::UnboundedReceiver<TaskEnvelope>,
    cancel: CancellationToken,
) {
    debug!(worker_id, "Local worker started");

    loop {
        let envelope = tokio::select! {
            _ = cancel.cancelled() => break,
            envelope = rx.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let TaskEnvelope { seq, task } = envelope;
        execute_guarded(executor.clone(), task, cancel.child_token()).await;

        if let Err(e) = broker.ack(seq).await {
            warn!(worker_id, seq, error = %e, "Failed to ack finished task");
        }
    }

    debug!(worker_id, "Local worker stopped");
}

/// Consume the Redis job list until cancelled
pub async fn run_redis_worker(
    executor: Arc<JobExecutor>,
    mut consumer: RedisConsumer,
    max_inflight: usize,
    cancel: CancellationToken,
) {
    let slots = Arc::new(Semaphore::new(max_inflight.max(1)));
    let mut running = JoinSet::new();
    info!(max_inflight, "Redis worker started");

    loop {
        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let popped = tokio::select! {
            _ = cancel.cancelled() => break,
            popped = consumer.pop() => popped,
        };

        match popped {
            Ok(Some(task)) => {
                info!(job_id = %task.job_id, "Job taken from Redis queue");
                let executor = executor.clone();
                let job_cancel = cancel.child_token();
                running.spawn(async move {
                    execute_guarded(executor, task, job_cancel).await;
                    drop(permit);
                });
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Redis pop failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(POP_ERROR_BACKOFF) => {}
                }
            }
        }

        // reap finished jobs
        while running.try_join_next().is_some() {}
    }

    info!(in_flight = running.len(), "Redis worker draining");
    while running.join_next().await.is_some() {}
    info!("Redis worker stopped");
}

/// Entry point of the `worker` role
pub async fn run(config: Config, cancel: CancellationToken) -> Result<(), WorkerError> {
    let bridge = bridge::connect(&config.bridge).await?;
    let metrics = Arc::new(Metrics::new());
    let executor = Arc::new(build_executor(&config, bridge.publisher, metrics)?);

    let consumer =
        RedisConsumer::connect(&config.queue.redis_url, config.queue.redis_key.clone(), POP_WAIT)
            .await?;

    run_redis_worker(executor, consumer, config.worker.max_inflight_jobs, cancel).await;
    Ok(())
}
