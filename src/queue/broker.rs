use crate::proto::JobTask;
use crate::queue::store::{FjallQueue, QueueError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

/// JobTask paired with its queue sequence number
#[derive(Clone, Debug)]
pub struct TaskEnvelope {
    pub seq: u64,
    pub task: JobTask,
}

/// TaskBroker hands submitted jobs to the in-process worker pool
///
/// 1. Dispatcher calls `broker.enqueue(task)`
/// 2. Broker persists the task to FjallQueue and gets its seq
/// 3. Broker sends TaskEnvelope{seq, task} round-robin to a worker channel
/// 4. The worker acks the seq once the job is terminal
///
/// Channels are unbounded so `enqueue` never waits on running jobs; the
/// backlog is already persisted in Fjall. A task whose worker channel is
/// gone stays persisted and is redelivered by [`TaskBroker::recover`].
pub struct TaskBroker {
    queue: Arc<RwLock<FjallQueue>>,
    worker_channels: Vec<mpsc::UnboundedSender<TaskEnvelope>>,
    next_worker: AtomicUsize,
}

impl TaskBroker {
    /// Returns the broker and one receiver per worker
    pub fn new(
        queue: Arc<RwLock<FjallQueue>>,
        num_workers: usize,
    ) -> (Self, Vec<mpsc::UnboundedReceiver<TaskEnvelope>>) {
        let num_workers = num_workers.max(1);
        info!(num_workers, "Creating TaskBroker with worker channels");

        let mut worker_channels = Vec::with_capacity(num_workers);
        let mut worker_receivers = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let (tx, rx) = mpsc::unbounded_channel();
            worker_channels.push(tx);
            worker_receivers.push(rx);
            debug!(worker_id, "Created worker channel");
        }

        let broker = Self {
            queue,
            worker_channels,
            next_worker: AtomicUsize::new(0),
        };

        (broker, worker_receivers)
    }

    /// Persist a task, then deliver it to the next worker
    ///
    /// Fails only when the task could not be persisted.
    pub async fn enqueue(&self, task: JobTask) -> Result<u64, QueueError> {
        let seq = {
            let queue = self.queue.write().await;
            queue.enqueue(&task)?
        };

        debug!(seq, job_id = %task.job_id, "Task persisted to queue");
        self.distribute(TaskEnvelope { seq, task });
        Ok(seq)
    }

    /// Redeliver tasks left over from a previous run
    pub async fn recover(&self) -> Result<usize, QueueError> {
        let pending = self.queue.read().await.pending()?;
        let count = pending.len();

        for (seq, task) in pending {
            info!(seq, job_id = %task.job_id, "Re-dispatching interrupted job");
            self.distribute(TaskEnvelope { seq, task });
        }

        Ok(count)
    }

    fn distribute(&self, envelope: TaskEnvelope) {
        let seq = envelope.seq;
        let worker_idx =
            self.next_worker.fetch_add(1, Ordering::Relaxed) % self.worker_channels.len();

        match self.worker_channels[worker_idx].send(envelope) {
            Ok(_) => debug!(seq, worker_idx, "Task sent to worker"),
            Err(_) => warn!(seq, worker_idx, "Worker channel closed, task kept in queue"),
        }
    }

    /// Mark a task finished
    pub async fn ack(&self, seq: u64) -> Result<(), QueueError> {
        self.queue.read().await.ack(seq)
    }

    pub fn num_workers(&self) -> usize {
        self.worker_channels.len()
    }

    /// All worker channels open and the store readable
    pub async fn health_check(&self) -> bool {
        self.worker_channels.iter().all(|ch| !ch.is_closed())
            && self.queue.read().await.health_check().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::FjallQueue;
    use tempfile::TempDir;

    fn create_test_task(job_id: &str) -> JobTask {
        JobTask {
            job_id: job_id.to_string(),
            client_id: "client-a".to_string(),
            ..Default::default()
        }
    }

    fn open_queue(dir: &TempDir) -> Arc<RwLock<FjallQueue>> {
        Arc::new(RwLock::new(FjallQueue::open(dir.path()).unwrap()))
    }

    #[tokio::test]
    async fn test_round_robin_distribution() {
        let temp_dir = TempDir::new().unwrap();
        let (broker, mut receivers) = TaskBroker::new(open_queue(&temp_dir), 3);

        for i in 0..6 {
            broker.enqueue(create_test_task(&format!("job{i}"))).await.unwrap();
        }

        // Worker 0 gets tasks 0, 3; worker 1 gets 1, 4; worker 2 gets 2, 5
        for (worker_id, rx) in receivers.iter_mut().enumerate() {
            let env1 = rx.recv().await.unwrap();
            let env2 = rx.recv().await.unwrap();
            assert_eq!(env1.seq, worker_id as u64);
            assert_eq!(env2.seq, (worker_id + 3) as u64);
        }
    }

    #[tokio::test]
    async fn test_closed_worker_keeps_task_persisted() {
        let temp_dir = TempDir::new().unwrap();
        let queue = open_queue(&temp_dir);

        let (broker, receivers) = TaskBroker::new(queue.clone(), 1);
        drop(receivers);

        let seq = broker.enqueue(create_test_task("job1")).await.unwrap();
        let retrieved = queue.read().await.get_task(seq).unwrap().unwrap();
        assert_eq!(retrieved.job_id, "job1");
        assert!(!broker.health_check().await);
    }

    #[tokio::test]
    async fn test_recover_redelivers_unacked() {
        let temp_dir = TempDir::new().unwrap();
        let queue = open_queue(&temp_dir);

        {
            let (broker, receivers) = TaskBroker::new(queue.clone(), 1);
            let done = broker.enqueue(create_test_task("finished")).await.unwrap();
            broker.enqueue(create_test_task("interrupted")).await.unwrap();
            broker.ack(done).await.unwrap();
            drop(receivers);
        }

        let (broker, mut receivers) = TaskBroker::new(queue, 1);
        assert_eq!(broker.recover().await.unwrap(), 1);

        let envelope = receivers[0].recv().await.unwrap();
        assert_eq!(envelope.task.job_id, "interrupted");
    }

    #[tokio::test]
    async fn test_enqueue_does_not_wait_for_busy_workers() {
        let temp_dir = TempDir::new().unwrap();
        let (broker, mut receivers) = TaskBroker::new(open_queue(&temp_dir), 1);

        // nobody drains the worker channel while these go in
        for i in 0..500 {
            tokio::time::timeout(
                std::time::Duration::from_secs(2),
                broker.enqueue(create_test_task(&format!("job{i}"))),
            )
            .await
            .expect("enqueue blocked on worker capacity")
            .unwrap();
        }

        let first = receivers[0].recv().await.unwrap();
        assert_eq!(first.task.job_id, "job0");
    }

    #[tokio::test]
    async fn test_recover_large_backlog_without_consumer() {
        let temp_dir = TempDir::new().unwrap();
        let queue = open_queue(&temp_dir);
        for i in 0..300 {
            queue.read().await.enqueue(&create_test_task(&format!("job{i}"))).unwrap();
        }

        let (broker, _receivers) = TaskBroker::new(queue, 2);
        let recovered = tokio::time::timeout(std::time::Duration::from_secs(2), broker.recover())
            .await
            .expect("recover blocked on worker capacity")
            .unwrap();
        assert_eq!(recovered, 300);
    }
}
