use crate::proto::JobTask;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use prost::Message;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Protobuf decode error: {0}")]
    ProtobufDecode(#[from] prost::DecodeError),

    #[error("Invalid sequence key")]
    InvalidSequence,
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// FjallQueue persists pending jobs in the Fjall embedded database
///
/// Layout:
/// - `tasks` partition: u64 (big-endian) → JobTask (protobuf)
/// - `metadata` partition: "next_seq" → u64
///
/// A task stays in `tasks` from enqueue until its job reaches a terminal
/// state, so whatever is still present at startup was interrupted.
pub struct FjallQueue {
    keyspace: Keyspace,
    tasks: PartitionHandle,
    metadata: PartitionHandle,
    seq_counter: Arc<AtomicU64>,
}

impl FjallQueue {
    /// Open or create a FjallQueue at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening FjallQueue at: {}", path.as_ref().display());

        let keyspace = Config::new(path).open()?;

        let tasks = keyspace.open_partition("tasks", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        let current_seq = match metadata.get(b"next_seq")? {
            Some(bytes) => decode_seq(&bytes)?,
            None => 0,
        };

        info!("FjallQueue opened, current sequence: {}", current_seq);

        Ok(Self {
            keyspace,
            tasks,
            metadata,
            seq_counter: Arc::new(AtomicU64::new(current_seq)),
        })
    }

    /// Persist a task and return its sequence number
    pub fn enqueue(&self, task: &JobTask) -> Result<u64> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);

        self.tasks.insert(seq.to_be_bytes(), task.encode_to_vec())?;
        self.metadata.insert(b"next_seq", (seq + 1).to_be_bytes())?;

        debug!(seq, job_id = %task.job_id, "Task enqueued");

        Ok(seq)
    }

    /// Retrieve a task by sequence number
    pub fn get_task(&self, seq: u64) -> Result<Option<JobTask>> {
        match self.tasks.get(seq.to_be_bytes())? {
            Some(bytes) => Ok(Some(JobTask::decode(&*bytes)?)),
            None => Ok(None),
        }
    }

    /// Drop a task once its job is finished
    pub fn ack(&self, seq: u64) -> Result<()> {
        self.tasks.remove(seq.to_be_bytes())?;
        debug!(seq, "Task acknowledged");
        Ok(())
    }

    /// All persisted tasks in sequence order
    pub fn pending(&self) -> Result<Vec<(u64, JobTask)>> {
        let mut results = Vec::new();

        for item in self.tasks.iter() {
            let (key, value) = item?;
            let seq = decode_seq(&key)?;
            results.push((seq, JobTask::decode(&*value)?));
        }

        Ok(results)
    }

    /// Get current sequence counter value
    pub fn current_seq(&self) -> u64 {
        self.seq_counter.load(Ordering::SeqCst)
    }

    /// Flush all writes to disk
    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Health check - verify database is accessible
    pub fn health_check(&self) -> Result<()> {
        let _ = self.metadata.get(b"next_seq")?;
        Ok(())
    }
}

fn decode_seq(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| QueueError::InvalidSequence)?;
    Ok(u64::from_be_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_task(job_id: &str) -> JobTask {
        JobTask {
            job_id: job_id.to_string(),
            client_id: "client-a".to_string(),
            inputs: vec![format!("/staging/{job_id}/in.txt")],
            params: "rule".to_string(),
            submitted_at_ms: 1,
            staging_dir: format!("/staging/{job_id}"),
        }
    }

    #[test]
    fn test_enqueue_and_retrieve() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path()).unwrap();

        let seq = queue.enqueue(&create_test_task("job1")).unwrap();
        assert_eq!(seq, 0);

        let retrieved = queue.get_task(seq).unwrap().unwrap();
        assert_eq!(retrieved.job_id, "job1");
        assert_eq!(retrieved.client_id, "client-a");
    }

    #[test]
    fn test_ack_removes_task() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path()).unwrap();

        let first = queue.enqueue(&create_test_task("job1")).unwrap();
        let second = queue.enqueue(&create_test_task("job2")).unwrap();
        queue.ack(first).unwrap();

        assert!(queue.get_task(first).unwrap().is_none());
        let pending = queue.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, second);
    }

    #[test]
    fn test_persistence_across_reopens() {
        let temp_dir = TempDir::new().unwrap();

        {
            let queue = FjallQueue::open(temp_dir.path()).unwrap();
            let done = queue.enqueue(&create_test_task("job1")).unwrap();
            queue.enqueue(&create_test_task("job2")).unwrap();
            queue.ack(done).unwrap();
            queue.flush().unwrap();
        }

        let queue = FjallQueue::open(temp_dir.path()).unwrap();
        assert_eq!(queue.current_seq(), 2);

        let pending = queue.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].1.job_id, "job2");

        let seq = queue.enqueue(&create_test_task("job3")).unwrap();
        assert_eq!(seq, 2);
    }
}
