use crate::proto::JobTask;
use prost::Message;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum RedisQueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Protobuf decode error: {0}")]
    ProtobufDecode(#[from] prost::DecodeError),
}

pub type Result<T> = std::result::Result<T, RedisQueueError>;

/// Job list shared with separate worker processes
///
/// Producers `LPUSH` prost-encoded [`JobTask`]s; each worker pops with
/// `BRPOP`, so every task is taken by exactly one worker. A task popped by a
/// worker that dies mid-job is lost.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
    key: String,
}

impl RedisQueue {
    pub async fn connect(url: &str, key: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            key: key.into(),
        })
    }

    pub async fn push(&self, task: &JobTask) -> Result<()> {
        let mut conn = self.conn.clone();
        let len: i64 = conn.lpush(&self.key, task.encode_to_vec()).await?;
        debug!(job_id = %task.job_id, queue_len = len, "Task pushed to Redis queue");
        Ok(())
    }

    pub async fn len(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(&self.key).await?)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}

/// Blocking consumer side, one per worker process
///
/// Holds its own connection so `BRPOP` never stalls the shared one.
pub struct RedisConsumer {
    conn: MultiplexedConnection,
    key: String,
    wait: Duration,
}

impl RedisConsumer {
    pub async fn connect(url: &str, key: impl Into<String>, wait: Duration) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            key: key.into(),
            wait,
        })
    }

    /// Wait up to the configured time for the next task
    pub async fn pop(&mut self) -> Result<Option<JobTask>> {
        let popped: Option<(String, Vec<u8>)> =
            self.conn.brpop(&self.key, self.wait.as_secs_f64()).await?;

        match popped {
            Some((_, bytes)) => Ok(Some(JobTask::decode(bytes.as_slice())?)),
            None => Ok(None),
        }
    }
}
