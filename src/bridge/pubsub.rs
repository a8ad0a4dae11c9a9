use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use super::{BridgeError, MessageStream, ProgressPublisher, ProgressSubscriber, Result};

/// Redis pub/sub publisher
///
/// Backed by a `ConnectionManager`, which reconnects on its own when the
/// underlying connection drops.
#[derive(Clone)]
pub struct RedisPublisher {
    conn: ConnectionManager,
    channel: String,
}

impl RedisPublisher {
    pub async fn connect(url: &str, channel: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(channel, "Redis bridge publisher connected");

        Ok(Self {
            conn,
            channel: channel.to_string(),
        })
    }
}

#[async_trait]
impl ProgressPublisher for RedisPublisher {
    async fn publish_raw(&self, payload: String) -> Result<()> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(&self.channel, payload).await?;
        if receivers == 0 {
            debug!(channel = %self.channel, "No bridge subscriber, message dropped");
        }
        Ok(())
    }

    async fn health(&self) -> bool {
        let mut conn = self.conn.clone();
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        pong.is_ok()
    }
}

/// Redis pub/sub subscriber
///
/// Each call to `subscribe` opens a dedicated pub/sub connection; it is
/// closed when the returned stream is dropped.
#[derive(Clone)]
pub struct RedisSubscriber {
    client: redis::Client,
    channel: String,
}

impl RedisSubscriber {
    pub fn new(url: &str, channel: &str) -> Result<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
            channel: channel.to_string(),
        })
    }
}

#[async_trait]
impl ProgressSubscriber for RedisSubscriber {
    async fn subscribe(&self) -> Result<MessageStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;
        info!(channel = %self.channel, "Subscribed to Redis bridge channel");

        let stream = pubsub
            .into_on_message()
            .map(|msg| msg.get_payload::<String>().map_err(BridgeError::from));

        Ok(stream.boxed())
    }
}
