//! Progress bridge between worker and serving processes
//!
//! Workers publish [`ProgressEvent`]s; the serving process subscribes to the
//! shared channel and forwards each event to the connection registry.
//! Delivery is at-most-once: a message published while nobody listens is
//! lost. Progress is advisory, not authoritative job state.
//!
//! Two backends:
//! - [`MemoryBridge`] - tokio broadcast channel, single process only
//! - [`RedisPublisher`] / [`RedisSubscriber`] - Redis pub/sub, cross-process

mod listener;
mod memory;
mod pubsub;

pub use listener::{BridgeListener, ReconnectPolicy, handle_message};
pub use memory::MemoryBridge;
pub use pubsub::{RedisPublisher, RedisSubscriber};

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::config::{BridgeBackend, BridgeConfig};
use crate::events::{Envelope, ProgressEvent};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Envelope encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Subscriber lagged, {0} messages skipped")]
    Lagged(u64),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Raw messages as received from the channel
pub type MessageStream = BoxStream<'static, Result<String>>;

/// Publishing side, one handle shared by every executor in a process
#[async_trait]
pub trait ProgressPublisher: Send + Sync {
    /// Publish an already-encoded envelope
    async fn publish_raw(&self, payload: String) -> Result<()>;

    async fn health(&self) -> bool;

    async fn publish(&self, event: &ProgressEvent) -> Result<()> {
        let payload = Envelope::wrap(event.clone()).encode()?;
        self.publish_raw(payload).await
    }
}

/// Subscribing side, owned by the serving process
///
/// Dropping the returned stream releases the subscription.
#[async_trait]
pub trait ProgressSubscriber: Send + Sync {
    async fn subscribe(&self) -> Result<MessageStream>;
}

/// Both halves of a configured bridge
#[derive(Clone)]
pub struct BridgeHandles {
    pub publisher: Arc<dyn ProgressPublisher>,
    pub subscriber: Arc<dyn ProgressSubscriber>,
}

/// Open the bridge backend selected in configuration
pub async fn connect(config: &BridgeConfig) -> Result<BridgeHandles> {
    match config.backend {
        BridgeBackend::Memory => {
            let bridge = Arc::new(MemoryBridge::new(config.capacity));
            Ok(BridgeHandles {
                publisher: bridge.clone(),
                subscriber: bridge,
            })
        }
        BridgeBackend::Redis => {
            let publisher = RedisPublisher::connect(&config.redis_url, &config.channel).await?;
            let subscriber = RedisSubscriber::new(&config.redis_url, &config.channel)?;
            Ok(BridgeHandles {
                publisher: Arc::new(publisher),
                subscriber: Arc::new(subscriber),
            })
        }
    }
}
