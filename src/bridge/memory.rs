use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use super::{BridgeError, MessageStream, ProgressPublisher, ProgressSubscriber, Result};

/// In-process bridge for single-process deployments and tests
#[derive(Debug, Clone)]
pub struct MemoryBridge {
    sender: broadcast::Sender<String>,
}

impl MemoryBridge {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MemoryBridge {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl ProgressPublisher for MemoryBridge {
    async fn publish_raw(&self, payload: String) -> Result<()> {
        if self.sender.send(payload).is_err() {
            tracing::debug!("No bridge subscriber, message dropped");
        }
        Ok(())
    }

    async fn health(&self) -> bool {
        true
    }
}

#[async_trait]
impl ProgressSubscriber for MemoryBridge {
    async fn subscribe(&self) -> Result<MessageStream> {
        let stream = BroadcastStream::new(self.sender.subscribe()).map(|item| {
            item.map_err(|BroadcastStreamRecvError::Lagged(skipped)| BridgeError::Lagged(skipped))
        });
        Ok(stream.boxed())
    }
}
