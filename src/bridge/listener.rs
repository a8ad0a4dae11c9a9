use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ProgressSubscriber;
use crate::events::Envelope;
use crate::observability::Metrics;
use crate::registry::ConnectionRegistry;

/// Capped exponential backoff between resubscribe attempts
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
        }
    }

    fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

/// Serving-side consumer of the bridge channel
///
/// Runs until cancelled. The subscription stream is owned by the loop body,
/// so it is dropped (and the subscription released) on every exit path.
pub struct BridgeListener {
    subscriber: Arc<dyn ProgressSubscriber>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<Metrics>,
    policy: ReconnectPolicy,
}

impl BridgeListener {
    pub fn new(
        subscriber: Arc<dyn ProgressSubscriber>,
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<Metrics>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            subscriber,
            registry,
            metrics,
            policy,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut delay = self.policy.initial_delay;
        info!("Bridge listener started");

        loop {
            let subscribed = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.subscriber.subscribe() => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    delay = self.policy.initial_delay;

                    loop {
                        let next = tokio::select! {
                            _ = cancel.cancelled() => None,
                            item = stream.next() => Some(item),
                        };

                        match next {
                            None => {
                                info!("Bridge listener stopped");
                                return;
                            }
                            Some(None) => {
                                warn!("Bridge subscription ended, resubscribing");
                                break;
                            }
                            Some(Some(Ok(raw))) => {
                                handle_message(&raw, &self.registry, &self.metrics).await;
                            }
                            Some(Some(Err(e))) => {
                                warn!(error = %e, "Bridge receive error, message skipped");
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "Bridge subscribe failed");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = self.policy.next(delay);
        }

        info!("Bridge listener stopped");
    }
}

/// Decode one raw bridge message and route it to its client.
///
/// Returns whether the event reached a live connection. Malformed messages
/// are logged and skipped.
pub async fn handle_message(raw: &str, registry: &ConnectionRegistry, metrics: &Metrics) -> bool {
    let envelope = match Envelope::decode(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Malformed bridge message skipped");
            metrics.event_dropped();
            return false;
        }
    };

    let delivered = registry.route(&envelope.client_id, &envelope.payload).await;
    if delivered {
        metrics.event_routed();
    } else {
        debug!(
            client_id = %envelope.client_id,
            job_id = %envelope.payload.job_id,
            "Event not delivered"
        );
        metrics.event_dropped();
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{MemoryBridge, ProgressPublisher};
    use crate::events::ProgressEvent;
    use crate::executor::JobState;

    #[test]
    fn test_backoff_is_capped() {
        let policy = ReconnectPolicy::new(Duration::from_millis(100), Duration::from_millis(350));
        let second = policy.next(policy.initial_delay);
        assert_eq!(second, Duration::from_millis(200));
        assert_eq!(policy.next(second), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_handle_message_routes_by_client() {
        let registry = ConnectionRegistry::new();
        let metrics = Metrics::new();
        let (_id, mut rx) = registry.connect("c1").await;

        let event = ProgressEvent::new("job-1", "c1", JobState::Processing, "step");
        let raw = Envelope::wrap(event).encode().unwrap();

        assert!(handle_message(&raw, &registry, &metrics).await);
        assert_eq!(rx.recv().await.unwrap().message, "step");
        assert!(!handle_message("{broken", &registry, &metrics).await);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_routed, 1);
        assert_eq!(snapshot.events_dropped, 1);
    }

    #[tokio::test]
    async fn test_listener_skips_bad_messages_and_stops_on_cancel() {
        let bridge = Arc::new(MemoryBridge::new(16));
        let registry = Arc::new(ConnectionRegistry::new());
        let (_id, mut rx) = registry.connect("c1").await;
        let cancel = CancellationToken::new();

        let listener = BridgeListener::new(
            bridge.clone(),
            registry.clone(),
            Arc::new(Metrics::new()),
            ReconnectPolicy::default(),
        );
        let handle = tokio::spawn(listener.run(cancel.clone()));

        while bridge.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }

        bridge.publish_raw("garbage".to_string()).await.unwrap();
        let event = ProgressEvent::new("job-1", "c1", JobState::Processing, "after garbage");
        bridge.publish(&event).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.message, "after garbage");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bridge.subscriber_count(), 0);
    }
}
