use std::sync::Arc;

use crate::bridge::ProgressPublisher;
use crate::config::Config;
use crate::dispatch::JobDispatcher;
use crate::observability::Metrics;
use crate::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<JobDispatcher>,
    pub connections: Arc<ConnectionRegistry>,
    pub publisher: Arc<dyn ProgressPublisher>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        dispatcher: Arc<JobDispatcher>,
        connections: Arc<ConnectionRegistry>,
        publisher: Arc<dyn ProgressPublisher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            connections,
            publisher,
            metrics,
        }
    }
}
