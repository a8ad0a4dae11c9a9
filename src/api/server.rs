use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::services::ServeDir;
use tracing::info;

use super::{
    services::{health, submit_job},
    state::AppState,
    ws::ws_handler,
};
use crate::bridge::{self, BridgeListener};
use crate::config::{Config, QueueBackend};
use crate::dispatch::{ExecutionSubstrate, JobDispatcher};
use crate::observability::Metrics;
use crate::queue::{FjallQueue, RedisQueue, TaskBroker};
use crate::registry::ConnectionRegistry;
use crate::worker;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Routes of the serving process
pub fn router(state: AppState) -> Router {
    let server = &state.config.server;
    let results_prefix = server.results_url_prefix.trim_end_matches('/').to_string();
    let results = ServeDir::new(&server.results_dir);
    let body_limit = server.max_upload_bytes;

    Router::new()
        .route("/jobs", post(submit_job))
        .route("/ws/{client_id}", get(ws_handler))
        .route("/health", get(health))
        .nest_service(&results_prefix, results)
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestDecompressionLayer::new())
}

/// Entry point of the `server` role
///
/// With the local queue this process also hosts the worker pool; with the
/// Redis queue jobs are executed by separate `worker` processes.
pub async fn run(config: Config, address: Option<SocketAddr>) -> Result<(), AnyError> {
    let cancel = crate::shutdown::root_token();
    let config = Arc::new(config);
    let metrics = Arc::new(Metrics::new());
    let connections = Arc::new(ConnectionRegistry::new());

    tokio::fs::create_dir_all(&config.server.staging_dir).await?;
    tokio::fs::create_dir_all(&config.server.results_dir).await?;

    info!(backend = ?config.bridge.backend, "Connecting progress bridge");
    let bridge = bridge::connect(&config.bridge).await?;

    let mut background = Vec::new();

    let substrate: Arc<dyn ExecutionSubstrate> = match config.queue.backend {
        QueueBackend::Local => {
            info!(path = %config.queue.fjall_path.display(), "Opening FjallQueue");
            let queue = Arc::new(RwLock::new(FjallQueue::open(&config.queue.fjall_path)?));
            let (broker, receivers) = TaskBroker::new(queue, config.queue.num_workers);
            let broker = Arc::new(broker);

            let executor = Arc::new(worker::build_executor(
                &config,
                bridge.publisher.clone(),
                metrics.clone(),
            )?);
            background.extend(worker::spawn_local_pool(
                executor,
                broker.clone(),
                receivers,
                cancel.clone(),
            ));

            let recovered = broker.recover().await?;
            if recovered > 0 {
                info!(recovered, "Re-dispatched interrupted jobs");
            }
            broker
        }
        QueueBackend::Redis => {
            info!(key = %config.queue.redis_key, "Connecting Redis job queue");
            Arc::new(RedisQueue::connect(&config.queue.redis_url, config.queue.redis_key.clone()).await?)
        }
    };

    let dispatcher = Arc::new(JobDispatcher::new(
        substrate,
        bridge.publisher.clone(),
        &config.server.staging_dir,
        metrics.clone(),
    ));

    let listener_task = BridgeListener::new(
        bridge.subscriber.clone(),
        connections.clone(),
        metrics.clone(),
        config.reconnect_policy(),
    );
    background.push(tokio::spawn(listener_task.run(cancel.clone())));

    let address = address.unwrap_or(config.server.bind_addr);
    let state = AppState::new(
        config.clone(),
        dispatcher,
        connections.clone(),
        bridge.publisher,
        metrics,
    );
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "jobrelay API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await?;

    cancel.cancel();
    connections.clear().await;
    for handle in background {
        let _ = handle.await;
    }

    info!("Server stopped");
    Ok(())
}
