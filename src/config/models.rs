use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Serving process configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Submitted inputs are staged here, one directory per job
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    /// Unpacked result bundles, one directory per job
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default = "default_results_url_prefix")]
    pub results_url_prefix: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            staging_dir: default_staging_dir(),
            results_dir: default_results_dir(),
            results_url_prefix: default_results_url_prefix(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("data/staging")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("data/results")
}

fn default_results_url_prefix() -> String {
    "/results".to_string()
}

fn default_max_upload_bytes() -> usize {
    100 * 1024 * 1024 // 100 MB
}

/// Execution substrate selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// Fjall-persisted queue feeding an in-process worker pool
    #[default]
    Local,
    /// Redis list consumed by separate `worker` processes
    Redis,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackend,
    #[serde(default = "default_fjall_path")]
    pub fjall_path: PathBuf,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_redis_key")]
    pub redis_key: String,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            fjall_path: default_fjall_path(),
            redis_url: default_redis_url(),
            redis_key: default_redis_key(),
            num_workers: default_num_workers(),
        }
    }
}

fn default_fjall_path() -> PathBuf {
    PathBuf::from("data/queue")
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_redis_key() -> String {
    "jobrelay:jobs".to_string()
}

fn default_num_workers() -> usize {
    4
}

/// Progress bridge selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub backend: BridgeBackend,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Buffer of the in-memory backend
    #[serde(default = "default_bridge_capacity")]
    pub capacity: usize,
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            backend: BridgeBackend::default(),
            redis_url: default_redis_url(),
            channel: default_channel(),
            capacity: default_bridge_capacity(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

fn default_channel() -> String {
    "progress_updates".to_string()
}

fn default_bridge_capacity() -> usize {
    1024
}

fn default_reconnect_initial_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerSettings {
    #[serde(default = "default_max_inflight_jobs")]
    pub max_inflight_jobs: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_inflight_jobs: default_max_inflight_jobs(),
        }
    }
}

fn default_max_inflight_jobs() -> usize {
    4
}

/// External command implementing the processing step
///
/// Output is written to `{staging_dir}/output/{output_name}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorConfig {
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_output_name")]
    pub output_name: String,
    #[serde(default = "default_processor_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            output_name: default_output_name(),
            timeout_secs: default_processor_timeout_secs(),
        }
    }
}

fn default_output_name() -> String {
    "model_output.txt".to_string()
}

fn default_processor_timeout_secs() -> u64 {
    3600
}

/// Peer transport selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    #[default]
    Api,
    Ftps,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransferConfig {
    #[serde(default)]
    pub mode: TransferMode,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub ftps: FtpsSettings,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            mode: TransferMode::default(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            api: ApiSettings::default(),
            ftps: FtpsSettings::default(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_max_attempts() -> u32 {
    120
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiSettings {
    /// e.g. `http://peer:8001/api/v1`
    pub base_url: Option<String>,
    /// Bearer credential (loaded from environment, not from config file)
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_download_retries")]
    pub max_retries: u32,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_download_retries(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_download_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FtpsSettings {
    pub host: Option<String>,
    #[serde(default = "default_ftps_port")]
    pub port: u16,
    pub username: Option<String>,
    /// Loaded from environment, not from config file
    #[serde(skip)]
    pub password: Option<String>,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
}

impl Default for FtpsSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: default_ftps_port(),
            username: None,
            password: None,
            upload_dir: default_upload_dir(),
            download_dir: default_download_dir(),
        }
    }
}

fn default_ftps_port() -> u16 {
    21
}

fn default_upload_dir() -> String {
    "/uploads".to_string()
}

fn default_download_dir() -> String {
    "/results".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.queue.backend, QueueBackend::Local);
        assert_eq!(config.bridge.backend, BridgeBackend::Memory);
        assert_eq!(config.bridge.channel, "progress_updates");
        assert_eq!(config.transfer.mode, TransferMode::Api);
        assert_eq!(config.transfer.ftps.port, 21);
        assert!(config.transfer.api.api_key.is_none());
    }
}
