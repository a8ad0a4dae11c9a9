//! Explicit-TLS FTP transport
//!
//! Session setup: connect, AUTH TLS, login, PBSZ 0 / PROT P, passive mode,
//! binary type. Some peer servers refuse a protected data connection whose
//! TLS session was not resumed from the control connection, so every data
//! connection is opened with the same rustls client config; its session
//! cache resumes the control channel's session.
//!
//! suppaftp's blocking client is used from `spawn_blocking`.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use suppaftp::types::FileType;
use suppaftp::{Mode, RustlsConnector, RustlsFtpStream};
use tracing::{debug, info};

use super::{RemoteRef, RemoteStatus, Result, TransferError, TransferTask, Transport};
use crate::config::{FtpsSettings, TransferMode};
use crate::unpack::{BundleManifest, ResultBundle};

/// FTPS transport configuration
#[derive(Debug, Clone)]
pub struct FtpsTransportConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub upload_dir: String,
    pub download_dir: String,
}

impl FtpsTransportConfig {
    pub fn from_config(settings: &FtpsSettings) -> Result<Self> {
        let host = settings
            .host
            .clone()
            .ok_or_else(|| TransferError::Config("transfer.ftps.host is not set".into()))?;
        let username = settings
            .username
            .clone()
            .ok_or_else(|| TransferError::Config("transfer.ftps.username is not set".into()))?;
        let password = settings
            .password
            .clone()
            .ok_or_else(|| TransferError::Config("PEER_FTPS_PASSWORD is not set".into()))?;

        Ok(Self {
            host,
            port: settings.port,
            username,
            password,
            upload_dir: settings.upload_dir.clone(),
            download_dir: settings.download_dir.clone(),
        })
    }
}

/// FTPS client for the peer system
#[derive(Clone)]
pub struct FtpsTransport {
    config: Arc<FtpsTransportConfig>,
    tls: Arc<rustls::ClientConfig>,
}

impl FtpsTransport {
    pub fn new(config: FtpsTransportConfig) -> Result<Self> {
        let roots = rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        let tls = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| TransferError::Config(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
            tls: Arc::new(tls),
        })
    }

    /// Open an authenticated session positioned in `dir`
    fn open_session(&self, dir: &str) -> Result<RustlsFtpStream> {
        let config = &self.config;
        let stream = RustlsFtpStream::connect((config.host.as_str(), config.port))?;
        let mut stream =
            stream.into_secure(RustlsConnector::from(self.tls.clone()), &config.host)?;

        stream.login(&config.username, &config.password)?;
        stream.set_mode(Mode::Passive);
        stream.transfer_type(FileType::Binary)?;
        stream.cwd(dir)?;

        debug!(host = %config.host, dir, "FTPS session opened");
        Ok(stream)
    }

    /// Run blocking FTP work off the async runtime
    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(FtpsTransport) -> Result<T> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || work(this))
            .await
            .map_err(|e| TransferError::Io(std::io::Error::other(e)))?
    }
}

fn listed(names: &[String], wanted: &str) -> bool {
    names
        .iter()
        .any(|name| name.rsplit('/').next() == Some(wanted))
}

#[async_trait]
impl Transport for FtpsTransport {
    fn mode(&self) -> TransferMode {
        TransferMode::Ftps
    }

    async fn upload(&self, task: &TransferTask) -> Result<RemoteRef> {
        let source = task.source.clone();
        let remote_name = format!("{}_{}", task.job_id, task.file_name());
        let job_id = task.job_id.clone();

        self.blocking(move |this| {
            let mut file = std::fs::File::open(&source)
                .map_err(|e| TransferError::Upload(format!("{}: {}", source.display(), e)))?;

            let mut stream = this.open_session(&this.config.upload_dir)?;
            let size = stream
                .put_file(&remote_name, &mut file)
                .map_err(|e| TransferError::Upload(e.to_string()))?;
            stream.quit()?;

            info!(job_id = %job_id, remote_name = %remote_name, size, "Artifact uploaded over FTPS");
            Ok(RemoteRef::new(job_id))
        })
        .await
    }

    /// The result archive appearing in the download directory means done
    async fn poll_status(&self, remote: &RemoteRef) -> Result<RemoteStatus> {
        let archive = remote.archive_name();

        self.blocking(move |this| {
            let mut stream = this.open_session(&this.config.download_dir)?;
            let names = stream
                .nlst(None)
                .map_err(|e| TransferError::Status(e.to_string()))?;
            stream.quit()?;

            if listed(&names, &archive) {
                Ok(RemoteStatus::Done { manifest: None })
            } else {
                Ok(RemoteStatus::Pending)
            }
        })
        .await
    }

    async fn fetch(&self, remote: &RemoteRef) -> Result<ResultBundle> {
        let remote = remote.clone();

        self.blocking(move |this| {
            let mut stream = this.open_session(&this.config.download_dir)?;
            let names = stream.nlst(None)?;

            let archive: Cursor<Vec<u8>> = stream
                .retr_as_buffer(&remote.archive_name())
                .map_err(|e| TransferError::Download(e.to_string()))?;

            let manifest_name = remote.manifest_name();
            let manifest = if listed(&names, &manifest_name) {
                let raw = stream
                    .retr_as_buffer(&manifest_name)
                    .map_err(|e| TransferError::Download(e.to_string()))?;
                Some(
                    BundleManifest::from_slice(raw.get_ref())
                        .map_err(|e| TransferError::InvalidResponse(e.to_string()))?,
                )
            } else {
                None
            };
            stream.quit()?;

            let archive = Bytes::from(archive.into_inner());
            info!(task_id = %remote.task_id, size = archive.len(), "Result bundle fetched over FTPS");

            Ok(ResultBundle {
                job_id: remote.task_id.clone(),
                archive,
                manifest,
            })
        })
        .await
    }
}
