//! ApiTransport against an embedded axum server standing in for the peer.

use std::io::{Cursor, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;

use jobrelay::config::TransferMode;
use jobrelay::transfer::{
    ApiTransport, ApiTransportConfig, PollPolicy, RemoteRef, RemoteStatus, TransferError,
    TransferTask, Transport, await_completion,
};

const API_KEY: &str = "peer-secret";

#[derive(Default)]
struct PeerState {
    uploads: Vec<(String, String, Vec<u8>)>,
    status_calls: u32,
    pending_rounds: u32,
    download_failures: u32,
}

type Shared = Arc<Mutex<PeerState>>;

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {API_KEY}"))
}

async fn upload(State(peer): State<Shared>, headers: HeaderMap, mut form: Multipart) -> Response {
    // drain the body first so the client always sees the response
    let mut task_id = String::new();
    let mut file = (String::new(), Vec::new());
    while let Some(field) = form.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "task_id" => task_id = field.text().await.unwrap(),
            "file" => {
                let name = field.file_name().unwrap_or_default().to_string();
                file = (name, field.bytes().await.unwrap().to_vec());
            }
            _ => {}
        }
    }

    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "bad token").into_response();
    }

    let remote_id = format!("peer-{task_id}");
    peer.lock()
        .unwrap()
        .uploads
        .push((task_id, file.0, file.1));
    Json(json!({ "task_id": remote_id, "status": "received" })).into_response()
}

async fn status(
    State(peer): State<Shared>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let mut peer = peer.lock().unwrap();
    peer.status_calls += 1;
    if peer.status_calls <= peer.pending_rounds {
        return Json(json!({ "status": "processing" })).into_response();
    }

    if task_id.contains("broken") {
        return Json(json!({ "status": "failed", "message": "layout rejected" })).into_response();
    }

    Json(json!({
        "status": "completed",
        "manifest": {
            "batch_id": task_id,
            "created_at": "2026-01-01T00:00:00Z",
            "files": [{ "filename": "report.txt", "type": "txt", "description": "Report" }],
            "total_count": 1
        }
    }))
    .into_response()
}

async fn download(
    State(peer): State<Shared>,
    headers: HeaderMap,
    Path(_task_id): Path<String>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    {
        let mut peer = peer.lock().unwrap();
        if peer.download_failures > 0 {
            peer.download_failures -= 1;
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    }

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("report.txt", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"0 violations").unwrap();
    let archive = writer.finish().unwrap().into_inner();

    ([("content-type", "application/zip")], archive).into_response()
}

async fn start_peer(state: PeerState) -> (SocketAddr, Shared) {
    let shared: Shared = Arc::new(Mutex::new(state));
    let app = Router::new()
        .route("/api/v1/upload", post(upload))
        .route("/api/v1/status/{task_id}", get(status))
        .route("/api/v1/download/{task_id}", get(download))
        .with_state(shared.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, shared)
}

fn transport(addr: SocketAddr, api_key: &str) -> ApiTransport {
    let mut config = ApiTransportConfig::new(format!("http://{addr}/api/v1/"), api_key);
    config.request_timeout = Duration::from_secs(5);
    config.max_retries = 3;
    ApiTransport::new(config).unwrap()
}

fn output_file(dir: &TempDir) -> TransferTask {
    let source = dir.path().join("model_output.txt");
    std::fs::write(&source, b"polygons").unwrap();
    TransferTask {
        source,
        job_id: "job-7".to_string(),
        mode: TransferMode::Api,
    }
}

#[tokio::test]
async fn test_upload_poll_fetch_round_trip() {
    let (addr, peer) = start_peer(PeerState {
        pending_rounds: 2,
        ..Default::default()
    })
    .await;
    let dir = TempDir::new().unwrap();
    let transport = transport(addr, API_KEY);

    let remote = transport.upload(&output_file(&dir)).await.unwrap();
    assert_eq!(remote.task_id, "peer-job-7");
    {
        let peer = peer.lock().unwrap();
        assert_eq!(peer.uploads.len(), 1);
        assert_eq!(peer.uploads[0].0, "job-7");
        assert_eq!(peer.uploads[0].1, "model_output.txt");
        assert_eq!(peer.uploads[0].2, b"polygons");
    }

    let manifest = await_completion(
        &transport,
        &remote,
        PollPolicy::new(Duration::from_millis(10), 5),
        &CancellationToken::new(),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(manifest.task_id.as_deref(), Some("peer-job-7"));
    assert_eq!(manifest.files[0].description, "Report");
    assert_eq!(peer.lock().unwrap().status_calls, 3);

    let bundle = transport.fetch(&remote).await.unwrap();
    assert!(!bundle.archive.is_empty());
}

#[tokio::test]
async fn test_remote_failure_reported() {
    let (addr, _peer) = start_peer(PeerState::default()).await;
    let transport = transport(addr, API_KEY);

    let status = transport
        .poll_status(&RemoteRef::new("peer-broken"))
        .await
        .unwrap();
    assert_eq!(status, RemoteStatus::Failed("layout rejected".to_string()));
}

#[tokio::test]
async fn test_bad_credential_rejected() {
    let (addr, peer) = start_peer(PeerState::default()).await;
    let dir = TempDir::new().unwrap();
    let transport = transport(addr, "wrong");

    match transport.upload(&output_file(&dir)).await {
        Err(TransferError::Rejected { status, .. }) => assert_eq!(status, 401),
        other => panic!("unexpected result {other:?}"),
    }
    assert!(peer.lock().unwrap().uploads.is_empty());
}

#[tokio::test]
async fn test_download_retried_after_failure() {
    let (addr, _peer) = start_peer(PeerState {
        download_failures: 1,
        ..Default::default()
    })
    .await;
    let transport = transport(addr, API_KEY);

    let bundle = transport.fetch(&RemoteRef::new("peer-job-7")).await.unwrap();
    assert_eq!(bundle.job_id, "peer-job-7");
    assert!(!bundle.archive.is_empty());
}
