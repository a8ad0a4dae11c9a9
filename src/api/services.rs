use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{FromRequest, Multipart, Request, State},
    http::StatusCode,
    response::IntoResponse,
};

use super::{
    models::{HealthResponse, JobAcceptedResponse},
    state::AppState,
    utils,
};
use crate::api::error::ApiError;
use crate::dispatch::InputArtifact;

/// Parsed `POST /jobs` form
#[derive(Debug, Default)]
struct JobForm {
    client_id: Option<String>,
    params: String,
    inputs: Vec<InputArtifact>,
}

/// Job submission endpoint (POST /jobs)
///
/// Multipart fields:
/// - `client_id` (required): owner of the job's progress events
/// - `params` (alias `text`): free-form processing parameters
/// - `files` / `file` (zero or more): input artifacts
///
/// Returns 202 with the job id as soon as the job is queued; progress is
/// pushed over the client's WebSocket.
pub async fn submit_job(
    State(state): State<AppState>,
    request: Request,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = request
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    utils::parse_multipart_content_type(content_type)?;

    let multipart = Multipart::from_request(request, &state)
        .await
        .map_err(|e| ApiError::InvalidPayload(e.body_text()))?;
    let form = read_form(multipart, state.config.server.max_upload_bytes).await?;

    let client_id = form
        .client_id
        .ok_or_else(|| ApiError::InvalidPayload("client_id field is required".into()))?;

    let job_id = state
        .dispatcher
        .submit(&client_id, form.inputs, form.params)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(JobAcceptedResponse { job_id })))
}

async fn read_form(mut multipart: Multipart, max_bytes: usize) -> Result<JobForm, ApiError> {
    let mut form = JobForm::default();
    let mut total = 0usize;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "client_id" => form.client_id = Some(field.text().await?),
            "params" | "text" => form.params = field.text().await?,
            "files" | "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await?;
                total += data.len();
                utils::validate_body_size(total, max_bytes)?;
                form.inputs.push(InputArtifact::new(filename, data));
            }
            other => {
                tracing::debug!(field = other, "Ignoring unknown form field");
            }
        }
    }

    Ok(form)
}

/// Health check endpoint (GET /health)
///
/// Reports the execution substrate and progress bridge, the number of live
/// WebSocket connections and the metrics snapshot. Returns 503 when a
/// component is unhealthy.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = BTreeMap::new();

    let substrate = state.dispatcher.substrate();
    let substrate_ok = substrate.health().await;
    let bridge_ok = state.publisher.health().await;

    components.insert("api".to_string(), "healthy".to_string());
    components.insert(format!("queue_{}", substrate.name()), status_label(substrate_ok));
    components.insert("bridge".to_string(), status_label(bridge_ok));

    let all_healthy = substrate_ok && bridge_ok;
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: status_label(all_healthy),
        components,
        connections: state.connections.connection_count().await,
        metrics: state.metrics.snapshot(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}

fn status_label(healthy: bool) -> String {
    if healthy { "healthy" } else { "unhealthy" }.to_string()
}
