//! API models for job submission and health endpoints.
//!
//! - `POST /jobs` (multipart) answers with [`JobAcceptedResponse`]
//! - `GET /health` answers with [`HealthResponse`]
//! - errors carry an [`ErrorResponse`] body
//!
//! Progress itself is not polled: it is pushed over `GET /ws/{client_id}`
//! as [`crate::events::ProgressEvent`] JSON frames.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::observability::MetricsSnapshot;

#[derive(Debug, Serialize, Deserialize)]
pub struct JobAcceptedResponse {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, String>,
    pub connections: usize,
    pub metrics: MetricsSnapshot,
    pub version: String,
}
