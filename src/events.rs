//! Progress events pushed to clients
//!
//! Events are produced by the job executor, carried across the bridge inside
//! an [`Envelope`], and delivered as JSON text frames on the owning client's
//! WebSocket.

use serde::{Deserialize, Serialize};

use crate::executor::JobState;
use crate::unpack::ResultSet;

/// Client-visible status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Queued,
    Processing,
    Completed,
    Error,
}

impl EventStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Completed | EventStatus::Error)
    }
}

/// One status update about a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub client_id: String,
    pub status: EventStatus,
    /// Pipeline state the job just entered
    pub state: JobState,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultSet>,
    /// Failure class of an `error` event, e.g. `remote_timeout`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub emitted_at: chrono::DateTime<chrono::Utc>,
}

impl ProgressEvent {
    pub fn new(
        job_id: impl Into<String>,
        client_id: impl Into<String>,
        state: JobState,
        message: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            client_id: client_id.into(),
            status: state.event_status(),
            state,
            message: message.into(),
            result: None,
            error_code: None,
            emitted_at: chrono::Utc::now(),
        }
    }

    pub fn with_result(mut self, result: ResultSet) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }
}

/// Wire format on the shared bridge channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub client_id: String,
    pub payload: ProgressEvent,
}

impl Envelope {
    pub fn wrap(event: ProgressEvent) -> Self {
        Self {
            client_id: event.client_id.clone(),
            payload: event,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_follows_state() {
        let event = ProgressEvent::new("job-1", "c1", JobState::Transferring, "uploading");
        assert_eq!(event.status, EventStatus::Processing);

        let event = ProgressEvent::new("job-1", "c1", JobState::Failed, "boom");
        assert_eq!(event.status, EventStatus::Error);
        assert!(event.status.is_terminal());
    }

    #[test]
    fn test_envelope_json_shape() {
        let event = ProgressEvent::new("job-1", "c1", JobState::Queued, "queued");
        let raw = Envelope::wrap(event).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(value["client_id"], "c1");
        assert_eq!(value["payload"]["status"], "queued");
        assert_eq!(value["payload"]["state"], "queued");
        assert!(value["payload"].get("result").is_none());
        assert!(value["payload"].get("error_code").is_none());
    }

    #[test]
    fn test_error_code_serialized_on_failure() {
        let event = ProgressEvent::new("job-1", "c1", JobState::Failed, "peer gave up")
            .with_error_code("remote_error");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["status"], "error");
        assert_eq!(value["error_code"], "remote_error");
    }

    #[test]
    fn test_decode_rejects_missing_payload() {
        assert!(Envelope::decode(r#"{"client_id":"c1"}"#).is_err());
        assert!(Envelope::decode("not json").is_err());
    }
}
