use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use super::models::ErrorResponse;
use crate::dispatch::DispatchError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("job dispatch unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::Unavailable(_) => "DISPATCH_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Unavailable(e) => ApiError::Unavailable(e.to_string()),
            DispatchError::InvalidRequest(msg) => ApiError::InvalidPayload(msg),
            DispatchError::Io(e) => ApiError::Internal(format!("staging failed: {e}")),
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(value: axum::extract::multipart::MultipartError) -> Self {
        ApiError::InvalidPayload(value.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::SubstrateError;
    use crate::queue::QueueError;

    #[test]
    fn test_dispatch_errors_map_to_status() {
        let unavailable: ApiError =
            DispatchError::Unavailable(SubstrateError::Local(QueueError::InvalidSequence)).into();
        assert_eq!(unavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(unavailable.code(), "DISPATCH_UNAVAILABLE");

        let invalid: ApiError = DispatchError::InvalidRequest("client_id is required".into()).into();
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);
    }
}
