//! API utility functions
//!
//! Pure, stateless helpers for request processing, kept apart from the
//! handlers so they can be unit tested.

use crate::api::error::ApiError;

/// Parses and validates a Content-Type header for `multipart/form-data`
///
/// The boundary parameter is required.
pub fn parse_multipart_content_type(content_type: &str) -> Result<mime::Mime, ApiError> {
    let media_type: mime::Mime = content_type.parse().map_err(|_| {
        ApiError::InvalidPayload(format!("invalid Content-Type: {}", content_type))
    })?;

    if media_type.type_() != mime::MULTIPART || media_type.subtype() != mime::FORM_DATA {
        return Err(ApiError::InvalidPayload(format!(
            "Content-Type must be multipart/form-data, got: {}/{}",
            media_type.type_(),
            media_type.subtype()
        )));
    }

    if media_type.get_param(mime::BOUNDARY).is_none() {
        return Err(ApiError::InvalidPayload(
            "multipart/form-data requires a boundary".to_string(),
        ));
    }

    Ok(media_type)
}

/// Validates that the accumulated upload size stays within the limit
pub fn validate_body_size(size: usize, max_size: usize) -> Result<(), ApiError> {
    if size > max_size {
        return Err(ApiError::PayloadTooLarge(size));
    }
    Ok(())
}
