use axum::http::{HeaderMap, StatusCode};
use parley_core::RequestId;

use crate::app::errors;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Idempotency key of a mutating call, taken from `X-Request-ID`.
pub fn request_id(headers: &HeaderMap) -> Result<RequestId, axum::response::Response> {
    let raw = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            errors::json_error(
                StatusCode::BAD_REQUEST,
                "missing_request_id",
                "X-Request-ID header is required",
            )
        })?;

    let id: RequestId = raw.trim().parse().map_err(|e: parley_core::DomainError| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_request_id", e.to_string())
    })?;
    if id.is_nil() {
        return Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_request_id",
            "X-Request-ID must not be nil",
        ));
    }
    Ok(id)
}
