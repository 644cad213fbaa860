use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use parley_infra::manager::PoolError;
use parley_infra::store::StoreError;
use parley_infra::usecases::UseCaseError;

pub fn usecase_error_to_response(err: UseCaseError) -> axum::response::Response {
    match err {
        UseCaseError::InvalidRequest(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_request", msg),
        UseCaseError::InvalidCursor(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_cursor", msg),
        UseCaseError::ManagerOverloaded => {
            json_error(StatusCode::CONFLICT, "manager_overloaded", "manager overloaded")
        }
        UseCaseError::NoActiveProblem => json_error(
            StatusCode::CONFLICT,
            "no_active_problem",
            "no active problem in the chat",
        ),
        UseCaseError::MessageNotFound => {
            json_error(StatusCode::NOT_FOUND, "message_not_found", "message not found")
        }
        UseCaseError::Pool(PoolError::CapacityExceeded(_)) => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "pool_full",
            "too many managers are waiting, try again later",
        ),
        UseCaseError::Pool(e) => internal("pool_error", e),
        UseCaseError::Store(e) if e.is_not_found() => {
            json_error(StatusCode::NOT_FOUND, "not_found", e.to_string())
        }
        UseCaseError::Store(e) => store_error_to_response(e),
        UseCaseError::Outbox(e) => internal("outbox_error", e),
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    internal("store_error", err)
}

fn internal(code: &'static str, err: impl std::fmt::Display) -> axum::response::Response {
    tracing::error!(error = %err, code, "request failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, code, "internal error")
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
