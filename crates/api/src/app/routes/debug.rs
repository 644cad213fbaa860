//! Operator endpoints: runtime log level, dead-letter inspection, and the
//! content-screen verdict hook.

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use parley_infra::store::JobRepository;
use parley_observability::LogLevel;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

const DEFAULT_FAILED_JOBS_LIMIT: usize = 50;
const MAX_FAILED_JOBS_LIMIT: usize = 1000;

/// GET /debug/log-level
pub async fn log_level(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.log.current_filter() {
        Ok(level) => (
            StatusCode::OK,
            Json(dto::DataResponse::new(dto::LogLevelResponse { level })),
        )
            .into_response(),
        Err(e) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "log_error", e.to_string()),
    }
}

/// PUT /debug/log-level
pub async fn set_log_level(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SetLogLevelRequest>,
) -> axum::response::Response {
    let level: LogLevel = match body.level.parse() {
        Ok(level) => level,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_log_level", e.to_string());
        }
    };

    match services.log.set_level(level) {
        Ok(()) => (
            StatusCode::OK,
            Json(dto::DataResponse::new(dto::LogLevelResponse {
                level: level.to_string(),
            })),
        )
            .into_response(),
        Err(e) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "log_error", e.to_string()),
    }
}

/// GET /debug/failed-jobs?limit=N
pub async fn failed_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::FailedJobsQuery>,
) -> axum::response::Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_FAILED_JOBS_LIMIT)
        .clamp(1, MAX_FAILED_JOBS_LIMIT);

    match services.store.list_failed_jobs(limit).await {
        Ok(jobs) => (StatusCode::OK, Json(dto::DataResponse::new(jobs))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// POST /debug/verdict
pub async fn apply_verdict(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::VerdictRequest>,
) -> axum::response::Response {
    match services.verdicts.apply(body.message_id, body.verdict).await {
        Ok(()) => (StatusCode::OK, Json(dto::DataResponse::new(()))).into_response(),
        Err(e) => errors::usecase_error_to_response(e),
    }
}
