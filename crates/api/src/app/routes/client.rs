use std::sync::Arc;

use axum::{
    extract::{Extension, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

use crate::app::routes::common;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::UserContext;

/// GET /client/ws
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    Arc::clone(&services.client_stream).serve(ws, user.user_id())
}

/// POST /client/v1/sendMessage
pub async fn send_message(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    headers: HeaderMap,
    Json(body): Json<dto::ClientSendMessageRequest>,
) -> axum::response::Response {
    let request_id = match common::request_id(&headers) {
        Ok(id) => id,
        Err(res) => return res,
    };

    match services
        .client
        .send_message(user.user_id(), request_id, &body.message_body)
        .await
    {
        Ok(message) => (
            StatusCode::OK,
            Json(dto::DataResponse::new(dto::MessageHeader::from(&message))),
        )
            .into_response(),
        Err(e) => errors::usecase_error_to_response(e),
    }
}

/// POST /client/v1/getHistory
pub async fn get_history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Json(body): Json<dto::GetHistoryRequest>,
) -> axum::response::Response {
    let page = match body.page() {
        Ok(page) => page,
        Err(e) => return errors::usecase_error_to_response(e),
    };

    match services.client.get_history(user.user_id(), page).await {
        Ok(page) => (
            StatusCode::OK,
            Json(dto::DataResponse::new(
                dto::MessagesPage::<dto::ClientHistoryMessage>::from(page),
            )),
        )
            .into_response(),
        Err(e) => errors::usecase_error_to_response(e),
    }
}
