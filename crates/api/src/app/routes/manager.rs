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

/// GET /manager/ws
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    Arc::clone(&services.manager_stream).serve(ws, user.user_id())
}

/// POST /manager/v1/getFreeHandsBtnAvailability
pub async fn free_hands_availability(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    match services.managers.can_receive_problems(user.user_id()).await {
        Ok(available) => (
            StatusCode::OK,
            Json(dto::DataResponse::new(dto::FreeHandsAvailability { available })),
        )
            .into_response(),
        Err(e) => errors::usecase_error_to_response(e),
    }
}

/// POST /manager/v1/freeHands
pub async fn free_hands(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    match services.managers.free_hands(user.user_id()).await {
        Ok(()) => (StatusCode::OK, Json(dto::DataResponse::new(()))).into_response(),
        Err(e) => errors::usecase_error_to_response(e),
    }
}

/// POST /manager/v1/sendMessage
pub async fn send_message(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    headers: HeaderMap,
    Json(body): Json<dto::ManagerSendMessageRequest>,
) -> axum::response::Response {
    let request_id = match common::request_id(&headers) {
        Ok(id) => id,
        Err(res) => return res,
    };

    match services
        .managers
        .send_message(user.user_id(), request_id, body.chat_id, &body.message_body)
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

/// POST /manager/v1/closeChat
pub async fn close_chat(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    headers: HeaderMap,
    Json(body): Json<dto::CloseChatRequest>,
) -> axum::response::Response {
    let request_id = match common::request_id(&headers) {
        Ok(id) => id,
        Err(res) => return res,
    };

    match services
        .managers
        .close_chat(user.user_id(), request_id, body.chat_id)
        .await
    {
        Ok(()) => (StatusCode::OK, Json(dto::DataResponse::new(()))).into_response(),
        Err(e) => errors::usecase_error_to_response(e),
    }
}

/// POST /manager/v1/getChats
pub async fn get_chats(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    match services.managers.get_chats(user.user_id()).await {
        Ok(chats) => (
            StatusCode::OK,
            Json(dto::DataResponse::new(dto::ChatList::from(chats))),
        )
            .into_response(),
        Err(e) => errors::usecase_error_to_response(e),
    }
}

/// POST /manager/v1/getChatHistory
pub async fn get_chat_history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Json(body): Json<dto::GetChatHistoryRequest>,
) -> axum::response::Response {
    let page = match body.paging.page() {
        Ok(page) => page,
        Err(e) => return errors::usecase_error_to_response(e),
    };

    match services
        .managers
        .get_chat_history(user.user_id(), body.chat_id, page)
        .await
    {
        Ok(page) => (
            StatusCode::OK,
            Json(dto::DataResponse::new(
                dto::MessagesPage::<dto::ManagerHistoryMessage>::from(page),
            )),
        )
            .into_response(),
        Err(e) => errors::usecase_error_to_response(e),
    }
}
