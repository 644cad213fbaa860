use axum::{
    routing::{get, post, put},
    Router,
};

pub mod client;
pub mod common;
pub mod debug;
pub mod manager;
pub mod system;

/// Client-facing endpoints (identity required).
pub fn client_router() -> Router {
    Router::new()
        .route("/ws", get(client::stream))
        .route("/v1/sendMessage", post(client::send_message))
        .route("/v1/getHistory", post(client::get_history))
}

/// Manager-facing endpoints (identity required).
pub fn manager_router() -> Router {
    Router::new()
        .route("/ws", get(manager::stream))
        .route("/v1/freeHands", post(manager::free_hands))
        .route(
            "/v1/getFreeHandsBtnAvailability",
            post(manager::free_hands_availability),
        )
        .route("/v1/sendMessage", post(manager::send_message))
        .route("/v1/closeChat", post(manager::close_chat))
        .route("/v1/getChats", post(manager::get_chats))
        .route("/v1/getChatHistory", post(manager::get_chat_history))
}

/// Operator endpoints, served on the debug listener only.
pub fn debug_router() -> Router {
    Router::new()
        .route("/log-level", put(debug::set_log_level).get(debug::log_level))
        .route("/failed-jobs", get(debug::failed_jobs))
        .route("/verdict", post(debug::apply_verdict))
}
