//! HTTP application wiring (Axum routers + service wiring).
//!
//! - `services.rs`: infrastructure wiring and background tasks
//! - `routes/`: HTTP handlers, one file per audience
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware::{self, IdentityState};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Public router: health plus the identity-protected client and manager APIs.
pub fn build_app(services: Arc<AppServices>) -> Router {
    let identity = IdentityState {
        resolver: Arc::clone(&services.identity),
    };

    let protected = Router::new()
        .nest("/client", routes::client_router())
        .nest("/manager", routes::manager_router())
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            identity,
            middleware::identity_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}

/// Operator router, bound to `server.debug_addr`. No identity check.
pub fn build_debug_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/debug", routes::debug_router())
        .layer(Extension(services))
}
