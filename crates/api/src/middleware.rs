//! Identity resolution for client and manager routes.
//!
//! Token introspection lives behind [`IdentityResolver`]; the middleware only
//! extracts the bearer token and stores the resolved [`UserContext`].

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::Response,
};
use parley_core::UserId;
use thiserror::Error;

use crate::app::errors::json_error;
use crate::context::UserContext;

/// Subprotocol browsers offer on the websocket handshake, followed by the token:
/// `Sec-WebSocket-Protocol: parley-protocol, <token>`.
pub const WS_PROTOCOL: &str = "parley-protocol";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("token is not active")]
    Inactive,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<UserId, IdentityError>;
}

/// Accepts `Bearer <uuid>` and trusts it. Dev and tests only.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevIdentityResolver;

#[async_trait]
impl IdentityResolver for DevIdentityResolver {
    async fn resolve(&self, token: &str) -> Result<UserId, IdentityError> {
        let user_id: UserId = token
            .parse()
            .map_err(|e: parley_core::DomainError| IdentityError::Malformed(e.to_string()))?;
        if user_id.is_nil() {
            return Err(IdentityError::Inactive);
        }
        Ok(user_id)
    }
}

#[derive(Clone)]
pub struct IdentityState {
    pub resolver: Arc<dyn IdentityResolver>,
}

pub async fn identity_middleware(
    State(state): State<IdentityState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_token(req.headers())
        .ok_or_else(|| json_error(StatusCode::UNAUTHORIZED, "unauthorized", "missing bearer token"))?;

    let user_id = match state.resolver.resolve(token).await {
        Ok(user_id) => user_id,
        Err(IdentityError::Unavailable(e)) => {
            tracing::error!(error = %e, "identity provider unavailable");
            return Err(json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "identity_unavailable",
                "identity provider unavailable",
            ));
        }
        Err(e) => {
            tracing::debug!(error = %e, "token rejected");
            return Err(json_error(StatusCode::UNAUTHORIZED, "unauthorized", "invalid token"));
        }
    };

    req.extensions_mut().insert(UserContext::new(user_id));
    Ok(next.run(req).await)
}

fn extract_token(headers: &HeaderMap) -> Option<&str> {
    extract_bearer(headers).or_else(|| extract_ws_protocol_token(headers))
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let token = headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")?
        .trim();
    (!token.is_empty()).then_some(token)
}

fn extract_ws_protocol_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::SEC_WEBSOCKET_PROTOCOL)?.to_str().ok()?;
    let mut parts = value.split(',').map(str::trim);
    if parts.next()? != WS_PROTOCOL {
        return None;
    }
    parts.next().filter(|t| !t.is_empty())
}
