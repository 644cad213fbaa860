//! Use cases behind the HTTP surface.
//!
//! Each write performs its changes and enqueues the follow-up job in one
//! transaction. History reads page through [`history`]. Callers pass the
//! authenticated user explicitly.

use parley_core::{DomainError, UserId};
use thiserror::Error;

use crate::manager::PoolError;
use crate::outbox::OutboxError;
use crate::store::StoreError;

pub mod client;
pub mod history;
pub mod manager;
pub mod verdict;

pub use client::ClientUseCases;
pub use history::{Cursor, Page, PageRequest};
pub use manager::ManagerUseCases;
pub use verdict::{Verdict, VerdictUseCase};

pub const MAX_BODY_LEN: usize = 3000;

#[derive(Debug, Error)]
pub enum UseCaseError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("manager overloaded")]
    ManagerOverloaded,

    #[error("no active problem")]
    NoActiveProblem,

    #[error("message not found")]
    MessageNotFound,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("manager pool error: {0}")]
    Pool(#[from] PoolError),
}

impl From<DomainError> for UseCaseError {
    fn from(e: DomainError) -> Self {
        UseCaseError::InvalidRequest(e.to_string())
    }
}

pub(crate) fn validate_body(body: &str) -> Result<(), UseCaseError> {
    if body.trim().is_empty() {
        return Err(UseCaseError::InvalidRequest("message body is empty".into()));
    }
    if body.chars().count() > MAX_BODY_LEN {
        return Err(UseCaseError::InvalidRequest(format!(
            "message body exceeds {MAX_BODY_LEN} characters"
        )));
    }
    Ok(())
}

pub(crate) fn validate_user(user_id: UserId) -> Result<(), UseCaseError> {
    user_id.validate()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_limits() {
        assert!(validate_body("hi").is_ok());
        assert!(validate_body("   ").is_err());
        assert!(validate_body(&"x".repeat(MAX_BODY_LEN)).is_ok());
        assert!(validate_body(&"x".repeat(MAX_BODY_LEN + 1)).is_err());
    }

    #[test]
    fn nil_user_is_invalid() {
        assert!(matches!(
            validate_user(UserId::nil()),
            Err(UseCaseError::InvalidRequest(_))
        ));
    }
}
