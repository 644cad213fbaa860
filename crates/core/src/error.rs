//! Domain error model.

use thiserror::Error;

/// Domain-level error.
///
/// Only identifier parsing fails in this crate. Validation, ownership and
/// storage failures belong to the use-case and store error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier was invalid (parse failure or nil).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
