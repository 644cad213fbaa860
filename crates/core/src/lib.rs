//! `parley-core`: identifiers and the domain error model shared by every crate.
//!
//! This crate is pure: no I/O, no async.

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{ChatId, EventId, FailedJobId, JobId, MessageId, ProblemId, RequestId, UserId};
