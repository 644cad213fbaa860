//! Infrastructure layer: storage, outbox, job handlers, manager scheduling,
//! outbound producer and the use cases that tie them together.

pub mod jobs;
pub mod manager;
pub mod outbox;
pub mod producer;
pub mod store;
pub mod usecases;
