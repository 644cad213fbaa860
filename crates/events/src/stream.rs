//! Event stream abstraction (per-user pub/sub).
//!
//! ## Delivery model
//!
//! - **Keyed by user**: `publish(user, event)` reaches every live subscription of
//!   that user and nobody else.
//! - **At-least-once**: job handlers republish on retry, so the same logical event
//!   can arrive twice. Consumers dedupe by `EventId` if they care.
//! - **Per-subscription FIFO**: events sent by one publisher arrive in send order.
//!   There is no ordering across users.
//! - **Not durable**: subscriptions die with the process.

use async_trait::async_trait;
use parley_core::UserId;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::event::{Event, EventError};

#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Invalid(#[from] EventError),

    /// Subscribing after `close`.
    #[error("event stream is closed")]
    Closed,

    #[error("event stream lock poisoned")]
    Poisoned,
}

/// Receiving half of one subscription.
///
/// `recv` yields `None` once the subscription ended: its cancellation token
/// fired or the whole stream was closed.
#[derive(Debug)]
pub struct Subscription {
    user_id: UserId,
    receiver: mpsc::Receiver<Event>,
}

impl Subscription {
    pub fn new(user_id: UserId, receiver: mpsc::Receiver<Event>) -> Self {
        Self { user_id, receiver }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Event, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

#[async_trait]
pub trait EventStream: Send + Sync {
    /// Register a new subscription for `user_id`.
    ///
    /// The subscription is removed when `cancel` fires.
    fn subscribe(
        &self,
        user_id: UserId,
        cancel: CancellationToken,
    ) -> Result<Subscription, StreamError>;

    /// Validate `event` and deliver it to every live subscription of `user_id`.
    ///
    /// Returns an error only for invalid events. Publishing to a user with no
    /// subscriptions, or after `close`, is a no-op.
    async fn publish(&self, user_id: UserId, event: Event) -> Result<(), StreamError>;

    /// End every subscription. Idempotent.
    fn close(&self) -> Result<(), StreamError>;
}
