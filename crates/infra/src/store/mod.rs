//! Repository interfaces and their backends.
//!
//! ## Shape
//!
//! Each concern gets a narrow async trait (`JobRepository`, `MessageRepository`,
//! `ChatRepository`, `ProblemRepository`). A backend implements all of them
//! twice:
//!
//! - on the store itself, where every call commits on its own;
//! - on a [`Tx`] obtained from [`Transactor::begin`], where nothing is visible
//!   to other callers until [`Tx::commit`]. Dropping a `Tx` rolls it back.
//!
//! ## Errors
//!
//! "Not found" outcomes the callers branch on are typed variants of
//! [`StoreError`], never a generic failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::{ChatId, FailedJobId, JobId, MessageId, ProblemId, RequestId, UserId};
use thiserror::Error;

use crate::outbox::{FailReason, FailedJob, Job};

pub mod in_memory;
pub mod models;
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use models::{Chat, HistoryPosition, Message, MessageKind, NewMessage, Problem};
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message not found")]
    MessageNotFound,

    #[error("chat not found")]
    ChatNotFound,

    #[error("problem not found")]
    ProblemNotFound,

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// A non-service message already carries this request id.
    #[error("duplicate request: {0}")]
    DuplicateRequest(RequestId),

    #[error("database error in {operation}: {source}")]
    Database {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("corrupt row in {operation}: {detail}")]
    Corrupt {
        operation: &'static str,
        detail: String,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::MessageNotFound
                | StoreError::ChatNotFound
                | StoreError::ProblemNotFound
                | StoreError::JobNotFound(_)
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create_job(
        &self,
        name: &str,
        payload: &str,
        available_at: DateTime<Utc>,
    ) -> StoreResult<JobId>;

    /// Lock one eligible job (skipping rows locked by other reservers), extend
    /// its lease to `until` and count the attempt.
    async fn find_and_reserve_job(&self, until: DateTime<Utc>) -> StoreResult<Option<Job>>;

    async fn create_failed_job(
        &self,
        name: &str,
        payload: &str,
        reason: FailReason,
    ) -> StoreResult<FailedJobId>;

    async fn delete_job(&self, id: JobId) -> StoreResult<()>;

    /// Newest first.
    async fn list_failed_jobs(&self, limit: usize) -> StoreResult<Vec<FailedJob>>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn get_message_by_id(&self, id: MessageId) -> StoreResult<Message>;

    /// The non-service message created by `request_id`.
    async fn get_message_by_request_id(&self, request_id: RequestId) -> StoreResult<Message>;

    /// Fails with [`StoreError::DuplicateRequest`] when another non-service
    /// message was created by the same request.
    async fn create_message(&self, message: NewMessage) -> StoreResult<Message>;

    async fn mark_as_visible_for_manager(&self, id: MessageId) -> StoreResult<()>;

    async fn block_message(&self, id: MessageId) -> StoreResult<()>;

    /// Client-visible messages of the client's chat, newest first, at most
    /// `limit` of them, all after `from` when given.
    async fn client_chat_messages(
        &self,
        client_id: UserId,
        from: Option<HistoryPosition>,
        limit: usize,
    ) -> StoreResult<Vec<Message>>;

    /// Manager-visible, unblocked, non-service messages of `chat_id` that
    /// belong to an open problem owned by `manager_id`. Ordered and bounded
    /// like [`client_chat_messages`](Self::client_chat_messages).
    async fn manager_chat_messages(
        &self,
        manager_id: UserId,
        chat_id: ChatId,
        from: Option<HistoryPosition>,
        limit: usize,
    ) -> StoreResult<Vec<Message>>;
}

#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// One chat per client.
    async fn create_chat_if_not_exists(&self, client_id: UserId) -> StoreResult<ChatId>;

    async fn get_client_id(&self, chat_id: ChatId) -> StoreResult<UserId>;

    /// Chats with an open problem owned by `manager_id`, oldest first.
    async fn chats_of_manager(&self, manager_id: UserId) -> StoreResult<Vec<Chat>>;
}

#[async_trait]
pub trait ProblemRepository: Send + Sync {
    /// Reuse the chat's open problem or open a new one.
    async fn create_problem_if_not_exists(&self, chat_id: ChatId) -> StoreResult<ProblemId>;

    async fn manager_open_problems_count(&self, manager_id: UserId) -> StoreResult<usize>;

    /// Open problems with no manager and at least one manager-visible message,
    /// oldest first.
    async fn problems_without_manager(&self) -> StoreResult<Vec<Problem>>;

    async fn assign_manager(&self, problem_id: ProblemId, manager_id: UserId) -> StoreResult<()>;

    /// Request of the problem's first message.
    async fn problem_request_id(&self, problem_id: ProblemId) -> StoreResult<RequestId>;

    /// Manager of the chat's open problem, if any.
    async fn active_manager(&self, chat_id: ChatId) -> StoreResult<Option<UserId>>;

    /// The open problem of `chat_id` owned by `manager_id`.
    async fn assigned_problem_id(&self, manager_id: UserId, chat_id: ChatId)
    -> StoreResult<ProblemId>;

    /// Close the open problem of `chat_id` owned by `manager_id`.
    async fn resolve_problem(
        &self,
        chat_id: ChatId,
        manager_id: UserId,
        request_id: RequestId,
    ) -> StoreResult<ProblemId>;
}

/// An open transaction exposing every repository.
#[async_trait]
pub trait Tx: JobRepository + MessageRepository + ChatRepository + ProblemRepository {
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

#[async_trait]
pub trait Transactor: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn Tx>>;
}

/// Everything a backend provides. Blanket-implemented.
pub trait Store:
    Transactor + JobRepository + MessageRepository + ChatRepository + ProblemRepository
{
}

impl<T> Store for T where
    T: Transactor + JobRepository + MessageRepository + ChatRepository + ProblemRepository
{
}
