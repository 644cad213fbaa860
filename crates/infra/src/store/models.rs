//! Rows the repositories hand out.

use chrono::{DateTime, Utc};
use parley_core::{ChatId, MessageId, ProblemId, RequestId, UserId};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chat {
    pub id: ChatId,
    pub client_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// A unit of support work inside a chat.
///
/// At most one problem per chat is open (`resolved_at` is `None`) at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    pub id: ProblemId,
    pub chat_id: ChatId,
    pub manager_id: Option<UserId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolve_request_id: Option<RequestId>,
    pub created_at: DateTime<Utc>,
}

impl Problem {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub problem_id: ProblemId,
    /// `None` for service messages.
    pub author_id: Option<UserId>,
    /// Request that created the message. Service messages reuse the request of
    /// the problem they belong to.
    pub initial_request_id: RequestId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub is_visible_for_client: bool,
    pub is_visible_for_manager: bool,
    pub is_blocked: bool,
    pub is_service: bool,
    /// When the content screen ruled on the message.
    pub checked_at: Option<DateTime<Utc>>,
}

/// Sort key of a message in newest-first history listings.
///
/// A listing that starts from a position returns only messages strictly older
/// than it. The id breaks ties between messages created in the same instant.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HistoryPosition {
    pub created_at: DateTime<Utc>,
    pub id: MessageId,
}

impl HistoryPosition {
    pub fn of(message: &Message) -> Self {
        Self {
            created_at: message.created_at,
            id: message.id,
        }
    }

    /// Whether `message` comes after this position in newest-first order.
    pub fn precedes(&self, message: &Message) -> bool {
        (message.created_at, *message.id.as_uuid()) < (self.created_at, *self.id.as_uuid())
    }
}

/// Visibility flags of a message about to be created.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Client message awaiting screening.
    ClientVisible,
    /// Manager reply, shown to both sides.
    FullVisible,
    /// System notice shown to the client.
    Service,
}

/// Input for [`MessageRepository::create_message`](super::MessageRepository::create_message).
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub request_id: RequestId,
    pub problem_id: ProblemId,
    pub chat_id: ChatId,
    pub author_id: Option<UserId>,
    pub body: String,
    pub kind: MessageKind,
}

impl NewMessage {
    pub fn client_visible(
        request_id: RequestId,
        problem_id: ProblemId,
        chat_id: ChatId,
        author_id: UserId,
        body: impl Into<String>,
    ) -> Self {
        Self {
            request_id,
            problem_id,
            chat_id,
            author_id: Some(author_id),
            body: body.into(),
            kind: MessageKind::ClientVisible,
        }
    }

    pub fn full_visible(
        request_id: RequestId,
        problem_id: ProblemId,
        chat_id: ChatId,
        author_id: UserId,
        body: impl Into<String>,
    ) -> Self {
        Self {
            request_id,
            problem_id,
            chat_id,
            author_id: Some(author_id),
            body: body.into(),
            kind: MessageKind::FullVisible,
        }
    }

    pub fn service(
        request_id: RequestId,
        problem_id: ProblemId,
        chat_id: ChatId,
        body: impl Into<String>,
    ) -> Self {
        Self {
            request_id,
            problem_id,
            chat_id,
            author_id: None,
            body: body.into(),
            kind: MessageKind::Service,
        }
    }

    /// Materialise the row with a fresh id.
    pub fn into_message(self, created_at: DateTime<Utc>) -> Message {
        let (for_client, for_manager, is_service) = match self.kind {
            MessageKind::ClientVisible => (true, false, false),
            MessageKind::FullVisible => (true, true, false),
            MessageKind::Service => (true, false, true),
        };
        Message {
            id: MessageId::new(),
            chat_id: self.chat_id,
            problem_id: self.problem_id,
            author_id: self.author_id,
            initial_request_id: self.request_id,
            body: self.body,
            created_at,
            is_visible_for_client: for_client,
            is_visible_for_manager: for_manager,
            is_blocked: false,
            is_service,
            checked_at: None,
        }
    }
}
