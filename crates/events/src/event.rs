//! The closed set of events pushed to clients and managers.
//!
//! Every variant embeds a [`CoreEventFields`] block. Adapters at the wire
//! boundary match exhaustively on [`Event`], so adding a variant is a compile
//! error everywhere it has to be handled.

use chrono::{DateTime, Utc};
use parley_core::{ChatId, EventId, MessageId, RequestId, UserId};
use thiserror::Error;

/// Discriminator carried inside [`CoreEventFields`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    NewMessage,
    MessageSent,
    MessageBlocked,
    NewChat,
    ChatClosed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::NewMessage => "NewMessageEvent",
            EventType::MessageSent => "MessageSentEvent",
            EventType::MessageBlocked => "MessageBlockedEvent",
            EventType::NewChat => "NewChatEvent",
            EventType::ChatClosed => "ChatClosedEvent",
        }
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity block shared by every event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CoreEventFields {
    pub event_id: EventId,
    pub event_type: EventType,
    /// Request that caused the event; lets a client correlate with its own call.
    pub request_id: RequestId,
}

impl CoreEventFields {
    fn new(event_type: EventType, request_id: RequestId) -> Self {
        Self {
            event_id: EventId::new(),
            event_type,
            request_id,
        }
    }

    fn collect_problems(&self, expected: EventType, problems: &mut Vec<String>) {
        if self.event_id.is_nil() {
            problems.push("event_id is nil".to_string());
        }
        if self.request_id.is_nil() {
            problems.push("request_id is nil".to_string());
        }
        if self.event_type != expected {
            problems.push(format!(
                "event_type is {}, expected {}",
                self.event_type, expected
            ));
        }
    }
}

/// Event validation failure. Lists every problem found, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {event_type}: {}", problems.join("; "))]
pub struct EventError {
    pub event_type: EventType,
    pub problems: Vec<String>,
}

/// A new message appeared in a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessageEvent {
    pub core: CoreEventFields,
    pub message_id: MessageId,
    pub chat_id: ChatId,
    /// `None` for service messages written by the system.
    pub author_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub body: String,
    pub is_service: bool,
}

impl NewMessageEvent {
    pub fn new(
        request_id: RequestId,
        chat_id: ChatId,
        message_id: MessageId,
        author_id: Option<UserId>,
        created_at: DateTime<Utc>,
        body: impl Into<String>,
        is_service: bool,
    ) -> Self {
        Self {
            core: CoreEventFields::new(EventType::NewMessage, request_id),
            message_id,
            chat_id,
            author_id,
            created_at,
            body: body.into(),
            is_service,
        }
    }
}

/// The client's message passed screening and reached the manager side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSentEvent {
    pub core: CoreEventFields,
    pub message_id: MessageId,
}

impl MessageSentEvent {
    pub fn new(request_id: RequestId, message_id: MessageId) -> Self {
        Self {
            core: CoreEventFields::new(EventType::MessageSent, request_id),
            message_id,
        }
    }
}

/// The client's message was rejected by the content screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBlockedEvent {
    pub core: CoreEventFields,
    pub message_id: MessageId,
}

impl MessageBlockedEvent {
    pub fn new(request_id: RequestId, message_id: MessageId) -> Self {
        Self {
            core: CoreEventFields::new(EventType::MessageBlocked, request_id),
            message_id,
        }
    }
}

/// Manager side: a chat was just assigned to this manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatEvent {
    pub core: CoreEventFields,
    pub chat_id: ChatId,
    pub client_id: UserId,
    pub can_take_more_problems: bool,
}

impl NewChatEvent {
    pub fn new(
        request_id: RequestId,
        chat_id: ChatId,
        client_id: UserId,
        can_take_more_problems: bool,
    ) -> Self {
        Self {
            core: CoreEventFields::new(EventType::NewChat, request_id),
            chat_id,
            client_id,
            can_take_more_problems,
        }
    }
}

/// Manager side: a chat this manager owned was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatClosedEvent {
    pub core: CoreEventFields,
    pub chat_id: ChatId,
    pub can_take_more_problems: bool,
}

impl ChatClosedEvent {
    pub fn new(request_id: RequestId, chat_id: ChatId, can_take_more_problems: bool) -> Self {
        Self {
            core: CoreEventFields::new(EventType::ChatClosed, request_id),
            chat_id,
            can_take_more_problems,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    NewMessage(NewMessageEvent),
    MessageSent(MessageSentEvent),
    MessageBlocked(MessageBlockedEvent),
    NewChat(NewChatEvent),
    ChatClosed(ChatClosedEvent),
}

impl Event {
    pub fn core(&self) -> &CoreEventFields {
        match self {
            Event::NewMessage(e) => &e.core,
            Event::MessageSent(e) => &e.core,
            Event::MessageBlocked(e) => &e.core,
            Event::NewChat(e) => &e.core,
            Event::ChatClosed(e) => &e.core,
        }
    }

    /// The variant's own tag (independent of what the core block claims).
    pub fn event_type(&self) -> EventType {
        match self {
            Event::NewMessage(_) => EventType::NewMessage,
            Event::MessageSent(_) => EventType::MessageSent,
            Event::MessageBlocked(_) => EventType::MessageBlocked,
            Event::NewChat(_) => EventType::NewChat,
            Event::ChatClosed(_) => EventType::ChatClosed,
        }
    }

    /// Check every embedded identifier.
    ///
    /// A new message may omit its author only when it is a service message.
    pub fn validate(&self) -> Result<(), EventError> {
        let event_type = self.event_type();
        let mut problems = Vec::new();
        self.core().collect_problems(event_type, &mut problems);

        match self {
            Event::NewMessage(e) => {
                if e.chat_id.is_nil() {
                    problems.push("chat_id is nil".to_string());
                }
                if e.message_id.is_nil() {
                    problems.push("message_id is nil".to_string());
                }
                match e.author_id {
                    Some(author) if author.is_nil() => {
                        problems.push("author_id is nil".to_string())
                    }
                    None if !e.is_service => {
                        problems.push("author_id is required for non-service messages".to_string())
                    }
                    _ => {}
                }
            }
            Event::MessageSent(MessageSentEvent { message_id, .. })
            | Event::MessageBlocked(MessageBlockedEvent { message_id, .. }) => {
                if message_id.is_nil() {
                    problems.push("message_id is nil".to_string());
                }
            }
            Event::NewChat(e) => {
                if e.chat_id.is_nil() {
                    problems.push("chat_id is nil".to_string());
                }
                if e.client_id.is_nil() {
                    problems.push("client_id is nil".to_string());
                }
            }
            Event::ChatClosed(e) => {
                if e.chat_id.is_nil() {
                    problems.push("chat_id is nil".to_string());
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(EventError {
                event_type,
                problems,
            })
        }
    }
}

impl From<NewMessageEvent> for Event {
    fn from(value: NewMessageEvent) -> Self {
        Event::NewMessage(value)
    }
}

impl From<MessageSentEvent> for Event {
    fn from(value: MessageSentEvent) -> Self {
        Event::MessageSent(value)
    }
}

impl From<MessageBlockedEvent> for Event {
    fn from(value: MessageBlockedEvent) -> Self {
        Event::MessageBlocked(value)
    }
}

impl From<NewChatEvent> for Event {
    fn from(value: NewChatEvent) -> Self {
        Event::NewChat(value)
    }
}

impl From<ChatClosedEvent> for Event {
    fn from(value: ChatClosedEvent) -> Self {
        Event::ChatClosed(value)
    }
}
