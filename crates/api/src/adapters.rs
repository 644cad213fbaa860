//! Per-audience wire mapping of stream events.
//!
//! Output is camelCase JSON discriminated by `eventType`. Each audience
//! sees only the variants its UI understands; anything else is
//! [`AdaptError::Unsupported`].

use chrono::{DateTime, Utc};
use parley_core::{ChatId, EventId, MessageId, RequestId, UserId};
use parley_events::{Event, EventType};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdaptError {
    #[error("unsupported event type: {0}")]
    Unsupported(EventType),

    #[error("encoding event: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait EventAdapter: Send + Sync + 'static {
    fn adapt(&self, event: &Event) -> Result<serde_json::Value, AdaptError>;
}

#[derive(Debug, Serialize)]
#[serde(tag = "eventType")]
enum ClientWireEvent<'a> {
    #[serde(rename = "NewMessageEvent", rename_all = "camelCase")]
    NewMessage {
        event_id: EventId,
        request_id: RequestId,
        message_id: MessageId,
        #[serde(skip_serializing_if = "Option::is_none")]
        author_id: Option<UserId>,
        body: &'a str,
        created_at: DateTime<Utc>,
        is_service: bool,
    },
    #[serde(rename = "MessageSentEvent", rename_all = "camelCase")]
    MessageSent {
        event_id: EventId,
        request_id: RequestId,
        message_id: MessageId,
    },
    #[serde(rename = "MessageBlockedEvent", rename_all = "camelCase")]
    MessageBlocked {
        event_id: EventId,
        request_id: RequestId,
        message_id: MessageId,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClientAdapter;

impl EventAdapter for ClientAdapter {
    fn adapt(&self, event: &Event) -> Result<serde_json::Value, AdaptError> {
        let wire = match event {
            Event::NewMessage(e) => ClientWireEvent::NewMessage {
                event_id: e.core.event_id,
                request_id: e.core.request_id,
                message_id: e.message_id,
                author_id: e.author_id,
                body: &e.body,
                created_at: e.created_at,
                is_service: e.is_service,
            },
            Event::MessageSent(e) => ClientWireEvent::MessageSent {
                event_id: e.core.event_id,
                request_id: e.core.request_id,
                message_id: e.message_id,
            },
            Event::MessageBlocked(e) => ClientWireEvent::MessageBlocked {
                event_id: e.core.event_id,
                request_id: e.core.request_id,
                message_id: e.message_id,
            },
            Event::NewChat(_) | Event::ChatClosed(_) => {
                return Err(AdaptError::Unsupported(event.event_type()));
            }
        };
        Ok(serde_json::to_value(wire)?)
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "eventType")]
enum ManagerWireEvent<'a> {
    #[serde(rename = "NewMessageEvent", rename_all = "camelCase")]
    NewMessage {
        event_id: EventId,
        request_id: RequestId,
        chat_id: ChatId,
        message_id: MessageId,
        #[serde(skip_serializing_if = "Option::is_none")]
        author_id: Option<UserId>,
        body: &'a str,
        created_at: DateTime<Utc>,
        is_service: bool,
    },
    #[serde(rename = "MessageSentEvent", rename_all = "camelCase")]
    MessageSent {
        event_id: EventId,
        request_id: RequestId,
        message_id: MessageId,
    },
    #[serde(rename = "NewChatEvent", rename_all = "camelCase")]
    NewChat {
        event_id: EventId,
        request_id: RequestId,
        chat_id: ChatId,
        client_id: UserId,
        can_take_more_problems: bool,
    },
    #[serde(rename = "ChatClosedEvent", rename_all = "camelCase")]
    ChatClosed {
        event_id: EventId,
        request_id: RequestId,
        chat_id: ChatId,
        can_take_more_problems: bool,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ManagerAdapter;

impl EventAdapter for ManagerAdapter {
    fn adapt(&self, event: &Event) -> Result<serde_json::Value, AdaptError> {
        let wire = match event {
            Event::NewMessage(e) => ManagerWireEvent::NewMessage {
                event_id: e.core.event_id,
                request_id: e.core.request_id,
                chat_id: e.chat_id,
                message_id: e.message_id,
                author_id: e.author_id,
                body: &e.body,
                created_at: e.created_at,
                is_service: e.is_service,
            },
            Event::MessageSent(e) => ManagerWireEvent::MessageSent {
                event_id: e.core.event_id,
                request_id: e.core.request_id,
                message_id: e.message_id,
            },
            Event::NewChat(e) => ManagerWireEvent::NewChat {
                event_id: e.core.event_id,
                request_id: e.core.request_id,
                chat_id: e.chat_id,
                client_id: e.client_id,
                can_take_more_problems: e.can_take_more_problems,
            },
            Event::ChatClosed(e) => ManagerWireEvent::ChatClosed {
                event_id: e.core.event_id,
                request_id: e.core.request_id,
                chat_id: e.chat_id,
                can_take_more_problems: e.can_take_more_problems,
            },
            Event::MessageBlocked(_) => {
                return Err(AdaptError::Unsupported(event.event_type()));
            }
        };
        Ok(serde_json::to_value(wire)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_events::{
        ChatClosedEvent, MessageBlockedEvent, NewChatEvent, NewMessageEvent,
    };

    fn service_message() -> Event {
        NewMessageEvent::new(
            RequestId::new(),
            ChatId::new(),
            MessageId::new(),
            None,
            Utc::now(),
            "Manager will answer you soon",
            true,
        )
        .into()
    }

    #[test]
    fn client_new_message_is_camel_case_and_omits_missing_author() {
        let event = service_message();
        let json = ClientAdapter.adapt(&event).unwrap();

        assert_eq!(json["eventType"], "NewMessageEvent");
        assert_eq!(json["isService"], true);
        assert_eq!(json["body"], "Manager will answer you soon");
        assert!(json.get("authorId").is_none());
        assert!(json.get("chatId").is_none());
        assert_eq!(
            json["eventId"].as_str().unwrap(),
            event.core().event_id.to_string()
        );
    }

    #[test]
    fn client_sees_blocked_messages_but_not_manager_events() {
        let blocked: Event = MessageBlockedEvent::new(RequestId::new(), MessageId::new()).into();
        assert_eq!(
            ClientAdapter.adapt(&blocked).unwrap()["eventType"],
            "MessageBlockedEvent"
        );

        let closed: Event = ChatClosedEvent::new(RequestId::new(), ChatId::new(), true).into();
        assert!(matches!(
            ClientAdapter.adapt(&closed),
            Err(AdaptError::Unsupported(EventType::ChatClosed))
        ));
    }

    #[test]
    fn manager_new_chat_carries_capacity_flag() {
        let client = UserId::new();
        let event: Event = NewChatEvent::new(RequestId::new(), ChatId::new(), client, false).into();
        let json = ManagerAdapter.adapt(&event).unwrap();

        assert_eq!(json["eventType"], "NewChatEvent");
        assert_eq!(json["clientId"].as_str().unwrap(), client.to_string());
        assert_eq!(json["canTakeMoreProblems"], false);
    }

    #[test]
    fn manager_messages_name_their_chat() {
        let json = ManagerAdapter.adapt(&service_message()).unwrap();
        assert!(json["chatId"].is_string());
    }

    #[test]
    fn manager_never_sees_blocked_messages() {
        let blocked: Event = MessageBlockedEvent::new(RequestId::new(), MessageId::new()).into();
        assert!(matches!(
            ManagerAdapter.adapt(&blocked),
            Err(AdaptError::Unsupported(EventType::MessageBlocked))
        ));
    }
}
