//! Outbox job handlers.
//!
//! Each handler decodes its payload, reads the repositories and publishes
//! events or forwards the message to the broker. Handlers are idempotent in
//! the at-least-once sense: a retry republishes everything, and event
//! consumers dedupe by `EventId`.
//!
//! | Name | Payload |
//! |------|---------|
//! | `send-client-message` | `messageID` |
//! | `client-message-sent` | `messageID` |
//! | `client-message-blocked` | `messageID` |
//! | `manager-assigned-to-problem` | `messageID.managerID` |
//! | `close-chat` | `requestID.chatID.managerID.messageID` |
//! | `send-manager-message` | `messageID.managerID` |

use std::sync::Arc;
use std::time::Duration;

use parley_core::MessageId;
use parley_events::{EventStream, NewMessageEvent, StreamError};
use thiserror::Error;

use crate::manager::ManagerLoad;
use crate::outbox::{Outbox, OutboxError};
use crate::producer::{MessageProducer, ProducerError};
use crate::store::{Message, Store, StoreError};

pub mod client_message_blocked;
pub mod client_message_sent;
pub mod close_chat;
pub mod manager_assigned;
pub mod payload;
pub mod send_client_message;
pub mod send_manager_message;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid payload: {0}")]
    Payload(String),

    #[error("message {0} has no author")]
    MissingAuthor(MessageId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("event stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("producer error: {0}")]
    Producer(#[from] ProducerError),

    #[error("handler timed out after {0:?}")]
    Timeout(Duration),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Failed(String),
}

/// Collaborators shared by the handlers.
#[derive(Clone)]
pub struct JobDeps {
    pub store: Arc<dyn Store>,
    pub stream: Arc<dyn EventStream>,
    pub producer: Arc<dyn MessageProducer>,
    pub load: ManagerLoad,
}

/// Register all six handlers.
pub fn register_all(outbox: &mut Outbox, deps: &JobDeps) -> Result<(), OutboxError> {
    outbox.register_job(Arc::new(send_client_message::SendClientMessage::new(
        Arc::clone(&deps.store),
        Arc::clone(&deps.stream),
        Arc::clone(&deps.producer),
    )))?;
    outbox.register_job(Arc::new(client_message_sent::ClientMessageSent::new(
        Arc::clone(&deps.store),
        Arc::clone(&deps.stream),
    )))?;
    outbox.register_job(Arc::new(client_message_blocked::ClientMessageBlocked::new(
        Arc::clone(&deps.store),
        Arc::clone(&deps.stream),
    )))?;
    outbox.register_job(Arc::new(manager_assigned::ManagerAssigned::new(
        Arc::clone(&deps.store),
        Arc::clone(&deps.stream),
        deps.load.clone(),
    )))?;
    outbox.register_job(Arc::new(close_chat::CloseChat::new(
        Arc::clone(&deps.store),
        Arc::clone(&deps.stream),
        deps.load.clone(),
    )))?;
    outbox.register_job(Arc::new(send_manager_message::SendManagerMessage::new(
        Arc::clone(&deps.store),
        Arc::clone(&deps.stream),
        Arc::clone(&deps.producer),
    )))?;
    Ok(())
}

/// `NewMessageEvent` mirroring a stored message, as seen by its readers.
pub(crate) fn new_message_event(message: &Message) -> NewMessageEvent {
    NewMessageEvent::new(
        message.initial_request_id,
        message.chat_id,
        message.id,
        message.author_id,
        message.created_at,
        message.body.clone(),
        message.is_service,
    )
}

#[cfg(test)]
pub(crate) mod testkit {
    use std::sync::Arc;

    use parley_core::{ChatId, ProblemId, RequestId, UserId};
    use parley_events::{Event, EventStream, InMemoryEventStream, Subscription};
    use tokio_util::sync::CancellationToken;

    use crate::manager::ManagerLoad;
    use crate::producer::InMemoryProducer;
    use crate::store::{
        ChatRepository, InMemoryStore, Message, MessageRepository, NewMessage, ProblemRepository,
    };

    pub struct Kit {
        pub store: InMemoryStore,
        pub stream: InMemoryEventStream,
        pub producer: Arc<InMemoryProducer>,
        pub load: ManagerLoad,
        cancel: CancellationToken,
    }

    pub struct Seeded {
        pub client: UserId,
        pub chat: ChatId,
        pub problem: ProblemId,
        pub message: Message,
    }

    impl Kit {
        pub fn new() -> Self {
            let store = InMemoryStore::new();
            Self {
                load: ManagerLoad::new(Arc::new(store.clone()), 2),
                store,
                stream: InMemoryEventStream::default(),
                producer: Arc::new(InMemoryProducer::new()),
                cancel: CancellationToken::new(),
            }
        }

        pub fn subscribe(&self, user_id: UserId) -> Subscription {
            self.stream
                .subscribe(user_id, self.cancel.child_token())
                .unwrap()
        }

        /// A client message in a fresh chat.
        pub async fn client_message(&self, body: &str) -> Seeded {
            let client = UserId::new();
            let chat = self.store.create_chat_if_not_exists(client).await.unwrap();
            let problem = self.store.create_problem_if_not_exists(chat).await.unwrap();
            let message = self
                .store
                .create_message(NewMessage::client_visible(
                    RequestId::new(),
                    problem,
                    chat,
                    client,
                    body,
                ))
                .await
                .unwrap();
            Seeded {
                client,
                chat,
                problem,
                message,
            }
        }

        /// Assign `seeded`'s problem to a new manager.
        pub async fn assign(&self, seeded: &Seeded) -> UserId {
            let manager = UserId::new();
            self.store
                .assign_manager(seeded.problem, manager)
                .await
                .unwrap();
            manager
        }
    }

    impl Drop for Kit {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    pub fn drain(sub: &mut Subscription) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = sub.try_recv() {
            events.push(event);
        }
        events
    }
}
