//! Announce a resolved problem to both sides.

use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{ChatId, MessageId, RequestId, UserId};
use parley_events::{ChatClosedEvent, EventStream, NewMessageEvent};

use super::{JobError, payload};
use crate::manager::ManagerLoad;
use crate::outbox::JobHandler;
use crate::store::{ChatRepository, MessageRepository, Store};

pub const NAME: &str = "close-chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    pub request_id: RequestId,
    pub chat_id: ChatId,
    pub manager_id: UserId,
    /// The closing service message.
    pub message_id: MessageId,
}

impl Payload {
    pub fn encode(&self) -> String {
        payload::join(&[
            &self.request_id,
            &self.chat_id,
            &self.manager_id,
            &self.message_id,
        ])
    }

    pub fn decode(raw: &str) -> Result<Self, JobError> {
        let [request_id, chat_id, manager_id, message_id] = payload::split::<4>(raw)?;
        Ok(Self {
            request_id: payload::parse(request_id)?,
            chat_id: payload::parse(chat_id)?,
            manager_id: payload::parse(manager_id)?,
            message_id: payload::parse(message_id)?,
        })
    }
}

pub struct CloseChat {
    store: Arc<dyn Store>,
    stream: Arc<dyn EventStream>,
    load: ManagerLoad,
}

impl CloseChat {
    pub fn new(store: Arc<dyn Store>, stream: Arc<dyn EventStream>, load: ManagerLoad) -> Self {
        Self {
            store,
            stream,
            load,
        }
    }
}

#[async_trait]
impl JobHandler for CloseChat {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn handle(&self, payload: &str) -> Result<(), JobError> {
        let p = Payload::decode(payload)?;

        let message = self.store.get_message_by_id(p.message_id).await?;
        let client_id = self.store.get_client_id(p.chat_id).await?;

        self.stream
            .publish(
                client_id,
                NewMessageEvent::new(
                    p.request_id,
                    p.chat_id,
                    message.id,
                    None,
                    message.created_at,
                    message.body.clone(),
                    message.is_service,
                )
                .into(),
            )
            .await?;

        let can_take = self.load.can_manager_take_problem(p.manager_id).await?;
        self.stream
            .publish(
                p.manager_id,
                ChatClosedEvent::new(p.request_id, p.chat_id, can_take).into(),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testkit::{Kit, drain};
    use crate::store::{MessageRepository, NewMessage, ProblemRepository, StoreError};
    use parley_events::Event;

    fn handler(kit: &Kit) -> CloseChat {
        CloseChat::new(
            Arc::new(kit.store.clone()),
            Arc::new(kit.stream.clone()),
            kit.load.clone(),
        )
    }

    #[tokio::test]
    async fn both_sides_hear_about_the_resolution() {
        let kit = Kit::new();
        let seeded = kit.client_message("thanks").await;
        let manager = kit.assign(&seeded).await;
        let request_id = RequestId::new();
        kit.store
            .resolve_problem(seeded.chat, manager, request_id)
            .await
            .unwrap();
        let closing = kit
            .store
            .create_message(NewMessage::service(
                request_id,
                seeded.problem,
                seeded.chat,
                "Your question has been marked as resolved.",
            ))
            .await
            .unwrap();
        let mut client_sub = kit.subscribe(seeded.client);
        let mut manager_sub = kit.subscribe(manager);

        let payload = Payload {
            request_id,
            chat_id: seeded.chat,
            manager_id: manager,
            message_id: closing.id,
        };
        handler(&kit).handle(&payload.encode()).await.unwrap();

        match drain(&mut client_sub).as_slice() {
            [Event::NewMessage(e)] => {
                assert_eq!(e.message_id, closing.id);
                assert_eq!(e.core.request_id, request_id);
                assert!(e.is_service);
            }
            other => panic!("unexpected events: {other:?}"),
        }
        match drain(&mut manager_sub).as_slice() {
            [Event::ChatClosed(e)] => {
                assert_eq!(e.chat_id, seeded.chat);
                assert!(e.can_take_more_problems);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_chat_fails() {
        let kit = Kit::new();
        let seeded = kit.client_message("x").await;
        let payload = Payload {
            request_id: RequestId::new(),
            chat_id: ChatId::new(),
            manager_id: UserId::new(),
            message_id: seeded.message.id,
        };
        let err = handler(&kit).handle(&payload.encode()).await.unwrap_err();
        assert!(matches!(err, JobError::Store(StoreError::ChatNotFound)));
    }

    #[test]
    fn payload_needs_four_parts() {
        assert!(matches!(
            Payload::decode(&format!("{}.{}", RequestId::new(), ChatId::new())),
            Err(JobError::Payload(_))
        ));
    }
}
