//! Forward a client message to the broker and echo it back to its author.

use std::sync::Arc;

use async_trait::async_trait;
use parley_core::MessageId;
use parley_events::EventStream;
use tracing::debug;

use super::{JobError, new_message_event, payload};
use crate::outbox::JobHandler;
use crate::producer::{MessageProducer, OutboundMessage};
use crate::store::{MessageRepository, Store};

pub const NAME: &str = "send-client-message";

pub fn encode(message_id: MessageId) -> String {
    message_id.to_string()
}

pub struct SendClientMessage {
    store: Arc<dyn Store>,
    stream: Arc<dyn EventStream>,
    producer: Arc<dyn MessageProducer>,
}

impl SendClientMessage {
    pub fn new(
        store: Arc<dyn Store>,
        stream: Arc<dyn EventStream>,
        producer: Arc<dyn MessageProducer>,
    ) -> Self {
        Self {
            store,
            stream,
            producer,
        }
    }
}

#[async_trait]
impl JobHandler for SendClientMessage {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn handle(&self, payload: &str) -> Result<(), JobError> {
        let message_id: MessageId = payload::parse(payload)?;
        let message = self.store.get_message_by_id(message_id).await?;
        let author = message.author_id.ok_or(JobError::MissingAuthor(message.id))?;

        self.producer
            .produce_message(OutboundMessage {
                id: message.id,
                chat_id: message.chat_id,
                body: message.body.clone(),
                from_client: true,
            })
            .await?;

        self.stream
            .publish(author, new_message_event(&message).into())
            .await?;

        debug!(%message_id, user_id = %author, "client message sent out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testkit::{Kit, drain};
    use crate::store::StoreError;
    use parley_events::Event;

    fn handler(kit: &Kit) -> SendClientMessage {
        SendClientMessage::new(
            Arc::new(kit.store.clone()),
            Arc::new(kit.stream.clone()),
            kit.producer.clone(),
        )
    }

    #[tokio::test]
    async fn produces_and_echoes_to_the_author() {
        let kit = Kit::new();
        let seeded = kit.client_message("hello").await;
        let mut sub = kit.subscribe(seeded.client);

        handler(&kit).handle(&encode(seeded.message.id)).await.unwrap();

        let produced = kit.producer.produced();
        assert_eq!(produced.len(), 1);
        assert!(produced[0].from_client);
        assert_eq!(produced[0].chat_id, seeded.chat);
        assert_eq!(produced[0].body, "hello");

        let events = drain(&mut sub);
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::NewMessage(e) => {
                assert_eq!(e.message_id, seeded.message.id);
                assert_eq!(e.author_id, Some(seeded.client));
                assert_eq!(e.core.request_id, seeded.message.initial_request_id);
                assert!(!e.is_service);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_message_fails_without_side_effects() {
        let kit = Kit::new();
        let err = handler(&kit)
            .handle(&encode(MessageId::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Store(StoreError::MessageNotFound)));
        assert!(kit.producer.produced().is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_an_error() {
        let kit = Kit::new();
        let err = handler(&kit).handle("not-an-id").await.unwrap_err();
        assert!(matches!(err, JobError::Payload(_)));
    }
}
