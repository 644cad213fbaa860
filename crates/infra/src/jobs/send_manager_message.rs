//! Forward a manager reply to the broker and show it to both sides.

use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{MessageId, UserId};
use parley_events::{EventStream, MessageSentEvent, NewMessageEvent};

use super::{JobError, payload};
use crate::outbox::JobHandler;
use crate::producer::{MessageProducer, OutboundMessage};
use crate::store::{ChatRepository, MessageRepository, Store};

pub const NAME: &str = "send-manager-message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    pub message_id: MessageId,
    pub manager_id: UserId,
}

impl Payload {
    pub fn encode(&self) -> String {
        payload::join(&[&self.message_id, &self.manager_id])
    }

    pub fn decode(raw: &str) -> Result<Self, JobError> {
        let [message_id, manager_id] = payload::split::<2>(raw)?;
        Ok(Self {
            message_id: payload::parse(message_id)?,
            manager_id: payload::parse(manager_id)?,
        })
    }
}

pub struct SendManagerMessage {
    store: Arc<dyn Store>,
    stream: Arc<dyn EventStream>,
    producer: Arc<dyn MessageProducer>,
}

impl SendManagerMessage {
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
impl JobHandler for SendManagerMessage {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn handle(&self, payload: &str) -> Result<(), JobError> {
        let Payload {
            message_id,
            manager_id,
        } = Payload::decode(payload)?;

        let message = self.store.get_message_by_id(message_id).await?;
        self.producer
            .produce_message(OutboundMessage {
                id: message.id,
                chat_id: message.chat_id,
                body: message.body.clone(),
                from_client: false,
            })
            .await?;

        let client_id = self.store.get_client_id(message.chat_id).await?;
        let event = NewMessageEvent::new(
            message.initial_request_id,
            message.chat_id,
            message.id,
            Some(manager_id),
            message.created_at,
            message.body.clone(),
            false,
        );

        self.stream.publish(client_id, event.clone().into()).await?;
        self.stream.publish(manager_id, event.into()).await?;
        self.stream
            .publish(
                manager_id,
                MessageSentEvent::new(message.initial_request_id, message.id).into(),
            )
            .await?;
        Ok(())
    }
}
