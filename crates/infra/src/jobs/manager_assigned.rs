//! Announce a fresh assignment: the client sees the scheduler's service
//! message, the manager gets the chat.

use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{MessageId, UserId};
use parley_events::{EventStream, NewChatEvent, NewMessageEvent};
use tracing::debug;

use super::{JobError, payload};
use crate::manager::ManagerLoad;
use crate::outbox::JobHandler;
use crate::store::{ChatRepository, MessageRepository, Store};

pub const NAME: &str = "manager-assigned-to-problem";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    /// The service message announcing the assignment.
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

pub struct ManagerAssigned {
    store: Arc<dyn Store>,
    stream: Arc<dyn EventStream>,
    load: ManagerLoad,
}

impl ManagerAssigned {
    pub fn new(store: Arc<dyn Store>, stream: Arc<dyn EventStream>, load: ManagerLoad) -> Self {
        Self {
            store,
            stream,
            load,
        }
    }
}

#[async_trait]
impl JobHandler for ManagerAssigned {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn handle(&self, payload: &str) -> Result<(), JobError> {
        let Payload {
            message_id,
            manager_id,
        } = Payload::decode(payload)?;

        let message = self.store.get_message_by_id(message_id).await?;
        let client_id = self.store.get_client_id(message.chat_id).await?;

        self.stream
            .publish(
                client_id,
                NewMessageEvent::new(
                    message.initial_request_id,
                    message.chat_id,
                    message.id,
                    None,
                    message.created_at,
                    message.body.clone(),
                    true,
                )
                .into(),
            )
            .await?;

        let can_take = self.load.can_manager_take_problem(manager_id).await?;
        self.stream
            .publish(
                manager_id,
                NewChatEvent::new(message.initial_request_id, message.chat_id, client_id, can_take)
                    .into(),
            )
            .await?;

        debug!(%manager_id, chat_id = %message.chat_id, can_take, "assignment announced");
        Ok(())
    }
}
