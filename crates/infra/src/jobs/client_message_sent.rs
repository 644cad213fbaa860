//! Tell the author the message passed screening and show it to the manager.

use std::sync::Arc;

use async_trait::async_trait;
use parley_core::MessageId;
use parley_events::{EventStream, MessageSentEvent};

use super::{JobError, new_message_event, payload};
use crate::outbox::JobHandler;
use crate::store::{MessageRepository, ProblemRepository, Store};

pub const NAME: &str = "client-message-sent";

pub fn encode(message_id: MessageId) -> String {
    message_id.to_string()
}

pub struct ClientMessageSent {
    store: Arc<dyn Store>,
    stream: Arc<dyn EventStream>,
}

impl ClientMessageSent {
    pub fn new(store: Arc<dyn Store>, stream: Arc<dyn EventStream>) -> Self {
        Self { store, stream }
    }
}

#[async_trait]
impl JobHandler for ClientMessageSent {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn handle(&self, payload: &str) -> Result<(), JobError> {
        let message_id: MessageId = payload::parse(payload)?;
        let message = self.store.get_message_by_id(message_id).await?;
        let author = message.author_id.ok_or(JobError::MissingAuthor(message.id))?;
        let manager = self.store.active_manager(message.chat_id).await?;

        let to_author = self.stream.publish(
            author,
            MessageSentEvent::new(message.initial_request_id, message.id).into(),
        );
        let to_manager = async {
            match manager {
                Some(manager_id) => {
                    self.stream
                        .publish(manager_id, new_message_event(&message).into())
                        .await
                }
                None => Ok(()),
            }
        };

        futures::try_join!(to_author, to_manager)?;
        Ok(())
    }
}
