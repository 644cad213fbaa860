use std::sync::Arc;

use async_trait::async_trait;
use parley_core::MessageId;
use parley_events::{EventStream, MessageBlockedEvent};

use super::{JobError, payload};
use crate::outbox::JobHandler;
use crate::store::{MessageRepository, Store};

pub const NAME: &str = "client-message-blocked";

pub fn encode(message_id: MessageId) -> String {
    message_id.to_string()
}

/// Tell the author the content screen rejected the message.
pub struct ClientMessageBlocked {
    store: Arc<dyn Store>,
    stream: Arc<dyn EventStream>,
}

impl ClientMessageBlocked {
    pub fn new(store: Arc<dyn Store>, stream: Arc<dyn EventStream>) -> Self {
        Self { store, stream }
    }
}

#[async_trait]
impl JobHandler for ClientMessageBlocked {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn handle(&self, payload: &str) -> Result<(), JobError> {
        let message_id: MessageId = payload::parse(payload)?;
        let message = self.store.get_message_by_id(message_id).await?;
        let author = message.author_id.ok_or(JobError::MissingAuthor(message.id))?;

        self.stream
            .publish(
                author,
                MessageBlockedEvent::new(message.initial_request_id, message.id).into(),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testkit::{Kit, drain};
    use crate::store::StoreError;
    use parley_events::Event;

    #[tokio::test]
    async fn author_learns_about_the_block() {
        let kit = Kit::new();
        let seeded = kit.client_message("card 4242 4242 4242 4242").await;
        let mut sub = kit.subscribe(seeded.client);
        let handler =
            ClientMessageBlocked::new(Arc::new(kit.store.clone()), Arc::new(kit.stream.clone()));

        handler.handle(&encode(seeded.message.id)).await.unwrap();

        let events = drain(&mut sub);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::MessageBlocked(e) if e.message_id == seeded.message.id));
    }

    #[tokio::test]
    async fn unknown_message_fails() {
        let kit = Kit::new();
        let handler =
            ClientMessageBlocked::new(Arc::new(kit.store.clone()), Arc::new(kit.stream.clone()));
        let err = handler.handle(&encode(MessageId::new())).await.unwrap_err();
        assert!(matches!(err, JobError::Store(StoreError::MessageNotFound)));
    }
}
