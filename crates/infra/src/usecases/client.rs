use std::sync::Arc;

use chrono::Utc;
use parley_core::{RequestId, UserId};
use tracing::{debug, info};

use super::history::{Page, PageRequest};
use super::{UseCaseError, validate_body, validate_user};
use crate::jobs::send_client_message;
use crate::outbox::Outbox;
use crate::store::{
    ChatRepository, Message, MessageRepository, NewMessage, ProblemRepository, Store, StoreError,
    Transactor, Tx,
};

pub struct ClientUseCases {
    store: Arc<dyn Store>,
    outbox: Arc<Outbox>,
}

impl ClientUseCases {
    pub fn new(store: Arc<dyn Store>, outbox: Arc<Outbox>) -> Self {
        Self { store, outbox }
    }

    /// Store a client message and schedule its delivery.
    ///
    /// Repeating a request id returns the message the first call created, also
    /// when the two calls race.
    pub async fn send_message(
        &self,
        client_id: UserId,
        request_id: RequestId,
        body: &str,
    ) -> Result<Message, UseCaseError> {
        validate_user(client_id)?;
        request_id.validate()?;
        validate_body(body)?;

        match self.accept(client_id, request_id, body).await {
            Err(UseCaseError::Store(StoreError::DuplicateRequest(_))) => {
                debug!(%client_id, %request_id, "request raced an identical one");
                Ok(self.store.get_message_by_request_id(request_id).await?)
            }
            other => other,
        }
    }

    /// One page of the client's chat, newest first.
    pub async fn get_history(
        &self,
        client_id: UserId,
        page: PageRequest,
    ) -> Result<Page, UseCaseError> {
        validate_user(client_id)?;
        let rows = self
            .store
            .client_chat_messages(client_id, page.from, page.fetch_limit())
            .await?;
        Ok(Page::cut(rows, &page))
    }

    async fn accept(
        &self,
        client_id: UserId,
        request_id: RequestId,
        body: &str,
    ) -> Result<Message, UseCaseError> {
        let tx = self.store.begin().await?;
        match tx.get_message_by_request_id(request_id).await {
            Ok(existing) => return Ok(existing),
            Err(StoreError::MessageNotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let chat_id = tx.create_chat_if_not_exists(client_id).await?;
        let problem_id = tx.create_problem_if_not_exists(chat_id).await?;
        let message = tx
            .create_message(NewMessage::client_visible(
                request_id, problem_id, chat_id, client_id, body,
            ))
            .await?;
        self.outbox
            .put(
                &*tx,
                send_client_message::NAME,
                &send_client_message::encode(message.id),
                Utc::now(),
            )
            .await?;
        tx.commit().await?;

        info!(%client_id, message_id = %message.id, %chat_id, "client message accepted");
        Ok(message)
    }
}
