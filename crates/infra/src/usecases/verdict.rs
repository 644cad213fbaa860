//! Applying the content screen's ruling on a client message.

use std::sync::Arc;

use chrono::Utc;
use parley_core::MessageId;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::UseCaseError;
use crate::jobs::{client_message_blocked, client_message_sent};
use crate::outbox::Outbox;
use crate::store::{MessageRepository, Store, StoreError, Transactor, Tx};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Ok,
    Suspicious,
}

pub struct VerdictUseCase {
    store: Arc<dyn Store>,
    outbox: Arc<Outbox>,
}

impl VerdictUseCase {
    pub fn new(store: Arc<dyn Store>, outbox: Arc<Outbox>) -> Self {
        Self { store, outbox }
    }

    /// Release the message to the manager side or block it, and schedule the
    /// matching notification.
    pub async fn apply(&self, message_id: MessageId, verdict: Verdict) -> Result<(), UseCaseError> {
        message_id.validate()?;

        let tx = self.store.begin().await?;
        let (job, payload) = match verdict {
            Verdict::Ok => (
                client_message_sent::NAME,
                client_message_sent::encode(message_id),
            ),
            Verdict::Suspicious => (
                client_message_blocked::NAME,
                client_message_blocked::encode(message_id),
            ),
        };
        let marked = match verdict {
            Verdict::Ok => tx.mark_as_visible_for_manager(message_id).await,
            Verdict::Suspicious => tx.block_message(message_id).await,
        };
        match marked {
            Ok(()) => {}
            Err(StoreError::MessageNotFound) => return Err(UseCaseError::MessageNotFound),
            Err(e) => return Err(e.into()),
        }
        self.outbox.put(&*tx, job, &payload, Utc::now()).await?;
        tx.commit().await?;

        info!(%message_id, ?verdict, "verdict applied");
        Ok(())
    }
}
