//! Manager-side use cases.

use std::sync::Arc;

use chrono::Utc;
use parley_core::{ChatId, RequestId, UserId};
use tracing::{debug, info};

use super::history::{Page, PageRequest};
use super::{UseCaseError, validate_body, validate_user};
use crate::jobs::{close_chat, send_manager_message};
use crate::manager::{ManagerLoad, ManagerPool};
use crate::outbox::Outbox;
use crate::store::{
    Chat, ChatRepository, Message, MessageRepository, NewMessage, ProblemRepository, Store,
    StoreError, Transactor, Tx,
};

pub const CHAT_CLOSED_NOTICE: &str =
    "Your question has been marked as resolved.\nThank you for being with us!";

pub struct ManagerUseCases {
    store: Arc<dyn Store>,
    outbox: Arc<Outbox>,
    pool: Arc<ManagerPool>,
    load: ManagerLoad,
}

impl ManagerUseCases {
    pub fn new(
        store: Arc<dyn Store>,
        outbox: Arc<Outbox>,
        pool: Arc<ManagerPool>,
        load: ManagerLoad,
    ) -> Self {
        Self {
            store,
            outbox,
            pool,
            load,
        }
    }

    /// Whether the free-hands button should be offered: the manager is not
    /// queued yet and still has capacity.
    pub async fn can_receive_problems(&self, manager_id: UserId) -> Result<bool, UseCaseError> {
        validate_user(manager_id)?;
        if self.pool.contains(manager_id) {
            return Ok(false);
        }
        Ok(self.load.can_manager_take_problem(manager_id).await?)
    }

    /// Queue the manager for the next assignment.
    pub async fn free_hands(&self, manager_id: UserId) -> Result<(), UseCaseError> {
        validate_user(manager_id)?;
        if !self.load.can_manager_take_problem(manager_id).await? {
            return Err(UseCaseError::ManagerOverloaded);
        }
        self.pool.put(manager_id)?;
        info!(%manager_id, "manager is ready for problems");
        Ok(())
    }

    /// Reply in a chat whose open problem the manager owns.
    ///
    /// Ownership is checked in the same transaction as the insert. Repeating a
    /// request id returns the first reply.
    pub async fn send_message(
        &self,
        manager_id: UserId,
        request_id: RequestId,
        chat_id: ChatId,
        body: &str,
    ) -> Result<Message, UseCaseError> {
        validate_user(manager_id)?;
        request_id.validate()?;
        chat_id.validate()?;
        validate_body(body)?;

        match self.reply(manager_id, request_id, chat_id, body).await {
            Err(UseCaseError::Store(StoreError::DuplicateRequest(_))) => {
                debug!(%manager_id, %request_id, "request raced an identical one");
                Ok(self.store.get_message_by_request_id(request_id).await?)
            }
            other => other,
        }
    }

    async fn reply(
        &self,
        manager_id: UserId,
        request_id: RequestId,
        chat_id: ChatId,
        body: &str,
    ) -> Result<Message, UseCaseError> {
        let tx = self.store.begin().await?;
        match tx.get_message_by_request_id(request_id).await {
            Ok(existing) => return Ok(existing),
            Err(StoreError::MessageNotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let problem_id = match tx.assigned_problem_id(manager_id, chat_id).await {
            Ok(id) => id,
            Err(StoreError::ProblemNotFound) => return Err(UseCaseError::NoActiveProblem),
            Err(e) => return Err(e.into()),
        };
        let message = tx
            .create_message(NewMessage::full_visible(
                request_id, problem_id, chat_id, manager_id, body,
            ))
            .await?;
        let payload = send_manager_message::Payload {
            message_id: message.id,
            manager_id,
        };
        self.outbox
            .put(&*tx, send_manager_message::NAME, &payload.encode(), Utc::now())
            .await?;
        tx.commit().await?;

        Ok(message)
    }

    /// Chats the manager is working on.
    pub async fn get_chats(&self, manager_id: UserId) -> Result<Vec<Chat>, UseCaseError> {
        validate_user(manager_id)?;
        Ok(self.store.chats_of_manager(manager_id).await?)
    }

    /// One page of a chat the manager owns, newest first. Chats owned by
    /// someone else read as empty.
    pub async fn get_chat_history(
        &self,
        manager_id: UserId,
        chat_id: ChatId,
        page: PageRequest,
    ) -> Result<Page, UseCaseError> {
        validate_user(manager_id)?;
        chat_id.validate()?;
        let rows = self
            .store
            .manager_chat_messages(manager_id, chat_id, page.from, page.fetch_limit())
            .await?;
        Ok(Page::cut(rows, &page))
    }

    /// Resolve the manager's open problem in `chat_id`.
    pub async fn close_chat(
        &self,
        manager_id: UserId,
        request_id: RequestId,
        chat_id: ChatId,
    ) -> Result<(), UseCaseError> {
        validate_user(manager_id)?;
        request_id.validate()?;
        chat_id.validate()?;

        let tx = self.store.begin().await?;
        let problem_id = match tx.resolve_problem(chat_id, manager_id, request_id).await {
            Ok(id) => id,
            Err(StoreError::ProblemNotFound) => return Err(UseCaseError::NoActiveProblem),
            Err(e) => return Err(e.into()),
        };
        let notice = tx
            .create_message(NewMessage::service(
                request_id,
                problem_id,
                chat_id,
                CHAT_CLOSED_NOTICE,
            ))
            .await?;
        let payload = close_chat::Payload {
            request_id,
            chat_id,
            manager_id,
            message_id: notice.id,
        };
        self.outbox
            .put(&*tx, close_chat::NAME, &payload.encode(), Utc::now())
            .await?;
        tx.commit().await?;

        info!(%manager_id, %chat_id, %problem_id, "chat closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::OutboxSettings;
    use crate::store::InMemoryStore;
    use parley_core::ProblemId;

    struct Fixture {
        store: InMemoryStore,
        pool: Arc<ManagerPool>,
        uc: ManagerUseCases,
    }

    fn fixture(max_problems: usize) -> Fixture {
        let store = InMemoryStore::new();
        let pool = Arc::new(ManagerPool::default());
        let outbox = Arc::new(Outbox::new(Arc::new(store.clone()), OutboxSettings::default()));
        let load = ManagerLoad::new(Arc::new(store.clone()), max_problems);
        let uc = ManagerUseCases::new(Arc::new(store.clone()), outbox, Arc::clone(&pool), load);
        Fixture { store, pool, uc }
    }

    async fn assigned_chat(store: &InMemoryStore, manager: UserId) -> (ChatId, ProblemId) {
        let chat = store.create_chat_if_not_exists(UserId::new()).await.unwrap();
        let problem = store.create_problem_if_not_exists(chat).await.unwrap();
        store.assign_manager(problem, manager).await.unwrap();
        (chat, problem)
    }

    #[tokio::test]
    async fn free_hands_queues_the_manager_once() {
        let f = fixture(1);
        let manager = UserId::new();

        assert!(f.uc.can_receive_problems(manager).await.unwrap());
        f.uc.free_hands(manager).await.unwrap();
        f.uc.free_hands(manager).await.unwrap();

        assert_eq!(f.pool.size(), 1);
        assert!(!f.uc.can_receive_problems(manager).await.unwrap());
    }

    #[tokio::test]
    async fn overloaded_manager_cannot_free_hands() {
        let f = fixture(1);
        let manager = UserId::new();
        assigned_chat(&f.store, manager).await;

        assert!(matches!(
            f.uc.free_hands(manager).await,
            Err(UseCaseError::ManagerOverloaded)
        ));
        assert!(!f.pool.contains(manager));
    }

    #[tokio::test]
    async fn reply_requires_ownership() {
        let f = fixture(5);
        let manager = UserId::new();
        let (chat, problem) = assigned_chat(&f.store, manager).await;

        let msg = f
            .uc
            .send_message(manager, RequestId::new(), chat, "on it")
            .await
            .unwrap();
        assert_eq!(msg.problem_id, problem);
        assert!(msg.is_visible_for_client && msg.is_visible_for_manager);
        assert_eq!(f.store.jobs().await[0].name, send_manager_message::NAME);

        let err = f
            .uc
            .send_message(UserId::new(), RequestId::new(), chat, "me too")
            .await
            .unwrap_err();
        assert!(matches!(err, UseCaseError::NoActiveProblem));
    }

    #[tokio::test]
    async fn reply_sees_a_close_committed_while_it_waited() {
        let f = fixture(5);
        let manager = UserId::new();
        let (chat, problem) = assigned_chat(&f.store, manager).await;

        let closing = f.store.begin().await.unwrap();
        let uc = Arc::new(f.uc);
        let reply = tokio::spawn({
            let uc = Arc::clone(&uc);
            async move {
                uc.send_message(manager, RequestId::new(), chat, "still there?")
                    .await
            }
        });
        tokio::task::yield_now().await;
        closing
            .resolve_problem(chat, manager, RequestId::new())
            .await
            .unwrap();
        closing.commit().await.unwrap();

        let err = reply.await.unwrap().unwrap_err();
        assert!(matches!(err, UseCaseError::NoActiveProblem));
        assert!(!f.store.problem(problem).await.unwrap().is_open());
        assert!(f.store.messages().await.is_empty());
        assert!(f.store.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn repeated_reply_is_idempotent() {
        let f = fixture(5);
        let manager = UserId::new();
        let (chat, _) = assigned_chat(&f.store, manager).await;
        let request = RequestId::new();

        let first = f.uc.send_message(manager, request, chat, "on it").await.unwrap();
        f.store.faults().await.miss_request_lookups(1);
        let second = f.uc.send_message(manager, request, chat, "on it").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(f.store.jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn chats_and_history_follow_ownership() {
        let f = fixture(5);
        let manager = UserId::new();
        let (chat, _) = assigned_chat(&f.store, manager).await;
        let (foreign, _) = assigned_chat(&f.store, UserId::new()).await;

        let chats = f.uc.get_chats(manager).await.unwrap();
        assert_eq!(chats.iter().map(|c| c.id).collect::<Vec<_>>(), vec![chat]);

        let reply = f
            .uc
            .send_message(manager, RequestId::new(), chat, "on it")
            .await
            .unwrap();
        let page = f
            .uc
            .get_chat_history(manager, chat, PageRequest::first(10).unwrap())
            .await
            .unwrap();
        assert_eq!(page.messages.iter().map(|m| m.id).collect::<Vec<_>>(), vec![reply.id]);
        assert_eq!(page.next, None);

        let other = f
            .uc
            .get_chat_history(manager, foreign, PageRequest::first(10).unwrap())
            .await
            .unwrap();
        assert!(other.messages.is_empty());

        f.uc.close_chat(manager, RequestId::new(), chat).await.unwrap();
        assert!(f.uc.get_chats(manager).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_chat_resolves_and_schedules_notice() {
        let f = fixture(5);
        let manager = UserId::new();
        let (chat, problem) = assigned_chat(&f.store, manager).await;
        let request = RequestId::new();

        f.uc.close_chat(manager, request, chat).await.unwrap();

        let resolved = f.store.problem(problem).await.unwrap();
        assert!(!resolved.is_open());
        assert_eq!(resolved.resolve_request_id, Some(request));

        let jobs = f.store.jobs().await;
        assert_eq!(jobs.len(), 1);
        let payload = close_chat::Payload::decode(&jobs[0].payload).unwrap();
        assert_eq!(payload.chat_id, chat);
        assert_eq!(payload.manager_id, manager);

        assert!(matches!(
            f.uc.close_chat(manager, RequestId::new(), chat).await,
            Err(UseCaseError::NoActiveProblem)
        ));
    }
}
