//! In-memory store for tests/dev.
//!
//! A transaction takes the store's async lock for its whole lifetime and works
//! on a copy of the state; `commit` swaps the copy in, dropping discards it.
//! Transactions are therefore fully serialised, which also makes job
//! reservation trivially exclusive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::{ChatId, FailedJobId, JobId, MessageId, ProblemId, RequestId, UserId};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::models::{Chat, HistoryPosition, Message, MessageKind, NewMessage, Problem};
use super::{
    ChatRepository, JobRepository, MessageRepository, ProblemRepository, StoreError, StoreResult,
    Transactor, Tx,
};
use crate::outbox::{FailReason, FailedJob, Job};

#[derive(Debug, Clone, Default)]
struct StoreState {
    jobs: HashMap<JobId, Job>,
    failed_jobs: Vec<FailedJob>,
    chats: HashMap<ChatId, Chat>,
    problems: HashMap<ProblemId, Problem>,
    messages: HashMap<MessageId, Message>,
    #[cfg(test)]
    faults: Arc<faults::Faults>,
}

impl StoreState {
    fn create_job(
        &mut self,
        name: &str,
        payload: &str,
        available_at: DateTime<Utc>,
    ) -> StoreResult<JobId> {
        #[cfg(test)]
        self.faults.on_create_job()?;

        let job = Job::new(name, payload, available_at);
        let id = job.id;
        self.jobs.insert(id, job);
        Ok(id)
    }

    fn find_and_reserve_job(&mut self, until: DateTime<Utc>) -> Option<Job> {
        let now = Utc::now();
        let job = self
            .jobs
            .values_mut()
            .filter(|j| j.is_eligible(now))
            .min_by_key(|j| (j.available_at, *j.id.as_uuid()))?;
        job.reserve(until);
        Some(job.clone())
    }

    fn create_failed_job(&mut self, name: &str, payload: &str, reason: FailReason) -> FailedJobId {
        let failed = FailedJob::new(name, payload, reason);
        let id = failed.id;
        self.failed_jobs.push(failed);
        id
    }

    fn delete_job(&mut self, id: JobId) -> StoreResult<()> {
        self.jobs
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::JobNotFound(id))
    }

    fn list_failed_jobs(&self, limit: usize) -> Vec<FailedJob> {
        self.failed_jobs.iter().rev().take(limit).cloned().collect()
    }

    fn get_message_by_id(&self, id: MessageId) -> StoreResult<Message> {
        self.messages
            .get(&id)
            .cloned()
            .ok_or(StoreError::MessageNotFound)
    }

    fn get_message_by_request_id(&self, request_id: RequestId) -> StoreResult<Message> {
        #[cfg(test)]
        if self.faults.take_request_lookup_miss() {
            return Err(StoreError::MessageNotFound);
        }

        self.messages
            .values()
            .filter(|m| m.initial_request_id == request_id && !m.is_service)
            .min_by_key(|m| m.created_at)
            .cloned()
            .ok_or(StoreError::MessageNotFound)
    }

    fn create_message(&mut self, new: NewMessage) -> StoreResult<Message> {
        let duplicate = new.kind != MessageKind::Service
            && self
                .messages
                .values()
                .any(|m| m.initial_request_id == new.request_id && !m.is_service);
        if duplicate {
            return Err(StoreError::DuplicateRequest(new.request_id));
        }

        let message = new.into_message(Utc::now());
        self.messages.insert(message.id, message.clone());
        Ok(message)
    }

    fn history(
        &self,
        from: Option<HistoryPosition>,
        limit: usize,
        keep: impl Fn(&Message) -> bool,
    ) -> Vec<Message> {
        let mut messages: Vec<&Message> = self
            .messages
            .values()
            .filter(|m| keep(m))
            .filter(|m| from.is_none_or(|pos| pos.precedes(m)))
            .collect();
        messages.sort_by_key(|m| std::cmp::Reverse((m.created_at, *m.id.as_uuid())));
        messages.into_iter().take(limit).cloned().collect()
    }

    fn client_chat_messages(
        &self,
        client_id: UserId,
        from: Option<HistoryPosition>,
        limit: usize,
    ) -> Vec<Message> {
        let Some(chat) = self.chats.values().find(|c| c.client_id == client_id) else {
            return Vec::new();
        };
        self.history(from, limit, |m| m.chat_id == chat.id && m.is_visible_for_client)
    }

    fn manager_chat_messages(
        &self,
        manager_id: UserId,
        chat_id: ChatId,
        from: Option<HistoryPosition>,
        limit: usize,
    ) -> Vec<Message> {
        self.history(from, limit, |m| {
            m.chat_id == chat_id
                && m.is_visible_for_manager
                && !m.is_service
                && !m.is_blocked
                && self
                    .problems
                    .get(&m.problem_id)
                    .is_some_and(|p| p.manager_id == Some(manager_id) && p.is_open())
        })
    }

    fn update_message(
        &mut self,
        id: MessageId,
        apply: impl FnOnce(&mut Message),
    ) -> StoreResult<()> {
        let message = self
            .messages
            .get_mut(&id)
            .ok_or(StoreError::MessageNotFound)?;
        apply(message);
        Ok(())
    }

    fn create_chat_if_not_exists(&mut self, client_id: UserId) -> ChatId {
        if let Some(chat) = self.chats.values().find(|c| c.client_id == client_id) {
            return chat.id;
        }
        let chat = Chat {
            id: ChatId::new(),
            client_id,
            created_at: Utc::now(),
        };
        let id = chat.id;
        self.chats.insert(id, chat);
        id
    }

    fn get_client_id(&self, chat_id: ChatId) -> StoreResult<UserId> {
        self.chats
            .get(&chat_id)
            .map(|c| c.client_id)
            .ok_or(StoreError::ChatNotFound)
    }

    fn chats_of_manager(&self, manager_id: UserId) -> Vec<Chat> {
        let mut chats: Vec<Chat> = self
            .chats
            .values()
            .filter(|c| {
                self.open_problem_of(c.id)
                    .is_some_and(|p| p.manager_id == Some(manager_id))
            })
            .cloned()
            .collect();
        chats.sort_by_key(|c| (c.created_at, *c.id.as_uuid()));
        chats
    }

    fn open_problem_of(&self, chat_id: ChatId) -> Option<&Problem> {
        self.problems
            .values()
            .find(|p| p.chat_id == chat_id && p.is_open())
    }

    fn create_problem_if_not_exists(&mut self, chat_id: ChatId) -> StoreResult<ProblemId> {
        if !self.chats.contains_key(&chat_id) {
            return Err(StoreError::ChatNotFound);
        }
        if let Some(problem) = self.open_problem_of(chat_id) {
            return Ok(problem.id);
        }
        let problem = Problem {
            id: ProblemId::new(),
            chat_id,
            manager_id: None,
            resolved_at: None,
            resolve_request_id: None,
            created_at: Utc::now(),
        };
        let id = problem.id;
        self.problems.insert(id, problem);
        Ok(id)
    }

    fn manager_open_problems_count(&self, manager_id: UserId) -> usize {
        self.problems
            .values()
            .filter(|p| p.manager_id == Some(manager_id) && p.is_open())
            .count()
    }

    fn problems_without_manager(&self) -> Vec<Problem> {
        let mut problems: Vec<Problem> = self
            .problems
            .values()
            .filter(|p| p.manager_id.is_none() && p.is_open())
            .filter(|p| {
                self.messages
                    .values()
                    .any(|m| m.problem_id == p.id && m.is_visible_for_manager)
            })
            .cloned()
            .collect();
        problems.sort_by_key(|p| (p.created_at, *p.id.as_uuid()));
        problems
    }

    fn assign_manager(&mut self, problem_id: ProblemId, manager_id: UserId) -> StoreResult<()> {
        let problem = self
            .problems
            .get_mut(&problem_id)
            .ok_or(StoreError::ProblemNotFound)?;
        problem.manager_id = Some(manager_id);
        Ok(())
    }

    fn problem_request_id(&self, problem_id: ProblemId) -> StoreResult<RequestId> {
        self.messages
            .values()
            .filter(|m| m.problem_id == problem_id)
            .min_by_key(|m| (m.created_at, *m.id.as_uuid()))
            .map(|m| m.initial_request_id)
            .ok_or(StoreError::ProblemNotFound)
    }

    fn active_manager(&self, chat_id: ChatId) -> Option<UserId> {
        self.open_problem_of(chat_id).and_then(|p| p.manager_id)
    }

    fn assigned_problem_id(&self, manager_id: UserId, chat_id: ChatId) -> StoreResult<ProblemId> {
        self.open_problem_of(chat_id)
            .filter(|p| p.manager_id == Some(manager_id))
            .map(|p| p.id)
            .ok_or(StoreError::ProblemNotFound)
    }

    fn resolve_problem(
        &mut self,
        chat_id: ChatId,
        manager_id: UserId,
        request_id: RequestId,
    ) -> StoreResult<ProblemId> {
        let id = self.assigned_problem_id(manager_id, chat_id)?;
        let problem = self
            .problems
            .get_mut(&id)
            .ok_or(StoreError::ProblemNotFound)?;
        problem.resolved_at = Some(Utc::now());
        problem.resolve_request_id = Some(request_id);
        Ok(id)
    }
}

/// Shared in-memory store. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<AsyncMutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Snapshot of the active jobs (test/debug helper).
    pub async fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.state.lock().await.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| *j.id.as_uuid());
        jobs
    }

    /// Snapshot of a problem (test/debug helper).
    pub async fn problem(&self, id: ProblemId) -> Option<Problem> {
        self.state.lock().await.problems.get(&id).cloned()
    }

    /// Snapshot of every message, oldest first (test/debug helper).
    pub async fn messages(&self) -> Vec<Message> {
        let mut messages: Vec<Message> =
            self.state.lock().await.messages.values().cloned().collect();
        messages.sort_by_key(|m| (m.created_at, *m.id.as_uuid()));
        messages
    }

    #[cfg(test)]
    pub(crate) async fn faults(&self) -> Arc<faults::Faults> {
        Arc::clone(&self.state.lock().await.faults)
    }

    #[cfg(test)]
    async fn seed_for_test(&self, edit: impl FnOnce(&mut StoreState)) {
        edit(&mut *self.state.lock().await);
    }
}

/// Open transaction over an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemoryTx {
    inner: Mutex<TxState>,
}

#[derive(Debug)]
struct TxState {
    committed: OwnedMutexGuard<StoreState>,
    working: StoreState,
}

impl InMemoryTx {
    fn state(&self) -> MutexGuard<'_, TxState> {
        // Critical sections are synchronous and never panic.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl Transactor for InMemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn Tx>> {
        let committed = Arc::clone(&self.state).lock_owned().await;
        let working = committed.clone();
        Ok(Box::new(InMemoryTx {
            inner: Mutex::new(TxState { committed, working }),
        }))
    }
}

#[async_trait]
impl Tx for InMemoryTx {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let TxState {
            mut committed,
            working,
        } = self.inner.into_inner().unwrap_or_else(|p| p.into_inner());
        *committed = working;
        Ok(())
    }
}

// The same repository surface is implemented for the auto-commit store and for
// an open transaction; only the way to reach `StoreState` differs.
macro_rules! impl_repositories {
    ($t:ty, |$this:ident| $state:expr) => {
        #[async_trait]
        impl JobRepository for $t {
            async fn create_job(
                &self,
                name: &str,
                payload: &str,
                available_at: DateTime<Utc>,
            ) -> StoreResult<JobId> {
                let $this = self;
                $state.create_job(name, payload, available_at)
            }

            async fn find_and_reserve_job(&self, until: DateTime<Utc>) -> StoreResult<Option<Job>> {
                let $this = self;
                Ok($state.find_and_reserve_job(until))
            }

            async fn create_failed_job(
                &self,
                name: &str,
                payload: &str,
                reason: FailReason,
            ) -> StoreResult<FailedJobId> {
                let $this = self;
                Ok($state.create_failed_job(name, payload, reason))
            }

            async fn delete_job(&self, id: JobId) -> StoreResult<()> {
                let $this = self;
                $state.delete_job(id)
            }

            async fn list_failed_jobs(&self, limit: usize) -> StoreResult<Vec<FailedJob>> {
                let $this = self;
                Ok($state.list_failed_jobs(limit))
            }
        }

        #[async_trait]
        impl MessageRepository for $t {
            async fn get_message_by_id(&self, id: MessageId) -> StoreResult<Message> {
                let $this = self;
                $state.get_message_by_id(id)
            }

            async fn get_message_by_request_id(
                &self,
                request_id: RequestId,
            ) -> StoreResult<Message> {
                let $this = self;
                $state.get_message_by_request_id(request_id)
            }

            async fn create_message(&self, message: NewMessage) -> StoreResult<Message> {
                let $this = self;
                $state.create_message(message)
            }

            async fn mark_as_visible_for_manager(&self, id: MessageId) -> StoreResult<()> {
                let $this = self;
                $state.update_message(id, |m| {
                    m.is_visible_for_manager = true;
                    m.checked_at = Some(Utc::now());
                })
            }

            async fn block_message(&self, id: MessageId) -> StoreResult<()> {
                let $this = self;
                $state.update_message(id, |m| {
                    m.is_blocked = true;
                    m.checked_at = Some(Utc::now());
                })
            }

            async fn client_chat_messages(
                &self,
                client_id: UserId,
                from: Option<HistoryPosition>,
                limit: usize,
            ) -> StoreResult<Vec<Message>> {
                let $this = self;
                Ok($state.client_chat_messages(client_id, from, limit))
            }

            async fn manager_chat_messages(
                &self,
                manager_id: UserId,
                chat_id: ChatId,
                from: Option<HistoryPosition>,
                limit: usize,
            ) -> StoreResult<Vec<Message>> {
                let $this = self;
                Ok($state.manager_chat_messages(manager_id, chat_id, from, limit))
            }
        }

        #[async_trait]
        impl ChatRepository for $t {
            async fn create_chat_if_not_exists(&self, client_id: UserId) -> StoreResult<ChatId> {
                let $this = self;
                Ok($state.create_chat_if_not_exists(client_id))
            }

            async fn get_client_id(&self, chat_id: ChatId) -> StoreResult<UserId> {
                let $this = self;
                $state.get_client_id(chat_id)
            }

            async fn chats_of_manager(&self, manager_id: UserId) -> StoreResult<Vec<Chat>> {
                let $this = self;
                Ok($state.chats_of_manager(manager_id))
            }
        }

        #[async_trait]
        impl ProblemRepository for $t {
            async fn create_problem_if_not_exists(&self, chat_id: ChatId) -> StoreResult<ProblemId> {
                let $this = self;
                $state.create_problem_if_not_exists(chat_id)
            }

            async fn manager_open_problems_count(&self, manager_id: UserId) -> StoreResult<usize> {
                let $this = self;
                Ok($state.manager_open_problems_count(manager_id))
            }

            async fn problems_without_manager(&self) -> StoreResult<Vec<Problem>> {
                let $this = self;
                Ok($state.problems_without_manager())
            }

            async fn assign_manager(
                &self,
                problem_id: ProblemId,
                manager_id: UserId,
            ) -> StoreResult<()> {
                let $this = self;
                $state.assign_manager(problem_id, manager_id)
            }

            async fn problem_request_id(&self, problem_id: ProblemId) -> StoreResult<RequestId> {
                let $this = self;
                $state.problem_request_id(problem_id)
            }

            async fn active_manager(&self, chat_id: ChatId) -> StoreResult<Option<UserId>> {
                let $this = self;
                Ok($state.active_manager(chat_id))
            }

            async fn assigned_problem_id(
                &self,
                manager_id: UserId,
                chat_id: ChatId,
            ) -> StoreResult<ProblemId> {
                let $this = self;
                $state.assigned_problem_id(manager_id, chat_id)
            }

            async fn resolve_problem(
                &self,
                chat_id: ChatId,
                manager_id: UserId,
                request_id: RequestId,
            ) -> StoreResult<ProblemId> {
                let $this = self;
                $state.resolve_problem(chat_id, manager_id, request_id)
            }
        }
    };
}

impl_repositories!(InMemoryStore, |this| this.state.lock().await);
impl_repositories!(InMemoryTx, |this| this.state().working);
