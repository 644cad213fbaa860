//! Periodic assignment of waiting problems to free managers.
//!
//! Each tick runs in one transaction: list the screened, unassigned problems
//! (oldest first), pop a manager per problem, persist the assignment, post a
//! service message and enqueue `manager-assigned-to-problem`. An empty pool
//! ends the tick early; the rest waits for the next one. Any other error rolls
//! the whole tick back, puts the popped managers back into the pool and stops
//! the scheduler.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parley_core::UserId;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::pool::{ManagerPool, PoolError};
use crate::jobs::manager_assigned;
use crate::outbox::{Outbox, OutboxError};
use crate::store::{
    MessageRepository, NewMessage, ProblemRepository, Store, StoreError, Transactor, Tx,
};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("manager pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("invalid scheduler config: {0}")]
    InvalidConfig(String),
}

pub fn assignment_notice(manager_id: UserId) -> String {
    format!("Manager {manager_id} will answer you")
}

pub struct ManagerScheduler {
    store: Arc<dyn Store>,
    pool: Arc<ManagerPool>,
    outbox: Arc<Outbox>,
    period: Duration,
}

impl std::fmt::Debug for ManagerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerScheduler")
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

impl ManagerScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        pool: Arc<ManagerPool>,
        outbox: Arc<Outbox>,
        period: Duration,
    ) -> Self {
        Self {
            store,
            pool,
            outbox,
            period,
        }
    }

    /// Tick until `cancel` fires. A failed tick stops the loop with its error.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SchedulerError> {
        if self.period.is_zero() {
            return Err(SchedulerError::InvalidConfig("period must be positive".into()));
        }
        info!(period = ?self.period, "manager scheduler started");

        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, "problems distribution failed");
                return Err(e);
            }
        }

        info!("manager scheduler stopped");
        Ok(())
    }

    /// One distribution round. Returns how many problems were assigned.
    pub async fn tick(&self) -> Result<usize, SchedulerError> {
        let tx = self.store.begin().await?;
        let mut popped = Vec::new();

        let assigned = match self.distribute(&*tx, &mut popped).await {
            Ok(assigned) => assigned,
            Err(e) => {
                drop(tx);
                self.restore(&popped);
                return Err(e);
            }
        };

        if let Err(e) = tx.commit().await {
            self.restore(&popped);
            return Err(e.into());
        }

        if assigned > 0 {
            info!(assigned, "problems assigned");
        }
        Ok(assigned)
    }

    async fn distribute(&self, tx: &dyn Tx, popped: &mut Vec<UserId>) -> Result<usize, SchedulerError> {
        let problems = tx.problems_without_manager().await?;
        let mut assigned = 0;

        for problem in problems {
            let manager_id = match self.pool.get() {
                Ok(id) => id,
                Err(PoolError::NoAvailableManagers) => break,
                Err(e) => return Err(e.into()),
            };
            popped.push(manager_id);

            tx.assign_manager(problem.id, manager_id).await?;
            let request_id = tx.problem_request_id(problem.id).await?;
            let notice = tx
                .create_message(NewMessage::service(
                    request_id,
                    problem.id,
                    problem.chat_id,
                    assignment_notice(manager_id),
                ))
                .await?;

            let payload = manager_assigned::Payload {
                message_id: notice.id,
                manager_id,
            };
            self.outbox
                .put(tx, manager_assigned::NAME, &payload.encode(), Utc::now())
                .await?;

            info!(problem_id = %problem.id, %manager_id, "manager assigned to problem");
            assigned += 1;
        }

        Ok(assigned)
    }

    fn restore(&self, popped: &[UserId]) {
        for manager_id in popped {
            if let Err(e) = self.pool.put(*manager_id) {
                warn!(%manager_id, error = %e, "could not return manager to pool");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::{Job, OutboxSettings};
    use crate::store::{ChatRepository, InMemoryStore, MessageRepository, ProblemRepository};
    use parley_core::{ProblemId, RequestId};

    struct Fixture {
        store: InMemoryStore,
        pool: Arc<ManagerPool>,
        scheduler: ManagerScheduler,
    }

    fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let pool = Arc::new(ManagerPool::default());
        let outbox = Arc::new(Outbox::new(
            Arc::new(store.clone()),
            OutboxSettings::default(),
        ));
        let scheduler = ManagerScheduler::new(
            Arc::new(store.clone()),
            Arc::clone(&pool),
            outbox,
            Duration::from_millis(100),
        );
        Fixture {
            store,
            pool,
            scheduler,
        }
    }

    async fn waiting_problem(store: &InMemoryStore) -> (ProblemId, RequestId) {
        let client = UserId::new();
        let request_id = RequestId::new();
        let chat = store.create_chat_if_not_exists(client).await.unwrap();
        let problem = store.create_problem_if_not_exists(chat).await.unwrap();
        let msg = store
            .create_message(NewMessage::client_visible(request_id, problem, chat, client, "hi"))
            .await
            .unwrap();
        store.mark_as_visible_for_manager(msg.id).await.unwrap();
        (problem, request_id)
    }

    fn assigned_jobs(jobs: &[Job]) -> Vec<manager_assigned::Payload> {
        jobs.iter()
            .filter(|j| j.name == manager_assigned::NAME)
            .map(|j| manager_assigned::Payload::decode(&j.payload).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn assigns_a_problem_and_announces_it() {
        let f = fixture();
        let (problem, request_id) = waiting_problem(&f.store).await;
        let manager = UserId::new();
        f.pool.put(manager).unwrap();

        assert_eq!(f.scheduler.tick().await.unwrap(), 1);

        assert_eq!(f.store.problem(problem).await.unwrap().manager_id, Some(manager));
        let jobs = assigned_jobs(&f.store.jobs().await);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].manager_id, manager);

        let notice = f.store.get_message_by_id(jobs[0].message_id).await.unwrap();
        assert!(notice.is_service);
        assert_eq!(notice.author_id, None);
        assert_eq!(notice.initial_request_id, request_id);
        assert_eq!(notice.body, assignment_notice(manager));
    }

    #[tokio::test]
    async fn empty_pool_ends_the_tick_quietly() {
        let f = fixture();
        waiting_problem(&f.store).await;

        assert_eq!(f.scheduler.tick().await.unwrap(), 0);
        assert!(f.store.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn unscreened_problems_are_skipped() {
        let f = fixture();
        let (screened, _) = waiting_problem(&f.store).await;

        let client = UserId::new();
        let chat = f.store.create_chat_if_not_exists(client).await.unwrap();
        let unscreened = f.store.create_problem_if_not_exists(chat).await.unwrap();
        f.store
            .create_message(NewMessage::client_visible(
                RequestId::new(),
                unscreened,
                chat,
                client,
                "pending screening",
            ))
            .await
            .unwrap();

        let (a, b) = (UserId::new(), UserId::new());
        f.pool.put(a).unwrap();
        f.pool.put(b).unwrap();

        assert_eq!(f.scheduler.tick().await.unwrap(), 1);
        assert_eq!(f.store.problem(screened).await.unwrap().manager_id, Some(a));
        assert_eq!(f.store.problem(unscreened).await.unwrap().manager_id, None);
        assert!(f.pool.contains(b));
    }

    #[tokio::test]
    async fn failed_tick_rolls_back_and_requeues_managers() {
        let f = fixture();
        let (first, _) = waiting_problem(&f.store).await;
        let (second, _) = waiting_problem(&f.store).await;
        let (a, b) = (UserId::new(), UserId::new());
        f.pool.put(a).unwrap();
        f.pool.put(b).unwrap();
        let messages_before = f.store.messages().await.len();

        // The first assignment gets its job, the second one fails to.
        f.store.faults().await.fail_create_job_after(1);
        let err = f.scheduler.tick().await.unwrap_err();

        assert!(matches!(
            err,
            SchedulerError::Outbox(OutboxError::Store(StoreError::Database { .. }))
        ));
        assert_eq!(f.store.problem(first).await.unwrap().manager_id, None);
        assert_eq!(f.store.problem(second).await.unwrap().manager_id, None);
        assert!(f.store.jobs().await.is_empty());
        assert_eq!(f.store.messages().await.len(), messages_before);
        assert_eq!(f.pool.size(), 2);
        assert_eq!(f.pool.get().unwrap(), a);
        assert_eq!(f.pool.get().unwrap(), b);
    }

    #[test]
    fn restore_returns_popped_managers() {
        let f = fixture();
        let (a, b) = (UserId::new(), UserId::new());
        f.pool.put(a).unwrap();
        f.pool.put(b).unwrap();
        let popped = vec![f.pool.get().unwrap(), f.pool.get().unwrap()];

        f.scheduler.restore(&popped);

        assert_eq!(f.pool.size(), 2);
        assert_eq!(f.pool.get().unwrap(), a);
    }

    #[tokio::test]
    async fn run_stops_cleanly_on_cancel() {
        let f = fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();
        f.scheduler.run(cancel).await.unwrap();
    }
}
