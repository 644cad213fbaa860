use std::sync::Arc;

use parley_core::UserId;

use crate::store::{ProblemRepository, StoreResult};

pub const DEFAULT_MAX_PROBLEMS_AT_SAME_TIME: usize = 5;

/// Caps how many open problems a manager may own at once.
#[derive(Clone)]
pub struct ManagerLoad {
    problems: Arc<dyn ProblemRepository>,
    max_problems_at_same_time: usize,
}

impl std::fmt::Debug for ManagerLoad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerLoad")
            .field("max_problems_at_same_time", &self.max_problems_at_same_time)
            .finish_non_exhaustive()
    }
}

impl ManagerLoad {
    pub fn new(problems: Arc<dyn ProblemRepository>, max_problems_at_same_time: usize) -> Self {
        Self {
            problems,
            max_problems_at_same_time,
        }
    }

    pub fn max_problems_at_same_time(&self) -> usize {
        self.max_problems_at_same_time
    }

    pub async fn can_manager_take_problem(&self, manager_id: UserId) -> StoreResult<bool> {
        let open = self.problems.manager_open_problems_count(manager_id).await?;
        Ok(open < self.max_problems_at_same_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChatRepository, InMemoryStore};

    #[tokio::test]
    async fn manager_is_capped_by_open_problems() {
        let store = InMemoryStore::new();
        let manager = UserId::new();
        let load = ManagerLoad::new(Arc::new(store.clone()), 2);

        assert!(load.can_manager_take_problem(manager).await.unwrap());

        let mut problems = Vec::new();
        for _ in 0..2 {
            let chat = store.create_chat_if_not_exists(UserId::new()).await.unwrap();
            let problem = store.create_problem_if_not_exists(chat).await.unwrap();
            store.assign_manager(problem, manager).await.unwrap();
            problems.push((chat, problem));
        }
        assert!(!load.can_manager_take_problem(manager).await.unwrap());

        let (chat, _) = problems[0];
        store
            .resolve_problem(chat, manager, parley_core::RequestId::new())
            .await
            .unwrap();
        assert!(load.can_manager_take_problem(manager).await.unwrap());
    }
}
