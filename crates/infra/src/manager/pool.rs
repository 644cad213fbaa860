//! In-process FIFO pool of managers ready to take a problem.
//!
//! Rebuilt from zero on restart: managers re-announce themselves through
//! free-hands.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use parley_core::UserId;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_POOL_CAPACITY: usize = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("no available managers")]
    NoAvailableManagers,

    #[error("manager pool capacity ({0}) exceeded")]
    CapacityExceeded(usize),
}

#[derive(Debug, Default)]
struct PoolState {
    queue: VecDeque<UserId>,
    members: HashSet<UserId>,
}

/// A manager is queued at most once; `get` hands out the longest-waiting one.
#[derive(Debug)]
pub struct ManagerPool {
    state: Mutex<PoolState>,
    capacity: usize,
}

impl Default for ManagerPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

impl ManagerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            capacity,
        }
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        // No critical section can panic halfway.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Pop the head of the queue. Never blocks.
    pub fn get(&self) -> Result<UserId, PoolError> {
        let mut state = self.state();
        let manager_id = state
            .queue
            .pop_front()
            .ok_or(PoolError::NoAvailableManagers)?;
        state.members.remove(&manager_id);
        debug!(%manager_id, "manager taken from pool");
        Ok(manager_id)
    }

    /// Queue `manager_id` unless it is already waiting.
    pub fn put(&self, manager_id: UserId) -> Result<(), PoolError> {
        let mut state = self.state();
        if state.members.contains(&manager_id) {
            return Ok(());
        }
        if state.queue.len() >= self.capacity {
            return Err(PoolError::CapacityExceeded(self.capacity));
        }
        state.members.insert(manager_id);
        state.queue.push_back(manager_id);
        debug!(%manager_id, size = state.queue.len(), "manager put into pool");
        Ok(())
    }

    pub fn contains(&self, manager_id: UserId) -> bool {
        self.state().members.contains(&manager_id)
    }

    pub fn size(&self) -> usize {
        self.state().queue.len()
    }

    /// Forget every waiting manager.
    pub fn close(&self) {
        let mut state = self.state();
        state.queue.clear();
        state.members.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_pool_has_no_managers() {
        let pool = ManagerPool::default();
        assert_eq!(pool.get(), Err(PoolError::NoAvailableManagers));
    }

    #[test]
    fn managers_come_out_in_arrival_order() {
        let pool = ManagerPool::default();
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        for id in [a, b, c] {
            pool.put(id).unwrap();
        }
        assert_eq!(pool.get().unwrap(), a);
        assert_eq!(pool.get().unwrap(), b);
        assert_eq!(pool.get().unwrap(), c);
    }

    #[test]
    fn put_is_idempotent() {
        let pool = ManagerPool::default();
        let id = UserId::new();
        pool.put(id).unwrap();
        pool.put(id).unwrap();
        assert_eq!(pool.size(), 1);
        assert!(pool.contains(id));
    }

    #[test]
    fn capacity_is_enforced_but_present_managers_are_accepted() {
        let pool = ManagerPool::new(2);
        let (a, b) = (UserId::new(), UserId::new());
        pool.put(a).unwrap();
        pool.put(b).unwrap();

        assert_eq!(pool.put(UserId::new()), Err(PoolError::CapacityExceeded(2)));
        assert_eq!(pool.put(a), Ok(()));
    }

    #[test]
    fn close_clears_everything() {
        let pool = ManagerPool::default();
        let id = UserId::new();
        pool.put(id).unwrap();
        pool.close();
        assert_eq!(pool.size(), 0);
        assert!(!pool.contains(id));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(usize),
        Get,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![(0usize..6).prop_map(Op::Put), Just(Op::Get)]
    }

    proptest! {
        #[test]
        fn behaves_like_a_deduplicated_fifo(ops in proptest::collection::vec(op(), 0..64)) {
            let ids: Vec<UserId> = (0..6).map(|_| UserId::new()).collect();
            let pool = ManagerPool::new(4);
            let mut model: VecDeque<UserId> = VecDeque::new();

            for op in ops {
                match op {
                    Op::Put(i) => {
                        let id = ids[i];
                        let result = pool.put(id);
                        if model.contains(&id) {
                            prop_assert_eq!(result, Ok(()));
                        } else if model.len() >= 4 {
                            prop_assert_eq!(result, Err(PoolError::CapacityExceeded(4)));
                        } else {
                            prop_assert_eq!(result, Ok(()));
                            model.push_back(id);
                        }
                    }
                    Op::Get => {
                        let expected = model.pop_front().ok_or(PoolError::NoAvailableManagers);
                        prop_assert_eq!(pool.get(), expected);
                    }
                }

                prop_assert_eq!(pool.size(), model.len());
                for id in &ids {
                    prop_assert_eq!(pool.contains(*id), model.contains(id));
                }
            }
        }

        #[test]
        fn get_then_put_restores_membership(n in 1usize..8) {
            let pool = ManagerPool::default();
            let ids: Vec<UserId> = (0..n).map(|_| UserId::new()).collect();
            for id in &ids {
                pool.put(*id).unwrap();
            }

            let taken = pool.get().unwrap();
            pool.put(taken).unwrap();

            prop_assert_eq!(pool.size(), n);
            for id in &ids {
                prop_assert!(pool.contains(*id));
            }
        }
    }
}
