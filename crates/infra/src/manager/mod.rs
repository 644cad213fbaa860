//! Manager availability: per-manager load cap, the pool of free managers and
//! the scheduler that hands unassigned problems to them.

pub mod load;
pub mod pool;
pub mod scheduler;

pub use load::ManagerLoad;
pub use pool::{DEFAULT_POOL_CAPACITY, ManagerPool, PoolError};
pub use scheduler::{ManagerScheduler, SchedulerError};
