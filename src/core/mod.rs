//! Core lifecycle primitives: timeout scheduling and resource pooling.

pub mod error;
pub mod resource_pool;
pub mod scheduler;

pub use error::{AppResult, LifecycleError};
pub use resource_pool::{
    IdRequest, PoolSettings, PoolStats, PoolTimerEvent, Reserved, ResourceAdapter, ResourcePool,
};
pub use scheduler::{TimeoutListener, TimeoutScheduler, TimerHandle};
