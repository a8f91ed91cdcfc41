//! Configuration models for pools, queues, and timeouts.

pub mod pool;

pub use pool::{CoreConfig, OnOverflow, PoolConfig, QueueConfig};
