//! Builders to construct lifecycle components from configuration.

pub mod pool_builder;

pub use pool_builder::{build_pools, build_queues};
