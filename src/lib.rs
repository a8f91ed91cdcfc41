//! # Broker Lifecycle
//!
//! Resource lifecycle and timeout scheduling primitives for message-broker
//! middleware.
//!
//! Brokers juggle many expensive, stateful objects: login sessions,
//! connections to external systems, callback buffers. This library provides
//! the three building blocks that keep those objects alive exactly as long
//! as they are useful:
//!
//! - **[`TimeoutScheduler`](core::TimeoutScheduler)**: a single dedicated
//!   dispatch thread fires registered callbacks after configurable delays.
//!   Timers can be cancelled or refreshed while pending; the thread sleeps
//!   until the next deadline and a panicking callback never kills it.
//! - **[`ResourcePool`](core::ResourcePool)**: bounds the number of
//!   concurrently busy instances of a resource, recycles released instances
//!   (most recently used first), and uses the scheduler to demote forgotten
//!   busy resources to idle and to evict long-idle ones.
//! - **[`BoundedQueue`](infra::BoundedQueue)**: a fixed-capacity FIFO buffer
//!   with a configurable overflow reaction (reject, drop new, drop oldest)
//!   and a lost-entry counter.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use broker_lifecycle::core::{
//!     PoolSettings, ResourceAdapter, ResourcePool, TimeoutScheduler,
//! };
//!
//! let scheduler = Arc::new(TimeoutScheduler::new("broker"));
//! let pool = ResourcePool::new(
//!     "session",
//!     MySessionAdapter::connect(&addr)?,
//!     scheduler,
//!     PoolSettings {
//!         max_instances: 100,
//!         busy_to_idle_timeout: Duration::from_secs(60),
//!         idle_to_erase_timeout: Duration::from_secs(600),
//!     },
//! );
//!
//! let session = pool.reserve()?;
//! // ... use *session ...
//! pool.release(session.id())?;
//! ```
//!
//! Pools and queues can also be built in bulk from JSON configuration via
//! [`builders::build_pools`] and [`builders::build_queues`].

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core lifecycle primitives: timeout scheduling and resource pooling.
pub mod core;
/// Configuration models for pools, queues, and timeouts.
pub mod config;
/// Builders to construct lifecycle components from configuration.
pub mod builders;
/// Infrastructure building blocks (bounded queues).
pub mod infra;
/// Shared utilities: clocks, id generation, telemetry.
pub mod util;
