//! Error types for pool, queue, and timer operations.

use thiserror::Error;

/// Errors produced by the lifecycle components.
///
/// Exhaustion and not-found conditions are ordinary outcomes of concurrent
/// resource contention; nothing in this taxonomy is fatal. Retry and backoff
/// are a caller concern.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The pool is at capacity and no idle entry is available.
    #[error("resource exhausted: all {0} instances are busy")]
    ResourceExhausted(usize),
    /// The referenced id is not currently tracked (already timed out?).
    #[error("resource '{0}' is invalid, timed out?")]
    ResourceNotFound(String),
    /// The adapter failed to create a resource payload.
    #[error("resource creation failed: {0}")]
    CreateFailed(String),
    /// A push was rejected under the `Exception` overflow policy.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// The timer handle already fired or was never registered.
    #[error("timer handle {0} is unknown, already fired?")]
    TimerNotFound(u128),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
