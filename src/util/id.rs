//! Instance-id generation for pooled resources.
//!
//! Generated ids are globally distinguishable:
//! `<host>-<pool>-<epoch millis>-<random>-<counter>`. The counter is a
//! per-pool atomic, so two ids produced in the same millisecond still differ.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::util::clock::now_ms;

/// Monotonic counter handed to [`generate_instance_id`] by each pool.
#[derive(Debug, Default)]
pub struct IdCounter(AtomicU64);

impl IdCounter {
    /// Create a counter starting at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Synthesize a unique instance id for `pool_name`.
pub fn generate_instance_id(pool_name: &str, counter: &IdCounter) -> String {
    let host = hostname();
    let random: u32 = rand::random();
    format!(
        "{host}-{pool_name}-{}-{random}-{}",
        now_ms(),
        counter.next()
    )
}

/// Best-effort host identification; falls back to `localhost`.
fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".into())
}
