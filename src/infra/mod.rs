//! Infrastructure building blocks used by higher broker layers.

pub mod queue;

pub use queue::{BoundedQueue, OverflowPolicy};
