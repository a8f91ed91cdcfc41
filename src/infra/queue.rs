//! Bounded FIFO queue with pluggable overflow policy.
//!
//! Higher layers use this to buffer callback messages and pending
//! invocations. Arrival order equals delivery order; the queue never blocks.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::warn;

use crate::core::LifecycleError;

/// Reaction when `push` is attempted on a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Reject the push with [`LifecycleError::QueueFull`], queue unchanged.
    Exception,
    /// Silently drop the new item and count it as lost.
    Discard,
    /// Drop the oldest entry to make room, count it as lost, then append.
    DiscardOldest,
}

struct QueueState<T> {
    entries: VecDeque<T>,
    num_lost: u64,
}

/// Fixed-capacity FIFO buffer, safe for concurrent producers and consumers.
///
/// `push`/`pull` are serialized by a per-queue lock; among concurrent
/// producers ordering follows lock acquisition order.
pub struct BoundedQueue<T> {
    name: String,
    max_entries: usize,
    policy: OverflowPolicy,
    state: Mutex<QueueState<T>>,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `max_entries` items.
    pub fn new(name: impl Into<String>, max_entries: usize, policy: OverflowPolicy) -> Self {
        Self {
            name: name.into(),
            max_entries,
            policy,
            state: Mutex::new(QueueState {
                entries: VecDeque::with_capacity(max_entries.min(1024)),
                num_lost: 0,
            }),
        }
    }

    /// Append an item, applying the overflow policy when full.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::QueueFull`] under the `Exception` policy;
    /// the other policies never fail.
    pub fn push(&self, item: T) -> Result<(), LifecycleError> {
        let mut state = self.state.lock();
        if state.entries.len() < self.max_entries {
            state.entries.push_back(item);
            return Ok(());
        }
        match self.policy {
            OverflowPolicy::Exception => Err(LifecycleError::QueueFull(format!(
                "queue '{}' reached max of {} entries",
                self.name, self.max_entries
            ))),
            OverflowPolicy::Discard => {
                state.num_lost += 1;
                warn!(queue = %self.name, lost = state.num_lost, "queue full, discarding new entry");
                Ok(())
            }
            OverflowPolicy::DiscardOldest => {
                state.entries.pop_front();
                state.num_lost += 1;
                state.entries.push_back(item);
                warn!(queue = %self.name, lost = state.num_lost, "queue full, discarded oldest entry");
                Ok(())
            }
        }
    }

    /// Remove and return the oldest entry, or `None` when empty.
    pub fn pull(&self) -> Option<T> {
        self.state.lock().entries.pop_front()
    }

    /// Current number of entries.
    pub fn size(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the queue is at capacity.
    pub fn is_full(&self) -> bool {
        self.size() >= self.max_entries
    }

    /// How many entries were silently dropped in `Discard`/`DiscardOldest` mode.
    pub fn num_lost(&self) -> u64 {
        self.state.lock().num_lost
    }

    /// The configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.max_entries
    }

    /// The configured overflow policy.
    #[must_use]
    pub const fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Drop every buffered entry. Lost-counter is unaffected.
    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_preserved() {
        let q = BoundedQueue::new("cb", 10, OverflowPolicy::Exception);
        for i in 0..5 {
            q.push(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(q.pull(), Some(i));
        }
        assert_eq!(q.pull(), None);
    }

    #[test]
    fn exception_policy_rejects_and_leaves_queue_unchanged() {
        let q = BoundedQueue::new("cb", 2, OverflowPolicy::Exception);
        q.push("a").unwrap();
        q.push("b").unwrap();
        let err = q.push("c").unwrap_err();
        assert!(matches!(err, LifecycleError::QueueFull(_)));
        assert_eq!(q.size(), 2);
        assert_eq!(q.num_lost(), 0);
        assert_eq!(q.pull(), Some("a"));
    }

    #[test]
    fn discard_policy_drops_new_item() {
        let q = BoundedQueue::new("cb", 2, OverflowPolicy::Discard);
        q.push("a").unwrap();
        q.push("b").unwrap();
        q.push("c").unwrap();
        assert_eq!(q.size(), 2);
        assert_eq!(q.num_lost(), 1);
        assert_eq!(q.pull(), Some("a"));
        assert_eq!(q.pull(), Some("b"));
    }

    #[test]
    fn discard_oldest_policy_keeps_newest_entries() {
        let q = BoundedQueue::new("cb", 3, OverflowPolicy::DiscardOldest);
        for item in ["a", "b", "c", "d", "e"] {
            q.push(item).unwrap();
        }
        assert_eq!(q.pull(), Some("c"));
        assert_eq!(q.pull(), Some("d"));
        assert_eq!(q.pull(), Some("e"));
        assert_eq!(q.num_lost(), 2);
    }

    #[test]
    fn is_full_tracks_capacity() {
        let q = BoundedQueue::new("cb", 1, OverflowPolicy::Exception);
        assert!(!q.is_full());
        q.push(1).unwrap();
        assert!(q.is_full());
        q.pull();
        assert!(!q.is_full());
    }

    #[test]
    fn clear_drains_entries_but_keeps_lost_counter() {
        let q = BoundedQueue::new("cb", 1, OverflowPolicy::Discard);
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert_eq!(q.num_lost(), 1);
        q.clear();
        assert_eq!(q.size(), 0);
        assert_eq!(q.num_lost(), 1);
    }
}
