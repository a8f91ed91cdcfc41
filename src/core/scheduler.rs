//! One-shot timeout scheduling with a single dispatch thread.
//!
//! [`TimeoutScheduler`] fires a callback after a given delay, with cancel and
//! refresh support. Timers are keyed by absolute deadline in a sorted map;
//! one dedicated background thread evaluates due timers and invokes their
//! callbacks sequentially. A slow callback therefore delays every other
//! pending timer ("bunching") — callbacks must be short and non-blocking.
//!
//! Accuracy is best-effort (tens of milliseconds); there is no compensation
//! for OS scheduling jitter.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::core::LifecycleError;
use crate::util::clock::now_nanos;

/// How long the dispatcher sleeps when no timers are registered.
const IDLE_SLEEP: Duration = Duration::from_secs(100);

/// Opaque handle to a scheduled timer.
///
/// The handle encodes the resolved absolute deadline and is the only external
/// reference to a timer entry. It stays valid for `cancel`/`refresh` until
/// the timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u128);

impl TimerHandle {
    /// Absolute due time encoded in this handle, nanoseconds since the epoch.
    ///
    /// Valid whether or not the timer is still pending.
    #[must_use]
    pub const fn due_at_nanos(self) -> u128 {
        self.0
    }
}

/// Callback invoked on the dispatch thread when a timer fires.
///
/// Implementations must be short and non-blocking; a panic inside
/// `on_timeout` is caught and logged, never terminating the dispatch loop.
pub trait TimeoutListener<U>: Send + Sync {
    /// Called once when the timer identified by `handle` is due.
    fn on_timeout(&self, handle: TimerHandle, user_data: &U);
}

impl<U, F> TimeoutListener<U> for F
where
    F: Fn(TimerHandle, &U) + Send + Sync,
{
    fn on_timeout(&self, handle: TimerHandle, user_data: &U) {
        self(handle, user_data);
    }
}

/// A pending timer: callback plus user data looped back on fire.
struct TimerEntry<U> {
    listener: Arc<dyn TimeoutListener<U>>,
    user_data: U,
    registered_at: Instant,
    delay: Duration,
}

struct SchedulerShared<U> {
    name: String,
    /// Sorted by absolute deadline; keys are unique (collisions are nudged
    /// forward by one nanosecond, so earliest-registered fires first).
    timers: Mutex<BTreeMap<u128, TimerEntry<U>>>,
    /// Signaled when a new earliest deadline arrives or on shutdown.
    wakeup: Condvar,
    running: AtomicBool,
}

/// Single-dispatcher timer service keyed by absolute deadline.
///
/// Construct one explicitly and share it (`Arc`) between every pool that
/// needs timeout-driven state decay; independent schedulers keep unit tests
/// deterministic. `U` is the user-data type routed back to listeners.
pub struct TimeoutScheduler<U> {
    shared: Arc<SchedulerShared<U>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl<U: Send + 'static> TimeoutScheduler<U> {
    /// Create a named scheduler and start its dispatch thread.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let shared = Arc::new(SchedulerShared {
            name: name.clone(),
            timers: Mutex::new(BTreeMap::new()),
            wakeup: Condvar::new(),
            running: AtomicBool::new(true),
        });

        let dispatcher_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("{name}-timeout"))
            .spawn(move || dispatch_loop(&dispatcher_shared))
            .expect("failed to spawn timeout dispatch thread");

        debug!(scheduler = %name, "timeout scheduler started");
        Self {
            shared,
            dispatcher: Mutex::new(Some(handle)),
        }
    }

    /// Register a callback to fire once after `delay`.
    ///
    /// The dispatcher is woken only if the new deadline is sooner than the
    /// one it currently waits on. The returned handle can be used with
    /// [`cancel`](Self::cancel) and [`refresh`](Self::refresh); after the
    /// timer fired the registration is gone — re-schedule to cycle timeouts.
    pub fn schedule(
        &self,
        delay: Duration,
        listener: Arc<dyn TimeoutListener<U>>,
        user_data: U,
    ) -> TimerHandle {
        if delay < Duration::from_millis(1) {
            warn!(
                scheduler = %self.shared.name,
                delay_ns = delay.as_nanos() as u64,
                "schedule called with sub-millisecond delay"
            );
        }
        let mut timers = self.shared.timers.lock();
        let (handle, is_new_earliest) = insert_entry(&mut timers, delay, listener, user_data);
        drop(timers);
        if is_new_earliest {
            self.shared.wakeup.notify_one();
        }
        handle
    }

    /// Remove a pending timer. No-op if it already fired or is unknown.
    pub fn cancel(&self, handle: TimerHandle) {
        self.shared.timers.lock().remove(&handle.0);
    }

    /// Restart the countdown of a pending timer, measured from now.
    ///
    /// The old handle is invalid after this call.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::TimerNotFound`] if the handle already fired
    /// or was never registered.
    pub fn refresh(
        &self,
        handle: TimerHandle,
        new_delay: Duration,
    ) -> Result<TimerHandle, LifecycleError> {
        let mut timers = self.shared.timers.lock();
        let entry = timers
            .remove(&handle.0)
            .ok_or(LifecycleError::TimerNotFound(handle.0))?;
        let (new_handle, is_new_earliest) =
            insert_entry(&mut timers, new_delay, entry.listener, entry.user_data);
        drop(timers);
        if is_new_earliest {
            self.shared.wakeup.notify_one();
        }
        Ok(new_handle)
    }

    /// Whether the timer already fired (or was cancelled / never existed).
    pub fn is_expired(&self, handle: TimerHandle) -> bool {
        !self.shared.timers.lock().contains_key(&handle.0)
    }

    /// Time left until the timer fires, or `None` if it is not pending.
    pub fn time_remaining(&self, handle: TimerHandle) -> Option<Duration> {
        let timers = self.shared.timers.lock();
        if !timers.contains_key(&handle.0) {
            return None;
        }
        Some(nanos_until(handle.0))
    }

    /// The delay the timer was registered with, or `None` if not pending.
    pub fn configured_delay(&self, handle: TimerHandle) -> Option<Duration> {
        self.shared.timers.lock().get(&handle.0).map(|e| e.delay)
    }

    /// Time since the timer was registered, or `None` if not pending.
    pub fn elapsed(&self, handle: TimerHandle) -> Option<Duration> {
        self.shared
            .timers
            .lock()
            .get(&handle.0)
            .map(|e| e.registered_at.elapsed())
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.shared.timers.lock().len()
    }

    /// Whether no timers are pending.
    pub fn is_empty(&self) -> bool {
        self.shared.timers.lock().is_empty()
    }

    /// Drop every pending timer without firing it.
    pub fn clear(&self) {
        self.shared.timers.lock().clear();
    }

    /// Stop the dispatch thread and drop all pending timers.
    ///
    /// Joins the dispatcher; safe to call more than once.
    pub fn shutdown(&self) {
        {
            // Flag flip and notify happen under the timers lock: the
            // dispatcher re-checks the flag after acquiring the same lock,
            // so it can never start a fresh wait after missing the signal.
            let mut timers = self.shared.timers.lock();
            if !self.shared.running.swap(false, Ordering::AcqRel) {
                return;
            }
            timers.clear();
            self.shared.wakeup.notify_all();
        }
        if let Some(handle) = self.dispatcher.lock().take() {
            if handle.join().is_err() {
                warn!(scheduler = %self.shared.name, "dispatch thread panicked during shutdown");
            }
        }
        info!(scheduler = %self.shared.name, "timeout scheduler shut down");
    }
}

impl<U> Drop for TimeoutScheduler<U> {
    fn drop(&mut self) {
        // Signal shutdown but do not join; explicit shutdown() is required
        // for a graceful join. Holding the timers lock orders the flag flip
        // against the dispatcher's check-then-wait.
        let _timers = self.shared.timers.lock();
        if self.shared.running.swap(false, Ordering::AcqRel) {
            self.shared.wakeup.notify_all();
            debug!(scheduler = %self.shared.name, "scheduler dropped, dispatch thread detached");
        }
    }
}

/// Insert under the lock, nudging colliding deadlines forward by 1 ns.
fn insert_entry<U>(
    timers: &mut BTreeMap<u128, TimerEntry<U>>,
    delay: Duration,
    listener: Arc<dyn TimeoutListener<U>>,
    user_data: U,
) -> (TimerHandle, bool) {
    let mut key = now_nanos() + delay.as_nanos();
    while timers.contains_key(&key) {
        key += 1;
    }
    let is_new_earliest = timers.first_key_value().is_none_or(|(k, _)| key < *k);
    timers.insert(
        key,
        TimerEntry {
            listener,
            user_data,
            registered_at: Instant::now(),
            delay,
        },
    );
    (TimerHandle(key), is_new_earliest)
}

fn nanos_until(deadline: u128) -> Duration {
    let now = now_nanos();
    if deadline <= now {
        return Duration::ZERO;
    }
    // Remaining span always fits u64 for realistic delays.
    Duration::from_nanos(u64::try_from(deadline - now).unwrap_or(u64::MAX))
}

/// The dispatch loop: pop due timers and fire them, otherwise sleep until
/// the earliest deadline or a wakeup from a new registration.
fn dispatch_loop<U>(shared: &SchedulerShared<U>) {
    loop {
        let mut timers = shared.timers.lock();
        // The flag must be read under the timers lock: shutdown flips it
        // while holding the lock, so either the flip is seen here or the
        // dispatcher is already inside wait_for and receives the notify.
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        let next_deadline = timers.first_key_value().map(|(k, _)| *k);
        match next_deadline {
            Some(deadline) if deadline <= now_nanos() => {
                if let Some(entry) = timers.remove(&deadline) {
                    // Callbacks run without the lock so they may re-enter
                    // schedule()/cancel() on this scheduler.
                    drop(timers);
                    fire(shared, TimerHandle(deadline), &entry);
                }
            }
            Some(deadline) => {
                let _timed_out = shared.wakeup.wait_for(&mut timers, nanos_until(deadline));
            }
            None => {
                let _timed_out = shared.wakeup.wait_for(&mut timers, IDLE_SLEEP);
            }
        }
    }
    debug!(scheduler = %shared.name, "dispatch thread exiting");
}

/// Invoke one callback, isolating panics so one misbehaving timer cannot
/// stop the others from firing.
fn fire<U>(shared: &SchedulerShared<U>, handle: TimerHandle, entry: &TimerEntry<U>) {
    let result = catch_unwind(AssertUnwindSafe(|| {
        entry.listener.on_timeout(handle, &entry.user_data);
    }));
    if result.is_err() {
        error!(
            scheduler = %shared.name,
            due_at = handle.due_at_nanos(),
            "timer callback panicked; dispatch loop continues"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn listener(
        tx: crossbeam_channel::Sender<(TimerHandle, String)>,
    ) -> Arc<dyn TimeoutListener<String>> {
        Arc::new(move |handle: TimerHandle, data: &String| {
            let _ = tx.send((handle, data.clone()));
        })
    }

    #[test]
    fn fires_once_with_user_data() {
        let scheduler = TimeoutScheduler::new("t");
        let (tx, rx) = unbounded();
        let handle = scheduler.schedule(
            Duration::from_millis(50),
            listener(tx),
            "X".to_string(),
        );
        let (fired, data) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(fired, handle);
        assert_eq!(data, "X");
        assert!(scheduler.is_expired(handle));
        // One-shot: nothing else arrives.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        scheduler.shutdown();
    }

    #[test]
    fn cancel_prevents_firing() {
        let scheduler = TimeoutScheduler::new("t");
        let (tx, rx) = unbounded();
        let handle = scheduler.schedule(
            Duration::from_millis(200),
            listener(tx),
            "never".to_string(),
        );
        scheduler.cancel(handle);
        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
        assert!(scheduler.is_expired(handle));
        scheduler.shutdown();
    }

    #[test]
    fn refresh_restarts_countdown() {
        let scheduler = TimeoutScheduler::new("t");
        let (tx, rx) = unbounded();
        let handle = scheduler.schedule(
            Duration::from_millis(150),
            listener(tx),
            "r".to_string(),
        );
        std::thread::sleep(Duration::from_millis(100));
        let started = Instant::now();
        let new_handle = scheduler.refresh(handle, Duration::from_millis(300)).unwrap();
        assert_ne!(handle, new_handle);
        let (fired, _) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(fired, new_handle);
        // Time already waited before the refresh must not count.
        assert!(started.elapsed() >= Duration::from_millis(250));
        scheduler.shutdown();
    }

    #[test]
    fn refresh_of_fired_handle_fails() {
        let scheduler = TimeoutScheduler::new("t");
        let (tx, rx) = unbounded();
        let handle = scheduler.schedule(
            Duration::from_millis(20),
            listener(tx),
            "f".to_string(),
        );
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let err = scheduler.refresh(handle, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, LifecycleError::TimerNotFound(_)));
        scheduler.shutdown();
    }

    #[test]
    fn identical_deadlines_get_unique_handles_and_all_fire() {
        let scheduler = TimeoutScheduler::new("t");
        let (tx, rx) = unbounded();
        let mut handles = Vec::new();
        for i in 0..20 {
            let handle = scheduler.schedule(
                Duration::from_millis(50),
                listener(tx.clone()),
                format!("timer-{i}"),
            );
            handles.push(handle);
        }
        let unique: std::collections::HashSet<_> = handles.iter().copied().collect();
        assert_eq!(unique.len(), handles.len());
        for _ in 0..20 {
            rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }
        assert!(scheduler.is_empty());
        scheduler.shutdown();
    }

    #[test]
    fn query_helpers_return_sentinels_for_unknown_handles() {
        let scheduler: TimeoutScheduler<String> = TimeoutScheduler::new("t");
        let ghost = TimerHandle(42);
        assert!(scheduler.is_expired(ghost));
        assert_eq!(scheduler.time_remaining(ghost), None);
        assert_eq!(scheduler.configured_delay(ghost), None);
        assert_eq!(scheduler.elapsed(ghost), None);
        scheduler.shutdown();
    }

    #[test]
    fn pending_timer_reports_remaining_and_configured_delay() {
        let scheduler: TimeoutScheduler<String> = TimeoutScheduler::new("t");
        let (tx, _rx) = unbounded();
        let handle = scheduler.schedule(
            Duration::from_secs(5),
            listener(tx),
            "q".to_string(),
        );
        let remaining = scheduler.time_remaining(handle).unwrap();
        assert!(remaining > Duration::from_secs(3));
        assert_eq!(scheduler.configured_delay(handle), Some(Duration::from_secs(5)));
        assert!(scheduler.elapsed(handle).unwrap() < Duration::from_secs(1));
        assert_eq!(scheduler.len(), 1);
        scheduler.shutdown();
    }

    #[test]
    fn shutdown_returns_promptly_while_the_dispatcher_idles() {
        // The dispatcher may sit in its long idle wait (or be between its
        // shutdown check and that wait); shutdown must interrupt it rather
        // than wait the idle sleep out.
        for _ in 0..20 {
            let scheduler: TimeoutScheduler<String> = TimeoutScheduler::new("t");
            let started = Instant::now();
            scheduler.shutdown();
            assert!(started.elapsed() < Duration::from_secs(5));
        }
    }

    #[test]
    fn sub_millisecond_delay_still_fires() {
        let scheduler = TimeoutScheduler::new("t");
        let (tx, rx) = unbounded();
        scheduler.schedule(Duration::from_micros(200), listener(tx), "fast".to_string());
        let (_, data) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(data, "fast");
        scheduler.shutdown();
    }

    #[test]
    fn panicking_callback_does_not_kill_the_dispatcher() {
        let scheduler = TimeoutScheduler::new("t");
        let panicking: Arc<dyn TimeoutListener<String>> =
            Arc::new(|_: TimerHandle, _: &String| panic!("boom"));
        scheduler.schedule(Duration::from_millis(20), panicking, "bad".to_string());

        let (tx, rx) = unbounded();
        scheduler.schedule(
            Duration::from_millis(80),
            listener(tx),
            "good".to_string(),
        );
        let (_, data) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(data, "good");
        scheduler.shutdown();
    }
}
