//! Pooling of limited, stateful resources with timeout-driven state decay.
//!
//! A [`ResourcePool`] bounds the number of concurrently busy instances of an
//! expensive resource (login sessions, connections), recycles idle instances,
//! and evicts them after inactivity. State transitions:
//!
//! ```text
//!   busy --release() or busyToIdle timeout--> idle
//!   idle --reserve()-----------------------> busy
//!   idle --erase() or idleToErase timeout--> erased (terminal)
//! ```
//!
//! Creation and transition behavior is injected through a [`ResourceAdapter`];
//! the pool itself carries no knowledge of what it pools. Timeout transitions
//! are driven by a shared [`TimeoutScheduler`] passed in at construction.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::core::scheduler::{TimeoutListener, TimeoutScheduler, TimerHandle};
use crate::core::LifecycleError;
use crate::util::id::{generate_instance_id, IdCounter};

/// Transition timeouts shorter than this are clamped up, with a warning.
const MIN_TRANSITION_TIMEOUT: Duration = Duration::from_millis(100);

/// Capabilities the pool needs from the application: how to create a payload
/// and what to do on each state transition.
///
/// Hooks run while the pool lock is held — on the caller's thread for
/// explicit calls, on the scheduler's dispatch thread for timeout-driven
/// transitions. They must be short and must not reenter the same pool.
pub trait ResourceAdapter: Send + Sync + 'static {
    /// The pooled payload type.
    type Resource: Send + Sync + 'static;

    /// Create a new payload for `id`.
    ///
    /// For [`IdRequest::FromResource`] reservations the id is empty at
    /// creation time; the definitive id is derived from the payload after.
    ///
    /// # Errors
    ///
    /// A failure leaves the pool unchanged and is returned to the reserving
    /// caller as [`LifecycleError::CreateFailed`].
    fn create(&self, id: &str) -> Result<Self::Resource, LifecycleError>;

    /// An idle payload is about to be handed out again.
    fn idle_to_busy(&self, _resource: &Self::Resource) {}

    /// A busy payload was released (explicitly or by timeout).
    fn busy_to_idle(&self, _resource: &Self::Resource) {}

    /// The payload leaves the pool for good (explicit erase, idle timeout,
    /// or cleanup). Close connections, log out sessions, etc. here.
    fn erased(&self, _resource: &Self::Resource) {}
}

/// How a `reserve` call wants its instance id chosen.
#[derive(Debug, Clone, Copy)]
pub enum IdRequest<'a> {
    /// Use the supplied id verbatim (e.g. a caller-chosen session id).
    /// Reserving an id that is already busy returns that resource unchanged.
    Explicit(&'a str),
    /// Synthesize a globally distinguishable id
    /// (host + pool + time + random + counter).
    Generate,
    /// No preference: derive the id from the payload's identity.
    FromResource,
}

/// Handle returned by `reserve`: the instance id plus the shared payload.
pub struct Reserved<R> {
    id: String,
    resource: Arc<R>,
}

impl<R> Reserved<R> {
    /// The instance id this reservation is keyed by.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Shared ownership of the payload.
    #[must_use]
    pub fn resource(&self) -> Arc<R> {
        Arc::clone(&self.resource)
    }
}

impl<R> std::ops::Deref for Reserved<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<R> std::fmt::Debug for Reserved<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reserved").field("id", &self.id).finish()
    }
}

impl<R> Clone for Reserved<R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            resource: Arc::clone(&self.resource),
        }
    }
}

/// Pool sizing and default transition timeouts.
///
/// A zero timeout switches the corresponding transition off. Note that with
/// `idle_to_erase_timeout` zero the idle list is an unbounded reuse cache:
/// every released payload stays allocated until erased explicitly.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Maximum number of concurrently busy instances.
    pub max_instances: usize,
    /// Default busy-to-idle timeout (0 = never auto-demote).
    pub busy_to_idle_timeout: Duration,
    /// Default idle-to-erase timeout (0 = never auto-evict).
    pub idle_to_erase_timeout: Duration,
}

/// Read-only snapshot of pool occupancy for health reporting.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Resources currently held by callers.
    pub busy: usize,
    /// Resources allocated and eligible for reuse.
    pub idle: usize,
    /// Configured busy-set bound.
    pub max_instances: usize,
}

/// User data routed through the scheduler for pool-driven timers.
#[derive(Debug, Clone)]
pub struct PoolTimerEvent {
    id: String,
    kind: Transition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    BusyToIdle,
    IdleToErase,
}

/// One pooled resource and its timer bookkeeping. A resource lives in
/// exactly one of the busy map or the idle list at any time.
struct Entry<R> {
    id: String,
    resource: Arc<R>,
    busy_to_idle: Duration,
    idle_to_erase: Duration,
    created_at: Instant,
    timer: Option<TimerHandle>,
}

struct PoolState<R> {
    busy: HashMap<String, Entry<R>>,
    /// Released-but-allocated resources; reserve pops from the back (LIFO,
    /// favoring warm entries).
    idle: Vec<Entry<R>>,
}

struct PoolShared<A: ResourceAdapter> {
    name: String,
    adapter: A,
    scheduler: Arc<TimeoutScheduler<PoolTimerEvent>>,
    settings: PoolSettings,
    state: Mutex<PoolState<A::Resource>>,
    id_counter: IdCounter,
    /// Self-referential timer listener, set once right after construction.
    listener: OnceLock<Arc<dyn TimeoutListener<PoolTimerEvent>>>,
}

/// Generic pool of limited resources with automatic busy→idle→erased decay.
///
/// All state-changing operations are serialized by a single per-pool lock,
/// so reserve/release/erase and the timeout handlers never observe a torn
/// state. There is no waiting on exhaustion: `reserve` fails immediately
/// and callers implement their own backoff.
pub struct ResourcePool<A: ResourceAdapter> {
    shared: Arc<PoolShared<A>>,
}

impl<A: ResourceAdapter> std::fmt::Debug for ResourcePool<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("name", &self.shared.name)
            .finish()
    }
}

impl<A: ResourceAdapter> ResourcePool<A> {
    /// Create a pool named `name`, driven by `scheduler`.
    pub fn new(
        name: impl Into<String>,
        adapter: A,
        scheduler: Arc<TimeoutScheduler<PoolTimerEvent>>,
        settings: PoolSettings,
    ) -> Self {
        let name = name.into();
        let settings = PoolSettings {
            max_instances: settings.max_instances,
            busy_to_idle_timeout: clamp_timeout(
                &name,
                "busy_to_idle",
                settings.busy_to_idle_timeout,
            ),
            idle_to_erase_timeout: clamp_timeout(
                &name,
                "idle_to_erase",
                settings.idle_to_erase_timeout,
            ),
        };
        info!(
            pool = %name,
            max_instances = settings.max_instances,
            busy_to_idle_ms = settings.busy_to_idle_timeout.as_millis() as u64,
            idle_to_erase_ms = settings.idle_to_erase_timeout.as_millis() as u64,
            "resource pool created"
        );
        let shared = Arc::new(PoolShared {
            name,
            adapter,
            scheduler,
            settings,
            state: Mutex::new(PoolState {
                busy: HashMap::new(),
                idle: Vec::new(),
            }),
            id_counter: IdCounter::new(),
            listener: OnceLock::new(),
        });
        let weak = Arc::downgrade(&shared);
        let listener: Arc<dyn TimeoutListener<PoolTimerEvent>> =
            Arc::new(move |handle: TimerHandle, event: &PoolTimerEvent| {
                relay_timeout(&weak, handle, event);
            });
        let _ = shared.listener.set(listener);
        Self { shared }
    }

    /// Reserve a resource with the pool's default timeouts and a generated id.
    ///
    /// # Errors
    ///
    /// See [`reserve_with`](Self::reserve_with).
    pub fn reserve(&self) -> Result<Reserved<A::Resource>, LifecycleError> {
        self.reserve_with(IdRequest::Generate, None, None)
    }

    /// Reserve the resource keyed by `id` (idempotent for busy ids).
    ///
    /// # Errors
    ///
    /// See [`reserve_with`](Self::reserve_with).
    pub fn reserve_id(&self, id: &str) -> Result<Reserved<A::Resource>, LifecycleError> {
        self.reserve_with(IdRequest::Explicit(id), None, None)
    }

    /// Reserve a resource, optionally overriding the transition timeouts for
    /// this instance only.
    ///
    /// Resolution order: a busy resource with the requested explicit id is
    /// returned unchanged (reconnect); otherwise an idle entry still carrying
    /// the requested id, or failing that the most recently idled entry, is
    /// re-armed and reused; otherwise a new payload is created, provided the
    /// busy bound permits.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::ResourceExhausted`] when `max_instances` are busy
    /// and nothing is idle; [`LifecycleError::CreateFailed`] if the adapter
    /// fails to produce a payload.
    pub fn reserve_with(
        &self,
        id: IdRequest<'_>,
        busy_to_idle: Option<Duration>,
        idle_to_erase: Option<Duration>,
    ) -> Result<Reserved<A::Resource>, LifecycleError> {
        self.shared.reserve_with(id, busy_to_idle, idle_to_erase)
    }

    /// Release a busy resource back into the idle pool.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::ResourceNotFound`] if `id` is not currently busy.
    pub fn release(&self, id: &str) -> Result<(), LifecycleError> {
        self.shared.release(id)
    }

    /// Remove a resource for good, from either the busy or the idle side.
    /// A busy resource is demoted first (invoking the release hook), then
    /// erased. No-op if the id is unknown.
    pub fn erase(&self, id: &str) {
        self.shared.erase(id);
    }

    /// Restart the busy-to-idle countdown (keep-alive for long-lived active
    /// sessions).
    ///
    /// # Errors
    ///
    /// [`LifecycleError::ResourceNotFound`] if `id` is not currently busy.
    pub fn busy_refresh(&self, id: &str) -> Result<(), LifecycleError> {
        self.shared.busy_refresh(id)
    }

    /// Evict every busy and idle resource, invoking the erased hook for each.
    pub fn cleanup(&self) {
        self.shared.cleanup();
    }

    /// Whether `id` is currently in the busy state.
    pub fn is_busy(&self, id: &str) -> bool {
        self.shared.state.lock().busy.contains_key(id)
    }

    /// Number of busy resources.
    pub fn num_busy(&self) -> usize {
        self.shared.state.lock().busy.len()
    }

    /// Number of idle resources.
    pub fn num_idle(&self) -> usize {
        self.shared.state.lock().idle.len()
    }

    /// Best-effort occupancy snapshot for diagnostics; not a transactional
    /// view.
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            busy: state.busy.len(),
            idle: state.idle.len(),
            max_instances: self.shared.settings.max_instances,
        }
    }

    /// The pool's name, used in generated ids and log output.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

impl<A: ResourceAdapter> PoolShared<A> {
    fn reserve_with(
        &self,
        id: IdRequest<'_>,
        busy_to_idle: Option<Duration>,
        idle_to_erase: Option<Duration>,
    ) -> Result<Reserved<A::Resource>, LifecycleError> {
        let busy_timeout = busy_to_idle.map_or(self.settings.busy_to_idle_timeout, |d| {
            clamp_timeout(&self.name, "busy_to_idle", d)
        });
        let idle_timeout = idle_to_erase.map_or(self.settings.idle_to_erase_timeout, |d| {
            clamp_timeout(&self.name, "idle_to_erase", d)
        });

        let mut state = self.state.lock();

        // Idempotent reconnect: the same logical session can be re-acquired
        // without creating a duplicate.
        if let IdRequest::Explicit(requested) = id {
            if let Some(entry) = state.busy.get(requested) {
                debug!(pool = %self.name, id = requested, "reconnected to busy resource");
                return Ok(Reserved {
                    id: entry.id.clone(),
                    resource: Arc::clone(&entry.resource),
                });
            }
        }

        if let Some(mut entry) = take_idle(&mut state, &id) {
            if let Some(timer) = entry.timer.take() {
                self.scheduler.cancel(timer);
            }
            entry.id = self.resolve_id(&id, Some(&entry.resource));
            entry.busy_to_idle = busy_timeout;
            entry.idle_to_erase = idle_timeout;
            self.adapter.idle_to_busy(&entry.resource);
            entry.timer = self.arm(Transition::BusyToIdle, &entry.id, busy_timeout);
            let reserved = Reserved {
                id: entry.id.clone(),
                resource: Arc::clone(&entry.resource),
            };
            debug!(pool = %self.name, id = %entry.id, "recycled resource from idle pool");
            state.busy.insert(entry.id.clone(), entry);
            return Ok(reserved);
        }

        if state.busy.len() >= self.settings.max_instances {
            warn!(
                pool = %self.name,
                max_instances = self.settings.max_instances,
                "no more resources available"
            );
            return Err(LifecycleError::ResourceExhausted(
                self.settings.max_instances,
            ));
        }

        let provisional = self.resolve_id(&id, None);
        let resource = Arc::new(self.adapter.create(&provisional)?);
        let instance_id = if provisional.is_empty() {
            // "No preference" reservations key the slot by payload identity.
            format!("{:p}", Arc::as_ptr(&resource))
        } else {
            provisional
        };
        let timer = self.arm(Transition::BusyToIdle, &instance_id, busy_timeout);
        let entry = Entry {
            id: instance_id.clone(),
            resource: Arc::clone(&resource),
            busy_to_idle: busy_timeout,
            idle_to_erase: idle_timeout,
            created_at: Instant::now(),
            timer,
        };
        info!(pool = %self.name, id = %instance_id, "granted access to new resource");
        state.busy.insert(instance_id.clone(), entry);
        Ok(Reserved {
            id: instance_id,
            resource,
        })
    }

    /// Resolve the id for a reservation. `FromResource` yields the payload
    /// identity when one exists already, or an empty provisional id before
    /// creation.
    fn resolve_id(&self, id: &IdRequest<'_>, resource: Option<&Arc<A::Resource>>) -> String {
        match id {
            IdRequest::Explicit(requested) if !requested.is_empty() => (*requested).to_string(),
            IdRequest::Explicit(_) | IdRequest::Generate => {
                generate_instance_id(&self.name, &self.id_counter)
            }
            IdRequest::FromResource => resource
                .map(|r| format!("{:p}", Arc::as_ptr(r)))
                .unwrap_or_default(),
        }
    }

    fn release(&self, id: &str) -> Result<(), LifecycleError> {
        let mut state = self.state.lock();
        let entry = state
            .busy
            .remove(id)
            .ok_or_else(|| LifecycleError::ResourceNotFound(id.to_string()))?;
        debug!(pool = %self.name, id, "resource released explicitly");
        self.demote(&mut state, entry);
        Ok(())
    }

    /// Busy → idle: cancel the busy timer, invoke the hook, arm the
    /// idle-to-erase timer. Shared by `release` and the busy timeout handler.
    fn demote(&self, state: &mut PoolState<A::Resource>, mut entry: Entry<A::Resource>) {
        if let Some(timer) = entry.timer.take() {
            self.scheduler.cancel(timer);
        }
        self.adapter.busy_to_idle(&entry.resource);
        entry.timer = self.arm(Transition::IdleToErase, &entry.id, entry.idle_to_erase);
        state.idle.push(entry);
    }

    fn erase(&self, id: &str) {
        if id.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        if let Some(entry) = state.busy.remove(id) {
            self.demote(&mut state, entry);
        }
        if let Some(pos) = state.idle.iter().position(|e| e.id == id) {
            let mut entry = state.idle.remove(pos);
            if let Some(timer) = entry.timer.take() {
                self.scheduler.cancel(timer);
            }
            self.adapter.erased(&entry.resource);
            info!(
                pool = %self.name,
                id = %entry.id,
                lifetime_ms = entry.created_at.elapsed().as_millis() as u64,
                "resource erased"
            );
        }
    }

    fn busy_refresh(&self, id: &str) -> Result<(), LifecycleError> {
        let mut state = self.state.lock();
        let entry = state
            .busy
            .get_mut(id)
            .ok_or_else(|| LifecycleError::ResourceNotFound(id.to_string()))?;
        if entry.busy_to_idle.is_zero() {
            return Ok(());
        }
        let busy_to_idle = entry.busy_to_idle;
        entry.timer = match entry.timer.take() {
            Some(timer) => match self.scheduler.refresh(timer, busy_to_idle) {
                Ok(new_timer) => Some(new_timer),
                // The old timer fired in the meantime; arm a fresh one.
                Err(_) => self.arm(Transition::BusyToIdle, id, busy_to_idle),
            },
            None => self.arm(Transition::BusyToIdle, id, busy_to_idle),
        };
        debug!(pool = %self.name, id, "busy countdown refreshed");
        Ok(())
    }

    fn cleanup(&self) {
        let mut state = self.state.lock();
        info!(
            pool = %self.name,
            busy = state.busy.len(),
            idle = state.idle.len(),
            "freeing all resources"
        );
        for (_, mut entry) in state.busy.drain() {
            if let Some(timer) = entry.timer.take() {
                self.scheduler.cancel(timer);
            }
            self.adapter.busy_to_idle(&entry.resource);
            self.adapter.erased(&entry.resource);
        }
        for mut entry in state.idle.drain(..) {
            if let Some(timer) = entry.timer.take() {
                self.scheduler.cancel(timer);
            }
            self.adapter.erased(&entry.resource);
        }
    }

    /// Register a transition timer; `Duration::ZERO` switches it off.
    fn arm(&self, kind: Transition, id: &str, timeout: Duration) -> Option<TimerHandle> {
        if timeout.is_zero() {
            return None;
        }
        let listener = self.listener.get()?;
        Some(self.scheduler.schedule(
            timeout,
            Arc::clone(listener),
            PoolTimerEvent {
                id: id.to_string(),
                kind,
            },
        ))
    }

    /// Busy timeout: demote exactly as `release` would, with a warning that
    /// the resource timed out rather than being released.
    fn timeout_busy_to_idle(&self, handle: TimerHandle, id: &str) {
        let mut state = self.state.lock();
        // A handle that no longer matches lost a race against release or
        // busy_refresh; ignore it.
        match state.busy.get(id) {
            Some(entry) if entry.timer == Some(handle) => {}
            _ => return,
        }
        let Some(entry) = state.busy.remove(id) else {
            return;
        };
        warn!(
            pool = %self.name,
            id,
            busy_ms = entry.busy_to_idle.as_millis() as u64,
            "resource was not released in time, demoting to idle"
        );
        self.demote(&mut state, entry);
    }

    /// Idle timeout: evict exactly as `erase` would.
    fn timeout_idle_to_erase(&self, handle: TimerHandle, id: &str) {
        let mut state = self.state.lock();
        let Some(pos) = state
            .idle
            .iter()
            .position(|e| e.id == id && e.timer == Some(handle))
        else {
            return;
        };
        let mut entry = state.idle.remove(pos);
        entry.timer = None;
        self.adapter.erased(&entry.resource);
        info!(
            pool = %self.name,
            id = %entry.id,
            idle_ms = entry.idle_to_erase.as_millis() as u64,
            "idle resource erased after timeout"
        );
    }
}

/// Pick the idle entry to recycle. An explicit id that still names an idle
/// entry takes that entry, so a recycled id is never left behind on a second
/// idle payload; everything else reuses the most recently idled one.
fn take_idle<R>(state: &mut PoolState<R>, id: &IdRequest<'_>) -> Option<Entry<R>> {
    if let IdRequest::Explicit(requested) = id {
        if let Some(pos) = state.idle.iter().rposition(|e| e.id == *requested) {
            return Some(state.idle.remove(pos));
        }
    }
    state.idle.pop()
}

/// Route a timer event back into the owning pool, if it still exists.
fn relay_timeout<A: ResourceAdapter>(
    shared: &Weak<PoolShared<A>>,
    handle: TimerHandle,
    event: &PoolTimerEvent,
) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    match event.kind {
        Transition::BusyToIdle => shared.timeout_busy_to_idle(handle, &event.id),
        Transition::IdleToErase => shared.timeout_idle_to_erase(handle, &event.id),
    }
}

fn clamp_timeout(pool: &str, which: &str, timeout: Duration) -> Duration {
    if !timeout.is_zero() && timeout < MIN_TRANSITION_TIMEOUT {
        warn!(
            pool,
            which,
            requested_ms = timeout.as_millis() as u64,
            "transition timeout below minimum, clamping to 100ms"
        );
        return MIN_TRANSITION_TIMEOUT;
    }
    timeout
}
