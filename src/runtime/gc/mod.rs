//! Garbage collector for unmounted components
//!
//! The collector keeps a [`ComponentRef`] per registered instance and a
//! strong handle to it. A background thread sweeps on a fixed interval and
//! releases every ref that has been `Unmounted` for longer than the TTL,
//! scheduling the component's `cleanup` hook as a LOW priority task.


use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::runtime::component::{ComponentHandle, ComponentId, Hook};
use crate::runtime::scheduler::task::panic_message;
use crate::runtime::scheduler::{Scheduler, TaskPriority};
use crate::runtime::worker::WorkerGroup;

/// GC configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// How long a component stays unmounted before it is collected
    pub ttl_ms: u64,
    /// Interval between sweeps
    pub sweep_interval_ms: u64,
    /// Upper bound on waiting for the sweep thread during `stop()`
    pub join_timeout_ms: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 5000,
            sweep_interval_ms: 1000,
            join_timeout_ms: 1000,
        }
    }
}

impl GcConfig {
    #[inline]
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    #[inline]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    #[inline]
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Lifecycle state of a registered component.
///
/// States only move forward in declaration order; `GarbageCollected` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Created,
    Mounted,
    Updated,
    Unmounted,
    GarbageCollected,
}

/// Lifecycle bookkeeping for one component.
#[derive(Debug, Clone)]
pub struct ComponentRef {
    component: ComponentHandle,
    state: LifecycleState,
    created_at: Instant,
    mount_time: Option<Instant>,
    unmount_time: Option<Instant>,
    last_accessed: Instant,
}

impl ComponentRef {
    fn new(
        component: ComponentHandle,
        now: Instant,
    ) -> Self {
        Self {
            component,
            state: LifecycleState::Created,
            created_at: now,
            mount_time: None,
            unmount_time: None,
            last_accessed: now,
        }
    }

    #[inline]
    pub fn component(&self) -> &ComponentHandle {
        &self.component
    }

    #[inline]
    pub fn id(&self) -> ComponentId {
        self.component.id()
    }

    #[inline]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    #[inline]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    #[inline]
    pub fn mount_time(&self) -> Option<Instant> {
        self.mount_time
    }

    #[inline]
    pub fn unmount_time(&self) -> Option<Instant> {
        self.unmount_time
    }

    #[inline]
    pub fn last_accessed(&self) -> Instant {
        self.last_accessed
    }

    /// Move to `next`, stamping the matching timestamp.
    ///
    /// `last_accessed` is stamped on every call. The state is left alone
    /// (and `false` returned) for backward moves, for repeating any state
    /// except `Updated`, and from `GarbageCollected`.
    fn transition(
        &mut self,
        next: LifecycleState,
        now: Instant,
    ) -> bool {
        self.last_accessed = now;
        let allowed = match (self.state, next) {
            (LifecycleState::GarbageCollected, _) => false,
            (LifecycleState::Updated, LifecycleState::Updated) => true,
            (current, next) => next > current,
        };
        if !allowed {
            return false;
        }

        self.state = next;
        match next {
            LifecycleState::Mounted => self.mount_time = Some(now),
            LifecycleState::Unmounted => self.unmount_time = Some(now),
            _ => {}
        }
        true
    }

    /// Unmounted for strictly longer than `ttl` at `now`.
    fn is_expired(
        &self,
        now: Instant,
        ttl: Duration,
    ) -> bool {
        self.state == LifecycleState::Unmounted
            && self
                .unmount_time
                .is_some_and(|at| now.saturating_duration_since(at) > ttl)
    }
}

/// GC statistics
#[derive(Debug, Default)]
pub struct GcStats {
    /// Sweeps run
    pub sweeps: AtomicUsize,
    /// Components collected
    pub collected: AtomicUsize,
    /// Cleanup tasks scheduled
    pub cleanups_scheduled: AtomicUsize,
    /// Components whose release panicked
    pub release_failures: AtomicUsize,
}

struct GcShared {
    config: GcConfig,
    registry: Mutex<HashMap<ComponentId, ComponentRef>>,
    scheduler: Arc<Scheduler>,
    stats: GcStats,
}

impl GcShared {
    fn collect_expired(
        &self,
        now: Instant,
    ) -> Vec<ComponentId> {
        self.stats.sweeps.fetch_add(1, Ordering::SeqCst);
        let ttl = self.config.ttl();

        // Removal and the terminal transition happen under one lock.
        let collected: Vec<ComponentRef> = {
            let mut registry = self.registry.lock();
            let expired: Vec<ComponentId> = registry
                .iter()
                .filter(|(_, r)| r.is_expired(now, ttl))
                .map(|(id, _)| *id)
                .collect();
            expired
                .into_iter()
                .filter_map(|id| registry.remove(&id))
                .map(|mut r| {
                    r.state = LifecycleState::GarbageCollected;
                    r
                })
                .collect()
        };

        let mut ids = Vec::with_capacity(collected.len());
        for component_ref in collected {
            let id = component_ref.id();
            ids.push(id);
            self.stats.collected.fetch_add(1, Ordering::SeqCst);

            let released = panic::catch_unwind(AssertUnwindSafe(|| self.release(&component_ref)));
            if let Err(payload) = released {
                self.stats.release_failures.fetch_add(1, Ordering::SeqCst);
                error!(component = %id, panic = %panic_message(payload.as_ref()), "failed to release component");
            }
        }

        if !ids.is_empty() {
            debug!(collected = ids.len(), "gc sweep finished");
        }
        ids
    }

    fn release(
        &self,
        component_ref: &ComponentRef,
    ) {
        let component = component_ref.component();
        if self
            .scheduler
            .schedule_hook(component, Hook::Cleanup, TaskPriority::Low)
            .is_some()
        {
            self.stats
                .cleanups_scheduled
                .fetch_add(1, Ordering::SeqCst);
        }
        debug!(component = %component.id(), definition = %component.definition_name(), "component collected");
    }
}

struct Sweeper {
    shutdown: Sender<()>,
    group: WorkerGroup,
}

/// Garbage collector
pub struct GarbageCollector {
    shared: Arc<GcShared>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl std::fmt::Debug for GarbageCollector {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("GarbageCollector")
            .field("config", &self.shared.config)
            .field("registered", &self.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl GarbageCollector {
    /// Create a stopped collector that schedules cleanups on `scheduler`.
    pub fn new(
        config: GcConfig,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            shared: Arc::new(GcShared {
                config,
                registry: Mutex::new(HashMap::new()),
                scheduler,
                stats: GcStats::default(),
            }),
            sweeper: Mutex::new(None),
        }
    }

    #[inline]
    pub fn config(&self) -> &GcConfig {
        &self.shared.config
    }

    /// Start tracking `component` in state `Created`.
    ///
    /// Registering an already tracked instance leaves its ref untouched.
    pub fn register(
        &self,
        component: ComponentHandle,
    ) {
        let id = component.id();
        self.shared
            .registry
            .lock()
            .entry(id)
            .or_insert_with(|| ComponentRef::new(component, Instant::now()));
        debug!(component = %id, "component registered");
    }

    pub fn mount(
        &self,
        component: &ComponentHandle,
    ) -> bool {
        self.transition(component.id(), LifecycleState::Mounted)
    }

    pub fn update(
        &self,
        component: &ComponentHandle,
    ) -> bool {
        self.transition(component.id(), LifecycleState::Updated)
    }

    pub fn unmount(
        &self,
        component: &ComponentHandle,
    ) -> bool {
        self.transition(component.id(), LifecycleState::Unmounted)
    }

    fn transition(
        &self,
        id: ComponentId,
        next: LifecycleState,
    ) -> bool {
        let mut registry = self.shared.registry.lock();
        let Some(component_ref) = registry.get_mut(&id) else {
            debug!(component = %id, state = ?next, "lifecycle event for unregistered component");
            return false;
        };

        let from = component_ref.state;
        let moved = component_ref.transition(next, Instant::now());
        if moved {
            debug!(component = %id, ?from, to = ?next, "lifecycle transition");
        } else {
            debug!(component = %id, ?from, to = ?next, "lifecycle transition ignored");
        }
        moved
    }

    /// Run one sweep against `now`, returning the collected component IDs.
    pub fn collect_expired(
        &self,
        now: Instant,
    ) -> Vec<ComponentId> {
        self.shared.collect_expired(now)
    }

    /// Run one sweep now.
    pub fn sweep(&self) -> Vec<ComponentId> {
        self.shared.collect_expired(Instant::now())
    }

    /// Start the sweep thread. No-op if already running.
    pub fn start(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }

        let (shutdown, shutdown_rx) = channel::bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let interval = shared.config.sweep_interval();

        let group = WorkerGroup::spawn("gc-sweeper", 1, move |_| loop {
            match shutdown_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    shared.collect_expired(Instant::now());
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        *sweeper = Some(Sweeper { shutdown, group });
        info!(
            ttl_ms = self.shared.config.ttl_ms,
            interval_ms = self.shared.config.sweep_interval_ms,
            "garbage collector started"
        );
    }

    /// Stop the sweep thread. No-op if not running.
    pub fn stop(&self) {
        let Some(sweeper) = self.sweeper.lock().take() else {
            return;
        };

        let _ = sweeper.shutdown.send(());
        drop(sweeper.shutdown);
        sweeper.group.join(self.shared.config.join_timeout());
        info!("garbage collector stopped");
    }

    pub fn is_running(&self) -> bool {
        self.sweeper.lock().is_some()
    }

    pub fn contains(
        &self,
        id: ComponentId,
    ) -> bool {
        self.shared.registry.lock().contains_key(&id)
    }

    /// Lifecycle state of a tracked component.
    pub fn state_of(
        &self,
        id: ComponentId,
    ) -> Option<LifecycleState> {
        self.shared.registry.lock().get(&id).map(|r| r.state())
    }

    /// Snapshot of a tracked component's ref.
    pub fn get(
        &self,
        id: ComponentId,
    ) -> Option<ComponentRef> {
        self.shared.registry.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.shared.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.registry.lock().is_empty()
    }

    #[inline]
    pub fn stats(&self) -> &GcStats {
        &self.shared.stats
    }
}

impl Drop for GarbageCollector {
    fn drop(&mut self) {
        self.stop();
    }
}
