//! Priority task scheduler.
//!
//! A fixed pool of worker threads drains a shared [`PriorityTaskQueue`].
//! Tasks run outside the queue lock; a failing or panicking task is logged
//! and counted, and the worker moves on to the next one.
//!
//! Dequeue order is highest priority weight first, then earliest creation
//! time. Tasks may be scheduled before [`Scheduler::start`]; they wait in the
//! queue. [`Scheduler::stop`] drops whatever is still queued.

pub mod queue;
pub mod task;

#[cfg(test)]
mod tests;

pub use queue::PriorityTaskQueue;
pub use task::{Task, TaskCallback, TaskError, TaskId, TaskIdGenerator, TaskOutput, TaskPriority};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::runtime::component::{ComponentHandle, ComponentId, Hook};
use crate::runtime::worker::WorkerGroup;

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker threads started by the runtime.
    pub num_workers: usize,
    /// How long an idle worker waits for work before re-checking shutdown.
    pub idle_timeout_ms: u64,
    /// Upper bound on waiting for workers during `stop()`.
    pub join_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let num_cpus = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            num_workers: num_cpus,
            idle_timeout_ms: 10,
            join_timeout_ms: 1000,
        }
    }
}

impl SchedulerConfig {
    #[inline]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    #[inline]
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Scheduler statistics.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Total tasks scheduled.
    pub tasks_scheduled: AtomicUsize,
    /// Tasks whose callback returned normally.
    pub tasks_completed: AtomicUsize,
    /// Tasks whose callback returned an error or panicked.
    pub tasks_failed: AtomicUsize,
    /// Tasks discarded by `stop()` without running.
    pub tasks_dropped: AtomicUsize,
    /// Total execution time in microseconds.
    pub total_exec_time_us: AtomicUsize,
}

impl SchedulerStats {
    #[inline]
    pub fn record_scheduled(&self) {
        self.tasks_scheduled.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn record_completed(
        &self,
        duration_us: usize,
    ) {
        self.tasks_completed.fetch_add(1, Ordering::SeqCst);
        self.total_exec_time_us
            .fetch_add(duration_us, Ordering::SeqCst);
    }

    #[inline]
    pub fn record_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn record_dropped(
        &self,
        count: usize,
    ) {
        self.tasks_dropped.fetch_add(count, Ordering::SeqCst);
    }

    /// Tasks that ran, successfully or not.
    pub fn executed(&self) -> usize {
        self.tasks_completed.load(Ordering::SeqCst) + self.tasks_failed.load(Ordering::SeqCst)
    }
}

/// Workers of one `start()`..`stop()` generation.
#[derive(Debug)]
struct WorkerPool {
    group: WorkerGroup,
    running: Arc<AtomicBool>,
}

/// Priority scheduler with a fixed worker pool.
#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    queue: Arc<PriorityTaskQueue>,
    workers: Mutex<Option<WorkerPool>>,
    stats: Arc<SchedulerStats>,
    ids: TaskIdGenerator,
}

impl Scheduler {
    /// Create a stopped scheduler with default config.
    #[inline]
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a stopped scheduler with custom configuration.
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            queue: Arc::new(PriorityTaskQueue::new()),
            workers: Mutex::new(None),
            stats: Arc::new(SchedulerStats::default()),
            ids: TaskIdGenerator::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Schedule `callback` to run on a worker thread.
    ///
    /// Safe to call from any thread, including from inside a running task.
    pub fn schedule<F>(
        &self,
        callback: F,
        priority: TaskPriority,
        component: Option<ComponentId>,
        name: impl Into<String>,
    ) -> TaskId
    where
        F: FnOnce() -> anyhow::Result<TaskOutput> + Send + 'static,
    {
        let task = Task::new(self.ids.next(), priority, component, name, callback);
        self.submit(task)
    }

    /// Queue an already-built task.
    pub fn submit(
        &self,
        task: Task,
    ) -> TaskId {
        let id = task.id();
        debug!(task = %task.name(), %id, priority = ?task.priority(), "task scheduled");
        self.stats.record_scheduled();
        self.queue.push(task);
        id
    }

    /// Allocate an ID for a task built with [`Task::new`].
    #[inline]
    pub fn next_task_id(&self) -> TaskId {
        self.ids.next()
    }

    /// Schedule `hook` on `component` if its definition provides it.
    ///
    /// The task is named `{capability}:{definition}` and tagged with the
    /// component ID. Returns `None` when the capability is absent.
    pub fn schedule_hook(
        &self,
        component: &ComponentHandle,
        hook: Hook,
        priority: TaskPriority,
    ) -> Option<TaskId> {
        let capability = hook.capability();
        if !component.has_capability(capability) {
            return None;
        }

        let name = format!("{}:{}", capability, component.definition_name());
        let target = Arc::clone(component);
        Some(self.schedule(
            move || match target.invoke(&hook) {
                Some(result) => result.map(|()| None),
                None => Ok(None),
            },
            priority,
            Some(component.id()),
            name,
        ))
    }

    /// Start `worker_count` workers (at least one). No-op if already running.
    pub fn start(
        &self,
        worker_count: usize,
    ) {
        let mut workers = self.workers.lock();
        if workers.is_some() {
            return;
        }

        let worker_count = worker_count.max(1);
        let running = Arc::new(AtomicBool::new(true));

        let queue = Arc::clone(&self.queue);
        let flag = Arc::clone(&running);
        let stats = Arc::clone(&self.stats);
        let idle_timeout = self.config.idle_timeout();

        let group = WorkerGroup::spawn("scheduler-worker", worker_count, move |worker_id| {
            Self::worker_loop(worker_id, &queue, &flag, &stats, idle_timeout)
        });
        *workers = Some(WorkerPool { group, running });

        info!(workers = worker_count, "scheduler started");
    }

    /// Worker thread main loop.
    fn worker_loop(
        worker_id: usize,
        queue: &PriorityTaskQueue,
        running: &AtomicBool,
        stats: &SchedulerStats,
        idle_timeout: Duration,
    ) {
        while running.load(Ordering::SeqCst) {
            let Some(task) = queue.pop_timeout(idle_timeout) else {
                continue;
            };

            // Popped while stop() was draining the queue.
            if !running.load(Ordering::SeqCst) {
                stats.record_dropped(1);
                break;
            }

            let id = task.id();
            let name = task.name().to_string();
            let start = Instant::now();

            match task.execute() {
                Ok(_) => {
                    stats.record_completed(start.elapsed().as_micros() as usize);
                }
                Err(err) => {
                    stats.record_failed();
                    error!(task = %name, %id, worker = worker_id, error = %err, "task failed");
                }
            }
        }
    }

    /// Stop the workers and drop queued tasks. No-op if not running.
    ///
    /// Waits at most `join_timeout` for workers; a task already executing
    /// may finish after this returns.
    pub fn stop(&self) {
        let Some(pool) = self.workers.lock().take() else {
            return;
        };

        pool.running.store(false, Ordering::SeqCst);
        let dropped = self.queue.clear();
        self.stats.record_dropped(dropped);
        self.queue.notify_all();

        pool.group.join(self.config.join_timeout());
        info!(dropped, "scheduler stopped");
    }

    /// Whether workers are running.
    pub fn is_running(&self) -> bool {
        self.workers.lock().is_some()
    }

    /// Number of worker threads, 0 when stopped.
    pub fn worker_count(&self) -> usize {
        self.workers
            .lock()
            .as_ref()
            .map_or(0, |pool| pool.group.len())
    }

    /// Number of queued tasks.
    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub fn stats(&self) -> &Arc<SchedulerStats> {
        &self.stats
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
